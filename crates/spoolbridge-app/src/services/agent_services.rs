// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service wiring: picks the platform printer directory and raw print
// backend, builds the delivery pipeline and the restartable relay, and hands
// out the control-plane dispatcher.

use std::sync::Arc;

use spoolbridge_core::RelayTuning;
use spoolbridge_core::error::Result;
use spoolbridge_print::{PrinterResolver, platform_backend, platform_directory};
use spoolbridge_relay::{AmqpBroker, ControlHandler, HttpFetcher, Pipeline, Relay, RetryTracker};
use tracing::info;

/// Shared agent services, cheap to clone.
#[derive(Clone)]
pub struct AgentServices {
    relay: Arc<Relay>,
    control: Arc<ControlHandler>,
}

impl AgentServices {
    /// Build every service.  Nothing connects until a configuration arrives.
    pub fn init(tuning: RelayTuning) -> Result<Self> {
        let directory = platform_directory();
        let backend = platform_backend(Arc::clone(&directory));
        info!(backend = backend.name(), "raw print backend selected");

        let fetcher = Arc::new(HttpFetcher::new(tuning.fetch_timeout)?);
        let tracker = Arc::new(RetryTracker::new(tuning.max_retries));
        let pipeline = Arc::new(Pipeline::new(
            fetcher,
            PrinterResolver::new(Arc::clone(&directory)),
            backend,
            tracker,
        ));

        let relay = Arc::new(Relay::new(Arc::new(AmqpBroker::new()), pipeline, tuning));
        let control = Arc::new(ControlHandler::new(Arc::clone(&relay), directory));

        info!("agent services initialised");
        Ok(Self { relay, control })
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn control(&self) -> Arc<ControlHandler> {
        Arc::clone(&self.control)
    }
}
