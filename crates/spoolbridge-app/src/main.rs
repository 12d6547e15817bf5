// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolbridge: local print agent service
//
// Entry point. Initialises logging and the agent services, opens the local
// control plane and waits for a configuration to arrive; runs until Ctrl-C.

mod services;

use std::net::SocketAddr;
use std::process::ExitCode;

use spoolbridge_core::RelayTuning;
use tracing::{error, info, warn};

use services::agent_services::AgentServices;
use services::control_server::{ControlServer, DEFAULT_CONTROL_ADDR};

/// Environment override for the control listener address.
const CONTROL_ADDR_ENV: &str = "SPOOLBRIDGE_CONTROL_ADDR";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Spoolbridge starting");

    let services = match AgentServices::init(RelayTuning::default()) {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "failed to initialise agent services");
            return ExitCode::FAILURE;
        }
    };

    let mut server = ControlServer::new(control_addr());
    if let Err(e) = server.start(services.control()).await {
        error!(error = %e, "failed to start control server");
        return ExitCode::FAILURE;
    }
    info!("waiting for configuration over the control plane");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => warn!(error = %e, "cannot listen for shutdown signal, stopping"),
    }

    if let Err(e) = server.stop().await {
        warn!(error = %e, "control server did not stop cleanly");
    }
    services.relay().stop().await;

    info!("Spoolbridge stopped");
    ExitCode::SUCCESS
}

fn control_addr() -> SocketAddr {
    match std::env::var(CONTROL_ADDR_ENV) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(value = %raw, error = %e, "invalid {CONTROL_ADDR_ENV}, using default");
            DEFAULT_CONTROL_ADDR
        }),
        Err(_) => DEFAULT_CONTROL_ADDR,
    }
}
