// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-topic message processing.
//
// decode -> fetch -> resolve printer -> print -> settle
//
// Every delivery is settled exactly once.  Decode failures, and any failure
// the error taxonomy marks as final, are discarded on the spot; transient
// fetch and print failures go through the shared retry tracker.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use spoolbridge_core::error::{AgentError, Result};
use spoolbridge_core::{AgentConfig, ErrorClass, PrintJob, Topic};
use spoolbridge_print::{PrinterResolver, RawPrintBackend};

use crate::broker::{Delivery, DeliveryStream, Settlement};
use crate::fetcher::ContentFetcher;
use crate::retry::{RetryDecision, RetryTracker, fingerprint};

/// Everything a topic consumer needs to turn a message into printed output.
///
/// Shared by every topic task and across supervisor restarts, so the retry
/// budget of a message survives a reconnect.
pub struct Pipeline {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub resolver: PrinterResolver,
    pub backend: Arc<dyn RawPrintBackend>,
    pub tracker: Arc<RetryTracker>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        resolver: PrinterResolver,
        backend: Arc<dyn RawPrintBackend>,
        tracker: Arc<RetryTracker>,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            backend,
            tracker,
        }
    }

    /// Decide the settlement for one message body.
    pub async fn handle(&self, config: &AgentConfig, topic: Topic, body: &[u8]) -> Settlement {
        let job = match PrintJob::decode(body) {
            Ok(job) => job,
            Err(e) => {
                warn!(topic = %topic, error = %e, "malformed message discarded");
                return Settlement::Discard;
            }
        };

        let key = fingerprint(body);
        match self.deliver(config, topic, &job).await {
            Ok(printer) => {
                self.tracker.clear(&key);
                info!(topic = %topic, reference = %job.reference, printer = %printer, "job printed");
                Settlement::Ack
            }
            Err(e) if matches!(e.class(), ErrorClass::Malformed | ErrorClass::FatalConfig) => {
                self.tracker.clear(&key);
                error!(
                    topic = %topic,
                    reference = %job.reference,
                    class = ?e.class(),
                    error = %e,
                    "job cannot succeed, discarded"
                );
                Settlement::Discard
            }
            Err(e) => match self.tracker.record_failure(&key) {
                RetryDecision::Requeue { attempt } => {
                    warn!(
                        topic = %topic,
                        reference = %job.reference,
                        fingerprint = %key,
                        attempt,
                        error = %e,
                        "job failed, requeueing"
                    );
                    Settlement::Requeue
                }
                RetryDecision::Discard => {
                    error!(
                        topic = %topic,
                        reference = %job.reference,
                        fingerprint = %key,
                        max = self.tracker.max_retries(),
                        error = %e,
                        "poison message discarded"
                    );
                    Settlement::Discard
                }
            },
        }
    }

    /// Fetch, resolve and print one decoded job.  Returns the printer used.
    async fn deliver(&self, config: &AgentConfig, topic: Topic, job: &PrintJob) -> Result<String> {
        let content = self.fetcher.fetch(config, topic, &job.reference).await?;
        self.print(&job.requested_printer, content).await
    }

    /// Resolve `requested` and hand `payload` to the backend.
    ///
    /// Both steps block on the OS spooler tools, so they run on the blocking
    /// pool.  Returns the resolved printer name.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn print(&self, requested: &str, payload: Vec<u8>) -> Result<String> {
        let resolver = self.resolver.clone();
        let backend = Arc::clone(&self.backend);
        let requested = requested.to_owned();

        tokio::task::spawn_blocking(move || {
            let printer = resolver.resolve(&requested);
            backend.print_raw(&printer, &payload)?;
            Ok(printer)
        })
        .await
        .map_err(|e| AgentError::Spooler(format!("print task failed: {e}")))?
    }
}

/// Resolve once `stop` reads `true` or its sender is gone.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Sequential consumer for one topic's delivery stream.
pub struct TopicConsumer {
    topic: Topic,
    config: Arc<AgentConfig>,
    pipeline: Arc<Pipeline>,
    stop: watch::Receiver<bool>,
}

impl TopicConsumer {
    pub fn new(
        topic: Topic,
        config: Arc<AgentConfig>,
        pipeline: Arc<Pipeline>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic,
            config,
            pipeline,
            stop,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Process `stream` until it ends, fails or a stop is requested.
    ///
    /// The stop signal is only observed between messages; a message being
    /// handled is always settled first.
    pub async fn run(mut self, mut stream: DeliveryStream) {
        info!(topic = %self.topic, "topic consumer started");
        loop {
            let next = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => {
                    info!(topic = %self.topic, "topic consumer stopping");
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(delivery.as_ref()).await,
                Some(Err(e)) => {
                    warn!(topic = %self.topic, error = %e, "delivery stream failed");
                    return;
                }
                None => {
                    info!(topic = %self.topic, "delivery stream ended");
                    return;
                }
            }
        }
    }

    async fn process(&self, delivery: &dyn Delivery) {
        let settlement = self
            .pipeline
            .handle(&self.config, self.topic, delivery.body())
            .await;

        match delivery.settle(settlement).await {
            Ok(()) => debug!(topic = %self.topic, ?settlement, "delivery settled"),
            Err(e) => warn!(topic = %self.topic, ?settlement, error = %e, "settle failed"),
        }
    }
}
