// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection supervision.
//
// A `Supervisor` is one run of the consumer: connect, subscribe every topic,
// spawn one `TopicConsumer` per stream, then wait for connection loss or a
// stop.  Loss backs off and reconnects forever; stop tears down and ends the
// run.  `Relay` owns the current run and the active configuration and
// restarts the run whenever the configuration changes.
//
//   Idle -> Connecting -> Consuming -> Reconnecting -> Connecting -> ...
//                                                          ... -> Stopped

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use spoolbridge_core::error::{AgentError, Result};
use spoolbridge_core::{AgentConfig, ConsumerState, RelayTuning};

use crate::broker::{Broker, BrokerConnection};
use crate::consumer::{Pipeline, TopicConsumer, stop_requested};

/// The connection of the cycle in progress, shared so that an aborted run
/// can still be closed from outside.
type LiveConnection = Arc<std::sync::Mutex<Option<Arc<dyn BrokerConnection>>>>;

/// How a connected cycle ended.
enum CycleEnd {
    Stopped,
    Lost(AgentError),
}

/// Handle to one running supervisor loop.
///
/// Dropping the handle without calling [`Supervisor::stop`] also stops the
/// loop, but without waiting for it.
pub struct Supervisor {
    stop: watch::Sender<bool>,
    state: Arc<watch::Sender<ConsumerState>>,
    live: LiveConnection,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Start a supervisor loop for `config` on the current runtime.
    pub fn spawn(
        config: Arc<AgentConfig>,
        broker: Arc<dyn Broker>,
        pipeline: Arc<Pipeline>,
        tuning: RelayTuning,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(watch::Sender::new(ConsumerState::Idle));
        let live = LiveConnection::default();

        let runner = Runner {
            config,
            broker,
            pipeline,
            tuning,
            stop: stop_rx,
            state: Arc::clone(&state),
            live: Arc::clone(&live),
        };
        let task = tokio::spawn(runner.run());

        Self {
            stop: stop_tx,
            state,
            live,
            task,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Signal the loop to stop and wait up to `grace` for it; abort it after.
    ///
    /// An aborted run leaves its in-flight delivery unsettled.  Its connection
    /// is closed here so the broker hands that delivery out again.
    pub async fn stop(mut self, grace: Duration) {
        let _ = self.stop.send(true);

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => debug!("supervisor stopped"),
            Ok(Err(e)) => warn!(error = %e, "supervisor task failed"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "supervisor did not stop in time, aborting");
                self.task.abort();
                let _ = (&mut self.task).await;

                if let Some(connection) = take_live(&self.live) {
                    close(connection.as_ref()).await;
                }
                self.state.send_replace(ConsumerState::Stopped);
            }
        }
    }
}

/// State owned by the supervisor task.
struct Runner {
    config: Arc<AgentConfig>,
    broker: Arc<dyn Broker>,
    pipeline: Arc<Pipeline>,
    tuning: RelayTuning,
    stop: watch::Receiver<bool>,
    state: Arc<watch::Sender<ConsumerState>>,
    live: LiveConnection,
}

impl Runner {
    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    #[instrument(skip_all, fields(schema = %self.config.schema_name))]
    async fn run(mut self) {
        info!("consumer supervisor started");
        let mut connects: u64 = 0;

        loop {
            self.set_state(ConsumerState::Connecting);
            connects += 1;

            let connected = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => break,
                connected = self.broker.connect(&self.config.broker_url) => connected,
            };

            match connected {
                Ok(connection) => {
                    let connection = self.track(connection);
                    match self.consume(connection).await {
                        CycleEnd::Stopped => break,
                        CycleEnd::Lost(reason) => {
                            warn!(error = %reason, "broker connection lost");
                        }
                    }
                }
                Err(e) => warn!(attempt = connects, error = %e, "broker connect failed"),
            }

            self.set_state(ConsumerState::Reconnecting);
            info!(
                backoff_ms = self.tuning.reconnect_backoff.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => break,
                _ = tokio::time::sleep(self.tuning.reconnect_backoff) => {}
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!(connects, "consumer supervisor stopped");
    }

    /// Publish `connection` as the live one for this cycle.
    fn track(&self, connection: Box<dyn BrokerConnection>) -> Arc<dyn BrokerConnection> {
        let connection: Arc<dyn BrokerConnection> = Arc::from(connection);
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&connection));
        connection
    }

    /// Close the live connection unless someone already has.
    async fn release(&self) {
        if let Some(connection) = take_live(&self.live) {
            close(connection.as_ref()).await;
        }
    }

    /// Subscribe every topic on `connection` and run the topic consumers
    /// until the connection drops or a stop is requested.  The connection is
    /// always closed on return.
    async fn consume(&mut self, connection: Arc<dyn BrokerConnection>) -> CycleEnd {
        let mut streams = Vec::with_capacity(self.tuning.topics.len());
        for &topic in &self.tuning.topics {
            let subscribed = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => {
                    self.release().await;
                    return CycleEnd::Stopped;
                }
                subscribed = connection.subscribe(topic, &self.config.schema_name) => subscribed,
            };
            match subscribed {
                Ok(stream) => streams.push((topic, stream)),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "subscription failed");
                    self.release().await;
                    return CycleEnd::Lost(e);
                }
            }
        }

        let (child_stop, child_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for (topic, stream) in streams {
            let consumer = TopicConsumer::new(
                topic,
                Arc::clone(&self.config),
                Arc::clone(&self.pipeline),
                child_rx.clone(),
            );
            tasks.spawn(async move {
                consumer.run(stream).await;
                topic
            });
        }

        self.set_state(ConsumerState::Consuming);
        info!(topics = tasks.len(), "consuming");

        let end = tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop) => CycleEnd::Stopped,
            reason = connection.closed() => CycleEnd::Lost(reason),
            // A topic without a consumer is as good as a lost connection.
            joined = tasks.join_next() => CycleEnd::Lost(match joined {
                Some(Ok(topic)) => AgentError::ConnectionLost(format!("{topic} stream ended")),
                Some(Err(e)) => {
                    AgentError::ConnectionLost(format!("topic consumer task failed: {e}"))
                }
                None => AgentError::ConnectionLost("no topic streams".into()),
            }),
        };

        // Consumers finish the message in hand before exiting.
        let _ = child_stop.send(true);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "topic consumer task failed");
            }
        }

        self.release().await;
        end
    }
}

fn take_live(live: &LiveConnection) -> Option<Arc<dyn BrokerConnection>> {
    live.lock().unwrap_or_else(PoisonError::into_inner).take()
}

async fn close(connection: &dyn BrokerConnection) {
    if let Err(e) = connection.close().await {
        warn!(error = %e, "closing broker connection failed");
    }
}

/// Restartable owner of the consumer and its configuration.
///
/// There is at most one active configuration and one running supervisor;
/// the last applied configuration wins.
pub struct Relay {
    broker: Arc<dyn Broker>,
    pipeline: Arc<Pipeline>,
    tuning: RelayTuning,
    inner: Mutex<RelayInner>,
}

#[derive(Default)]
struct RelayInner {
    config: Option<Arc<AgentConfig>>,
    current: Option<Supervisor>,
    started: bool,
}

impl Relay {
    pub fn new(broker: Arc<dyn Broker>, pipeline: Arc<Pipeline>, tuning: RelayTuning) -> Self {
        Self {
            broker,
            pipeline,
            tuning,
            inner: Mutex::new(RelayInner::default()),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Validate and install `config`, then restart the consumer with it.
    pub async fn apply_config(&self, config: AgentConfig) -> Result<()> {
        config.validate()?;
        info!(
            schema = %config.schema_name,
            backend = %config.backend_url,
            "applying configuration"
        );

        let mut inner = self.inner.lock().await;
        inner.config = Some(Arc::new(config));
        self.restart(&mut inner).await
    }

    /// (Re)start the consumer with the active configuration.
    ///
    /// A running consumer is stopped first.  Without a configuration nothing
    /// is started and `NoConfig` is returned.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.restart(&mut inner).await
    }

    /// Stop the running consumer, if any.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(current) = inner.current.take() {
            info!("stopping consumer");
            current.stop(self.tuning.stop_grace).await;
        }
    }

    /// Lifecycle state of the current run; `Idle` before the first start.
    pub async fn state(&self) -> ConsumerState {
        let inner = self.inner.lock().await;
        match &inner.current {
            Some(current) => current.state(),
            None if inner.started => ConsumerState::Stopped,
            None => ConsumerState::Idle,
        }
    }

    /// Watch the current run's lifecycle, if one is running.
    pub async fn subscribe_state(&self) -> Option<watch::Receiver<ConsumerState>> {
        let inner = self.inner.lock().await;
        inner.current.as_ref().map(Supervisor::subscribe_state)
    }

    /// Active configuration snapshot.
    pub async fn config(&self) -> Option<Arc<AgentConfig>> {
        self.inner.lock().await.config.clone()
    }

    async fn restart(&self, inner: &mut RelayInner) -> Result<()> {
        let Some(config) = inner.config.clone() else {
            warn!("no configuration applied, consumer not started");
            return Err(AgentError::NoConfig);
        };

        if let Some(previous) = inner.current.take() {
            info!("restarting consumer");
            previous.stop(self.tuning.stop_grace).await;
        }

        inner.current = Some(Supervisor::spawn(
            config,
            Arc::clone(&self.broker),
            Arc::clone(&self.pipeline),
            self.tuning.clone(),
        ));
        inner.started = true;
        Ok(())
    }
}
