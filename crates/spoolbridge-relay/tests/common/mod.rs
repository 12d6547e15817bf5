// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory broker, fetcher, directory and print backend for pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;

use spoolbridge_core::error::{AgentError, Result};
use spoolbridge_core::{AgentConfig, ConsumerState, JobReference, RelayTuning, Topic};
use spoolbridge_print::{PrinterDirectory, PrinterResolver, RawPrintBackend};
use spoolbridge_relay::{
    Broker, BrokerConnection, ContentFetcher, Delivery, DeliveryStream, Pipeline, RetryTracker,
    Settlement,
};

/// Upper bound for any single wait in these tests.
pub const WAIT_LIMIT: Duration = Duration::from_secs(60);

pub fn config() -> AgentConfig {
    AgentConfig {
        access_token: "tok".into(),
        schema_name: "tenant_a".into(),
        backend_url: "http://backend.test".into(),
        broker_url: "amqp://broker.test".into(),
    }
}

pub fn tuning() -> RelayTuning {
    RelayTuning {
        reconnect_backoff: Duration::from_secs(5),
        stop_grace: Duration::from_secs(1),
        ..RelayTuning::default()
    }
}

/// Wait until `state` reports `want`.
pub async fn wait_state(state: &mut watch::Receiver<ConsumerState>, want: ConsumerState) {
    tokio::time::timeout(WAIT_LIMIT, state.wait_for(|s| *s == want))
        .await
        .expect("state never reached")
        .expect("supervisor dropped its state channel");
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

type Sink = mpsc::UnboundedSender<Result<Box<dyn Delivery>>>;

/// Broker that fails the first `failures` connects, then hands out
/// connections whose topic streams are fed through [`MockBroker::publish`].
#[derive(Default)]
pub struct MockBroker {
    failures_left: AtomicUsize,
    connects: Mutex<Vec<Instant>>,
    closes: Arc<AtomicUsize>,
    sinks: Arc<Mutex<HashMap<Topic, Sink>>>,
    lost: Arc<Notify>,
}

impl MockBroker {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Wait (polling) until every one of `topics` has a live subscription.
    pub async fn wait_subscribed(&self, topics: &[Topic]) {
        let all_live = async {
            while !topics.iter().all(|t| self.is_subscribed(*t)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(WAIT_LIMIT, all_live)
            .await
            .expect("topics were never subscribed");
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.sinks.lock().unwrap().contains_key(&topic)
    }

    /// Push a message onto `topic` and return its settlement log.
    pub fn publish(&self, topic: Topic, body: &[u8]) -> SettlementLog {
        let log = SettlementLog::default();
        let delivery = MockDelivery {
            body: body.to_vec(),
            log: log.clone(),
        };
        let sinks = self.sinks.lock().unwrap();
        let sink = sinks.get(&topic).expect("topic not subscribed");
        sink.send(Ok(Box::new(delivery))).expect("stream dropped");
        log
    }

    /// End one topic's stream while the connection itself stays up.
    pub fn end_topic(&self, topic: Topic) {
        self.sinks.lock().unwrap().remove(&topic);
    }

    /// Simulate the broker dropping the current connection.
    pub fn drop_connection(&self) {
        self.sinks.lock().unwrap().clear();
        self.lost.notify_one();
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&self, _url: &str) -> Result<Box<dyn BrokerConnection>> {
        self.connects.lock().unwrap().push(Instant::now());

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::Broker("connection refused".into()));
        }

        Ok(Box::new(MockConnection {
            sinks: Arc::clone(&self.sinks),
            closes: Arc::clone(&self.closes),
            lost: Arc::clone(&self.lost),
        }))
    }
}

pub struct MockConnection {
    sinks: Arc<Mutex<HashMap<Topic, Sink>>>,
    closes: Arc<AtomicUsize>,
    lost: Arc<Notify>,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn subscribe(&self, topic: Topic, _group: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().unwrap().insert(topic, tx);

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(deliveries))
    }

    async fn closed(&self) -> AgentError {
        self.lost.notified().await;
        AgentError::ConnectionLost("broker went away".into())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Settlements recorded for one published message.
#[derive(Clone, Default)]
pub struct SettlementLog(Arc<Mutex<Vec<Settlement>>>);

impl SettlementLog {
    pub fn settlements(&self) -> Vec<Settlement> {
        self.0.lock().unwrap().clone()
    }

    /// Wait (polling) until at least `count` settlements are recorded.
    pub async fn wait_for(&self, count: usize) -> Vec<Settlement> {
        let settled = async {
            loop {
                let seen = self.settlements();
                if seen.len() >= count {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(WAIT_LIMIT, settled)
            .await
            .expect("message was never settled")
    }
}

struct MockDelivery {
    body: Vec<u8>,
    log: SettlementLog,
}

#[async_trait]
impl Delivery for MockDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn settle(&self, settlement: Settlement) -> Result<()> {
        self.log.0.lock().unwrap().push(settlement);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Fetcher replaying a scripted list of outcomes, then succeeding with
/// `fallback`.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<Vec<u8>>>>,
    fallback: Vec<u8>,
    calls: Mutex<Vec<(Topic, JobReference)>>,
}

impl ScriptedFetcher {
    pub fn ok(content: &[u8]) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: content.to_vec(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `n` fetches before serving `content`.
    pub fn failing(n: usize, content: &[u8]) -> Self {
        let fetcher = Self::ok(content);
        {
            let mut script = fetcher.script.lock().unwrap();
            for _ in 0..n {
                script.push_back(Err(AgentError::FetchStatus {
                    status: 503,
                    body: "unavailable".into(),
                }));
            }
        }
        fetcher
    }

    pub fn calls(&self) -> Vec<(Topic, JobReference)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        _config: &AgentConfig,
        topic: Topic,
        reference: &JobReference,
    ) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push((topic, reference.clone()));
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.fallback.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Printers
// ---------------------------------------------------------------------------

pub struct FixedDirectory(pub Vec<String>);

impl PrinterDirectory for FixedDirectory {
    fn list_printers(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }

    fn default_printer(&self) -> Result<String> {
        self.0
            .first()
            .cloned()
            .ok_or_else(|| AgentError::Discovery("no printers".into()))
    }
}

/// Backend that records every job it prints.  It can be told to fail the
/// first few jobs or to hold each job until the test lets it go.
#[derive(Default)]
pub struct RecordingBackend {
    jobs: Mutex<Vec<(String, Vec<u8>)>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    hold: Option<Mutex<std::sync::mpsc::Receiver<()>>>,
    entered: Notify,
}

impl RecordingBackend {
    /// Fail the next `n` jobs with a spooler error.
    pub fn failing(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    /// Block every job inside the spooler call until a unit is sent on the
    /// returned channel (or the sender is dropped).
    pub fn stalled() -> (Self, std::sync::mpsc::Sender<()>) {
        let (release, held) = std::sync::mpsc::channel();
        let backend = Self {
            hold: Some(Mutex::new(held)),
            ..Self::default()
        };
        (backend, release)
    }

    pub fn jobs(&self) -> Vec<(String, Vec<u8>)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until a job has entered the spooler call.
    pub async fn wait_entered(&self) {
        tokio::time::timeout(WAIT_LIMIT, self.entered.notified())
            .await
            .expect("no job reached the backend");
    }
}

impl RawPrintBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn print_raw(&self, printer: &str, payload: &[u8]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(hold) = &self.hold {
            let _ = hold.lock().unwrap().recv();
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AgentError::Spooler(format!("{printer}: printer is offline")));
        }

        self.jobs
            .lock()
            .unwrap()
            .push((printer.to_owned(), payload.to_vec()));
        Ok(())
    }
}

/// Everything a test needs to drive and inspect a pipeline.
pub struct Harness {
    pub fetcher: Arc<ScriptedFetcher>,
    pub backend: Arc<RecordingBackend>,
    pub tracker: Arc<RetryTracker>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(fetcher: ScriptedFetcher, printers: &[&str]) -> Self {
        Self::with_backend(fetcher, printers, RecordingBackend::default())
    }

    pub fn with_backend(
        fetcher: ScriptedFetcher,
        printers: &[&str],
        backend: RecordingBackend,
    ) -> Self {
        let fetcher = Arc::new(fetcher);
        let backend = Arc::new(backend);
        let tracker = Arc::new(RetryTracker::new(3));
        let directory = Arc::new(FixedDirectory(
            printers.iter().map(|p| (*p).to_owned()).collect(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&fetcher) as Arc<dyn ContentFetcher>,
            PrinterResolver::new(directory),
            Arc::clone(&backend) as Arc<dyn RawPrintBackend>,
            Arc::clone(&tracker),
        ));
        Self {
            fetcher,
            backend,
            tracker,
            pipeline,
        }
    }
}
