//! Mock collaborators and a controllable clock for scenario tests

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use microservice::backend::{
    Connection, ConnectionFactory, ReconnectCounter, RetryPolicy, Retryable,
};
use microservice::core::{Batch, Input, Model, Output, Pingable, Record, ServiceError, ServiceSettings};
use microservice::execution::{Clock, PipelineUnit, ServiceEngine};
use microservice::Result;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered log of collaborator calls shared by the mocks
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub fn count(journal: &Journal, entry: &str) -> usize {
    journal.lock().unwrap().iter().filter(|e| *e == entry).count()
}

fn note(journal: &Journal, entry: &str) {
    journal.lock().unwrap().push(entry.to_string());
}

pub fn rows(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| json!({"id": i, "score": i as f64 / 10.0}).as_object().cloned().unwrap())
        .collect()
}

pub fn unreachable(component: &str) -> ServiceError {
    ServiceError::connectivity(
        component,
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
    )
}

pub fn transient(message: &str) -> ServiceError {
    ServiceError::TransientBackend {
        backend: "flaky".to_string(),
        message: message.to_string(),
    }
}

pub fn settings(yaml: &str) -> ServiceSettings {
    serde_yaml::from_str(yaml).unwrap()
}

pub struct MockInput {
    journal: Journal,
    ping_fails: bool,
    fetch_errors: Mutex<VecDeque<Option<ServiceError>>>,
    rows: usize,
}

impl MockInput {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ping_fails: false,
            fetch_errors: Mutex::new(VecDeque::new()),
            rows: 3,
        }
    }

    pub fn failing_ping(mut self) -> Self {
        self.ping_fails = true;
        self
    }

    /// Script the next fetches: `None` succeeds, `Some(err)` fails
    pub fn script(self, outcomes: Vec<Option<ServiceError>>) -> Self {
        *self.fetch_errors.lock().unwrap() = outcomes.into();
        self
    }
}

#[async_trait]
impl Pingable for MockInput {
    async fn ping(&self) -> Result<()> {
        note(&self.journal, "ping:input");
        if self.ping_fails {
            return Err(unreachable("input"));
        }
        Ok(())
    }
}

#[async_trait]
impl Input for MockInput {
    type Batch = Batch;

    async fn fetch(&self) -> Result<Batch> {
        note(&self.journal, "fetch");
        let scripted = self.fetch_errors.lock().unwrap().pop_front().flatten();
        match scripted {
            Some(err) => Err(err),
            None => Ok(Batch::new().with("events", rows(self.rows))),
        }
    }
}

pub struct MockModel {
    journal: Journal,
    predict_fails: bool,
}

impl MockModel {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            predict_fails: false,
        }
    }

    pub fn failing_predict(mut self) -> Self {
        self.predict_fails = true;
        self
    }
}

#[async_trait]
impl Pingable for MockModel {
    async fn ping(&self) -> Result<()> {
        note(&self.journal, "ping:model");
        Ok(())
    }
}

impl Model for MockModel {
    type Batch = Batch;
    type Transformed = Batch;
    type Predictions = Batch;

    fn transform(&self, batch: &Batch) -> Result<Batch> {
        note(&self.journal, "transform");
        Ok(batch.clone())
    }

    fn predict(&self, transformed: &Batch) -> Result<Batch> {
        note(&self.journal, "predict");
        if self.predict_fails {
            return Err(ServiceError::business("model diverged"));
        }
        let rows = transformed.get("events").map(<[Record]>::to_vec).unwrap_or_default();
        Ok(Batch::new().with("predictions", rows))
    }

    fn reclaim(&self) {
        note(&self.journal, "reclaim");
    }
}

pub struct MockOutput {
    journal: Journal,
    ping_fails: bool,
    emitted: Arc<Mutex<Vec<Batch>>>,
}

impl MockOutput {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ping_fails: false,
            emitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_ping(mut self) -> Self {
        self.ping_fails = true;
        self
    }

    pub fn emitted(&self) -> Arc<Mutex<Vec<Batch>>> {
        self.emitted.clone()
    }
}

#[async_trait]
impl Pingable for MockOutput {
    async fn ping(&self) -> Result<()> {
        note(&self.journal, "ping:output");
        if self.ping_fails {
            return Err(unreachable("output"));
        }
        Ok(())
    }
}

#[async_trait]
impl Output for MockOutput {
    type Batch = Batch;
    type Predictions = Batch;

    async fn emit(&self, _batch: &Batch, predictions: &Batch) -> Result<()> {
        note(&self.journal, "emit");
        self.emitted.lock().unwrap().push(predictions.clone());
        Ok(())
    }
}

pub type MockEngine = ServiceEngine<MockInput, MockModel, MockOutput>;

pub fn engine(settings: ServiceSettings, input: MockInput, model: MockModel, output: MockOutput) -> MockEngine {
    ServiceEngine::new(settings, PipelineUnit::new(input, model, output))
}

/// Clock whose `sleep` advances `now` instantly
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<NaiveDateTime>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl FakeClock {
    pub fn at(hour: u32, minute: u32, second: u32) -> Self {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap();
        Self {
            now: Arc::new(Mutex::new(start)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn current(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> NaiveDateTime {
        self.current()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        *self.now.lock().unwrap() += TimeDelta::from_std(duration).unwrap();
        tokio::task::yield_now().await;
    }
}

/// Connection counters for [`FlakyBackend`]
#[derive(Debug, Default)]
pub struct SessionCounts {
    pub connects: AtomicU32,
    pub commits: AtomicU32,
    pub rollbacks: AtomicU32,
    pub closes: AtomicU32,
}

impl SessionCounts {
    pub fn snapshot(&self) -> (u32, u32, u32, u32) {
        (
            self.connects.load(Ordering::SeqCst),
            self.commits.load(Ordering::SeqCst),
            self.rollbacks.load(Ordering::SeqCst),
            self.closes.load(Ordering::SeqCst),
        )
    }
}

/// Backend whose first `failures` connects fail transiently
pub struct FlakyBackend {
    failures: AtomicU32,
    policy: RetryPolicy,
    reconnects: ReconnectCounter,
    pub counts: Arc<SessionCounts>,
}

impl FlakyBackend {
    pub fn new(failures: u32, policy: RetryPolicy) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            policy,
            reconnects: ReconnectCounter::new(),
            counts: Arc::new(SessionCounts::default()),
        }
    }
}

pub struct FlakyConnection {
    counts: Arc<SessionCounts>,
}

#[async_trait]
impl Connection for FlakyConnection {
    async fn commit(&mut self) -> Result<()> {
        self.counts.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.counts.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.counts.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ConnectionFactory for FlakyBackend {
    type Connection = FlakyConnection;

    fn backend(&self) -> &str {
        "flaky"
    }

    async fn connect(&self) -> Result<FlakyConnection> {
        self.counts.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(transient("connection reset by peer"));
        }
        Ok(FlakyConnection {
            counts: self.counts.clone(),
        })
    }
}

impl Retryable for FlakyBackend {
    fn target(&self) -> &str {
        "flaky"
    }

    fn reconnects(&self) -> &ReconnectCounter {
        &self.reconnects
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
