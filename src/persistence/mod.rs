//! Run history for service units of work

pub mod store;

pub use store::SqliteRunStore;

use crate::core::error::ServiceError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Final state of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// What started a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunTrigger {
    /// `job` command or a service with no schedule
    Once,
    /// Dispatched by the scheduler
    Scheduled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status '{}'", other),
        }
    }
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunTrigger::Once => write!(f, "once"),
            RunTrigger::Scheduled => write!(f, "scheduled"),
        }
    }
}

impl FromStr for RunTrigger {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "once" => Ok(RunTrigger::Once),
            "scheduled" => Ok(RunTrigger::Scheduled),
            other => anyhow::bail!("unknown run trigger '{}'", other),
        }
    }
}

/// Record of one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    pub service_name: String,

    pub trigger: RunTrigger,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Error message when the run failed
    pub error: Option<String>,
}

impl RunSummary {
    pub fn succeeded(
        run_id: Uuid,
        service_name: &str,
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            service_name: service_name.to_string(),
            trigger,
            status: RunStatus::Succeeded,
            started_at,
            completed_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(
        run_id: Uuid,
        service_name: &str,
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
        error: &ServiceError,
    ) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(error.to_string()),
            ..Self::succeeded(run_id, service_name, trigger, started_at)
        }
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.completed_at - self.started_at
    }
}

/// Storage for run history
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Runs of one service, most recent first
    async fn list_runs(&self, service_name: &str) -> Result<Vec<RunSummary>>;

    /// Names of every service with recorded runs
    async fn list_services(&self) -> Result<Vec<String>>;
}

/// In-memory history (for tests or `--no-history`)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
    by_service: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        if runs.insert(run.run_id, run.clone()).is_none() {
            self.by_service
                .write()
                .await
                .entry(run.service_name.clone())
                .or_default()
                .push(run.run_id);
        }
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, service_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_service = self.by_service.read().await;

        let mut result: Vec<RunSummary> = by_service
            .get(service_name)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_services(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.by_service.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
