//! Model that forwards its input unchanged

use crate::core::batch::Batch;
use crate::core::component::{Configurable, Model, Pingable};
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct PassthroughSection {
    #[serde(default)]
    datasets: Vec<String>,
}

/// Copies the selected input datasets through as predictions
///
/// With no `datasets` list every input dataset is forwarded. Useful for
/// wiring and smoke-testing a deployment before real business logic exists.
#[derive(Debug, Default)]
pub struct PassthroughModel {
    datasets: Vec<String>,
}

impl PassthroughModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only(datasets: &[&str]) -> Self {
        Self {
            datasets: datasets.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn describe(&self) -> String {
        if self.datasets.is_empty() {
            "all".to_string()
        } else {
            self.datasets.join(", ")
        }
    }
}

impl Configurable for PassthroughModel {
    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        let section: PassthroughSection = config.optional_section(key)?.unwrap_or_default();
        Ok(Self {
            datasets: section.datasets,
        })
    }
}

#[async_trait]
impl Pingable for PassthroughModel {
    // In-process: nothing to reach, so check the dataset selection instead
    async fn ping(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in &self.datasets {
            if name.trim().is_empty() {
                return Err(ServiceError::config("model.datasets", "dataset names must not be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(ServiceError::config(
                    "model.datasets",
                    format!("'{}' is listed more than once", name),
                ));
            }
        }
        debug!("Passthrough model forwards {} datasets", self.describe());
        Ok(())
    }
}

impl Model for PassthroughModel {
    type Batch = Batch;
    type Transformed = Batch;
    type Predictions = Batch;

    fn transform(&self, batch: &Batch) -> Result<Batch> {
        if self.datasets.is_empty() {
            return Ok(batch.clone());
        }
        let mut selected = Batch::new();
        for name in &self.datasets {
            let rows = batch.get(name).ok_or_else(|| {
                ServiceError::business(format!("input has no dataset named '{}'", name))
            })?;
            selected.insert(name, rows.to_vec());
        }
        Ok(selected)
    }

    fn predict(&self, transformed: &Batch) -> Result<Batch> {
        Ok(transformed.clone())
    }

    fn reclaim(&self) {
        debug!("Passthrough model holds no per-run state");
    }
}
