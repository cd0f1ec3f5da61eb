//! Writes prediction datasets into mapped collections

use crate::backend::{MongoBackend, Retryable};
use crate::core::batch::Batch;
use crate::core::component::{Configurable, Output, Pingable};
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use crate::core::ArgSpec;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Output that inserts each prediction dataset into the collection mapped
/// to its name
///
/// ```yaml
/// output:
///   kind: mongo
///   uri: mongodb://db.local:27017/scores
///   collections:
///     predictions: predictions_v2
/// ```
///
/// A retried run re-inserts the whole batch, so documents written before a
/// transient failure may appear twice.
pub struct MongoOutput {
    backend: MongoBackend,
}

impl MongoOutput {
    pub fn new(backend: MongoBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &MongoBackend {
        &self.backend
    }

    fn check_mapped(&self, predictions: &Batch) -> Result<()> {
        match predictions
            .names()
            .find(|name| self.backend.collections().physical(name).is_none())
        {
            Some(name) => Err(ServiceError::business(format!(
                "no output collection is mapped for dataset '{}'",
                name
            ))),
            None => Ok(()),
        }
    }
}

impl Configurable for MongoOutput {
    fn args(key: &str) -> Vec<ArgSpec> {
        MongoBackend::args(key)
    }

    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        MongoBackend::from_config(config, key, &[]).map(Self::new)
    }
}

#[async_trait]
impl Pingable for MongoOutput {
    async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

#[async_trait]
impl Output for MongoOutput {
    type Batch = Batch;
    type Predictions = Batch;

    async fn emit(&self, _batch: &Batch, predictions: &Batch) -> Result<()> {
        self.check_mapped(predictions)?;
        if predictions.row_count() == 0 {
            info!("No predictions to write");
            return Ok(());
        }

        let backend = &self.backend;
        let shared = Arc::new(predictions.clone());
        let planned = &shared;
        let written = backend
            .execute(move || {
                let predictions = Arc::clone(planned);
                async move {
                    backend
                        .session()
                        .commit(move |conn| {
                            Box::pin(async move {
                                let mut written = 0;
                                for dataset in predictions.datasets() {
                                    debug!("Inserting {} documents from {}", dataset.rows.len(), dataset.name);
                                    written += conn.insert_many(&dataset.name, &dataset.rows).await?;
                                }
                                Ok(written)
                            })
                        })
                        .await
                }
            })
            .await?;

        info!("Wrote {} documents to {}", written, backend.target());
        Ok(())
    }
}
