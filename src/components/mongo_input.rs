//! Reads documents from mapped collections into a batch

use crate::backend::{MongoBackend, Retryable};
use crate::core::batch::Batch;
use crate::core::component::{Configurable, Input, Pingable};
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use crate::core::ArgSpec;
use async_trait::async_trait;
use mongodb::bson::Document;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
struct MongoInputSection {
    #[serde(default)]
    filters: HashMap<String, serde_json::Value>,
}

/// Input that runs one `find` per logical collection
///
/// ```yaml
/// input:
///   kind: mongo
///   uri: mongodb://db.local:27017/clinical
///   collections:
///     labs: lab_results
///   filters:
///     labs: {status: final}
/// ```
///
/// Collections without a filter are read whole. Every `find` runs in one
/// session, retried as a unit on transient failure.
pub struct MongoInput {
    backend: MongoBackend,
    finds: Arc<Vec<(String, Document)>>,
}

impl MongoInput {
    pub fn new(backend: MongoBackend, mut filters: HashMap<String, Document>) -> Result<Self> {
        let key = backend.target().to_string();
        if let Some(unknown) = filters.keys().find(|name| backend.collections().physical(name).is_none()) {
            return Err(ServiceError::config(
                format!("{}.filters.{}", key, unknown),
                "filter for a collection that is not listed under 'collections'",
            ));
        }

        let finds = backend
            .collections()
            .iter()
            .map(|(logical, _)| (logical.to_string(), filters.remove(logical).unwrap_or_default()))
            .collect();

        Ok(Self {
            backend,
            finds: Arc::new(finds),
        })
    }

    pub fn backend(&self) -> &MongoBackend {
        &self.backend
    }
}

impl Configurable for MongoInput {
    fn args(key: &str) -> Vec<ArgSpec> {
        MongoBackend::args(key)
    }

    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        let backend = MongoBackend::from_config(config, key, &[])?;
        let section: MongoInputSection = config.optional_section(key)?.unwrap_or_default();
        let filters = section
            .filters
            .into_iter()
            .map(|(name, filter)| {
                mongodb::bson::to_document(&filter)
                    .map(|document| (name.clone(), document))
                    .map_err(|e| ServiceError::config(format!("{}.filters.{}", key, name), e.to_string()))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Self::new(backend, filters)
    }
}

#[async_trait]
impl Pingable for MongoInput {
    async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

#[async_trait]
impl Input for MongoInput {
    type Batch = Batch;

    async fn fetch(&self) -> Result<Batch> {
        let backend = &self.backend;
        let finds = &self.finds;

        let batch = backend
            .execute(move || {
                let finds = Arc::clone(finds);
                async move {
                    backend
                        .session()
                        .rollback(move |conn| {
                            Box::pin(async move {
                                let mut batch = Batch::new();
                                for (name, filter) in finds.iter() {
                                    debug!("Finding {} matching {}", name, filter);
                                    let rows = conn.find(name, filter.clone()).await?;
                                    batch.insert(name, rows);
                                }
                                Ok(batch)
                            })
                        })
                        .await
                }
            })
            .await?;

        info!(
            "Read {} documents from {} collections",
            batch.row_count(),
            batch.datasets().len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{parse_document, resolve};
    use mongodb::bson::doc;

    fn config(yaml: &str) -> Configuration {
        resolve(parse_document(yaml).unwrap(), &HashMap::new(), &HashMap::new(), &[]).unwrap()
    }

    #[test]
    fn test_filters_follow_collection_order() {
        let input = MongoInput::from_config(
            &config(
                "input:\n  uri: mongodb://db.local/clinical\n  collections:\n    labs: lab_results\n    vitals: vitals\n  filters:\n    vitals:\n      unit: bpm\n",
            ),
            "input",
        )
        .unwrap();
        assert_eq!(
            input.finds.as_slice(),
            &[
                ("labs".to_string(), Document::new()),
                ("vitals".to_string(), doc! { "unit": "bpm" }),
            ]
        );
    }

    #[test]
    fn test_filter_for_unknown_collection_fails() {
        let err = MongoInput::from_config(
            &config(
                "input:\n  uri: mongodb://db.local/clinical\n  collections:\n    labs: lab_results\n  filters:\n    orders: {}\n",
            ),
            "input",
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("input.filters.orders"));
    }

    #[test]
    fn test_non_mapping_filter_is_configuration_error() {
        let err = MongoInput::from_config(
            &config(
                "input:\n  uri: mongodb://db.local/clinical\n  collections:\n    labs: lab_results\n  filters:\n    labs: [1, 2]\n",
            ),
            "input",
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("input.filters.labs"));
    }

    #[test]
    fn test_collections_are_required() {
        let err = MongoInput::from_config(&config("input:\n  uri: mongodb://db.local/clinical\n"), "input")
            .err()
            .unwrap();
        assert!(err.to_string().contains("input.collections"));
    }
}
