//! Reads named tables from a SQL database into a batch

use crate::backend::{Retryable, SqlBackend};
use crate::core::batch::Batch;
use crate::core::collections::CollectionMap;
use crate::core::component::{Configurable, Input, Pingable};
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use crate::core::ArgSpec;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct SqlInputSection {
    tables: CollectionMap,
    #[serde(default)]
    queries: HashMap<String, String>,
}

/// Input that runs one query per logical table
///
/// ```yaml
/// input:
///   kind: sql
///   driver: postgres
///   dsn: [db.local, reader, secret, warehouse]
///   tables:
///     encounters: dbo.encounters
///   queries:
///     encounters: SELECT id, score FROM dbo.encounters WHERE score > 0
/// ```
///
/// Tables without a query are read whole. All queries run in a single
/// rolled-back session, retried as a unit on transient failure.
pub struct SqlInput {
    backend: SqlBackend,
    queries: Arc<Vec<(String, String)>>,
}

impl SqlInput {
    pub fn new(
        backend: SqlBackend,
        tables: &CollectionMap,
        mut queries: HashMap<String, String>,
    ) -> Result<Self> {
        let key = backend.target().to_string();
        if tables.is_empty() {
            return Err(ServiceError::config(
                format!("{}.tables", key),
                "at least one table is required",
            ));
        }
        tables.validate(&format!("{}.tables", key), &[])?;
        if let Some(unknown) = queries.keys().find(|name| tables.physical(name).is_none()) {
            return Err(ServiceError::config(
                format!("{}.queries.{}", key, unknown),
                "query for a table that is not listed under 'tables'",
            ));
        }

        let queries = tables
            .iter()
            .map(|(logical, physical)| {
                let sql = queries
                    .remove(logical)
                    .unwrap_or_else(|| format!("SELECT * FROM {}", physical));
                (logical.to_string(), sql)
            })
            .collect();

        Ok(Self {
            backend,
            queries: Arc::new(queries),
        })
    }

    pub fn backend(&self) -> &SqlBackend {
        &self.backend
    }
}

impl Configurable for SqlInput {
    fn args(key: &str) -> Vec<ArgSpec> {
        SqlBackend::args(key)
    }

    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        let backend = SqlBackend::from_config(config, key)?;
        let section: SqlInputSection = config.section(key)?;
        Self::new(backend, &section.tables, section.queries)
    }
}

#[async_trait]
impl Pingable for SqlInput {
    async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

#[async_trait]
impl Input for SqlInput {
    type Batch = Batch;

    async fn fetch(&self) -> Result<Batch> {
        let backend = &self.backend;
        let queries = &self.queries;

        let batch = backend
            .execute(move || {
                let queries = Arc::clone(queries);
                async move {
                    backend
                        .session()
                        .rollback(move |conn| {
                            Box::pin(async move {
                                let mut batch = Batch::new();
                                for (name, sql) in queries.iter() {
                                    debug!("Reading {}: {}", name, sql);
                                    let rows = conn.fetch_records(sql).await?;
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
            "Read {} rows from {} tables",
            batch.row_count(),
            batch.datasets().len()
        );
        Ok(batch)
    }
}
