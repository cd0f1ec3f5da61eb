//! Writes prediction datasets into SQL tables

use crate::backend::{Driver, Retryable, SqlBackend};
use crate::core::batch::{Batch, Dataset};
use crate::core::collections::{is_identifier, CollectionMap};
use crate::core::component::{Configurable, Output, Pingable};
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use crate::core::ArgSpec;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct SqlOutputSection {
    tables: CollectionMap,
}

/// One planned `INSERT`
#[derive(Debug, Clone, PartialEq)]
struct Insert {
    sql: String,
    params: Vec<Value>,
}

/// Output that inserts every prediction row into the table mapped to its
/// dataset name
///
/// ```yaml
/// output:
///   kind: sql
///   driver: sqlite
///   dsn: [localhost, "-", "-", /var/lib/service/scores.db]
///   tables:
///     predictions: scores
/// ```
///
/// All inserts for one run are committed together; a failure rolls back
/// every row.
pub struct SqlOutput {
    backend: SqlBackend,
    tables: CollectionMap,
}

impl SqlOutput {
    pub fn new(backend: SqlBackend, tables: CollectionMap) -> Result<Self> {
        let key = format!("{}.tables", backend.target());
        if tables.is_empty() {
            return Err(ServiceError::config(key, "at least one table is required"));
        }
        tables.validate(&key, &[])?;
        Ok(Self { backend, tables })
    }

    pub fn backend(&self) -> &SqlBackend {
        &self.backend
    }

    fn plan(&self, predictions: &Batch) -> Result<Vec<Insert>> {
        let mut inserts = Vec::with_capacity(predictions.row_count());
        for dataset in predictions.datasets() {
            let table = self.tables.physical(&dataset.name).ok_or_else(|| {
                ServiceError::business(format!(
                    "no output table is mapped for dataset '{}'",
                    dataset.name
                ))
            })?;
            plan_dataset(self.backend.driver(), table, dataset, &mut inserts)?;
        }
        Ok(inserts)
    }
}

fn plan_dataset(driver: Driver, table: &str, dataset: &Dataset, inserts: &mut Vec<Insert>) -> Result<()> {
    for row in &dataset.rows {
        if row.is_empty() {
            return Err(ServiceError::business(format!(
                "dataset '{}' contains a row with no columns",
                dataset.name
            )));
        }
        if let Some(bad) = row.keys().find(|column| !is_identifier(column)) {
            return Err(ServiceError::business(format!(
                "dataset '{}' has invalid column name '{}'",
                dataset.name, bad
            )));
        }

        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| driver.placeholder(i)).collect();
        inserts.push(Insert {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params: row.values().cloned().collect(),
        });
    }
    Ok(())
}

impl Configurable for SqlOutput {
    fn args(key: &str) -> Vec<ArgSpec> {
        SqlBackend::args(key)
    }

    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        let backend = SqlBackend::from_config(config, key)?;
        let section: SqlOutputSection = config.section(key)?;
        Self::new(backend, section.tables)
    }
}

#[async_trait]
impl Pingable for SqlOutput {
    async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

#[async_trait]
impl Output for SqlOutput {
    type Batch = Batch;
    type Predictions = Batch;

    async fn emit(&self, _batch: &Batch, predictions: &Batch) -> Result<()> {
        let inserts = Arc::new(self.plan(predictions)?);
        if inserts.is_empty() {
            info!("No predictions to write");
            return Ok(());
        }

        let backend = &self.backend;
        let planned = &inserts;
        let written = backend
            .execute(move || {
                let inserts = Arc::clone(planned);
                async move {
                    backend
                        .session()
                        .commit(move |conn| {
                            Box::pin(async move {
                                let mut written = 0;
                                for insert in inserts.iter() {
                                    debug!("{}", insert.sql);
                                    written += conn.execute_with(&insert.sql, &insert.params).await?;
                                }
                                Ok(written)
                            })
                        })
                        .await
                }
            })
            .await?;

        info!("Wrote {} rows to {}", written, backend.target());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Dsn, RetryPolicy};
    use serde_json::json;

    fn output(driver: Driver) -> SqlOutput {
        let backend = SqlBackend::new("output", driver, Dsn::sqlite("unused.db"), RetryPolicy::no_retry());
        SqlOutput::new(backend, CollectionMap::new().with("predictions", "scores")).unwrap()
    }

    fn predictions(rows: Value) -> Batch {
        let rows = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect();
        Batch::new().with("predictions", rows)
    }

    #[test]
    fn test_plan_uses_driver_placeholders() {
        let batch = predictions(json!([{"id": 1, "score": 0.5}]));

        let sqlite = output(Driver::Sqlite).plan(&batch).unwrap();
        assert_eq!(sqlite[0].sql, "INSERT INTO scores (id, score) VALUES (?, ?)");
        assert_eq!(sqlite[0].params, vec![json!(1), json!(0.5)]);

        let postgres = output(Driver::Postgres).plan(&batch).unwrap();
        assert_eq!(postgres[0].sql, "INSERT INTO scores (id, score) VALUES ($1, $2)");
    }

    #[test]
    fn test_unmapped_dataset_is_business_error() {
        let batch = Batch::new().with("evidence", vec![json!({"id": 1}).as_object().cloned().unwrap()]);
        let err = output(Driver::Sqlite).plan(&batch).unwrap_err();
        assert!(matches!(err, ServiceError::BusinessLogic(_)));
        assert!(err.to_string().contains("evidence"));
    }

    #[test]
    fn test_unsafe_column_name_is_rejected() {
        let batch = predictions(json!([{"id); DROP TABLE scores; --": 1}]));
        assert!(output(Driver::Sqlite).plan(&batch).is_err());
    }

    #[test]
    fn test_invalid_physical_table_is_configuration_error() {
        let backend = SqlBackend::new("output", Driver::Sqlite, Dsn::sqlite("unused.db"), RetryPolicy::no_retry());
        let err = SqlOutput::new(backend, CollectionMap::new().with("predictions", "bad name"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("output.tables.predictions"));
    }
}
