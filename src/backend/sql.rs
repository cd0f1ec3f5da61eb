//! SQL backend over sqlx's driver-agnostic connection

use crate::backend::dsn::{Driver, Dsn};
use crate::backend::retry::{ReconnectCounter, RetryPolicy, Retryable};
use crate::backend::session::{Connection, ConnectionFactory, ResourceSession};
use crate::core::args::ArgSpec;
use crate::core::batch::Record;
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Column, Executor, Row, TypeInfo};
use std::sync::Once;
use tracing::debug;

// SQLSTATE / SQLite result codes that clear on an immediate retry
const TRANSIENT_CODES: &[&str] = &[
    // SQLite: busy, locked
    "5", "6", "517",
    // Postgres: serialization failure, deadlock, connection exceptions, shutdown
    "40001", "40P01", "08000", "08003", "08006", "57P01", "57P03", "53300",
];

static INSTALL_DRIVERS: Once = Once::new();

/// Connection parameters plus retry state for one SQL database
pub struct SqlBackend {
    name: String,
    driver: Driver,
    dsn: Dsn,
    retry: RetryPolicy,
    reconnects: ReconnectCounter,
}

impl SqlBackend {
    pub fn new(name: &str, driver: Driver, dsn: Dsn, retry: RetryPolicy) -> Self {
        Self {
            name: name.to_string(),
            driver,
            dsn,
            retry,
            reconnects: ReconnectCounter::new(),
        }
    }

    /// Keys shared by every SQL component configured under `key`
    pub fn args(key: &str) -> Vec<ArgSpec> {
        vec![
            ArgSpec::scoped(key, "driver").help("SQL driver: postgres or sqlite"),
            ArgSpec::scoped(key, "dsn")
                .list(4)
                .help("Connection: server username password database"),
        ]
    }

    /// Build from `{key}.driver` (default postgres) and `{key}.dsn`
    pub fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        let driver_key = format!("{}.driver", key);
        let driver = match config.get_str(&driver_key) {
            Some(raw) => raw
                .parse::<Driver>()
                .map_err(|reason| ServiceError::config(&driver_key, reason))?,
            None => Driver::default(),
        };
        let dsn_key = format!("{}.dsn", key);
        let dsn: Dsn = config.section(&dsn_key)?;
        dsn.connect_options(driver).map_err(|err| match err {
            ServiceError::Configuration { reason, .. } => ServiceError::config(&dsn_key, reason),
            other => other,
        })?;

        Ok(Self::new(key, driver, dsn, RetryPolicy::from_config(config)?))
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn session(&self) -> ResourceSession<'_, Self> {
        ResourceSession::new(self)
    }

    /// Round-trip `SELECT 1` in a rolled-back session; not retried
    pub async fn ping(&self) -> Result<()> {
        self.session()
            .rollback(|conn| Box::pin(async move { conn.ping().await }))
            .await
    }
}

#[async_trait]
impl ConnectionFactory for SqlBackend {
    type Connection = SqlConnection;

    fn backend(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<SqlConnection> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let options = self.dsn.connect_options(self.driver)?;
        debug!("Connecting {} ({} at {})", self.name, self.driver, self.dsn.server);
        let inner = <AnyConnection as sqlx::Connection>::connect_with(&options)
            .await
            .map_err(|e| ServiceError::connectivity(&self.name, e))?;

        let mut conn = SqlConnection {
            backend: self.name.clone(),
            inner,
        };
        conn.batch("BEGIN").await?;
        Ok(conn)
    }
}

impl Retryable for SqlBackend {
    fn target(&self) -> &str {
        &self.name
    }

    fn reconnects(&self) -> &ReconnectCounter {
        &self.reconnects
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // A dropped connection mid-run is worth reconnecting for
    fn classify(&self, err: &ServiceError) -> bool {
        err.is_transient() || matches!(err, ServiceError::Connectivity { .. })
    }
}

/// An open connection inside a transaction
pub struct SqlConnection {
    backend: String,
    inner: AnyConnection,
}

impl SqlConnection {
    /// Run a statement that takes no parameters
    pub async fn batch(&mut self, sql: &str) -> Result<()> {
        self.inner
            .execute(sql)
            .await
            .map(|_| ())
            .map_err(|e| classify(&self.backend, e))
    }

    pub async fn ping(&mut self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&mut self.inner)
            .await
            .map(|_| ())
            .map_err(|e| classify(&self.backend, e))
    }

    /// Run a query and decode every row into a JSON record
    pub async fn fetch_records(&mut self, sql: &str) -> Result<Vec<Record>> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut self.inner)
            .await
            .map_err(|e| classify(&self.backend, e))?;
        rows.iter().map(|row| decode_row(&self.backend, row)).collect()
    }

    /// Run a parameterized statement, returning the number of affected rows
    pub async fn execute_with(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_json(query, value));
        query
            .execute(&mut self.inner)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| classify(&self.backend, e))
    }

    pub fn raw(&mut self) -> &mut AnyConnection {
        &mut self.inner
    }
}

#[async_trait]
impl Connection for SqlConnection {
    async fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.batch("ROLLBACK").await
    }

    async fn close(self) -> Result<()> {
        let backend = self.backend;
        sqlx::Connection::close(self.inner)
            .await
            .map_err(|e| classify(&backend, e))
    }
}

fn bind_json<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn decode_row(backend: &str, row: &AnyRow) -> Result<Record> {
    row.columns()
        .iter()
        .map(|column| {
            let value = decode_value(row, column.ordinal()).ok_or_else(|| ServiceError::Backend {
                backend: backend.to_string(),
                message: format!(
                    "cannot decode column '{}' of type {}",
                    column.name(),
                    column.type_info().name()
                ),
            })?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn decode_value(row: &AnyRow, index: usize) -> Option<Value> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Some(v.map(Value::from).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Some(v.map(Value::from).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return Some(v.map(Value::from).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Some(v.map(Value::from).unwrap_or(Value::Null));
    }
    None
}

/// Map a driver error into the service taxonomy
pub fn classify(backend: &str, err: sqlx::Error) -> ServiceError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| TRANSIENT_CODES.contains(&code.as_ref()))
            .unwrap_or(false),
        _ => false,
    };

    if transient {
        ServiceError::TransientBackend {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    } else {
        ServiceError::Backend {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }
}
