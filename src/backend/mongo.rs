//! Document-store backend over the MongoDB driver
//!
//! Each session opens its own client, resolves the logical collection names
//! against the configured [`CollectionMap`], and shuts the client down when
//! the work is done.

use crate::backend::retry::{ReconnectCounter, RetryPolicy, Retryable};
use crate::backend::session::{Connection, ConnectionFactory, ResourceSession};
use crate::core::args::ArgSpec;
use crate::core::batch::Record;
use crate::core::collections::CollectionMap;
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// URI, database and collection mapping plus retry state for one document store
pub struct MongoBackend {
    name: String,
    uri: String,
    database: Option<String>,
    collections: Arc<CollectionMap>,
    retry: RetryPolicy,
    reconnects: ReconnectCounter,
}

impl MongoBackend {
    /// `declared` lists the logical names the owning component reads or
    /// writes; an empty list accepts whatever the map contains
    pub fn new(
        name: &str,
        uri: &str,
        collections: CollectionMap,
        declared: &[&str],
        retry: RetryPolicy,
    ) -> Result<Self> {
        let uri_key = format!("{}.uri", name);
        if !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
            return Err(ServiceError::config(
                uri_key,
                "expected a mongodb:// or mongodb+srv:// connection string",
            ));
        }
        let collections_key = format!("{}.collections", name);
        if collections.is_empty() {
            return Err(ServiceError::config(collections_key, "at least one collection is required"));
        }
        collections.validate(&collections_key, declared)?;

        Ok(Self {
            name: name.to_string(),
            uri: uri.to_string(),
            database: None,
            collections: Arc::new(collections),
            retry,
            reconnects: ReconnectCounter::new(),
        })
    }

    /// Use `database` instead of the one named in the URI path
    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn args(key: &str) -> Vec<ArgSpec> {
        vec![
            ArgSpec::scoped(key, "uri").help("Document store connection string"),
            ArgSpec::scoped(key, "database").help("Database, when the URI does not name one"),
        ]
    }

    /// Build from `{key}.uri`, `{key}.collections` and optional `{key}.database`
    pub fn from_config(config: &Configuration, key: &str, declared: &[&str]) -> Result<Self> {
        let uri_key = format!("{}.uri", key);
        let uri = config
            .get_str(&uri_key)
            .ok_or_else(|| ServiceError::missing(&uri_key))?;
        let collections: CollectionMap = config.section(&format!("{}.collections", key))?;
        let backend = Self::new(key, uri, collections, declared, RetryPolicy::from_config(config)?)?;

        Ok(match config.get_str(&format!("{}.database", key)) {
            Some(database) => backend.with_database(database),
            None => backend,
        })
    }

    pub fn collections(&self) -> &CollectionMap {
        &self.collections
    }

    pub fn session(&self) -> ResourceSession<'_, Self> {
        ResourceSession::new(self)
    }

    /// Run `{ping: 1}` against the database; not retried
    pub async fn ping(&self) -> Result<()> {
        self.session()
            .rollback(|conn| Box::pin(async move { conn.ping().await }))
            .await
    }
}

#[async_trait]
impl ConnectionFactory for MongoBackend {
    type Connection = MongoConnection;

    fn backend(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<MongoConnection> {
        let client = Client::with_uri_str(&self.uri).await.map_err(|e| {
            if matches!(e.kind.as_ref(), ErrorKind::InvalidArgument { .. }) {
                ServiceError::config(format!("{}.uri", self.name), e.to_string())
            } else {
                ServiceError::connectivity(&self.name, e)
            }
        })?;

        let database = match &self.database {
            Some(name) => client.database(name),
            None => client.default_database().ok_or_else(|| {
                ServiceError::config(
                    format!("{}.database", self.name),
                    "the URI names no database; add one to its path or set 'database'",
                )
            })?,
        };
        debug!("Opened {} client on database {}", self.name, database.name());

        Ok(MongoConnection {
            backend: self.name.clone(),
            client,
            database,
            collections: Arc::clone(&self.collections),
        })
    }
}

impl Retryable for MongoBackend {
    fn target(&self) -> &str {
        &self.name
    }

    fn reconnects(&self) -> &ReconnectCounter {
        &self.reconnects
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // Failover surfaces as a lost server or a cleared pool; both reconnect
    fn classify(&self, err: &ServiceError) -> bool {
        err.is_transient() || matches!(err, ServiceError::Connectivity { .. })
    }
}

/// An open client bound to one database
///
/// Writes land as they are made. Commit and rollback only end the session.
pub struct MongoConnection {
    backend: String,
    client: Client,
    database: Database,
    collections: Arc<CollectionMap>,
}

impl MongoConnection {
    pub async fn ping(&mut self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| classify(&self.backend, e))
    }

    /// Collection mapped to `logical`
    pub fn collection(&self, logical: &str) -> Result<Collection<Document>> {
        let physical = self
            .collections
            .require(&format!("{}.collections", self.backend), logical)?;
        Ok(self.database.collection(physical))
    }

    /// Every document matching `filter`, as JSON records
    pub async fn find(&mut self, logical: &str, filter: Document) -> Result<Vec<Record>> {
        let mut cursor = self
            .collection(logical)?
            .find(filter)
            .await
            .map_err(|e| classify(&self.backend, e))?;

        let mut records = Vec::new();
        while cursor.advance().await.map_err(|e| classify(&self.backend, e))? {
            let document = cursor
                .deserialize_current()
                .map_err(|e| classify(&self.backend, e))?;
            records.push(document_to_record(document));
        }
        Ok(records)
    }

    /// Insert `records` in order, returning how many were written
    pub async fn insert_many(&mut self, logical: &str, records: &[Record]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let documents = records
            .iter()
            .map(record_to_document)
            .collect::<Result<Vec<_>>>()?;
        let inserted = self
            .collection(logical)?
            .insert_many(documents)
            .await
            .map_err(|e| classify(&self.backend, e))?;
        Ok(inserted.inserted_ids.len() as u64)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl Connection for MongoConnection {
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.client.shutdown().await;
        Ok(())
    }
}

/// Relaxed extended JSON: ObjectIds become `{"$oid": ...}`, dates `{"$date": ...}`
pub fn document_to_record(document: Document) -> Record {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(record) => record,
        _ => Record::new(),
    }
}

pub fn record_to_document(record: &Record) -> Result<Document> {
    mongodb::bson::to_document(record)
        .map_err(|e| ServiceError::business(format!("record cannot be stored as a document: {}", e)))
}

/// Map a driver error into the service taxonomy
pub fn classify(backend: &str, err: mongodb::error::Error) -> ServiceError {
    let unreachable = matches!(err.kind.as_ref(), ErrorKind::ServerSelection { .. });
    let transient = matches!(
        err.kind.as_ref(),
        ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. }
    ) || err.contains_label(RETRYABLE_WRITE_ERROR)
        || err.contains_label(TRANSIENT_TRANSACTION_ERROR);

    if unreachable {
        ServiceError::connectivity(backend, err)
    } else if transient {
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
