//! Resilient access to external backends
//!
//! Retry with linear backoff, scoped transactional sessions, and the SQL
//! (sqlx) and document-store (mongodb) implementations the built-in
//! components use.

pub mod dsn;
pub mod mongo;
pub mod retry;
pub mod session;
pub mod sql;

pub use dsn::{Driver, Dsn};
pub use mongo::{MongoBackend, MongoConnection};
pub use retry::{ReconnectCounter, RetryPolicy, Retryable};
pub use session::{BoxFuture, Connection, ConnectionFactory, ResourceSession};
pub use sql::{SqlBackend, SqlConnection};
