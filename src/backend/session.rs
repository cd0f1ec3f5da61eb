//! Scoped connection sessions with guaranteed commit/rollback and close
//!
//! A session acquires one connection, hands it to a unit of work, and on every
//! exit path finishes the transaction and closes the connection. The work only
//! ever sees a borrow, so the connection cannot outlive the session.
//!
//! ```ignore
//! let rows = backend
//!     .session()
//!     .rollback(|conn| Box::pin(async move { conn.fetch_records("SELECT 1").await }))
//!     .await?;
//! ```

use crate::core::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Boxed future borrowed for the life of the connection it was given
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One open connection with an active transaction
#[async_trait]
pub trait Connection: Send + Sized {
    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn close(self) -> Result<()>;
}

/// Opens connections for sessions
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    /// Name used in log lines
    fn backend(&self) -> &str;

    /// Open a connection and begin a transaction
    async fn connect(&self) -> Result<Self::Connection>;
}

/// Scoped acquisition over a [`ConnectionFactory`]
pub struct ResourceSession<'a, F: ?Sized> {
    factory: &'a F,
}

impl<'a, F> ResourceSession<'a, F>
where
    F: ConnectionFactory + ?Sized,
{
    pub fn new(factory: &'a F) -> Self {
        Self { factory }
    }

    /// Run `work` and commit if it succeeds
    ///
    /// If the work fails, or the commit itself fails, the transaction is
    /// rolled back and that error is returned. A connect failure returns
    /// before anything else runs. The connection is always closed; a close
    /// failure is logged and never replaces the result.
    pub async fn commit<W, T>(&self, work: W) -> Result<T>
    where
        W: for<'c> FnOnce(&'c mut F::Connection) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let backend = self.factory.backend();
        let mut conn = self.factory.connect().await?;
        debug!("Opened {} session (commit)", backend);

        let outcome = match work(&mut conn).await {
            Ok(value) => match conn.commit().await {
                Ok(()) => Ok(value),
                Err(err) => {
                    warn!("Commit on {} failed, rolling back: {}", backend, err);
                    rollback_after_error(backend, &mut conn).await;
                    Err(err)
                }
            },
            Err(err) => {
                debug!("Work on {} failed, rolling back: {}", backend, err);
                rollback_after_error(backend, &mut conn).await;
                Err(err)
            }
        };

        release(backend, conn).await;
        outcome
    }

    /// Run `work` and always roll back
    ///
    /// For reads: nothing the work does is kept. If the work succeeds but the
    /// rollback fails, the rollback error is returned.
    pub async fn rollback<W, T>(&self, work: W) -> Result<T>
    where
        W: for<'c> FnOnce(&'c mut F::Connection) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let backend = self.factory.backend();
        let mut conn = self.factory.connect().await?;
        debug!("Opened {} session (rollback)", backend);

        let outcome = work(&mut conn).await;
        let rolled_back = conn.rollback().await;
        release(backend, conn).await;

        match (outcome, rolled_back) {
            (Ok(value), Ok(())) => {
                debug!("Rolled back {} session", backend);
                Ok(value)
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(rollback_err)) => {
                warn!("Rollback on {} failed after error: {}", backend, rollback_err);
                Err(err)
            }
        }
    }
}

async fn rollback_after_error<C: Connection>(backend: &str, conn: &mut C) {
    if let Err(err) = conn.rollback().await {
        warn!("Rollback on {} failed: {}", backend, err);
    }
}

async fn release<C: Connection>(backend: &str, conn: C) {
    match conn.close().await {
        Ok(()) => debug!("Closed {} session", backend),
        Err(err) => warn!("Closing {} connection failed: {}", backend, err),
    }
}
