//! Capability traits implemented by inputs, outputs and models
//!
//! A service is composed from three collaborators rather than derived from a
//! base class. Each one can be built from configuration ([`Configurable`]) and
//! checked for readiness ([`Pingable`]); the runner only sees these traits.

use crate::core::args::ArgSpec;
use crate::core::config::Configuration;
use crate::core::error::Result;
use async_trait::async_trait;

/// Construction from the resolved configuration
pub trait Configurable: Sized {
    /// Keys this component binds to environment variables and CLI flags
    ///
    /// `key` is the section the component is configured under (`input`,
    /// `output`, `model`).
    fn args(_key: &str) -> Vec<ArgSpec> {
        Vec::new()
    }

    /// Build the component from the section at `key`
    ///
    /// Fails with a configuration error naming the offending key; a component
    /// that cannot run must fail here, not on first use.
    fn from_config(config: &Configuration, key: &str) -> Result<Self>;
}

/// Startup readiness check
#[async_trait]
pub trait Pingable: Send + Sync {
    /// Perform at least one real round-trip to the backing resource
    async fn ping(&self) -> Result<()>;
}

/// Source of the data for one unit of work
#[async_trait]
pub trait Input: Pingable {
    type Batch: Send + Sync;

    async fn fetch(&self) -> Result<Self::Batch>;
}

/// The business logic applied to each batch
pub trait Model: Pingable {
    type Batch: Send + Sync;
    type Transformed: Send;
    type Predictions: Send + Sync;

    fn transform(&self, batch: &Self::Batch) -> Result<Self::Transformed>;

    fn predict(&self, transformed: &Self::Transformed) -> Result<Self::Predictions>;

    /// Release per-run resources; called after every unit of work
    fn reclaim(&self) {}
}

/// Sink for the results of one unit of work
#[async_trait]
pub trait Output: Pingable {
    type Batch: Send + Sync;
    type Predictions: Send + Sync;

    async fn emit(&self, batch: &Self::Batch, predictions: &Self::Predictions) -> Result<()>;
}
