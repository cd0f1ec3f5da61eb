//! microservice - a resilient runtime for scheduled data-pipeline services
//!
//! A service is an [`Input`], a [`Model`] and an [`Output`] composed into a
//! [`ServiceEngine`]. The engine health-checks them, then runs
//! fetch-transform-predict-emit once or on a schedule, retrying transient
//! backend failures and recording each run.

pub mod backend;
pub mod cli;
pub mod components;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use self::backend::{ResourceSession, RetryPolicy, Retryable, SqlBackend};
pub use self::core::{Batch, Configuration, Input, Model, Output, Pingable, Result, ServiceError};
pub use self::execution::{PipelineRunner, PipelineUnit, ServiceEngine, ServiceEvent, Trigger};
