//! Core domain models for the service runtime
//!
//! Configuration assembly, the error taxonomy, the datasets passed between
//! collaborators, and the capability traits those collaborators implement.

pub mod args;
pub mod batch;
pub mod collections;
pub mod component;
pub mod config;
pub mod error;

pub use args::{ArgSpec, Arity, ValueKind};
pub use batch::{Batch, Dataset, Record};
pub use collections::CollectionMap;
pub use component::{Configurable, Input, Model, Output, Pingable};
pub use config::{Configuration, RetrySettings, ServiceSettings};
pub use error::{Result, ServiceError};
