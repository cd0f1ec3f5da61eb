//! Built-in inputs, outputs and models, selected by `kind`
//!
//! | section  | kinds                          |
//! |----------|--------------------------------|
//! | `input`  | `sql`, `mongo`                 |
//! | `output` | `sql`, `mongo`, `file`         |
//! | `model`  | `passthrough`, `unconfigured`  |
//!
//! Services with their own business logic implement the traits in
//! [`crate::core::component`] directly and skip this registry.

pub mod file_output;
pub mod mongo_input;
pub mod mongo_output;
pub mod passthrough;
pub mod sql_input;
pub mod sql_output;

pub use file_output::FileOutput;
pub use mongo_input::MongoInput;
pub use mongo_output::MongoOutput;
pub use passthrough::PassthroughModel;
pub use sql_input::SqlInput;
pub use sql_output::SqlOutput;

use crate::core::config::{merge_schema, Configuration};
use crate::core::error::{Result, ServiceError};
use crate::core::{ArgSpec, Batch, Configurable, Input, Model, Output, Pingable};
use async_trait::async_trait;

fn kind<'a>(config: &'a Configuration, key: &str) -> Result<&'a str> {
    let kind_key = format!("{}.kind", key);
    config
        .get_str(&kind_key)
        .ok_or_else(|| ServiceError::missing(kind_key))
}

fn unknown_kind(key: &str, kind: &str, known: &[&str]) -> ServiceError {
    ServiceError::config(
        format!("{}.kind", key),
        format!("unknown kind '{}'; expected one of: {}", kind, known.join(", ")),
    )
}

/// Input selected by `input.kind`
pub enum BuiltinInput {
    Sql(SqlInput),
    Mongo(MongoInput),
}

impl Configurable for BuiltinInput {
    fn args(key: &str) -> Vec<ArgSpec> {
        merge_schema(SqlInput::args(key), MongoInput::args(key))
    }

    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        match kind(config, key)? {
            "sql" => SqlInput::from_config(config, key).map(BuiltinInput::Sql),
            "mongo" => MongoInput::from_config(config, key).map(BuiltinInput::Mongo),
            other => Err(unknown_kind(key, other, &["sql", "mongo"])),
        }
    }
}

#[async_trait]
impl Pingable for BuiltinInput {
    async fn ping(&self) -> Result<()> {
        match self {
            BuiltinInput::Sql(input) => input.ping().await,
            BuiltinInput::Mongo(input) => input.ping().await,
        }
    }
}

#[async_trait]
impl Input for BuiltinInput {
    type Batch = Batch;

    async fn fetch(&self) -> Result<Batch> {
        match self {
            BuiltinInput::Sql(input) => input.fetch().await,
            BuiltinInput::Mongo(input) => input.fetch().await,
        }
    }
}

/// Output selected by `output.kind`
pub enum BuiltinOutput {
    Sql(SqlOutput),
    Mongo(MongoOutput),
    File(FileOutput),
}

impl Configurable for BuiltinOutput {
    fn args(key: &str) -> Vec<ArgSpec> {
        let schema = merge_schema(SqlOutput::args(key), MongoOutput::args(key));
        merge_schema(schema, FileOutput::args(key))
    }

    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        match kind(config, key)? {
            "sql" => SqlOutput::from_config(config, key).map(BuiltinOutput::Sql),
            "mongo" => MongoOutput::from_config(config, key).map(BuiltinOutput::Mongo),
            "file" => FileOutput::from_config(config, key).map(BuiltinOutput::File),
            other => Err(unknown_kind(key, other, &["sql", "mongo", "file"])),
        }
    }
}

#[async_trait]
impl Pingable for BuiltinOutput {
    async fn ping(&self) -> Result<()> {
        match self {
            BuiltinOutput::Sql(output) => output.ping().await,
            BuiltinOutput::Mongo(output) => output.ping().await,
            BuiltinOutput::File(output) => output.ping().await,
        }
    }
}

#[async_trait]
impl Output for BuiltinOutput {
    type Batch = Batch;
    type Predictions = Batch;

    async fn emit(&self, batch: &Batch, predictions: &Batch) -> Result<()> {
        match self {
            BuiltinOutput::Sql(output) => output.emit(batch, predictions).await,
            BuiltinOutput::Mongo(output) => output.emit(batch, predictions).await,
            BuiltinOutput::File(output) => output.emit(batch, predictions).await,
        }
    }
}

/// Model selected by `model.kind`
///
/// The default kind, `unconfigured`, refuses to build: a service must either
/// supply its own model or opt into `passthrough` explicitly.
pub enum BuiltinModel {
    Passthrough(PassthroughModel),
}

impl Configurable for BuiltinModel {
    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        match kind(config, key)? {
            "passthrough" => PassthroughModel::from_config(config, key).map(BuiltinModel::Passthrough),
            "unconfigured" => Err(ServiceError::config(
                format!("{}.kind", key),
                "no model is configured; implement Model for this service or set kind to 'passthrough'",
            )),
            other => Err(unknown_kind(key, other, &["passthrough"])),
        }
    }
}

#[async_trait]
impl Pingable for BuiltinModel {
    async fn ping(&self) -> Result<()> {
        match self {
            BuiltinModel::Passthrough(model) => model.ping().await,
        }
    }
}

impl Model for BuiltinModel {
    type Batch = Batch;
    type Transformed = Batch;
    type Predictions = Batch;

    fn transform(&self, batch: &Batch) -> Result<Batch> {
        match self {
            BuiltinModel::Passthrough(model) => model.transform(batch),
        }
    }

    fn predict(&self, transformed: &Batch) -> Result<Batch> {
        match self {
            BuiltinModel::Passthrough(model) => model.predict(transformed),
        }
    }

    fn reclaim(&self) {
        match self {
            BuiltinModel::Passthrough(model) => model.reclaim(),
        }
    }
}
