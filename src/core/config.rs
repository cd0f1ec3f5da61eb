//! Service configuration assembled from YAML, environment and CLI flags

use crate::core::args::{ArgSpec, ValueKind};
use crate::core::error::{Result, ServiceError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file when `--config` is absent
pub const CONFIGURATION_ENV: &str = "CONFIGURATION";

/// Prefix of the environment variables bound to process-level settings
pub const ENV_PREFIX: &str = "MICROSERVICE_";

/// Resolved configuration document
///
/// Built once by [`resolve`] and read-only afterwards. Keys are addressed with
/// dotted paths (`input.dsn`, `retry.backoff`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    root: Mapping,
}

impl Configuration {
    /// Look up a dotted key
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.root, key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    /// Deserialize the sub-tree at `key`
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get(key).ok_or_else(|| ServiceError::missing(key))?;
        serde_yaml::from_value(value.clone()).map_err(|e| ServiceError::config(key, e.to_string()))
    }

    /// Deserialize the sub-tree at `key`, or `None` when the key is absent
    pub fn optional_section<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if self.contains(key) {
            self.section(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// The process-level settings shared by every service
    pub fn settings(&self) -> Result<ServiceSettings> {
        let settings: ServiceSettings = serde_yaml::from_value(Value::Mapping(self.root.clone()))
            .map_err(|e| ServiceError::config("<root>", e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.root
    }

    /// Copy of the document safe to print: `password` values, the password
    /// slot of every `dsn` list and credentials inside a `uri` are masked
    pub fn redacted(&self) -> Mapping {
        let mut root = self.root.clone();
        redact(&mut root);
        root
    }
}

fn redact(mapping: &mut Mapping) {
    for (key, value) in mapping.iter_mut() {
        match (key.as_str(), value) {
            (Some("password"), value) if !value.is_null() => *value = Value::from("***"),
            (Some("dsn"), Value::Sequence(items)) if items.len() == 4 => items[2] = Value::from("***"),
            (Some("uri"), Value::String(uri)) => *uri = mask_uri_password(uri),
            (_, Value::Mapping(inner)) => redact(inner),
            _ => {}
        }
    }
}

fn mask_uri_password(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority = &rest[..rest.find('/').unwrap_or(rest.len())];
    match authority.rfind('@').and_then(|at| rest[..at].split_once(':').map(|(user, _)| (user, at))) {
        Some((user, at)) => format!("{}://{}:***{}", scheme, user, &rest[at..]),
        None => uri.to_string(),
    }
}

/// Top-level settings read by the engine and the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name used in logs and run history
    #[serde(default = "default_name")]
    pub name: String,

    /// Minimum scheduler sleep, in seconds
    #[serde(default = "default_resolution")]
    pub resolution: f64,

    /// Daily wall-clock dispatch time (`HH:MM` or `HH:MM:SS`)
    #[serde(default)]
    pub scheduled_time: Option<String>,

    /// Fixed dispatch interval, in seconds
    #[serde(default)]
    pub interval: Option<f64>,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Retry budget for transient backend failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base backoff in seconds; retry `i` waits `backoff * i`
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            backoff: default_backoff(),
        }
    }
}

fn default_name() -> String {
    "microservice".to_string()
}

fn default_resolution() -> f64 {
    5.0
}

fn default_retries() -> u32 {
    5
}

fn default_backoff() -> f64 {
    0.15
}

impl ServiceSettings {
    pub fn validate(&self) -> Result<()> {
        if self.resolution_duration()?.is_zero() {
            return Err(ServiceError::config("resolution", "must be a positive number of seconds"));
        }
        self.retry.backoff_duration()?;
        if let Some(interval) = self.interval_duration()? {
            if interval.is_zero() {
                return Err(ServiceError::config("interval", "must be a positive number of seconds"));
            }
        }
        if self.scheduled_time.is_some() && self.interval.is_some() {
            return Err(ServiceError::config(
                "scheduled_time",
                "cannot be combined with 'interval'; configure one trigger",
            ));
        }
        Ok(())
    }

    pub fn resolution_duration(&self) -> Result<Duration> {
        seconds("resolution", self.resolution)
    }

    pub fn interval_duration(&self) -> Result<Option<Duration>> {
        self.interval.map(|value| seconds("interval", value)).transpose()
    }
}

impl RetrySettings {
    pub fn backoff_duration(&self) -> Result<Duration> {
        seconds("retry.backoff", self.backoff)
    }
}

/// Negative, non-finite and out-of-range values are configuration errors
fn seconds(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| ServiceError::config(key, format!("{} is not a usable number of seconds: {}", value, e)))
}

fn env_name(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name)
}

/// Keys every service recognizes
pub fn builtin_schema() -> Vec<ArgSpec> {
    vec![
        ArgSpec::new("name", &env_name("NAME"), "name").help("Service name used in logs and run history"),
        ArgSpec::new("resolution", &env_name("RESOLUTION"), "resolution")
            .kind(ValueKind::Float)
            .default_value(default_resolution())
            .help("Minimum scheduler sleep in seconds"),
        ArgSpec::new("scheduled_time", &env_name("SCHEDULED_TIME"), "scheduled-time")
            .help("Daily dispatch time, HH:MM"),
        ArgSpec::new("interval", &env_name("INTERVAL"), "interval")
            .kind(ValueKind::Float)
            .help("Dispatch every N seconds"),
        ArgSpec::new("retry.retries", &env_name("RETRIES"), "retries")
            .kind(ValueKind::Integer)
            .default_value(default_retries())
            .help("Retries for transient backend failures"),
        ArgSpec::new("retry.backoff", &env_name("BACKOFF"), "backoff")
            .kind(ValueKind::Float)
            .default_value(default_backoff())
            .help("Base linear backoff in seconds"),
        ArgSpec::new("input.kind", "INPUT_KIND", "input-kind")
            .required()
            .help("Input implementation"),
        ArgSpec::new("output.kind", "OUTPUT_KIND", "output-kind")
            .required()
            .help("Output implementation"),
        ArgSpec::new("model.kind", "MODEL_KIND", "model-kind")
            .default_value("unconfigured")
            .help("Model implementation"),
    ]
}

/// Merge `extra` into `schema`, keeping the first spec seen for each key
pub fn merge_schema(mut schema: Vec<ArgSpec>, extra: Vec<ArgSpec>) -> Vec<ArgSpec> {
    for spec in extra {
        if !schema.iter().any(|s| s.key == spec.key) {
            schema.push(spec);
        }
    }
    schema
}

/// Assemble the final configuration
///
/// Per key: explicit CLI value, then environment variable, then the file,
/// then the declared default. `cli` holds only values the user actually
/// supplied, keyed by [`ArgSpec::key`].
pub fn resolve(
    file: Mapping,
    env: &HashMap<String, String>,
    cli: &HashMap<String, Vec<String>>,
    schema: &[ArgSpec],
) -> Result<Configuration> {
    let mut root = file;

    for spec in schema {
        let value = if let Some(raw) = cli.get(&spec.key) {
            spec.coerce_cli(raw)?
        } else if let Some(raw) = env.get(&spec.env) {
            spec.coerce_env(raw)?
        } else if let Some(value) = lookup(&root, &spec.key).filter(|v| !v.is_null()) {
            spec.coerce_file(value)?
        } else if let Some(default) = &spec.default {
            default.clone()
        } else if spec.required {
            return Err(ServiceError::missing(&spec.key));
        } else {
            continue;
        };

        assign(&mut root, &spec.key, value)?;
    }

    Ok(Configuration { root })
}

/// The process environment, minus variables whose name or value is not UTF-8
pub fn environment() -> HashMap<String, String> {
    utf8_pairs(std::env::vars_os())
}

fn utf8_pairs(vars: impl IntoIterator<Item = (OsString, OsString)>) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Load the configuration document from a YAML file
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Mapping> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        ServiceError::config("configuration", format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_document(&content)
}

/// Parse a configuration document from a YAML string
pub fn parse_document(yaml: &str) -> Result<Mapping> {
    let value: Value =
        serde_yaml::from_str(yaml).map_err(|e| ServiceError::config("configuration", e.to_string()))?;
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(ServiceError::config(
            "configuration",
            "top-level document must be a mapping",
        )),
    }
}

fn lookup<'a>(root: &'a Mapping, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = root.get(parts.next()?)?;
    for part in parts {
        current = current.as_mapping()?.get(part)?;
    }
    Some(current)
}

fn assign(root: &mut Mapping, key: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| ServiceError::config(key, "empty key"))?;

    let mut current = root;
    for part in parents {
        let entry = current
            .entry(Value::String(part.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if entry.is_null() {
            *entry = Value::Mapping(Mapping::new());
        }
        current = entry
            .as_mapping_mut()
            .ok_or_else(|| ServiceError::config(key, format!("'{}' is not a mapping", part)))?;
    }
    current.insert(Value::String(last.to_string()), value);
    Ok(())
}
