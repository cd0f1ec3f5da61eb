//! Argument schema: how one configuration key binds to the environment and the CLI

use crate::core::error::{Result, ServiceError};
use serde_yaml::{Number, Value};

/// Type coercion applied to raw values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Float,
    Bool,
}

/// Number of values a key takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Scalar,
    /// Fixed-size list
    List(usize),
}

/// One recognized configuration key
#[derive(Debug, Clone)]
pub struct ArgSpec {
    /// Dotted path into the configuration document (e.g. `input.dsn`)
    pub key: String,

    /// Environment variable name
    pub env: String,

    /// Long CLI flag, without the leading dashes
    pub flag: String,

    /// Value used when no layer supplies the key
    pub default: Option<Value>,

    pub arity: Arity,

    pub kind: ValueKind,

    /// Fail resolution when no layer supplies the key and there is no default
    pub required: bool,

    pub help: String,
}

impl ArgSpec {
    pub fn new(key: &str, env: &str, flag: &str) -> Self {
        Self {
            key: key.to_string(),
            env: env.to_string(),
            flag: flag.trim_start_matches('-').to_string(),
            default: None,
            arity: Arity::Scalar,
            kind: ValueKind::String,
            required: false,
            help: String::new(),
        }
    }

    /// Spec for `name` under a component section
    ///
    /// `scoped("input", "dsn")` binds `input.dsn` to `INPUT_DSN` and
    /// `--input-dsn`.
    pub fn scoped(section: &str, name: &str) -> Self {
        Self::new(
            &format!("{}.{}", section, name),
            &format!("{}_{}", section, name).to_ascii_uppercase(),
            &format!("{}-{}", section, name).replace('_', "-"),
        )
    }

    pub fn kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn list(mut self, len: usize) -> Self {
        self.arity = Arity::List(len);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    /// Coerce values given on the command line
    pub fn coerce_cli(&self, raw: &[String]) -> Result<Value> {
        match self.arity {
            Arity::Scalar => match raw {
                [single] => coerce_str(&self.key, self.kind, single),
                _ => Err(ServiceError::config(
                    &self.key,
                    format!("expected a single value, got {}", raw.len()),
                )),
            },
            Arity::List(len) => self.coerce_list(raw.iter().map(String::as_str), len),
        }
    }

    /// Coerce an environment variable; list keys are split on whitespace
    pub fn coerce_env(&self, raw: &str) -> Result<Value> {
        match self.arity {
            Arity::Scalar => coerce_str(&self.key, self.kind, raw),
            Arity::List(len) => self.coerce_list(raw.split_whitespace(), len),
        }
    }

    /// Check (and normalize) a value that came from the configuration file
    pub fn coerce_file(&self, value: &Value) -> Result<Value> {
        match (self.arity, value) {
            (Arity::Scalar, _) => coerce_value(&self.key, self.kind, value),
            (Arity::List(len), Value::Sequence(items)) => {
                if items.len() != len {
                    return Err(ServiceError::config(
                        &self.key,
                        format!("expected {} values, got {}", len, items.len()),
                    ));
                }
                items
                    .iter()
                    .map(|item| coerce_value(&self.key, self.kind, item))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Sequence)
            }
            (Arity::List(len), Value::String(s)) => self.coerce_list(s.split_whitespace(), len),
            (Arity::List(len), _) => Err(ServiceError::config(
                &self.key,
                format!("expected a list of {} values", len),
            )),
        }
    }

    fn coerce_list<'a>(&self, parts: impl Iterator<Item = &'a str>, len: usize) -> Result<Value> {
        let values = parts
            .map(|part| coerce_str(&self.key, self.kind, part))
            .collect::<Result<Vec<_>>>()?;
        if values.len() != len {
            return Err(ServiceError::config(
                &self.key,
                format!("expected {} values, got {}", len, values.len()),
            ));
        }
        Ok(Value::Sequence(values))
    }
}

fn coerce_str(key: &str, kind: ValueKind, raw: &str) -> Result<Value> {
    let invalid = |what: &str| ServiceError::config(key, format!("'{}' is not a valid {}", raw, what));
    match kind {
        ValueKind::String => Ok(Value::String(raw.to_string())),
        ValueKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(Number::from(n)))
            .map_err(|_| invalid("integer")),
        ValueKind::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| Value::Number(Number::from(f)))
            .ok_or_else(|| invalid("number")),
        ValueKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid("boolean")),
        },
    }
}

fn coerce_value(key: &str, kind: ValueKind, value: &Value) -> Result<Value> {
    match (kind, value) {
        (_, Value::String(s)) => coerce_str(key, kind, s),
        (ValueKind::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (ValueKind::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
        (ValueKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        (ValueKind::Float, Value::Number(n)) => n
            .as_f64()
            .map(|f| Value::Number(Number::from(f)))
            .ok_or_else(|| ServiceError::config(key, "expected a number")),
        (ValueKind::Bool, Value::Bool(_)) => Ok(value.clone()),
        _ => Err(ServiceError::config(
            key,
            format!("expected {}, got {}", kind_name(kind), describe(value)),
        )),
    }
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::String => "a string",
        ValueKind::Integer => "an integer",
        ValueKind::Float => "a number",
        ValueKind::Bool => "a boolean",
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
