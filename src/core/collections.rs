//! Logical-to-physical names for backend tables and collections

use crate::core::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;

/// Ordered mapping from the names code uses to the names the backend uses
///
/// ```yaml
/// tables:
///   encounters: dbo.encounters_v2
///   predictions: scores
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Mapping", into = "Mapping")]
pub struct CollectionMap {
    entries: Vec<(String, String)>,
}

impl CollectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, logical: &str, physical: &str) -> Self {
        match self.entries.iter_mut().find(|(l, _)| l == logical) {
            Some(entry) => entry.1 = physical.to_string(),
            None => self.entries.push((logical.to_string(), physical.to_string())),
        }
        self
    }

    /// Physical name for a logical name
    pub fn physical(&self, logical: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l == logical)
            .map(|(_, p)| p.as_str())
    }

    /// Physical name, or a configuration error naming `key.logical`
    pub fn require(&self, key: &str, logical: &str) -> Result<&str> {
        self.physical(logical)
            .ok_or_else(|| ServiceError::missing(format!("{}.{}", key, logical)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, p)| (l.as_str(), p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the map against the logical names a component declares
    ///
    /// Every expected name must be present and no other name may appear.
    /// Physical names must be plain identifiers (optionally schema-qualified)
    /// because they are spliced into statements.
    pub fn validate(&self, key: &str, expected: &[&str]) -> Result<()> {
        let expected: BTreeSet<&str> = expected.iter().copied().collect();

        for name in &expected {
            self.require(key, name)?;
        }
        for (logical, physical) in self.iter() {
            if !expected.is_empty() && !expected.contains(logical) {
                return Err(ServiceError::config(
                    format!("{}.{}", key, logical),
                    format!(
                        "unexpected name; expected one of: {}",
                        expected.iter().copied().collect::<Vec<_>>().join(", ")
                    ),
                ));
            }
            if !is_identifier(physical) {
                return Err(ServiceError::config(
                    format!("{}.{}", key, logical),
                    format!("'{}' is not a valid table or collection name", physical),
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl TryFrom<Mapping> for CollectionMap {
    type Error = String;

    fn try_from(mapping: Mapping) -> std::result::Result<Self, Self::Error> {
        let mut map = CollectionMap::new();
        for (logical, physical) in mapping {
            match (logical, physical) {
                (Value::String(logical), Value::String(physical)) => {
                    map = map.with(&logical, &physical);
                }
                _ => return Err("names must be strings".to_string()),
            }
        }
        Ok(map)
    }
}

impl From<CollectionMap> for Mapping {
    fn from(map: CollectionMap) -> Self {
        map.entries
            .into_iter()
            .map(|(k, v)| (Value::String(k), Value::String(v)))
            .collect()
    }
}
