//! Datasets exchanged between the built-in inputs, models and outputs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row: column name to JSON value
pub type Record = Map<String, Value>;

/// Named datasets, in the order they were added
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    datasets: Vec<Dataset>,
}

/// A named list of rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub rows: Vec<Record>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a dataset
    pub fn insert(&mut self, name: &str, rows: Vec<Record>) {
        match self.datasets.iter_mut().find(|d| d.name == name) {
            Some(dataset) => dataset.rows = rows,
            None => self.datasets.push(Dataset {
                name: name.to_string(),
                rows,
            }),
        }
    }

    pub fn with(mut self, name: &str, rows: Vec<Record>) -> Self {
        self.insert(name, rows);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[Record]> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.rows.as_slice())
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|d| d.name.as_str())
    }

    /// Total number of rows across all datasets
    pub fn row_count(&self) -> usize {
        self.datasets.iter().map(|d| d.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}
