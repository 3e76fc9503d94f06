//! Dataset catalog
//!
//! Holds the current set of datasets as one immutable snapshot. A refresh
//! builds a new snapshot and swaps the `Arc` under a write lock; queries
//! already running keep the snapshot they started with.

use polars::prelude::*;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::info;

fn default_publisher() -> String {
    "Government of India".to_string()
}

fn default_source() -> String {
    "data.gov.in".to_string()
}

fn default_license() -> String {
    "Open Government Data License - India".to_string()
}

fn default_unknown() -> String {
    "Unknown".to_string()
}

fn default_coverage() -> String {
    "India".to_string()
}

/// Descriptive record supplied with every dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_source")]
    pub source_organization: String,
    #[serde(default = "default_publisher")]
    pub publisher: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default = "default_unknown")]
    pub data_quality: String,
    #[serde(default = "default_unknown")]
    pub update_frequency: String,
    /// `YYYY-MM-DD` or RFC 3339; anything else reads as unknown freshness
    #[serde(default)]
    pub last_updated: String,
    #[serde(default = "default_coverage")]
    pub coverage: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

impl DatasetMetadata {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category: String::new(),
            description: String::new(),
            source_organization: default_source(),
            publisher: default_publisher(),
            url: String::new(),
            license: default_license(),
            data_quality: default_unknown(),
            update_frequency: default_unknown(),
            last_updated: String::new(),
            coverage: default_coverage(),
            variables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub key: String,
    pub table: DataFrame,
    pub metadata: DatasetMetadata,
}

impl Dataset {
    pub fn new(key: &str, table: DataFrame, metadata: DatasetMetadata) -> Self {
        Self {
            key: key.to_string(),
            table,
            metadata,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.table.get_column_names().iter().any(|c| *c == column)
    }

    pub fn columns(&self) -> Vec<String> {
        self.table
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.table.height()
    }
}

/// Immutable view of every dataset at one generation
#[derive(Debug, Default)]
pub struct DatasetSnapshot {
    pub generation: u64,
    pub datasets: BTreeMap<String, Arc<Dataset>>,
}

impl DatasetSnapshot {
    pub fn get(&self, key: &str) -> Option<&Arc<Dataset>> {
        self.datasets.get(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.datasets.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// One line of `describe()`
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub key: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub last_updated: String,
}

impl From<&Dataset> for DatasetSummary {
    fn from(dataset: &Dataset) -> Self {
        Self {
            key: dataset.key.clone(),
            name: dataset.metadata.name.clone(),
            category: dataset.metadata.category.clone(),
            description: dataset.metadata.description.clone(),
            rows: dataset.row_count(),
            columns: dataset.columns(),
            last_updated: dataset.metadata.last_updated.clone(),
        }
    }
}

/// Detail view of one dataset: its summary, full metadata and leading rows
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    #[serde(flatten)]
    pub summary: DatasetSummary,
    pub metadata: DatasetMetadata,
    pub shape: (usize, usize),
    pub sample: Vec<Map<String, Value>>,
}

/// First `rows` rows as JSON objects. Integer columns stay integers, other
/// numeric columns become floats, everything else is rendered as text.
fn sample_rows(table: &DataFrame, rows: usize) -> Result<Vec<Map<String, Value>>> {
    let head = table.head(Some(rows));
    let mut records = vec![Map::new(); head.height()];
    for series in head.get_columns() {
        let name = series.name().to_string();
        let cells: Vec<Value> = match series.dtype() {
            DataType::Int64 | DataType::Int32 => series
                .cast(&DataType::Int64)?
                .i64()?
                .into_iter()
                .map(|v| v.map(Value::from).unwrap_or(Value::Null))
                .collect(),
            dtype if dtype.is_numeric() => series
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| {
                    v.and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                })
                .collect(),
            _ => series
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|v| v.map(Value::from).unwrap_or(Value::Null))
                .collect(),
        };
        for (record, cell) in records.iter_mut().zip(cells) {
            record.insert(name.clone(), cell);
        }
    }
    Ok(records)
}

#[derive(Debug, Default)]
pub struct DatasetCatalog {
    current: RwLock<Arc<DatasetSnapshot>>,
}

impl DatasetCatalog {
    pub fn new(datasets: Vec<Dataset>) -> Self {
        let catalog = Self::default();
        catalog.replace(datasets);
        catalog
    }

    pub fn snapshot(&self) -> Arc<DatasetSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Swap in a new set of datasets, returning the new generation.
    /// A later dataset with a duplicate key replaces the earlier one.
    pub fn replace(&self, datasets: Vec<Dataset>) -> u64 {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let generation = current.generation + 1;
        let datasets: BTreeMap<String, Arc<Dataset>> = datasets
            .into_iter()
            .map(|d| (d.key.clone(), Arc::new(d)))
            .collect();
        info!(
            "📚 Dataset snapshot {} loaded with {} datasets",
            generation,
            datasets.len()
        );
        *current = Arc::new(DatasetSnapshot {
            generation,
            datasets,
        });
        generation
    }

    pub fn describe(&self) -> Vec<DatasetSummary> {
        self.snapshot()
            .datasets
            .values()
            .map(|d| DatasetSummary::from(d.as_ref()))
            .collect()
    }

    /// Summary, metadata and the first `rows` rows of one dataset.
    /// `None` when no dataset has that key.
    pub fn info(&self, key: &str, rows: usize) -> Result<Option<DatasetInfo>> {
        let snapshot = self.snapshot();
        let Some(dataset) = snapshot.get(key) else {
            return Ok(None);
        };
        Ok(Some(DatasetInfo {
            summary: DatasetSummary::from(dataset.as_ref()),
            metadata: dataset.metadata.clone(),
            shape: dataset.table.shape(),
            sample: sample_rows(&dataset.table, rows)?,
        }))
    }

    /// Case-insensitive substring search over key, name, description and category.
    pub fn search(&self, term: &str) -> Vec<DatasetSummary> {
        let needle = term.trim().to_lowercase();
        self.snapshot()
            .datasets
            .values()
            .filter(|d| {
                needle.is_empty()
                    || [
                        d.key.as_str(),
                        d.metadata.name.as_str(),
                        d.metadata.description.as_str(),
                        d.metadata.category.as_str(),
                    ]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .map(|d| DatasetSummary::from(d.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(key: &str, category: &str) -> Dataset {
        let table = df! {
            "state" => &["Punjab", "Haryana"],
            "rainfall" => &[600.0, 550.0],
        }
        .unwrap();
        let mut metadata = DatasetMetadata::new(key, &format!("{} dataset", key));
        metadata.category = category.to_string();
        Dataset::new(key, table, metadata)
    }

    #[test]
    fn test_replace_bumps_generation() {
        let catalog = DatasetCatalog::new(vec![dataset("rainfall", "climate")]);
        assert_eq!(catalog.generation(), 1);

        let held = catalog.snapshot();
        let generation = catalog.replace(vec![]);
        assert_eq!(generation, 2);
        // old readers keep their snapshot
        assert_eq!(held.datasets.len(), 1);
        assert!(catalog.snapshot().is_empty());
    }

    #[test]
    fn test_search_matches_category_case_insensitively() {
        let catalog = DatasetCatalog::new(vec![
            dataset("rainfall", "Climate"),
            dataset("crop_production", "agriculture"),
        ]);
        let found = catalog.search("CLIMATE");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "rainfall");
        assert_eq!(catalog.search("").len(), 2);
        assert!(catalog.search("fertilizer").is_empty());
    }

    #[test]
    fn test_describe_lists_columns() {
        let catalog = DatasetCatalog::new(vec![dataset("rainfall", "climate")]);
        let described = catalog.describe();
        assert_eq!(described[0].columns, vec!["state", "rainfall"]);
        assert_eq!(described[0].rows, 2);
    }

    #[test]
    fn test_info_returns_leading_rows_with_typed_cells() {
        let table = df! {
            "state" => &["Punjab", "Haryana", "Bihar"],
            "year" => &[2019i64, 2020, 2021],
            "rainfall" => &[600.5, 550.0, 1020.25],
        }
        .unwrap();
        let catalog = DatasetCatalog::new(vec![Dataset::new(
            "rainfall",
            table,
            DatasetMetadata::new("rain", "Rainfall"),
        )]);

        let info = catalog.info("rainfall", 2).unwrap().unwrap();
        assert_eq!(info.shape, (3, 3));
        assert_eq!(info.summary.rows, 3);
        assert_eq!(info.metadata.id, "rain");
        assert_eq!(info.sample.len(), 2);
        assert_eq!(info.sample[0]["state"], "Punjab");
        assert_eq!(info.sample[1]["year"], 2020);
        assert_eq!(info.sample[0]["rainfall"], 600.5);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["key"], "rainfall");
        assert_eq!(json["shape"][0], 3);

        assert!(catalog.info("fertilizer", 5).unwrap().is_none());
        assert!(catalog.info("rainfall", 0).unwrap().unwrap().sample.is_empty());
    }

    #[test]
    fn test_metadata_defaults_from_json() {
        let metadata: DatasetMetadata =
            serde_json::from_str(r#"{"id": "x", "name": "X"}"#).unwrap();
        assert_eq!(metadata.publisher, "Government of India");
        assert_eq!(metadata.coverage, "India");
        assert!(metadata.variables.is_empty());
    }
}
