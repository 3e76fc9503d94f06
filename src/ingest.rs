//! CSV ingestion
//!
//! Loads local CSV files into DataFrames with standardized column names, so
//! that files exported from different portals line up on `state`, `crop`,
//! `year` and the metric columns. A `datasets.json` manifest in the data
//! directory names every file together with its citation metadata.

use crate::catalog::{Dataset, DatasetMetadata};
use crate::error::{Result, SamarthError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "datasets.json";

/// Source header (after standardization) → canonical column
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("state_name", "state"),
    ("state_ut", "state"),
    ("state_ut_name", "state"),
    ("district_name", "district"),
    ("crop_name", "crop"),
    ("commodity", "crop"),
    ("crop_year", "year"),
    ("financial_year", "year"),
    ("production_in_tonnes", "production"),
    ("production_tonnes", "production"),
    ("area_in_hectares", "area"),
    ("area_hectares", "area"),
    ("area_hectare", "area"),
    ("yield_kg_ha", "yield"),
    ("yield_in_kg_ha", "yield"),
    ("yield_kg_per_hectare", "yield"),
    ("yield_kg_per_ha", "yield"),
    ("annual_rainfall", "rainfall"),
    ("annual", "rainfall"),
    ("rainfall_mm", "rainfall"),
    ("annual_rainfall_mm", "rainfall"),
    ("modal_price", "price"),
    ("modal_price_rs_quintal", "price"),
];

/// Text columns whose values are title-cased so filters and groups line up
const TITLE_CASED: &[&str] = &["state", "crop", "district"];

/// Rows missing any of these are unusable for grouping or filtering
const REQUIRED_KEYS: &[&str] = &["state", "crop", "year"];

/// Cell values read as missing
const NULL_MARKERS: &[&str] = &["", "na", "n/a", "nan", "null", "none", "-"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: String,
    /// CSV path relative to the manifest
    pub file: String,
    pub metadata: DatasetMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub datasets: Vec<ManifestEntry>,
}

/// `"State Name "` → `state_name`, then mapped through the alias table.
pub fn standardize_column(header: &str) -> String {
    let mut cleaned = String::with_capacity(header.len());
    for c in header.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            cleaned.push(c);
        } else if matches!(c, ' ' | '_' | '-' | '/' | '.' | '(' | ')') {
            cleaned.push('_');
        }
    }
    let collapsed = cleaned
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == collapsed)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(collapsed)
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            if lower == "and" || lower == "of" {
                return lower;
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_null(cell: &str) -> bool {
    NULL_MARKERS.contains(&cell.trim().to_lowercase().as_str())
}

/// Whether a row survives cleaning:
/// - every key column present in the file has a value;
/// - production, when it parses, is positive;
/// - rainfall, when it parses, is not negative.
///
/// Unparseable or missing metric cells are kept and later counted as dropped
/// values by the executor.
fn keep_row(headers: &[String], row: &[&str]) -> bool {
    headers.iter().zip(row).all(|(header, cell)| {
        let number = || {
            (!is_null(cell))
                .then(|| cell.trim().parse::<f64>().ok())
                .flatten()
        };
        match header.as_str() {
            key if REQUIRED_KEYS.contains(&key) => !is_null(cell),
            "production" => number().map_or(true, |v| v > 0.0),
            "rainfall" => number().map_or(true, |v| v >= 0.0),
            _ => true,
        }
    })
}

/// Build a column, typed Int64 or Float64 when every present cell parses,
/// String otherwise.
fn infer_series(name: &str, cells: &[String]) -> Series {
    let present: Vec<Option<&str>> = cells
        .iter()
        .map(|c| (!is_null(c)).then(|| c.trim()))
        .collect();

    let ints: Option<Vec<Option<i64>>> = present
        .iter()
        .map(|cell| match cell {
            Some(text) => text.parse::<i64>().ok().map(Some),
            None => Some(None),
        })
        .collect();
    if let Some(values) = ints {
        if values.iter().any(|v| v.is_some()) {
            return Series::new(name, values);
        }
    }

    let floats: Option<Vec<Option<f64>>> = present
        .iter()
        .map(|cell| match cell {
            Some(text) => text.parse::<f64>().ok().map(Some),
            None => Some(None),
        })
        .collect();
    if let Some(values) = floats {
        if values.iter().any(|v| v.is_some()) {
            return Series::new(name, values);
        }
    }

    let title = TITLE_CASED.contains(&name);
    let texts: Vec<Option<String>> = present
        .iter()
        .map(|cell| cell.map(|t| if title { title_case(t) } else { t.to_string() }))
        .collect();
    Series::new(name, texts)
}

/// Parse CSV text from any reader into a standardized DataFrame.
pub fn read_frame<R: Read>(reader: R) -> Result<DataFrame> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(standardize_column).collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(SamarthError::Ingestion("CSV has no header row".to_string()));
    }
    for (i, header) in headers.iter().enumerate() {
        if headers[..i].contains(header) {
            return Err(SamarthError::Ingestion(format!(
                "Duplicate column '{}' after standardization",
                header
            )));
        }
    }

    let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    let mut removed = 0;
    for record in rdr.records() {
        let record = record?;
        let row: Vec<&str> = (0..headers.len())
            .map(|i| record.get(i).unwrap_or(""))
            .collect();
        if !keep_row(&headers, &row) {
            removed += 1;
            continue;
        }
        for (column, cell) in columns.iter_mut().zip(&row) {
            column.push(cell.to_string());
        }
    }
    if removed > 0 {
        debug!("🧹 Removed {} rows failing cleaning rules", removed);
    }

    let series: Vec<Series> = headers
        .iter()
        .zip(columns.iter())
        .map(|(name, cells)| infer_series(name, cells))
        .collect();
    Ok(DataFrame::new(series)?)
}

pub fn load_csv(path: &Path, key: &str, metadata: DatasetMetadata) -> Result<Dataset> {
    let file = std::fs::File::open(path).map_err(|e| {
        SamarthError::Ingestion(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let table = read_frame(file)?;
    info!(
        "📥 Loaded {} ({} rows, columns {:?})",
        key,
        table.height(),
        table.get_column_names()
    );
    Ok(Dataset::new(key, table, metadata))
}

pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        SamarthError::Ingestion(format!("Failed to read manifest {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        SamarthError::Ingestion(format!("Invalid manifest {}: {}", path.display(), e))
    })
}

/// Load every dataset the manifest in `dir` names. A file that fails to load
/// is skipped with a warning so one bad export does not take the rest down.
pub fn load_manifest(dir: &Path) -> Result<Vec<Dataset>> {
    let manifest = read_manifest(dir)?;
    let mut datasets = Vec::with_capacity(manifest.datasets.len());
    for entry in manifest.datasets {
        match load_csv(&dir.join(&entry.file), &entry.key, entry.metadata) {
            Ok(dataset) => datasets.push(dataset),
            Err(e) => warn!("⚠️  Skipping dataset {}: {}", entry.key, e),
        }
    }
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize_column() {
        assert_eq!(standardize_column(" State_Name "), "state");
        assert_eq!(standardize_column("Crop Year"), "year");
        assert_eq!(standardize_column("Production (in Tonnes)"), "production");
        assert_eq!(standardize_column("Modal Price (Rs./Quintal)"), "price");
        assert_eq!(standardize_column("Season"), "season");
    }

    #[test]
    fn test_read_frame_types_and_title_case() {
        let csv = "State_Name,Crop,Crop_Year,Production\n\
                   punjab,RICE,2020,12000.5\n\
                   HARYANA,rice,2020,NA\n\
                   tamil nadu,Rice,2021,300\n";
        let df = read_frame(csv.as_bytes()).unwrap();
        assert_eq!(df.get_column_names(), vec!["state", "crop", "year", "production"]);
        assert_eq!(df.column("year").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("production").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("production").unwrap().null_count(), 1);

        let states: Vec<Option<&str>> = df.column("state").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(
            states,
            vec![Some("Punjab"), Some("Haryana"), Some("Tamil Nadu")]
        );
    }

    #[test]
    fn test_yield_per_hectare_header() {
        assert_eq!(standardize_column("Yield (kg per hectare)"), "yield");
    }

    #[test]
    fn test_cleaning_removes_unusable_rows() {
        let csv = "State,Crop,Year,Production\n\
                   Punjab,Rice,2020,100\n\
                   ,Rice,2020,50\n\
                   Punjab,NA,2020,50\n\
                   Punjab,Rice,,50\n\
                   Punjab,Wheat,2020,0\n\
                   Punjab,Maize,2020,-5\n\
                   Punjab,Cotton,2020,NA\n";
        let df = read_frame(csv.as_bytes()).unwrap();
        let crops: Vec<Option<&str>> = df.column("crop").unwrap().str().unwrap().into_iter().collect();
        // the missing production survives for the executor to count
        assert_eq!(crops, vec![Some("Rice"), Some("Cotton")]);
    }

    #[test]
    fn test_negative_rainfall_removed() {
        let csv = "State,Year,Annual Rainfall\n\
                   Kerala,2019,3000\n\
                   Kerala,2020,-99.9\n\
                   Kerala,2021,0\n";
        let df = read_frame(csv.as_bytes()).unwrap();
        let years: Vec<Option<i64>> = df.column("year").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(years, vec![Some(2019), Some(2021)]);
    }

    #[test]
    fn test_mixed_column_stays_text() {
        let csv = "state,price\nKerala,2100\nKerala,unknown\n";
        let df = read_frame(csv.as_bytes()).unwrap();
        assert_eq!(df.column("price").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let csv = "State,State_Name\nPunjab,Punjab\n";
        let err = read_frame(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, SamarthError::Ingestion(_)));
    }

    #[test]
    fn test_manifest_loading_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rain.csv"),
            "State,Year,Annual Rainfall\nKerala,2020,3000\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"datasets": [
                {"key": "rainfall", "file": "rain.csv", "metadata": {"id": "r1", "name": "Rainfall"}},
                {"key": "missing", "file": "nope.csv", "metadata": {"id": "m1", "name": "Missing"}}
            ]}"#,
        )
        .unwrap();

        let datasets = load_manifest(dir.path()).unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].key, "rainfall");
        assert!(datasets[0].has_column("rainfall"));
    }

    #[test]
    fn test_missing_manifest_is_ingestion_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_manifest(dir.path()),
            Err(SamarthError::Ingestion(_))
        ));
    }
}
