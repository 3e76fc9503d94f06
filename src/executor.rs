//! Data Executor
//!
//! Runs a [`QueryPlan`] against one immutable [`DatasetSnapshot`]. Filters are
//! applied with case-insensitive text matching, then values are aggregated
//! per group. Nulls, non-numeric cells and non-finite numbers never reach an
//! aggregate; they are counted in `dropped_values` instead. Degenerate
//! numeric cases (growth from zero, too few correlation pairs, zero variance)
//! come back as typed outcomes, never as NaN or a fault.

use crate::catalog::{Dataset, DatasetSnapshot};
use crate::entities::{Aggregate, Dimension, SortOrder};
use crate::error::{Result, SamarthError};
use crate::planner::{default_aggregate, Filter, Operation, QueryPlan};
use crate::vocabulary::Metric;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Fewest paired samples a correlation coefficient is computed from
pub const MIN_CORRELATION_PAIRS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Growth {
    Percent(f64),
    /// The first value is zero
    Undefined,
    InsufficientData,
}

impl Growth {
    pub fn label(&self) -> String {
        match self {
            Growth::Percent(p) => format!("{:.1}%", p),
            Growth::Undefined => "undefined".to_string(),
            Growth::InsufficientData => "insufficient data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum CorrelationValue {
    Coefficient(f64),
    /// One of the series has zero variance
    Undefined,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupValue {
    pub key: String,
    pub value: f64,
    /// Number of values aggregated into `value`
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub year: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Grouped {
        metric: Metric,
        dimension: Dimension,
        aggregate: Aggregate,
        groups: Vec<GroupValue>,
    },
    Ranked {
        metric: Metric,
        dimension: Dimension,
        aggregate: Aggregate,
        order: SortOrder,
        /// Top-K entries, sorted
        entries: Vec<GroupValue>,
        /// Groups before truncation
        total_groups: usize,
    },
    Trend {
        metric: Metric,
        aggregate: Aggregate,
        points: Vec<TrendPoint>,
        growth: Growth,
    },
    Correlation {
        x: Metric,
        y: Metric,
        pairs: usize,
        coefficient: CorrelationValue,
    },
    Overview {
        metric: Metric,
        dimension: Dimension,
        aggregate: Aggregate,
        groups: Vec<GroupValue>,
    },
}

impl Outcome {
    /// True when the result carries no usable number
    pub fn is_degenerate(&self) -> bool {
        match self {
            Outcome::Grouped { groups, .. } | Outcome::Overview { groups, .. } => groups.is_empty(),
            Outcome::Ranked { entries, .. } => entries.is_empty(),
            Outcome::Trend { growth, .. } => !matches!(growth, Growth::Percent(_)),
            Outcome::Correlation { coefficient, .. } => {
                !matches!(coefficient, CorrelationValue::Coefficient(_))
            }
        }
    }
}

/// Tabular result shipped to the caller under `data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub key: String,
    pub columns: Vec<String>,
    pub records: Vec<Map<String, Value>>,
}

impl ResultTable {
    pub fn shape(&self) -> (usize, usize) {
        (self.records.len(), self.columns.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub dataset: String,
    pub rows_total: usize,
    /// Rows that passed every filter
    pub rows_matched: usize,
    /// Matched rows that contributed a value
    pub rows_used: usize,
    pub columns_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub tables: Vec<ResultTable>,
    pub outcome: Outcome,
    pub provenance: Vec<Provenance>,
    pub dropped_values: usize,
}

impl ResultSet {
    pub fn records_used(&self) -> usize {
        self.provenance.iter().map(|p| p.rows_used).sum()
    }
}

/// Rows of one dataset left after filtering
struct FilteredFrame {
    dataset: Arc<Dataset>,
    frame: DataFrame,
}

impl FilteredFrame {
    fn text(&self, column: &str) -> Result<Vec<Option<String>>> {
        text_values(&self.frame, column)
    }

    fn numbers(&self, column: &str) -> Result<Vec<Option<f64>>> {
        numeric_values(&self.frame, column)
    }

    fn provenance(&self, rows_used: usize, columns: &[&str]) -> Provenance {
        Provenance {
            dataset: self.dataset.key.clone(),
            rows_total: self.dataset.row_count(),
            rows_matched: self.frame.height(),
            rows_used,
            columns_used: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

fn text_values(frame: &DataFrame, column: &str) -> Result<Vec<Option<String>>> {
    let series = frame.column(column)?.cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from))
        .collect();
    Ok(values)
}

/// Non-numeric text casts to null; infinities and NaN are treated as null too.
fn numeric_values(frame: &DataFrame, column: &str) -> Result<Vec<Option<f64>>> {
    let series = frame.column(column)?.cast(&DataType::Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(values)
}

fn year_key(value: f64) -> Option<i64> {
    (value.fract() == 0.0).then_some(value as i64)
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn finish(&self, aggregate: Aggregate) -> f64 {
        match aggregate {
            Aggregate::Sum => self.sum,
            Aggregate::Mean => self.sum / self.count as f64,
        }
    }
}

/// Values aggregated per group, keyed case-insensitively
struct Grouping {
    groups: Vec<GroupValue>,
    dropped: usize,
    used: usize,
}

#[derive(Debug, Default)]
pub struct DataExecutor;

impl DataExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(&self, plan: &QueryPlan, snapshot: &DatasetSnapshot) -> Result<ResultSet> {
        let result = match &plan.operation {
            Operation::Compare {
                metric,
                dimension,
                aggregate,
            } => {
                let frame = self.load(plan, *metric, snapshot)?;
                let mut grouping = group(&frame, *dimension, *metric, *aggregate)?;
                order_by_request(&mut grouping.groups, *dimension, &plan.filters);
                let table = group_table(
                    format!("{}_grouped", frame.dataset.key),
                    *dimension,
                    *metric,
                    &grouping.groups,
                );
                ResultSet {
                    tables: vec![table],
                    outcome: Outcome::Grouped {
                        metric: *metric,
                        dimension: *dimension,
                        aggregate: *aggregate,
                        groups: grouping.groups,
                    },
                    provenance: vec![frame.provenance(
                        grouping.used,
                        &[dimension.column(), metric.column()],
                    )],
                    dropped_values: grouping.dropped,
                }
            }
            Operation::Rank {
                metric,
                dimension,
                aggregate,
                order,
                top_k,
            } => {
                let frame = self.load(plan, *metric, snapshot)?;
                let grouping = group(&frame, *dimension, *metric, *aggregate)?;
                let total_groups = grouping.groups.len();
                let entries = rank(grouping.groups, *order, *top_k);
                let table = group_table(
                    format!("{}_ranked", frame.dataset.key),
                    *dimension,
                    *metric,
                    &entries,
                );
                ResultSet {
                    tables: vec![table],
                    outcome: Outcome::Ranked {
                        metric: *metric,
                        dimension: *dimension,
                        aggregate: *aggregate,
                        order: *order,
                        entries,
                        total_groups,
                    },
                    provenance: vec![frame.provenance(
                        grouping.used,
                        &[dimension.column(), metric.column()],
                    )],
                    dropped_values: grouping.dropped,
                }
            }
            Operation::Trend { metric, aggregate } => {
                let frame = self.load(plan, *metric, snapshot)?;
                let grouping = group(&frame, Dimension::Year, *metric, *aggregate)?;
                let points: Vec<TrendPoint> = grouping
                    .groups
                    .iter()
                    .filter_map(|g| {
                        g.key.parse::<i64>().ok().map(|year| TrendPoint {
                            year,
                            value: g.value,
                        })
                    })
                    .collect();
                let growth = growth(&points);
                let table = group_table(
                    format!("{}_trend", frame.dataset.key),
                    Dimension::Year,
                    *metric,
                    &grouping.groups,
                );
                ResultSet {
                    tables: vec![table],
                    outcome: Outcome::Trend {
                        metric: *metric,
                        aggregate: *aggregate,
                        points,
                        growth,
                    },
                    provenance: vec![frame.provenance(
                        grouping.used,
                        &[Dimension::Year.column(), metric.column()],
                    )],
                    dropped_values: grouping.dropped,
                }
            }
            Operation::Correlate { x, y } => self.correlate(plan, *x, *y, snapshot)?,
            Operation::Overview {
                metric,
                dimension,
                aggregate,
            } => {
                let frame = self.load(plan, *metric, snapshot)?;
                let grouping = group(&frame, *dimension, *metric, *aggregate)?;
                let table = group_table(
                    format!("{}_grouped", frame.dataset.key),
                    *dimension,
                    *metric,
                    &grouping.groups,
                );
                ResultSet {
                    tables: vec![table],
                    outcome: Outcome::Overview {
                        metric: *metric,
                        dimension: *dimension,
                        aggregate: *aggregate,
                        groups: grouping.groups,
                    },
                    provenance: vec![frame.provenance(
                        grouping.used,
                        &[dimension.column(), metric.column()],
                    )],
                    dropped_values: grouping.dropped,
                }
            }
        };

        info!(
            "📊 Executed {:?} plan: {} rows used, {} values dropped",
            plan.intent,
            result.records_used(),
            result.dropped_values
        );
        Ok(result)
    }

    /// Dataset supplying `metric`, with the plan's filters applied
    fn load(
        &self,
        plan: &QueryPlan,
        metric: Metric,
        snapshot: &DatasetSnapshot,
    ) -> Result<FilteredFrame> {
        let source = plan.source_for(metric).ok_or_else(|| {
            SamarthError::Execution(format!("Plan has no dataset for {}", metric))
        })?;
        let dataset = snapshot.get(&source.dataset).cloned().ok_or_else(|| {
            SamarthError::Execution(format!(
                "Dataset '{}' is not in snapshot {}",
                source.dataset, snapshot.generation
            ))
        })?;
        for column in &source.columns {
            if !dataset.has_column(column) {
                return Err(SamarthError::Execution(format!(
                    "Dataset '{}' has no column '{}'",
                    dataset.key, column
                )));
            }
        }

        let frame = apply_filters(&dataset, &plan.filters)?;
        debug!(
            "Dataset {}: {} of {} rows match filters",
            dataset.key,
            frame.height(),
            dataset.row_count()
        );
        Ok(FilteredFrame { dataset, frame })
    }

    fn correlate(
        &self,
        plan: &QueryPlan,
        x: Metric,
        y: Metric,
        snapshot: &DatasetSnapshot,
    ) -> Result<ResultSet> {
        let x_frame = self.load(plan, x, snapshot)?;
        let y_frame = self.load(plan, y, snapshot)?;
        let x_series = keyed_series(&x_frame, x)?;
        let y_series = keyed_series(&y_frame, y)?;

        let mut records = Vec::new();
        let mut pairs = Vec::new();
        for (key, x_value) in &x_series.values {
            if let Some(y_value) = y_series.values.get(key) {
                pairs.push((*x_value, *y_value));
                let state = x_series.display.get(&key.0).cloned().unwrap_or_default();
                let mut record = Map::new();
                record.insert("state".to_string(), json!(state));
                record.insert("year".to_string(), json!(key.1));
                record.insert(x.column().to_string(), json!(x_value));
                record.insert(y.column().to_string(), json!(y_value));
                records.push(record);
            }
        }

        let coefficient = pearson(&pairs);
        let table = ResultTable {
            key: format!("{}_vs_{}_correlation", x, y),
            columns: vec![
                "state".to_string(),
                "year".to_string(),
                x.column().to_string(),
                y.column().to_string(),
            ],
            records,
        };

        let mut provenance = vec![x_frame.provenance(x_series.used, &["state", "year", x.column()])];
        let y_provenance = y_frame.provenance(y_series.used, &["state", "year", y.column()]);
        if y_provenance.dataset == provenance[0].dataset {
            // one dataset holds both metrics
            let merged = &mut provenance[0];
            merged.rows_used = merged.rows_used.max(y_provenance.rows_used);
            merged.columns_used.push(y.column().to_string());
        } else {
            provenance.push(y_provenance);
        }

        Ok(ResultSet {
            tables: vec![table],
            outcome: Outcome::Correlation {
                x,
                y,
                pairs: pairs.len(),
                coefficient,
            },
            provenance,
            dropped_values: x_series.dropped + y_series.dropped,
        })
    }
}

/// Rows of the dataset passing every filter whose column it holds.
fn apply_filters(dataset: &Dataset, filters: &[Filter]) -> Result<DataFrame> {
    let table = &dataset.table;
    let mut keep = vec![true; table.height()];

    for filter in filters {
        if !dataset.has_column(filter.column()) {
            continue;
        }
        match filter {
            Filter::StateIn(wanted) | Filter::CropIn(wanted) => {
                let wanted: HashSet<String> = wanted.iter().map(|w| w.to_lowercase()).collect();
                for (row, value) in text_values(table, filter.column())?.into_iter().enumerate() {
                    let matched = value
                        .map(|v| wanted.contains(&v.to_lowercase()))
                        .unwrap_or(false);
                    keep[row] &= matched;
                }
            }
            Filter::YearRange(range) => {
                for (row, value) in numeric_values(table, filter.column())?.into_iter().enumerate()
                {
                    let matched = value
                        .and_then(year_key)
                        .map(|year| range.contains(year as i32))
                        .unwrap_or(false);
                    keep[row] &= matched;
                }
            }
            Filter::YearIn(years) => {
                for (row, value) in numeric_values(table, filter.column())?.into_iter().enumerate()
                {
                    let matched = value
                        .and_then(year_key)
                        .map(|year| years.contains(&(year as i32)))
                        .unwrap_or(false);
                    keep[row] &= matched;
                }
            }
        }
    }

    let mask = BooleanChunked::from_slice("mask", &keep);
    Ok(table.filter(&mask)?)
}

fn group_keys(frame: &FilteredFrame, dimension: Dimension) -> Result<Vec<Option<String>>> {
    match dimension {
        Dimension::Year => Ok(frame
            .numbers(dimension.column())?
            .into_iter()
            .map(|v| v.and_then(year_key).map(|y| y.to_string()))
            .collect()),
        Dimension::State | Dimension::Crop => frame.text(dimension.column()),
    }
}

fn group(
    frame: &FilteredFrame,
    dimension: Dimension,
    metric: Metric,
    aggregate: Aggregate,
) -> Result<Grouping> {
    let keys = group_keys(frame, dimension)?;
    let values = frame.numbers(metric.column())?;

    let mut accumulators: BTreeMap<String, Accumulator> = BTreeMap::new();
    let mut display: HashMap<String, String> = HashMap::new();
    let mut dropped = 0;
    let mut used = 0;

    for (key, value) in keys.into_iter().zip(values) {
        match (key, value) {
            (Some(key), Some(value)) => {
                let folded = key.to_lowercase();
                display.entry(folded.clone()).or_insert(key);
                accumulators.entry(folded).or_default().add(value);
                used += 1;
            }
            _ => dropped += 1,
        }
    }

    let mut groups: Vec<GroupValue> = accumulators
        .into_iter()
        .map(|(folded, acc)| GroupValue {
            key: display.remove(&folded).unwrap_or(folded),
            value: acc.finish(aggregate),
            count: acc.count,
        })
        .collect();
    if dimension == Dimension::Year {
        groups.sort_by_key(|g| g.key.parse::<i64>().unwrap_or(i64::MAX));
    }

    Ok(Grouping {
        groups,
        dropped,
        used,
    })
}

/// Requested values keep the order they were asked in; anything else follows.
fn order_by_request(groups: &mut [GroupValue], dimension: Dimension, filters: &[Filter]) {
    let requested: Vec<String> = filters
        .iter()
        .find_map(|f| match (f, dimension) {
            (Filter::StateIn(values), Dimension::State) | (Filter::CropIn(values), Dimension::Crop) => {
                Some(values.iter().map(|v| v.to_lowercase()).collect())
            }
            (Filter::YearIn(years), Dimension::Year) => {
                Some(years.iter().map(|y| y.to_string()).collect())
            }
            _ => None,
        })
        .unwrap_or_default();
    if requested.is_empty() {
        return;
    }
    groups.sort_by_key(|g| {
        requested
            .iter()
            .position(|r| *r == g.key.to_lowercase())
            .unwrap_or(usize::MAX)
    });
}

/// Sort by value in the requested direction, ties by ascending key, keep K.
/// Keys compare case-insensitively first so "haryana" sits next to "Haryana".
pub fn rank(mut groups: Vec<GroupValue>, order: SortOrder, top_k: usize) -> Vec<GroupValue> {
    groups.sort_by(|a, b| {
        let by_value = match order {
            SortOrder::Ascending => a.value.total_cmp(&b.value),
            SortOrder::Descending => b.value.total_cmp(&a.value),
        };
        by_value
            .then_with(|| a.key.to_lowercase().cmp(&b.key.to_lowercase()))
            .then_with(|| a.key.cmp(&b.key))
    });
    groups.truncate(top_k);
    groups
}

pub fn growth(points: &[TrendPoint]) -> Growth {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => {
            if first.value == 0.0 {
                Growth::Undefined
            } else {
                let percent = (last.value - first.value) / first.value * 100.0;
                if percent.is_finite() {
                    Growth::Percent(percent)
                } else {
                    Growth::Undefined
                }
            }
        }
        _ => Growth::InsufficientData,
    }
}

pub fn pearson(pairs: &[(f64, f64)]) -> CorrelationValue {
    if pairs.len() < MIN_CORRELATION_PAIRS {
        return CorrelationValue::InsufficientData;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut covariance, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return CorrelationValue::Undefined;
    }

    let r = covariance / (var_x.sqrt() * var_y.sqrt());
    if r.is_finite() {
        CorrelationValue::Coefficient(r.clamp(-1.0, 1.0))
    } else {
        CorrelationValue::Undefined
    }
}

/// Metric aggregated per (state, year) for correlation
struct KeyedSeries {
    values: BTreeMap<(String, i64), f64>,
    display: HashMap<String, String>,
    dropped: usize,
    used: usize,
}

fn keyed_series(frame: &FilteredFrame, metric: Metric) -> Result<KeyedSeries> {
    let states = frame.text(Dimension::State.column())?;
    let years = frame.numbers(Dimension::Year.column())?;
    let values = frame.numbers(metric.column())?;
    let aggregate = default_aggregate(metric);

    let mut accumulators: BTreeMap<(String, i64), Accumulator> = BTreeMap::new();
    let mut display = HashMap::new();
    let mut dropped = 0;
    let mut used = 0;

    for ((state, year), value) in states.into_iter().zip(years).zip(values) {
        match (state, year.and_then(year_key), value) {
            (Some(state), Some(year), Some(value)) => {
                let folded = state.to_lowercase();
                display.entry(folded.clone()).or_insert(state);
                accumulators.entry((folded, year)).or_default().add(value);
                used += 1;
            }
            _ => dropped += 1,
        }
    }

    Ok(KeyedSeries {
        values: accumulators
            .into_iter()
            .map(|(key, acc)| (key, acc.finish(aggregate)))
            .collect(),
        display,
        dropped,
        used,
    })
}

fn group_table(
    key: String,
    dimension: Dimension,
    metric: Metric,
    groups: &[GroupValue],
) -> ResultTable {
    let records = groups
        .iter()
        .map(|g| {
            let mut record = Map::new();
            let key_value = match dimension {
                Dimension::Year => g
                    .key
                    .parse::<i64>()
                    .map(|y| json!(y))
                    .unwrap_or_else(|_| json!(g.key)),
                _ => json!(g.key),
            };
            record.insert(dimension.column().to_string(), key_value);
            record.insert(metric.column().to_string(), json!(g.value));
            record
        })
        .collect();
    ResultTable {
        key,
        columns: vec![dimension.column().to_string(), metric.column().to_string()],
        records,
    }
}
