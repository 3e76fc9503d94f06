//! Query Planner
//!
//! Turns an intent plus extracted entities into a concrete [`QueryPlan`]:
//! which datasets to read, which filters to apply and which operation to run.
//! Planning is deterministic: the same inputs against the same snapshot
//! always produce the same plan.

use crate::catalog::DatasetSnapshot;
use crate::entities::{Aggregate, Dimension, ExtractedEntities, SortOrder, YearRange};
use crate::error::{Result, SamarthError};
use crate::intent::{Intent, IntentType};
use crate::vocabulary::Metric;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Filter {
    StateIn(Vec<String>),
    CropIn(Vec<String>),
    YearRange(YearRange),
    /// Separately named years ("2015 vs 2019"), without the years between
    YearIn(Vec<i32>),
}

impl Filter {
    /// Column the filter reads; datasets without it are not filtered
    pub fn column(&self) -> &'static str {
        match self {
            Filter::StateIn(_) => Dimension::State.column(),
            Filter::CropIn(_) => Dimension::Crop.column(),
            Filter::YearRange(_) | Filter::YearIn(_) => Dimension::Year.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Compare {
        metric: Metric,
        dimension: Dimension,
        aggregate: Aggregate,
    },
    Rank {
        metric: Metric,
        dimension: Dimension,
        aggregate: Aggregate,
        order: SortOrder,
        top_k: usize,
    },
    Trend {
        metric: Metric,
        aggregate: Aggregate,
    },
    Correlate {
        x: Metric,
        y: Metric,
    },
    Overview {
        metric: Metric,
        dimension: Dimension,
        aggregate: Aggregate,
    },
}

impl Operation {
    pub fn metrics(&self) -> Vec<Metric> {
        match self {
            Operation::Compare { metric, .. }
            | Operation::Rank { metric, .. }
            | Operation::Trend { metric, .. }
            | Operation::Overview { metric, .. } => vec![*metric],
            Operation::Correlate { x, y } => vec![*x, *y],
        }
    }

    /// Dimension the result is keyed on
    pub fn dimension(&self) -> Dimension {
        match self {
            Operation::Compare { dimension, .. }
            | Operation::Rank { dimension, .. }
            | Operation::Overview { dimension, .. } => *dimension,
            Operation::Trend { .. } | Operation::Correlate { .. } => Dimension::Year,
        }
    }
}

/// One dataset the plan reads and what it reads it for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSelection {
    pub dataset: String,
    pub metrics: Vec<Metric>,
    /// Columns the dataset must provide, sorted
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub intent: IntentType,
    pub sources: Vec<DatasetSelection>,
    pub filters: Vec<Filter>,
    pub operation: Operation,
}

impl QueryPlan {
    pub fn source_for(&self, metric: Metric) -> Option<&DatasetSelection> {
        self.sources.iter().find(|s| s.metrics.contains(&metric))
    }

    pub fn dataset_keys(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.dataset.as_str()).collect()
    }
}

/// Aggregate a metric falls back to without an explicit hint
pub fn default_aggregate(metric: Metric) -> Aggregate {
    if metric.is_additive() {
        Aggregate::Sum
    } else {
        Aggregate::Mean
    }
}

pub struct QueryPlanner {
    default_top_k: usize,
}

impl QueryPlanner {
    pub fn new(default_top_k: usize) -> Self {
        Self { default_top_k }
    }

    pub fn plan(
        &self,
        intent: &Intent,
        entities: &ExtractedEntities,
        snapshot: &DatasetSnapshot,
    ) -> Result<QueryPlan> {
        let operation = self.operation(intent.kind, entities);
        let metrics = operation.metrics();
        let sources = select_datasets(&metrics, &operation, entities, snapshot)?;

        let plan = QueryPlan {
            intent: intent.kind,
            sources,
            filters: filters(entities),
            operation,
        };
        debug!(
            "Planned {:?} over datasets {:?}",
            plan.operation,
            plan.dataset_keys()
        );
        Ok(plan)
    }

    fn operation(&self, kind: IntentType, entities: &ExtractedEntities) -> Operation {
        let primary = entities
            .metrics
            .first()
            .copied()
            .unwrap_or(Metric::Production);
        let aggregate = entities
            .modifiers
            .aggregate
            .unwrap_or_else(|| default_aggregate(primary));
        let hinted = entities.modifiers.group_by;

        match kind {
            IntentType::Comparison => Operation::Compare {
                metric: primary,
                dimension: entities
                    .multi_valued_dimension()
                    .or(hinted)
                    .unwrap_or(Dimension::State),
                aggregate,
            },
            IntentType::Ranking => Operation::Rank {
                metric: primary,
                dimension: hinted.unwrap_or(Dimension::State),
                aggregate,
                order: entities.modifiers.order.unwrap_or(SortOrder::Descending),
                top_k: entities.modifiers.top_k.unwrap_or(self.default_top_k),
            },
            IntentType::Trend => Operation::Trend {
                metric: primary,
                aggregate,
            },
            IntentType::Correlation => {
                let (x, y) = correlation_pair(&entities.metrics);
                Operation::Correlate { x, y }
            }
            IntentType::Unknown => Operation::Overview {
                metric: primary,
                dimension: hinted.unwrap_or(Dimension::State),
                aggregate,
            },
        }
    }
}

fn correlation_pair(metrics: &[Metric]) -> (Metric, Metric) {
    match metrics {
        [x, y, ..] => (*x, *y),
        [Metric::Production] => (Metric::Rainfall, Metric::Production),
        [only] => (*only, Metric::Production),
        [] => (Metric::Rainfall, Metric::Production),
    }
}

fn filters(entities: &ExtractedEntities) -> Vec<Filter> {
    let mut filters = Vec::new();
    if !entities.states.is_empty() {
        filters.push(Filter::StateIn(entities.states.clone()));
    }
    if !entities.crops.is_empty() {
        filters.push(Filter::CropIn(entities.crops.clone()));
    }
    match (entities.year_range, entities.years.as_slice()) {
        (Some(range), _) => filters.push(Filter::YearRange(range)),
        (None, []) => {}
        (None, [year]) => filters.push(Filter::YearRange(YearRange::new(*year, *year))),
        (None, years) => filters.push(Filter::YearIn(years.to_vec())),
    }
    filters
}

/// Columns a dataset needs to answer `metric` within the requested scope
fn required_columns(
    metric: Metric,
    operation: &Operation,
    entities: &ExtractedEntities,
) -> BTreeSet<&'static str> {
    let mut columns = BTreeSet::new();
    columns.insert(metric.column());

    let correlate = matches!(operation, Operation::Correlate { .. });
    let dimension = operation.dimension();

    if !entities.states.is_empty() || dimension == Dimension::State || correlate {
        columns.insert(Dimension::State.column());
    }
    if entities.has_years() || dimension == Dimension::Year || correlate {
        columns.insert(Dimension::Year.column());
    }
    if (!entities.crops.is_empty() && metric.is_crop_specific()) || dimension == Dimension::Crop {
        columns.insert(Dimension::Crop.column());
    }
    columns
}

/// Smallest set of datasets that together supply every metric. Among sets of
/// equal size the lexicographically smallest key list wins.
fn select_datasets(
    metrics: &[Metric],
    operation: &Operation,
    entities: &ExtractedEntities,
    snapshot: &DatasetSnapshot,
) -> Result<Vec<DatasetSelection>> {
    let metrics: Vec<Metric> = metrics.iter().copied().unique().collect();
    let requirements: Vec<(Metric, BTreeSet<&'static str>)> = metrics
        .iter()
        .map(|m| (*m, required_columns(*m, operation, entities)))
        .collect();

    let supplies = |key: &str, columns: &BTreeSet<&'static str>| -> bool {
        snapshot
            .get(key)
            .map(|dataset| columns.iter().all(|c| dataset.has_column(c)))
            .unwrap_or(false)
    };

    // BTreeMap keys are sorted, so combinations come out in lexicographic order
    let keys = snapshot.keys();
    for size in 1..=metrics.len().min(keys.len()) {
        for combo in keys.iter().copied().combinations(size) {
            let assignment: Option<Vec<(&str, Metric, &BTreeSet<&'static str>)>> = requirements
                .iter()
                .map(|(metric, columns)| {
                    combo
                        .iter()
                        .copied()
                        .find(|key| supplies(*key, columns))
                        .map(|key| (key, *metric, columns))
                })
                .collect();

            if let Some(assignment) = assignment {
                return Ok(combo
                    .iter()
                    .copied()
                    .filter_map(|key| {
                        let assigned: Vec<_> =
                            assignment.iter().filter(|(k, _, _)| *k == key).collect();
                        if assigned.is_empty() {
                            return None;
                        }
                        let columns: BTreeSet<&str> = assigned
                            .iter()
                            .flat_map(|(_, _, columns)| columns.iter().copied())
                            .collect();
                        Some(DatasetSelection {
                            dataset: key.to_string(),
                            metrics: assigned.iter().map(|(_, m, _)| *m).collect(),
                            columns: columns.into_iter().map(String::from).collect(),
                        })
                    })
                    .collect());
            }
        }
    }

    Err(SamarthError::Planning(unavailable_message(&requirements, snapshot)))
}

fn unavailable_message(
    requirements: &[(Metric, BTreeSet<&'static str>)],
    snapshot: &DatasetSnapshot,
) -> String {
    let requested = requirements
        .iter()
        .map(|(metric, columns)| format!("{} (needs {})", metric, columns.iter().join(", ")))
        .join("; ");
    let available: Vec<String> = Metric::ALL
        .iter()
        .filter(|m| snapshot.datasets.values().any(|d| d.has_column(m.column())))
        .map(|m| m.to_string())
        .collect();
    if available.is_empty() {
        format!("No dataset can answer this: {}. No datasets are loaded.", requested)
    } else {
        format!(
            "No dataset can answer this: {}. Available metrics: {}.",
            requested,
            available.join(", ")
        )
    }
}
