//! Response Synthesizer
//!
//! Turns a [`ResultSet`] into the caller-facing payload: templated answer
//! text, chart specifications and tabular data. Text is produced only from
//! templates, so an identical result always reads identically.

use crate::citation::Citation;
use crate::entities::{Aggregate, Dimension, ExtractedEntities, SortOrder, YearRange};
use crate::executor::{CorrelationValue, GroupValue, Growth, Outcome, ResultSet, ResultTable};
use crate::intent::{Intent, IntentType};
use crate::planner::{Filter, QueryPlan};
use crate::vocabulary::Metric;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Overview charts switch from pie to horizontal bars above this many slices
pub const MAX_PIE_SLICES: usize = 8;

pub const EXAMPLE_QUERIES: &[&str] = &[
    "Compare rice production between Punjab and Haryana",
    "Which states have the highest wheat yield?",
    "Show the trend of rice production in West Bengal over the last 5 years",
    "How does rainfall affect rice production in Punjab?",
    "Top 3 states by sugarcane production in 2020",
    "Average rainfall in Kerala vs Tamil Nadu",
    "What is the modal price of onion in Maharashtra?",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub data: Vec<Map<String, Value>>,
    pub shape: (usize, usize),
}

impl From<&ResultTable> for DataTable {
    fn from(table: &ResultTable) -> Self {
        Self {
            columns: table.columns.clone(),
            data: table.records.clone(),
            shape: table.shape(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    HorizontalBar,
    Line,
    Pie,
    Doughnut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(rename = "type")]
    pub chart: ChartType,
    pub title: String,
    pub x_axis: String,
    pub y_axis: String,
    pub data_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub query_id: String,
    pub fingerprint: String,
    pub query_type: IntentType,
    pub intent_description: String,
    pub entities: ExtractedEntities,
    pub datasets_used: Vec<String>,
    pub processing_time_ms: u64,
}

/// The payload returned for every question, success or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub query: String,
    pub answer: String,
    pub intent: IntentType,
    pub confidence: f64,
    pub cached: bool,
    /// Error class when the pipeline could not answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: BTreeMap<String, DataTable>,
    pub visualizations: Vec<Visualization>,
    pub citations: Vec<Citation>,
    pub metadata: ResponseMetadata,
}

/// What the synthesizer contributes to a [`QueryResponse`]
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub confidence: f64,
    pub data: BTreeMap<String, DataTable>,
    pub visualizations: Vec<Visualization>,
}

pub fn prompt_answer() -> String {
    format!(
        "Please ask a question about Indian agriculture or climate data, for example: \"{}\".",
        EXAMPLE_QUERIES[0]
    )
}

pub fn unrecognized_answer() -> String {
    format!(
        "I couldn't recognise any state, crop, year or metric in your question. Try something like \"{}\" or \"{}\".",
        EXAMPLE_QUERIES[0], EXAMPLE_QUERIES[1]
    )
}

pub fn planning_failure_answer(reason: &str) -> String {
    format!(
        "I couldn't answer that with the datasets currently loaded. {}",
        reason
    )
}

pub fn execution_failure_answer() -> String {
    "I couldn't compute an answer from the matching data. Please try rephrasing your question or narrowing it to a state, crop or period.".to_string()
}

/// `1234567.891` → `1,234,567.89`
pub fn format_number(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (whole, fraction) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if value < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, fraction)
}

fn quantity(value: f64, metric: Metric) -> String {
    format!("{} {}", format_number(value), metric.unit())
}

fn title_case(text: &str) -> String {
    text.split(|c| c == ' ' || c == '_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn plural(dimension: Dimension, count: usize) -> String {
    if count == 1 {
        dimension.column().to_string()
    } else {
        format!("{}s", dimension.column())
    }
}

/// "production", or "average production" when the aggregate is not the
/// metric's natural one
fn metric_phrase(metric: Metric, aggregate: Aggregate) -> String {
    if aggregate == crate::planner::default_aggregate(metric) {
        metric.to_string()
    } else {
        format!("{} {}", aggregate.label(), metric)
    }
}

/// " of Rice in Punjab in 2015-2019" style suffix built from the plan's
/// filters. Crop comes first, then place, then period, whatever order the
/// filters were written in.
fn scope(plan: &QueryPlan, dimension: Option<Dimension>) -> String {
    let (mut crops, mut states, mut years) = (String::new(), String::new(), String::new());
    for filter in &plan.filters {
        match filter {
            Filter::CropIn(values) if dimension != Some(Dimension::Crop) => {
                crops = format!(" of {}", values.join(" and "));
            }
            Filter::StateIn(values) if dimension != Some(Dimension::State) => {
                states = format!(" in {}", values.join(" and "));
            }
            Filter::YearRange(range) if dimension != Some(Dimension::Year) => {
                years = year_phrase(range);
            }
            Filter::YearIn(values) if dimension != Some(Dimension::Year) => {
                years = format!(
                    " in {}",
                    values
                        .iter()
                        .map(|y| y.to_string())
                        .collect::<Vec<_>>()
                        .join(" and ")
                );
            }
            _ => {}
        }
    }
    format!("{}{}{}", crops, states, years)
}

fn year_phrase(range: &YearRange) -> String {
    if range.start == range.end {
        format!(" in {}", range.start)
    } else {
        format!(" during {}", range)
    }
}

pub struct ResponseSynthesizer;

impl ResponseSynthesizer {
    pub fn synthesize(plan: &QueryPlan, intent: &Intent, result: &ResultSet) -> Synthesis {
        let mut answer = Self::answer(plan, &result.outcome);
        let records = result.records_used();
        if records > 0 {
            answer.push_str(&format!(
                "\n\nThis analysis is based on {} data records.",
                records
            ));
        }

        let confidence = if result.outcome.is_degenerate() || records == 0 {
            round4(intent.confidence * 0.5)
        } else {
            round4(intent.confidence)
        };

        Synthesis {
            answer,
            confidence,
            data: result
                .tables
                .iter()
                .map(|t| (t.key.clone(), DataTable::from(t)))
                .collect(),
            visualizations: Self::visualizations(&result.outcome, &result.tables),
        }
    }

    pub fn answer(plan: &QueryPlan, outcome: &Outcome) -> String {
        match outcome {
            Outcome::Grouped {
                metric,
                dimension,
                aggregate,
                groups,
            } => compare_answer(plan, *metric, *dimension, *aggregate, groups),
            Outcome::Ranked {
                metric,
                dimension,
                aggregate,
                order,
                entries,
                total_groups,
            } => rank_answer(
                plan,
                *metric,
                *dimension,
                *aggregate,
                *order,
                entries,
                *total_groups,
            ),
            Outcome::Trend {
                metric,
                aggregate,
                points,
                growth,
            } => {
                let what = format!("{}{}", metric_phrase(*metric, *aggregate), scope(plan, None));
                match (growth, points.first(), points.last()) {
                    (Growth::Percent(percent), Some(first), Some(last)) => {
                        let direction = if *percent > 0.0 {
                            "increasing"
                        } else if *percent < 0.0 {
                            "decreasing"
                        } else {
                            "stable"
                        };
                        let mut text = format!(
                            "The trend analysis shows that {} has been {} from {} ({}) to {} ({})",
                            what,
                            direction,
                            first.year,
                            quantity(first.value, *metric),
                            last.year,
                            quantity(last.value, *metric)
                        );
                        if *percent != 0.0 {
                            text.push_str(&format!(
                                ", a change of approximately {:.1}%",
                                percent.abs()
                            ));
                        }
                        text.push('.');
                        text
                    }
                    (Growth::Undefined, Some(first), Some(last)) => format!(
                        "The trend analysis shows {} moving from {} ({}) to {} ({}). The growth rate is undefined because the first value is zero.",
                        what,
                        first.year,
                        quantity(first.value, *metric),
                        last.year,
                        quantity(last.value, *metric)
                    ),
                    _ => format!(
                        "There is insufficient data to analyse the trend of {}: {} year(s) of data matched, at least 2 are needed.",
                        what,
                        points.len()
                    ),
                }
            }
            Outcome::Correlation {
                x,
                y,
                pairs,
                coefficient,
            } => {
                let what = format!("{} and {}{}", x, y, scope(plan, None));
                match coefficient {
                    CorrelationValue::Coefficient(r) => format!(
                        "The correlation between {} is {} (Pearson r = {:.2}) across {} state-year pairs.",
                        what,
                        correlation_strength(*r),
                        r,
                        pairs
                    ),
                    CorrelationValue::Undefined => format!(
                        "The correlation between {} is undefined because one of the series does not vary across the {} state-year pairs.",
                        what, pairs
                    ),
                    CorrelationValue::InsufficientData => format!(
                        "There is insufficient data to correlate {}: {} paired state-year values matched, at least {} are needed.",
                        what,
                        pairs,
                        crate::executor::MIN_CORRELATION_PAIRS
                    ),
                }
            }
            Outcome::Overview {
                metric,
                dimension,
                aggregate,
                groups,
            } => {
                let what = format!(
                    "{}{}",
                    metric_phrase(*metric, *aggregate),
                    scope(plan, Some(*dimension))
                );
                match crate::executor::rank(groups.clone(), SortOrder::Descending, 1).first() {
                    Some(top) => format!(
                        "Here is the {} by {} across {} {}. {} has the highest value ({}).",
                        what,
                        dimension.column(),
                        groups.len(),
                        plural(*dimension, groups.len()),
                        top.key,
                        quantity(top.value, *metric)
                    ),
                    None => format!("I couldn't find any {} data matching your query.", what),
                }
            }
        }
    }

    pub fn visualizations(outcome: &Outcome, tables: &[ResultTable]) -> Vec<Visualization> {
        tables
            .iter()
            .filter(|t| !t.records.is_empty())
            .map(|table| {
                let (chart, x_axis, y_axis, title) = match outcome {
                    Outcome::Grouped {
                        metric, dimension, ..
                    } => (
                        ChartType::Bar,
                        dimension.column(),
                        metric.column(),
                        format!("{} by {}", title_case(metric.column()), title_case(dimension.column())),
                    ),
                    Outcome::Ranked {
                        metric,
                        dimension,
                        entries,
                        ..
                    } => (
                        ChartType::Bar,
                        dimension.column(),
                        metric.column(),
                        format!(
                            "Top {} {} by {}",
                            entries.len(),
                            title_case(&plural(*dimension, entries.len())),
                            title_case(metric.column())
                        ),
                    ),
                    Outcome::Trend { metric, .. } => (
                        ChartType::Line,
                        Dimension::Year.column(),
                        metric.column(),
                        format!("{} Trend", title_case(metric.column())),
                    ),
                    Outcome::Correlation { x, y, .. } => (
                        ChartType::Line,
                        Dimension::Year.column(),
                        y.column(),
                        format!("{} vs {}", title_case(x.column()), title_case(y.column())),
                    ),
                    Outcome::Overview {
                        metric,
                        dimension,
                        aggregate,
                        groups,
                    } => {
                        let chart = if groups.len() <= MAX_PIE_SLICES && *aggregate == Aggregate::Sum {
                            ChartType::Pie
                        } else {
                            ChartType::HorizontalBar
                        };
                        (
                            chart,
                            dimension.column(),
                            metric.column(),
                            format!(
                                "{} by {}",
                                title_case(metric.column()),
                                title_case(dimension.column())
                            ),
                        )
                    }
                };
                Visualization {
                    chart,
                    title,
                    x_axis: x_axis.to_string(),
                    y_axis: y_axis.to_string(),
                    data_key: table.key.clone(),
                }
            })
            .collect()
    }
}

fn compare_answer(
    plan: &QueryPlan,
    metric: Metric,
    dimension: Dimension,
    aggregate: Aggregate,
    groups: &[GroupValue],
) -> String {
    let what = format!(
        "{}{}",
        metric_phrase(metric, aggregate),
        scope(plan, Some(dimension))
    );
    match groups {
        [] => "I couldn't find sufficient data to make the requested comparison.".to_string(),
        [only] => format!(
            "Only {} has {} data for this comparison: {}.",
            only.key,
            what,
            quantity(only.value, metric)
        ),
        [a, b] => {
            if a.value == b.value {
                format!(
                    "Based on the data, {} and {} have the same {} ({}).",
                    a.key,
                    b.key,
                    what,
                    quantity(a.value, metric)
                )
            } else {
                let (high, low) = if a.value > b.value { (a, b) } else { (b, a) };
                format!(
                    "Based on the data, {} has higher {} ({}) compared to {} ({}).",
                    high.key,
                    what,
                    quantity(high.value, metric),
                    low.key,
                    quantity(low.value, metric)
                )
            }
        }
        many => {
            let ranked = crate::executor::rank(many.to_vec(), SortOrder::Descending, many.len());
            let listing = ranked
                .iter()
                .map(|g| format!("{} ({})", g.key, quantity(g.value, metric)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Based on the data, comparing {} across {} {}: {}.",
                what,
                many.len(),
                plural(dimension, many.len()),
                listing
            )
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn rank_answer(
    plan: &QueryPlan,
    metric: Metric,
    dimension: Dimension,
    aggregate: Aggregate,
    order: SortOrder,
    entries: &[GroupValue],
    total_groups: usize,
) -> String {
    let what = format!(
        "{}{}",
        metric_phrase(metric, aggregate),
        scope(plan, Some(dimension))
    );
    let (first, last) = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return "I couldn't find sufficient data to generate the requested ranking.".to_string(),
    };
    let (best, other) = match order {
        SortOrder::Descending => ("highest", "lowest"),
        SortOrder::Ascending => ("lowest", "highest"),
    };

    let mut text = format!(
        "Based on the available data, {} has the {} {} ({})",
        first.key,
        best,
        what,
        quantity(first.value, metric)
    );
    if entries.len() > 1 {
        text.push_str(&format!(
            ", while {} has the {} among the {} shown ({})",
            last.key,
            other,
            entries.len(),
            quantity(last.value, metric)
        ));
    }
    text.push_str(&format!(". Ranked {} of {} {}: ", entries.len(), total_groups, plural(dimension, total_groups)));
    text.push_str(
        &entries
            .iter()
            .enumerate()
            .map(|(i, g)| format!("{}. {} ({})", i + 1, g.key, format_number(g.value)))
            .collect::<Vec<_>>()
            .join("; "),
    );
    text.push('.');
    text
}

fn correlation_strength(r: f64) -> String {
    let magnitude = r.abs();
    let strength = if magnitude >= 0.7 {
        "strong"
    } else if magnitude >= 0.4 {
        "moderate"
    } else if magnitude >= 0.2 {
        "weak"
    } else {
        return "negligible".to_string();
    };
    let direction = if r > 0.0 { "positive" } else { "negative" };
    format!("{} {}", strength, direction)
}

fn round4(value: f64) -> f64 {
    (value.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}
