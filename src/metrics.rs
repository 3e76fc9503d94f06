//! Engine Metrics
//!
//! Track query volume per intent, metric usage and failures per error class.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Running total and count, so averages stay exact
#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    total_ms: u64,
    count: u64,
}

/// Usage metrics tracker
#[derive(Debug, Default)]
pub struct EngineMetrics {
    intent_counts: Arc<Mutex<BTreeMap<String, u64>>>,
    metric_usage: Arc<Mutex<BTreeMap<String, u64>>>,
    error_counts: Arc<Mutex<BTreeMap<String, u64>>>,
    execution_time: Arc<Mutex<BTreeMap<String, Timing>>>,
    cache_hits: Arc<Mutex<u64>>,
}

/// Point-in-time copy for reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub cache_hits: u64,
    pub intent_counts: BTreeMap<String, u64>,
    pub metric_usage: BTreeMap<String, u64>,
    pub error_counts: BTreeMap<String, u64>,
    pub avg_execution_ms: BTreeMap<String, f64>,
}

fn bump(map: &Mutex<BTreeMap<String, u64>>, key: &str) {
    let mut counts = map.lock().unwrap_or_else(|e| e.into_inner());
    *counts.entry(key.to_string()).or_insert(0) += 1;
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_intent(&self, intent: &str) {
        bump(&self.intent_counts, intent);
    }

    pub fn record_metric_usage(&self, metric: &str) {
        bump(&self.metric_usage, metric);
    }

    pub fn record_error(&self, error_class: &str) {
        bump(&self.error_counts, error_class);
    }

    pub fn record_cache_hit(&self) {
        *self.cache_hits.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    pub fn record_execution_time(&self, query_type: &str, time_ms: u64) {
        let mut timings = self
            .execution_time
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let timing = timings.entry(query_type.to_string()).or_default();
        timing.total_ms += time_ms;
        timing.count += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let intent_counts = self
            .intent_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let avg_execution_ms = self
            .execution_time
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, t)| t.count > 0)
            .map(|(k, t)| (k.clone(), t.total_ms as f64 / t.count as f64))
            .collect();
        MetricsSnapshot {
            queries: intent_counts.values().sum(),
            cache_hits: *self.cache_hits.lock().unwrap_or_else(|e| e.into_inner()),
            intent_counts,
            metric_usage: self
                .metric_usage
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            error_counts: self
                .error_counts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            avg_execution_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_average() {
        let metrics = EngineMetrics::new();
        metrics.record_intent("comparison");
        metrics.record_intent("comparison");
        metrics.record_intent("trend");
        metrics.record_error("planning");
        metrics.record_execution_time("comparison", 10);
        metrics.record_execution_time("comparison", 30);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries, 3);
        assert_eq!(snapshot.intent_counts["comparison"], 2);
        assert_eq!(snapshot.error_counts["planning"], 1);
        assert_eq!(snapshot.avg_execution_ms["comparison"], 20.0);
    }
}
