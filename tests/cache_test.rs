// Cache behaviour seen through the public API.

use chrono::{Duration, TimeZone, Utc};
use polars::prelude::*;
use samarth_engine::{
    Clock, Dataset, DatasetMetadata, EngineConfig, ManualClock, QueryCache, QueryEngine,
    Vocabulary,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ))
}

fn datasets() -> Vec<Dataset> {
    let table = df! {
        "state" => &["Punjab", "Haryana"],
        "crop" => &["Rice", "Rice"],
        "year" => &[2020i64, 2020],
        "production" => &[12000.0, 4500.0],
    }
    .unwrap();
    vec![Dataset::new(
        "crop_production",
        table,
        DatasetMetadata::new("crop-prod", "Crop Production Statistics"),
    )]
}

fn engine(config: EngineConfig, clock: Arc<ManualClock>) -> QueryEngine {
    QueryEngine::new(config, Vocabulary::builtin(), datasets(), clock).unwrap()
}

/// Clock that swaps the engine's datasets out on its n-th reading.
/// A cache miss reads the clock for the query, the lookup, the citations and
/// finally the insert, so n = 4 refreshes right before the answer is stored.
struct RefreshingClock {
    inner: ManualClock,
    calls: AtomicUsize,
    refresh_on: usize,
    engine: OnceLock<Weak<QueryEngine>>,
}

impl Clock for RefreshingClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.refresh_on {
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                engine.refresh_datasets(vec![]);
            }
        }
        self.inner.now()
    }
}

#[test]
fn test_hundred_and_first_put_evicts_the_oldest() {
    let cache: QueryCache<String> =
        QueryCache::new(std::time::Duration::from_secs(3600), 100, clock());
    for i in 0..101 {
        cache.put(&format!("q{}", i), format!("answer {}", i));
    }

    assert_eq!(cache.len(), 100);
    assert_eq!(cache.get("q0"), None);
    assert_eq!(cache.get("q1").as_deref(), Some("answer 1"));
    assert_eq!(cache.get("q100").as_deref(), Some("answer 100"));
}

#[test]
fn test_answers_expire_after_ttl() {
    let clock = clock();
    let config = EngineConfig {
        cache_ttl: std::time::Duration::from_secs(60),
        ..EngineConfig::default()
    };
    let engine = engine(config, clock.clone());

    engine.process("Compare rice production between Punjab and Haryana");
    clock.advance(Duration::seconds(30));
    assert!(engine.process("Compare rice production between Punjab and Haryana").cached);

    clock.advance(Duration::seconds(31));
    let expired = engine.process("Compare rice production between Punjab and Haryana");
    assert!(!expired.cached);
    assert_eq!(engine.cache_stats().entries, 1);
}

#[test]
fn test_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let clock = clock();
    let config = EngineConfig {
        cache_file: Some(path.clone()),
        ..EngineConfig::default()
    };

    let first = engine(config.clone(), clock.clone());
    let original = first.process("Compare rice production between Punjab and Haryana");
    drop(first);
    assert!(path.exists());

    let second = engine(config, clock);
    assert!(second.cache_stats().persisted);
    let reloaded = second.process("Compare rice production between Punjab and Haryana");
    assert!(reloaded.cached);
    assert_eq!(reloaded.answer, original.answer);
}

#[test]
fn test_corrupted_cache_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    std::fs::write(&path, "{ this is not json").unwrap();

    let config = EngineConfig {
        cache_file: Some(path.clone()),
        ..EngineConfig::default()
    };
    let engine = engine(config, clock());
    assert_eq!(engine.cache_stats().entries, 0);

    let response = engine.process("Compare rice production between Punjab and Haryana");
    assert!(response.success);
    assert!(!response.cached);

    // the next write replaces the broken store with a readable one
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&raw).is_ok());
}

#[test]
fn test_clear_reports_removed_entries() {
    let engine = engine(EngineConfig::default(), clock());
    engine.process("Compare rice production between Punjab and Haryana");
    engine.process("Which state has the highest rice production?");

    assert_eq!(engine.clear_cache(), 2);
    assert_eq!(engine.cache_stats().entries, 0);
}

#[test]
fn test_answer_from_replaced_snapshot_is_never_served() {
    let clock = Arc::new(RefreshingClock {
        inner: ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        calls: AtomicUsize::new(0),
        refresh_on: 4,
        engine: OnceLock::new(),
    });
    let engine = Arc::new(
        QueryEngine::new(
            EngineConfig::default(),
            Vocabulary::builtin(),
            datasets(),
            clock.clone(),
        )
        .unwrap(),
    );
    clock.engine.set(Arc::downgrade(&engine)).unwrap();

    let first = engine.process("Compare rice production between Punjab and Haryana");
    assert!(first.success);
    assert_eq!(engine.catalog().generation(), 2);

    let second = engine.process("Compare rice production between Punjab and Haryana");
    assert!(!second.cached);
    assert!(!second.success);
    assert_eq!(second.error.as_deref(), Some("planning"));
}
