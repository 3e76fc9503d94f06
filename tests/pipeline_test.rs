// End-to-end tests: question text in, QueryResponse out.

use chrono::{TimeZone, Utc};
use polars::prelude::*;
use samarth_engine::executor::Growth;
use samarth_engine::response::ChartType;
use samarth_engine::{
    Dataset, DatasetMetadata, EngineConfig, IntentType, ManualClock, QueryEngine, Vocabulary,
};
use std::sync::Arc;

fn crop_production() -> Dataset {
    let table = df! {
        "state" => &["Punjab", "Haryana", "Punjab", "Haryana", "Bihar"],
        "crop" => &["Rice", "Rice", "Wheat", "Wheat", "Rice"],
        "year" => &[2020i64, 2020, 2020, 2020, 2020],
        "production" => &[12000.0, 4500.5, 17000.0, 11000.0, 3000.0],
    }
    .unwrap();
    let mut metadata = DatasetMetadata::new("crop-prod", "Crop Production Statistics");
    metadata.source_organization = "Ministry of Agriculture and Farmers Welfare".to_string();
    metadata.last_updated = "2024-02-20".to_string();
    Dataset::new("crop_production", table, metadata)
}

fn engine_with(datasets: Vec<Dataset>) -> QueryEngine {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let config = EngineConfig {
        reference_year: Some(2024),
        ..EngineConfig::default()
    };
    QueryEngine::new(config, Vocabulary::builtin(), datasets, clock).unwrap()
}

#[test]
fn test_compare_rice_between_two_states() {
    let engine = engine_with(vec![crop_production()]);
    let response = engine.process("Compare rice production between Punjab and Haryana");

    assert!(response.success);
    assert!(!response.cached);
    assert_eq!(response.intent, IntentType::Comparison);
    assert!((response.confidence - 0.9).abs() < 1e-9);
    assert!(response
        .answer
        .contains("Punjab has higher production of Rice (12,000.00 tonnes) compared to Haryana (4,500.50 tonnes)"));
    assert!(response.answer.ends_with("This analysis is based on 2 data records."));

    assert_eq!(response.visualizations.len(), 1);
    let chart = &response.visualizations[0];
    assert_eq!(chart.chart, ChartType::Bar);
    assert_eq!(chart.x_axis, "state");
    assert_eq!(chart.y_axis, "production");
    assert!(response.data.contains_key(&chart.data_key));

    assert_eq!(response.citations.len(), 1);
    let citation = &response.citations[0];
    assert_eq!(citation.dataset_name, "Crop Production Statistics");
    assert_eq!(citation.records_analyzed, 2);
    assert_eq!(citation.total_records_available, 5);
    assert_eq!(response.metadata.datasets_used, vec!["crop_production"]);
}

#[test]
fn test_compare_two_named_years_skips_the_years_between() {
    let table = df! {
        "state" => &["Punjab", "Punjab", "Punjab", "Punjab", "Punjab"],
        "crop" => &["Rice", "Rice", "Rice", "Rice", "Rice"],
        "year" => &[2015i64, 2016, 2017, 2018, 2019],
        "production" => &[100.0, 200.0, 300.0, 400.0, 500.0],
    }
    .unwrap();
    let engine = engine_with(vec![Dataset::new(
        "crop_production",
        table,
        DatasetMetadata::new("crop-prod", "Crop Production Statistics"),
    )]);

    let response = engine.process("Compare rice production in Punjab in 2015 vs 2019");
    assert!(response.success);
    assert_eq!(response.intent, IntentType::Comparison);
    assert_eq!(
        response.answer,
        "Based on the data, 2019 has higher production of Rice in Punjab (500.00 tonnes) compared to 2015 (100.00 tonnes).\n\nThis analysis is based on 2 data records."
    );

    let grouped = &response.data["crop_production_grouped"];
    let years: Vec<i64> = grouped
        .data
        .iter()
        .map(|row| row["year"].as_i64().unwrap())
        .collect();
    assert_eq!(years, vec![2015, 2019]);
    assert_eq!(response.citations[0].records_analyzed, 2);
}

#[test]
fn test_payload_serializes_with_chart_type_field() {
    let engine = engine_with(vec![crop_production()]);
    let response = engine.process("Compare rice production between Punjab and Haryana");
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["intent"], "comparison");
    assert_eq!(json["visualizations"][0]["type"], "bar");
    assert!(json.get("error").is_none());
    assert_eq!(json["data"]["crop_production_grouped"]["shape"][0], 2);
}

#[test]
fn test_empty_query_prompts_for_a_question() {
    let engine = engine_with(vec![crop_production()]);
    let response = engine.process("");

    assert!(response.success);
    assert_eq!(response.intent, IntentType::Unknown);
    assert_eq!(response.confidence, 0.0);
    assert!(response.answer.starts_with("Please ask"));
    assert!(response.data.is_empty());
    assert!(response.citations.is_empty());
}

#[test]
fn test_unrecognized_question_is_not_cached() {
    let engine = engine_with(vec![crop_production()]);
    let response = engine.process("what is the meaning of life");

    assert!(response.success);
    assert_eq!(response.intent, IntentType::Unknown);
    assert!(response.confidence <= 0.3);
    assert_eq!(engine.cache_stats().entries, 0);
}

#[test]
fn test_ranking_ties_break_alphabetically() {
    let table = df! {
        "state" => &["Punjab", "Haryana", "Bihar", "Kerala"],
        "crop" => &["Rice", "Rice", "Rice", "Rice"],
        "year" => &[2020i64, 2020, 2020, 2020],
        "production" => &[100.0, 100.0, 50.0, 10.0],
    }
    .unwrap();
    let engine = engine_with(vec![Dataset::new(
        "crop_production",
        table,
        DatasetMetadata::new("crop-prod", "Crop Production Statistics"),
    )]);

    let response = engine.process("Top 2 states by rice production in 2020");
    assert!(response.success);
    assert_eq!(response.intent, IntentType::Ranking);

    let ranked = &response.data["crop_production_ranked"];
    let states: Vec<&str> = ranked
        .data
        .iter()
        .map(|row| row["state"].as_str().unwrap())
        .collect();
    assert_eq!(states, vec!["Haryana", "Punjab"]);
}

#[test]
fn test_trend_with_zero_first_value_has_undefined_growth() {
    let table = df! {
        "state" => &["Punjab", "Punjab", "Punjab"],
        "crop" => &["Rice", "Rice", "Rice"],
        "year" => &[2019i64, 2020, 2021],
        "production" => &[0.0, 10.0, 20.0],
    }
    .unwrap();
    let engine = engine_with(vec![Dataset::new(
        "crop_production",
        table,
        DatasetMetadata::new("crop-prod", "Crop Production Statistics"),
    )]);

    let response = engine.process("Show the trend of rice production in Punjab from 2019 to 2021");
    assert!(response.success);
    assert_eq!(response.intent, IntentType::Trend);
    assert!(response.answer.contains("undefined"));
    assert!(response.confidence <= 0.5);
    assert_eq!(response.visualizations[0].chart, ChartType::Line);
    assert_eq!(response.data["crop_production_trend"].data.len(), 3);

    let growth = samarth_engine::executor::growth(&[]);
    assert_eq!(growth, Growth::InsufficientData);
}

#[test]
fn test_correlation_needs_three_pairs() {
    let production = df! {
        "state" => &["Punjab", "Punjab"],
        "crop" => &["Rice", "Rice"],
        "year" => &[2019i64, 2020],
        "production" => &[11000.0, 12000.0],
    }
    .unwrap();
    let rainfall = df! {
        "state" => &["Punjab", "Punjab", "Punjab"],
        "year" => &[2018i64, 2019, 2020],
        "rainfall" => &[610.0, 580.0, 640.0],
    }
    .unwrap();
    let engine = engine_with(vec![
        Dataset::new(
            "crop_production",
            production,
            DatasetMetadata::new("crop-prod", "Crop Production Statistics"),
        ),
        Dataset::new(
            "rainfall",
            rainfall,
            DatasetMetadata::new("rain", "Sub Divisional Rainfall"),
        ),
    ]);

    let response = engine.process("How does rainfall affect rice production in Punjab?");
    assert!(response.success);
    assert_eq!(response.intent, IntentType::Correlation);
    assert!(response.answer.contains("insufficient data to correlate"));
    assert!(response.confidence <= 0.5);
    assert_eq!(response.citations.len(), 2);
}

#[test]
fn test_missing_metric_is_a_planning_failure() {
    let engine = engine_with(vec![crop_production()]);
    let response = engine.process("What is the average rainfall in Kerala?");

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("planning"));
    assert!(response.confidence <= 0.2);
    assert!(response.citations.is_empty());
}

#[test]
fn test_refresh_makes_new_data_visible() {
    let engine = engine_with(vec![crop_production()]);
    let before = engine.process("Compare rice production between Punjab and Haryana");
    assert!(before.answer.contains("12,000.00"));

    let table = df! {
        "state" => &["Punjab", "Haryana"],
        "crop" => &["Rice", "Rice"],
        "year" => &[2021i64, 2021],
        "production" => &[500.0, 900.0],
    }
    .unwrap();
    engine.refresh_datasets(vec![Dataset::new(
        "crop_production",
        table,
        DatasetMetadata::new("crop-prod", "Crop Production Statistics"),
    )]);

    let after = engine.process("Compare rice production between Punjab and Haryana");
    assert!(!after.cached);
    assert!(after.answer.contains("Haryana has higher production"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_queries_run_once() {
    let engine = Arc::new(engine_with(vec![crop_production()]));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || {
                engine.process("Compare rice production between Punjab and Haryana")
            })
        })
        .collect();

    let mut answers = Vec::new();
    for handle in handles {
        answers.push(handle.await.unwrap());
    }

    assert!(answers.iter().all(|r| r.answer == answers[0].answer));
    assert_eq!(answers.iter().filter(|r| !r.cached).count(), 1);
    let stats = engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
    assert_eq!(engine.metrics().queries, 1);
}

#[test]
fn test_bundled_data_directory_loads() {
    let config = EngineConfig {
        data_dir: std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data"),
        reference_year: Some(2024),
        ..EngineConfig::default()
    };
    let engine = QueryEngine::from_config(config).unwrap();

    let keys: Vec<String> = engine.catalog().describe().into_iter().map(|d| d.key).collect();
    assert_eq!(keys, vec!["crop_production", "market_prices", "rainfall"]);

    let response = engine.process("How does rainfall affect rice production in Punjab?");
    assert!(response.success);
    assert_eq!(response.intent, IntentType::Correlation);
}
