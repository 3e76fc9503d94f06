//! Query Engine
//!
//! Orchestrates the pipeline for one question:
//! normalize → fingerprint → cache → extract → classify → plan → execute →
//! synthesize → cache. Every outcome, including failures, is returned as a
//! [`QueryResponse`]; `process` has no error path.
//!
//! Concurrent requests for the same fingerprint are single-flighted: the
//! first runs the pipeline while the rest wait on a per-fingerprint guard and
//! then find the published answer in the cache.

use crate::cache::{CacheStats, QueryCache};
use crate::catalog::{Dataset, DatasetCatalog, DatasetSnapshot};
use crate::citation::CitationBuilder;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::entities::{EntityExtractor, ExtractedEntities};
use crate::error::{Result, SamarthError};
use crate::executor::DataExecutor;
use crate::ingest;
use crate::intent::{Intent, IntentClassifier};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::planner::QueryPlanner;
use crate::query::Query;
use crate::response::{self, QueryResponse, ResponseMetadata, ResponseSynthesizer};
use crate::vocabulary::Vocabulary;
use chrono::Datelike;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Confidence ceiling for answers the planner could not produce
const PLANNING_FAILURE_CONFIDENCE: f64 = 0.2;
/// Questions with nothing recognizable are counted under this class
const INPUT_ERROR_CLASS: &str = "input";

pub struct QueryEngine {
    config: EngineConfig,
    vocabulary: Vocabulary,
    extractor: EntityExtractor,
    classifier: IntentClassifier,
    planner: QueryPlanner,
    executor: DataExecutor,
    catalog: DatasetCatalog,
    cache: QueryCache<QueryResponse>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    clock: Arc<dyn Clock>,
    metrics: EngineMetrics,
}

/// A response plus whether it may be cached
struct Answer {
    response: QueryResponse,
    cacheable: bool,
}

impl QueryEngine {
    pub fn new(
        config: EngineConfig,
        vocabulary: Vocabulary,
        datasets: Vec<Dataset>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = match &config.cache_file {
            Some(path) => QueryCache::persistent(
                config.cache_ttl,
                config.cache_capacity,
                clock.clone(),
                path.clone(),
            ),
            None => QueryCache::new(config.cache_ttl, config.cache_capacity, clock.clone()),
        };

        info!(
            "🚀 Query engine ready: {} states, {} crops, vocabulary v{}",
            vocabulary.states.len(),
            vocabulary.crops.len(),
            vocabulary.version
        );

        Ok(Self {
            extractor: EntityExtractor::new(&vocabulary),
            classifier: IntentClassifier::new(),
            planner: QueryPlanner::new(config.top_k),
            executor: DataExecutor::new(),
            catalog: DatasetCatalog::new(datasets),
            cache,
            in_flight: DashMap::new(),
            clock,
            metrics: EngineMetrics::new(),
            vocabulary,
            config,
        })
    }

    /// Engine over the datasets in `config.data_dir`, using the configured
    /// vocabulary and the wall clock.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let vocabulary = match &config.vocabulary_file {
            Some(path) => Vocabulary::from_json_file(path)?,
            None => Vocabulary::builtin(),
        };
        let datasets = ingest::load_manifest(&config.data_dir)?;
        Self::new(config, vocabulary, datasets, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.catalog
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!("🧹 Cleared {} cached answers", removed);
        removed
    }

    /// Swap in new datasets. Cached answers were computed against the old
    /// data, so the cache is cleared too.
    pub fn refresh_datasets(&self, datasets: Vec<Dataset>) -> u64 {
        let generation = self.catalog.replace(datasets);
        self.cache.clear();
        generation
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Answer a question. Never fails: problems come back as a response with
    /// `success = false` and an `error` class.
    pub fn process(&self, text: &str) -> QueryResponse {
        let started = Instant::now();
        let query = Query::new(text, self.clock.now());
        let fingerprint = query.fingerprint();

        if query.is_blank() {
            debug!("Blank query, returning prompt");
            self.metrics.record_error(INPUT_ERROR_CLASS);
            return self.prompt(
                &query,
                &fingerprint,
                ExtractedEntities::default(),
                Intent::unknown(0.0),
                response::prompt_answer(),
                started,
            );
        }

        let slot = self
            .in_flight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let response = {
            let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            match self
                .cache
                .get_for_generation(&fingerprint, self.catalog.generation())
            {
                Some(mut hit) => {
                    self.metrics.record_cache_hit();
                    info!("⚡ Cache hit for '{}'", query.raw);
                    hit.cached = true;
                    hit.query = query.raw.clone();
                    hit
                }
                None => {
                    let snapshot = self.catalog.snapshot();
                    let answer = self.run(&query, &fingerprint, &snapshot, started);
                    if answer.cacheable {
                        // a refresh can still land after this check; the entry
                        // keeps its generation so later lookups reject it
                        if snapshot.generation == self.catalog.generation() {
                            self.cache.put_for_generation(
                                &fingerprint,
                                answer.response.clone(),
                                snapshot.generation,
                            );
                        } else {
                            debug!(
                                "Snapshot {} superseded, not caching '{}'",
                                snapshot.generation, query.raw
                            );
                        }
                    }
                    answer.response
                }
            }
        };

        self.in_flight
            .remove_if(&fingerprint, |_, current| Arc::strong_count(current) <= 2);
        response
    }

    fn run(
        &self,
        query: &Query,
        fingerprint: &str,
        snapshot: &DatasetSnapshot,
        started: Instant,
    ) -> Answer {
        info!("Processing query: {}", query.raw);
        let reference_year = self
            .config
            .reference_year
            .unwrap_or_else(|| query.received_at.year());
        let entities = self.extractor.extract(query, reference_year);
        let intent = self.classifier.classify(&query.normalized, &entities);
        self.metrics.record_intent(intent.kind.as_str());
        info!(
            "🎯 Intent {} ({:.2}) with {}",
            intent.kind,
            intent.confidence,
            entities.summary()
        );

        if entities.is_empty() && intent.matched_rules.is_empty() {
            self.metrics.record_error(INPUT_ERROR_CLASS);
            return Answer {
                response: self.prompt(
                    query,
                    fingerprint,
                    entities,
                    intent,
                    response::unrecognized_answer(),
                    started,
                ),
                cacheable: false,
            };
        }

        let plan = match self.planner.plan(&intent, &entities, snapshot) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Planning failed for '{}': {}", query.raw, e);
                let answer = match &e {
                    SamarthError::Planning(reason) => response::planning_failure_answer(reason),
                    _ => response::execution_failure_answer(),
                };
                let confidence = intent.confidence.min(PLANNING_FAILURE_CONFIDENCE);
                return self.failure(
                    query,
                    fingerprint,
                    entities,
                    intent,
                    &e,
                    answer,
                    confidence,
                    started,
                );
            }
        };
        for metric in plan.operation.metrics() {
            self.metrics.record_metric_usage(metric.column());
        }

        let result = match self.executor.execute(&plan, snapshot) {
            Ok(result) => result,
            Err(e) => {
                warn!("Execution failed for '{}': {}", query.raw, e);
                let confidence = round4(intent.confidence * 0.5);
                return self.failure(
                    query,
                    fingerprint,
                    entities,
                    intent,
                    &e,
                    response::execution_failure_answer(),
                    confidence,
                    started,
                );
            }
        };

        let citations = CitationBuilder::build(&result, snapshot, self.clock.now());
        let synthesis = ResponseSynthesizer::synthesize(&plan, &intent, &result);
        let elapsed = started.elapsed().as_millis() as u64;
        self.metrics
            .record_execution_time(intent.kind.as_str(), elapsed);
        info!(
            "✅ Answered '{}' in {}ms from {:?}",
            query.raw,
            elapsed,
            plan.dataset_keys()
        );

        Answer {
            response: QueryResponse {
                success: true,
                query: query.raw.clone(),
                answer: synthesis.answer,
                intent: intent.kind,
                confidence: synthesis.confidence,
                cached: false,
                error: None,
                data: synthesis.data,
                visualizations: synthesis.visualizations,
                citations,
                metadata: ResponseMetadata {
                    query_id: query.id.to_string(),
                    fingerprint: fingerprint.to_string(),
                    query_type: intent.kind,
                    intent_description: intent.kind.description().to_string(),
                    entities,
                    datasets_used: plan.dataset_keys().iter().map(|k| k.to_string()).collect(),
                    processing_time_ms: elapsed,
                },
            },
            cacheable: true,
        }
    }

    /// Graceful answer for a question with nothing to work on
    fn prompt(
        &self,
        query: &Query,
        fingerprint: &str,
        entities: ExtractedEntities,
        intent: Intent,
        answer: String,
        started: Instant,
    ) -> QueryResponse {
        QueryResponse {
            success: true,
            query: query.raw.clone(),
            answer,
            intent: intent.kind,
            confidence: intent.confidence,
            cached: false,
            error: None,
            data: BTreeMap::new(),
            visualizations: Vec::new(),
            citations: Vec::new(),
            metadata: ResponseMetadata {
                query_id: query.id.to_string(),
                fingerprint: fingerprint.to_string(),
                query_type: intent.kind,
                intent_description: intent.kind.description().to_string(),
                entities,
                datasets_used: Vec::new(),
                processing_time_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn failure(
        &self,
        query: &Query,
        fingerprint: &str,
        entities: ExtractedEntities,
        intent: Intent,
        error: &SamarthError,
        answer: String,
        confidence: f64,
        started: Instant,
    ) -> Answer {
        self.metrics.record_error(error.class());
        let mut response = self.prompt(query, fingerprint, entities, intent, answer, started);
        response.success = false;
        response.confidence = confidence;
        response.error = Some(error.class().to_string());
        Answer {
            response,
            cacheable: false,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}
