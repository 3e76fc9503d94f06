//! Samarth query engine
//!
//! Answers free-text questions about Indian agricultural and climate
//! statistics: entities are recognized from a gazetteer, the intent is
//! classified by a rule table, a plan is built over the loaded datasets and
//! executed with polars, and the answer comes back templated, charted, cited
//! and cached.

pub mod cache;
pub mod catalog;
pub mod citation;
pub mod clock;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod intent;
pub mod metrics;
pub mod planner;
pub mod query;
pub mod response;
pub mod vocabulary;

pub use cache::{CacheStats, QueryCache};
pub use catalog::{Dataset, DatasetCatalog, DatasetInfo, DatasetMetadata, DatasetSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::QueryEngine;
pub use entities::{EntityExtractor, ExtractedEntities};
pub use error::{Result, SamarthError};
pub use intent::{Intent, IntentClassifier, IntentType};
pub use planner::{QueryPlan, QueryPlanner};
pub use response::QueryResponse;
pub use vocabulary::{Metric, Vocabulary};
