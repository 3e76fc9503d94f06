//! Engine configuration
//!
//! Defaults match the production deployment (1 hour TTL, 100 cached answers,
//! top 5 for rankings). Every field can be overridden from the environment;
//! the binary loads a `.env` file first so local overrides stay out of the shell.

use crate::error::{Result, SamarthError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime of a cached answer
    pub cache_ttl: Duration,
    /// Maximum number of cached answers
    pub cache_capacity: usize,
    /// Where the cache is persisted between runs (None = memory only)
    pub cache_file: Option<PathBuf>,
    /// Default K for ranking questions without an explicit "top N"
    pub top_k: usize,
    /// Year that relative phrases ("last 5 years") resolve against.
    /// None uses the clock's current year.
    pub reference_year: Option<i32>,
    /// Directory holding `datasets.json` and the CSV files it names
    pub data_dir: PathBuf,
    /// Substitute vocabulary table (None = built-in table)
    pub vocabulary_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_file: None,
            top_k: DEFAULT_TOP_K,
            reference_year: None,
            data_dir: PathBuf::from("data"),
            vocabulary_file: None,
        }
    }
}

impl EngineConfig {
    /// Build from defaults plus `SAMARTH_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("SAMARTH_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_parse::<usize>("SAMARTH_CACHE_CAPACITY")? {
            config.cache_capacity = capacity;
        }
        if let Some(path) = env_string("SAMARTH_CACHE_FILE") {
            config.cache_file = Some(PathBuf::from(path));
        }
        if let Some(top_k) = env_parse::<usize>("SAMARTH_TOP_K")? {
            config.top_k = top_k;
        }
        if let Some(year) = env_parse::<i32>("SAMARTH_REFERENCE_YEAR")? {
            config.reference_year = Some(year);
        }
        if let Some(dir) = env_string("SAMARTH_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_string("SAMARTH_VOCABULARY") {
            config.vocabulary_file = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(SamarthError::Config(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(SamarthError::Config("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| SamarthError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache_capacity, 100);
        assert_eq!(config.top_k, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig {
            cache_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SamarthError::Config(_))));
    }
}
