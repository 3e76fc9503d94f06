//! Incoming question, its normalized form and cache fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    /// Text exactly as received
    pub raw: String,
    /// Lower-cased, whitespace-collapsed text every stage works on
    pub normalized: String,
    pub received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(raw: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw: raw.to_string(),
            normalized: normalize(raw),
            received_at,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.normalized.is_empty()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_normalized(&self.normalized)
    }
}

/// Lower-case, collapse runs of whitespace, trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key of a question: SHA-256 of its normalized text, hex encoded.
pub fn fingerprint(text: &str) -> String {
    fingerprint_normalized(&normalize(text))
}

fn fingerprint_normalized(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize("  Compare  RICE\tproduction\n"),
            "compare rice production"
        );
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_fingerprint_is_case_and_whitespace_insensitive() {
        let a = fingerprint("Compare rice production between Punjab and Haryana");
        let b = fingerprint("  compare RICE   production between punjab and HARYANA ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_for_different_questions() {
        assert_ne!(fingerprint("rice in punjab"), fingerprint("wheat in punjab"));
    }

    #[test]
    fn test_query_fingerprint_matches_free_function() {
        let query = Query::new("Top 5 States", Utc::now());
        assert_eq!(query.fingerprint(), fingerprint("top 5 states"));
        assert!(!query.is_blank());
    }
}
