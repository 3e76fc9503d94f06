//! Citation Builder - one citation per dataset a result actually read.

use crate::catalog::DatasetSnapshot;
use crate::executor::ResultSet;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Age bucket of a dataset's `last_updated` date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    Current,
    Recent,
    Moderate,
    Older,
    Historical,
    Unknown,
}

impl Freshness {
    pub fn from_age_days(days: i64) -> Self {
        match days {
            d if d <= 0 => Freshness::Current,
            1..=7 => Freshness::Recent,
            8..=30 => Freshness::Moderate,
            31..=365 => Freshness::Older,
            _ => Freshness::Historical,
        }
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn parse_last_updated(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.contains('T') {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).date_naive())
    } else {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }
}

/// Freshness bucket and age in days. Future dates count as current.
pub fn freshness(last_updated: &str, now: DateTime<Utc>) -> (Freshness, Option<i64>) {
    match parse_last_updated(last_updated) {
        Some(date) => {
            let age = (now.date_naive() - date).num_days().max(0);
            (Freshness::from_age_days(age), Some(age))
        }
        None => (Freshness::Unknown, None),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub dataset_id: String,
    pub dataset_name: String,
    pub source_organization: String,
    pub publisher: String,
    pub url: String,
    pub license: String,
    pub data_quality: String,
    pub update_frequency: String,
    pub records_analyzed: usize,
    pub total_records_available: usize,
    pub data_freshness: Freshness,
    pub data_age_days: Option<i64>,
    pub accessed_date: String,
    pub accessed_time: String,
    pub variables_used: Vec<String>,
}

pub struct CitationBuilder;

impl CitationBuilder {
    /// Citations in provenance order. Datasets missing from the snapshot are
    /// skipped; the executor never reports one.
    pub fn build(
        result: &ResultSet,
        snapshot: &DatasetSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Citation> {
        let mut seen = std::collections::HashSet::new();
        result
            .provenance
            .iter()
            .filter(|p| seen.insert(p.dataset.clone()))
            .filter_map(|p| {
                let dataset = snapshot.get(&p.dataset)?;
                let metadata = &dataset.metadata;
                let (data_freshness, data_age_days) = freshness(&metadata.last_updated, now);
                Some(Citation {
                    dataset_id: metadata.id.clone(),
                    dataset_name: metadata.name.clone(),
                    source_organization: metadata.source_organization.clone(),
                    publisher: metadata.publisher.clone(),
                    url: metadata.url.clone(),
                    license: metadata.license.clone(),
                    data_quality: metadata.data_quality.clone(),
                    update_frequency: metadata.update_frequency.clone(),
                    records_analyzed: p.rows_used.min(p.rows_total),
                    total_records_available: p.rows_total,
                    data_freshness,
                    data_age_days,
                    accessed_date: now.format("%Y-%m-%d").to_string(),
                    accessed_time: now.format("%H:%M:%S UTC").to_string(),
                    variables_used: p.columns_used.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_freshness_buckets() {
        let cases = [
            ("2024-06-30", Freshness::Current, 0),
            ("2024-07-15", Freshness::Current, 0),
            ("2024-06-29", Freshness::Recent, 1),
            ("2024-06-23", Freshness::Recent, 7),
            ("2024-06-22", Freshness::Moderate, 8),
            ("2024-05-31", Freshness::Moderate, 30),
            ("2024-05-30", Freshness::Older, 31),
            ("2023-07-01", Freshness::Older, 365),
            ("2023-06-30", Freshness::Historical, 366),
        ];
        for (date, bucket, age) in cases {
            assert_eq!(freshness(date, now()), (bucket, Some(age)), "{}", date);
        }
    }

    #[test]
    fn test_rfc3339_and_garbage() {
        assert_eq!(
            freshness("2024-06-25T08:00:00Z", now()),
            (Freshness::Recent, Some(5))
        );
        assert_eq!(freshness("last spring", now()), (Freshness::Unknown, None));
        assert_eq!(freshness("", now()), (Freshness::Unknown, None));
    }

    #[test]
    fn test_freshness_serializes_as_bucket_name() {
        assert_eq!(
            serde_json::to_string(&Freshness::Historical).unwrap(),
            "\"Historical\""
        );
    }
}
