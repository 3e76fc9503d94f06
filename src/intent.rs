//! Intent Classifier
//!
//! Classification is a fixed table of rules. Every rule is evaluated; the
//! weights of the rules that fire are summed per intent and the highest total
//! wins. Ties go to the intent listed first in [`IntentType::PRIORITY`].

use crate::entities::ExtractedEntities;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Below this an answer is treated as a guess
pub const UNKNOWN_CONFIDENCE_CEILING: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Comparison,
    Ranking,
    Trend,
    Correlation,
    Unknown,
}

impl IntentType {
    /// Tie-break order
    pub const PRIORITY: [IntentType; 4] = [
        IntentType::Comparison,
        IntentType::Ranking,
        IntentType::Trend,
        IntentType::Correlation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Comparison => "comparison",
            IntentType::Ranking => "ranking",
            IntentType::Trend => "trend",
            IntentType::Correlation => "correlation",
            IntentType::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            IntentType::Comparison => "Compare a metric across states, crops or years",
            IntentType::Ranking => "Rank states or crops by a metric",
            IntentType::Trend => "Show how a metric changed over a period",
            IntentType::Correlation => "Relate two metrics over shared states and years",
            IntentType::Unknown => "General overview of the matching data",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentType,
    pub confidence: f64,
    /// Names of the rules that fired, in table order
    pub matched_rules: Vec<String>,
}

impl Intent {
    pub fn unknown(confidence: f64) -> Self {
        Self {
            kind: IntentType::Unknown,
            confidence,
            matched_rules: Vec::new(),
        }
    }
}

const COMPARISON_KEYWORDS: &[&str] = &[
    "compare",
    "compared",
    "comparing",
    "comparison",
    "vs",
    "versus",
    "difference between",
];
const RANKING_KEYWORDS: &[&str] = &[
    "highest", "lowest", "top", "most", "least", "rank", "ranking", "best", "worst", "maximum",
    "minimum", "leading",
];
const TREND_KEYWORDS: &[&str] = &[
    "trend",
    "trends",
    "over the years",
    "over time",
    "growth",
    "increase",
    "decline",
];
const CORRELATION_KEYWORDS: &[&str] = &[
    "affect",
    "affects",
    "affected",
    "correlate",
    "correlation",
    "correlated",
    "relationship",
    "impact",
    "influence",
];

/// Normalized text reduced to space-separated words, padded on both sides so
/// keyword phrases match on word boundaries only.
pub struct Signals<'a> {
    words: String,
    pub entities: &'a ExtractedEntities,
}

impl<'a> Signals<'a> {
    pub fn new(normalized: &str, entities: &'a ExtractedEntities) -> Self {
        let words = normalized
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '&'))
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            words: format!(" {} ", words),
            entities,
        }
    }

    pub fn mentions_any(&self, keywords: &[&str]) -> bool {
        keywords
            .iter()
            .any(|kw| self.words.contains(&format!(" {} ", kw)))
    }
}

pub struct Rule {
    pub name: &'static str,
    pub intent: IntentType,
    pub weight: f64,
    pub predicate: fn(&Signals) -> bool,
}

fn comparison_with_values(s: &Signals) -> bool {
    s.mentions_any(COMPARISON_KEYWORDS) && s.entities.multi_valued_dimension().is_some()
}

fn comparison_keyword_only(s: &Signals) -> bool {
    s.mentions_any(COMPARISON_KEYWORDS) && s.entities.multi_valued_dimension().is_none()
}

fn ranking_keyword(s: &Signals) -> bool {
    s.mentions_any(RANKING_KEYWORDS)
}

fn trend_with_range(s: &Signals) -> bool {
    s.mentions_any(TREND_KEYWORDS) && s.entities.resolved_year_range().is_some()
}

fn trend_keyword_only(s: &Signals) -> bool {
    s.mentions_any(TREND_KEYWORDS) && s.entities.resolved_year_range().is_none()
}

fn correlation_with_metrics(s: &Signals) -> bool {
    s.mentions_any(CORRELATION_KEYWORDS) && s.entities.metrics.len() >= 2
}

fn correlation_keyword_only(s: &Signals) -> bool {
    s.mentions_any(CORRELATION_KEYWORDS) && s.entities.metrics.len() < 2
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "comparison_with_values",
        intent: IntentType::Comparison,
        weight: 1.0,
        predicate: comparison_with_values,
    },
    Rule {
        name: "comparison_keyword",
        intent: IntentType::Comparison,
        weight: 0.35,
        predicate: comparison_keyword_only,
    },
    Rule {
        name: "ranking_keyword",
        intent: IntentType::Ranking,
        weight: 0.8,
        predicate: ranking_keyword,
    },
    Rule {
        name: "trend_with_range",
        intent: IntentType::Trend,
        weight: 0.9,
        predicate: trend_with_range,
    },
    Rule {
        name: "trend_keyword",
        intent: IntentType::Trend,
        weight: 0.45,
        predicate: trend_keyword_only,
    },
    Rule {
        name: "correlation_with_metrics",
        intent: IntentType::Correlation,
        weight: 0.95,
        predicate: correlation_with_metrics,
    },
    Rule {
        name: "correlation_keyword",
        intent: IntentType::Correlation,
        weight: 0.4,
        predicate: correlation_keyword_only,
    },
];

/// Share of the pieces a fully answerable question names: a metric, a place
/// or crop, a period.
pub fn completeness(entities: &ExtractedEntities) -> f64 {
    let mut score = 0.0;
    if !entities.metrics.is_empty() {
        score += 0.4;
    }
    if !entities.states.is_empty() || !entities.crops.is_empty() {
        score += 0.4;
    }
    if entities.has_years() {
        score += 0.2;
    }
    score
}

fn round4(value: f64) -> f64 {
    (value.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}

pub struct IntentClassifier {
    rules: &'static [Rule],
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self { rules: RULES }
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, normalized: &str, entities: &ExtractedEntities) -> Intent {
        let signals = Signals::new(normalized, entities);
        let fired: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| (rule.predicate)(&signals))
            .collect();

        let completeness = completeness(entities);
        let mut best: Option<(IntentType, f64)> = None;
        for intent in IntentType::PRIORITY {
            let score: f64 = fired
                .iter()
                .filter(|rule| rule.intent == intent)
                .map(|rule| rule.weight)
                .sum();
            // strictly greater keeps the earlier intent on ties
            if score > 0.0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((intent, score));
            }
        }

        let intent = match best {
            Some((kind, score)) => Intent {
                kind,
                confidence: round4(0.5 * score.min(1.0) + 0.5 * completeness),
                matched_rules: fired
                    .iter()
                    .filter(|rule| rule.intent == kind)
                    .map(|rule| rule.name.to_string())
                    .collect(),
            },
            None => Intent::unknown(round4(0.25 * completeness)),
        };

        debug!(
            "Classified as {} (confidence {:.4}, rules {:?})",
            intent.kind, intent.confidence, intent.matched_rules
        );
        intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EntityExtractor, YearRange};
    use crate::query::Query;
    use crate::vocabulary::{Metric, Vocabulary};
    use chrono::Utc;

    fn classify(text: &str) -> Intent {
        let extractor = EntityExtractor::new(&Vocabulary::builtin());
        let query = Query::new(text, Utc::now());
        let entities = extractor.extract(&query, 2024);
        IntentClassifier::new().classify(&query.normalized, &entities)
    }

    #[test]
    fn test_comparison_scenario() {
        let intent = classify("Compare rice production between Punjab and Haryana");
        assert_eq!(intent.kind, IntentType::Comparison);
        assert!(intent.confidence >= 0.6);
        assert_eq!(intent.confidence, 0.9);
        assert_eq!(intent.matched_rules, vec!["comparison_with_values"]);
    }

    #[test]
    fn test_two_states_with_comparison_keyword_always_compare() {
        for text in [
            "bihar vs assam",
            "kerala versus goa rainfall",
            "which is the highest, punjab or haryana? compare them",
            "compare the top wheat production of gujarat and rajasthan",
        ] {
            assert_eq!(classify(text).kind, IntentType::Comparison, "{}", text);
        }
    }

    #[test]
    fn test_ranking() {
        let intent = classify("Which state has the highest wheat yield?");
        assert_eq!(intent.kind, IntentType::Ranking);
        assert_eq!(intent.matched_rules, vec!["ranking_keyword"]);
    }

    #[test]
    fn test_trend_needs_range_for_full_weight() {
        let with_range = classify("rice production trend in punjab over the last 5 years");
        assert_eq!(with_range.kind, IntentType::Trend);
        assert_eq!(with_range.matched_rules, vec!["trend_with_range"]);

        let without = classify("rice production trend in punjab");
        assert_eq!(without.kind, IntentType::Trend);
        assert!(without.confidence < with_range.confidence);
    }

    #[test]
    fn test_correlation() {
        let intent = classify("How does rainfall affect rice production in Punjab?");
        assert_eq!(intent.kind, IntentType::Correlation);
        assert!(intent.confidence > 0.8);
    }

    #[test]
    fn test_unknown_when_no_rule_fires() {
        let intent = classify("tell me about rice in punjab");
        assert_eq!(intent.kind, IntentType::Unknown);
        assert!(intent.confidence < UNKNOWN_CONFIDENCE_CEILING);

        let empty = classify("");
        assert_eq!(empty.kind, IntentType::Unknown);
        assert_eq!(empty.confidence, 0.0);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        // "topography" must not read as "top", "stopped" not as "top"
        let intent = classify("topography of stopped farms");
        assert_eq!(intent.kind, IntentType::Unknown);
    }

    #[test]
    fn test_rules_are_independent() {
        let entities = ExtractedEntities {
            metrics: vec![Metric::Rainfall, Metric::Production],
            year_range: Some(YearRange::new(2015, 2020)),
            ..Default::default()
        };
        let signals = Signals::new("impact of rainfall on production trend", &entities);
        assert!(correlation_with_metrics(&signals));
        assert!(trend_with_range(&signals));
        assert!(!ranking_keyword(&signals));
        assert!(!comparison_keyword_only(&signals));
    }

    #[test]
    fn test_confidence_is_deterministic() {
        let a = classify("Top 5 states by sugarcane production in 2020");
        let b = classify("  top 5 STATES by sugarcane production in 2020 ");
        assert_eq!(a, b);
    }
}
