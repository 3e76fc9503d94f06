//! Entity Extractor
//!
//! Recognizes states, crops, years and metrics in a normalized question using
//! the gazetteer from [`Vocabulary`]:
//! 1. Word n-grams are matched against the phrase table, longest first, left to
//!    right, never overlapping. A phrase listed under several categories
//!    resolves by priority state > crop > metric.
//! 2. Upper-case abbreviations ("UP", "J&K") are matched on the raw text only,
//!    so the English word "up" is never read as Uttar Pradesh.
//! 3. Leftover single words get a jaro-winkler pass against state names to
//!    absorb common misspellings ("rajastan", "hariyana").
//! 4. Years come last: explicit 4-digit years, explicit ranges and relative
//!    phrases resolved against a reference year.
//!
//! Nothing here fails. A question with no recognizable entity yields empty
//! collections.

use crate::query::Query;
use crate::vocabulary::{Metric, Vocabulary};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strsim::jaro_winkler;
use tracing::debug;

/// Minimum jaro-winkler similarity for a misspelled state name
const FUZZY_STATE_THRESHOLD: f64 = 0.92;
/// Shorter tokens are too ambiguous for fuzzy matching
const FUZZY_MIN_TOKEN_LEN: usize = 5;

lazy_static::lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"[a-z0-9]+(?:&[a-z0-9]+)*|&").unwrap();
    static ref RAW_TOKEN: Regex = Regex::new(r"[A-Za-z0-9]+(?:&[A-Za-z0-9]+)*").unwrap();
    static ref YEAR: Regex = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    static ref EXPLICIT_RANGE: Regex = Regex::new(
        r"\b(?:from|between)\s+(19\d{2}|20\d{2})\s*(?:to|and|till|until|-|–)\s*(19\d{2}|20\d{2})\b"
    ).unwrap();
    static ref DASH_RANGE: Regex = Regex::new(
        r"\b(19\d{2}|20\d{2})\s*(?:-|–|to)\s*(19\d{2}|20\d{2})\b"
    ).unwrap();
    static ref SINCE: Regex = Regex::new(r"\bsince\s+(19\d{2}|20\d{2})\b").unwrap();
    static ref RELATIVE_YEARS: Regex = Regex::new(
        r"\b(?:last|past|previous|recent)\s+(\d{1,2}|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|fifteen|twenty)\s+years?\b"
    ).unwrap();
    static ref DECADE: Regex = Regex::new(r"\b(?:last|past|previous)\s+decade\b").unwrap();
    static ref LAST_YEAR: Regex = Regex::new(r"\blast\s+year\b").unwrap();
    static ref MEAN_HINT: Regex = Regex::new(r"\b(?:average|mean|avg)\b").unwrap();
    static ref SUM_HINT: Regex = Regex::new(r"\b(?:total|sum|overall|combined)\b").unwrap();
    static ref ASCENDING_HINT: Regex = Regex::new(
        r"\b(?:lowest|least|minimum|bottom|worst|smallest|fewest)\b"
    ).unwrap();
    static ref DESCENDING_HINT: Regex = Regex::new(
        r"\b(?:highest|most|maximum|top|best|leading|largest|biggest)\b"
    ).unwrap();
    static ref TOP_K: Regex = Regex::new(
        r"\b(?:top|bottom)\s+(\d{1,2}|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|fifteen|twenty)\b"
    ).unwrap();
    static ref GROUP_HINT: Regex = Regex::new(
        r"\b(?:which|what|by|per|each|across|among)\s+(states?|crops?|years?)\b"
    ).unwrap();
}

/// Dimension a result can be grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    State,
    Crop,
    Year,
}

impl Dimension {
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::State => "state",
            Dimension::Crop => "crop",
            Dimension::Year => "year",
        }
    }

    fn from_word(word: &str) -> Option<Dimension> {
        match word.trim_end_matches('s') {
            "state" => Some(Dimension::State),
            "crop" => Some(Dimension::Crop),
            "year" => Some(Dimension::Year),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Sum,
    Mean,
}

impl Aggregate {
    pub fn label(&self) -> &'static str {
        match self {
            Aggregate::Sum => "total",
            Aggregate::Mean => "average",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

/// Inclusive range of years
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    /// Builds an ordered range whatever order the endpoints came in.
    pub fn new(a: i32, b: i32) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.start && year <= self.end
    }
}

impl std::fmt::Display for YearRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// How the question wants results shaped, independent of what it asks about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryModifiers {
    pub aggregate: Option<Aggregate>,
    pub order: Option<SortOrder>,
    pub top_k: Option<usize>,
    pub group_by: Option<Dimension>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// Canonical state names in order of first mention
    pub states: Vec<String>,
    /// Canonical crop names in order of first mention
    pub crops: Vec<String>,
    /// Explicitly written years, ascending
    pub years: Vec<i32>,
    /// Range from an explicit or relative period phrase
    pub year_range: Option<YearRange>,
    pub metrics: Vec<Metric>,
    pub modifiers: QueryModifiers,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
            && self.crops.is_empty()
            && self.years.is_empty()
            && self.year_range.is_none()
            && self.metrics.is_empty()
    }

    /// The period the question covers: a stated range, or the span of two or
    /// more explicit years.
    pub fn resolved_year_range(&self) -> Option<YearRange> {
        if let Some(range) = self.year_range {
            return Some(range);
        }
        match (self.years.first(), self.years.last()) {
            (Some(first), Some(last)) if self.years.len() >= 2 => {
                Some(YearRange::new(*first, *last))
            }
            _ => None,
        }
    }

    pub fn has_years(&self) -> bool {
        !self.years.is_empty() || self.year_range.is_some()
    }

    /// First dimension (state, crop, year) holding two or more distinct values.
    pub fn multi_valued_dimension(&self) -> Option<Dimension> {
        if self.states.len() >= 2 {
            Some(Dimension::State)
        } else if self.crops.len() >= 2 {
            Some(Dimension::Crop)
        } else if self.years.len() >= 2 {
            Some(Dimension::Year)
        } else {
            None
        }
    }

    /// Human-readable list of what was recognized, for logs and metadata
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.states.is_empty() {
            parts.push(format!("states={}", self.states.join(",")));
        }
        if !self.crops.is_empty() {
            parts.push(format!("crops={}", self.crops.join(",")));
        }
        if !self.metrics.is_empty() {
            parts.push(format!("metrics={}", self.metrics.iter().join(",")));
        }
        if let Some(range) = self.resolved_year_range() {
            parts.push(format!("years={}", range));
        } else if !self.years.is_empty() {
            parts.push(format!("years={}", self.years.iter().join(",")));
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// A gazetteer entry the phrase table resolves to
#[derive(Debug, Clone, PartialEq)]
enum Recognized {
    State(String),
    Crop(String),
    Metric(Metric),
}

impl Recognized {
    /// Lower wins when one phrase belongs to several categories
    fn priority(&self) -> u8 {
        match self {
            Recognized::State(_) => 0,
            Recognized::Crop(_) => 1,
            Recognized::Metric(_) => 2,
        }
    }
}

struct Token<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    TOKEN
        .find_iter(text)
        .map(|m| Token {
            text: m.as_str(),
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

/// Phrase key: the phrase re-tokenized the same way queries are.
fn phrase_key(phrase: &str) -> String {
    let lowered = phrase.to_lowercase();
    tokenize(&lowered).iter().map(|t| t.text).join(" ")
}

fn parse_count(word: &str) -> Option<usize> {
    match word {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "eight" => Some(8),
        "nine" => Some(9),
        "ten" => Some(10),
        "eleven" => Some(11),
        "twelve" => Some(12),
        "fifteen" => Some(15),
        "twenty" => Some(20),
        digits => digits.parse().ok(),
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

pub struct EntityExtractor {
    phrases: HashMap<String, Recognized>,
    max_phrase_tokens: usize,
    abbreviations: HashMap<String, String>,
    /// (lower-case single-word name, canonical state)
    fuzzy_states: Vec<(String, String)>,
}

impl EntityExtractor {
    pub fn new(vocabulary: &Vocabulary) -> Self {
        let mut extractor = Self {
            phrases: HashMap::new(),
            max_phrase_tokens: 1,
            abbreviations: HashMap::new(),
            fuzzy_states: Vec::new(),
        };

        for state in &vocabulary.states {
            extractor.insert(&state.name, Recognized::State(state.name.clone()));
            for alias in &state.aliases {
                extractor.insert(alias, Recognized::State(state.name.clone()));
            }
            for abbreviation in &state.abbreviations {
                extractor
                    .abbreviations
                    .insert(abbreviation.clone(), state.name.clone());
            }
            let lowered = state.name.to_lowercase();
            if !lowered.contains(' ') && lowered.len() >= FUZZY_MIN_TOKEN_LEN {
                extractor.fuzzy_states.push((lowered, state.name.clone()));
            }
        }

        for crop in &vocabulary.crops {
            extractor.insert(&crop.name, Recognized::Crop(crop.name.clone()));
            for synonym in &crop.synonyms {
                extractor.insert(synonym, Recognized::Crop(crop.name.clone()));
            }
        }
        // Plurals go in after every base form so they never shadow one.
        for crop in &vocabulary.crops {
            for form in std::iter::once(&crop.name).chain(crop.synonyms.iter()) {
                let key = phrase_key(form);
                for suffix in ["s", "es"] {
                    let plural = format!("{}{}", key, suffix);
                    if !extractor.phrases.contains_key(&plural) {
                        extractor.insert(&plural, Recognized::Crop(crop.name.clone()));
                    }
                }
            }
        }

        for entry in &vocabulary.metrics {
            for synonym in &entry.synonyms {
                extractor.insert(synonym, Recognized::Metric(entry.metric));
            }
        }

        extractor
    }

    fn insert(&mut self, phrase: &str, recognized: Recognized) {
        let key = phrase_key(phrase);
        if key.is_empty() {
            return;
        }
        let tokens = key.split(' ').count();
        let replace = match self.phrases.get(&key) {
            Some(existing) => recognized.priority() < existing.priority(),
            None => true,
        };
        if replace {
            self.max_phrase_tokens = self.max_phrase_tokens.max(tokens);
            self.phrases.insert(key, recognized);
        }
    }

    /// Extract entities from a question. `reference_year` anchors relative
    /// phrases such as "last 5 years".
    pub fn extract(&self, query: &Query, reference_year: i32) -> ExtractedEntities {
        let mut entities = ExtractedEntities::default();
        if query.is_blank() {
            return entities;
        }

        let text = query.normalized.as_str();
        let tokens = tokenize(text);
        let mut covered: Vec<(usize, usize)> = Vec::new();
        let mut leftovers: Vec<&str> = Vec::new();

        let mut i = 0;
        while i < tokens.len() {
            let longest = self.max_phrase_tokens.min(tokens.len() - i);
            let hit = (1..=longest).rev().find_map(|n| {
                let phrase = tokens[i..i + n].iter().map(|t| t.text).join(" ");
                self.phrases.get(&phrase).map(|recognized| (n, recognized))
            });

            match hit {
                Some((n, recognized)) => {
                    covered.push((tokens[i].start, tokens[i + n - 1].end));
                    self.record(&mut entities, recognized);
                    i += n;
                }
                None => {
                    leftovers.push(tokens[i].text);
                    i += 1;
                }
            }
        }

        for raw_token in RAW_TOKEN.find_iter(&query.raw) {
            if let Some(state) = self.abbreviations.get(raw_token.as_str()) {
                push_unique(&mut entities.states, state.clone());
            }
        }

        for word in leftovers {
            if let Some(state) = self.fuzzy_state(word) {
                debug!("Fuzzy matched '{}' to state {}", word, state);
                push_unique(&mut entities.states, state);
            }
        }

        self.extract_years(text, &covered, reference_year, &mut entities);
        entities.modifiers = extract_modifiers(text);

        debug!("Extracted entities: {}", entities.summary());
        entities
    }

    fn record(&self, entities: &mut ExtractedEntities, recognized: &Recognized) {
        match recognized {
            Recognized::State(name) => push_unique(&mut entities.states, name.clone()),
            Recognized::Crop(name) => push_unique(&mut entities.crops, name.clone()),
            Recognized::Metric(metric) => push_unique(&mut entities.metrics, *metric),
        }
    }

    fn fuzzy_state(&self, word: &str) -> Option<String> {
        if word.len() < FUZZY_MIN_TOKEN_LEN || !word.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        self.fuzzy_states
            .iter()
            .map(|(name, canonical)| (jaro_winkler(word, name), canonical))
            .filter(|(score, _)| *score >= FUZZY_STATE_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, canonical)| canonical.clone())
    }

    fn extract_years(
        &self,
        text: &str,
        covered: &[(usize, usize)],
        reference_year: i32,
        entities: &mut ExtractedEntities,
    ) {
        let overlaps = |start: usize, end: usize| {
            covered.iter().any(|(s, e)| start < *e && end > *s)
        };

        let mut years: Vec<i32> = YEAR
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .filter(|m| !overlaps(m.start(), m.end()))
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        years.sort_unstable();
        years.dedup();
        entities.years = years;

        entities.year_range = explicit_range(text)
            .or_else(|| relative_range(text, reference_year))
            .or_else(|| {
                SINCE
                    .captures(text)
                    .and_then(|caps| caps[1].parse::<i32>().ok())
                    .map(|start| YearRange::new(start, reference_year))
            })
            .or_else(|| {
                LAST_YEAR
                    .is_match(text)
                    .then(|| YearRange::new(reference_year - 1, reference_year - 1))
            });
    }
}

fn explicit_range(text: &str) -> Option<YearRange> {
    EXPLICIT_RANGE
        .captures(text)
        .or_else(|| DASH_RANGE.captures(text))
        .and_then(|caps| {
            let start = caps[1].parse::<i32>().ok()?;
            let end = caps[2].parse::<i32>().ok()?;
            Some(YearRange::new(start, end))
        })
}

fn relative_range(text: &str, reference_year: i32) -> Option<YearRange> {
    let span = RELATIVE_YEARS
        .captures(text)
        .and_then(|caps| parse_count(&caps[1]))
        .or_else(|| DECADE.is_match(text).then_some(10))?;
    if span == 0 {
        return None;
    }
    Some(YearRange::new(reference_year - span as i32 + 1, reference_year))
}

fn extract_modifiers(text: &str) -> QueryModifiers {
    let aggregate = if MEAN_HINT.is_match(text) {
        Some(Aggregate::Mean)
    } else if SUM_HINT.is_match(text) {
        Some(Aggregate::Sum)
    } else {
        None
    };

    // When both directions appear, the earlier word wins.
    let ascending = ASCENDING_HINT.find(text).map(|m| m.start());
    let descending = DESCENDING_HINT.find(text).map(|m| m.start());
    let order = match (ascending, descending) {
        (Some(a), Some(d)) if a < d => Some(SortOrder::Ascending),
        (Some(_), None) => Some(SortOrder::Ascending),
        (_, Some(_)) => Some(SortOrder::Descending),
        (None, None) => None,
    };

    let top_k = TOP_K
        .captures(text)
        .and_then(|caps| parse_count(&caps[1]))
        .filter(|k| *k > 0);

    let group_by = GROUP_HINT
        .captures(text)
        .and_then(|caps| Dimension::from_word(&caps[1]));

    QueryModifiers {
        aggregate,
        order,
        top_k,
        group_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn extract(text: &str) -> ExtractedEntities {
        let extractor = EntityExtractor::new(&Vocabulary::builtin());
        extractor.extract(&Query::new(text, Utc::now()), 2024)
    }

    #[test]
    fn test_comparison_scenario() {
        let entities = extract("Compare rice production between Punjab and Haryana");
        assert_eq!(entities.states, vec!["Punjab", "Haryana"]);
        assert_eq!(entities.crops, vec!["Rice"]);
        assert_eq!(entities.metrics, vec![Metric::Production]);
        assert!(entities.years.is_empty());
        assert_eq!(entities.multi_valued_dimension(), Some(Dimension::State));
    }

    #[test]
    fn test_empty_query_yields_empty_entities() {
        let entities = extract("");
        assert!(entities.is_empty());
        assert_eq!(entities.modifiers, QueryModifiers::default());
    }

    #[test]
    fn test_no_match_is_not_an_error() {
        let entities = extract("hello there, how are you?");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_multi_word_states_and_aliases() {
        let entities = extract("wheat yield in uttar pradesh, orissa and new delhi");
        assert_eq!(entities.states, vec!["Uttar Pradesh", "Odisha", "Delhi"]);
        assert_eq!(entities.metrics, vec![Metric::Yield]);
    }

    #[test]
    fn test_abbreviation_is_case_sensitive() {
        let upper = extract("rice production in UP and MP");
        assert_eq!(upper.states, vec!["Uttar Pradesh", "Madhya Pradesh"]);

        let lower = extract("has rice production gone up");
        assert!(lower.states.is_empty());
    }

    #[test]
    fn test_crop_synonyms_and_plurals() {
        let entities = extract("paddy and potatoes and sweet potatoes in bihar");
        assert_eq!(entities.crops, vec!["Rice", "Potato", "Sweet Potato"]);
    }

    #[test]
    fn test_longest_match_wins() {
        // "bengal gram" is a crop, "bengal" alone would be West Bengal
        let entities = extract("bengal gram production in rajasthan");
        assert_eq!(entities.crops, vec!["Gram"]);
        assert_eq!(entities.states, vec!["Rajasthan"]);
    }

    #[test]
    fn test_state_beats_crop_on_shared_phrase() {
        let vocab = Vocabulary::from_json_str(
            r#"{
                "version": 2,
                "states": [{"name": "Goa"}],
                "crops": [{"name": "Goa Bean", "synonyms": ["goa"]}],
                "metrics": []
            }"#,
        )
        .unwrap();
        let extractor = EntityExtractor::new(&vocab);
        let entities = extractor.extract(&Query::new("cashew in goa", Utc::now()), 2024);
        assert_eq!(entities.states, vec!["Goa"]);
        assert!(entities.crops.is_empty());
    }

    #[test]
    fn test_fuzzy_state_names() {
        let entities = extract("rainfall in rajastan and hariyana");
        assert_eq!(entities.states, vec!["Rajasthan", "Haryana"]);
    }

    #[test]
    fn test_fuzzy_does_not_fire_on_common_words() {
        let entities = extract("compare the highest production between states");
        assert!(entities.states.is_empty());
    }

    #[test]
    fn test_explicit_years_and_range() {
        let entities = extract("wheat production from 2015 to 2019");
        assert_eq!(entities.years, vec![2015, 2019]);
        assert_eq!(entities.year_range, Some(YearRange::new(2015, 2019)));
    }

    #[test]
    fn test_dash_range_is_ordered() {
        let entities = extract("rainfall 2020-2016");
        assert_eq!(entities.year_range, Some(YearRange { start: 2016, end: 2020 }));
    }

    #[test]
    fn test_relative_years_resolve_against_reference() {
        let entities = extract("rice production trend over the last 5 years");
        assert_eq!(entities.year_range, Some(YearRange::new(2020, 2024)));
        assert!(entities.years.is_empty());

        let decade = extract("rainfall in the past decade");
        assert_eq!(decade.year_range, Some(YearRange::new(2015, 2024)));

        let words = extract("maize output over the past three years");
        assert_eq!(words.year_range, Some(YearRange::new(2022, 2024)));
    }

    #[test]
    fn test_two_explicit_years_resolve_to_range() {
        let entities = extract("cotton area in 2016 and 2019");
        assert_eq!(entities.year_range, None);
        assert_eq!(entities.resolved_year_range(), Some(YearRange::new(2016, 2019)));
    }

    #[test]
    fn test_modifiers() {
        let entities = extract("which states have the lowest average wheat yield? show top 3");
        assert_eq!(entities.modifiers.aggregate, Some(Aggregate::Mean));
        assert_eq!(entities.modifiers.order, Some(SortOrder::Ascending));
        assert_eq!(entities.modifiers.top_k, Some(3));
        assert_eq!(entities.modifiers.group_by, Some(Dimension::State));
    }

    #[test]
    fn test_multiple_metrics_for_correlation() {
        let entities = extract("how does rainfall affect rice production");
        assert_eq!(entities.metrics, vec![Metric::Rainfall, Metric::Production]);
    }
}
