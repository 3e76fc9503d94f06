//! Vocabulary - gazetteer and keyword tables
//!
//! The entity extractor never hard-codes names. Everything it recognizes comes
//! from a versioned `Vocabulary`, either the built-in table below or a JSON file
//! with the same shape, so deployments and tests can substitute their own lists.

use crate::error::{Result, SamarthError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version of the built-in table. Bump when names or synonyms change so cached
/// vocabularies on disk can be told apart.
pub const BUILTIN_VOCABULARY_VERSION: u32 = 1;

/// Measurable quantities a question can ask about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Production,
    Yield,
    Area,
    Rainfall,
    Price,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Production,
        Metric::Yield,
        Metric::Area,
        Metric::Rainfall,
        Metric::Price,
    ];

    /// Standardized column name holding this metric in a dataset
    pub fn column(&self) -> &'static str {
        match self {
            Metric::Production => "production",
            Metric::Yield => "yield",
            Metric::Area => "area",
            Metric::Rainfall => "rainfall",
            Metric::Price => "price",
        }
    }

    /// Crop-specific metrics are filtered by crop; rainfall is not.
    pub fn is_crop_specific(&self) -> bool {
        !matches!(self, Metric::Rainfall)
    }

    /// Extensive quantities add up across groups, intensive ones are averaged.
    pub fn is_additive(&self) -> bool {
        matches!(self, Metric::Production | Metric::Area)
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Production => "tonnes",
            Metric::Yield => "kg/ha",
            Metric::Area => "hectares",
            Metric::Rainfall => "mm",
            Metric::Price => "Rs/quintal",
        }
    }

    pub fn from_column(column: &str) -> Option<Metric> {
        Metric::ALL.iter().copied().find(|m| m.column() == column)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    /// Canonical name, as it appears in standardized datasets
    pub name: String,
    /// Lower-case alternative spellings and historical names
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Upper-case abbreviations, matched case-sensitively on the raw query
    #[serde(default)]
    pub abbreviations: Vec<String>,
    #[serde(default)]
    pub union_territory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropEntry {
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub metric: Metric,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    pub version: u32,
    pub states: Vec<StateEntry>,
    pub crops: Vec<CropEntry>,
    pub metrics: Vec<MetricEntry>,
}

type StateRow = (&'static str, &'static [&'static str], &'static [&'static str], bool);
type CropRow = (&'static str, &'static [&'static str]);

const STATES: &[StateRow] = &[
    ("Andhra Pradesh", &[], &["AP"], false),
    ("Arunachal Pradesh", &["arunachal"], &[], false),
    ("Assam", &[], &[], false),
    ("Bihar", &[], &[], false),
    ("Chhattisgarh", &["chattisgarh", "chhatisgarh"], &["CG"], false),
    ("Goa", &[], &[], false),
    ("Gujarat", &["gujrat"], &[], false),
    ("Haryana", &[], &[], false),
    ("Himachal Pradesh", &["himachal"], &["HP"], false),
    ("Jharkhand", &[], &[], false),
    ("Karnataka", &[], &[], false),
    ("Kerala", &[], &[], false),
    ("Madhya Pradesh", &[], &["MP"], false),
    ("Maharashtra", &["maharastra"], &[], false),
    ("Manipur", &[], &[], false),
    ("Meghalaya", &[], &[], false),
    ("Mizoram", &[], &[], false),
    ("Nagaland", &[], &[], false),
    ("Odisha", &["orissa"], &[], false),
    ("Punjab", &[], &[], false),
    ("Rajasthan", &[], &[], false),
    ("Sikkim", &[], &[], false),
    ("Tamil Nadu", &["tamilnadu"], &["TN"], false),
    ("Telangana", &["telengana"], &[], false),
    ("Tripura", &[], &[], false),
    ("Uttar Pradesh", &[], &["UP"], false),
    ("Uttarakhand", &["uttaranchal"], &[], false),
    ("West Bengal", &["bengal"], &["WB"], false),
    (
        "Andaman and Nicobar Islands",
        &["andaman & nicobar islands", "andaman and nicobar", "andaman"],
        &[],
        true,
    ),
    ("Chandigarh", &[], &[], true),
    (
        "Dadra and Nagar Haveli and Daman and Diu",
        &["dadra and nagar haveli", "daman and diu"],
        &[],
        true,
    ),
    ("Delhi", &["new delhi", "nct of delhi"], &[], true),
    (
        "Jammu and Kashmir",
        &["jammu & kashmir", "jammu kashmir", "j&k", "kashmir"],
        &["J&K", "JK"],
        true,
    ),
    ("Ladakh", &[], &[], true),
    ("Lakshadweep", &[], &[], true),
    ("Puducherry", &["pondicherry"], &[], true),
];

const CROPS: &[CropRow] = &[
    ("Rice", &["paddy"]),
    ("Wheat", &[]),
    ("Maize", &["corn"]),
    ("Barley", &[]),
    ("Bajra", &["pearl millet"]),
    ("Jowar", &["sorghum"]),
    ("Ragi", &["finger millet"]),
    ("Small Millets", &["millet"]),
    ("Sugarcane", &["sugar cane"]),
    ("Cotton", &["kapas"]),
    ("Jute", &[]),
    ("Tea", &[]),
    ("Coffee", &[]),
    ("Coconut", &[]),
    ("Groundnut", &["peanut"]),
    ("Sesame", &["sesamum", "gingelly"]),
    ("Rapeseed", &["rape", "colza"]),
    ("Mustard", &["sarson"]),
    ("Linseed", &["flaxseed"]),
    ("Castor", &["castor seed"]),
    ("Sunflower", &[]),
    ("Safflower", &[]),
    ("Niger", &["niger seed"]),
    ("Soybean", &["soyabean", "soya", "soy"]),
    ("Arhar", &["tur", "toor", "pigeon pea"]),
    ("Moong", &["green gram", "mung"]),
    ("Urad", &["black gram"]),
    ("Masoor", &["lentil"]),
    ("Gram", &["chickpea", "chana", "bengal gram"]),
    ("Khesari", &[]),
    ("Onion", &[]),
    ("Potato", &[]),
    ("Sweet Potato", &[]),
    ("Tapioca", &["cassava"]),
    ("Banana", &[]),
    ("Mango", &[]),
    ("Citrus", &[]),
    ("Apple", &[]),
    ("Grapes", &["grape"]),
    ("Pomegranate", &[]),
    ("Cashew", &["cashewnut"]),
    ("Cardamom", &[]),
    ("Black Pepper", &["pepper"]),
    ("Turmeric", &["haldi"]),
    ("Ginger", &[]),
    ("Coriander", &["dhaniya"]),
    ("Cumin", &["jeera"]),
    ("Fennel", &[]),
    ("Fenugreek", &["methi"]),
    ("Tomato", &[]),
];

const METRICS: &[(Metric, &[&str])] = &[
    (
        Metric::Production,
        &["production", "produce", "produces", "produced", "producing", "output", "harvest"],
    ),
    (Metric::Yield, &["yield", "yields", "productivity"]),
    (
        Metric::Area,
        &["area", "acreage", "cultivated area", "sown area", "hectares"],
    ),
    (
        Metric::Rainfall,
        &["rainfall", "rain", "rains", "precipitation", "monsoon"],
    ),
    (
        Metric::Price,
        &["price", "prices", "market price", "mandi price", "modal price", "cost"],
    ),
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

lazy_static::lazy_static! {
    static ref BUILTIN: Vocabulary = Vocabulary {
        version: BUILTIN_VOCABULARY_VERSION,
        states: STATES
            .iter()
            .map(|(name, aliases, abbreviations, ut)| StateEntry {
                name: name.to_string(),
                aliases: owned(aliases),
                abbreviations: owned(abbreviations),
                union_territory: *ut,
            })
            .collect(),
        crops: CROPS
            .iter()
            .map(|(name, synonyms)| CropEntry {
                name: name.to_string(),
                synonyms: owned(synonyms),
            })
            .collect(),
        metrics: METRICS
            .iter()
            .map(|(metric, synonyms)| MetricEntry {
                metric: *metric,
                synonyms: owned(synonyms),
            })
            .collect(),
    };
}

impl Vocabulary {
    /// The table shipped with the engine
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let vocabulary: Vocabulary = serde_json::from_str(raw)
            .map_err(|e| SamarthError::Vocabulary(format!("Invalid vocabulary table: {}", e)))?;
        vocabulary.validate()?;
        Ok(vocabulary)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SamarthError::Vocabulary(format!("Failed to read vocabulary {:?}: {}", path, e))
        })?;
        Self::from_json_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if let Some(state) = self.states.iter().find(|s| s.name.trim().is_empty()) {
            return Err(SamarthError::Vocabulary(format!(
                "State entry with empty name (aliases: {:?})",
                state.aliases
            )));
        }
        if let Some(crop) = self.crops.iter().find(|c| c.name.trim().is_empty()) {
            return Err(SamarthError::Vocabulary(format!(
                "Crop entry with empty name (synonyms: {:?})",
                crop.synonyms
            )));
        }
        Ok(())
    }

    pub fn state_names(&self) -> Vec<&str> {
        self.states.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn crop_names(&self) -> Vec<&str> {
        self.crops.iter().map(|c| c.name.as_str()).collect()
    }
}
