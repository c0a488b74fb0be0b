use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EngineError;

/// Bird sex as recorded by the flock keeper
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    pub fn from_string(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" | "rooster" | "cock" | "cockerel" => Gender::Male,
            "female" | "f" | "hen" | "pullet" => Gender::Female,
            _ => Gender::Unknown,
        }
    }

    /// The gender a mate must have, if it can be known
    pub fn opposite(&self) -> Option<Gender> {
        match self {
            Gender::Male => Some(Gender::Female),
            Gender::Female => Some(Gender::Male),
            Gender::Unknown => None,
        }
    }

    /// Both genders known and equal
    pub fn conflicts_with(&self, other: &Gender) -> bool {
        *self != Gender::Unknown && self == other
    }
}

/// Accepts keeper vocabulary ("hen", "rooster", "pullet") as well as the
/// serialized names; anything unrecognised or null is `Unknown`
impl<'de> Deserialize<'de> for Gender {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|s| Gender::from_string(&s)).unwrap_or_default())
    }
}

/// Immutable snapshot of a bird handed to the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BirdRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub hatched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub weight_grams: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub sire_id: Option<String>,
    #[serde(default)]
    pub dam_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl BirdRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, gender: Gender) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            breed: None,
            gender,
            hatched_at: None,
            weight_grams: None,
            height_cm: None,
            color: None,
            sire_id: None,
            dam_id: None,
            location: None,
        }
    }

    pub fn with_breed(mut self, breed: impl Into<String>) -> Self {
        self.breed = Some(breed.into());
        self
    }

    pub fn with_hatched_at(mut self, hatched_at: DateTime<Utc>) -> Self {
        self.hatched_at = Some(hatched_at);
        self
    }

    pub fn with_weight(mut self, grams: f64) -> Self {
        self.weight_grams = Some(grams);
        self
    }

    pub fn with_height(mut self, cm: f64) -> Self {
        self.height_cm = Some(cm);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_parents(mut self, sire_id: Option<&str>, dam_id: Option<&str>) -> Self {
        self.sire_id = sire_id.map(str::to_string);
        self.dam_id = dam_id.map(str::to_string);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Reject records the engine cannot reason about.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidRecord {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("bird id is empty"));
        }
        if self.sire_id.as_deref() == Some(self.id.as_str())
            || self.dam_id.as_deref() == Some(self.id.as_str())
        {
            return Err(invalid("bird is listed as its own parent"));
        }
        if let (Some(sire), Some(dam)) = (&self.sire_id, &self.dam_id) {
            if sire == dam {
                return Err(invalid("sire and dam are the same bird"));
            }
        }
        for (label, value) in [("weight", self.weight_grams), ("height", self.height_cm)] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(invalid(&format!("{} must be a positive number", label)));
                }
            }
        }

        Ok(())
    }

    /// Age in whole days at `as_of`, if the hatch date is known
    pub fn age_days(&self, as_of: DateTime<Utc>) -> Option<i64> {
        self.hatched_at
            .map(|hatched| (as_of - hatched).num_days())
            .filter(|days| *days >= 0)
    }

    pub fn same_breed(&self, other: &BirdRecord) -> Option<bool> {
        match (&self.breed, &other.breed) {
            (Some(a), Some(b)) => Some(a.trim().eq_ignore_ascii_case(b.trim())),
            _ => None,
        }
    }
}

/// Trait category, used to route records to the right scorer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TraitCategory {
    Physical,
    Color,
    Pattern,
    Comb,
    Temperament,
    Production,
    Health,
    Show,
    Other,
}

impl TraitCategory {
    pub fn from_string(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "physical" | "body" | "conformation" => TraitCategory::Physical,
            "color" | "colour" | "plumage" => TraitCategory::Color,
            "pattern" => TraitCategory::Pattern,
            "comb" => TraitCategory::Comb,
            "temperament" | "behavior" | "behaviour" => TraitCategory::Temperament,
            "production" | "egg" | "eggs" | "laying" => TraitCategory::Production,
            "health" | "medical" => TraitCategory::Health,
            "show" | "exhibition" => TraitCategory::Show,
            _ => TraitCategory::Other,
        }
    }
}

/// A single observation about a bird
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraitRecord {
    pub bird_id: String,
    pub category: TraitCategory,
    pub trait_name: String,
    pub value: String,
    #[serde(default)]
    pub numeric_value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TraitRecord {
    pub fn new(
        bird_id: impl Into<String>,
        category: TraitCategory,
        trait_name: impl Into<String>,
        value: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let value = value.into();
        let numeric_value = value.trim().parse::<f64>().ok().filter(|v| v.is_finite());
        Self {
            bird_id: bird_id.into(),
            category,
            trait_name: trait_name.into(),
            value,
            numeric_value,
            unit: None,
            recorded_at,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Trait names compare case-insensitively
    pub fn key(&self) -> String {
        self.trait_name.trim().to_lowercase()
    }
}

/// Resolved pedigree tree rooted at one bird
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PedigreeNode {
    /// None when the parent id itself was never recorded
    pub id: Option<String>,
    pub bird: Option<BirdRecord>,
    pub sire: Option<Box<PedigreeNode>>,
    pub dam: Option<Box<PedigreeNode>>,
    pub generation: u32,
    pub is_guest_parent: bool,
    pub integrity_warning: Option<String>,
}

impl PedigreeNode {
    pub fn resolved(bird: BirdRecord, generation: u32) -> Self {
        Self {
            id: Some(bird.id.clone()),
            bird: Some(bird),
            sire: None,
            dam: None,
            generation,
            is_guest_parent: false,
            integrity_warning: None,
        }
    }

    pub fn guest(id: Option<String>, generation: u32) -> Self {
        Self {
            id,
            bird: None,
            sire: None,
            dam: None,
            generation,
            is_guest_parent: true,
            integrity_warning: None,
        }
    }

    pub fn display_name(&self) -> String {
        match (&self.bird, &self.id) {
            (Some(bird), _) => bird.name.clone(),
            (None, Some(id)) => format!("{} (guest)", id),
            (None, None) => "Unknown".to_string(),
        }
    }

    /// Deepest generation present in the tree
    pub fn depth(&self) -> u32 {
        let sire = self.sire.as_ref().map(|n| n.depth()).unwrap_or(self.generation);
        let dam = self.dam.as_ref().map(|n| n.depth()).unwrap_or(self.generation);
        self.generation.max(sire).max(dam)
    }

    pub fn node_count(&self) -> usize {
        1 + self.sire.as_ref().map(|n| n.node_count()).unwrap_or(0)
            + self.dam.as_ref().map(|n| n.node_count()).unwrap_or(0)
    }

    pub fn parents(&self) -> impl Iterator<Item = &PedigreeNode> {
        self.sire.iter().chain(self.dam.iter()).map(|b| b.as_ref())
    }

    /// Known ancestor ids, excluding the root
    pub fn ancestor_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let mut stack: Vec<&PedigreeNode> = self.parents().collect();
        while let Some(node) = stack.pop() {
            if let Some(id) = &node.id {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            stack.extend(node.parents());
        }
        ids
    }

    /// Share of the root's genome expected from this ancestor, in percent
    pub fn contribution_percent(&self) -> f64 {
        match self.generation {
            0 => 100.0,
            g => crate::pedigree::genetic_contribution(g - 1),
        }
    }
}

/// A descendant found by the breadth-first descendant walk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescendantEntry {
    pub bird: BirdRecord,
    pub generation: u32,
    pub via_parent: String,
}

/// Inbreeding risk buckets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Pairing verdict for a proposed sire/dam
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub sire_id: String,
    pub dam_id: String,
    pub score: f64,
    pub coi_percent: f64,
    pub risk_level: RiskLevel,
    pub rejected: bool,
    pub verdict: String,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Fraction of this range that falls inside `other`
    pub fn overlap_fraction(&self, other: &ValueRange) -> f64 {
        if self.width() <= f64::EPSILON {
            return if other.contains(self.min) { 1.0 } else { 0.0 };
        }
        let overlap = self.max.min(other.max) - self.min.max(other.min);
        (overlap / self.width()).clamp(0.0, 1.0)
    }
}

/// One bucket of a categorical outcome distribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Probability {
    pub item: String,
    pub percentage: f64,
}

/// How much parental data backed a prediction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataQuality {
    Full,
    Partial,
    Default,
}

/// Predicted offspring characteristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreedingPrediction {
    pub weight_range: ValueRange,
    pub height_range: ValueRange,
    pub likely_traits: Vec<String>,
    pub color_probabilities: Vec<Probability>,
    pub pattern_probabilities: Vec<Probability>,
    pub comb_probabilities: Vec<Probability>,
    pub data_quality: DataQuality,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BviRating {
    Elite,
    Strong,
    Average,
    Developing,
    Unrated,
}

impl BviRating {
    pub fn label(&self) -> &'static str {
        match self {
            BviRating::Elite => "Elite",
            BviRating::Strong => "Strong",
            BviRating::Average => "Average",
            BviRating::Developing => "Developing",
            BviRating::Unrated => "Unrated",
        }
    }
}

/// Breeding merit summary for one bird
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreedingValueResult {
    pub bird_id: String,
    pub bvi: f64,
    pub rating: BviRating,
    pub trait_count: usize,
    pub show_wins: usize,
    pub show_total: usize,
    pub offspring_count: usize,
    pub trait_completeness: f64,
    pub show_performance: f64,
    pub offspring_volume: f64,
    pub recommendation: String,
}

/// A ranked potential mate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MateCandidate {
    pub bird: BirdRecord,
    pub pairing_score: f64,
    pub offspring_potential: f64,
    pub genetic_diversity: f64,
    pub trait_complementarity: f64,
    pub practical_score: f64,
    pub recommendation: String,
    pub key_strengths: Vec<String>,
    pub key_risks: Vec<String>,
}

/// Ranked mates for a focal bird
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MateRecommendations {
    pub focal_bird: BirdRecord,
    pub focal_bvi: BreedingValueResult,
    pub candidates: Vec<MateCandidate>,
    pub total_evaluated: usize,
}
