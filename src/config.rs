//! Engine configuration.
//!
//! Every weight, threshold and spread factor the scorers use lives here as a
//! named default. A TOML file may override any subset; missing keys keep their
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;

pub mod defaults {
    pub const MAX_PEDIGREE_DEPTH: u32 = 5;
    /// Ceiling for a configured depth; trees grow as 2^depth
    pub const MAX_ALLOWED_DEPTH: u32 = 12;
    pub const LOOKUP_TIMEOUT_MS: u64 = 2_000;

    pub const COI_CRITICAL_PERCENT: f64 = 25.0;
    pub const COI_HIGH_PERCENT: f64 = 12.5;
    pub const COI_MODERATE_PERCENT: f64 = 6.25;

    pub const COI_PENALTY_PER_PERCENT: f64 = 2.0;
    pub const HEALTH_PENALTY_PER_FLAG: f64 = 10.0;
    pub const HEALTH_PENALTY_CAP: f64 = 30.0;
    pub const BREED_MISMATCH_PENALTY: f64 = 10.0;
    pub const COMPLEMENTARITY_BONUS_MAX: f64 = 10.0;

    pub const BVI_TRAIT_WEIGHT: f64 = 0.40;
    pub const BVI_SHOW_WEIGHT: f64 = 0.35;
    pub const BVI_OFFSPRING_WEIGHT: f64 = 0.25;
    pub const BVI_OFFSPRING_CAP: usize = 20;
    pub const BVI_ELITE: f64 = 0.8;
    pub const BVI_STRONG: f64 = 0.6;
    pub const BVI_AVERAGE: f64 = 0.4;

    pub const SPREAD_LOW: f64 = 0.87;
    pub const SPREAD_HIGH: f64 = 1.13;
    pub const DEGRADED_SPREAD_LOW: f64 = 0.75;
    pub const DEGRADED_SPREAD_HIGH: f64 = 1.25;
    pub const MIN_HISTORY_SAMPLES: usize = 3;
    pub const CV_SPREAD_MULTIPLIER: f64 = 2.0;
    pub const MIN_SPREAD: f64 = 0.05;
    pub const MAX_SPREAD: f64 = 0.30;
    pub const FALLBACK_WEIGHT_GRAMS: f64 = 2_200.0;
    pub const FALLBACK_HEIGHT_CM: f64 = 35.0;
    pub const HOMOZYGOUS_PRIOR: f64 = 0.5;
    pub const LIKELY_TRAIT_FLOOR_PERCENT: f64 = 25.0;
    pub const LINEAGE_NOTE_THRESHOLD: f64 = 7.0;
    pub const TRAIT_SCORE_SCALE: f64 = 10.0;

    pub const PAIRING_OFFSPRING_WEIGHT: f64 = 0.35;
    pub const PAIRING_DIVERSITY_WEIGHT: f64 = 0.30;
    pub const PAIRING_COMPLEMENTARITY_WEIGHT: f64 = 0.20;
    pub const PAIRING_PRACTICAL_WEIGHT: f64 = 0.15;
    pub const STRENGTH_THRESHOLD: f64 = 75.0;
    pub const RISK_THRESHOLD: f64 = 40.0;
    pub const MIN_BREEDING_AGE_DAYS: i64 = 180;
    pub const MAX_BREEDING_AGE_DAYS: i64 = 1_825;
    pub const MAX_AGE_GAP_DAYS: i64 = 730;
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub pedigree: PedigreeConfig,
    pub risk: RiskThresholds,
    pub compatibility: CompatibilityWeights,
    pub breeding_value: BreedingValueConfig,
    pub prediction: PredictionConfig,
    pub pairing: PairingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PedigreeConfig {
    pub max_depth: u32,
    /// Per-node lookup timeout; 0 disables the timeout thread
    pub lookup_timeout_ms: u64,
}

impl Default for PedigreeConfig {
    fn default() -> Self {
        Self {
            max_depth: defaults::MAX_PEDIGREE_DEPTH,
            lookup_timeout_ms: defaults::LOOKUP_TIMEOUT_MS,
        }
    }
}

impl PedigreeConfig {
    pub fn lookup_timeout(&self) -> Option<Duration> {
        (self.lookup_timeout_ms > 0).then(|| Duration::from_millis(self.lookup_timeout_ms))
    }
}

/// COI percentages at which each risk level starts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskThresholds {
    pub critical: f64,
    pub high: f64,
    pub moderate: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            critical: defaults::COI_CRITICAL_PERCENT,
            high: defaults::COI_HIGH_PERCENT,
            moderate: defaults::COI_MODERATE_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompatibilityWeights {
    pub coi_penalty_per_percent: f64,
    pub health_penalty_per_flag: f64,
    pub health_penalty_cap: f64,
    pub breed_mismatch_penalty: f64,
    pub complementarity_bonus_max: f64,
    /// Health trait values containing any of these whole words count as a flag,
    /// unless the value is negated ("Not infected", "unaffected")
    pub health_flag_keywords: Vec<String>,
}

impl Default for CompatibilityWeights {
    fn default() -> Self {
        Self {
            coi_penalty_per_percent: defaults::COI_PENALTY_PER_PERCENT,
            health_penalty_per_flag: defaults::HEALTH_PENALTY_PER_FLAG,
            health_penalty_cap: defaults::HEALTH_PENALTY_CAP,
            breed_mismatch_penalty: defaults::BREED_MISMATCH_PENALTY,
            complementarity_bonus_max: defaults::COMPLEMENTARITY_BONUS_MAX,
            health_flag_keywords: [
                "positive", "affected", "carrier", "infected", "sick", "defect", "deformed",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreedingValueConfig {
    pub trait_weight: f64,
    pub show_weight: f64,
    pub offspring_weight: f64,
    /// Offspring count at which the volume component saturates
    pub offspring_cap: usize,
    pub elite: f64,
    pub strong: f64,
    pub average: f64,
    /// Traits a complete record should cover
    pub trait_catalogue: Vec<String>,
}

impl Default for BreedingValueConfig {
    fn default() -> Self {
        Self {
            trait_weight: defaults::BVI_TRAIT_WEIGHT,
            show_weight: defaults::BVI_SHOW_WEIGHT,
            offspring_weight: defaults::BVI_OFFSPRING_WEIGHT,
            offspring_cap: defaults::BVI_OFFSPRING_CAP,
            elite: defaults::BVI_ELITE,
            strong: defaults::BVI_STRONG,
            average: defaults::BVI_AVERAGE,
            trait_catalogue: [
                "weight",
                "height",
                "color",
                "pattern",
                "comb",
                "egg production",
                "egg color",
                "temperament",
                "alertness",
                "broodiness",
                "feather quality",
                "body conformation",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PredictionConfig {
    pub spread_low: f64,
    pub spread_high: f64,
    pub degraded_spread_low: f64,
    pub degraded_spread_high: f64,
    pub min_history_samples: usize,
    pub cv_spread_multiplier: f64,
    pub min_spread: f64,
    pub max_spread: f64,
    pub fallback_weight_grams: f64,
    pub fallback_height_cm: f64,
    /// Prior that a dominant phenotype hides no recessive allele
    pub homozygous_prior: f64,
    pub likely_trait_floor_percent: f64,
    pub lineage_note_threshold: f64,
    pub trait_score_scale: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            spread_low: defaults::SPREAD_LOW,
            spread_high: defaults::SPREAD_HIGH,
            degraded_spread_low: defaults::DEGRADED_SPREAD_LOW,
            degraded_spread_high: defaults::DEGRADED_SPREAD_HIGH,
            min_history_samples: defaults::MIN_HISTORY_SAMPLES,
            cv_spread_multiplier: defaults::CV_SPREAD_MULTIPLIER,
            min_spread: defaults::MIN_SPREAD,
            max_spread: defaults::MAX_SPREAD,
            fallback_weight_grams: defaults::FALLBACK_WEIGHT_GRAMS,
            fallback_height_cm: defaults::FALLBACK_HEIGHT_CM,
            homozygous_prior: defaults::HOMOZYGOUS_PRIOR,
            likely_trait_floor_percent: defaults::LIKELY_TRAIT_FLOOR_PERCENT,
            lineage_note_threshold: defaults::LINEAGE_NOTE_THRESHOLD,
            trait_score_scale: defaults::TRAIT_SCORE_SCALE,
        }
    }
}

/// Target weights and accepted colors for one breed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreedStandard {
    pub breed: String,
    pub female_weight_grams: (f64, f64),
    pub male_weight_grams: (f64, f64),
    pub colors: Vec<String>,
}

impl BreedStandard {
    fn new(breed: &str, female: (f64, f64), male: (f64, f64), colors: &[&str]) -> Self {
        Self {
            breed: breed.to_string(),
            female_weight_grams: female,
            male_weight_grams: male,
            colors: colors.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn matches(&self, breed: &str) -> bool {
        self.breed.eq_ignore_ascii_case(breed.trim())
    }

    pub fn accepts_color(&self, color: &str) -> bool {
        self.colors.iter().any(|c| c.eq_ignore_ascii_case(color))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairingConfig {
    pub offspring_weight: f64,
    pub diversity_weight: f64,
    pub complementarity_weight: f64,
    pub practical_weight: f64,
    /// Sub-scores at or above this become key strengths
    pub strength_threshold: f64,
    /// Sub-scores below this become key risks
    pub risk_threshold: f64,
    pub min_breeding_age_days: i64,
    pub max_breeding_age_days: i64,
    pub max_age_gap_days: i64,
    pub breed_standards: Vec<BreedStandard>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            offspring_weight: defaults::PAIRING_OFFSPRING_WEIGHT,
            diversity_weight: defaults::PAIRING_DIVERSITY_WEIGHT,
            complementarity_weight: defaults::PAIRING_COMPLEMENTARITY_WEIGHT,
            practical_weight: defaults::PAIRING_PRACTICAL_WEIGHT,
            strength_threshold: defaults::STRENGTH_THRESHOLD,
            risk_threshold: defaults::RISK_THRESHOLD,
            min_breeding_age_days: defaults::MIN_BREEDING_AGE_DAYS,
            max_breeding_age_days: defaults::MAX_BREEDING_AGE_DAYS,
            max_age_gap_days: defaults::MAX_AGE_GAP_DAYS,
            breed_standards: vec![
                BreedStandard::new("Rhode Island Red", (2500.0, 2900.0), (3400.0, 3900.0), &["red"]),
                BreedStandard::new(
                    "Plymouth Rock",
                    (2900.0, 3400.0),
                    (3400.0, 4300.0),
                    &["black", "white", "buff", "blue"],
                ),
                BreedStandard::new(
                    "Leghorn",
                    (1800.0, 2200.0),
                    (2400.0, 2700.0),
                    &["white", "black", "buff", "red"],
                ),
                BreedStandard::new(
                    "Orpington",
                    (2700.0, 3600.0),
                    (3600.0, 4500.0),
                    &["buff", "black", "blue", "white"],
                ),
                BreedStandard::new("Australorp", (2500.0, 3000.0), (3200.0, 3900.0), &["black", "blue"]),
                BreedStandard::new(
                    "Silkie",
                    (700.0, 1100.0),
                    (900.0, 1400.0),
                    &["white", "black", "blue", "buff", "splash"],
                ),
                BreedStandard::new(
                    "Andalusian",
                    (2000.0, 2500.0),
                    (2700.0, 3200.0),
                    &["blue", "black", "splash"],
                ),
            ],
        }
    }
}

impl PairingConfig {
    pub fn standard_for(&self, breed: &str) -> Option<&BreedStandard> {
        self.breed_standards.iter().find(|s| s.matches(breed))
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        let fail = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if self.pedigree.max_depth > defaults::MAX_ALLOWED_DEPTH {
            return Err(EngineError::InvalidConfig(format!(
                "pedigree max_depth {} exceeds the allowed maximum of {}",
                self.pedigree.max_depth,
                defaults::MAX_ALLOWED_DEPTH
            )));
        }

        let risk = &self.risk;
        if !(0.0 < risk.moderate && risk.moderate < risk.high && risk.high < risk.critical) {
            return fail("risk thresholds must satisfy 0 < moderate < high < critical");
        }

        let bv = &self.breeding_value;
        if !weights_valid(&[bv.trait_weight, bv.show_weight, bv.offspring_weight]) {
            return fail("breeding value weights must be non-negative with a positive sum");
        }
        if !(bv.average < bv.strong && bv.strong < bv.elite) {
            return fail("breeding value rating thresholds must be increasing");
        }
        if bv.trait_catalogue.is_empty() {
            return fail("trait catalogue must not be empty");
        }
        if bv.offspring_cap == 0 {
            return fail("offspring cap must be at least 1");
        }

        let p = &self.pairing;
        if !weights_valid(&[
            p.offspring_weight,
            p.diversity_weight,
            p.complementarity_weight,
            p.practical_weight,
        ]) {
            return fail("pairing weights must be non-negative with a positive sum");
        }
        if p.min_breeding_age_days >= p.max_breeding_age_days {
            return fail("breeding age window is empty");
        }

        let pr = &self.prediction;
        if !(pr.degraded_spread_low <= pr.spread_low
            && pr.spread_low < 1.0
            && 1.0 < pr.spread_high
            && pr.spread_high <= pr.degraded_spread_high)
        {
            return fail("spread factors must bracket 1.0 with degraded factors outermost");
        }
        if !(0.0 <= pr.min_spread && pr.min_spread <= pr.max_spread && pr.max_spread < 1.0) {
            return fail("history spread bounds must satisfy 0 <= min <= max < 1");
        }
        if !(0.0..=1.0).contains(&pr.homozygous_prior) {
            return fail("homozygous prior must be within [0, 1]");
        }
        if pr.trait_score_scale <= 0.0 {
            return fail("trait score scale must be positive");
        }

        let c = &self.compatibility;
        if [
            c.coi_penalty_per_percent,
            c.health_penalty_per_flag,
            c.health_penalty_cap,
            c.breed_mismatch_penalty,
            c.complementarity_bonus_max,
        ]
        .iter()
        .any(|v| *v < 0.0)
        {
            return fail("compatibility penalties and bonus must be non-negative");
        }

        Ok(())
    }
}

fn weights_valid(weights: &[f64]) -> bool {
    weights.iter().all(|w| w.is_finite() && *w >= 0.0) && weights.iter().sum::<f64>() > 0.0
}
