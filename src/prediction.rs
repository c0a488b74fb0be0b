use std::collections::HashMap;
use tracing::debug;

use crate::config::PredictionConfig;
use crate::repository::latest_by_trait;
use crate::types::*;

const UNKNOWN_PHENOTYPE: &str = "Unknown";

/// An allele in a simplified dominance series. Lower rank is more dominant.
#[derive(Debug, Clone)]
struct AlleleRule {
    name: String,
    rank: u8,
}

/// Two equally dominant alleles that together show a third phenotype
#[derive(Debug, Clone)]
struct CodominantRule {
    first: String,
    second: String,
    phenotype: String,
}

type Genotype = (String, String);

/// Single-locus rule table for one categorical trait
#[derive(Debug, Clone)]
pub struct LocusTable {
    pub trait_name: String,
    alleles: Vec<AlleleRule>,
    codominant: Vec<CodominantRule>,
}

impl LocusTable {
    fn new(trait_name: &str, alleles: &[(&str, u8)], codominant: &[(&str, &str, &str)]) -> Self {
        Self {
            trait_name: trait_name.to_string(),
            alleles: alleles
                .iter()
                .map(|(name, rank)| AlleleRule {
                    name: name.to_string(),
                    rank: *rank,
                })
                .collect(),
            codominant: codominant
                .iter()
                .map(|(first, second, phenotype)| CodominantRule {
                    first: first.to_string(),
                    second: second.to_string(),
                    phenotype: phenotype.to_string(),
                })
                .collect(),
        }
    }

    /// Plumage color: dominant white over black/splash over red over buff,
    /// with black and splash blending to blue.
    pub fn plumage_color() -> Self {
        Self::new(
            "color",
            &[("white", 0), ("black", 1), ("splash", 1), ("red", 2), ("buff", 3)],
            &[("black", "splash", "blue")],
        )
    }

    pub fn pattern() -> Self {
        Self::new("pattern", &[("barred", 0), ("laced", 1), ("solid", 2)], &[])
    }

    /// Rose and pea combs together give walnut
    pub fn comb() -> Self {
        Self::new(
            "comb",
            &[("rose", 0), ("pea", 0), ("single", 1)],
            &[("rose", "pea", "walnut")],
        )
    }

    fn rank(&self, allele: &str) -> u8 {
        self.alleles
            .iter()
            .find(|a| a.name == allele)
            .map(|a| a.rank)
            .unwrap_or(u8::MAX)
    }

    fn codominant_phenotype(&self, a: &str, b: &str) -> Option<&str> {
        self.codominant
            .iter()
            .find(|c| (c.first == a && c.second == b) || (c.first == b && c.second == a))
            .map(|c| c.phenotype.as_str())
    }

    /// Phenotype expressed by a genotype
    pub fn phenotype_of(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        if let Some(phenotype) = self.codominant_phenotype(a, b) {
            return phenotype.to_string();
        }
        let (rank_a, rank_b) = (self.rank(a), self.rank(b));
        if rank_a < rank_b {
            a.to_string()
        } else if rank_b < rank_a {
            b.to_string()
        } else {
            let (first, second) = if a < b { (a, b) } else { (b, a) };
            format!("{}/{}", first, second)
        }
    }

    /// Plausible genotypes behind an observed phenotype, with weights
    fn genotypes_for(&self, phenotype: Option<&str>, homozygous_prior: f64) -> Vec<(Genotype, f64)> {
        let Some(phenotype) = phenotype.map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty())
        else {
            // Nothing observed: every allele equally likely
            let weight = 1.0 / self.alleles.len() as f64;
            return self
                .alleles
                .iter()
                .map(|a| ((a.name.clone(), a.name.clone()), weight))
                .collect();
        };

        if let Some(rule) = self.codominant.iter().find(|c| c.phenotype == phenotype) {
            return vec![((rule.first.clone(), rule.second.clone()), 1.0)];
        }

        let rank = self.rank(&phenotype);
        let hidden: Vec<&AlleleRule> = self
            .alleles
            .iter()
            .filter(|a| a.rank > rank && self.codominant_phenotype(&phenotype, &a.name).is_none())
            .collect();

        if rank == u8::MAX || hidden.is_empty() {
            return vec![((phenotype.clone(), phenotype), 1.0)];
        }

        let carrier_weight = (1.0 - homozygous_prior) / hidden.len() as f64;
        let mut genotypes = vec![((phenotype.clone(), phenotype.clone()), homozygous_prior)];
        genotypes.extend(
            hidden
                .iter()
                .map(|a| ((phenotype.clone(), a.name.clone()), carrier_weight)),
        );
        genotypes.retain(|(_, w)| *w > 0.0);
        genotypes
    }

    /// Cross two observed phenotypes through a Punnett square
    pub fn cross(
        &self,
        sire_phenotype: Option<&str>,
        dam_phenotype: Option<&str>,
        homozygous_prior: f64,
    ) -> Vec<Probability> {
        let observed = |p: Option<&str>| p.map(|s| !s.trim().is_empty()).unwrap_or(false);
        if !observed(sire_phenotype) && !observed(dam_phenotype) {
            return vec![Probability {
                item: UNKNOWN_PHENOTYPE.to_string(),
                percentage: 100.0,
            }];
        }

        let sire = self.genotypes_for(sire_phenotype, homozygous_prior);
        let dam = self.genotypes_for(dam_phenotype, homozygous_prior);

        let mut outcomes: HashMap<String, f64> = HashMap::new();
        for ((s1, s2), sire_weight) in &sire {
            for ((d1, d2), dam_weight) in &dam {
                let cell = sire_weight * dam_weight / 4.0;
                for (from_sire, from_dam) in [(s1, d1), (s1, d2), (s2, d1), (s2, d2)] {
                    *outcomes
                        .entry(self.phenotype_of(from_sire, from_dam))
                        .or_insert(0.0) += cell;
                }
            }
        }

        to_percentages(outcomes)
    }
}

/// Sorted percentages rounded to one decimal, summing to exactly 100
fn to_percentages(outcomes: HashMap<String, f64>) -> Vec<Probability> {
    let total: f64 = outcomes.values().sum();
    if total <= 0.0 {
        return vec![Probability {
            item: UNKNOWN_PHENOTYPE.to_string(),
            percentage: 100.0,
        }];
    }

    let mut buckets: Vec<Probability> = outcomes
        .into_iter()
        .map(|(item, weight)| Probability {
            item: capitalize(&item),
            percentage: round1(weight / total * 100.0),
        })
        .filter(|p| p.percentage > 0.0)
        .collect();
    sort_descending(&mut buckets);

    let residue = 100.0 - buckets.iter().map(|p| p.percentage).sum::<f64>();
    if let Some(top) = buckets.first_mut() {
        top.percentage = round1(top.percentage + residue);
    }
    sort_descending(&mut buckets);
    buckets
}

fn sort_descending(buckets: &mut [Probability]) {
    buckets.sort_by(|a, b| {
        b.percentage
            .total_cmp(&a.percentage)
            .then_with(|| a.item.cmp(&b.item))
    });
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Convert a weight observation to grams
fn weight_in_grams(record: &TraitRecord) -> Option<f64> {
    let value = record.numeric_value?;
    let factor = match record.unit.as_deref().map(|u| u.trim().to_lowercase()) {
        Some(u) if u == "kg" => 1000.0,
        Some(u) if u == "lb" || u == "lbs" => 453.592,
        Some(u) if u == "oz" => 28.3495,
        _ => 1.0,
    };
    Some(value * factor)
}

fn height_in_cm(record: &TraitRecord) -> Option<f64> {
    let value = record.numeric_value?;
    let factor = match record.unit.as_deref().map(|u| u.trim().to_lowercase()) {
        Some(u) if u == "in" || u == "inch" || u == "inches" => 2.54,
        Some(u) if u == "mm" => 0.1,
        Some(u) if u == "m" => 100.0,
        _ => 1.0,
    };
    Some(value * factor)
}

/// Which continuous measurement a range is built for
#[derive(Debug, Clone, Copy)]
enum Measurement {
    Weight,
    Height,
}

impl Measurement {
    fn key(&self) -> &'static str {
        match self {
            Measurement::Weight => "weight",
            Measurement::Height => "height",
        }
    }

    fn from_bird(&self, bird: &BirdRecord) -> Option<f64> {
        match self {
            Measurement::Weight => bird.weight_grams,
            Measurement::Height => bird.height_cm,
        }
    }

    fn from_record(&self, record: &TraitRecord) -> Option<f64> {
        match self {
            Measurement::Weight => weight_in_grams(record),
            Measurement::Height => height_in_cm(record),
        }
    }
}

/// Predicts offspring traits from two parents and their trait history
pub struct GeneticTraitPredictor {
    config: PredictionConfig,
    color: LocusTable,
    pattern: LocusTable,
    comb: LocusTable,
}

impl GeneticTraitPredictor {
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            config,
            color: LocusTable::plumage_color(),
            pattern: LocusTable::pattern(),
            comb: LocusTable::comb(),
        }
    }

    pub fn predict(
        &self,
        sire: &BirdRecord,
        dam: &BirdRecord,
        sire_history: &[TraitRecord],
        dam_history: &[TraitRecord],
    ) -> BreedingPrediction {
        let (weight_range, weight_quality) =
            self.continuous_range(Measurement::Weight, sire, dam, sire_history, dam_history);
        let (height_range, height_quality) =
            self.continuous_range(Measurement::Height, sire, dam, sire_history, dam_history);

        let sire_latest = latest_by_trait(sire_history);
        let dam_latest = latest_by_trait(dam_history);

        let sire_color = sire
            .color
            .clone()
            .or_else(|| categorical_value(&sire_latest, "color", TraitCategory::Color));
        let dam_color = dam
            .color
            .clone()
            .or_else(|| categorical_value(&dam_latest, "color", TraitCategory::Color));

        let prior = self.config.homozygous_prior;
        let color_probabilities = self.color.cross(sire_color.as_deref(), dam_color.as_deref(), prior);
        let pattern_probabilities = self.pattern.cross(
            categorical_value(&sire_latest, "pattern", TraitCategory::Pattern).as_deref(),
            categorical_value(&dam_latest, "pattern", TraitCategory::Pattern).as_deref(),
            prior,
        );
        let comb_probabilities = self.comb.cross(
            categorical_value(&sire_latest, "comb", TraitCategory::Comb).as_deref(),
            categorical_value(&dam_latest, "comb", TraitCategory::Comb).as_deref(),
            prior,
        );

        let mut likely_traits = Vec::new();
        for (label, distribution) in [
            ("plumage", &color_probabilities),
            ("pattern", &pattern_probabilities),
            ("comb", &comb_probabilities),
        ] {
            if let Some(top) = distribution.first() {
                if top.item != UNKNOWN_PHENOTYPE
                    && top.percentage >= self.config.likely_trait_floor_percent
                {
                    likely_traits.push(format!(
                        "{} {} ({:.0}%)",
                        top.item, label, top.percentage
                    ));
                }
            }
        }
        likely_traits.extend(self.lineage_notes(&sire_latest, &dam_latest));

        let data_quality = match (weight_quality, height_quality) {
            (DataQuality::Full, DataQuality::Full) => DataQuality::Full,
            (DataQuality::Default, DataQuality::Default) => DataQuality::Default,
            _ => DataQuality::Partial,
        };

        debug!(
            sire = %sire.id,
            dam = %dam.id,
            ?data_quality,
            "Predicted offspring traits"
        );

        BreedingPrediction {
            weight_range,
            height_range,
            likely_traits,
            color_probabilities,
            pattern_probabilities,
            comb_probabilities,
            data_quality,
        }
    }

    fn continuous_range(
        &self,
        measurement: Measurement,
        sire: &BirdRecord,
        dam: &BirdRecord,
        sire_history: &[TraitRecord],
        dam_history: &[TraitRecord],
    ) -> (ValueRange, DataQuality) {
        let c = &self.config;
        let parent_value = |bird: &BirdRecord, history: &[TraitRecord]| {
            measurement.from_bird(bird).or_else(|| {
                latest_by_trait(history)
                    .get(measurement.key())
                    .and_then(|r| measurement.from_record(r))
            })
        };

        let known: Vec<f64> = [parent_value(sire, sire_history), parent_value(dam, dam_history)]
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();

        let fallback = match measurement {
            Measurement::Weight => c.fallback_weight_grams,
            Measurement::Height => c.fallback_height_cm,
        };

        match known.len() {
            2 => {
                let mean = (known[0] + known[1]) / 2.0;
                let samples = |history: &[TraitRecord]| -> Vec<f64> {
                    history
                        .iter()
                        .filter(|r| r.key() == measurement.key())
                        .filter_map(|r| measurement.from_record(r))
                        .collect()
                };
                let (low, high) =
                    self.spread_factors(&samples(sire_history), &samples(dam_history));
                (ValueRange::new(mean * low, mean * high), DataQuality::Full)
            }
            1 => (
                ValueRange::new(known[0] * c.degraded_spread_low, known[0] * c.degraded_spread_high),
                DataQuality::Partial,
            ),
            _ => (
                ValueRange::new(fallback * c.degraded_spread_low, fallback * c.degraded_spread_high),
                DataQuality::Default,
            ),
        }
    }

    /// Spread from each parent's own recorded variation (mean of the two CVs),
    /// or the fixed factors when either parent's history is too thin.
    fn spread_factors(&self, sire_samples: &[f64], dam_samples: &[f64]) -> (f64, f64) {
        let c = &self.config;
        let fixed = (c.spread_low, c.spread_high);
        let (Some(sire_cv), Some(dam_cv)) = (
            self.coefficient_of_variation(sire_samples),
            self.coefficient_of_variation(dam_samples),
        ) else {
            return fixed;
        };

        let cv = (sire_cv + dam_cv) / 2.0;
        let spread = (cv * c.cv_spread_multiplier).clamp(c.min_spread, c.max_spread);
        (1.0 - spread, 1.0 + spread)
    }

    fn coefficient_of_variation(&self, samples: &[f64]) -> Option<f64> {
        if samples.len() < self.config.min_history_samples {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return None;
        }
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(variance.sqrt() / mean)
    }

    /// Qualitative notes where both parents score at the same extreme
    fn lineage_notes(
        &self,
        sire_latest: &HashMap<String, &TraitRecord>,
        dam_latest: &HashMap<String, &TraitRecord>,
    ) -> Vec<String> {
        let scale = self.config.trait_score_scale;
        let high = self.config.lineage_note_threshold;
        let low = scale - high;

        let mut notes: Vec<String> = sire_latest
            .iter()
            .filter(|(_, r)| is_scored_category(r.category))
            .filter_map(|(key, sire_record)| {
                let dam_record = dam_latest.get(key)?;
                let (s, d) = (sire_record.numeric_value?, dam_record.numeric_value?);
                if s > scale || d > scale {
                    return None;
                }
                if s >= high && d >= high {
                    Some(format!("Consistently high {} in lineage", key))
                } else if s <= low && d <= low {
                    Some(format!("Low {} on both sides of the pairing", key))
                } else {
                    None
                }
            })
            .collect();
        notes.sort();
        notes
    }
}

fn is_scored_category(category: TraitCategory) -> bool {
    matches!(
        category,
        TraitCategory::Temperament
            | TraitCategory::Production
            | TraitCategory::Physical
            | TraitCategory::Other
    )
}

fn categorical_value(
    latest: &HashMap<String, &TraitRecord>,
    key: &str,
    category: TraitCategory,
) -> Option<String> {
    latest
        .get(key)
        .map(|r| r.value.clone())
        .or_else(|| {
            latest
                .values()
                .filter(|r| r.category == category)
                .max_by_key(|r| r.recorded_at)
                .map(|r| r.value.clone())
        })
        .filter(|v| !v.trim().is_empty())
}

/// How well two birds' scored traits cover each other, 0-100.
///
/// Each shared numeric trait scores `max * (0.75 + 0.25 * |a - b|)` on
/// normalized values, so a strong parent paired with one weak in the same
/// trait outranks two identical mediocre parents. None when no scored trait
/// is recorded for both birds.
pub fn trait_complementarity(
    a_history: &[TraitRecord],
    b_history: &[TraitRecord],
    scale: f64,
) -> Option<f64> {
    let a_latest = latest_by_trait(a_history);
    let b_latest = latest_by_trait(b_history);

    let scores: Vec<f64> = a_latest
        .iter()
        .filter(|(key, r)| {
            is_scored_category(r.category) && key.as_str() != "weight" && key.as_str() != "height"
        })
        .filter_map(|(key, a_record)| {
            let b_record = b_latest.get(key)?;
            let (a, b) = (a_record.numeric_value?, b_record.numeric_value?);
            if a < 0.0 || b < 0.0 {
                return None;
            }
            let norm = if a <= scale && b <= scale { scale } else { a.max(b) };
            if norm <= 0.0 {
                return None;
            }
            let (na, nb) = (a / norm, b / norm);
            Some(na.max(nb) * (0.75 + 0.25 * (na - nb).abs()))
        })
        .collect();

    if scores.is_empty() {
        return None;
    }
    Some((scores.iter().sum::<f64>() / scores.len() as f64 * 100.0).clamp(0.0, 100.0))
}
