use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::breeding_value::BreedingValueService;
use crate::config::{EngineConfig, PairingConfig, RiskThresholds};
use crate::error::{EngineError, EngineResult};
use crate::inbreeding::{risk_level, InbreedingCalculator};
use crate::pedigree::PedigreeGraphBuilder;
use crate::prediction::{trait_complementarity, GeneticTraitPredictor};
use crate::repository::{BirdRepository, TraitRepository};
use crate::types::*;

const NEUTRAL: f64 = 0.5;
const DEFAULT_COMPLEMENTARITY: f64 = 50.0;

/// Cooperative cancellation flag shared between a caller and a running ranking
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

/// Shared inputs for scoring every candidate against one focal bird
struct FocalContext<'a> {
    bird: &'a BirdRecord,
    tree: PedigreeNode,
    history: Vec<TraitRecord>,
    as_of: DateTime<Utc>,
}

/// Ranks potential mates for a focal bird
pub struct MateRecommendationRanker {
    birds: Arc<dyn BirdRepository>,
    traits: Arc<dyn TraitRepository>,
    pedigree: Arc<PedigreeGraphBuilder>,
    inbreeding: Arc<InbreedingCalculator>,
    predictor: Arc<GeneticTraitPredictor>,
    breeding_value: Arc<BreedingValueService>,
    config: Arc<EngineConfig>,
}

impl MateRecommendationRanker {
    pub fn new(
        birds: Arc<dyn BirdRepository>,
        traits: Arc<dyn TraitRepository>,
        pedigree: Arc<PedigreeGraphBuilder>,
        inbreeding: Arc<InbreedingCalculator>,
        predictor: Arc<GeneticTraitPredictor>,
        breeding_value: Arc<BreedingValueService>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            birds,
            traits,
            pedigree,
            inbreeding,
            predictor,
            breeding_value,
            config,
        }
    }

    /// Score every eligible bird in `pool` against the focal bird and keep the best `top_n`.
    ///
    /// Candidates are scored in parallel. The token is checked before each
    /// candidate; a cancelled ranking returns [`EngineError::Cancelled`].
    pub fn find_best_mates(
        &self,
        focal_id: &str,
        pool: &[BirdRecord],
        top_n: usize,
        cancel: &CancellationToken,
        as_of: DateTime<Utc>,
    ) -> EngineResult<MateRecommendations> {
        let focal = self
            .birds
            .find_by_id(focal_id)
            .map_err(|e| EngineError::Unexpected(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(focal_id))?;
        let focal_bvi = self.breeding_value.bvi(focal_id)?;

        let eligible = self.eligible_candidates(&focal, pool);
        if eligible.is_empty() {
            info!(focal = %focal.id, "No eligible mates in pool");
            return Ok(MateRecommendations {
                focal_bird: focal,
                focal_bvi,
                candidates: Vec::new(),
                total_evaluated: 0,
            });
        }

        let max_depth = self.config.pedigree.max_depth;
        let context = FocalContext {
            bird: &focal,
            tree: self.pedigree.build(&focal.id, max_depth)?,
            history: self.history(&focal.id),
            as_of,
        };

        debug!(focal = %focal.id, eligible = eligible.len(), "Scoring candidates");
        let scored: Vec<Option<MateCandidate>> = eligible
            .par_iter()
            .map(|candidate| {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                match self.score_candidate(&context, candidate) {
                    Ok(scored) => Ok(Some(scored)),
                    Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
                    Err(e) => {
                        warn!(candidate = %candidate.id, error = %e, "Skipping candidate");
                        Ok(None)
                    }
                }
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let mut candidates: Vec<MateCandidate> = scored.into_iter().flatten().collect();
        let total_evaluated = candidates.len();
        candidates.sort_by(|a, b| {
            b.pairing_score
                .total_cmp(&a.pairing_score)
                .then_with(|| a.bird.id.cmp(&b.bird.id))
        });
        candidates.truncate(top_n);

        info!(
            focal = %focal.id,
            evaluated = total_evaluated,
            returned = candidates.len(),
            "Ranked mates"
        );
        Ok(MateRecommendations {
            focal_bird: focal,
            focal_bvi,
            candidates,
            total_evaluated,
        })
    }

    /// Opposite known gender, not the focal bird, not already paired with it
    fn eligible_candidates<'a>(
        &self,
        focal: &BirdRecord,
        pool: &'a [BirdRecord],
    ) -> Vec<&'a BirdRecord> {
        let Some(wanted) = focal.gender.opposite() else {
            warn!(focal = %focal.id, "Focal bird has no recorded sex, no mates can be ranked");
            return Vec::new();
        };
        let partners: HashSet<String> = self.birds.active_partners(&focal.id).into_iter().collect();
        let mut seen = HashSet::new();

        pool.iter()
            .filter(|b| b.id != focal.id)
            .filter(|b| b.gender == wanted)
            .filter(|b| !partners.contains(&b.id))
            .filter(|b| seen.insert(b.id.clone()))
            .collect()
    }

    fn score_candidate(
        &self,
        focal: &FocalContext<'_>,
        candidate: &BirdRecord,
    ) -> EngineResult<MateCandidate> {
        let pairing = &self.config.pairing;
        let candidate_history = self.history(&candidate.id);

        let coi = self.inbreeding.coi_against_tree(
            &focal.tree,
            &candidate.id,
            self.config.pedigree.max_depth,
        )?;
        let genetic_diversity = (100.0 - coi).clamp(0.0, 100.0);

        let offspring_potential =
            self.offspring_potential(focal.bird, candidate, &focal.history, &candidate_history);
        let trait_complementarity = trait_complementarity(
            &focal.history,
            &candidate_history,
            self.config.prediction.trait_score_scale,
        )
        .unwrap_or(DEFAULT_COMPLEMENTARITY);
        let practical_score = self.practical_score(focal.bird, candidate, focal.as_of);

        let weight_sum = pairing.offspring_weight
            + pairing.diversity_weight
            + pairing.complementarity_weight
            + pairing.practical_weight;
        let pairing_score = ((pairing.offspring_weight * offspring_potential
            + pairing.diversity_weight * genetic_diversity
            + pairing.complementarity_weight * trait_complementarity
            + pairing.practical_weight * practical_score)
            / weight_sum)
            .clamp(0.0, 100.0);

        let subscores = SubScores {
            offspring_potential,
            trait_complementarity,
            practical_score,
            coi,
        };
        let (key_strengths, key_risks) = subscores.highlights(pairing, &self.config.risk);

        Ok(MateCandidate {
            bird: candidate.clone(),
            pairing_score,
            offspring_potential,
            genetic_diversity,
            trait_complementarity,
            practical_score,
            recommendation: recommendation(pairing_score, &candidate.name),
            key_strengths,
            key_risks,
        })
    }

    /// Breed-standard fit of the predicted offspring, 0-100
    fn offspring_potential(
        &self,
        focal: &BirdRecord,
        candidate: &BirdRecord,
        focal_history: &[TraitRecord],
        candidate_history: &[TraitRecord],
    ) -> f64 {
        let (sire, dam, sire_history, dam_history) = if focal.gender == Gender::Male {
            (focal, candidate, focal_history, candidate_history)
        } else {
            (candidate, focal, candidate_history, focal_history)
        };
        let prediction = self.predictor.predict(sire, dam, sire_history, dam_history);

        let standard = focal
            .breed
            .as_deref()
            .or(candidate.breed.as_deref())
            .and_then(|breed| self.config.pairing.standard_for(breed));
        let Some(standard) = standard else {
            return NEUTRAL * 100.0;
        };

        let weight_fit = if prediction.data_quality == DataQuality::Default {
            NEUTRAL
        } else {
            let target = ValueRange::new(standard.female_weight_grams.0, standard.male_weight_grams.1);
            prediction.weight_range.overlap_fraction(&target)
        };

        let known_colors: Vec<&Probability> = prediction
            .color_probabilities
            .iter()
            .filter(|p| !p.item.eq_ignore_ascii_case("unknown"))
            .collect();
        let color_fit = if known_colors.is_empty() {
            NEUTRAL
        } else {
            known_colors
                .iter()
                .filter(|p| standard.accepts_color(&p.item))
                .map(|p| p.percentage)
                .sum::<f64>()
                / 100.0
        };

        ((weight_fit + color_fit.clamp(0.0, 1.0)) / 2.0 * 100.0).clamp(0.0, 100.0)
    }

    /// Age window, age gap, locality and availability, 0-100
    fn practical_score(
        &self,
        focal: &BirdRecord,
        candidate: &BirdRecord,
        as_of: DateTime<Utc>,
    ) -> f64 {
        let p = &self.config.pairing;
        let focal_age = focal.age_days(as_of);
        let candidate_age = candidate.age_days(as_of);

        let age_fit = |age: Option<i64>| match age {
            None => NEUTRAL,
            Some(days) if days < p.min_breeding_age_days => 0.0,
            Some(days) if days > p.max_breeding_age_days => 0.25,
            Some(_) => 1.0,
        };
        let age = (age_fit(focal_age) + age_fit(candidate_age)) / 2.0;

        let gap = match (focal_age, candidate_age) {
            (Some(a), Some(b)) => {
                let gap = (a - b).abs();
                if gap <= p.max_age_gap_days {
                    1.0
                } else {
                    (1.0 - (gap - p.max_age_gap_days) as f64 / p.max_age_gap_days.max(1) as f64)
                        .max(0.0)
                }
            }
            _ => NEUTRAL,
        };

        let locality = match (&focal.location, &candidate.location) {
            (Some(a), Some(b)) if a.trim().eq_ignore_ascii_case(b.trim()) => 1.0,
            (Some(_), Some(_)) => 0.4,
            _ => NEUTRAL,
        };

        let availability = if self.birds.active_partners(&candidate.id).is_empty() {
            1.0
        } else {
            0.6
        };

        (age + gap + locality + availability) / 4.0 * 100.0
    }

    fn history(&self, bird_id: &str) -> Vec<TraitRecord> {
        self.traits.history_for(bird_id).unwrap_or_else(|e| {
            warn!(bird_id, error = %e, "Trait history unavailable");
            Vec::new()
        })
    }
}

struct SubScores {
    offspring_potential: f64,
    trait_complementarity: f64,
    practical_score: f64,
    coi: f64,
}

impl SubScores {
    fn highlights(
        &self,
        pairing: &PairingConfig,
        thresholds: &RiskThresholds,
    ) -> (Vec<String>, Vec<String>) {
        let mut strengths = Vec::new();
        let mut risks = Vec::new();
        let strong = |v: f64| v >= pairing.strength_threshold;
        let weak = |v: f64| v < pairing.risk_threshold;

        if strong(self.offspring_potential) {
            strengths.push("Offspring likely to meet breed standard".to_string());
        } else if weak(self.offspring_potential) {
            risks.push("Offspring may fall outside breed standard".to_string());
        }

        // Relatedness follows the COI risk bands, not the generic sub-score cut-offs
        match risk_level(self.coi, thresholds) {
            RiskLevel::Low => {
                strengths.push(format!("Low relatedness (COI {:.1}%)", self.coi));
            }
            RiskLevel::Moderate => {}
            level @ (RiskLevel::High | RiskLevel::Critical) => {
                risks.push(format!(
                    "{} inbreeding risk: closely related (COI {:.1}%)",
                    level.label(),
                    self.coi
                ));
            }
        }

        if strong(self.trait_complementarity) {
            strengths.push("Complementary trait profile".to_string());
        } else if weak(self.trait_complementarity) {
            risks.push("Traits overlap without covering weaknesses".to_string());
        }

        if strong(self.practical_score) {
            strengths.push("Compatible age and location".to_string());
        } else if weak(self.practical_score) {
            risks.push("Age or location make this pairing impractical".to_string());
        }

        (strengths, risks)
    }
}

fn recommendation(score: f64, name: &str) -> String {
    let verdict = match score {
        s if s >= 80.0 => "Highly recommended",
        s if s >= 60.0 => "Recommended",
        s if s >= 40.0 => "Acceptable, review the listed risks",
        _ => "Not recommended",
    };
    format!("{}: {} (pairing score {:.1})", verdict, name, score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FlockStore;
    use chrono::{Duration, TimeZone};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn bird(id: &str, gender: Gender, age_days: i64) -> BirdRecord {
        BirdRecord::new(id, id.to_uppercase(), gender)
            .with_breed("Rhode Island Red")
            .with_color("red")
            .with_location("North")
            .with_hatched_at(as_of() - Duration::days(age_days))
    }

    fn flock() -> FlockStore {
        let mut store = FlockStore::new();
        store.insert_bird(bird("gsire", Gender::Male, 1400)).unwrap();
        store.insert_bird(bird("gdam", Gender::Female, 1400)).unwrap();
        store
            .insert_bird(
                bird("rooster", Gender::Male, 400)
                    .with_weight(3600.0)
                    .with_parents(Some("gsire"), Some("gdam")),
            )
            .unwrap();
        store
            .insert_bird(
                bird("sister", Gender::Female, 420)
                    .with_weight(2700.0)
                    .with_parents(Some("gsire"), Some("gdam")),
            )
            .unwrap();
        store
            .insert_bird(bird("outcross", Gender::Female, 380).with_weight(2700.0))
            .unwrap();
        store
            .insert_bird(
                bird("elderly", Gender::Female, 3000)
                    .with_weight(2600.0)
                    .with_location("South"),
            )
            .unwrap();
        store.insert_bird(bird("paired", Gender::Female, 400)).unwrap();
        store.insert_bird(bird("cock2", Gender::Male, 400)).unwrap();
        store.insert_bird(bird("mystery", Gender::Unknown, 400)).unwrap();
        store.add_active_pair("rooster", "paired");
        store
    }

    fn ranker(store: FlockStore) -> MateRecommendationRanker {
        let config = Arc::new(EngineConfig::default());
        let store = Arc::new(store);
        let pedigree = Arc::new(PedigreeGraphBuilder::new(store.clone(), &config.pedigree));
        MateRecommendationRanker::new(
            store.clone(),
            store.clone(),
            pedigree.clone(),
            Arc::new(InbreedingCalculator::new(pedigree)),
            Arc::new(GeneticTraitPredictor::new(config.prediction.clone())),
            Arc::new(BreedingValueService::new(
                store.clone(),
                store,
                config.breeding_value.clone(),
            )),
            config,
        )
    }

    fn pool(store: &FlockStore) -> Vec<BirdRecord> {
        store.all_birds().unwrap()
    }

    #[test]
    fn test_filters_ineligible_birds() {
        let store = flock();
        let pool = pool(&store);
        let result = ranker(store)
            .find_best_mates("rooster", &pool, 10, &CancellationToken::new(), as_of())
            .unwrap();

        let ids: Vec<&str> = result.candidates.iter().map(|c| c.bird.id.as_str()).collect();
        assert!(!ids.contains(&"rooster"));
        assert!(!ids.contains(&"paired"));
        assert!(!ids.contains(&"cock2"));
        assert!(!ids.contains(&"mystery"));
        assert!(result.candidates.iter().all(|c| c.bird.gender == Gender::Female));
        // gdam, sister, outcross, elderly
        assert_eq!(result.total_evaluated, 4);
    }

    #[test]
    fn test_outcross_beats_full_sister() {
        let store = flock();
        let pool = pool(&store);
        let result = ranker(store)
            .find_best_mates("rooster", &pool, 10, &CancellationToken::new(), as_of())
            .unwrap();

        let position = |id: &str| result.candidates.iter().position(|c| c.bird.id == id).unwrap();
        assert!(position("outcross") < position("sister"));

        let sister = &result.candidates[position("sister")];
        assert!((sister.genetic_diversity - 75.0).abs() < 1e-9);
        let outcross = &result.candidates[position("outcross")];
        assert!((outcross.genetic_diversity - 100.0).abs() < 1e-9);
        assert!(outcross.key_strengths.iter().any(|s| s.contains("Low relatedness")));
        assert!(outcross.key_risks.iter().all(|r| !r.contains("inbreeding")));

        for pair in result.candidates.windows(2) {
            assert!(pair[0].pairing_score >= pair[1].pairing_score);
        }
    }

    #[test]
    fn test_full_sister_carries_inbreeding_risk() {
        let store = flock();
        let pool = pool(&store);
        let result = ranker(store)
            .find_best_mates("rooster", &pool, 10, &CancellationToken::new(), as_of())
            .unwrap();

        let sister = result.candidates.iter().find(|c| c.bird.id == "sister").unwrap();
        assert!((sister.genetic_diversity - 75.0).abs() < 1e-9);
        assert!(sister.key_risks.iter().any(|r| r.contains("CRITICAL inbreeding risk")));
        assert!(sister.key_strengths.iter().all(|s| !s.contains("Low relatedness")));
    }

    #[test]
    fn test_practical_score_penalises_age_and_distance() {
        let store = flock();
        let pool = pool(&store);
        let result = ranker(store)
            .find_best_mates("rooster", &pool, 10, &CancellationToken::new(), as_of())
            .unwrap();

        let get = |id: &str| result.candidates.iter().find(|c| c.bird.id == id).unwrap();
        assert!((get("outcross").practical_score - 100.0).abs() < 1e-9);
        assert!(get("elderly").practical_score < get("outcross").practical_score);
    }

    #[test]
    fn test_top_n_truncates() {
        let store = flock();
        let pool = pool(&store);
        let result = ranker(store)
            .find_best_mates("rooster", &pool, 2, &CancellationToken::new(), as_of())
            .unwrap();
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.total_evaluated, 4);
    }

    #[test]
    fn test_empty_pool() {
        let store = flock();
        let result = ranker(store)
            .find_best_mates("rooster", &[], 5, &CancellationToken::new(), as_of())
            .unwrap();
        assert!(result.candidates.is_empty());
        assert_eq!(result.total_evaluated, 0);
        assert_eq!(result.focal_bird.id, "rooster");
    }

    #[test]
    fn test_unknown_focal() {
        let result = ranker(flock()).find_best_mates(
            "nobody",
            &[],
            5,
            &CancellationToken::new(),
            as_of(),
        );
        assert_eq!(result.unwrap_err(), EngineError::not_found("nobody"));
    }

    #[test]
    fn test_cancelled_ranking() {
        let store = flock();
        let pool = pool(&store);
        let token = CancellationToken::new();
        token.cancel();
        let result = ranker(store).find_best_mates("rooster", &pool, 5, &token, as_of());
        assert_eq!(result.unwrap_err(), EngineError::Cancelled);
    }
}
