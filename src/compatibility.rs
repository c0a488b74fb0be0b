use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::inbreeding::{risk_level, InbreedingCalculator};
use crate::prediction::{trait_complementarity, GeneticTraitPredictor};
use crate::repository::latest_by_trait;
use crate::types::*;

/// Scores a proposed sire/dam pairing
pub struct CompatibilityScorer {
    inbreeding: Arc<InbreedingCalculator>,
    predictor: Arc<GeneticTraitPredictor>,
    config: Arc<EngineConfig>,
}

/// Penalty and bonus terms behind a score
#[derive(Debug, Clone, Default)]
struct ScoreTerms {
    coi_penalty: f64,
    health_penalty: f64,
    breed_penalty: f64,
    complementarity_bonus: f64,
}

impl ScoreTerms {
    fn score(&self) -> f64 {
        (100.0 - self.coi_penalty - self.health_penalty - self.breed_penalty
            + self.complementarity_bonus)
            .clamp(0.0, 100.0)
    }
}

impl CompatibilityScorer {
    pub fn new(
        inbreeding: Arc<InbreedingCalculator>,
        predictor: Arc<GeneticTraitPredictor>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            inbreeding,
            predictor,
            config,
        }
    }

    pub fn compatibility(
        &self,
        sire: &BirdRecord,
        dam: &BirdRecord,
        sire_history: &[TraitRecord],
        dam_history: &[TraitRecord],
    ) -> EngineResult<CompatibilityResult> {
        if let Some(rejection) = self.check_pairing(sire, dam) {
            info!(sire = %sire.id, dam = %dam.id, "Pairing rejected");
            return Ok(rejection);
        }

        let weights = &self.config.compatibility;
        let max_depth = self.config.pedigree.max_depth;
        let coi_percent = self.inbreeding.coi(&sire.id, &dam.id, max_depth)?;
        let risk = risk_level(coi_percent, &self.config.risk);

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();
        let mut terms = ScoreTerms {
            coi_penalty: coi_percent * weights.coi_penalty_per_percent,
            ..ScoreTerms::default()
        };

        for (bird, role) in [(sire, "Sire"), (dam, "Dam")] {
            if bird.gender == Gender::Unknown {
                warnings.push(format!(
                    "{} {} has no recorded sex; confirm before pairing",
                    role, bird.name
                ));
            }
        }

        // Inbreeding
        if coi_percent <= 0.0 {
            reasons.push(format!(
                "No shared ancestors found within {} generations",
                max_depth
            ));
        } else {
            reasons.push(format!(
                "Inbreeding coefficient of {:.2}% costs {:.1} points",
                coi_percent, terms.coi_penalty
            ));
        }
        if risk >= RiskLevel::High {
            warnings.push(format!(
                "{} inbreeding risk: offspring COI of {:.2}% is at or above the {:.2}% threshold",
                risk.label(),
                coi_percent,
                if risk == RiskLevel::Critical {
                    self.config.risk.critical
                } else {
                    self.config.risk.high
                }
            ));
        }

        // Health
        let flags: Vec<String> = [(sire, sire_history), (dam, dam_history)]
            .iter()
            .flat_map(|(bird, history)| self.health_flags(bird, history))
            .collect();
        if !flags.is_empty() {
            terms.health_penalty = (flags.len() as f64 * weights.health_penalty_per_flag)
                .min(weights.health_penalty_cap);
            reasons.push(format!(
                "{} health flag(s) cost {:.1} points",
                flags.len(),
                terms.health_penalty
            ));
            warnings.extend(flags);
            recommendations.push("Health-test flagged birds before breeding".to_string());
        }

        // Breed
        match (sire.same_breed(dam), &sire.breed, &dam.breed) {
            (Some(false), Some(sire_breed), Some(dam_breed)) => {
                terms.breed_penalty = weights.breed_mismatch_penalty;
                reasons.push(format!(
                    "Breeds differ ({} x {}), costing {:.1} points",
                    sire_breed, dam_breed, terms.breed_penalty
                ));
                recommendations
                    .push("Offspring will be crossbred; do not register them as purebred".to_string());
            }
            (Some(true), Some(breed), _) => reasons.push(format!("Both birds are {}", breed)),
            _ => reasons.push("Breed of one or both birds is unknown".to_string()),
        }

        // Complementarity
        match trait_complementarity(
            sire_history,
            dam_history,
            self.config.prediction.trait_score_scale,
        ) {
            Some(complementarity) => {
                terms.complementarity_bonus =
                    complementarity / 100.0 * weights.complementarity_bonus_max;
                reasons.push(format!(
                    "Trait complementarity of {:.0}/100 adds {:.1} points",
                    complementarity, terms.complementarity_bonus
                ));
            }
            None => reasons.push("No shared scored traits to compare".to_string()),
        }

        let prediction = self.predictor.predict(sire, dam, sire_history, dam_history);
        if prediction.data_quality != DataQuality::Full {
            reasons.push(
                "Parent measurements are incomplete; offspring ranges use wider defaults"
                    .to_string(),
            );
        }

        recommendations.insert(0, risk_recommendation(risk).to_string());

        let score = terms.score();
        let verdict = verdict(score, risk);
        debug!(
            sire = %sire.id,
            dam = %dam.id,
            score,
            coi_percent,
            ?risk,
            "Scored pairing"
        );

        Ok(CompatibilityResult {
            sire_id: sire.id.clone(),
            dam_id: dam.id.clone(),
            score,
            coi_percent,
            risk_level: risk,
            rejected: false,
            verdict,
            warnings,
            recommendations,
            reasons,
        })
    }

    /// Self and same-sex pairings never reach the scoring pipeline
    fn check_pairing(&self, sire: &BirdRecord, dam: &BirdRecord) -> Option<CompatibilityResult> {
        let rejected = |coi_percent: f64, reason: String, warning: String| CompatibilityResult {
            sire_id: sire.id.clone(),
            dam_id: dam.id.clone(),
            score: 0.0,
            coi_percent,
            risk_level: RiskLevel::Critical,
            rejected: true,
            verdict: "Rejected: invalid pairing".to_string(),
            warnings: vec![warning],
            recommendations: vec!["Choose a different mate".to_string()],
            reasons: vec![reason],
        };

        if sire.id == dam.id {
            return Some(rejected(
                100.0,
                "Sire and dam are the same bird".to_string(),
                "Self-pairing: inbreeding coefficient is 100%".to_string(),
            ));
        }
        if sire.gender.conflicts_with(&dam.gender) {
            return Some(rejected(
                0.0,
                format!("Both birds are {:?}", sire.gender),
                "Same-sex pairing cannot produce offspring".to_string(),
            ));
        }
        None
    }

    fn health_flags(&self, bird: &BirdRecord, history: &[TraitRecord]) -> Vec<String> {
        let keywords = &self.config.compatibility.health_flag_keywords;
        let mut flags: Vec<String> = latest_by_trait(history)
            .values()
            .filter(|r| r.category == TraitCategory::Health)
            .filter(|r| raises_health_flag(&r.value, keywords))
            .map(|r| format!("Health flag on {}: {} ({})", bird.name, r.trait_name, r.value))
            .collect();
        flags.sort();
        flags
    }
}

/// Words that clear a health result ("Not infected", "Marek's free")
const NEGATIONS: [&str; 7] = ["not", "no", "non", "negative", "clear", "free", "none"];

/// Whole-word keyword match; negated results and `un`/`non` prefixed keywords
/// ("unaffected") never flag
fn raises_health_flag(value: &str, keywords: &[String]) -> bool {
    let value = value.to_lowercase();
    let tokens: Vec<&str> = value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.iter().any(|t| NEGATIONS.contains(t)) {
        return false;
    }
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| tokens.iter().any(|t| *t == k))
}

fn risk_recommendation(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::Low => "Suitable pairing from a genetic diversity standpoint",
        RiskLevel::Moderate => {
            "Acceptable for one generation; bring in unrelated stock for the next"
        }
        RiskLevel::High => "Consider an unrelated mate to reduce inbreeding",
        RiskLevel::Critical => "Do not breed this pair",
    }
}

fn verdict(score: f64, risk: RiskLevel) -> String {
    if risk == RiskLevel::Critical {
        return "Not recommended: critical inbreeding risk".to_string();
    }
    match score {
        s if s >= 80.0 => "Excellent match".to_string(),
        s if s >= 60.0 => "Good match".to_string(),
        s if s >= 40.0 => "Fair match".to_string(),
        _ => "Poor match".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PedigreeConfig;
    use crate::pedigree::PedigreeGraphBuilder;
    use crate::repository::FlockStore;
    use chrono::Utc;

    fn flock() -> FlockStore {
        let mut store = FlockStore::new();
        let birds = [
            BirdRecord::new("f1", "Founder Cock", Gender::Male).with_breed("Orpington"),
            BirdRecord::new("f2", "Founder Hen", Gender::Female).with_breed("Orpington"),
            BirdRecord::new("bro", "Brother", Gender::Male)
                .with_breed("Orpington")
                .with_parents(Some("f1"), Some("f2")),
            BirdRecord::new("sis", "Sister", Gender::Female)
                .with_breed("Orpington")
                .with_parents(Some("f1"), Some("f2")),
            BirdRecord::new("out", "Outcross Hen", Gender::Female).with_breed("Orpington"),
            BirdRecord::new("leg", "Leghorn Hen", Gender::Female).with_breed("Leghorn"),
            BirdRecord::new("cock2", "Second Cock", Gender::Male),
            BirdRecord::new("anon", "Unsexed", Gender::Unknown),
        ];
        for bird in birds {
            store.insert_bird(bird).unwrap();
        }
        store
    }

    fn scorer(store: &FlockStore) -> CompatibilityScorer {
        let mut config = EngineConfig::default();
        config.pedigree = PedigreeConfig {
            lookup_timeout_ms: 0,
            ..PedigreeConfig::default()
        };
        let pedigree = Arc::new(PedigreeGraphBuilder::new(
            Arc::new(store.clone()),
            &config.pedigree,
        ));
        CompatibilityScorer::new(
            Arc::new(InbreedingCalculator::new(pedigree)),
            Arc::new(GeneticTraitPredictor::new(config.prediction.clone())),
            Arc::new(config),
        )
    }

    fn score(store: &FlockStore, sire: &str, dam: &str) -> CompatibilityResult {
        scorer(store)
            .compatibility(store.get(sire).unwrap(), store.get(dam).unwrap(), &[], &[])
            .unwrap()
    }

    #[test]
    fn test_full_siblings_are_critical() {
        let store = flock();
        let result = score(&store, "bro", "sis");
        assert_eq!(result.coi_percent, 25.0);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.to_lowercase().contains("inbreeding")));
        assert_eq!(result.score, 50.0);
        assert!(!result.rejected);
    }

    #[test]
    fn test_unrelated_same_breed_is_low_risk() {
        let store = flock();
        let result = score(&store, "bro", "out");
        assert_eq!(result.coi_percent, 0.0);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.verdict, "Excellent match");
    }

    #[test]
    fn test_breed_mismatch_penalty() {
        let store = flock();
        let result = score(&store, "bro", "leg");
        assert_eq!(result.score, 90.0);
        assert!(result.reasons.iter().any(|r| r.starts_with("Breeds differ")));
    }

    #[test]
    fn test_self_and_same_sex_pairings_are_rejected() {
        let store = flock();
        let own = score(&store, "bro", "bro");
        assert!(own.rejected);
        assert_eq!(own.coi_percent, 100.0);
        assert_eq!(own.risk_level, RiskLevel::Critical);

        let same_sex = score(&store, "bro", "cock2");
        assert!(same_sex.rejected);
        assert_eq!(same_sex.risk_level, RiskLevel::Critical);
        assert_eq!(same_sex.score, 0.0);
    }

    #[test]
    fn test_unknown_sex_only_warns() {
        let store = flock();
        let result = score(&store, "bro", "anon");
        assert!(!result.rejected);
        assert!(result.warnings.iter().any(|w| w.contains("no recorded sex")));
    }

    #[test]
    fn test_health_flags_and_complementarity() {
        let store = flock();
        let now = Utc::now();
        let sire_history = vec![
            TraitRecord::new("bro", TraitCategory::Health, "Marek's test", "Positive", now),
            TraitRecord::new("bro", TraitCategory::Production, "egg production", "2", now),
        ];
        let dam_history = vec![TraitRecord::new(
            "out",
            TraitCategory::Production,
            "egg production",
            "10",
            now,
        )];

        let result = scorer(&store)
            .compatibility(
                store.get("bro").unwrap(),
                store.get("out").unwrap(),
                &sire_history,
                &dam_history,
            )
            .unwrap();

        // One flag costs 10; egg production 2 vs 10 gives complementarity 95,
        // worth 9.5 of the 10 point bonus
        assert!((result.score - 99.5).abs() < 1e-9);
        assert!(result.warnings.iter().any(|w| w.contains("Marek's test")));
    }

    #[test]
    fn test_negated_health_results_do_not_flag() {
        let store = flock();
        let now = Utc::now();
        let sire_history = vec![
            TraitRecord::new("bro", TraitCategory::Health, "Marek's test", "Not infected", now),
            TraitRecord::new("bro", TraitCategory::Health, "MG status", "not a carrier", now),
            TraitRecord::new("bro", TraitCategory::Health, "Leg check", "Unaffected", now),
            TraitRecord::new("bro", TraitCategory::Health, "Pullorum", "Positive", now),
            TraitRecord::new("bro", TraitCategory::Production, "egg production", "2", now),
        ];
        let dam_history = vec![
            TraitRecord::new("out", TraitCategory::Health, "Mite check", "Infection free", now),
            TraitRecord::new("out", TraitCategory::Production, "egg production", "10", now),
        ];

        let result = scorer(&store)
            .compatibility(
                store.get("bro").unwrap(),
                store.get("out").unwrap(),
                &sire_history,
                &dam_history,
            )
            .unwrap();

        let flags: Vec<&String> = result
            .warnings
            .iter()
            .filter(|w| w.starts_with("Health flag"))
            .collect();
        assert_eq!(flags.len(), 1);
        assert!(flags[0].contains("Pullorum"));
        assert!((result.score - 99.5).abs() < 1e-9);
    }

    #[test]
    fn test_health_keywords_match_whole_words() {
        let keywords = vec!["carrier".to_string(), "sick".to_string()];
        assert!(raises_health_flag("Carrier", &keywords));
        assert!(raises_health_flag("sick, isolated", &keywords));
        assert!(!raises_health_flag("carriers tested", &keywords));
        assert!(!raises_health_flag("homesick", &keywords));
        assert!(!raises_health_flag("No carrier", &keywords));
    }
}
