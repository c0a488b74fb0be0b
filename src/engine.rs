use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::breeding_value::BreedingValueService;
use crate::compatibility::CompatibilityScorer;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::inbreeding::{CoiBreakdown, InbreedingCalculator};
use crate::mates::{CancellationToken, MateRecommendationRanker};
use crate::pedigree::PedigreeGraphBuilder;
use crate::prediction::GeneticTraitPredictor;
use crate::repository::{BirdRepository, FlockStore, TraitRepository};
use crate::types::*;

/// Entry point for every breeding computation.
///
/// Holds only shared, immutable collaborators; every call is independent
/// and the engine can be shared across threads.
pub struct BreedingEngine {
    birds: Arc<dyn BirdRepository>,
    traits: Arc<dyn TraitRepository>,
    config: Arc<EngineConfig>,
    pedigree: Arc<PedigreeGraphBuilder>,
    inbreeding: Arc<InbreedingCalculator>,
    predictor: Arc<GeneticTraitPredictor>,
    breeding_value: Arc<BreedingValueService>,
    compatibility: CompatibilityScorer,
    ranker: MateRecommendationRanker,
}

impl BreedingEngine {
    pub fn new(
        birds: Arc<dyn BirdRepository>,
        traits: Arc<dyn TraitRepository>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let pedigree = Arc::new(PedigreeGraphBuilder::new(birds.clone(), &config.pedigree));
        let inbreeding = Arc::new(InbreedingCalculator::new(pedigree.clone()));
        let predictor = Arc::new(GeneticTraitPredictor::new(config.prediction.clone()));
        let breeding_value = Arc::new(BreedingValueService::new(
            birds.clone(),
            traits.clone(),
            config.breeding_value.clone(),
        ));
        let compatibility =
            CompatibilityScorer::new(inbreeding.clone(), predictor.clone(), config.clone());
        let ranker = MateRecommendationRanker::new(
            birds.clone(),
            traits.clone(),
            pedigree.clone(),
            inbreeding.clone(),
            predictor.clone(),
            breeding_value.clone(),
            config.clone(),
        );

        Ok(Self {
            birds,
            traits,
            config,
            pedigree,
            inbreeding,
            predictor,
            breeding_value,
            compatibility,
            ranker,
        })
    }

    /// Engine over an in-memory flock
    pub fn from_store(store: FlockStore, config: EngineConfig) -> EngineResult<Self> {
        let store = Arc::new(store);
        Self::new(store.clone(), store, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ancestor tree, never deeper than the configured maximum
    pub fn compute_pedigree(&self, bird_id: &str, max_depth: u32) -> EngineResult<PedigreeNode> {
        let depth = self.clamp_depth(max_depth);
        self.pedigree.build(bird_id, depth)
    }

    pub fn compute_compatibility(
        &self,
        sire_id: &str,
        dam_id: &str,
    ) -> EngineResult<CompatibilityResult> {
        let sire = self.bird(sire_id)?;
        let dam = self.bird(dam_id)?;
        let result = self.compatibility.compatibility(
            &sire,
            &dam,
            &self.history(sire_id),
            &self.history(dam_id),
        )?;
        info!(
            sire = sire_id,
            dam = dam_id,
            score = result.score,
            risk = result.risk_level.label(),
            "Computed compatibility"
        );
        Ok(result)
    }

    pub fn predict_offspring(&self, sire_id: &str, dam_id: &str) -> EngineResult<BreedingPrediction> {
        let sire = self.bird(sire_id)?;
        let dam = self.bird(dam_id)?;
        Ok(self
            .predictor
            .predict(&sire, &dam, &self.history(sire_id), &self.history(dam_id)))
    }

    pub fn compute_breeding_value(&self, bird_id: &str) -> EngineResult<BreedingValueResult> {
        self.breeding_value.bvi(bird_id)
    }

    /// Best `top_n` mates for a bird from the whole flock
    pub fn find_best_mates(&self, bird_id: &str, top_n: usize) -> EngineResult<MateRecommendations> {
        self.find_best_mates_with_cancel(bird_id, top_n, &CancellationToken::new())
    }

    pub fn find_best_mates_with_cancel(
        &self,
        bird_id: &str,
        top_n: usize,
        cancel: &CancellationToken,
    ) -> EngineResult<MateRecommendations> {
        let pool = self
            .birds
            .all_birds()
            .map_err(|e| EngineError::Unexpected(e.to_string()))?;
        self.ranker
            .find_best_mates(bird_id, &pool, top_n, cancel, Utc::now())
    }

    /// COI percent for a prospective pairing at the configured depth
    pub fn compute_coi(&self, sire_id: &str, dam_id: &str) -> EngineResult<f64> {
        self.inbreeding
            .coi(sire_id, dam_id, self.config.pedigree.max_depth)
    }

    pub fn coi_breakdown(&self, sire_id: &str, dam_id: &str) -> EngineResult<CoiBreakdown> {
        self.inbreeding
            .breakdown(sire_id, dam_id, self.config.pedigree.max_depth)
    }

    /// Direct offspring of a bird
    pub fn descendants(&self, bird_id: &str) -> EngineResult<Vec<BirdRecord>> {
        self.bird(bird_id)?;
        Ok(self.pedigree.descendants(bird_id))
    }

    pub fn descendant_tree(&self, bird_id: &str, max_depth: u32) -> EngineResult<Vec<DescendantEntry>> {
        self.bird(bird_id)?;
        Ok(self
            .pedigree
            .descendant_tree(bird_id, self.clamp_depth(max_depth)))
    }

    fn clamp_depth(&self, requested: u32) -> u32 {
        let limit = self.config.pedigree.max_depth;
        if requested > limit {
            warn!(requested, limit, "Requested depth exceeds configured maximum");
        }
        requested.min(limit)
    }

    fn bird(&self, id: &str) -> EngineResult<BirdRecord> {
        self.birds
            .find_by_id(id)
            .map_err(|e| EngineError::Unexpected(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(id))
    }

    fn history(&self, id: &str) -> Vec<TraitRecord> {
        self.traits.history_for(id).unwrap_or_else(|e| {
            warn!(bird_id = id, error = %e, "Trait history unavailable");
            Vec::new()
        })
    }
}
