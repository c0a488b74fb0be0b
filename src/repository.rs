use std::collections::HashMap;

use crate::error::{EngineError, LookupError};
use crate::types::{BirdRecord, TraitRecord};

/// Source of bird snapshots. Implementations must be shareable across threads.
pub trait BirdRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<BirdRecord>, LookupError>;

    /// Birds whose sire or dam is `id`
    fn get_offspring(&self, id: &str) -> Result<Vec<BirdRecord>, LookupError>;

    /// Every bird available as a mate candidate
    fn all_birds(&self) -> Result<Vec<BirdRecord>, LookupError>;

    /// Ids of birds currently in an active breeding pair with `id`
    fn active_partners(&self, _id: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Source of recorded trait history
pub trait TraitRepository: Send + Sync {
    fn history_for(&self, id: &str) -> Result<Vec<TraitRecord>, LookupError>;
}

/// In-memory flock snapshot implementing both repositories
#[derive(Debug, Default, Clone)]
pub struct FlockStore {
    birds: HashMap<String, BirdRecord>,
    order: Vec<String>,
    traits: HashMap<String, Vec<TraitRecord>>,
    active_pairs: Vec<(String, String)>,
}

impl FlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a bird after validating it
    pub fn insert_bird(&mut self, bird: BirdRecord) -> Result<(), EngineError> {
        bird.validate()?;
        if !self.birds.contains_key(&bird.id) {
            self.order.push(bird.id.clone());
        }
        self.birds.insert(bird.id.clone(), bird);
        Ok(())
    }

    pub fn add_trait(&mut self, record: TraitRecord) {
        self.traits
            .entry(record.bird_id.clone())
            .or_default()
            .push(record);
    }

    pub fn add_active_pair(&mut self, a: impl Into<String>, b: impl Into<String>) {
        self.active_pairs.push((a.into(), b.into()));
    }

    pub fn bird_count(&self) -> usize {
        self.birds.len()
    }

    pub fn trait_count(&self) -> usize {
        self.traits.values().map(Vec::len).sum()
    }

    pub fn get(&self, id: &str) -> Option<&BirdRecord> {
        self.birds.get(id)
    }
}

impl BirdRepository for FlockStore {
    fn find_by_id(&self, id: &str) -> Result<Option<BirdRecord>, LookupError> {
        Ok(self.birds.get(id).cloned())
    }

    fn get_offspring(&self, id: &str) -> Result<Vec<BirdRecord>, LookupError> {
        Ok(self
            .order
            .iter()
            .filter_map(|bird_id| self.birds.get(bird_id))
            .filter(|bird| {
                bird.sire_id.as_deref() == Some(id) || bird.dam_id.as_deref() == Some(id)
            })
            .cloned()
            .collect())
    }

    fn all_birds(&self) -> Result<Vec<BirdRecord>, LookupError> {
        Ok(self
            .order
            .iter()
            .filter_map(|id| self.birds.get(id))
            .cloned()
            .collect())
    }

    fn active_partners(&self, id: &str) -> Vec<String> {
        self.active_pairs
            .iter()
            .filter_map(|(a, b)| {
                if a == id {
                    Some(b.clone())
                } else if b == id {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }
}

impl TraitRepository for FlockStore {
    fn history_for(&self, id: &str) -> Result<Vec<TraitRecord>, LookupError> {
        Ok(self.traits.get(id).cloned().unwrap_or_default())
    }
}

/// Latest record per trait name, keyed by lowercase name
pub fn latest_by_trait(records: &[TraitRecord]) -> HashMap<String, &TraitRecord> {
    let mut latest: HashMap<String, &TraitRecord> = HashMap::new();
    for record in records {
        latest
            .entry(record.key())
            .and_modify(|current| {
                if record.recorded_at >= current.recorded_at {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    latest
}
