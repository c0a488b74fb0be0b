use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::BreedingValueConfig;
use crate::error::{EngineError, EngineResult};
use crate::repository::{BirdRepository, TraitRepository};
use crate::types::*;

const WIN_WORDS: [&str; 7] = ["win", "wins", "won", "winner", "1st", "first", "champion"];
const NEGATIONS: [&str; 5] = ["no", "not", "never", "without", "didn"];

/// Component of the index, used to pick advice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Traits,
    Shows,
    Offspring,
}

impl Component {
    fn advice(&self) -> &'static str {
        match self {
            Component::Traits => "record more trait data to improve ranking",
            Component::Shows => "enter shows to demonstrate merit",
            Component::Offspring => "log offspring to build a progeny record",
        }
    }
}

/// Computes the breeding value index of a single bird
pub struct BreedingValueService {
    birds: Arc<dyn BirdRepository>,
    traits: Arc<dyn TraitRepository>,
    config: BreedingValueConfig,
}

impl BreedingValueService {
    pub fn new(
        birds: Arc<dyn BirdRepository>,
        traits: Arc<dyn TraitRepository>,
        config: BreedingValueConfig,
    ) -> Self {
        Self {
            birds,
            traits,
            config,
        }
    }

    pub fn bvi(&self, bird_id: &str) -> EngineResult<BreedingValueResult> {
        let bird = self
            .birds
            .find_by_id(bird_id)
            .map_err(|e| EngineError::Unexpected(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(bird_id))?;

        let history = self.traits.history_for(bird_id).unwrap_or_else(|e| {
            warn!(bird_id, error = %e, "Trait history unavailable, scoring without it");
            Vec::new()
        });
        let offspring_count = match self.birds.get_offspring(bird_id) {
            Ok(children) => children.len(),
            Err(e) => {
                warn!(bird_id, error = %e, "Offspring lookup failed, counting none");
                0
            }
        };

        Ok(self.evaluate(&bird, &history, offspring_count))
    }

    /// Score a bird from data already in hand
    pub fn evaluate(
        &self,
        bird: &BirdRecord,
        history: &[TraitRecord],
        offspring_count: usize,
    ) -> BreedingValueResult {
        let c = &self.config;

        let recorded = recorded_traits(bird, history);
        let catalogue: HashSet<String> = c
            .trait_catalogue
            .iter()
            .map(|t| t.trim().to_lowercase())
            .collect();
        let covered = recorded.iter().filter(|t| catalogue.contains(*t)).count();
        let trait_completeness = (covered as f64 / catalogue.len().max(1) as f64).clamp(0.0, 1.0);

        let shows: Vec<&TraitRecord> = history
            .iter()
            .filter(|r| r.category == TraitCategory::Show)
            .collect();
        let show_total = shows.len();
        let show_wins = shows.iter().filter(|r| is_win(r)).count();
        let show_performance = if show_total == 0 {
            0.0
        } else {
            show_wins as f64 / show_total as f64
        };

        let offspring_volume = ((1.0 + offspring_count as f64).ln()
            / (1.0 + c.offspring_cap as f64).ln())
        .clamp(0.0, 1.0);

        let weight_sum = c.trait_weight + c.show_weight + c.offspring_weight;
        let bvi = ((c.trait_weight * trait_completeness
            + c.show_weight * show_performance
            + c.offspring_weight * offspring_volume)
            / weight_sum)
            .clamp(0.0, 1.0);

        let rating = if trait_completeness == 0.0 && show_performance == 0.0 && offspring_volume == 0.0
        {
            BviRating::Unrated
        } else if bvi >= c.elite {
            BviRating::Elite
        } else if bvi >= c.strong {
            BviRating::Strong
        } else if bvi >= c.average {
            BviRating::Average
        } else {
            BviRating::Developing
        };

        let weakest = [
            (Component::Traits, trait_completeness),
            (Component::Shows, show_performance),
            (Component::Offspring, offspring_volume),
        ]
        .into_iter()
        .fold(None::<(Component, f64)>, |acc, (component, value)| match acc {
            Some((_, best)) if best <= value => acc,
            _ => Some((component, value)),
        });

        let recommendation = recommendation(rating, weakest);
        debug!(bird_id = %bird.id, bvi, ?rating, "Computed breeding value");

        BreedingValueResult {
            bird_id: bird.id.clone(),
            bvi,
            rating,
            trait_count: recorded.len(),
            show_wins,
            show_total,
            offspring_count,
            trait_completeness,
            show_performance,
            offspring_volume,
            recommendation,
        }
    }
}

/// Distinct trait names on record, counting measurements held on the bird itself
fn recorded_traits(bird: &BirdRecord, history: &[TraitRecord]) -> HashSet<String> {
    let mut recorded: HashSet<String> = history
        .iter()
        .filter(|r| !matches!(r.category, TraitCategory::Show))
        .map(TraitRecord::key)
        .collect();
    if bird.weight_grams.is_some() {
        recorded.insert("weight".to_string());
    }
    if bird.height_cm.is_some() {
        recorded.insert("height".to_string());
    }
    if bird.color.is_some() {
        recorded.insert("color".to_string());
    }
    recorded
}

/// Show result counts as a win on a whole-word marker ("1st", "Won",
/// "Best in Show") that is not negated, or a numeric placing of 1
fn is_win(record: &TraitRecord) -> bool {
    if record.numeric_value == Some(1.0) {
        return true;
    }
    let value = record.value.to_lowercase();
    let tokens: Vec<&str> = value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.iter().any(|t| NEGATIONS.contains(t)) {
        return false;
    }
    tokens.iter().any(|t| WIN_WORDS.contains(t))
        || tokens.windows(2).any(|w| w == ["best", "in"])
}

fn recommendation(rating: BviRating, weakest: Option<(Component, f64)>) -> String {
    let lead = match rating {
        BviRating::Unrated => {
            return "Unrated: record traits, show results or offspring to rate this bird"
                .to_string()
        }
        BviRating::Elite => "Elite breeder, prioritise in the breeding program",
        BviRating::Strong => "Strong breeding candidate",
        BviRating::Average => "Average breeding value",
        BviRating::Developing => "Developing record",
    };
    match weakest {
        Some((component, value)) if value < 1.0 => format!("{}; {}", lead, component.advice()),
        _ => format!("{}; maintain current records", lead),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FlockStore;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn service(store: FlockStore) -> BreedingValueService {
        let store = Arc::new(store);
        BreedingValueService::new(store.clone(), store, BreedingValueConfig::default())
    }

    fn record(category: TraitCategory, name: &str, value: &str) -> TraitRecord {
        TraitRecord::new("b", category, name, value, Utc::now())
    }

    #[test]
    fn test_no_data_is_unrated() {
        let mut store = FlockStore::new();
        store.insert_bird(BirdRecord::new("b", "Bare", Gender::Female)).unwrap();
        let result = service(store).bvi("b").unwrap();
        assert_eq!(result.rating, BviRating::Unrated);
        assert_eq!(result.bvi, 0.0);
        assert!(result.recommendation.starts_with("Unrated"));
    }

    #[test]
    fn test_unknown_bird() {
        let result = service(FlockStore::new()).bvi("ghost");
        assert_eq!(result.unwrap_err(), EngineError::not_found("ghost"));
    }

    #[test]
    fn test_show_wins_match_whole_words() {
        let win = |value: &str| is_win(&record(TraitCategory::Show, "Show", value));
        assert!(win("1st place"));
        assert!(win("Won best in class"));
        assert!(win("Best in Show"));
        assert!(win("Champion"));
        assert!(win("1"));

        assert!(!win("no win"));
        assert!(!win("did not win"));
        assert!(!win("21st place"));
        assert!(!win("Window display"));
        assert!(!win("Placed"));
        assert!(!win("11"));
    }

    #[test]
    fn test_components_and_rating() {
        let mut store = FlockStore::new();
        store
            .insert_bird(BirdRecord::new("b", "Champion", Gender::Male).with_weight(3800.0))
            .unwrap();
        for i in 0..20 {
            store
                .insert_bird(
                    BirdRecord::new(format!("c{}", i), "Chick", Gender::Female)
                        .with_parents(Some("b"), None),
                )
                .unwrap();
        }
        for (category, name, value) in [
            (TraitCategory::Physical, "height", "45"),
            (TraitCategory::Color, "color", "Red"),
            (TraitCategory::Temperament, "temperament", "8"),
            (TraitCategory::Show, "County Fair", "1st place"),
            (TraitCategory::Show, "State Fair", "Won best in class"),
            (TraitCategory::Show, "Winter Show", "3"),
            (TraitCategory::Show, "Spring Show", "Placed"),
        ] {
            store.add_trait(record(category, name, value));
        }

        let result = service(store).bvi("b").unwrap();
        // weight, height, color, temperament out of 12 catalogue traits
        assert_relative_eq!(result.trait_completeness, 4.0 / 12.0, epsilon = 1e-9);
        assert_eq!(result.show_total, 4);
        assert_eq!(result.show_wins, 2);
        assert_relative_eq!(result.show_performance, 0.5);
        assert_relative_eq!(result.offspring_volume, 1.0);
        assert_eq!(result.offspring_count, 20);

        let expected = 0.40 * (4.0 / 12.0) + 0.35 * 0.5 + 0.25 * 1.0;
        assert_relative_eq!(result.bvi, expected, epsilon = 1e-9);
        assert_eq!(result.rating, BviRating::Average);
        assert!(result.recommendation.contains("record more trait data"));
    }

    #[test]
    fn test_rating_thresholds() {
        let svc = service(FlockStore::new());
        let bird = BirdRecord::new("b", "B", Gender::Female);

        // Perfect shows only: 0.35
        let shows = vec![record(TraitCategory::Show, "Fair", "win")];
        let result = svc.evaluate(&bird, &shows, 0);
        assert_relative_eq!(result.bvi, 0.35, epsilon = 1e-9);
        assert_eq!(result.rating, BviRating::Developing);

        // Weight on record, shows and saturated offspring
        let weighed = bird.clone().with_weight(2500.0);
        let result = svc.evaluate(&weighed, &shows, 50);
        assert_relative_eq!(result.bvi, 0.40 / 12.0 + 0.60, epsilon = 1e-9);
        assert_eq!(result.rating, BviRating::Strong);
    }

    #[test]
    fn test_bvi_stays_in_unit_interval() {
        let svc = service(FlockStore::new());
        let bird = BirdRecord::new("b", "B", Gender::Female)
            .with_weight(2000.0)
            .with_height(30.0)
            .with_color("black");
        let history: Vec<TraitRecord> = BreedingValueConfig::default()
            .trait_catalogue
            .iter()
            .map(|t| record(TraitCategory::Other, t, "5"))
            .chain(std::iter::once(record(TraitCategory::Show, "Fair", "Champion")))
            .collect();

        for offspring in [0usize, 1, 5, 20, 10_000] {
            let result = svc.evaluate(&bird, &history, offspring);
            assert!((0.0..=1.0).contains(&result.bvi));
        }
        let top = svc.evaluate(&bird, &history, 10_000);
        assert_relative_eq!(top.bvi, 1.0, epsilon = 1e-9);
        assert_eq!(top.rating, BviRating::Elite);
        assert!(top.recommendation.ends_with("maintain current records"));
    }
}
