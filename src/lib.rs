//! # Flock Genetics
//!
//! Breeding analysis engine for poultry flocks.
//!
//! ## Features
//!
//! - Bounded-depth pedigree trees with guest parents and per-node lookup timeouts
//! - Wright path-counting coefficient of inbreeding with risk levels
//! - Offspring prediction: weight and height ranges, Punnett-square color, pattern and comb odds
//! - Pairing compatibility scores with warnings and recommendations
//! - Breeding value index from trait records, show results and offspring
//! - Parallel, cancellable mate ranking
//! - Text, JSON, CSV and TSV reports

pub mod breeding_value;
pub mod compatibility;
pub mod config;
pub mod engine;
pub mod error;
pub mod inbreeding;
pub mod loader;
pub mod mates;
pub mod output;
pub mod pedigree;
pub mod prediction;
pub mod repository;
pub mod types;

// Re-export key types
pub use breeding_value::BreedingValueService;
pub use compatibility::CompatibilityScorer;
pub use config::EngineConfig;
pub use engine::BreedingEngine;
pub use error::{EngineError, EngineResult, LookupError};
pub use inbreeding::{CoiBreakdown, InbreedingCalculator};
pub use loader::{FlockLoader, FlockSnapshot};
pub use mates::{CancellationToken, MateRecommendationRanker};
pub use output::{Report, ReportFormat, ReportGenerator};
pub use pedigree::{genetic_contribution, PedigreeGraphBuilder};
pub use prediction::GeneticTraitPredictor;
pub use repository::{BirdRepository, FlockStore, TraitRepository};
pub use types::*;
