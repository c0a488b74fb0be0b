use approx::assert_relative_eq;
use flock_genetics::config::RiskThresholds;
use flock_genetics::inbreeding::risk_level;
use flock_genetics::*;
use std::io::Write;
use tempfile::NamedTempFile;

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
        BirdRecord::new("out", "Outcross Hen", Gender::Female),
        BirdRecord::new("big", "Big Cock", Gender::Male)
            .with_weight(3000.0)
            .with_height(40.0)
            .with_color("black"),
        BirdRecord::new("small", "Small Hen", Gender::Female)
            .with_weight(2500.0)
            .with_height(35.0)
            .with_color("buff"),
        BirdRecord::new("anon", "Unsexed", Gender::Unknown),
    ];
    for bird in birds {
        store.insert_bird(bird).unwrap();
    }
    store.add_active_pair("bro", "out");
    store
}

fn engine() -> BreedingEngine {
    BreedingEngine::from_store(flock(), EngineConfig::default()).unwrap()
}

/// Male line a0..a7, each with an unrelated founder dam
fn long_line() -> BreedingEngine {
    let mut store = FlockStore::new();
    store.insert_bird(BirdRecord::new("a0", "A0", Gender::Male)).unwrap();
    for i in 1..=7 {
        let dam = format!("h{}", i);
        let sire = format!("a{}", i - 1);
        store
            .insert_bird(BirdRecord::new(&dam, dam.to_uppercase(), Gender::Female))
            .unwrap();
        store
            .insert_bird(
                BirdRecord::new(format!("a{}", i), format!("A{}", i), Gender::Male)
                    .with_parents(Some(&sire), Some(&dam)),
            )
            .unwrap();
    }
    BreedingEngine::from_store(store, EngineConfig::default()).unwrap()
}

#[test]
fn test_pedigree_depth_is_bounded() {
    let engine = long_line();
    for requested in [0, 1, 3, 5, 9] {
        let tree = engine.compute_pedigree("a7", requested).unwrap();
        assert!(tree.depth() <= requested.min(5));
    }
    let tree = engine.compute_pedigree("a7", 5).unwrap();
    assert_eq!(tree.depth(), 5);
    assert!(tree.ancestor_ids().contains(&"a2".to_string()));
    assert!(!tree.ancestor_ids().contains(&"a1".to_string()));
}

#[test]
fn test_genetic_contribution_halves() {
    for d in 0..10 {
        assert_relative_eq!(genetic_contribution(d), 50.0 / 2f64.powi(d as i32));
    }
    assert!(genetic_contribution(u32::MAX) >= 0.0);
}

#[test]
fn test_self_pairing_is_critical() {
    let engine = engine();
    assert_eq!(engine.compute_coi("bro", "bro").unwrap(), 100.0);

    let result = engine.compute_compatibility("bro", "bro").unwrap();
    assert_eq!(result.coi_percent, 100.0);
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert!(result.rejected);
}

#[test]
fn test_coi_is_symmetric() {
    let engine = engine();
    let ids = ["f1", "f2", "bro", "sis", "out", "big", "small"];
    for a in ids {
        for b in ids {
            let ab = engine.compute_coi(a, b).unwrap();
            let ba = engine.compute_coi(b, a).unwrap();
            assert_relative_eq!(ab, ba, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_color_probabilities_sum_to_100() {
    let engine = engine();
    for (sire, dam) in [("bro", "sis"), ("big", "small"), ("f1", "out"), ("big", "sis")] {
        let prediction = engine.predict_offspring(sire, dam).unwrap();
        for dist in [
            &prediction.color_probabilities,
            &prediction.pattern_probabilities,
            &prediction.comb_probabilities,
        ] {
            let total: f64 = dist.iter().map(|p| p.percentage).sum();
            assert!((total - 100.0).abs() <= 0.5, "{} x {} sums to {}", sire, dam, total);
            for pair in dist.windows(2) {
                assert!(pair[0].percentage >= pair[1].percentage);
            }
        }
    }
}

#[test]
fn test_risk_level_boundaries() {
    let thresholds = RiskThresholds::default();
    assert_eq!(risk_level(0.0, &thresholds), RiskLevel::Low);
    assert_eq!(risk_level(6.3, &thresholds), RiskLevel::Moderate);
    assert_eq!(risk_level(13.0, &thresholds), RiskLevel::High);
    assert_eq!(risk_level(30.0, &thresholds), RiskLevel::Critical);
}

#[test]
fn test_breeding_values_stay_in_range() {
    let engine = engine();
    for id in ["f1", "f2", "bro", "sis", "out", "big", "small", "anon"] {
        let result = engine.compute_breeding_value(id).unwrap();
        assert!((0.0..=1.0).contains(&result.bvi));
    }

    let bare = engine.compute_breeding_value("out").unwrap();
    assert_eq!(bare.rating, BviRating::Unrated);

    let founder = engine.compute_breeding_value("f1").unwrap();
    assert_eq!(founder.offspring_count, 2);
    assert_ne!(founder.rating, BviRating::Unrated);
}

#[test]
fn test_mate_ranking_invariants() {
    let engine = engine();
    for focal in ["f1", "f2", "bro", "sis", "out", "big", "small"] {
        let result = engine.find_best_mates(focal, 10).unwrap();
        let focal_bird = &result.focal_bird;
        let partners = flock().active_partners(focal);

        for candidate in &result.candidates {
            assert_ne!(candidate.bird.id, focal);
            assert_ne!(candidate.bird.gender, focal_bird.gender);
            assert_ne!(candidate.bird.gender, Gender::Unknown);
            assert!(!partners.contains(&candidate.bird.id));
            assert!((0.0..=100.0).contains(&candidate.pairing_score));
        }
    }

    let bro = engine.find_best_mates("bro", 10).unwrap();
    assert!(bro.candidates.iter().all(|c| c.bird.id != "out"));
    // f2, sis, small
    assert_eq!(bro.total_evaluated, 3);
}

#[test]
fn test_unsexed_focal_has_no_mates() {
    let result = engine().find_best_mates("anon", 5).unwrap();
    assert!(result.candidates.is_empty());
    assert_eq!(result.total_evaluated, 0);
}

#[test]
fn test_cancelled_ranking_returns_cancelled() {
    let token = CancellationToken::new();
    token.cancel();
    let result = engine().find_best_mates_with_cancel("big", 5, &token);
    assert_eq!(result.unwrap_err(), EngineError::Cancelled);
}

#[test]
fn test_weight_range_brackets_parental_mean() {
    let prediction = engine().predict_offspring("big", "small").unwrap();
    let range = prediction.weight_range;
    assert!(range.contains(2750.0));
    assert!((2300.0..=2500.0).contains(&range.min));
    assert!((3000.0..=3200.0).contains(&range.max));
    assert_eq!(prediction.data_quality, DataQuality::Full);
    assert!(prediction.height_range.contains(37.5));
}

#[test]
fn test_full_siblings_flag_inbreeding() {
    let result = engine().compute_compatibility("bro", "sis").unwrap();
    assert_relative_eq!(result.coi_percent, 25.0, epsilon = 1e-9);
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.to_lowercase().contains("inbreeding")));
}

#[test]
fn test_unrelated_birds_are_low_risk() {
    let result = engine().compute_compatibility("big", "small").unwrap();
    assert_eq!(result.coi_percent, 0.0);
    assert_eq!(result.risk_level, RiskLevel::Low);
    assert!(!result.rejected);
}

#[test]
fn test_unknown_bird_is_not_found() {
    let engine = engine();
    assert_eq!(
        engine.compute_breeding_value("ghost").unwrap_err(),
        EngineError::not_found("ghost")
    );
    assert!(matches!(
        engine.find_best_mates("ghost", 3),
        Err(EngineError::NotFound { .. })
    ));
    assert!(matches!(
        engine.compute_pedigree("ghost", 3),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn test_loaded_flock_end_to_end() {
    let snapshot = FlockSnapshot {
        birds: flock().all_birds().unwrap(),
        active_pairs: vec![("bro".to_string(), "out".to_string())],
    };
    let mut flock_file = NamedTempFile::new().unwrap();
    flock_file
        .write_all(serde_json::to_string(&snapshot).unwrap().as_bytes())
        .unwrap();

    let mut traits_file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    traits_file
        .write_all(
            b"bird_id,category,trait,value,unit,recorded_at\n\
              big,show,County Fair,Champion,,2024-04-01\n\
              big,temperament,alertness,9,,2024-04-02\n",
        )
        .unwrap();

    let store = FlockLoader::new()
        .load(flock_file.path(), Some(traits_file.path()))
        .unwrap();
    let engine = BreedingEngine::from_store(store, EngineConfig::default()).unwrap();

    let bvi = engine.compute_breeding_value("big").unwrap();
    assert_eq!(bvi.show_wins, 1);
    assert_eq!(bvi.show_total, 1);

    let sibs = engine.compute_compatibility("bro", "sis").unwrap();
    assert_relative_eq!(sibs.coi_percent, 25.0, epsilon = 1e-9);

    let report = ReportGenerator::new(ReportFormat::Json)
        .render(&Report::BreedingValue(bvi))
        .unwrap();
    assert!(report.contains("\"bird_id\": \"big\""));
}
