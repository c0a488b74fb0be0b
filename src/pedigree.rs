use crossbeam::channel::{self, RecvTimeoutError};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PedigreeConfig;
use crate::error::{EngineError, EngineResult, LookupError};
use crate::repository::BirdRepository;
use crate::types::{BirdRecord, DescendantEntry, PedigreeNode};

/// Expected genetic share, in percent, of an ancestor `d` generations above
/// the root's parents. Parents give 50, grandparents 25, and so on.
pub fn genetic_contribution(d: u32) -> f64 {
    let divisor = 2f64.powi(d.min(i32::MAX as u32) as i32);
    (50.0 / divisor).max(0.0)
}

/// Builds bounded-depth ancestor trees and descendant lists
pub struct PedigreeGraphBuilder {
    birds: Arc<dyn BirdRepository>,
    lookup_timeout: Option<Duration>,
}

impl PedigreeGraphBuilder {
    pub fn new(birds: Arc<dyn BirdRepository>, config: &PedigreeConfig) -> Self {
        Self {
            birds,
            lookup_timeout: config.lookup_timeout(),
        }
    }

    /// Build the ancestor tree of `bird_id`, at most `max_depth` generations deep.
    ///
    /// Only the root is required to resolve. Unknown, missing, timed out or
    /// cyclic parents become guest parents and end that branch.
    pub fn build(&self, bird_id: &str, max_depth: u32) -> EngineResult<PedigreeNode> {
        let root = match self.lookup(bird_id) {
            Ok(Some(bird)) => bird,
            Ok(None) => return Err(EngineError::not_found(bird_id)),
            Err(e) => return Err(EngineError::Unexpected(e.to_string())),
        };

        let mut path = HashSet::new();
        path.insert(root.id.clone());

        let tree = self.expand(root, 0, max_depth, &path);
        debug!(
            bird_id,
            max_depth,
            nodes = tree.node_count(),
            depth = tree.depth(),
            "Built pedigree"
        );
        Ok(tree)
    }

    fn expand(
        &self,
        bird: BirdRecord,
        generation: u32,
        max_depth: u32,
        path: &HashSet<String>,
    ) -> PedigreeNode {
        let sire_id = bird.sire_id.clone();
        let dam_id = bird.dam_id.clone();
        let mut node = PedigreeNode::resolved(bird, generation);

        if generation >= max_depth {
            node.is_guest_parent = true;
            return node;
        }

        // Each side reads the same path and clones it on descent, so an
        // ancestor shared by both sides is never mistaken for a cycle.
        let (sire, dam) = rayon::join(
            || self.resolve_parent(sire_id.as_deref(), generation + 1, max_depth, path),
            || self.resolve_parent(dam_id.as_deref(), generation + 1, max_depth, path),
        );
        node.sire = Some(Box::new(sire));
        node.dam = Some(Box::new(dam));
        node
    }

    fn resolve_parent(
        &self,
        parent_id: Option<&str>,
        generation: u32,
        max_depth: u32,
        path: &HashSet<String>,
    ) -> PedigreeNode {
        let Some(id) = parent_id else {
            return PedigreeNode::guest(None, generation);
        };

        if path.contains(id) {
            warn!(
                bird_id = id,
                generation, "Pedigree cycle detected, treating ancestor as guest parent"
            );
            let mut node = PedigreeNode::guest(Some(id.to_string()), generation);
            node.integrity_warning = Some(format!(
                "Data integrity: {} appears as its own ancestor",
                id
            ));
            return node;
        }

        match self.lookup(id) {
            Ok(Some(parent)) => {
                let mut branch = path.clone();
                branch.insert(id.to_string());
                self.expand(parent, generation, max_depth, &branch)
            }
            Ok(None) => {
                debug!(bird_id = id, "Parent not in flock, using guest parent");
                PedigreeNode::guest(Some(id.to_string()), generation)
            }
            Err(e) => {
                warn!(bird_id = id, error = %e, "Parent lookup failed, using guest parent");
                PedigreeNode::guest(Some(id.to_string()), generation)
            }
        }
    }

    /// Birds listing `bird_id` as sire or dam, one generation down.
    pub fn descendants(&self, bird_id: &str) -> Vec<BirdRecord> {
        match self.birds.get_offspring(bird_id) {
            Ok(children) => children,
            Err(e) => {
                warn!(bird_id, error = %e, "Offspring lookup failed");
                Vec::new()
            }
        }
    }

    /// Breadth-first descendants down to `max_depth` generations.
    pub fn descendant_tree(&self, bird_id: &str, max_depth: u32) -> Vec<DescendantEntry> {
        let mut entries = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(bird_id.to_string());

        let mut queue = VecDeque::new();
        queue.push_back((bird_id.to_string(), 0u32));

        while let Some((parent_id, generation)) = queue.pop_front() {
            if generation >= max_depth {
                continue;
            }
            for child in self.descendants(&parent_id) {
                if !visited.insert(child.id.clone()) {
                    continue;
                }
                queue.push_back((child.id.clone(), generation + 1));
                entries.push(DescendantEntry {
                    bird: child,
                    generation: generation + 1,
                    via_parent: parent_id.clone(),
                });
            }
        }

        entries
    }

    /// Run one lookup, bounded by the configured timeout.
    fn lookup(&self, id: &str) -> Result<Option<BirdRecord>, LookupError> {
        let Some(timeout) = self.lookup_timeout else {
            return self.birds.find_by_id(id);
        };

        let (tx, rx) = channel::bounded(1);
        let birds = Arc::clone(&self.birds);
        let owned_id = id.to_string();
        thread::Builder::new()
            .name("bird-lookup".to_string())
            .spawn(move || {
                // The receiver is gone if we already timed out.
                let _ = tx.send(birds.find_by_id(&owned_id));
            })
            .map_err(|e| LookupError::Unavailable {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(LookupError::Timeout {
                id: id.to_string(),
                millis: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(LookupError::Unavailable {
                id: id.to_string(),
                reason: "lookup worker exited without a result".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FlockStore;
    use crate::types::Gender;

    struct CyclicFlock;

    impl BirdRepository for CyclicFlock {
        fn find_by_id(&self, id: &str) -> Result<Option<BirdRecord>, LookupError> {
            // a -> b -> a, which validated stores can never hold
            let bird = match id {
                "a" => BirdRecord::new("a", "A", Gender::Male).with_parents(Some("b"), None),
                "b" => BirdRecord::new("b", "B", Gender::Male).with_parents(Some("a"), None),
                _ => return Ok(None),
            };
            Ok(Some(bird))
        }

        fn get_offspring(&self, _id: &str) -> Result<Vec<BirdRecord>, LookupError> {
            Ok(Vec::new())
        }

        fn all_birds(&self) -> Result<Vec<BirdRecord>, LookupError> {
            Ok(Vec::new())
        }
    }

    struct SlowParents {
        inner: FlockStore,
    }

    impl BirdRepository for SlowParents {
        fn find_by_id(&self, id: &str) -> Result<Option<BirdRecord>, LookupError> {
            if id != "chick" {
                thread::sleep(Duration::from_millis(300));
            }
            self.inner.find_by_id(id)
        }

        fn get_offspring(&self, id: &str) -> Result<Vec<BirdRecord>, LookupError> {
            self.inner.get_offspring(id)
        }

        fn all_birds(&self) -> Result<Vec<BirdRecord>, LookupError> {
            self.inner.all_birds()
        }
    }

    /// Five generations of a straight sire line: g0 <- g1 <- ... <- g6
    fn line_flock() -> FlockStore {
        let mut store = FlockStore::new();
        for i in 0..7 {
            let sire = format!("g{}", i + 1);
            let bird = BirdRecord::new(format!("g{}", i), format!("Gen {}", i), Gender::Male)
                .with_parents(Some(&sire), None);
            store.insert_bird(bird).unwrap();
        }
        store
    }

    fn untimed(store: impl BirdRepository + 'static) -> PedigreeGraphBuilder {
        let config = PedigreeConfig {
            lookup_timeout_ms: 0,
            ..PedigreeConfig::default()
        };
        PedigreeGraphBuilder::new(Arc::new(store), &config)
    }

    #[test]
    fn test_genetic_contribution() {
        assert_eq!(genetic_contribution(0), 50.0);
        assert_eq!(genetic_contribution(1), 25.0);
        assert_eq!(genetic_contribution(3), 6.25);
        assert!(genetic_contribution(5000) >= 0.0);
    }

    #[test]
    fn test_depth_is_bounded() {
        let builder = untimed(line_flock());
        for max_depth in 0..6 {
            let tree = builder.build("g0", max_depth).unwrap();
            assert!(tree.depth() <= max_depth);
        }

        let tree = builder.build("g0", 3).unwrap();
        let mut node = &tree;
        while let Some(sire) = &node.sire {
            node = sire;
        }
        assert_eq!(node.generation, 3);
        assert!(node.is_guest_parent);
        assert_eq!(node.id.as_deref(), Some("g3"));
    }

    #[test]
    fn test_unknown_root_is_not_found() {
        let builder = untimed(line_flock());
        assert_eq!(
            builder.build("missing", 5).unwrap_err(),
            EngineError::not_found("missing")
        );
    }

    #[test]
    fn test_missing_parents_become_guests() {
        let builder = untimed(line_flock());
        let tree = builder.build("g6", 5).unwrap();

        // g7 was never recorded, dam id is null
        let sire = tree.sire.as_ref().unwrap();
        assert!(sire.is_guest_parent);
        assert_eq!(sire.id.as_deref(), Some("g7"));
        assert!(sire.bird.is_none());

        let dam = tree.dam.as_ref().unwrap();
        assert!(dam.is_guest_parent);
        assert!(dam.id.is_none());
    }

    #[test]
    fn test_cycle_is_cut_with_warning() {
        let builder = untimed(CyclicFlock);
        let tree = builder.build("a", 5).unwrap();

        let b = tree.sire.as_ref().unwrap();
        assert_eq!(b.id.as_deref(), Some("b"));
        let back_to_a = b.sire.as_ref().unwrap();
        assert!(back_to_a.is_guest_parent);
        assert!(back_to_a.integrity_warning.is_some());
        assert!(back_to_a.sire.is_none());
    }

    #[test]
    fn test_shared_ancestor_on_both_sides_is_not_a_cycle() {
        let mut store = FlockStore::new();
        store.insert_bird(BirdRecord::new("gp", "Grandsire", Gender::Male)).unwrap();
        store
            .insert_bird(BirdRecord::new("s", "Sire", Gender::Male).with_parents(Some("gp"), None))
            .unwrap();
        store
            .insert_bird(BirdRecord::new("d", "Dam", Gender::Female).with_parents(Some("gp"), None))
            .unwrap();
        store
            .insert_bird(BirdRecord::new("c", "Chick", Gender::Female).with_parents(Some("s"), Some("d")))
            .unwrap();

        let tree = untimed(store).build("c", 5).unwrap();
        let via_sire = tree.sire.as_ref().and_then(|n| n.sire.as_ref()).unwrap();
        let via_dam = tree.dam.as_ref().and_then(|n| n.sire.as_ref()).unwrap();
        assert!(via_sire.bird.is_some() && via_sire.integrity_warning.is_none());
        assert!(via_dam.bird.is_some() && via_dam.integrity_warning.is_none());
    }

    #[test]
    fn test_lookup_timeout_yields_guest_parent() {
        let mut inner = FlockStore::new();
        inner.insert_bird(BirdRecord::new("s", "Sire", Gender::Male)).unwrap();
        inner
            .insert_bird(BirdRecord::new("chick", "Pip", Gender::Female).with_parents(Some("s"), None))
            .unwrap();

        let config = PedigreeConfig {
            max_depth: 5,
            lookup_timeout_ms: 50,
        };
        let builder = PedigreeGraphBuilder::new(Arc::new(SlowParents { inner }), &config);
        let tree = builder.build("chick", 5).unwrap();

        let sire = tree.sire.as_ref().unwrap();
        assert!(sire.is_guest_parent);
        assert_eq!(sire.id.as_deref(), Some("s"));
        assert!(sire.bird.is_none());
    }

    #[test]
    fn test_descendant_tree_is_breadth_first_and_bounded() {
        let builder = untimed(line_flock());
        let direct = builder.descendants("g3");
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].id, "g2");

        let tree = builder.descendant_tree("g4", 2);
        let ids: Vec<_> = tree.iter().map(|e| e.bird.id.as_str()).collect();
        assert_eq!(ids, vec!["g3", "g2"]);
        assert_eq!(tree[1].generation, 2);
        assert_eq!(tree[1].via_parent, "g3");
    }
}
