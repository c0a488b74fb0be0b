//! Coefficient of inbreeding by Wright's path counting.
//!
//! For every ancestor common to the sire and dam trees, each pair of paths
//! (sire → A of n1 steps, dam → A of n2 steps) that meet only at A adds
//! `(1/2)^(n1 + n2 + 1) * (1 + F_A)`, where `F_A` is A's own coefficient
//! taken from A's subtree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RiskThresholds;
use crate::error::EngineResult;
use crate::pedigree::PedigreeGraphBuilder;
use crate::types::{PedigreeNode, RiskLevel};

/// One common ancestor's share of the coefficient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AncestorContribution {
    pub ancestor_id: String,
    pub ancestor_name: Option<String>,
    pub path_pairs: usize,
    pub ancestor_inbreeding: f64,
    pub contribution: f64,
}

/// Coefficient plus the ancestors that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoiBreakdown {
    pub coefficient: f64,
    pub coi_percent: f64,
    pub contributors: Vec<AncestorContribution>,
}

impl CoiBreakdown {
    fn self_pairing(id: &str) -> Self {
        Self {
            coefficient: 1.0,
            coi_percent: 100.0,
            contributors: vec![AncestorContribution {
                ancestor_id: id.to_string(),
                ancestor_name: None,
                path_pairs: 0,
                ancestor_inbreeding: 0.0,
                contribution: 1.0,
            }],
        }
    }
}

/// Map a COI percentage onto a risk bucket
pub fn risk_level(coi_percent: f64, thresholds: &RiskThresholds) -> RiskLevel {
    match coi_percent {
        c if c >= thresholds.critical => RiskLevel::Critical,
        c if c >= thresholds.high => RiskLevel::High,
        c if c >= thresholds.moderate => RiskLevel::Moderate,
        _ => RiskLevel::Low,
    }
}

pub struct InbreedingCalculator {
    pedigree: Arc<PedigreeGraphBuilder>,
}

impl InbreedingCalculator {
    pub fn new(pedigree: Arc<PedigreeGraphBuilder>) -> Self {
        Self { pedigree }
    }

    /// COI of a prospective pairing, in percent
    pub fn coi(&self, sire_id: &str, dam_id: &str, max_depth: u32) -> EngineResult<f64> {
        Ok(self.breakdown(sire_id, dam_id, max_depth)?.coi_percent)
    }

    pub fn breakdown(&self, sire_id: &str, dam_id: &str, max_depth: u32) -> EngineResult<CoiBreakdown> {
        if sire_id == dam_id {
            return Ok(CoiBreakdown::self_pairing(sire_id));
        }

        let (sire_tree, dam_tree) = rayon::join(
            || self.pedigree.build(sire_id, max_depth),
            || self.pedigree.build(dam_id, max_depth),
        );
        Ok(breakdown_from_trees(&sire_tree?, &dam_tree?))
    }

    /// COI against an already built tree, used when one side is reused
    /// across many pairings.
    pub fn coi_against_tree(
        &self,
        tree: &PedigreeNode,
        other_id: &str,
        max_depth: u32,
    ) -> EngineResult<f64> {
        if tree.id.as_deref() == Some(other_id) {
            return Ok(100.0);
        }
        let other = self.pedigree.build(other_id, max_depth)?;
        Ok(breakdown_from_trees(tree, &other).coi_percent)
    }
}

pub fn breakdown_from_trees(sire: &PedigreeNode, dam: &PedigreeNode) -> CoiBreakdown {
    if sire.id.is_some() && sire.id == dam.id {
        return CoiBreakdown::self_pairing(sire.id.as_deref().unwrap_or_default());
    }

    let mut memo = HashMap::new();
    let mut contributors = ancestor_contributions(sire, dam, &mut memo);
    contributors.sort_by(|a, b| {
        b.contribution
            .total_cmp(&a.contribution)
            .then_with(|| a.ancestor_id.cmp(&b.ancestor_id))
    });

    let coefficient = contributors
        .iter()
        .map(|c| c.contribution)
        .sum::<f64>()
        .clamp(0.0, 1.0);

    CoiBreakdown {
        coefficient,
        coi_percent: (coefficient * 100.0).clamp(0.0, 100.0),
        contributors,
    }
}

fn coefficient(sire: &PedigreeNode, dam: &PedigreeNode, memo: &mut HashMap<String, f64>) -> f64 {
    ancestor_contributions(sire, dam, memo)
        .iter()
        .map(|c| c.contribution)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

fn ancestor_contributions(
    sire: &PedigreeNode,
    dam: &PedigreeNode,
    memo: &mut HashMap<String, f64>,
) -> Vec<AncestorContribution> {
    let sire_paths = index_paths(sire);
    let dam_paths = index_paths(dam);

    let mut nodes: HashMap<&str, &PedigreeNode> = HashMap::new();
    collect_richest_nodes(sire, &mut nodes);
    collect_richest_nodes(dam, &mut nodes);

    let mut common: Vec<&String> = sire_paths
        .keys()
        .filter(|id| dam_paths.contains_key(*id))
        .collect();
    common.sort();

    let mut contributors = Vec::new();
    for ancestor_id in common {
        let mut pairs = 0usize;
        let mut path_sum = 0.0;
        for sire_path in &sire_paths[ancestor_id] {
            for dam_path in &dam_paths[ancestor_id] {
                if !meet_only_at_ancestor(sire_path, dam_path) {
                    continue;
                }
                let steps = (sire_path.len() - 1) + (dam_path.len() - 1);
                path_sum += 0.5f64.powi(steps as i32 + 1);
                pairs += 1;
            }
        }
        if pairs == 0 {
            continue;
        }

        let node = nodes.get(ancestor_id.as_str()).copied();
        let ancestor_inbreeding = node
            .map(|n| ancestor_coefficient(ancestor_id, n, memo))
            .unwrap_or(0.0);

        contributors.push(AncestorContribution {
            ancestor_id: ancestor_id.clone(),
            ancestor_name: node.and_then(|n| n.bird.as_ref()).map(|b| b.name.clone()),
            path_pairs: pairs,
            ancestor_inbreeding,
            contribution: path_sum * (1.0 + ancestor_inbreeding),
        });
    }

    contributors
}

/// F of an ancestor, from its own parents when both are known
fn ancestor_coefficient(id: &str, node: &PedigreeNode, memo: &mut HashMap<String, f64>) -> f64 {
    if let Some(f) = memo.get(id) {
        return *f;
    }
    let f = match (&node.sire, &node.dam) {
        (Some(sire), Some(dam)) if sire.id.is_some() && dam.id.is_some() => {
            if sire.id == dam.id {
                1.0
            } else {
                coefficient(sire, dam, memo)
            }
        }
        _ => 0.0,
    };
    memo.insert(id.to_string(), f);
    f
}

/// Every root-to-ancestor path, keyed by ancestor id. The root is included
/// with a single-element path so parent/offspring pairings are counted.
fn index_paths(root: &PedigreeNode) -> HashMap<String, Vec<Vec<String>>> {
    let mut index = HashMap::new();
    let mut path = Vec::new();
    walk_paths(root, &mut path, &mut index);
    index
}

fn walk_paths(
    node: &PedigreeNode,
    path: &mut Vec<String>,
    index: &mut HashMap<String, Vec<Vec<String>>>,
) {
    let Some(id) = &node.id else {
        return;
    };
    if path.contains(id) {
        return;
    }

    path.push(id.clone());
    index.entry(id.clone()).or_default().push(path.clone());
    for parent in node.parents() {
        walk_paths(parent, path, index);
    }
    path.pop();
}

fn meet_only_at_ancestor(sire_path: &[String], dam_path: &[String]) -> bool {
    let sire_side = &sire_path[..sire_path.len() - 1];
    let dam_side = &dam_path[..dam_path.len() - 1];
    !sire_side.iter().any(|id| dam_side.contains(id))
}

/// Keep, per id, the occurrence with the most recorded ancestry
fn collect_richest_nodes<'a>(node: &'a PedigreeNode, nodes: &mut HashMap<&'a str, &'a PedigreeNode>) {
    if let Some(id) = node.id.as_deref() {
        let replace = nodes
            .get(id)
            .map(|existing| node.node_count() > existing.node_count())
            .unwrap_or(true);
        if replace {
            nodes.insert(id, node);
        }
    }
    for parent in node.parents() {
        collect_richest_nodes(parent, nodes);
    }
}
