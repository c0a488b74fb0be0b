use anyhow::{Context, Result};
use chrono::Local;
use csv::WriterBuilder;
use serde_json::to_string_pretty;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::inbreeding::CoiBreakdown;
use crate::types::*;

/// Supported report formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
    Tsv,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Tsv => "tsv",
        }
    }
}

/// A computed result ready for rendering
#[derive(Debug, Clone)]
pub enum Report {
    Pedigree(PedigreeNode),
    Coi {
        sire_id: String,
        dam_id: String,
        breakdown: CoiBreakdown,
        risk: RiskLevel,
    },
    Compatibility(CompatibilityResult),
    Prediction {
        sire_id: String,
        dam_id: String,
        prediction: BreedingPrediction,
    },
    BreedingValue(BreedingValueResult),
    Mates(MateRecommendations),
    Descendants {
        bird_id: String,
        entries: Vec<DescendantEntry>,
    },
}

impl Report {
    /// Short name used in default file names
    pub fn kind(&self) -> &'static str {
        match self {
            Report::Pedigree(_) => "pedigree",
            Report::Coi { .. } => "coi",
            Report::Compatibility(_) => "compatibility",
            Report::Prediction { .. } => "prediction",
            Report::BreedingValue(_) => "bvi",
            Report::Mates(_) => "mates",
            Report::Descendants { .. } => "descendants",
        }
    }
}

/// Renders reports as text, JSON or delimited tables
pub struct ReportGenerator {
    format: ReportFormat,
}

impl ReportGenerator {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    pub fn render(&self, report: &Report) -> Result<String> {
        match self.format {
            ReportFormat::Text => Ok(self.render_text(report)),
            ReportFormat::Json => self.render_json(report),
            ReportFormat::Csv => self.render_delimited(report, b','),
            ReportFormat::Tsv => self.render_delimited(report, b'\t'),
        }
    }

    /// Write the rendered report into `dir`, returning the file path
    pub fn write_to_dir(&self, report: &Report, dir: &Path) -> Result<String> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let filename = format!(
            "{}/{}_{}.{}",
            dir.display(),
            report.kind(),
            timestamp,
            self.format.extension()
        );

        let content = self.render(report)?;
        fs::write(&filename, content)
            .with_context(|| format!("Failed to write report to {}", filename))?;
        Ok(filename)
    }

    fn render_json(&self, report: &Report) -> Result<String> {
        let json = match report {
            Report::Pedigree(tree) => to_string_pretty(tree),
            Report::Coi {
                sire_id,
                dam_id,
                breakdown,
                risk,
            } => to_string_pretty(&serde_json::json!({
                "sire_id": sire_id,
                "dam_id": dam_id,
                "risk_level": risk,
                "breakdown": breakdown,
            })),
            Report::Compatibility(result) => to_string_pretty(result),
            Report::Prediction {
                sire_id,
                dam_id,
                prediction,
            } => to_string_pretty(&serde_json::json!({
                "sire_id": sire_id,
                "dam_id": dam_id,
                "prediction": prediction,
            })),
            Report::BreedingValue(result) => to_string_pretty(result),
            Report::Mates(result) => to_string_pretty(result),
            Report::Descendants { bird_id, entries } => to_string_pretty(&serde_json::json!({
                "bird_id": bird_id,
                "descendants": entries,
            })),
        };
        json.with_context(|| format!("Failed to serialize {} report to JSON", report.kind()))
    }

    fn render_delimited(&self, report: &Report, delimiter: u8) -> Result<String> {
        let (header, rows) = table(report);
        let mut wtr = WriterBuilder::new().delimiter(delimiter).from_writer(Vec::new());
        wtr.write_record(&header)?;
        for row in rows {
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        let bytes = wtr
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to finish table: {}", e))?;
        String::from_utf8(bytes).context("Table output is not valid UTF-8")
    }

    fn render_text(&self, report: &Report) -> String {
        let mut out = String::new();
        match report {
            Report::Pedigree(tree) => {
                let _ = writeln!(out, "Pedigree of {}", tree.display_name());
                let _ = writeln!(
                    out,
                    "{} nodes across {} generations",
                    tree.node_count(),
                    tree.depth()
                );
                write_tree(&mut out, tree, "", "");
            }
            Report::Coi {
                sire_id,
                dam_id,
                breakdown,
                risk,
            } => {
                let _ = writeln!(out, "COI for {} x {}", sire_id, dam_id);
                let _ = writeln!(out, "Coefficient: {:.3}%  ({})", breakdown.coi_percent, risk.label());
                for c in &breakdown.contributors {
                    let _ = writeln!(
                        out,
                        "  {:<20} paths {:>3}  F_A {:.4}  adds {:.3}%",
                        c.ancestor_name.as_deref().unwrap_or(&c.ancestor_id),
                        c.path_pairs,
                        c.ancestor_inbreeding,
                        c.contribution * 100.0
                    );
                }
            }
            Report::Compatibility(r) => {
                let _ = writeln!(out, "Compatibility {} x {}", r.sire_id, r.dam_id);
                let _ = writeln!(out, "Score: {:.1}/100  {}", r.score, r.verdict);
                let _ = writeln!(out, "COI: {:.2}%  Risk: {}", r.coi_percent, r.risk_level.label());
                write_list(&mut out, "Warnings", &r.warnings);
                write_list(&mut out, "Reasons", &r.reasons);
                write_list(&mut out, "Recommendations", &r.recommendations);
            }
            Report::Prediction {
                sire_id,
                dam_id,
                prediction: p,
            } => {
                let _ = writeln!(out, "Offspring of {} x {} ({:?} data)", sire_id, dam_id, p.data_quality);
                let _ = writeln!(
                    out,
                    "Weight: {:.0} - {:.0} g",
                    p.weight_range.min, p.weight_range.max
                );
                let _ = writeln!(
                    out,
                    "Height: {:.1} - {:.1} cm",
                    p.height_range.min, p.height_range.max
                );
                write_probabilities(&mut out, "Color", &p.color_probabilities);
                write_probabilities(&mut out, "Pattern", &p.pattern_probabilities);
                write_probabilities(&mut out, "Comb", &p.comb_probabilities);
                write_list(&mut out, "Likely traits", &p.likely_traits);
            }
            Report::BreedingValue(r) => {
                let _ = writeln!(out, "Breeding value of {}", r.bird_id);
                let _ = writeln!(out, "BVI: {:.3}  Rating: {}", r.bvi, r.rating.label());
                let _ = writeln!(
                    out,
                    "Traits recorded: {} ({:.0}% of catalogue)",
                    r.trait_count,
                    r.trait_completeness * 100.0
                );
                let _ = writeln!(out, "Shows: {} wins of {}", r.show_wins, r.show_total);
                let _ = writeln!(out, "Offspring: {}", r.offspring_count);
                let _ = writeln!(out, "{}", r.recommendation);
            }
            Report::Mates(m) => {
                let _ = writeln!(
                    out,
                    "Best mates for {} (BVI {:.3}, {}), {} evaluated",
                    m.focal_bird.name,
                    m.focal_bvi.bvi,
                    m.focal_bvi.rating.label(),
                    m.total_evaluated
                );
                for (rank, c) in m.candidates.iter().enumerate() {
                    let _ = writeln!(
                        out,
                        "{:>2}. {:<20} {:>5.1}  offspring {:.0}  diversity {:.0}  traits {:.0}  practical {:.0}",
                        rank + 1,
                        c.bird.name,
                        c.pairing_score,
                        c.offspring_potential,
                        c.genetic_diversity,
                        c.trait_complementarity,
                        c.practical_score
                    );
                    for s in &c.key_strengths {
                        let _ = writeln!(out, "      + {}", s);
                    }
                    for r in &c.key_risks {
                        let _ = writeln!(out, "      - {}", r);
                    }
                }
            }
            Report::Descendants { bird_id, entries } => {
                let _ = writeln!(out, "Descendants of {} ({})", bird_id, entries.len());
                for e in entries {
                    let _ = writeln!(
                        out,
                        "  gen {}  {:<12} {:<20} via {}",
                        e.generation, e.bird.id, e.bird.name, e.via_parent
                    );
                }
            }
        }
        out
    }
}

fn write_tree(out: &mut String, node: &PedigreeNode, prefix: &str, role: &str) {
    let guest = if node.is_guest_parent { " [guest]" } else { "" };
    let _ = writeln!(
        out,
        "{}{}{}{}  ({:.2}%)",
        prefix,
        role,
        node.display_name(),
        guest,
        node.contribution_percent()
    );
    if let Some(warning) = &node.integrity_warning {
        let _ = writeln!(out, "{}  ! {}", prefix, warning);
    }
    let child_prefix = format!("{}  ", prefix);
    if let Some(sire) = &node.sire {
        write_tree(out, sire, &child_prefix, "S: ");
    }
    if let Some(dam) = &node.dam {
        write_tree(out, dam, &child_prefix, "D: ");
    }
}

fn write_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}:", title);
    for item in items {
        let _ = writeln!(out, "  - {}", item);
    }
}

fn write_probabilities(out: &mut String, title: &str, items: &[Probability]) {
    let line: Vec<String> = items
        .iter()
        .map(|p| format!("{} {:.1}%", p.item, p.percentage))
        .collect();
    let _ = writeln!(out, "{}: {}", title, line.join(", "));
}

/// Flat rows for CSV/TSV exports
fn table(report: &Report) -> (Vec<&'static str>, Vec<Vec<String>>) {
    match report {
        Report::Pedigree(tree) => {
            let mut rows = Vec::new();
            pedigree_rows(tree, "", &mut rows);
            (
                vec!["lineage", "generation", "id", "name", "guest", "contribution_percent"],
                rows,
            )
        }
        Report::Coi { breakdown, .. } => (
            vec!["ancestor_id", "ancestor_name", "path_pairs", "ancestor_inbreeding", "contribution"],
            breakdown
                .contributors
                .iter()
                .map(|c| {
                    vec![
                        c.ancestor_id.clone(),
                        c.ancestor_name.clone().unwrap_or_default(),
                        c.path_pairs.to_string(),
                        format!("{:.6}", c.ancestor_inbreeding),
                        format!("{:.6}", c.contribution),
                    ]
                })
                .collect(),
        ),
        Report::Compatibility(r) => (
            vec!["sire_id", "dam_id", "score", "coi_percent", "risk_level", "rejected", "verdict", "warnings"],
            vec![vec![
                r.sire_id.clone(),
                r.dam_id.clone(),
                format!("{:.2}", r.score),
                format!("{:.4}", r.coi_percent),
                r.risk_level.label().to_string(),
                r.rejected.to_string(),
                r.verdict.clone(),
                r.warnings.join("; "),
            ]],
        ),
        Report::Prediction { prediction: p, .. } => {
            let mut rows = vec![
                vec![
                    "weight_grams".to_string(),
                    format!("{:.1}-{:.1}", p.weight_range.min, p.weight_range.max),
                    String::new(),
                ],
                vec![
                    "height_cm".to_string(),
                    format!("{:.1}-{:.1}", p.height_range.min, p.height_range.max),
                    String::new(),
                ],
            ];
            for (label, items) in [
                ("color", &p.color_probabilities),
                ("pattern", &p.pattern_probabilities),
                ("comb", &p.comb_probabilities),
            ] {
                for item in items {
                    rows.push(vec![
                        label.to_string(),
                        item.item.clone(),
                        format!("{:.1}", item.percentage),
                    ]);
                }
            }
            (vec!["trait", "outcome", "percentage"], rows)
        }
        Report::BreedingValue(r) => (
            vec![
                "bird_id",
                "bvi",
                "rating",
                "trait_count",
                "show_wins",
                "show_total",
                "offspring_count",
                "recommendation",
            ],
            vec![vec![
                r.bird_id.clone(),
                format!("{:.4}", r.bvi),
                r.rating.label().to_string(),
                r.trait_count.to_string(),
                r.show_wins.to_string(),
                r.show_total.to_string(),
                r.offspring_count.to_string(),
                r.recommendation.clone(),
            ]],
        ),
        Report::Mates(m) => (
            vec![
                "rank",
                "bird_id",
                "name",
                "pairing_score",
                "offspring_potential",
                "genetic_diversity",
                "trait_complementarity",
                "practical_score",
                "strengths",
                "risks",
            ],
            m.candidates
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    vec![
                        (i + 1).to_string(),
                        c.bird.id.clone(),
                        c.bird.name.clone(),
                        format!("{:.2}", c.pairing_score),
                        format!("{:.2}", c.offspring_potential),
                        format!("{:.2}", c.genetic_diversity),
                        format!("{:.2}", c.trait_complementarity),
                        format!("{:.2}", c.practical_score),
                        c.key_strengths.join("; "),
                        c.key_risks.join("; "),
                    ]
                })
                .collect(),
        ),
        Report::Descendants { entries, .. } => (
            vec!["generation", "id", "name", "via_parent"],
            entries
                .iter()
                .map(|e| {
                    vec![
                        e.generation.to_string(),
                        e.bird.id.clone(),
                        e.bird.name.clone(),
                        e.via_parent.clone(),
                    ]
                })
                .collect(),
        ),
    }
}

fn pedigree_rows(node: &PedigreeNode, lineage: &str, rows: &mut Vec<Vec<String>>) {
    rows.push(vec![
        if lineage.is_empty() { "-".to_string() } else { lineage.to_string() },
        node.generation.to_string(),
        node.id.clone().unwrap_or_default(),
        node.display_name(),
        node.is_guest_parent.to_string(),
        format!("{:.4}", node.contribution_percent()),
    ]);
    if let Some(sire) = &node.sire {
        pedigree_rows(sire, &format!("{}S", lineage), rows);
    }
    if let Some(dam) = &node.dam {
        pedigree_rows(dam, &format!("{}D", lineage), rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_bvi() -> Report {
        Report::BreedingValue(BreedingValueResult {
            bird_id: "r1".to_string(),
            bvi: 0.5,
            rating: BviRating::Average,
            trait_count: 3,
            show_wins: 1,
            show_total: 2,
            offspring_count: 4,
            trait_completeness: 0.25,
            show_performance: 0.5,
            offspring_volume: 0.5,
            recommendation: "Average breeding value; enter shows".to_string(),
        })
    }

    fn sample_tree() -> PedigreeNode {
        let mut root = PedigreeNode::resolved(BirdRecord::new("c1", "Chick", Gender::Female), 0);
        root.sire = Some(Box::new(PedigreeNode::resolved(
            BirdRecord::new("r1", "Rusty", Gender::Male),
            1,
        )));
        root.dam = Some(Box::new(PedigreeNode::guest(None, 1)));
        root
    }

    #[test]
    fn test_csv_and_tsv_tables() {
        let csv = ReportGenerator::new(ReportFormat::Csv).render(&sample_bvi()).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("bird_id,bvi,rating"));
        assert!(lines.next().unwrap().starts_with("r1,0.5000,Average,3,1,2,4"));

        let tsv = ReportGenerator::new(ReportFormat::Tsv).render(&sample_bvi()).unwrap();
        assert!(tsv.lines().next().unwrap().contains("bird_id\tbvi"));
    }

    #[test]
    fn test_json_round_trips_fields() {
        let json = ReportGenerator::new(ReportFormat::Json).render(&sample_bvi()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["rating"], "Average");
        assert_eq!(value["offspring_count"], 4);
    }

    #[test]
    fn test_pedigree_rendering() {
        let report = Report::Pedigree(sample_tree());
        let text = ReportGenerator::new(ReportFormat::Text).render(&report).unwrap();
        assert!(text.contains("S: Rusty"));
        assert!(text.contains("[guest]"));

        let csv = ReportGenerator::new(ReportFormat::Csv).render(&report).unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.contains("S,1,r1,Rusty,false,50.0000"));
    }

    #[test]
    fn test_write_to_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("reports");
        let path = ReportGenerator::new(ReportFormat::Json)
            .write_to_dir(&sample_bvi(), &nested)
            .unwrap();
        assert!(path.ends_with(".json"));
        assert!(fs::read_to_string(&path).unwrap().contains("\"bird_id\": \"r1\""));
    }
}
