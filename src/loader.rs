use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::repository::FlockStore;
use crate::types::*;

/// On-disk flock snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlockSnapshot {
    pub birds: Vec<BirdRecord>,
    #[serde(default)]
    pub active_pairs: Vec<(String, String)>,
}

/// Reads flock snapshots and trait history into a [`FlockStore`]
pub struct FlockLoader;

impl FlockLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a JSON bird snapshot, then the optional trait history file
    pub fn load(&self, flock: &Path, traits: Option<&Path>) -> Result<FlockStore> {
        let mut store = self.load_flock(flock)?;
        if let Some(path) = traits {
            self.load_traits(path, &mut store)?;
        }
        info!(
            birds = store.bird_count(),
            traits = store.trait_count(),
            "Loaded flock"
        );
        Ok(store)
    }

    pub fn load_flock(&self, path: &Path) -> Result<FlockStore> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open flock file: {}", path.display()))?;
        let snapshot: FlockSnapshot = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse flock file: {}", path.display()))?;

        let mut store = FlockStore::new();
        for bird in snapshot.birds {
            let id = bird.id.clone();
            store
                .insert_bird(bird)
                .with_context(|| format!("Invalid bird '{}' in {}", id, path.display()))?;
        }
        for (a, b) in snapshot.active_pairs {
            if store.get(&a).is_none() || store.get(&b).is_none() {
                warn!(a = %a, b = %b, "Active pair references an unknown bird");
            }
            store.add_active_pair(a, b);
        }
        debug!(path = %path.display(), birds = store.bird_count(), "Read flock snapshot");
        Ok(store)
    }

    /// Append trait history rows from a CSV or TSV file, returning the row count
    pub fn load_traits(&self, path: &Path, store: &mut FlockStore) -> Result<usize> {
        let delimiter = if path.extension().map(|e| e == "tsv").unwrap_or(false) {
            b'\t'
        } else {
            b','
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open trait file: {}", path.display()))?;

        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();
        let columns = map_columns(&headers)?;

        let mut loaded = 0;
        let mut orphans = 0;
        for (index, row) in reader.records().enumerate() {
            let line = index + 2;
            let row = row.with_context(|| format!("{}:{}: malformed row", path.display(), line))?;
            let field = |name: &str| columns.get(name).and_then(|&i| row.get(i)).unwrap_or("");

            let bird_id = field("bird_id");
            if bird_id.is_empty() {
                warn!(line, "Skipping trait row without a bird id");
                continue;
            }
            let recorded_at = parse_timestamp(field("recorded_at"))
                .with_context(|| format!("{}:{}: bad timestamp", path.display(), line))?;

            let mut record = TraitRecord::new(
                bird_id,
                TraitCategory::from_string(field("category")),
                field("trait_name"),
                field("value"),
                recorded_at,
            );
            let unit = field("unit");
            if !unit.is_empty() {
                record = record.with_unit(unit);
            }

            if store.get(bird_id).is_none() {
                orphans += 1;
            }
            store.add_trait(record);
            loaded += 1;
        }

        if orphans > 0 {
            warn!(orphans, "Trait rows reference birds missing from the flock");
        }
        debug!(path = %path.display(), rows = loaded, "Read trait history");
        Ok(loaded)
    }
}

impl Default for FlockLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn map_columns(headers: &[String]) -> Result<HashMap<&'static str, usize>> {
    let mut mapping = HashMap::new();

    for (i, header) in headers.iter().enumerate() {
        let key = match header.trim().to_lowercase().as_str() {
            "bird_id" | "bird" | "id" => "bird_id",
            "category" | "type" => "category",
            "trait" | "trait_name" | "name" => "trait_name",
            "value" => "value",
            "unit" | "units" => "unit",
            "recorded_at" | "date" | "timestamp" => "recorded_at",
            _ => continue,
        };
        mapping.insert(key, i);
    }

    for required in ["bird_id", "trait_name", "value", "recorded_at"] {
        if !mapping.contains_key(required) {
            bail!("Required column '{}' not found in trait file", required);
        }
    }
    Ok(mapping)
}

/// RFC 3339 timestamps or plain dates (midnight UTC)
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow!("'{}' is not a date: {}", raw, e))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| anyhow!("'{}' has no midnight", raw))
}
