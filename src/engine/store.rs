use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::model::target::TargetVariant;

/// One persisted correspondence: a source item id maps to exactly one
/// target item, identified by its project-local iid and instance-global id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub variant: TargetVariant,
    pub iid: u64,
    pub global_id: u64,
}

/// Durable source-id → target-item map. This file is the sole source of
/// truth for resumability: an entry means the target item exists and the
/// item is skipped on re-run, so every `put` flushes immediately.
pub struct IdentityMap {
    path: PathBuf,
    map: HashMap<i64, Mapping>,
}

impl IdentityMap {
    /// Load the map from disk. A corrupt or truncated file must not abort
    /// the run: migration is re-driven from the source system, so starting
    /// over with an empty map only costs duplicate-checks, not correctness.
    pub fn load(path: PathBuf) -> Self {
        let map = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<HashMap<i64, Mapping>>(&contents) {
                    Ok(map) => {
                        debug!("Loaded {} mappings from {}", map.len(), path.display());
                        map
                    }
                    Err(e) => {
                        warn!(
                            "Mapping file {} is corrupted or has invalid format ({e}). Starting with an empty map.",
                            path.display()
                        );
                        HashMap::new()
                    }
                },
                Err(e) => {
                    warn!(
                        "Could not read mapping file {} ({e}). Starting with an empty map.",
                        path.display()
                    );
                    HashMap::new()
                }
            }
        } else {
            info!(
                "Mapping file {} not found. Starting with an empty map.",
                path.display()
            );
            HashMap::new()
        };
        Self { path, map }
    }

    pub fn get(&self, source_id: i64) -> Option<&Mapping> {
        self.map.get(&source_id)
    }

    pub fn contains(&self, source_id: i64) -> bool {
        self.map.contains_key(&source_id)
    }

    /// Insert and flush. The flush happens before any dependent work
    /// (comments, links) so a crash mid-item resumes without re-creating
    /// the target item.
    pub fn put(&mut self, source_id: i64, mapping: Mapping) -> Result<()> {
        self.map.insert(source_id, mapping);
        self.flush()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &Mapping)> {
        self.map.iter()
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.map)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write mapping file {}", self.path.display()))
    }
}

/// Progress record written after each processed item; purely informational
/// (the identity map, not this file, drives resume decisions).
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub completed_ids: Vec<i64>,
    pub total_count: usize,
    pub timestamp: String,
    pub completion_rate: f64,
}

pub fn save_checkpoint(path: &Path, completed_ids: &[i64], total_count: usize) -> Result<()> {
    let completion_rate = if total_count == 0 {
        100.0
    } else {
        completed_ids.len() as f64 / total_count as f64 * 100.0
    };
    let checkpoint = Checkpoint {
        completed_ids: completed_ids.to_vec(),
        total_count,
        timestamp: chrono::Utc::now().to_rfc3339(),
        completion_rate,
    };
    let json = serde_json::to_string_pretty(&checkpoint)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write checkpoint {}", path.display()))
}

pub fn load_checkpoint(path: &Path) -> Option<Checkpoint> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(variant: TargetVariant, iid: u64) -> Mapping {
        Mapping {
            variant,
            iid,
            global_id: iid + 1000,
        }
    }

    #[test]
    fn put_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");

        let mut store = IdentityMap::load(path.clone());
        assert!(store.is_empty());
        store.put(101, mapping(TargetVariant::Issue, 7)).unwrap();
        store.put(102, mapping(TargetVariant::Epic, 3)).unwrap();

        let reloaded = IdentityMap::load(path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(101).unwrap().iid, 7);
        assert_eq!(reloaded.get(102).unwrap().variant, TargetVariant::Epic);
        assert!(!reloaded.contains(103));
    }

    #[test]
    fn keys_are_serialized_as_object_keys_with_integer_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        let mut store = IdentityMap::load(path.clone());
        store.put(42, mapping(TargetVariant::Issue, 1)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("42").is_some());
        assert_eq!(value["42"]["variant"], "issue");
    }

    #[test]
    fn corrupt_file_yields_empty_map_not_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, "{\"42\": {\"variant\": \"iss").unwrap();

        let store = IdentityMap::load(path);
        assert!(store.is_empty());
    }

    #[test]
    fn wrong_shape_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let store = IdentityMap::load(path);
        assert!(store.is_empty());
    }

    #[test]
    fn checkpoint_round_trips_with_completion_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        save_checkpoint(&path, &[1, 2, 3], 4).unwrap();

        let cp = load_checkpoint(&path).unwrap();
        assert_eq!(cp.completed_ids, vec![1, 2, 3]);
        assert_eq!(cp.total_count, 4);
        assert_eq!(cp.completion_rate, 75.0);
    }
}
