//! Persisted list of broadcast destinations.
//!
//! The engine owns the live set; this file only survives restarts. The admin
//! `/addchannel` and `/removechannel` commands save after every change.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::types::DestinationId;

/// On-disk formats accepted by [`DestinationStore::load`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StoredFormat {
    /// `{"destinations": [-100..., -100...]}`
    Object { destinations: Vec<DestinationId> },
    /// Bare array, as written by hand.
    List(Vec<DestinationId>),
}

#[derive(Debug, Clone, Serialize)]
struct StoredDestinations<'a> {
    destinations: &'a [DestinationId],
}

#[derive(Debug, Clone)]
pub struct DestinationStore {
    path: PathBuf,
}

impl DestinationStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved destinations, or `None` when there is no usable file.
    pub fn load(&self) -> Option<BTreeSet<DestinationId>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => {
                tracing::info!("No destination file at {:?}", self.path);
                return None;
            }
        };
        match serde_json::from_str::<StoredFormat>(&contents) {
            Ok(StoredFormat::Object { destinations }) | Ok(StoredFormat::List(destinations)) => {
                tracing::debug!(count = destinations.len(), "Loaded destinations");
                Some(
                    destinations
                        .into_iter()
                        .map(crate::config::normalize_channel_id)
                        .collect(),
                )
            }
            Err(e) => {
                tracing::warn!("Failed to parse destination file {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Saved destinations if present, else `fallback` (the env list).
    pub fn load_or(&self, fallback: &[DestinationId]) -> BTreeSet<DestinationId> {
        self.load()
            .unwrap_or_else(|| fallback.iter().copied().collect())
    }

    pub fn save(&self, destinations: &[DestinationId]) -> Result<()> {
        let json = serde_json::to_string_pretty(&StoredDestinations { destinations })?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing destinations to {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}_{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("dest_roundtrip");
        let store = DestinationStore::new(&path);
        store.save(&[-1002, -1001]).unwrap();
        let set: BTreeSet<DestinationId> = [-1001, -1002].into_iter().collect();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"destinations\""));
        let loaded = store.load();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, Some(set));
    }

    #[test]
    fn test_load_bare_list_normalizes_ids() {
        let path = temp_path("dest_list");
        std::fs::write(&path, "[1003725380926, -42]").unwrap();
        let loaded = DestinationStore::new(&path).load();
        let _ = std::fs::remove_file(&path);
        let loaded = loaded.unwrap();
        assert!(loaded.contains(&-1003725380926));
        assert!(loaded.contains(&-42));
    }

    #[test]
    fn test_missing_or_corrupt_file_falls_back() {
        let missing = DestinationStore::new(temp_path("dest_missing"));
        assert_eq!(missing.load_or(&[-7]), BTreeSet::from([-7]));

        let path = temp_path("dest_corrupt");
        std::fs::write(&path, "{not json").unwrap();
        let corrupt = DestinationStore::new(&path);
        let result = corrupt.load_or(&[-8]);
        let _ = std::fs::remove_file(&path);
        assert_eq!(result, BTreeSet::from([-8]));
    }
}
