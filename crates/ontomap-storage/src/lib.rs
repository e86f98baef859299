//! Mapping store implementations.
//!
//! Two backends for the engine's `MappingStore` contract:
//! - [`MemoryStore`] — a lock-protected map; the default for tests and
//!   one-shot CLI runs.
//! - [`JsonFileStore`] — a JSON document on disk with an append-only
//!   changelog. Re-runs supersede prior mappings (the superseded record is
//!   kept in the changelog, never mutated in place) and writes are atomic
//!   via temp-file + rename.
//!
//! Store failures never abort a mapping run; the engine logs them and
//! surfaces counts in its run stats.


use chrono::{DateTime, Utc};
use ontomap_engine::{FieldKey, Mapping, MappingStore, StoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STORE_FILE_VERSION: &str = "ontomap_store_v1";

// ============================================================================
// Memory store
// ============================================================================

/// In-memory mapping store.
#[derive(Default)]
pub struct MemoryStore {
    mappings: RwLock<HashMap<FieldKey, Mapping>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.read().is_empty()
    }

    /// Snapshot of all current mappings, key-ordered for stable output.
    pub fn all(&self) -> Vec<Mapping> {
        let mut mappings: Vec<Mapping> = self.mappings.read().values().cloned().collect();
        mappings.sort_by(|a, b| a.key.cmp(&b.key));
        mappings
    }
}

impl MappingStore for MemoryStore {
    fn get(&self, key: &FieldKey) -> Result<Option<Mapping>, StoreError> {
        Ok(self.mappings.read().get(key).cloned())
    }

    fn put(&self, mapping: &Mapping) -> Result<(), StoreError> {
        self.mappings
            .write()
            .insert(mapping.key.clone(), mapping.clone());
        Ok(())
    }
}

// ============================================================================
// Changelog
// ============================================================================

/// One store write: which mapping was recorded and what it superseded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub mapping: Mapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded: Option<Mapping>,
}

// ============================================================================
// JSON file store
// ============================================================================

/// On-disk document layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: String,
    mappings: Vec<Mapping>,
    #[serde(default)]
    changelog: Vec<ChangeRecord>,
}

#[derive(Debug)]
struct StoreState {
    current: HashMap<FieldKey, Mapping>,
    changelog: Vec<ChangeRecord>,
}

/// File-backed mapping store with an append-only changelog.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    /// Open (or create) a store file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Read(format!("{}: {e}", path.display())))?;
            let document: StoreDocument = serde_json::from_str(&text)
                .map_err(|e| StoreError::Read(format!("{}: {e}", path.display())))?;
            if document.version != STORE_FILE_VERSION {
                return Err(StoreError::Read(format!(
                    "unsupported store version: {} (expected {STORE_FILE_VERSION})",
                    document.version
                )));
            }
            StoreState {
                current: document
                    .mappings
                    .into_iter()
                    .map(|m| (m.key.clone(), m))
                    .collect(),
                changelog: document.changelog,
            }
        } else {
            StoreState {
                current: HashMap::new(),
                changelog: Vec::new(),
            }
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().current.is_empty()
    }

    pub fn changelog(&self) -> Vec<ChangeRecord> {
        self.state.read().changelog.clone()
    }

    /// Snapshot of all current mappings, key-ordered for stable output.
    pub fn all(&self) -> Vec<Mapping> {
        let mut mappings: Vec<Mapping> = self.state.read().current.values().cloned().collect();
        mappings.sort_by(|a, b| a.key.cmp(&b.key));
        mappings
    }

    /// Drop the changelog, retaining current mappings only.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let dropped = state.changelog.len();
        state.changelog.clear();
        Self::persist(&self.path, &state)?;
        tracing::debug!(dropped, "store changelog compacted");
        Ok(())
    }

    /// Write the document atomically: temp file in the same directory,
    /// then rename over the target.
    fn persist(path: &Path, state: &StoreState) -> Result<(), StoreError> {
        let mut mappings: Vec<Mapping> = state.current.values().cloned().collect();
        mappings.sort_by(|a, b| a.key.cmp(&b.key));

        let document = StoreDocument {
            version: STORE_FILE_VERSION.to_string(),
            mappings,
            changelog: state.changelog.clone(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| StoreError::Write(format!("{}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| StoreError::Write(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

impl MappingStore for JsonFileStore {
    fn get(&self, key: &FieldKey) -> Result<Option<Mapping>, StoreError> {
        Ok(self.state.read().current.get(key).cloned())
    }

    fn put(&self, mapping: &Mapping) -> Result<(), StoreError> {
        let mut state = self.state.write();

        let superseded = state.current.insert(mapping.key.clone(), mapping.clone());
        state.changelog.push(ChangeRecord {
            change_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            mapping: mapping.clone(),
            superseded,
        });

        Self::persist(&self.path, &state)
    }
}
