//! Mapping store contract.
//!
//! The engine reads prior mappings keyed by field identity (so re-runs can
//! report what they supersede) and writes new mappings through the same
//! interface. Whether the backing store is a database, a file, or memory
//! is irrelevant here; concrete implementations live in `ontomap-storage`.

use crate::candidate::Mapping;
use crate::descriptor::FieldKey;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    Read(String),
    #[error("store write failed: {0}")]
    Write(String),
}

/// Keyed mapping persistence.
///
/// `put` failures are logged and surfaced in run stats but never abort a
/// run: the mapping was still computed correctly in memory.
pub trait MappingStore: Send + Sync {
    fn get(&self, key: &FieldKey) -> Result<Option<Mapping>, StoreError>;
    fn put(&self, mapping: &Mapping) -> Result<(), StoreError>;
}
