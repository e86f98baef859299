//! Ontomap mapping engine: field inventories in, concept mappings out.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      MAPPING PIPELINE (one batch)                    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  FieldDescriptors ──► Heuristic Scorer ──► [Retrieval Refiner]?      │
//! │   (per source)         (deterministic,        (similarity lessons,   │
//! │                         always runs)           capped blending)      │
//! │                                                      │               │
//! │                                            [Validation Refiner]?     │
//! │                                             (low-confidence subset,  │
//! │                                              bounded batch)          │
//! │                                                      │               │
//! │                                                 FINALIZED            │
//! │                                          one Mapping per field       │
//! │                                          + RunStats (degradation     │
//! │                                            flags, never silent)      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Contracts this crate guarantees:
//! - **Completeness**: one `Mapping` per input `FieldDescriptor`, even when
//!   scoring panics for a field or every refiner is down.
//! - **Confidence bound**: scores are clamped on construction; a
//!   [`candidate::Confidence`] outside [0.0, 1.0] is unrepresentable.
//! - **Idempotence**: same descriptors + same registry + same refiner
//!   responses (or refiners disabled) produce byte-identical mappings.
//! - **Loud degradation**: an unavailable refiner falls back to the prior
//!   stage and sets an explicit flag in [`stats::RunStats`].
//!
//! Refiners, stores, and source normalizers are injected contracts; their
//! concrete implementations live in sibling crates (`ontomap-refine`,
//! `ontomap-storage`).

pub mod candidate;
pub mod descriptor;
pub mod orchestrator;
pub mod refiner;
pub mod scorer;
pub mod stats;
pub mod store;

pub use candidate::{Confidence, Mapping, MappingCandidate, MappingMethod};
pub use descriptor::{
    FieldDescriptor, FieldKey, MetricValue, NormalizeError, SourceIdentity, SourceMetrics,
    SourceNormalizer,
};
pub use orchestrator::{BatchConfig, CancellationToken, MappingOrchestrator};
pub use refiner::{
    RefinerError, RetrievalHit, RetrievalRefiner, ValidationRefiner, ValidationRequest,
    ValidationVerdict,
};
pub use stats::RunStats;
pub use store::{MappingStore, StoreError};

// Re-export the registry types callers need to drive the engine.
pub use ontomap_ontology::{ConfigError, OntologyConcept, OntologyRegistry, UNMAPPED_CONCEPT_ID};
