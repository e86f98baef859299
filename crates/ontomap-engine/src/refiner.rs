//! Refinement stage contracts.
//!
//! Both refiners are external capability providers (similarity service,
//! LLM judgment service). The engine defines the contract it expects and
//! treats any failure as "no additional signal": a degraded refiner can
//! never block or fail a mapping batch, only flip an explicit fallback
//! flag in the run stats.

use crate::candidate::MappingCandidate;
use crate::descriptor::{FieldDescriptor, FieldKey};
use serde::{Deserialize, Serialize};

/// Refiner failure. The orchestrator converts every variant into a
/// fallback to the prior pipeline stage; a timeout is treated identically
/// to an unavailable service.
#[derive(Debug, thiserror::Error)]
pub enum RefinerError {
    #[error("refiner unavailable: {0}")]
    Unavailable(String),
    #[error("refiner call timed out")]
    Timeout,
    #[error("refiner returned a malformed response: {0}")]
    Malformed(String),
}

// ============================================================================
// Retrieval refinement
// ============================================================================

/// One similarity hit from the retrieval store: a previously confirmed
/// (field-pattern -> concept) lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub concept_id: String,
    /// Cosine-style similarity in [0.0, 1.0]; the orchestrator clamps and
    /// caps during blending regardless.
    pub similarity: f64,
}

/// Similarity lookup over previously-seen mapping lessons.
#[async_trait::async_trait]
pub trait RetrievalRefiner: Send + Sync {
    async fn lookup(
        &self,
        field: &FieldDescriptor,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>, RefinerError>;
}

// ============================================================================
// Validation refinement
// ============================================================================

/// One low-confidence field sent for validation, with its current best
/// candidate so the validator can confirm, correct, or reject it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub field: FieldDescriptor,
    pub current: MappingCandidate,
}

/// A corrected (or confirmed) assignment for one field.
///
/// Verdicts are keyed by field identity; a request with no matching
/// verdict simply keeps its pre-validation mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub key: FieldKey,
    pub concept_id: String,
    /// Raw confidence as reported by the validator; clamped at merge time.
    pub confidence: f64,
    pub rationale: String,
}

/// External judgment pass over the low-confidence subset of a batch.
#[async_trait::async_trait]
pub trait ValidationRefiner: Send + Sync {
    async fn validate(
        &self,
        requests: &[ValidationRequest],
    ) -> Result<Vec<ValidationVerdict>, RefinerError>;
}
