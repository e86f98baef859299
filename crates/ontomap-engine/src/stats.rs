//! Per-batch run statistics.
//!
//! RunStats is how a degraded run stays visible: every fallback the
//! orchestrator takes is recorded as an explicit flag or counter here.
//! Callers that ignore it still get correct mappings; callers that check
//! it can tell a full-confidence run from a degraded one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary telemetry for one mapping batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    /// Canonical source id after normalization (raw id if normalization
    /// was unavailable).
    pub source_id: String,
    pub source_trust: f64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,

    pub fields_total: usize,
    pub heuristic_count: usize,
    pub retrieval_count: usize,
    pub validated_count: usize,
    pub unmapped_count: usize,
    pub average_confidence: f64,

    /// Fields whose scoring failed and were substituted with the synthetic
    /// unmapped candidate.
    pub scoring_failures: usize,
    /// Individual retrieval lookups that errored or timed out.
    pub retrieval_failures: usize,
    /// Validation requests actually sent (bounded by the batch cap).
    pub validation_requests: usize,
    /// Verdicts dropped for naming an unknown concept.
    pub verdicts_dropped: usize,
    pub store_write_failures: usize,

    /// True whenever the retrieval stage was configured but degraded.
    pub retrieval_fallback: bool,
    /// True whenever the validation stage was configured but degraded.
    /// Silent degradation here is the worst failure mode this engine can
    /// have; this flag must be set on every validation fallback path.
    pub validation_fallback: bool,
    pub cancelled: bool,

    pub registry_fingerprint: String,
}

impl RunStats {
    pub fn start(source_id: String, source_trust: f64, registry_fingerprint: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source_id,
            source_trust,
            started_at: Utc::now(),
            elapsed_ms: 0,
            fields_total: 0,
            heuristic_count: 0,
            retrieval_count: 0,
            validated_count: 0,
            unmapped_count: 0,
            average_confidence: 0.0,
            scoring_failures: 0,
            retrieval_failures: 0,
            validation_requests: 0,
            verdicts_dropped: 0,
            store_write_failures: 0,
            retrieval_fallback: false,
            validation_fallback: false,
            cancelled: false,
            registry_fingerprint,
        }
    }

    /// True when any stage fell back or any write was dropped.
    pub fn degraded(&self) -> bool {
        self.retrieval_fallback
            || self.validation_fallback
            || self.scoring_failures > 0
            || self.store_write_failures > 0
    }
}
