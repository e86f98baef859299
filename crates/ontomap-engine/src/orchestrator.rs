//! Mapping orchestrator: the engine's single public entry point.
//!
//! State machine per batch:
//!
//! ```text
//! START -> HEURISTIC_SCORED -> (REFINED_RETRIEVAL)? -> (REFINED_VALIDATION)? -> FINALIZED
//! ```
//!
//! - The heuristic transition cannot fail: a field whose scoring panics is
//!   substituted with the synthetic unmapped candidate and counted, never
//!   propagated.
//! - Refiner stages are bounded-concurrency, per-call-timeout I/O. Any
//!   degradation falls back to the prior stage's result and sets an
//!   explicit flag in [`RunStats`].
//! - Finalization picks the top-ranked candidate per field and emits one
//!   decision event per field.
//!
//! An orchestrator is an explicit instance with injected dependencies;
//! there is no ambient global state. Concurrent runs share the registry
//! read-only.

use crate::candidate::{rank_candidates, Mapping, MappingCandidate, MappingMethod};
use crate::descriptor::{FieldDescriptor, FieldKey, SourceIdentity, SourceNormalizer};
use crate::refiner::{RefinerError, RetrievalHit, RetrievalRefiner, ValidationRefiner, ValidationRequest};
use crate::scorer::{score_field, unmapped_candidate};
use crate::stats::RunStats;
use crate::store::MappingStore;
use ontomap_ontology::{ConfigError, OntologyRegistry, UNMAPPED_CONCEPT_ID};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Ceiling for blended retrieval confidence. Kept below the heuristic
/// exact-match signal so retrieval can refine ambiguous fields but can
/// never silently outrank a strong lexical match.
pub const RETRIEVAL_BLEND_CAP: f64 = 0.75;

// ============================================================================
// Configuration
// ============================================================================

/// Per-batch run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub enable_retrieval: bool,
    pub enable_validation: bool,
    /// Fields whose top candidate is below this go to validation.
    pub validation_confidence_threshold: f64,
    /// Upper bound on fields sent to validation per run (bounded cost).
    pub validation_batch_cap: usize,
    pub retrieval_top_k: usize,
    /// Maximum in-flight refiner calls.
    pub concurrency_limit: usize,
    /// Per-call refiner deadline; a timeout is treated as unavailability.
    pub refiner_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enable_retrieval: false,
            enable_validation: false,
            validation_confidence_threshold: 0.80,
            validation_batch_cap: 10,
            retrieval_top_k: 5,
            concurrency_limit: 8,
            refiner_timeout_ms: 10_000,
        }
    }
}

impl BatchConfig {
    fn refiner_timeout(&self) -> Duration {
        Duration::from_millis(self.refiner_timeout_ms)
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative run-level cancellation flag.
///
/// Cancelling abandons in-flight refiner calls best-effort; fields that
/// already hold a consistent result are returned as a partial batch with
/// `RunStats.cancelled = true`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs mapping batches against an immutable registry with injected
/// refiner/store/normalizer dependencies.
pub struct MappingOrchestrator {
    registry: Arc<OntologyRegistry>,
    retrieval: Option<Arc<dyn RetrievalRefiner>>,
    validation: Option<Arc<dyn ValidationRefiner>>,
    store: Option<Arc<dyn MappingStore>>,
    normalizer: Option<Arc<dyn SourceNormalizer>>,
}

impl MappingOrchestrator {
    pub fn new(registry: Arc<OntologyRegistry>) -> Self {
        Self {
            registry,
            retrieval: None,
            validation: None,
            store: None,
            normalizer: None,
        }
    }

    pub fn with_retrieval(mut self, refiner: Arc<dyn RetrievalRefiner>) -> Self {
        self.retrieval = Some(refiner);
        self
    }

    pub fn with_validation(mut self, refiner: Arc<dyn ValidationRefiner>) -> Self {
        self.validation = Some(refiner);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MappingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn SourceNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn registry(&self) -> &OntologyRegistry {
        &self.registry
    }

    /// Map one batch of fields for one source system.
    ///
    /// Always returns one [`Mapping`] per input field unless the registry
    /// itself is unusable; every other failure is recovered into a
    /// substituted value or a [`RunStats`] flag.
    pub async fn run_mapping_batch(
        &self,
        source_id: &str,
        fields: Vec<FieldDescriptor>,
        config: &BatchConfig,
    ) -> Result<(Vec<Mapping>, RunStats), ConfigError> {
        self.run_mapping_batch_cancellable(source_id, fields, config, CancellationToken::new())
            .await
    }

    /// [`run_mapping_batch`](Self::run_mapping_batch) with an external
    /// cancellation token.
    pub async fn run_mapping_batch_cancellable(
        &self,
        source_id: &str,
        fields: Vec<FieldDescriptor>,
        config: &BatchConfig,
        cancel: CancellationToken,
    ) -> Result<(Vec<Mapping>, RunStats), ConfigError> {
        if self.registry.is_empty() {
            return Err(ConfigError::Empty);
        }

        let started = Instant::now();
        let identity = self.resolve_source(source_id);
        let mut stats = RunStats::start(
            identity.canonical_id.clone(),
            identity.trust_score,
            self.registry.fingerprint().to_string(),
        );
        stats.fields_total = fields.len();

        if cancel.is_cancelled() {
            stats.cancelled = true;
            stats.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok((Vec::new(), stats));
        }

        // HEURISTIC_SCORED: embarrassingly parallel, cannot fail as a stage.
        let scored: Vec<(Vec<MappingCandidate>, bool)> = fields
            .par_iter()
            .map(|field| {
                match catch_unwind(AssertUnwindSafe(|| score_field(field, &self.registry))) {
                    Ok(candidates) => (candidates, false),
                    Err(_) => (vec![unmapped_candidate()], true),
                }
            })
            .collect();

        let mut states: Vec<Vec<MappingCandidate>> = Vec::with_capacity(scored.len());
        for (field, (candidates, failed)) in fields.iter().zip(scored) {
            if failed {
                stats.scoring_failures += 1;
                tracing::warn!(field = %field.key(), "field scoring failed, substituted unmapped");
            }
            states.push(candidates);
        }

        // REFINED_RETRIEVAL (conditional).
        if config.enable_retrieval && !cancel.is_cancelled() {
            self.refine_retrieval(&fields, &mut states, config, &cancel, &mut stats)
                .await;
        }

        // REFINED_VALIDATION (conditional, enhanced-accuracy mode only).
        if config.enable_validation && !cancel.is_cancelled() {
            self.refine_validation(&fields, &mut states, config, &mut stats)
                .await;
        }

        // FINALIZED.
        let mappings = self.finalize(&identity, &fields, &states, &mut stats);

        stats.cancelled = cancel.is_cancelled();
        if self.store.is_some() && !stats.cancelled {
            self.write_through(&mappings, &mut stats);
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok((mappings, stats))
    }

    fn resolve_source(&self, raw_source_id: &str) -> SourceIdentity {
        match &self.normalizer {
            Some(normalizer) => match normalizer.normalize(raw_source_id) {
                Ok(identity) => identity,
                Err(err) => {
                    tracing::warn!(source = raw_source_id, error = %err,
                        "source normalization unavailable, proceeding with raw id");
                    SourceIdentity::raw(raw_source_id)
                }
            },
            None => SourceIdentity::raw(raw_source_id),
        }
    }

    // ------------------------------------------------------------------
    // Retrieval stage
    // ------------------------------------------------------------------

    async fn refine_retrieval(
        &self,
        fields: &[FieldDescriptor],
        states: &mut [Vec<MappingCandidate>],
        config: &BatchConfig,
        cancel: &CancellationToken,
        stats: &mut RunStats,
    ) {
        let Some(refiner) = &self.retrieval else {
            stats.retrieval_fallback = true;
            tracing::warn!("retrieval enabled but no refiner wired, falling back to heuristics");
            return;
        };

        let semaphore = Arc::new(Semaphore::new(config.concurrency_limit.max(1)));
        let timeout = config.refiner_timeout();
        let mut tasks: JoinSet<(usize, Result<Vec<RetrievalHit>, RefinerError>)> = JoinSet::new();

        for (index, field) in fields.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let refiner = Arc::clone(refiner);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let field = field.clone();
            let top_k = config.retrieval_top_k;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("refiner semaphore closed");
                if cancel.is_cancelled() {
                    // Abandoned, not failed: no fallback flag for cancellation.
                    return (index, Ok(Vec::new()));
                }
                match tokio::time::timeout(timeout, refiner.lookup(&field, top_k)).await {
                    Ok(result) => (index, result),
                    Err(_) => (index, Err(RefinerError::Timeout)),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(hits))) => {
                    merge_retrieval_hits(&mut states[index], &hits, &self.registry);
                }
                Ok((index, Err(err))) => {
                    stats.retrieval_failures += 1;
                    stats.retrieval_fallback = true;
                    tracing::warn!(field = %fields[index].key(), error = %err,
                        "retrieval lookup degraded, keeping heuristic candidates");
                }
                Err(join_err) => {
                    stats.retrieval_failures += 1;
                    stats.retrieval_fallback = true;
                    tracing::warn!(error = %join_err, "retrieval task failed");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Validation stage
    // ------------------------------------------------------------------

    async fn refine_validation(
        &self,
        fields: &[FieldDescriptor],
        states: &mut [Vec<MappingCandidate>],
        config: &BatchConfig,
        stats: &mut RunStats,
    ) {
        let Some(refiner) = &self.validation else {
            stats.validation_fallback = true;
            tracing::warn!("validation enabled but no refiner wired, keeping pre-validation mappings");
            return;
        };

        // Lowest-confidence fields first: those are the most valuable to fix
        // within the bounded batch.
        let mut low: Vec<(usize, f64)> = states
            .iter()
            .enumerate()
            .filter_map(|(index, candidates)| {
                candidates.first().map(|c| (index, c.confidence.value()))
            })
            .filter(|(_, confidence)| *confidence < config.validation_confidence_threshold)
            .collect();
        low.sort_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| fields[a.0].key().cmp(&fields[b.0].key()))
        });
        low.truncate(config.validation_batch_cap);

        if low.is_empty() {
            return;
        }

        let requests: Vec<ValidationRequest> = low
            .iter()
            .map(|(index, _)| ValidationRequest {
                field: fields[*index].clone(),
                current: states[*index][0].clone(),
            })
            .collect();
        stats.validation_requests = requests.len();

        let index_by_key: HashMap<FieldKey, usize> =
            low.iter().map(|(index, _)| (fields[*index].key(), *index)).collect();

        let outcome =
            tokio::time::timeout(config.refiner_timeout(), refiner.validate(&requests)).await;
        let verdicts = match outcome {
            Ok(Ok(verdicts)) => verdicts,
            Ok(Err(err)) => {
                stats.validation_fallback = true;
                tracing::warn!(error = %err,
                    "validation refiner failed, falling back to pre-validation mappings");
                return;
            }
            Err(_) => {
                stats.validation_fallback = true;
                tracing::warn!("validation refiner timed out, falling back to pre-validation mappings");
                return;
            }
        };

        // Partial success is normal: fields with no verdict keep their
        // pre-validation mapping.
        for verdict in verdicts {
            let Some(&index) = index_by_key.get(&verdict.key) else {
                stats.verdicts_dropped += 1;
                tracing::warn!(key = %verdict.key, "verdict for a field that was not sent, dropped");
                continue;
            };
            if !self.registry.contains(&verdict.concept_id) {
                stats.verdicts_dropped += 1;
                tracing::warn!(key = %verdict.key, concept = %verdict.concept_id,
                    "verdict names an unknown concept, dropped");
                continue;
            }

            let candidate = MappingCandidate::new(
                verdict.concept_id.as_str(),
                verdict.confidence,
                MappingMethod::Validated,
                verdict.rationale.as_str(),
            );
            // The verdict is authoritative for this field: it becomes the
            // top-ranked candidate regardless of its score.
            states[index].retain(|c| c.concept_id != UNMAPPED_CONCEPT_ID);
            states[index].insert(0, candidate);
        }
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    fn finalize(
        &self,
        identity: &SourceIdentity,
        fields: &[FieldDescriptor],
        states: &[Vec<MappingCandidate>],
        stats: &mut RunStats,
    ) -> Vec<Mapping> {
        let fingerprint = self.registry.fingerprint();
        let mut mappings = Vec::with_capacity(fields.len());
        let mut confidence_sum = 0.0;

        for (field, candidates) in fields.iter().zip(states) {
            let best = candidates
                .first()
                .expect("every field holds at least one candidate");

            tracing::debug!(
                field = %field.key(),
                concept = %best.concept_id,
                confidence = best.confidence.value(),
                method = %best.method,
                rationale = %best.rationale,
                "mapping decision"
            );

            if best.concept_id == UNMAPPED_CONCEPT_ID {
                stats.unmapped_count += 1;
            } else {
                match best.method {
                    MappingMethod::Heuristic => stats.heuristic_count += 1,
                    MappingMethod::Retrieval => stats.retrieval_count += 1,
                    MappingMethod::Validated => stats.validated_count += 1,
                }
            }
            confidence_sum += best.confidence.value();

            mappings.push(Mapping::from_candidate(
                &identity.canonical_id,
                field,
                best,
                fingerprint,
            ));
        }

        if !mappings.is_empty() {
            stats.average_confidence = confidence_sum / mappings.len() as f64;
        }
        mappings
    }

    /// Persist finalized mappings through the store adapter. Write errors
    /// are counted, never fatal. Cancelled (partial) runs are not persisted.
    fn write_through(&self, mappings: &[Mapping], stats: &mut RunStats) {
        let Some(store) = &self.store else { return };

        for mapping in mappings {
            match store.get(mapping.key()) {
                Ok(Some(prior)) if prior.concept_id != mapping.concept_id => {
                    tracing::debug!(key = %mapping.key(), old = %prior.concept_id,
                        new = %mapping.concept_id, "superseding prior mapping");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(key = %mapping.key(), error = %err, "store read failed");
                }
            }
            if let Err(err) = store.put(mapping) {
                stats.store_write_failures += 1;
                tracing::warn!(key = %mapping.key(), error = %err,
                    "store write failed, mapping kept in-memory only");
            }
        }
    }
}

// ============================================================================
// Retrieval blending
// ============================================================================

/// Blend similarity hits into a field's candidate list.
///
/// Each hit becomes a capped-retrieval candidate; an existing candidate for
/// the same concept keeps whichever confidence is higher. Hits naming
/// unknown concepts are dropped.
fn merge_retrieval_hits(
    candidates: &mut Vec<MappingCandidate>,
    hits: &[RetrievalHit],
    registry: &OntologyRegistry,
) {
    let mut changed = false;

    for hit in hits {
        if !registry.contains(&hit.concept_id) {
            tracing::debug!(concept = %hit.concept_id, "retrieval hit for unknown concept, dropped");
            continue;
        }
        let blended = crate::candidate::Confidence::new(hit.similarity).value() * RETRIEVAL_BLEND_CAP;
        if blended <= 0.0 {
            continue;
        }
        let rationale = format!("retrieval:sim={:.2}", hit.similarity);

        match candidates.iter_mut().find(|c| c.concept_id == hit.concept_id) {
            Some(existing) => {
                if blended > existing.confidence.value() {
                    *existing = MappingCandidate::new(
                        hit.concept_id.as_str(),
                        blended,
                        MappingMethod::Retrieval,
                        rationale,
                    );
                    changed = true;
                }
            }
            None => {
                candidates.push(MappingCandidate::new(
                    hit.concept_id.as_str(),
                    blended,
                    MappingMethod::Retrieval,
                    rationale,
                ));
                changed = true;
            }
        }
    }

    if changed {
        // A real candidate replaces the synthetic unmapped placeholder.
        if candidates.len() > 1 {
            candidates.retain(|c| c.concept_id != UNMAPPED_CONCEPT_ID);
        }
        rank_candidates(candidates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Confidence;
    use ontomap_ontology::OntologyConcept;

    fn registry() -> OntologyRegistry {
        OntologyRegistry::from_concepts(vec![
            OntologyConcept::new("revenue", "Revenue", "finance").hint("amount"),
            OntologyConcept::new("account", "Account", "finance").hint("account"),
        ])
        .unwrap()
    }

    #[test]
    fn blending_caps_retrieval_confidence() {
        let reg = registry();
        let mut candidates = vec![unmapped_candidate()];
        merge_retrieval_hits(
            &mut candidates,
            &[RetrievalHit {
                concept_id: "revenue".to_string(),
                similarity: 1.0,
            }],
            &reg,
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].concept_id, "revenue");
        assert_eq!(candidates[0].confidence, Confidence::new(RETRIEVAL_BLEND_CAP));
        assert_eq!(candidates[0].method, MappingMethod::Retrieval);
    }

    #[test]
    fn blending_never_overrides_stronger_heuristic() {
        let reg = registry();
        let mut candidates = vec![MappingCandidate::new(
            "revenue",
            0.92,
            MappingMethod::Heuristic,
            "exact:amount",
        )];
        merge_retrieval_hits(
            &mut candidates,
            &[RetrievalHit {
                concept_id: "revenue".to_string(),
                similarity: 1.0,
            }],
            &reg,
        );

        assert_eq!(candidates[0].method, MappingMethod::Heuristic);
        assert_eq!(candidates[0].confidence.value(), 0.92);
    }

    #[test]
    fn blending_lifts_weaker_heuristic() {
        let reg = registry();
        let mut candidates = vec![MappingCandidate::new(
            "revenue",
            0.30,
            MappingMethod::Heuristic,
            "partial:amount",
        )];
        merge_retrieval_hits(
            &mut candidates,
            &[RetrievalHit {
                concept_id: "revenue".to_string(),
                similarity: 0.9,
            }],
            &reg,
        );

        assert_eq!(candidates[0].method, MappingMethod::Retrieval);
        assert!(candidates[0].confidence.value() > 0.30);
        assert!(candidates[0].confidence.value() <= RETRIEVAL_BLEND_CAP);
    }

    #[test]
    fn blending_drops_unknown_concepts() {
        let reg = registry();
        let mut candidates = vec![unmapped_candidate()];
        merge_retrieval_hits(
            &mut candidates,
            &[RetrievalHit {
                concept_id: "ghost".to_string(),
                similarity: 0.99,
            }],
            &reg,
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].concept_id, UNMAPPED_CONCEPT_ID);
    }

    #[test]
    fn cancellation_token_flags() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
