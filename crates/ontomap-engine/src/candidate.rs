//! Mapping candidates and final mappings.
//!
//! Confidence is a clamp-on-construction newtype: every score that enters a
//! [`MappingCandidate`] passes through [`Confidence::new`], so an
//! out-of-range value is unrepresentable downstream. Unclamped additive
//! accumulation is the defect class this design exists to rule out.

use crate::descriptor::{FieldDescriptor, FieldKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Confidence
// ============================================================================

/// A mapping certainty score, always within [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0.0);

    /// Clamp `raw` into [0.0, 1.0]. NaN collapses to 0.0: an undefined
    /// score must read as "no confidence", not propagate.
    pub fn new(raw: f64) -> Self {
        if raw.is_nan() {
            return Confidence(0.0);
        }
        Confidence(raw.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for Confidence {
    fn from(raw: f64) -> Self {
        Confidence::new(raw)
    }
}

impl From<Confidence> for f64 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

impl Eq for Confidence {}

impl PartialOrd for Confidence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Confidence {
    // total_cmp is a total order and the clamp rules out NaN, so candidate
    // sorting is deterministic.
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// Which pipeline stage produced a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    Heuristic,
    Retrieval,
    Validated,
}

impl fmt::Display for MappingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingMethod::Heuristic => write!(f, "heuristic"),
            MappingMethod::Retrieval => write!(f, "retrieval"),
            MappingMethod::Validated => write!(f, "validated"),
        }
    }
}

/// One scored (concept, confidence) candidate for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingCandidate {
    pub concept_id: String,
    pub confidence: Confidence,
    pub method: MappingMethod,
    /// Short structured explanation of the matched signals, e.g.
    /// `exact:amount table:orders penalty:gl`. Consumers render it; they
    /// never parse it back apart.
    pub rationale: String,
}

impl MappingCandidate {
    pub fn new(
        concept_id: impl Into<String>,
        raw_confidence: f64,
        method: MappingMethod,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            concept_id: concept_id.into(),
            confidence: Confidence::new(raw_confidence),
            method,
            rationale: rationale.into(),
        }
    }
}

/// Sort candidates by score descending, tie-broken by concept id ascending.
/// The tie-break keeps output deterministic when two concepts score
/// identically.
pub fn rank_candidates(candidates: &mut [MappingCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.concept_id.cmp(&b.concept_id))
    });
}

// ============================================================================
// Final mapping
// ============================================================================

/// The single chosen mapping for one field.
///
/// Mappings are superseded by re-runs, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(flatten)]
    pub key: FieldKey,
    pub concept_id: String,
    pub confidence: Confidence,
    pub method: MappingMethod,
    pub rationale: String,
    /// Fingerprint of the registry that produced this mapping.
    pub registry_fingerprint: String,
}

impl Mapping {
    pub fn from_candidate(
        canonical_source_id: &str,
        field: &FieldDescriptor,
        candidate: &MappingCandidate,
        registry_fingerprint: &str,
    ) -> Self {
        Self {
            key: FieldKey::new(
                canonical_source_id,
                field.table_name.as_str(),
                field.field_name.as_str(),
            ),
            concept_id: candidate.concept_id.clone(),
            confidence: candidate.confidence,
            method: candidate.method,
            rationale: candidate.rationale.clone(),
            registry_fingerprint: registry_fingerprint.to_string(),
        }
    }

    pub fn key(&self) -> &FieldKey {
        &self.key
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn confidence_clamps_on_construction() {
        assert_relative_eq!(Confidence::new(0.5).value(), 0.5);
        assert_relative_eq!(Confidence::new(3.2).value(), 1.0);
        assert_relative_eq!(Confidence::new(-1.7).value(), 0.0);
        assert_relative_eq!(Confidence::new(f64::NAN).value(), 0.0);
        assert_relative_eq!(Confidence::new(f64::INFINITY).value(), 1.0);
        assert_relative_eq!(Confidence::new(f64::NEG_INFINITY).value(), 0.0);
    }

    #[test]
    fn confidence_clamps_on_deserialize() {
        let c: Confidence = serde_json::from_str("42.0").unwrap();
        assert_relative_eq!(c.value(), 1.0);
        let c: Confidence = serde_json::from_str("-0.25").unwrap();
        assert_relative_eq!(c.value(), 0.0);
    }

    #[test]
    fn ranking_is_deterministic_under_ties() {
        let mut candidates = vec![
            MappingCandidate::new("revenue", 0.6, MappingMethod::Heuristic, "a"),
            MappingCandidate::new("account", 0.6, MappingMethod::Heuristic, "b"),
            MappingCandidate::new("cost", 0.9, MappingMethod::Heuristic, "c"),
        ];
        rank_candidates(&mut candidates);

        let order: Vec<&str> = candidates.iter().map(|c| c.concept_id.as_str()).collect();
        assert_eq!(order, vec!["cost", "account", "revenue"]);
    }

    #[test]
    fn method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MappingMethod::Heuristic).unwrap(),
            "\"heuristic\""
        );
        assert_eq!(
            serde_json::to_string(&MappingMethod::Validated).unwrap(),
            "\"validated\""
        );
    }

    #[test]
    fn mapping_flattens_field_key() {
        let field = FieldDescriptor::new("salesforce", "Opportunity", "Amount");
        let candidate = MappingCandidate::new(
            "revenue",
            0.92,
            MappingMethod::Heuristic,
            "exact:amount",
        );
        let mapping = Mapping::from_candidate("salesforce", &field, &candidate, "sha256:ab");

        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["source_id"], "salesforce");
        assert_eq!(json["table_name"], "Opportunity");
        assert_eq!(json["concept_id"], "revenue");
        assert_eq!(json["method"], "heuristic");
    }
}
