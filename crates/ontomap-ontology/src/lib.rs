//! Ontomap ontology registry.
//!
//! The registry holds the fixed set of target business concepts that source
//! fields are mapped onto:
//! - each concept has a stable id, a human label, and a cluster tag,
//! - lexical hint patterns (weighted fragments/synonyms) are the matching
//!   signals consumed by the heuristic scorer,
//! - negative patterns veto or penalize a match (e.g. `gl_` prefixed fields
//!   should not be read as plain accounts).
//!
//! The registry is loaded once from JSON (or built from the starter
//! vocabulary) and is immutable afterwards; it is shared read-only across
//! concurrent mapping runs via `Arc`.

pub mod builtin;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Concept id reserved for the synthetic "no concept matched" mapping.
///
/// The registry rejects it at load time so the unmapped marker can never
/// collide with a real concept.
pub const UNMAPPED_CONCEPT_ID: &str = "unmapped";

// ============================================================================
// Core Types
// ============================================================================

/// A weighted lexical hint pattern.
///
/// The pattern is a lowercase fragment or synonym (`"amount"`,
/// `"gross_revenue"`). Weight scales the signal contribution; 1.0 is the
/// neutral default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HintPattern {
    pub pattern: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl HintPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            weight: 1.0,
        }
    }

    pub fn weighted(pattern: impl Into<String>, weight: f64) -> Self {
        Self {
            pattern: pattern.into(),
            weight,
        }
    }
}

/// A negative pattern: its presence in a field name subtracts `penalty`
/// from the concept's score. Penalties can drive a score to zero but the
/// candidate layer clamps, so they never produce a negative confidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NegativePattern {
    pub pattern: String,
    #[serde(default = "default_penalty")]
    pub penalty: f64,
}

fn default_penalty() -> f64 {
    0.8
}

impl NegativePattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            penalty: default_penalty(),
        }
    }

    pub fn with_penalty(pattern: impl Into<String>, penalty: f64) -> Self {
        Self {
            pattern: pattern.into(),
            penalty,
        }
    }
}

/// One canonical business concept (e.g. Revenue, Account).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OntologyConcept {
    /// Stable string key, e.g. `revenue`.
    pub id: String,
    /// Human label, e.g. `Revenue`.
    pub label: String,
    /// Grouping tag used by downstream layering/persona filtering.
    #[serde(default)]
    pub cluster: String,
    /// Ordered lexical hints; order is preserved for stable rationales.
    pub hints: Vec<HintPattern>,
    /// Tokens that veto or penalize a match.
    #[serde(default)]
    pub negative: Vec<NegativePattern>,
}

impl OntologyConcept {
    pub fn new(id: impl Into<String>, label: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            cluster: cluster.into(),
            hints: Vec::new(),
            negative: Vec::new(),
        }
    }

    pub fn hint(mut self, pattern: &str) -> Self {
        self.hints.push(HintPattern::new(pattern));
        self
    }

    pub fn hint_weighted(mut self, pattern: &str, weight: f64) -> Self {
        self.hints.push(HintPattern::weighted(pattern, weight));
        self
    }

    pub fn veto(mut self, pattern: &str) -> Self {
        self.negative.push(NegativePattern::new(pattern));
        self
    }

    pub fn veto_with_penalty(mut self, pattern: &str, penalty: f64) -> Self {
        self.negative.push(NegativePattern::with_penalty(pattern, penalty));
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Registry load/validation failure. Fatal: no run may start on a registry
/// that failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read ontology file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse ontology JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("ontology has no concepts")]
    Empty,
    #[error("concept at index {index} has an empty id")]
    EmptyId { index: usize },
    #[error("duplicate concept id `{id}`")]
    DuplicateId { id: String },
    #[error("concept id `{0}` is reserved for the synthetic unmapped marker")]
    ReservedId(String),
    #[error("concept `{id}` has an empty label")]
    EmptyLabel { id: String },
    #[error("concept `{id}` declares no hint patterns")]
    NoHints { id: String },
    #[error("concept `{id}` has an empty hint or negative pattern")]
    EmptyPattern { id: String },
    #[error("concept `{id}` has a non-finite or negative weight: {value}")]
    BadWeight { id: String, value: f64 },
}

// ============================================================================
// Registry
// ============================================================================

/// On-disk ontology document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OntologyDocument {
    concepts: Vec<OntologyConcept>,
}

/// Validated, immutable concept registry.
///
/// Safe for concurrent read access from multiple orchestrator runs; share
/// it behind an `Arc` and never behind a lock.
#[derive(Debug, Clone)]
pub struct OntologyRegistry {
    concepts: Vec<OntologyConcept>,
    by_id: HashMap<String, usize>,
    fingerprint: String,
}

impl OntologyRegistry {
    /// Build a registry from concepts, validating every invariant.
    pub fn from_concepts(concepts: Vec<OntologyConcept>) -> Result<Self, ConfigError> {
        if concepts.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut by_id = HashMap::with_capacity(concepts.len());
        for (index, concept) in concepts.iter().enumerate() {
            if concept.id.is_empty() {
                return Err(ConfigError::EmptyId { index });
            }
            if concept.id == UNMAPPED_CONCEPT_ID {
                return Err(ConfigError::ReservedId(concept.id.clone()));
            }
            if concept.label.is_empty() {
                return Err(ConfigError::EmptyLabel {
                    id: concept.id.clone(),
                });
            }
            if concept.hints.is_empty() {
                return Err(ConfigError::NoHints {
                    id: concept.id.clone(),
                });
            }
            for hint in &concept.hints {
                if hint.pattern.is_empty() {
                    return Err(ConfigError::EmptyPattern {
                        id: concept.id.clone(),
                    });
                }
                if !hint.weight.is_finite() || hint.weight < 0.0 {
                    return Err(ConfigError::BadWeight {
                        id: concept.id.clone(),
                        value: hint.weight,
                    });
                }
            }
            for neg in &concept.negative {
                if neg.pattern.is_empty() {
                    return Err(ConfigError::EmptyPattern {
                        id: concept.id.clone(),
                    });
                }
                if !neg.penalty.is_finite() || neg.penalty < 0.0 {
                    return Err(ConfigError::BadWeight {
                        id: concept.id.clone(),
                        value: neg.penalty,
                    });
                }
            }
            if by_id.insert(concept.id.clone(), index).is_some() {
                return Err(ConfigError::DuplicateId {
                    id: concept.id.clone(),
                });
            }
        }

        let fingerprint = fingerprint_concepts(&concepts);
        Ok(Self {
            concepts,
            by_id,
            fingerprint,
        })
    }

    /// Parse and validate an ontology JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let doc: OntologyDocument = serde_json::from_str(json)?;
        Self::from_concepts(doc.concepts)
    }

    /// Load and validate an ontology JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// The starter enterprise ontology (see [`builtin`]).
    pub fn builtin() -> Self {
        Self::from_concepts(builtin::starter_concepts())
            .expect("builtin ontology must validate")
    }

    pub fn concepts(&self) -> &[OntologyConcept] {
        &self.concepts
    }

    pub fn get(&self, concept_id: &str) -> Option<&OntologyConcept> {
        self.by_id.get(concept_id).map(|&i| &self.concepts[i])
    }

    pub fn contains(&self, concept_id: &str) -> bool {
        self.by_id.contains_key(concept_id)
    }

    pub fn hints_for(&self, concept_id: &str) -> Option<&[HintPattern]> {
        self.get(concept_id).map(|c| c.hints.as_slice())
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Stable content fingerprint (`sha256:<hex>`).
    ///
    /// Mapping runs record this so results can be pinned to the exact
    /// ontology that produced them.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Serialize the registry back to its JSON document form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&OntologyDocument {
            concepts: self.concepts.clone(),
        })
    }
}

/// Fingerprint the concept list: sha256 over the canonical (id-sorted)
/// JSON serialization, rendered as `sha256:<hex>`.
fn fingerprint_concepts(concepts: &[OntologyConcept]) -> String {
    let mut sorted: Vec<&OntologyConcept> = concepts.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let canonical =
        serde_json::to_vec(&sorted).expect("concept serialization cannot fail");
    let digest = Sha256::digest(&canonical);

    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256:");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
