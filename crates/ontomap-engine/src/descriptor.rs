//! Field descriptors and source identity.
//!
//! Upstream schema acquisition hands the engine a list of
//! [`FieldDescriptor`]s per source system. Descriptors are immutable for
//! the duration of a run and `(source, table, field)` identifies a field
//! uniquely within one batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Field identity
// ============================================================================

/// The identity of one field within a run: `(source, table, field)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub source_id: String,
    pub table_name: String,
    pub field_name: String,
}

impl FieldKey {
    pub fn new(
        source_id: impl Into<String>,
        table_name: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            table_name: table_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_id, self.table_name, self.field_name
        )
    }
}

/// One field of a source schema, as delivered by upstream acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub source_id: String,
    pub table_name: String,
    pub field_name: String,
    /// Declared storage type if the source exposes one (`varchar(80)`,
    /// `NUMBER`, ...). Not a scoring signal; carried for downstream display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    /// Short sample value or type-inference note from acquisition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_hint: Option<String>,
    /// Optional profiling metrics attached by acquisition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SourceMetrics>,
}

impl FieldDescriptor {
    pub fn new(
        source_id: impl Into<String>,
        table_name: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            table_name: table_name.into(),
            field_name: field_name.into(),
            declared_type: None,
            sample_hint: None,
            metrics: None,
        }
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    pub fn with_sample_hint(mut self, sample_hint: impl Into<String>) -> Self {
        self.sample_hint = Some(sample_hint.into());
        self
    }

    pub fn key(&self) -> FieldKey {
        FieldKey::new(
            self.source_id.as_str(),
            self.table_name.as_str(),
            self.field_name.as_str(),
        )
    }
}

// ============================================================================
// Source metrics
// ============================================================================

/// A typed metric value for the extension map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
    Flag(bool),
}

/// Profiling metrics for a field, as a strongly-typed record.
///
/// The common metrics are named optional fields; anything
/// source-specific goes into the typed `extra` map. This is deliberately
/// not a free-form dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, MetricValue>,
}

// ============================================================================
// Source normalization contract
// ============================================================================

/// Canonical identity of a source system plus how much its metadata is
/// trusted, as resolved by the (external) source normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub canonical_id: String,
    pub trust_score: f64,
}

impl SourceIdentity {
    /// Identity used when normalization is unavailable: the raw id, fully
    /// trusted, so the run proceeds unchanged.
    pub fn raw(raw_id: &str) -> Self {
        Self {
            canonical_id: raw_id.to_string(),
            trust_score: 1.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("unknown source `{0}`")]
    UnknownSource(String),
    #[error("normalizer unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a raw source identifier to a canonical identity.
///
/// The engine never blocks on normalization: any error falls back to
/// [`SourceIdentity::raw`].
pub trait SourceNormalizer: Send + Sync {
    fn normalize(&self, raw_source_id: &str) -> Result<SourceIdentity, NormalizeError>;
}
