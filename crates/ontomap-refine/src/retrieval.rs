//! Deterministic retrieval over confirmed mapping lessons.
//!
//! The index embeds field/table names as token-hash vectors: each token is
//! FNV-1a hashed into one of a fixed number of buckets and the vector is
//! L2-normalized. No model, no randomness, no I/O. The same lesson set
//! always produces the same similarity ranking, which the engine's
//! blending contract requires.
//!
//! The lesson set is expected to stay small (confirmed mappings, not raw
//! fields), so lookup is an exact linear cosine scan rather than an ANN
//! index.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ontomap_engine::scorer::tokenize;
use ontomap_engine::{FieldDescriptor, RefinerError, RetrievalHit, RetrievalRefiner};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bucket count for token-hash embeddings.
pub const EMBEDDING_DIM: usize = 64;

const LESSONS_FILE_VERSION: &str = "ontomap_lessons_v1";

// ============================================================================
// Lessons
// ============================================================================

/// One confirmed mapping observation: this field pattern was mapped to
/// this concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingLesson {
    pub field_name: String,
    #[serde(default)]
    pub table_name: String,
    pub concept_id: String,
}

impl MappingLesson {
    pub fn new(
        field_name: impl Into<String>,
        table_name: impl Into<String>,
        concept_id: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            table_name: table_name.into(),
            concept_id: concept_id.into(),
        }
    }
}

/// On-disk lesson file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonFile {
    pub version: String,
    pub lessons: Vec<MappingLesson>,
}

/// Load a lesson file, checking its version marker.
pub fn load_lessons(path: impl AsRef<Path>) -> Result<Vec<MappingLesson>> {
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read lesson file {}", path.as_ref().display()))?;
    let file: LessonFile = serde_json::from_str(&text).context("failed to parse lesson file")?;
    if file.version != LESSONS_FILE_VERSION {
        return Err(anyhow!(
            "unsupported lesson file version: {} (expected {LESSONS_FILE_VERSION})",
            file.version
        ));
    }
    Ok(file.lessons)
}

/// Write a lesson file.
pub fn save_lessons(path: impl AsRef<Path>, lessons: &[MappingLesson]) -> Result<()> {
    let file = LessonFile {
        version: LESSONS_FILE_VERSION.to_string(),
        lessons: lessons.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write lesson file {}", path.as_ref().display()))?;
    Ok(())
}

// ============================================================================
// Embeddings
// ============================================================================

fn fnv1a64(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn normalize_in_place(v: &mut [f32]) {
    let mut norm2 = 0.0f32;
    for x in v.iter() {
        norm2 += x * x;
    }
    if norm2 <= 0.0 {
        return;
    }
    let inv = 1.0f32 / norm2.sqrt();
    for x in v.iter_mut() {
        *x *= inv;
    }
}

/// Token-hash embedding of a field/table name pair.
fn embed(field_name: &str, table_name: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    for token in &tokenize(field_name).tokens {
        let bucket = (fnv1a64(token.as_bytes()) as usize) % EMBEDDING_DIM;
        vector[bucket] += 1.0;
    }
    // Table tokens contribute at half weight: corroborating context, not
    // the identity of the field.
    for token in &tokenize(table_name).tokens {
        let bucket = (fnv1a64(token.as_bytes()) as usize) % EMBEDDING_DIM;
        vector[bucket] += 0.5;
    }

    normalize_in_place(&mut vector);
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    // Both vectors are already L2-normalized and non-negative, so the dot
    // product is the cosine and lands in [0.0, 1.0].
    a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum()
}

// ============================================================================
// Index
// ============================================================================

struct IndexedLesson {
    lesson: MappingLesson,
    vector: Vec<f32>,
}

/// Similarity index over mapping lessons, usable directly as the engine's
/// retrieval refiner.
#[derive(Default)]
pub struct LessonIndex {
    entries: Vec<IndexedLesson>,
}

impl LessonIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lessons(lessons: Vec<MappingLesson>) -> Self {
        let mut index = Self::new();
        for lesson in lessons {
            index.add_lesson(lesson);
        }
        index
    }

    pub fn add_lesson(&mut self, lesson: MappingLesson) {
        let vector = embed(&lesson.field_name, &lesson.table_name);
        self.entries.push(IndexedLesson { lesson, vector });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lessons(&self) -> impl Iterator<Item = &MappingLesson> {
        self.entries.iter().map(|e| &e.lesson)
    }

    /// Top-k concepts by best cosine similarity against the lesson set.
    pub fn query(&self, field: &FieldDescriptor, top_k: usize) -> Vec<RetrievalHit> {
        if top_k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let probe = embed(&field.field_name, &field.table_name);

        // Best similarity per concept, so one concept with many lessons
        // does not crowd out the ranking.
        let mut best: Vec<(String, f64)> = Vec::new();
        for entry in &self.entries {
            let similarity = cosine(&probe, &entry.vector);
            if similarity <= 0.0 {
                continue;
            }
            match best.iter_mut().find(|(id, _)| id == &entry.lesson.concept_id) {
                Some((_, existing)) => {
                    if similarity > *existing {
                        *existing = similarity;
                    }
                }
                None => best.push((entry.lesson.concept_id.clone(), similarity)),
            }
        }

        best.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        best.truncate(top_k);
        best.into_iter()
            .map(|(concept_id, similarity)| RetrievalHit {
                concept_id,
                similarity,
            })
            .collect()
    }
}

#[async_trait]
impl RetrievalRefiner for LessonIndex {
    async fn lookup(
        &self,
        field: &FieldDescriptor,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>, RefinerError> {
        Ok(self.query(field, top_k))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn index() -> LessonIndex {
        LessonIndex::from_lessons(vec![
            MappingLesson::new("gross_revenue", "sales", "revenue"),
            MappingLesson::new("total_amount", "invoices", "revenue"),
            MappingLesson::new("unit_cost", "items", "cost"),
            MappingLesson::new("customer_name", "accounts", "customer"),
        ])
    }

    #[test]
    fn identical_name_scores_highest() {
        let idx = index();
        let field = FieldDescriptor::new("erp", "sales", "gross_revenue");

        let hits = idx.query(&field, 3);
        assert_eq!(hits[0].concept_id, "revenue");
        assert_relative_eq!(hits[0].similarity, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn similarity_is_bounded_and_ranked() {
        let idx = index();
        let field = FieldDescriptor::new("erp", "billing", "revenue_total");

        let hits = idx.query(&field, 10);
        assert!(!hits.is_empty());
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        for hit in &hits {
            assert!(hit.similarity >= 0.0 && hit.similarity <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn query_is_deterministic() {
        let idx = index();
        let field = FieldDescriptor::new("erp", "sales", "net_amount");

        let first = idx.query(&field, 5);
        let second = idx.query(&field, 5);
        assert_eq!(first, second);
    }

    #[test]
    fn unrelated_field_returns_no_hits() {
        let idx = index();
        let field = FieldDescriptor::new("erp", "zz", "qqq_xyz_flag");

        assert!(idx.query(&field, 5).is_empty());
    }

    #[test]
    fn empty_index_and_zero_k_are_empty() {
        let idx = LessonIndex::new();
        let field = FieldDescriptor::new("erp", "sales", "gross_revenue");
        assert!(idx.query(&field, 5).is_empty());
        assert!(index().query(&field, 0).is_empty());
    }

    #[test]
    fn one_concept_reported_once() {
        let idx = index();
        // Matches both revenue lessons; revenue must appear once with the
        // best similarity.
        let field = FieldDescriptor::new("erp", "sales", "gross_amount");
        let hits = idx.query(&field, 10);
        let revenue_hits = hits.iter().filter(|h| h.concept_id == "revenue").count();
        assert_eq!(revenue_hits, 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn similarity_always_in_unit_interval(
                lesson_field in "[A-Za-z0-9_]{1,24}",
                lesson_table in "[A-Za-z0-9_]{0,16}",
                probe_field in "[A-Za-z0-9_]{1,24}",
            ) {
                let idx = LessonIndex::from_lessons(vec![MappingLesson::new(
                    lesson_field,
                    lesson_table,
                    "revenue",
                )]);
                let field = FieldDescriptor::new("proptest", "t", probe_field);

                for hit in idx.query(&field, 5) {
                    prop_assert!(hit.similarity > 0.0);
                    prop_assert!(hit.similarity <= 1.0 + 1e-6);
                }
            }

            #[test]
            fn query_reproducible_for_arbitrary_names(probe_field in "[A-Za-z0-9_]{1,24}") {
                let idx = LessonIndex::from_lessons(vec![
                    MappingLesson::new("gross_revenue", "sales", "revenue"),
                    MappingLesson::new("unit_cost", "items", "cost"),
                ]);
                let field = FieldDescriptor::new("proptest", "t", probe_field);
                prop_assert_eq!(idx.query(&field, 5), idx.query(&field, 5));
            }
        }
    }

    #[test]
    fn lesson_file_roundtrip() {
        let dir = std::env::temp_dir().join("ontomap_lesson_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lessons.json");

        let lessons = vec![MappingLesson::new("gross_revenue", "sales", "revenue")];
        save_lessons(&path, &lessons).unwrap();
        let loaded = load_lessons(&path).unwrap();
        assert_eq!(loaded, lessons);

        std::fs::remove_file(&path).ok();
    }
}
