//! Deterministic heuristic scorer.
//!
//! Pure function from (field descriptor, registry) to a ranked candidate
//! list. Re-runs must reproduce output byte-for-byte, so everything here is
//! order-stable: hints are evaluated in declaration order, concepts in
//! registry order, and ties break on concept id.
//!
//! Signal weights are engine constants rather than configuration: tunable
//! weights would break the byte-identical re-run guarantee across configs
//! and turn rationale strings into moving targets.

use crate::candidate::{rank_candidates, MappingCandidate, MappingMethod};
use crate::descriptor::FieldDescriptor;
use ontomap_ontology::{OntologyConcept, OntologyRegistry, UNMAPPED_CONCEPT_ID};
use std::collections::BTreeSet;

/// Signal for a full-field-name match against a hint. Near-ceiling but
/// below 1.0 so a validation upgrade remains visible as an upgrade.
pub const EXACT_SIGNAL: f64 = 0.92;

/// Signal when every hint token is present in the field's token set.
pub const SUBSET_SIGNAL: f64 = 0.75;

/// Base signal for partial token overlap, scaled by the matched fraction.
pub const PARTIAL_SIGNAL: f64 = 0.45;

/// Additive bonus when the table name corroborates a concept hint. Never
/// sufficient on its own: it is only applied on top of a positive
/// field-name signal.
pub const TABLE_BONUS: f64 = 0.10;

// ============================================================================
// Normalization
// ============================================================================

/// Normalized view of an identifier: lowercase token set plus the flat
/// underscore-joined form used for exact matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenView {
    pub tokens: BTreeSet<String>,
    pub flat: String,
}

/// Lowercase, split on non-alphanumeric separators and camelCase
/// boundaries. `GlAccountCode` and `gl_account-code` normalize
/// identically.
pub fn tokenize(raw: &str) -> TokenView {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            current.extend(ch.to_lowercase());
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let flat = tokens.join("_");
    TokenView {
        tokens: tokens.into_iter().collect(),
        flat,
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// How strongly one hint matches one token view, with the rationale tag
/// that names the signal.
fn hint_signal(hint_view: &TokenView, hint_pattern: &str, target: &TokenView) -> Option<(f64, String)> {
    if hint_view.tokens.is_empty() {
        return None;
    }

    if target.flat == hint_view.flat {
        return Some((EXACT_SIGNAL, format!("exact:{hint_pattern}")));
    }

    if hint_view.tokens.is_subset(&target.tokens) {
        return Some((SUBSET_SIGNAL, format!("tokens:{hint_pattern}")));
    }

    let matched = hint_view
        .tokens
        .iter()
        .filter(|ht| {
            target
                .tokens
                .iter()
                .any(|ft| ft.contains(ht.as_str()) || ht.contains(ft.as_str()))
        })
        .count();
    if matched == 0 {
        return None;
    }

    let fraction = matched as f64 / hint_view.tokens.len() as f64;
    Some((PARTIAL_SIGNAL * fraction, format!("partial:{hint_pattern}")))
}

/// Score one field against one concept. Returns the raw (unclamped)
/// accumulated score and the rationale parts; the caller constructs the
/// candidate, which clamps.
fn score_concept(
    field_view: &TokenView,
    table_view: &TokenView,
    concept: &OntologyConcept,
) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut rationale: Vec<String> = Vec::new();
    let mut field_signal = false;

    for hint in &concept.hints {
        let hint_view = tokenize(&hint.pattern);
        if let Some((signal, tag)) = hint_signal(&hint_view, &hint.pattern, field_view) {
            score += signal * hint.weight;
            rationale.push(tag);
            field_signal = true;
        }
    }

    // Table corroboration: additive, never independently sufficient.
    if field_signal {
        for hint in &concept.hints {
            let hint_view = tokenize(&hint.pattern);
            if hint_view.tokens.is_empty() {
                continue;
            }
            if table_view.flat == hint_view.flat || hint_view.tokens.is_subset(&table_view.tokens) {
                score += TABLE_BONUS * hint.weight;
                rationale.push(format!("table:{}", hint.pattern));
            }
        }
    }

    for neg in &concept.negative {
        let neg_view = tokenize(&neg.pattern);
        if neg_view.tokens.is_empty() {
            continue;
        }
        if neg_view.tokens.is_subset(&field_view.tokens) {
            score -= neg.penalty;
            rationale.push(format!("penalty:{}", neg.pattern));
        }
    }

    (score, rationale)
}

/// The candidate substituted when no concept scores above zero, and when
/// scoring a field fails entirely.
pub fn unmapped_candidate() -> MappingCandidate {
    MappingCandidate::new(
        UNMAPPED_CONCEPT_ID,
        0.0,
        MappingMethod::Heuristic,
        "no concept matched",
    )
}

/// Score a field against every registry concept.
///
/// Always returns at least one candidate; the full ranked list is returned
/// because the orchestrator needs the ranking to decide whether refinement
/// is warranted.
pub fn score_field(field: &FieldDescriptor, registry: &OntologyRegistry) -> Vec<MappingCandidate> {
    let field_view = tokenize(&field.field_name);
    let table_view = tokenize(&field.table_name);

    let mut candidates: Vec<MappingCandidate> = Vec::new();
    for concept in registry.concepts() {
        let (raw, rationale) = score_concept(&field_view, &table_view, concept);
        // Negative signals may drive the score to zero; the clamp inside
        // MappingCandidate::new guarantees it never goes below.
        if raw > 0.0 {
            candidates.push(MappingCandidate::new(
                concept.id.as_str(),
                raw,
                MappingMethod::Heuristic,
                rationale.join(" "),
            ));
        }
    }

    if candidates.is_empty() {
        return vec![unmapped_candidate()];
    }

    rank_candidates(&mut candidates);
    candidates
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ontomap_ontology::OntologyConcept;

    fn registry(concepts: Vec<OntologyConcept>) -> OntologyRegistry {
        OntologyRegistry::from_concepts(concepts).unwrap()
    }

    #[test]
    fn tokenize_splits_separators_and_camel_case() {
        let view = tokenize("gl_account-Code");
        assert_eq!(view.flat, "gl_account_code");
        assert!(view.tokens.contains("gl"));
        assert!(view.tokens.contains("account"));
        assert!(view.tokens.contains("code"));

        let view = tokenize("GrossRevenueUSD");
        assert!(view.tokens.contains("gross"));
        assert!(view.tokens.contains("revenue"));
    }

    #[test]
    fn exact_match_scores_near_ceiling() {
        let reg = registry(vec![
            OntologyConcept::new("revenue", "Revenue", "finance").hint("amount")
        ]);
        let field = FieldDescriptor::new("salesforce", "Opportunity", "Amount");

        let candidates = score_field(&field, &reg);
        assert_eq!(candidates[0].concept_id, "revenue");
        assert_eq!(candidates[0].confidence.value(), EXACT_SIGNAL);
        assert_eq!(candidates[0].method, MappingMethod::Heuristic);
        assert!(candidates[0].rationale.contains("exact:amount"));
    }

    #[test]
    fn token_subset_beats_partial() {
        let reg = registry(vec![
            OntologyConcept::new("revenue", "Revenue", "finance").hint("gross_revenue"),
            OntologyConcept::new("cost", "Cost", "finance").hint("gross_cost_basis"),
        ]);
        let field = FieldDescriptor::new("erp", "sales", "gross_revenue_usd");

        let candidates = score_field(&field, &reg);
        assert_eq!(candidates[0].concept_id, "revenue");
        assert!(candidates[0].rationale.contains("tokens:gross_revenue"));
        assert!(candidates[0].confidence.value() > candidates[1].confidence.value());
    }

    #[test]
    fn table_bonus_requires_field_signal() {
        let reg = registry(vec![
            OntologyConcept::new("revenue", "Revenue", "finance").hint("revenue")
        ]);

        // Table matches, field does not: no candidate at all.
        let field = FieldDescriptor::new("erp", "revenue", "row_version");
        let candidates = score_field(&field, &reg);
        assert_eq!(candidates[0].concept_id, UNMAPPED_CONCEPT_ID);

        // Field matches and the table corroborates: bonus applied.
        let field = FieldDescriptor::new("erp", "revenue", "revenue_usd");
        let candidates = score_field(&field, &reg);
        assert_eq!(candidates[0].concept_id, "revenue");
        assert!(candidates[0].rationale.contains("table:revenue"));
        assert!(candidates[0].confidence.value() > SUBSET_SIGNAL);
    }

    #[test]
    fn negative_pattern_suppresses_to_unmapped() {
        let reg = registry(vec![OntologyConcept::new("account", "Account", "finance")
            .hint("account")
            .veto("gl")]);
        let field = FieldDescriptor::new("netsuite", "gl_entries", "gl_account");

        let candidates = score_field(&field, &reg);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].concept_id, UNMAPPED_CONCEPT_ID);
        assert_eq!(candidates[0].confidence.value(), 0.0);
    }

    #[test]
    fn negative_pattern_never_drives_negative() {
        let reg = registry(vec![OntologyConcept::new("account", "Account", "finance")
            .hint("account")
            .veto_with_penalty("gl", 5.0)
            .veto_with_penalty("ledger", 5.0)]);
        let field = FieldDescriptor::new("netsuite", "gl_entries", "gl_ledger_account");

        // All vetoes fire; the concept is suppressed, not negative, and the
        // synthetic unmapped candidate carries exactly 0.0.
        let candidates = score_field(&field, &reg);
        for candidate in &candidates {
            assert!(candidate.confidence.value() >= 0.0);
        }
        assert_eq!(candidates[0].concept_id, UNMAPPED_CONCEPT_ID);
    }

    #[test]
    fn unmatched_field_yields_single_unmapped_candidate() {
        let reg = registry(vec![
            OntologyConcept::new("revenue", "Revenue", "finance").hint("revenue")
        ]);
        let field = FieldDescriptor::new("erp", "misc", "zzz_internal_flag");

        let candidates = score_field(&field, &reg);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].concept_id, UNMAPPED_CONCEPT_ID);
        assert_eq!(candidates[0].confidence.value(), 0.0);
        assert_eq!(candidates[0].method, MappingMethod::Heuristic);
    }

    #[test]
    fn tie_breaks_on_concept_id() {
        let reg = registry(vec![
            OntologyConcept::new("beta", "Beta", "x").hint("amount"),
            OntologyConcept::new("alpha", "Alpha", "x").hint("amount"),
        ]);
        let field = FieldDescriptor::new("s", "t", "amount");

        let candidates = score_field(&field, &reg);
        assert_eq!(candidates[0].concept_id, "alpha");
        assert_eq!(candidates[1].concept_id, "beta");
        assert_eq!(candidates[0].confidence, candidates[1].confidence);
    }

    #[test]
    fn scoring_is_reproducible() {
        let reg = OntologyRegistry::builtin();
        let field = FieldDescriptor::new("salesforce", "Opportunity", "ExpectedRevenue");

        let first = score_field(&field, &reg);
        let second = score_field(&field, &reg);
        assert_eq!(first, second);
    }

    #[test]
    fn hint_weight_scales_signal() {
        let reg = registry(vec![
            OntologyConcept::new("strong", "Strong", "x").hint("amount"),
            OntologyConcept::new("weak", "Weak", "x").hint_weighted("amount", 0.5),
        ]);
        let field = FieldDescriptor::new("s", "t", "amount");

        let candidates = score_field(&field, &reg);
        assert_eq!(candidates[0].concept_id, "strong");
        assert_eq!(candidates[1].concept_id, "weak");
        assert_eq!(
            candidates[1].confidence.value(),
            EXACT_SIGNAL * 0.5
        );
    }
}
