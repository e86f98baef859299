//! LLM-backed validation refiner.
//!
//! Receives the low-confidence subset of a mapping batch, asks the model
//! to confirm or correct each assignment against the concept inventory,
//! and parses a strict JSON response. Verdict confidences are calibrated
//! before they reach the engine. Anything malformed degrades into a
//! `RefinerError`, which the orchestrator turns into a flagged fallback.

use crate::llm::{
    CompletionRequest, ConfidenceCalibrator, LlmError, LlmProvider, Message, Role,
};
use async_trait::async_trait;
use ontomap_engine::{
    FieldKey, RefinerError, ValidationRefiner, ValidationRequest, ValidationVerdict,
};
use ontomap_ontology::OntologyRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Wire protocol
// ============================================================================

/// One field as presented to the model.
#[derive(Debug, Clone, Serialize)]
struct FieldPayload<'a> {
    source_id: &'a str,
    table_name: &'a str,
    field_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    declared_type: Option<&'a str>,
    current_concept: &'a str,
    current_confidence: f64,
}

/// One verdict as returned by the model.
#[derive(Debug, Clone, Deserialize)]
struct VerdictPayload {
    source_id: String,
    table_name: String,
    field_name: String,
    concept_id: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponsePayload {
    verdicts: Vec<VerdictPayload>,
}

/// Prompt templates for the validation exchange.
pub struct PromptTemplates;

impl PromptTemplates {
    pub fn validation_system() -> &'static str {
        r#"You are a data steward reviewing automatic field-to-concept mappings.

You receive source schema fields with their current best-guess concept
assignment and the full concept inventory. For each field, either confirm
the assignment, correct it to a better concept from the inventory, or mark
it "unmapped" if no concept fits.

Rules:
1. Only use concept ids from the provided inventory (or "unmapped").
2. Confidence must be a number between 0.0 and 1.0.
3. Be conservative: high confidence (>0.8) only when the field name is
   unambiguous evidence.
4. Respond with JSON only, no prose.

Output format:
{
  "verdicts": [
    {
      "source_id": "...",
      "table_name": "...",
      "field_name": "...",
      "concept_id": "...",
      "confidence": 0.0,
      "rationale": "one short sentence"
    }
  ]
}"#
    }
}

// ============================================================================
// Refiner
// ============================================================================

/// Validation refiner that delegates judgment to an LLM provider.
pub struct LlmValidationRefiner {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<OntologyRegistry>,
    calibrator: ConfidenceCalibrator,
}

impl LlmValidationRefiner {
    pub fn new(provider: Arc<dyn LlmProvider>, registry: Arc<OntologyRegistry>) -> Self {
        Self {
            provider,
            registry,
            calibrator: ConfidenceCalibrator::new(),
        }
    }

    pub fn with_calibrator(mut self, calibrator: ConfidenceCalibrator) -> Self {
        self.calibrator = calibrator;
        self
    }

    fn build_user_message(&self, requests: &[ValidationRequest]) -> Result<String, LlmError> {
        let inventory: Vec<serde_json::Value> = self
            .registry
            .concepts()
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "label": c.label,
                    "cluster": c.cluster,
                })
            })
            .collect();

        let fields: Vec<FieldPayload<'_>> = requests
            .iter()
            .map(|request| FieldPayload {
                source_id: &request.field.source_id,
                table_name: &request.field.table_name,
                field_name: &request.field.field_name,
                declared_type: request.field.declared_type.as_deref(),
                current_concept: &request.current.concept_id,
                current_confidence: request.current.confidence.value(),
            })
            .collect();

        let payload = serde_json::json!({
            "concept_inventory": inventory,
            "fields": fields,
        });
        serde_json::to_string_pretty(&payload).map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn parse_response(&self, content: &str) -> Result<Vec<ValidationVerdict>, RefinerError> {
        // Models occasionally wrap JSON in a fence even when told not to.
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let payload: ResponsePayload = serde_json::from_str(trimmed)
            .map_err(|e| RefinerError::Malformed(format!("verdict JSON: {e}")))?;

        let verdicts = payload
            .verdicts
            .into_iter()
            .map(|v| ValidationVerdict {
                key: FieldKey::new(v.source_id, v.table_name, v.field_name),
                concept_id: v.concept_id,
                confidence: self.calibrator.calibrate(v.confidence),
                rationale: v.rationale,
            })
            .collect();
        Ok(verdicts)
    }
}

#[async_trait]
impl ValidationRefiner for LlmValidationRefiner {
    async fn validate(
        &self,
        requests: &[ValidationRequest],
    ) -> Result<Vec<ValidationVerdict>, RefinerError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let user_message = self
            .build_user_message(requests)
            .map_err(|e| RefinerError::Unavailable(e.to_string()))?;

        let request = CompletionRequest {
            messages: vec![
                Message {
                    role: Role::System,
                    content: PromptTemplates::validation_system().to_string(),
                },
                Message {
                    role: Role::User,
                    content: user_message,
                },
            ],
            max_tokens: Some(4096),
            // Low temperature: this is judgment, not generation.
            temperature: Some(0.1),
            json_mode: true,
        };

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| RefinerError::Unavailable(e.to_string()))?;

        let verdicts = self.parse_response(&response.content)?;
        tracing::debug!(
            requested = requests.len(),
            returned = verdicts.len(),
            model = %response.model,
            "validation verdicts received"
        );
        Ok(verdicts)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, ModelInfo};
    use ontomap_engine::{FieldDescriptor, MappingCandidate, MappingMethod};
    use ontomap_ontology::OntologyConcept;
    use parking_lot::Mutex;

    /// Provider double returning a canned completion.
    struct CannedProvider {
        content: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedProvider {
        fn new(content: &str) -> Self {
            Self {
                content: content.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().push(request);
            Ok(CompletionResponse {
                content: self.content.clone(),
                model: "canned".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                name: "canned".to_string(),
                max_tokens: 1,
                supports_json_mode: true,
            }
        }
    }

    fn registry() -> Arc<OntologyRegistry> {
        Arc::new(
            OntologyRegistry::from_concepts(vec![
                OntologyConcept::new("revenue", "Revenue", "finance").hint("amount"),
                OntologyConcept::new("cost", "Cost", "finance").hint("cost"),
            ])
            .unwrap(),
        )
    }

    fn request() -> ValidationRequest {
        ValidationRequest {
            field: FieldDescriptor::new("erp", "invoices", "amount_local"),
            current: MappingCandidate::new(
                "revenue",
                0.55,
                MappingMethod::Heuristic,
                "partial:amount",
            ),
        }
    }

    #[tokio::test]
    async fn parses_verdicts_and_keys_them_by_field() {
        let content = r#"{
            "verdicts": [{
                "source_id": "erp",
                "table_name": "invoices",
                "field_name": "amount_local",
                "concept_id": "cost",
                "confidence": 0.93,
                "rationale": "local-currency invoice amounts are costs here"
            }]
        }"#;
        let provider = Arc::new(CannedProvider::new(content));
        let refiner = LlmValidationRefiner::new(provider.clone(), registry());

        let verdicts = refiner.validate(&[request()]).await.unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(
            verdicts[0].key,
            FieldKey::new("erp", "invoices", "amount_local")
        );
        assert_eq!(verdicts[0].concept_id, "cost");
        assert!(verdicts[0].confidence > 0.0 && verdicts[0].confidence <= 1.0);

        // The prompt carried the concept inventory and the field.
        let sent = provider.requests.lock();
        assert_eq!(sent.len(), 1);
        let user = &sent[0].messages[1].content;
        assert!(user.contains("concept_inventory"));
        assert!(user.contains("amount_local"));
    }

    #[tokio::test]
    async fn tolerates_fenced_json() {
        let content = "```json\n{\"verdicts\": []}\n```";
        let refiner =
            LlmValidationRefiner::new(Arc::new(CannedProvider::new(content)), registry());
        let verdicts = refiner.validate(&[request()]).await.unwrap();
        assert!(verdicts.is_empty());
    }

    #[tokio::test]
    async fn malformed_response_is_a_refiner_error() {
        let refiner = LlmValidationRefiner::new(
            Arc::new(CannedProvider::new("the field is probably revenue")),
            registry(),
        );
        let err = refiner.validate(&[request()]).await.unwrap_err();
        assert!(matches!(err, RefinerError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_request_short_circuits() {
        let provider = Arc::new(CannedProvider::new("{}"));
        let refiner = LlmValidationRefiner::new(provider.clone(), registry());
        let verdicts = refiner.validate(&[]).await.unwrap();
        assert!(verdicts.is_empty());
        assert!(provider.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_calibrated_into_bounds() {
        let content = r#"{
            "verdicts": [{
                "source_id": "erp",
                "table_name": "invoices",
                "field_name": "amount_local",
                "concept_id": "revenue",
                "confidence": 3.5,
                "rationale": ""
            }]
        }"#;
        let refiner =
            LlmValidationRefiner::new(Arc::new(CannedProvider::new(content)), registry());
        let verdicts = refiner.validate(&[request()]).await.unwrap();
        assert!(verdicts[0].confidence <= 1.0);
    }
}
