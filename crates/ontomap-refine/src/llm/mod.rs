//! LLM provider abstraction for validation refinement.
//!
//! The validation refiner talks to a chat-completion provider through the
//! [`LlmProvider`] trait; concrete OpenAI/Anthropic/local clients are
//! feature-gated in [`providers`]. Raw model confidences pass through a
//! bin-based calibrator before they reach the engine, because models are
//! systematically overconfident about schema semantics they have only seen
//! by name.

#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
pub mod providers;

// ============================================================================
// Provider interface
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// When set, the provider is asked for strict JSON output.
    pub json_mode: bool,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub max_tokens: usize,
    pub supports_json_mode: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Chat-completion provider contract.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    fn model_info(&self) -> ModelInfo;
}

// ============================================================================
// Configuration
// ============================================================================

/// Provider configuration, normally loaded from environment variables.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Local,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmConfigError {
    #[error("no LLM provider configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
}

impl LlmConfig {
    /// Resolve provider configuration from the environment, trying OpenAI,
    /// then Anthropic, then a local OpenAI-compatible endpoint.
    pub fn from_env() -> Result<Self, LlmConfigError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAi,
                api_key: key,
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                timeout_secs: 60,
            });
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                api_key: key,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
                base_url: None,
                timeout_secs: 60,
            });
        }
        if let Ok(url) = std::env::var("LOCAL_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                api_key: String::new(),
                model: std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
                base_url: Some(url),
                timeout_secs: 120,
            });
        }
        Err(LlmConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAi,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
        }
    }
}

// ============================================================================
// Confidence calibration
// ============================================================================

/// Bin-based confidence calibrator.
///
/// Raw model confidence lands in one of ten bins; each bin tracks how
/// often its predictions were actually correct, and calibration blends the
/// raw score toward the bin's empirical accuracy as evidence accumulates.
/// The prior assumes overconfidence.
#[derive(Debug, Clone)]
pub struct ConfidenceCalibrator {
    bins: Vec<CalibrationBin>,
}

#[derive(Debug, Clone)]
struct CalibrationBin {
    total: usize,
    correct: usize,
}

impl Default for ConfidenceCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfidenceCalibrator {
    pub fn new() -> Self {
        let bins = (0..10)
            .map(|i| CalibrationBin {
                total: 1, // pseudocount
                correct: usize::from(i >= 5),
            })
            .collect();
        Self { bins }
    }

    fn bin_index(raw: f64) -> usize {
        ((raw.clamp(0.0, 1.0) * 10.0).floor() as usize).min(9)
    }

    /// Record a prediction outcome for future calibration.
    pub fn record(&mut self, raw_confidence: f64, was_correct: bool) {
        let bin = &mut self.bins[Self::bin_index(raw_confidence)];
        bin.total += 1;
        if was_correct {
            bin.correct += 1;
        }
    }

    /// Calibrate a raw confidence score.
    pub fn calibrate(&self, raw_confidence: f64) -> f64 {
        let raw = raw_confidence.clamp(0.0, 1.0);
        let bin = &self.bins[Self::bin_index(raw)];

        let empirical = bin.correct as f64 / bin.total as f64;
        // More observations means more trust in the empirical rate.
        let weight = (bin.total as f64 / 100.0).min(1.0);
        raw * (1.0 - weight) + empirical * weight
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_pulls_down_overconfident_bins() {
        let mut calibrator = ConfidenceCalibrator::new();
        for _ in 0..50 {
            calibrator.record(0.9, true);
            calibrator.record(0.9, false);
        }

        let calibrated = calibrator.calibrate(0.9);
        assert!(calibrated < 0.9);
        assert!(calibrated >= 0.0);
    }

    #[test]
    fn calibration_stays_in_bounds() {
        let calibrator = ConfidenceCalibrator::new();
        for raw in [-2.0, 0.0, 0.33, 0.81, 1.0, 7.5] {
            let calibrated = calibrator.calibrate(raw);
            assert!((0.0..=1.0).contains(&calibrated), "raw {raw} -> {calibrated}");
        }
    }

    #[test]
    fn env_config_is_optional() {
        // Absent env vars: the constructors still work.
        let config = LlmConfig::openai("test-key", "gpt-4o-mini");
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.model, "gpt-4o-mini");
    }
}
