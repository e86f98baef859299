//! Concrete LLM API clients (feature-gated).
//!
//! Each client speaks its provider's chat-completion wire format through
//! `reqwest`; the validation layer only sees [`LlmProvider`].

use super::*;
use reqwest::Client;
use std::time::Duration;

fn http_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Network(e.to_string()))
}

// ============================================================================
// OpenAI (and OpenAI-compatible) chat completions
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
}

#[cfg(feature = "openai")]
impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "openai")]
#[async_trait::async_trait]
impl LlmProvider for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
        );

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 128_000,
            supports_json_mode: true,
        }
    }
}

// ============================================================================
// Anthropic messages API
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    client: Client,
    config: LlmConfig,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "anthropic")]
#[async_trait::async_trait]
impl LlmProvider for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = "https://api.anthropic.com/v1/messages";

        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::User | Role::System => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if response.status() == 429 {
            return Err(LlmError::RateLimited {
                retry_after_ms: 60_000,
            });
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = data["content"][0]["text"].as_str().unwrap_or("").to_string();

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
            prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 200_000,
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Local OpenAI-compatible endpoint (Ollama, vLLM)
// ============================================================================

#[cfg(feature = "local")]
pub struct LocalClient {
    client: Client,
    config: LlmConfig,
}

#[cfg(feature = "local")]
impl LocalClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "local")]
#[async_trait::async_trait]
impl LlmProvider for LocalClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| LlmError::Api("no base URL configured".to_string()))?;
        let url = format!("{base_url}/v1/chat/completions");

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 32_000,
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Unified dispatch
// ============================================================================

/// Dispatches to whichever provider the configuration names.
pub enum UnifiedClient {
    #[cfg(feature = "openai")]
    OpenAi(OpenAiClient),
    #[cfg(feature = "anthropic")]
    Anthropic(AnthropicClient),
    #[cfg(feature = "local")]
    Local(LocalClient),
}

impl UnifiedClient {
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        match config.provider {
            #[cfg(feature = "openai")]
            Provider::OpenAi => Ok(Self::OpenAi(OpenAiClient::new(config)?)),
            #[cfg(feature = "anthropic")]
            Provider::Anthropic => Ok(Self::Anthropic(AnthropicClient::new(config)?)),
            #[cfg(feature = "local")]
            Provider::Local => Ok(Self::Local(LocalClient::new(config)?)),
            #[allow(unreachable_patterns)]
            other => Err(LlmError::Api(format!(
                "provider {other:?} not compiled in; enable the matching cargo feature"
            ))),
        }
    }

    pub fn from_env() -> Result<Self, LlmError> {
        let config = LlmConfig::from_env().map_err(|e| LlmError::Api(e.to_string()))?;
        Self::from_config(config)
    }
}

#[async_trait::async_trait]
impl LlmProvider for UnifiedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self {
            #[cfg(feature = "openai")]
            Self::OpenAi(client) => client.complete(request).await,
            #[cfg(feature = "anthropic")]
            Self::Anthropic(client) => client.complete(request).await,
            #[cfg(feature = "local")]
            Self::Local(client) => client.complete(request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        match self {
            #[cfg(feature = "openai")]
            Self::OpenAi(client) => client.model_info(),
            #[cfg(feature = "anthropic")]
            Self::Anthropic(client) => client.model_info(),
            #[cfg(feature = "local")]
            Self::Local(client) => client.model_info(),
        }
    }
}
