//! HTTP adapter for a hosted model provider, grounded in the reference's
//! Anthropic adapter: a `messages`-shaped request/response pair over
//! `reqwest`, with HTTP-status-to-error-kind mapping and a per-model price
//! table feeding the kernel's cost accounting.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ProviderError, ValidationError};
use crate::router::Provider;
use crate::types::{PromptRequest, RawModelResponse};

use super::{naive_token_estimate, raw_response_hash, render_history};

pub struct HostedProvider {
    name: String,
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    price_table: HashMap<String, (f64, f64)>,
}

impl HostedProvider {
    pub fn new(name: impl Into<String>, api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into(),
            price_table: default_price_table(),
        }
    }

    pub fn with_price_table(mut self, table: HashMap<String, (f64, f64)>) -> Self {
        self.price_table = table;
        self
    }
}

fn default_price_table() -> HashMap<String, (f64, f64)> {
    // USD per million tokens, (input, output). Illustrative only.
    HashMap::from([
        ("claude-sonnet".to_string(), (3.0, 15.0)),
        ("claude-haiku".to_string(), (0.8, 4.0)),
    ])
}

#[derive(Serialize)]
struct HostedRequest {
    model: String,
    system: String,
    messages: Vec<HostedMessage>,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct HostedMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct HostedResponse {
    content: Vec<HostedContent>,
    usage: HostedUsage,
}

#[derive(Deserialize)]
struct HostedContent {
    text: String,
}

#[derive(Deserialize)]
struct HostedUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl Provider for HostedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimate_tokens(&self, request: &PromptRequest) -> u32 {
        naive_token_estimate(&render_history(&request.system_prompt, &request.history))
    }

    fn price_per_million_tokens(&self, model: &str) -> (f64, f64) {
        self.price_table.get(model).copied().unwrap_or((0.0, 0.0))
    }

    async fn call(&self, request: &PromptRequest) -> Result<RawModelResponse, CoreError> {
        let body = HostedRequest {
            model: request.model.clone(),
            system: request.system_prompt.clone(),
            messages: request
                .history
                .iter()
                .map(|m| HostedMessage {
                    role: match m.role {
                        crate::types::Role::Assistant => "assistant".to_string(),
                        _ => "user".to_string(),
                    },
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: 4096,
        };

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|_| CoreError::Provider(ProviderError::ModelTimeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Provider(map_status(status.as_u16())));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::Validation(ValidationError::ModelOutput(format!("malformed response body: {e}"))))?;

        let parsed: HostedResponse = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::Validation(ValidationError::ModelOutput(format!("unexpected response shape: {e}"))))?;

        let text = parsed.content.first().map(|c| c.text.clone()).unwrap_or_default();
        let (action, tool_call, final_answer) = super::classify_action(&text);
        let hash = raw_response_hash(&raw);

        match action {
            crate::types::Action::ToolCall => Ok(RawModelResponse::tool_call(
                tool_call.expect("classify_action only returns ToolCall with a request"),
                parsed.usage.input_tokens,
                parsed.usage.output_tokens,
                hash,
            )),
            crate::types::Action::FinalAnswer => {
                RawModelResponse::final_answer(final_answer.unwrap_or_default(), parsed.usage.input_tokens, parsed.usage.output_tokens, hash)
                    .map_err(Into::into)
            }
        }
    }
}

fn map_status(status: u16) -> ProviderError {
    match status {
        401 | 403 => ProviderError::ModelProviderError { status_code: status },
        429 => ProviderError::ModelRateLimit,
        408 | 504 => ProviderError::ModelTimeout,
        other => ProviderError::ModelProviderError { status_code: other },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_prices_at_zero() {
        let provider = HostedProvider::new("anthropic", "key".to_string(), "https://example.invalid");
        assert_eq!(provider.price_per_million_tokens("nonexistent-model"), (0.0, 0.0));
    }

    #[test]
    fn known_model_has_nonzero_price() {
        let provider = HostedProvider::new("anthropic", "key".to_string(), "https://example.invalid");
        let (input, output) = provider.price_per_million_tokens("claude-sonnet");
        assert!(input > 0.0 && output > 0.0);
    }

    #[test]
    fn status_mapping_matches_spec() {
        assert!(matches!(map_status(401), ProviderError::ModelProviderError { status_code: 401 }));
        assert!(matches!(map_status(429), ProviderError::ModelRateLimit));
        assert!(matches!(map_status(504), ProviderError::ModelTimeout));
    }
}
