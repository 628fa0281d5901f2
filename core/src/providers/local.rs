//! HTTP adapter for a local, on-device model server, grounded in the
//! reference's Ollama adapter. Supports air-gapped deployments: no API key,
//! a plain-text completion endpoint, and zero cost per token. Since the
//! underlying model rarely emits native structured tool calls, responses
//! are always run through the embedded-JSON fallback heuristic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ProviderError, ValidationError};
use crate::router::Provider;
use crate::types::{PromptRequest, RawModelResponse};

use super::{naive_token_estimate, raw_response_hash, render_history};

pub struct LocalProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct LocalRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct LocalResponse {
    response: String,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    prompt_eval_count: u32,
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimate_tokens(&self, request: &PromptRequest) -> u32 {
        naive_token_estimate(&render_history(&request.system_prompt, &request.history))
    }

    async fn call(&self, request: &PromptRequest) -> Result<RawModelResponse, CoreError> {
        let prompt = render_history(&request.system_prompt, &request.history);
        let body = LocalRequest {
            model: request.model.clone(),
            prompt,
            stream: false,
        };

        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|_| CoreError::Provider(ProviderError::ModelTimeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Provider(match status.as_u16() {
                429 => ProviderError::ModelRateLimit,
                408 | 504 => ProviderError::ModelTimeout,
                other => ProviderError::ModelProviderError { status_code: other },
            }));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::Validation(ValidationError::ModelOutput(format!("malformed response body: {e}"))))?;

        let parsed: LocalResponse = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::Validation(ValidationError::ModelOutput(format!("unexpected response shape: {e}"))))?;

        let (action, tool_call, final_answer) = super::classify_action(&parsed.response);
        let hash = raw_response_hash(&raw);

        match action {
            crate::types::Action::ToolCall => Ok(RawModelResponse::tool_call(
                tool_call.expect("classify_action only returns ToolCall with a request"),
                parsed.prompt_eval_count,
                parsed.eval_count,
                hash,
            )),
            crate::types::Action::FinalAnswer => {
                RawModelResponse::final_answer(final_answer.unwrap_or_default(), parsed.prompt_eval_count, parsed.eval_count, hash)
                    .map_err(Into::into)
            }
        }
    }

    fn price_per_million_tokens(&self, _model: &str) -> (f64, f64) {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::extract_tool_call;

    #[test]
    fn extracts_embedded_tool_call_from_surrounding_prose() {
        let text = r#"Let me check that file. {"tool": "read_file", "arguments": {"path": "/tmp/x"}} One moment."#;
        let call = extract_tool_call(text).unwrap();
        assert_eq!(call.tool_name, "read_file");
        assert_eq!(call.arguments["path"], "/tmp/x");
    }

    #[test]
    fn plain_prose_has_no_tool_call() {
        assert!(extract_tool_call("The answer is 42.").is_none());
    }
}
