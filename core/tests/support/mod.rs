//! Shared integration-test fixtures: a scriptable `Provider`, and builders
//! for a temp-backed `KernelConfig` wired to the test dispatch harness.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kestrel_core::error::{CoreError, ProviderError};
use kestrel_core::router::Provider;
use kestrel_core::types::{KernelConfig, Permission, PromptRequest, RawModelResponse, ToolCallRequest};

/// One scripted response per call, consumed in order. Calling past the end
/// of the script repeats the last entry.
pub enum ScriptedCall {
    FinalAnswer(&'static str),
    ToolCall { tool_name: &'static str, arguments: serde_json::Value },
    Error(ProviderError),
}

pub struct MockProvider {
    name: String,
    script: Vec<ScriptedCall>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, script: Vec<ScriptedCall>) -> Self {
        Self {
            name: name.into(),
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _request: &PromptRequest) -> Result<RawModelResponse, CoreError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = self.script.get(idx).or_else(|| self.script.last()).expect("script must not be empty");
        match entry {
            ScriptedCall::FinalAnswer(text) => {
                RawModelResponse::final_answer(*text, 10, 10, format!("hash-{idx}")).map_err(Into::into)
            }
            ScriptedCall::ToolCall { tool_name, arguments } => Ok(RawModelResponse::tool_call(
                ToolCallRequest {
                    tool_call_id: format!("call-{idx}"),
                    tool_name: tool_name.to_string(),
                    arguments: arguments.clone(),
                },
                10,
                10,
                format!("hash-{idx}"),
            )),
            ScriptedCall::Error(e) => Err(CoreError::Provider(clone_provider_error(e))),
        }
    }

    fn estimate_tokens(&self, _request: &PromptRequest) -> u32 {
        10
    }
}

fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ModelProviderError { status_code } => ProviderError::ModelProviderError { status_code: *status_code },
        ProviderError::ModelRateLimit => ProviderError::ModelRateLimit,
        ProviderError::ModelTimeout => ProviderError::ModelTimeout,
        ProviderError::ModelProviderExhausted { attempts, last_error } => {
            ProviderError::ModelProviderExhausted { attempts: *attempts, last_error: last_error.clone() }
        }
        ProviderError::CircuitBreakerOpen(p) => ProviderError::CircuitBreakerOpen(p.clone()),
        ProviderError::UnknownProvider(p) => ProviderError::UnknownProvider(p.clone()),
    }
}

/// A `KernelConfig` rooted at a fresh temp dir, with the test dispatch
/// harness as its sandbox binary and a fresh sqlite file per call.
pub fn test_config(tmp_dir: &std::path::Path) -> KernelConfig {
    let mut config = KernelConfig::default();
    config.primary_provider = "mock".to_string();
    config.primary_model = "mock-model".to_string();
    config.max_steps = 20;
    config.max_cost_usd = 1.0;
    config.allowed_permissions = BTreeSet::from([Permission::FsRead, Permission::FsWrite]);
    config.allowed_paths = vec![tmp_dir.to_path_buf()];
    config.db_path = tmp_dir.join("kestrel.db");
    config.log_path = tmp_dir.join("kestrel.jsonl");
    config
}

pub fn dispatch_harness_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dispatch-harness"))
}
