//! Model router: retry + exponential backoff + per-provider circuit
//! breaker wrapped around a registry of [`Provider`] implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::breaker::{BreakerRegistry, BreakerState};
use crate::error::{CoreError, ProviderError};
use crate::types::{PromptRequest, RawModelResponse};

const MAX_ATTEMPTS: u8 = 3;
const BACKOFF_BASE: f64 = 2.0;
const BACKOFF_CAP: f64 = 30.0;

/// Implemented outside the core by concrete HTTP adapters (see
/// `kestrel_core::providers` types wired in by the CLI); consumed here
/// behind a narrow interface so the router never depends on a specific
/// transport.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, request: &PromptRequest) -> Result<RawModelResponse, CoreError>;
    fn estimate_tokens(&self, request: &PromptRequest) -> u32;

    /// `(input_rate, output_rate)` in USD per million tokens for `model`.
    /// Unknown models cost nothing rather than silently billing at a guessed
    /// rate; concrete adapters override this with their real price table.
    fn price_per_million_tokens(&self, _model: &str) -> (f64, f64) {
        (0.0, 0.0)
    }
}

pub struct ModelRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    breakers: BreakerRegistry,
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            breakers: BreakerRegistry::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub async fn call(&self, request: &PromptRequest) -> Result<RawModelResponse, CoreError> {
        let provider = self
            .providers
            .get(&request.provider)
            .ok_or_else(|| CoreError::Provider(ProviderError::UnknownProvider(request.provider.clone())))?;
        let breaker = self.breakers.get(&request.provider);

        let mut last_error: Option<CoreError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if breaker.state() == BreakerState::Open {
                return Err(CoreError::Provider(ProviderError::CircuitBreakerOpen(
                    request.provider.clone(),
                )));
            }

            match provider.call(request).await {
                Ok(response) => {
                    breaker.record_success();
                    return Ok(response);
                }
                Err(err) if matches!(err, CoreError::Validation(_)) => {
                    // ModelOutputValidation: not retryable, breaker still
                    // records the failure since the provider did respond.
                    breaker.record_failure();
                    return Err(err);
                }
                Err(err) if err.is_retryable_provider_error() => {
                    breaker.record_failure();
                    last_error = Some(err);
                    if attempt < MAX_ATTEMPTS {
                        let delay = backoff_delay(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    breaker.record_failure();
                    return Err(err);
                }
            }
        }

        Err(CoreError::Provider(ProviderError::ModelProviderExhausted {
            attempts: MAX_ATTEMPTS,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        }))
    }

    /// `(input_rate, output_rate)` per million tokens, or `(0.0, 0.0)` if the
    /// provider is unregistered.
    pub fn price_per_million_tokens(&self, provider: &str, model: &str) -> (f64, f64) {
        self.providers
            .get(provider)
            .map(|p| p.price_per_million_tokens(model))
            .unwrap_or((0.0, 0.0))
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff_delay(attempt: u8) -> Duration {
    let exp = BACKOFF_BASE * 2f64.powi((attempt - 1) as i32);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let seconds = (exp + jitter).min(BACKOFF_CAP);
    Duration::from_secs_f64(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, RawModelResponse};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        name: String,
        calls: AtomicU32,
        script: Vec<Result<(), ()>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call(&self, _request: &PromptRequest) -> Result<RawModelResponse, CoreError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.script.get(idx) {
                Some(Ok(())) => RawModelResponse::final_answer("done", 1, 1, "h".into())
                    .map_err(Into::into),
                _ => Err(CoreError::Provider(ProviderError::ModelRateLimit)),
            }
        }

        fn estimate_tokens(&self, _request: &PromptRequest) -> u32 {
            10
        }
    }

    fn request() -> PromptRequest {
        PromptRequest {
            session_id: crate::types::SessionId::new(),
            step_number: 1,
            provider: "test".into(),
            model: "m".into(),
            system_prompt: String::new(),
            history: vec![],
            tool_manifests: vec![],
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let mut router = ModelRouter::new();
        router.register(Arc::new(ScriptedProvider {
            name: "test".into(),
            calls: AtomicU32::new(0),
            script: vec![Err(()), Err(()), Ok(())],
        }));
        let response = router.call(&request()).await.unwrap();
        assert_eq!(response.action, Action::FinalAnswer);
    }

    #[tokio::test]
    async fn exhausts_after_three_failures() {
        let mut router = ModelRouter::new();
        router.register(Arc::new(ScriptedProvider {
            name: "test".into(),
            calls: AtomicU32::new(0),
            script: vec![Err(()), Err(()), Err(())],
        }));
        let err = router.call(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Provider(ProviderError::ModelProviderExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let router = ModelRouter::new();
        let mut req = request();
        req.provider = "missing".into();
        let err = router.call(&req).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider(ProviderError::UnknownProvider(_))));
    }
}
