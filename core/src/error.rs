//! Error taxonomy for the kernel, sandbox, router, and audit store.
//!
//! Grouped the way the runtime's failure modes are grouped conceptually
//! (validation, security, sandbox, provider, state, limit, storage); the
//! kernel's classification boundary matches on [`CoreError`] directly
//! rather than downcasting through `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("input.{path}: {message}")]
    ToolInput { path: String, message: String },
    #[error("output.{path}: {message}")]
    ToolOutput { path: String, message: String },
    #[error("model output invalid: {0}")]
    ModelOutput(String),
    #[error("manifest invalid: {0}")]
    Manifest(String),
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("path traversal: '{path}' is not under any allowed base")]
    PathTraversal { path: String },
    #[error("permission '{permission}' not granted for tool '{tool}'")]
    PermissionDenied { tool: String, permission: String },
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("prompt injection pattern matched: {0:?}")]
    PromptInjectionWarning(Vec<String>),
    #[error("secret '{0}' not found in environment")]
    SecretNotFound(String),
    #[error("secret '{0}' is invalid (too short)")]
    SecretInvalid(String),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("tool '{tool}' exceeded timeout of {timeout_seconds}s")]
    ToolTimeout { tool: String, timeout_seconds: u32 },
    #[error("tool '{tool}' sandbox failure: {detail}")]
    ToolSandbox { tool: String, detail: String },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider error (status {status_code})")]
    ModelProviderError { status_code: u16 },
    #[error("provider rate limited")]
    ModelRateLimit,
    #[error("provider call timed out")]
    ModelTimeout,
    #[error("provider exhausted after {attempts} attempts: {last_error}")]
    ModelProviderExhausted { attempts: u8, last_error: String },
    #[error("circuit breaker open for provider '{0}'")]
    CircuitBreakerOpen(String),
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("illegal transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: crate::types::SessionStatus,
        to: crate::types::SessionStatus,
    },
}

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("step limit exceeded ({steps} > {max_steps})")]
    StepLimitExceeded { steps: u32, max_steps: u32 },
    #[error("cost budget exceeded (${cost_usd:.4} > ${max_cost_usd:.4})")]
    CostBudgetExceeded { cost_usd: f64, max_cost_usd: f64 },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("audit write failure: {0}")]
    AuditWriteFailure(String),
    #[error("memory corruption detected: {0}")]
    MemoryCorruption(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Top-level error enum the kernel's main loop classifies on. Every
/// subsystem's narrower error type converts into this via `From`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Limit(#[from] LimitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Short error-type name used in `SessionResult` / audit payloads; mirrors
    /// the exception class names the kernel's error classification keys on.
    pub fn type_name(&self) -> &'static str {
        match self {
            CoreError::Validation(ValidationError::ToolInput { .. }) => "ToolInputValidation",
            CoreError::Validation(ValidationError::ToolOutput { .. }) => "ToolOutputValidation",
            CoreError::Validation(ValidationError::ModelOutput(_)) => "ModelOutputValidation",
            CoreError::Validation(ValidationError::Manifest(_)) => "ManifestValidation",
            CoreError::Security(SecurityError::PathTraversal { .. }) => "PathTraversal",
            CoreError::Security(SecurityError::PermissionDenied { .. }) => "PermissionDenied",
            CoreError::Security(SecurityError::UnknownTool(_)) => "UnknownTool",
            CoreError::Security(SecurityError::PromptInjectionWarning(_)) => {
                "PromptInjectionWarning"
            }
            CoreError::Security(SecurityError::SecretNotFound(_)) => "SecretNotFound",
            CoreError::Security(SecurityError::SecretInvalid(_)) => "SecretInvalid",
            CoreError::Sandbox(SandboxError::ToolTimeout { .. }) => "ToolTimeout",
            CoreError::Sandbox(SandboxError::ToolSandbox { .. }) => "ToolSandbox",
            CoreError::Provider(ProviderError::ModelProviderError { .. }) => "ModelProviderError",
            CoreError::Provider(ProviderError::ModelRateLimit) => "ModelRateLimit",
            CoreError::Provider(ProviderError::ModelTimeout) => "ModelTimeout",
            CoreError::Provider(ProviderError::ModelProviderExhausted { .. }) => {
                "ModelProviderExhausted"
            }
            CoreError::Provider(ProviderError::CircuitBreakerOpen(_)) => "CircuitBreakerOpen",
            CoreError::Provider(ProviderError::UnknownProvider(_)) => "UnknownProvider",
            CoreError::State(StateError::InvalidStateTransition { .. }) => {
                "InvalidStateTransition"
            }
            CoreError::Limit(LimitError::StepLimitExceeded { .. }) => "StepLimitExceeded",
            CoreError::Limit(LimitError::CostBudgetExceeded { .. }) => "CostBudgetExceeded",
            CoreError::Storage(StorageError::AuditWriteFailure(_)) => "AuditWriteFailure",
            CoreError::Storage(StorageError::MemoryCorruption(_)) => "MemoryCorruption",
            CoreError::Config(ConfigError::Invalid(_)) => "ConfigError",
        }
    }

    pub fn is_retryable_provider_error(&self) -> bool {
        matches!(
            self,
            CoreError::Provider(
                ProviderError::ModelProviderError { .. }
                    | ProviderError::ModelRateLimit
                    | ProviderError::ModelTimeout
            )
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Storage(StorageError::AuditWriteFailure(_)))
    }
}
