//! Shared value objects. Everything here is a plain immutable struct except
//! [`StepTrace`], which is mutated in place by the kernel until it is handed
//! to the audit store for a single, final write.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_string(s: &str) -> Result<Self, ValidationError> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ValidationError::Manifest(format!("invalid {}: {e}", stringify!($name))))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(SessionId);
uuid_id!(StepId);
uuid_id!(EventId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    None,
    FsRead,
    FsWrite,
    Network,
    Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Idle,
    Running,
    Waiting,
    Done,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    ModelCall,
    ToolCall,
    FinalAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

/// Wire value is the literal uppercase tag, e.g. `"WARN"` not `"WARNING"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ToolCall,
    FinalAnswer,
}

/// Created at process start from layered config (see [`crate::config`]);
/// never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    pub primary_provider: String,
    pub primary_model: String,
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
    pub max_steps: u32,
    pub max_cost_usd: f64,
    pub allowed_permissions: BTreeSet<Permission>,
    /// Filesystem roots every `fs_read`/`fs_write` tool manifest is confined
    /// to, overriding whatever `allowed_paths` the tool itself declares.
    /// Empty means unrestricted (the empty-is-skip semantics of
    /// [`crate::sandbox::path::validate_paths`] apply uniformly).
    pub allowed_paths: Vec<PathBuf>,
    pub extra_plugin_dirs: Vec<PathBuf>,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_steps == 0 {
            return Err(ValidationError::Manifest(
                "max_steps must be positive".into(),
            ));
        }
        if self.max_cost_usd < 0.0 {
            return Err(ValidationError::Manifest(
                "max_cost_usd must be non-negative".into(),
            ));
        }
        if self.primary_provider.trim().is_empty() {
            return Err(ValidationError::Manifest(
                "primary_provider must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            primary_provider: "ollama".to_string(),
            primary_model: "llama3".to_string(),
            fallback_provider: None,
            fallback_model: None,
            max_steps: 20,
            max_cost_usd: 1.0,
            allowed_permissions: BTreeSet::from([Permission::FsRead, Permission::FsWrite]),
            allowed_paths: Vec::new(),
            extra_plugin_dirs: Vec::new(),
            db_path: home.join(".kestrel/kestrel.db"),
            log_path: home.join(".kestrel/logs/kestrel.jsonl"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub session_id: SessionId,
    pub task: String,
    pub provider_override: Option<String>,
    pub model_override: Option<String>,
    pub max_steps_override: Option<u32>,
}

impl SessionRequest {
    pub fn new(task: impl Into<String>) -> Result<Self, ValidationError> {
        let task = task.into();
        Self::validate_task(&task)?;
        Ok(Self {
            session_id: SessionId::new(),
            task,
            provider_override: None,
            model_override: None,
            max_steps_override: None,
        })
    }

    fn validate_task(task: &str) -> Result<(), ValidationError> {
        if task.trim().is_empty() {
            return Err(ValidationError::Manifest("task must not be blank".into()));
        }
        if task.len() > 4096 {
            return Err(ValidationError::Manifest(
                "task must be at most 4096 characters".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(tool_name.into()),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{1,63}$").unwrap());
static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub permissions: BTreeSet<Permission>,
    pub timeout_seconds: u32,
    pub max_memory_mb: u32,
    pub input_schema: Value,
    pub output_schema: Value,
    pub allowed_paths: Vec<PathBuf>,
}

impl ToolManifest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        permissions: BTreeSet<Permission>,
        timeout_seconds: u32,
        max_memory_mb: u32,
        input_schema: Value,
        output_schema: Value,
        allowed_paths: Vec<PathBuf>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let version = version.into();
        let description = description.into();

        if !NAME_RE.is_match(&name) {
            return Err(ValidationError::Manifest(format!(
                "tool name '{name}' must match ^[a-z][a-z0-9_]{{1,63}}$"
            )));
        }
        if !VERSION_RE.is_match(&version) {
            return Err(ValidationError::Manifest(format!(
                "tool version '{version}' must match ^\\d+\\.\\d+\\.\\d+$"
            )));
        }
        if description.len() < 10 {
            return Err(ValidationError::Manifest(
                "description must be at least 10 characters".into(),
            ));
        }
        if !(1..=300).contains(&timeout_seconds) {
            return Err(ValidationError::Manifest(
                "timeout_seconds must be in [1, 300]".into(),
            ));
        }
        if !(32..=2048).contains(&max_memory_mb) {
            return Err(ValidationError::Manifest(
                "max_memory_mb must be in [32, 2048]".into(),
            ));
        }
        for p in &allowed_paths {
            if !p.is_absolute() {
                return Err(ValidationError::Manifest(format!(
                    "allowed_paths entry '{}' must be absolute",
                    p.display()
                )));
            }
        }

        Ok(Self {
            name,
            version,
            description,
            permissions,
            timeout_seconds,
            max_memory_mb,
            input_schema,
            output_schema,
            allowed_paths,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub tool_name: String,
    pub tool_call_id: String,
    pub data: Option<Value>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, tool_call_id: impl Into<String>, data: Value, duration_ms: u64) -> Self {
        Self {
            ok: true,
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            data: Some(data),
            error_type: None,
            error_message: None,
            duration_ms,
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        error_type: impl Into<String>,
        error_message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            ok: false,
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            data: None,
            error_type: Some(error_type.into()),
            error_message: Some(error_message.into()),
            duration_ms,
        }
    }
}

/// Mutated in place by the kernel over the life of one step, then handed by
/// value to the audit store for a single `write_step_end` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step_id: StepId,
    pub session_id: SessionId,
    pub step_number: u32,
    pub step_type: StepType,
    pub status: StepStatus,
    pub prompt_hash: Option<String>,
    pub model_output_hash: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input_json: Option<Value>,
    pub tool_output_json: Option<Value>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub audit_chain_hash: Option<String>,
}

impl StepTrace {
    pub fn start(session_id: SessionId, step_number: u32, step_type: StepType) -> Self {
        Self {
            step_id: StepId::new(),
            session_id,
            step_number,
            step_type,
            status: StepStatus::Started,
            prompt_hash: None,
            model_output_hash: None,
            tool_name: None,
            tool_input_json: None,
            tool_output_json: None,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            started_at: Utc::now(),
            finished_at: None,
            audit_chain_hash: None,
        }
    }

    pub fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.duration_ms = (self.finished_at.unwrap() - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: EventId,
    pub session_id: SessionId,
    pub step_id: Option<StepId>,
    pub event_type: String,
    pub level: LogLevel,
    pub payload: Value,
    pub chain_hash: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub task: String,
    pub status: SessionStatus,
    pub config_snapshot: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_steps: u32,
    pub total_cost_usd: f64,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub session_id: SessionId,
    pub step_number: u32,
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub tool_manifests: Vec<ToolManifest>,
}

#[derive(Debug, Clone)]
pub struct RawModelResponse {
    pub action: Action,
    pub tool_call: Option<ToolCallRequest>,
    pub final_answer: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub raw_response_hash: String,
}

impl RawModelResponse {
    pub fn tool_call(
        call: ToolCallRequest,
        input_tokens: u32,
        output_tokens: u32,
        raw_response_hash: String,
    ) -> Self {
        Self {
            action: Action::ToolCall,
            tool_call: Some(call),
            final_answer: None,
            input_tokens,
            output_tokens,
            raw_response_hash,
        }
    }

    pub fn final_answer(
        text: impl Into<String>,
        input_tokens: u32,
        output_tokens: u32,
        raw_response_hash: String,
    ) -> Result<Self, ValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::ModelOutput(
                "final_answer text must not be blank".into(),
            ));
        }
        Ok(Self {
            action: Action::FinalAnswer,
            tool_call: None,
            final_answer: Some(text),
            input_tokens,
            output_tokens,
            raw_response_hash,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub answer: Option<String>,
    pub steps_taken: u32,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_rejects_bad_name() {
        let result = ToolManifest::new(
            "Bad-Name",
            "1.0.0",
            "a valid description",
            BTreeSet::new(),
            30,
            64,
            Value::Null,
            Value::Null,
            vec![],
        );
        assert!(result.is_err());
    }

    #[test]
    fn manifest_rejects_relative_allowed_path() {
        let result = ToolManifest::new(
            "read_file",
            "1.0.0",
            "reads a file from disk",
            BTreeSet::new(),
            30,
            64,
            Value::Null,
            Value::Null,
            vec![PathBuf::from("relative/path")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn manifest_accepts_valid_input() {
        let result = ToolManifest::new(
            "read_file",
            "1.0.0",
            "reads a file from disk",
            BTreeSet::from([Permission::FsRead]),
            30,
            64,
            Value::Null,
            Value::Null,
            vec![PathBuf::from("/tmp")],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn session_request_rejects_blank_task() {
        assert!(SessionRequest::new("   ").is_err());
    }

    #[test]
    fn raw_model_response_rejects_blank_final_answer() {
        assert!(RawModelResponse::final_answer("  ", 1, 1, "h".into()).is_err());
    }
}
