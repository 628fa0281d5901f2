//! Session kernel: the main loop that drives one `SessionRequest` from
//! `IDLE` to a terminal status, per the startup/loop/teardown sequence.
//! One `Kernel` drives one session; it is not reentrant and not shared
//! across tasks.

use std::time::Instant;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::audit::AuditStore;
use crate::error::{CoreError, LimitError, SecurityError, StorageError};
use crate::fsm::SessionFsm;
use crate::registry::ToolRegistry;
use crate::router::ModelRouter;
use crate::sandbox::{self, Sandbox};
use crate::security;
use crate::types::{
    KernelConfig, LogLevel, Message, PromptRequest, SessionRequest, SessionResult, SessionStatus,
    StepStatus, StepTrace, StepType, ToolResult,
};

pub struct Kernel {
    config: KernelConfig,
    registry: ToolRegistry,
    router: ModelRouter,
    sandbox: Sandbox,
    store: AuditStore,
}

impl Kernel {
    pub fn new(config: KernelConfig, registry: ToolRegistry, router: ModelRouter, sandbox: Sandbox, store: AuditStore) -> Self {
        Self {
            config,
            registry,
            router,
            sandbox,
            store,
        }
    }

    pub async fn run(&mut self, request: SessionRequest) -> Result<SessionResult, CoreError> {
        let start = Instant::now();
        let session_id = request.session_id;
        let provider = request.provider_override.clone().unwrap_or_else(|| self.config.primary_provider.clone());
        let model = request.model_override.clone().unwrap_or_else(|| self.config.primary_model.clone());
        let max_steps = request.max_steps_override.unwrap_or(self.config.max_steps);

        let mut fsm = SessionFsm::new();
        let mut total_cost = 0.0f64;
        let mut step_count: u32 = 0;

        // --- startup -------------------------------------------------
        let config_snapshot = serde_json::to_value(&self.config).unwrap_or(Value::Null);
        self.store
            .create_session(session_id, &request.task, &config_snapshot)
            .await?;

        let scan = security::scan_for_injection(&request.task);
        if !scan.clean {
            self.emit(session_id, None, "injection_scan_warn", LogLevel::Warn, json!({
                "matched_patterns": scan.matched_patterns,
            }))
            .await?;
        }

        self.emit(session_id, None, "session_start", LogLevel::Info, json!({
            "task_len": request.task.len(),
            "provider": provider,
            "model": model,
        }))
        .await?;

        fsm.transition(SessionStatus::Running)?;
        self.sync_session(session_id, fsm.state(), step_count, total_cost, None, None, false).await?;

        self.store.append_message(session_id, &Message::user(request.task.clone())).await?;

        // --- main loop -------------------------------------------------
        let outcome = self.main_loop(session_id, &provider, &model, max_steps, &mut fsm, &mut step_count, &mut total_cost).await;

        let (status, answer, error_type, error_message) = match outcome {
            Ok(answer) => (fsm.state(), Some(answer), None, None),
            Err(err) => {
                if matches!(err, CoreError::Storage(StorageError::AuditWriteFailure(_))) {
                    // Fatal: best-effort halt event, then re-raise.
                    let _ = fsm.transition(SessionStatus::Failed);
                    let _ = self
                        .emit(session_id, None, "audit_write_failure_halt", LogLevel::Critical, json!({
                            "error": err.to_string(),
                        }))
                        .await;
                    return Err(err);
                }
                self.classify_and_fail(session_id, &mut fsm, &err).await?;
                (fsm.state(), None, Some(err.type_name().to_string()), Some(sanitized_message(&err)))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        self.emit(session_id, None, "session_end", LogLevel::Info, json!({
            "status": format!("{status:?}"),
            "steps_taken": step_count,
            "cost_usd": round2(total_cost),
            "duration_ms": duration_ms,
        }))
        .await?;

        self.sync_session(session_id, status, step_count, total_cost, error_type.as_deref(), error_message.as_deref(), true).await?;

        Ok(SessionResult {
            session_id,
            status,
            answer,
            steps_taken: step_count,
            cost_usd: total_cost,
            duration_ms,
            error_type,
            error_message,
        })
    }

    async fn main_loop(
        &mut self,
        session_id: crate::types::SessionId,
        provider: &str,
        model: &str,
        max_steps: u32,
        fsm: &mut SessionFsm,
        step_count: &mut u32,
        total_cost: &mut f64,
    ) -> Result<String, CoreError> {
        loop {
            *step_count += 1;
            if *step_count > max_steps {
                return Err(CoreError::Limit(LimitError::StepLimitExceeded {
                    steps: *step_count,
                    max_steps,
                }));
            }
            if *total_cost > self.config.max_cost_usd {
                return Err(CoreError::Limit(LimitError::CostBudgetExceeded {
                    cost_usd: *total_cost,
                    max_cost_usd: self.config.max_cost_usd,
                }));
            }

            let history = self.store.get_conversation_history(session_id).await?;
            let tool_manifests = self.registry.all_manifests().into_iter().cloned().collect::<Vec<_>>();
            let prompt_hash = hash_history(&history);

            let mut trace = StepTrace::start(session_id, *step_count, StepType::ModelCall);
            trace.prompt_hash = Some(prompt_hash.clone());
            self.store.write_step_start(&trace).await?;

            let request = PromptRequest {
                session_id,
                step_number: *step_count,
                provider: provider.to_string(),
                model: model.to_string(),
                system_prompt: default_system_prompt(),
                history: history.clone(),
                tool_manifests,
            };

            let call_start = Instant::now();
            let response = self.router.call(&request).await;
            let call_duration = call_start.elapsed();

            let response = match response {
                Ok(r) => r,
                Err(err) => {
                    trace.finish(StepStatus::Failed);
                    self.store.write_step_end(&trace).await?;
                    return Err(err);
                }
            };

            let (input_rate, output_rate) = self.router.price_per_million_tokens(provider, model);
            let step_cost = (response.input_tokens as f64 * input_rate + response.output_tokens as f64 * output_rate) / 1_000_000.0;
            *total_cost += step_cost;

            trace.input_tokens = response.input_tokens;
            trace.output_tokens = response.output_tokens;
            trace.cost_usd = step_cost;
            trace.model_output_hash = Some(response.raw_response_hash.clone());
            trace.duration_ms = call_duration.as_millis() as u64;

            match response.action {
                crate::types::Action::FinalAnswer => {
                    let answer = response.final_answer.clone().unwrap_or_default();
                    trace.step_type = StepType::FinalAnswer;
                    trace.finish(StepStatus::Completed);
                    self.store.write_step_end(&trace).await?;
                    self.store.append_message(session_id, &Message::assistant(answer.clone())).await?;
                    fsm.transition(SessionStatus::Done)?;
                    return Ok(answer);
                }
                crate::types::Action::ToolCall => {
                    let call = response.tool_call.clone().expect("tool_call action always carries a request");

                    if !self.registry.has_tool(&call.tool_name) {
                        trace.finish(StepStatus::Failed);
                        self.store.write_step_end(&trace).await?;
                        return Err(CoreError::Security(SecurityError::UnknownTool(call.tool_name.clone())));
                    }
                    if let Err(e) = self.registry.check_permission(&call.tool_name, &self.config) {
                        trace.finish(StepStatus::Failed);
                        self.store.write_step_end(&trace).await?;
                        return Err(e.into());
                    }

                    trace.tool_name = Some(call.tool_name.clone());
                    trace.tool_input_json = Some(call.arguments.clone());
                    trace.finish(StepStatus::Completed);
                    self.store.write_step_end(&trace).await?;

                    let sentinel = Message {
                        role: crate::types::Role::Assistant,
                        content: format!("[calling tool '{}']", call.tool_name),
                        tool_name: Some(call.tool_name.clone()),
                        tool_call_id: Some(call.tool_call_id.clone()),
                    };
                    self.store.append_message(session_id, &sentinel).await?;

                    fsm.transition(SessionStatus::Waiting)?;
                    self.sync_session(session_id, fsm.state(), *step_count, *total_cost, None, None, false).await?;

                    self.emit(session_id, Some(trace.step_id), "tool_call_start", LogLevel::Info, json!({
                        "tool_name": call.tool_name,
                        "tool_call_id": call.tool_call_id,
                    }))
                    .await?;

                    let manifest = self.registry.get_manifest(&call.tool_name)?.clone();
                    let module_path = self.registry.get_module_path(&call.tool_name)?.to_string();
                    let tool_result = self
                        .sandbox
                        .run_tool(&manifest, &call.tool_call_id, call.arguments.clone(), &module_path)
                        .await?;

                    fsm.transition(SessionStatus::Running)?;
                    self.sync_session(session_id, fsm.state(), *step_count, *total_cost, None, None, false).await?;

                    self.emit_tool_end(session_id, trace.step_id, &tool_result).await?;

                    let tool_message = match &tool_result {
                        ToolResult { ok: true, data: Some(data), .. } => Message::tool(
                            serde_json::to_string(data).unwrap_or_default(),
                            tool_result.tool_name.clone(),
                            tool_result.tool_call_id.clone(),
                        ),
                        ToolResult { ok: false, error_message, .. } => Message::tool(
                            format!("ERROR: {}", error_message.clone().unwrap_or_default()),
                            tool_result.tool_name.clone(),
                            tool_result.tool_call_id.clone(),
                        ),
                        _ => Message::tool("ERROR: malformed tool result".to_string(), tool_result.tool_name.clone(), tool_result.tool_call_id.clone()),
                    };
                    self.store.append_message(session_id, &tool_message).await?;
                }
            }
        }
    }

    async fn classify_and_fail(&mut self, session_id: crate::types::SessionId, fsm: &mut SessionFsm, err: &CoreError) -> Result<(), CoreError> {
        let (event_type, level, payload) = match err {
            CoreError::Limit(_) => ("limit_exceeded", LogLevel::Error, json!({"error": err.to_string()})),
            CoreError::Security(_) => ("security_error", LogLevel::Error, json!({"error": err.to_string()})),
            CoreError::Provider(crate::error::ProviderError::ModelProviderExhausted { .. })
            | CoreError::Provider(crate::error::ProviderError::CircuitBreakerOpen(_)) => {
                ("provider_failure", LogLevel::Error, json!({"error": err.to_string()}))
            }
            _ => ("unexpected_error", LogLevel::Error, json!({"error": err.to_string(), "type": err.type_name()})),
        };
        self.emit(session_id, None, event_type, level, payload).await?;
        if !fsm.state().is_terminal() {
            fsm.transition(SessionStatus::Failed)?;
        }
        Ok(())
    }

    async fn emit(&mut self, session_id: crate::types::SessionId, step_id: Option<crate::types::StepId>, event_type: &str, level: LogLevel, payload: Value) -> Result<(), CoreError> {
        self.store.write_event(session_id, step_id, event_type, level, payload).await?;
        Ok(())
    }

    async fn emit_tool_end(&mut self, session_id: crate::types::SessionId, step_id: crate::types::StepId, result: &ToolResult) -> Result<(), CoreError> {
        if result.ok {
            self.emit(session_id, Some(step_id), "tool_call_end", LogLevel::Info, json!({
                "tool_name": result.tool_name,
                "duration_ms": result.duration_ms,
            }))
            .await
        } else {
            self.emit(session_id, Some(step_id), "tool_call_failed", LogLevel::Warn, json!({
                "tool_name": result.tool_name,
                "error_type": result.error_type,
                "error_message": result.error_message,
            }))
            .await
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_session(
        &mut self,
        session_id: crate::types::SessionId,
        status: SessionStatus,
        step_count: u32,
        total_cost: f64,
        error_type: Option<&str>,
        error_message: Option<&str>,
        finished: bool,
    ) -> Result<(), CoreError> {
        self.store
            .update_session_status(session_id, status, step_count, total_cost, error_type, error_message, finished)
            .await?;
        Ok(())
    }

    pub async fn close(self) -> Result<(), CoreError> {
        self.store.close().await?;
        Ok(())
    }
}

fn hash_history(history: &[Message]) -> String {
    let canonical = serde_json::to_vec(history).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

fn default_system_prompt() -> String {
    "You are a local-first autonomous agent. Use the provided tools when needed, otherwise respond with a final answer.".to_string()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn sanitized_message(err: &CoreError) -> String {
    if matches!(
        err,
        CoreError::Limit(_) | CoreError::Security(_) | CoreError::Provider(_) | CoreError::State(_)
    ) {
        err.to_string()
    } else {
        format!("Unexpected error ({}). Check audit log.", err.type_name())
    }
}
