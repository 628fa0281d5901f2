//! Tool sandbox: the five-step validate/spawn/parse pipeline of
//! `run_tool`, plus the dispatch-side entry point the re-exec'd child runs.

pub mod exec;
pub mod path;
pub mod rlimit;
pub mod schema;

use std::io::{Read, Write};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::{CoreError, SandboxError};
use crate::types::ToolManifest;
use crate::types::ToolResult;

pub struct Sandbox {
    dispatcher_exe: PathBuf,
}

impl Sandbox {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dispatcher_exe: std::env::current_exe()?,
        })
    }

    pub fn with_dispatcher(dispatcher_exe: PathBuf) -> Self {
        Self { dispatcher_exe }
    }

    /// `run_tool(manifest, arguments, module_locator) -> ToolResult`. Each
    /// step below is numbered to match the execution order it must follow.
    pub async fn run_tool(
        &self,
        manifest: &ToolManifest,
        tool_call_id: &str,
        arguments: Value,
        module_locator: &str,
    ) -> Result<ToolResult, CoreError> {
        // 1. Input schema validation.
        schema::validate_input(&manifest.input_schema, &arguments)?;

        // 2. Path validation.
        path::validate_paths(&arguments, &manifest.allowed_paths)?;

        // 3. Subprocess execution.
        let outcome = exec::spawn_tool(
            &self.dispatcher_exe,
            module_locator,
            &arguments,
            manifest.max_memory_mb,
            manifest.timeout_seconds,
            &manifest.name,
        )
        .await?;

        // 4. Output parse / ok=false short-circuit.
        if !outcome.envelope.ok {
            return Ok(ToolResult::failure(
                &manifest.name,
                tool_call_id,
                "ToolExecutionError",
                outcome.envelope.error.unwrap_or_default(),
                outcome.duration.as_millis() as u64,
            ));
        }

        let data = outcome.envelope.data.unwrap_or(Value::Null);

        // 5. Output schema validation.
        schema::validate_output(&manifest.output_schema, &data)?;

        Ok(ToolResult::success(
            &manifest.name,
            tool_call_id,
            data,
            outcome.duration.as_millis() as u64,
        ))
    }
}

/// Entry point for the hidden `__dispatch-tool` subcommand: reads a JSON
/// value from stdin, runs the tool named by `module_locator`, and always
/// writes exactly one JSON line to stdout before exiting 0 — even when the
/// tool panics.
pub fn dispatch_main(module_locator: &str) -> ! {
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        print_envelope_and_exit(false, None, Some("failed to read arguments from stdin".to_string()));
    }
    let arguments: Value = match serde_json::from_str(&input) {
        Ok(v) => v,
        Err(e) => print_envelope_and_exit(false, None, Some(format!("malformed arguments json: {e}"))),
    };

    let locator = module_locator.to_string();
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| crate::tools::execute_locator(&locator, arguments)));

    match result {
        Ok(Ok(data)) => print_envelope_and_exit(true, Some(data), None),
        Ok(Err(message)) => print_envelope_and_exit(false, None, Some(message)),
        Err(_) => print_envelope_and_exit(false, None, Some("tool panicked".to_string())),
    }
}

fn print_envelope_and_exit(ok: bool, data: Option<Value>, error: Option<String>) -> ! {
    let envelope = exec::RunnerEnvelope { ok, data, error };
    let line = serde_json::to_string(&envelope).unwrap_or_else(|_| {
        r#"{"ok":false,"data":null,"error":"failed to serialize runner envelope"}"#.to_string()
    });
    let _ = writeln!(std::io::stdout(), "{line}");
    std::process::exit(0);
}
