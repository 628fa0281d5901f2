//! Subprocess execution: re-exec the host binary with a hidden dispatch
//! subcommand so a tool always runs in a fresh, minimally privileged child
//! — never via a shell, never via a string-concatenated command line.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, AsyncReadExt};
use tokio::time::timeout;

use crate::error::SandboxError;

/// Hidden subcommand the CLI binary recognizes; never shown in `--help`.
pub const DISPATCH_SUBCOMMAND: &str = "__dispatch-tool";

const MAX_STDERR_BYTES: usize = 500;

#[derive(Debug, Serialize, Deserialize)]
pub struct RunnerEnvelope {
    pub ok: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct SpawnOutcome {
    pub envelope: RunnerEnvelope,
    pub duration: Duration,
}

/// Spawn `dispatcher_exe __dispatch-tool <module_locator>`, write
/// `arguments` as a single JSON line to stdin, wait up to `timeout_seconds`
/// for a single JSON line on stdout.
pub async fn spawn_tool(
    dispatcher_exe: &PathBuf,
    module_locator: &str,
    arguments: &Value,
    max_memory_mb: u32,
    timeout_seconds: u32,
    tool_name: &str,
) -> Result<SpawnOutcome, SandboxError> {
    let started = std::time::Instant::now();

    let mut command = tokio::process::Command::new(dispatcher_exe);
    command
        .arg(DISPATCH_SUBCOMMAND)
        .arg(module_locator)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let mb = max_memory_mb;
        // SAFETY: only async-signal-safe calls (setrlimit) run between
        // fork and exec.
        unsafe {
            command.pre_exec(move || {
                if let Err(err) = super::rlimit::apply_memory_limit(mb) {
                    tracing::warn!(error = %err, "setrlimit(RLIMIT_AS) failed; continuing without memory limit");
                }
                Ok(())
            });
        }
    }

    let mut child = command.spawn().map_err(|e| SandboxError::ToolSandbox {
        tool: tool_name.to_string(),
        detail: format!("failed to spawn sandbox runner: {e}"),
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        let payload = serde_json::to_vec(arguments).unwrap_or_default();
        let _ = stdin.write_all(&payload).await;
        drop(stdin);
    }

    let wait_result = timeout(Duration::from_secs(timeout_seconds as u64), child.wait()).await;

    let status = match wait_result {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            return Err(SandboxError::ToolSandbox {
                tool: tool_name.to_string(),
                detail: format!("failed waiting for sandbox runner: {e}"),
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(SandboxError::ToolTimeout {
                tool: tool_name.to_string(),
                timeout_seconds,
            });
        }
    };

    let mut stdout_buf = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        let _ = stdout.read_to_end(&mut stdout_buf).await;
    }

    if !status.success() {
        let mut stderr_buf = Vec::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_end(&mut stderr_buf).await;
        }
        stderr_buf.truncate(MAX_STDERR_BYTES);
        return Err(SandboxError::ToolSandbox {
            tool: tool_name.to_string(),
            detail: String::from_utf8_lossy(&stderr_buf).into_owned(),
        });
    }

    let last_line = stdout_buf
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or(&[]);

    let envelope: RunnerEnvelope = serde_json::from_slice(last_line).map_err(|e| SandboxError::ToolSandbox {
        tool: tool_name.to_string(),
        detail: format!("malformed runner output: {e}"),
    })?;

    Ok(SpawnOutcome {
        envelope,
        duration: started.elapsed(),
    })
}
