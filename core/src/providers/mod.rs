//! Concrete `Provider` adapters. Optional at compile time and outside the
//! core's correctness boundary — the kernel and router only ever see the
//! narrow [`crate::router::Provider`] trait.

pub mod hosted;
pub mod local;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{Action, Message, Role, ToolCallRequest};

pub(crate) fn raw_response_hash(raw: &Value) -> String {
    let bytes = serde_json::to_vec(raw).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

pub(crate) fn naive_token_estimate(text: &str) -> u32 {
    ((text.len() as f64) / 4.0).ceil() as u32
}

pub(crate) fn render_history(system_prompt: &str, history: &[Message]) -> String {
    let mut out = String::new();
    out.push_str("System: ");
    out.push_str(system_prompt);
    out.push('\n');
    for message in history {
        let role = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        };
        out.push_str(role);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }
    out
}

/// Fallback heuristic for providers that don't emit native structured
/// tool-call output: scan the completion text for the first balanced-brace
/// JSON object shaped `{"tool": "<name>", "arguments": {...}}`.
pub(crate) fn extract_tool_call(text: &str) -> Option<ToolCallRequest> {
    for candidate in balanced_json_objects(text) {
        let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        let Some(name) = value.get("tool").and_then(Value::as_str) else {
            continue;
        };
        let arguments = value.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));
        return Some(ToolCallRequest {
            tool_call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: name.to_string(),
            arguments,
        });
    }
    None
}

fn balanced_json_objects(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let mut depth = 0i32;
            let mut j = i;
            while j < bytes.len() {
                match bytes[j] {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            found.push(text[i..=j].to_string());
                            break;
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
        }
        i += 1;
    }
    found
}

pub(crate) fn classify_action(text: &str) -> (Action, Option<ToolCallRequest>, Option<String>) {
    match extract_tool_call(text) {
        Some(call) => (Action::ToolCall, Some(call), None),
        None => (Action::FinalAnswer, None, Some(text.trim().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_tool_call_skips_a_leading_non_matching_object() {
        let text = r#"here is some context: {"note": "not a tool call"} then {"tool": "read_file", "arguments": {"path": "a.txt"}}"#;
        let call = extract_tool_call(text).unwrap();
        assert_eq!(call.tool_name, "read_file");
        assert_eq!(call.arguments["path"], "a.txt");
    }

    #[test]
    fn extract_tool_call_none_when_nothing_matches() {
        assert!(extract_tool_call(r#"just prose with {"note": "no tool here"}"#).is_none());
    }
}
