//! §8 scenario 2: a tool call that actually spawns the sandboxed
//! subprocess via the compiled dispatch harness, followed by a final
//! answer referencing the tool's output.

mod support;

use std::sync::Arc;

use kestrel_core::audit::AuditStore;
use kestrel_core::kernel::Kernel;
use kestrel_core::registry::ToolRegistry;
use kestrel_core::router::ModelRouter;
use kestrel_core::sandbox::Sandbox;
use kestrel_core::types::{Role, SessionRequest, SessionStatus};

use support::{test_config, MockProvider, ScriptedCall};

#[tokio::test]
async fn tool_round_trip_reads_a_real_file_through_the_sandbox() {
    let tmp = tempfile::tempdir().unwrap();
    let file_path = tmp.path().join("hello.txt");
    std::fs::write(&file_path, "hello").unwrap();

    let config = test_config(tmp.path());
    let db_path = config.db_path.clone();

    let registry = ToolRegistry::build(&config).unwrap();
    let mut router = ModelRouter::new();
    router.register(Arc::new(MockProvider::new(
        "mock",
        vec![
            ScriptedCall::ToolCall {
                tool_name: "read_file",
                arguments: serde_json::json!({"path": file_path.to_string_lossy()}),
            },
            ScriptedCall::FinalAnswer("saw: hello"),
        ],
    )));
    let sandbox = Sandbox::with_dispatcher(support::dispatch_harness_path());
    let store = AuditStore::open(&config.db_path).await.unwrap();
    let mut kernel = Kernel::new(config, registry, router, sandbox, store);

    let request = SessionRequest::new("summarize the file").unwrap();
    let session_id = request.session_id;
    let result = kernel.run(request).await.unwrap();
    kernel.close().await.unwrap();

    assert_eq!(result.status, SessionStatus::Done);
    assert_eq!(result.answer.as_deref(), Some("saw: hello"));
    assert_eq!(result.steps_taken, 2);
    assert!(result.error_type.is_none());

    let store = AuditStore::open(&db_path).await.unwrap();
    let history = store.get_conversation_history(session_id).await.unwrap();
    assert!(history.len() >= 4, "expected user, assistant-sentinel, tool, assistant; got {history:?}");
    assert_eq!(history[0].role, Role::User);
    assert!(history.iter().any(|m| m.role == Role::Tool && m.content.contains("hello")));
    assert!(history.iter().any(|m| m.role == Role::Assistant && m.content == "saw: hello"));
    assert!(store.verify_chain(session_id).await);
    store.close().await.unwrap();
}

#[tokio::test]
async fn write_file_round_trip_creates_a_new_file_under_restricted_allowed_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let target_path = tmp.path().join("new-note.txt");

    let config = test_config(tmp.path());

    let registry = ToolRegistry::build(&config).unwrap();
    let mut router = ModelRouter::new();
    router.register(Arc::new(MockProvider::new(
        "mock",
        vec![
            ScriptedCall::ToolCall {
                tool_name: "write_file",
                arguments: serde_json::json!({
                    "path": target_path.to_string_lossy(),
                    "content": "noted",
                }),
            },
            ScriptedCall::FinalAnswer("wrote it"),
        ],
    )));
    let sandbox = Sandbox::with_dispatcher(support::dispatch_harness_path());
    let store = AuditStore::open(&config.db_path).await.unwrap();
    let mut kernel = Kernel::new(config, registry, router, sandbox, store);

    // The file doesn't exist until the tool creates it — `allowed_paths`
    // validation must still admit it rather than treating a nonexistent
    // leaf as unresolvable.
    assert!(!target_path.exists());
    let request = SessionRequest::new("jot a note").unwrap();
    let result = kernel.run(request).await.unwrap();
    kernel.close().await.unwrap();

    assert_eq!(result.status, SessionStatus::Done);
    assert_eq!(result.answer.as_deref(), Some("wrote it"));
    assert!(result.error_type.is_none());
    assert_eq!(std::fs::read_to_string(&target_path).unwrap(), "noted");
}
