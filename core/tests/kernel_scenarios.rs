//! End-to-end kernel scenarios, §8 items 1, 3, 4, 5, 6. Scenario 2 (the
//! real subprocess tool round-trip) lives in `tool_round_trip.rs` since it
//! needs the compiled dispatch harness rather than a mock sandbox path.

mod support;

use std::sync::Arc;

use kestrel_core::audit::AuditStore;
use kestrel_core::error::ProviderError;
use kestrel_core::kernel::Kernel;
use kestrel_core::registry::ToolRegistry;
use kestrel_core::router::ModelRouter;
use kestrel_core::sandbox::Sandbox;
use kestrel_core::types::{SessionRequest, SessionStatus};

use support::{test_config, MockProvider, ScriptedCall};

async fn build_kernel(
    config: kestrel_core::types::KernelConfig,
    provider: MockProvider,
) -> Kernel {
    let registry = ToolRegistry::build(&config).unwrap();
    let mut router = ModelRouter::new();
    router.register(Arc::new(provider));
    let sandbox = Sandbox::with_dispatcher(support::dispatch_harness_path());
    let store = AuditStore::open(&config.db_path).await.unwrap();
    Kernel::new(config, registry, router, sandbox, store)
}

#[tokio::test]
async fn happy_path_single_step() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let db_path = config.db_path.clone();

    let provider = MockProvider::new("mock", vec![ScriptedCall::FinalAnswer("The answer is 42.")]);
    let mut kernel = build_kernel(config, provider).await;

    let request = SessionRequest::new("what is the answer?").unwrap();
    let session_id = request.session_id;
    let result = kernel.run(request).await.unwrap();
    kernel.close().await.unwrap();

    assert_eq!(result.status, SessionStatus::Done);
    assert_eq!(result.answer.as_deref(), Some("The answer is 42."));
    assert_eq!(result.steps_taken, 1);
    assert!(result.error_type.is_none());

    let verify_store = AuditStore::open(&db_path).await.unwrap();
    assert!(verify_store.verify_chain(session_id).await);
    let events = verify_store.get_session_events(session_id).await.unwrap();
    let event_types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(event_types.contains(&"session_start"));
    assert!(event_types.contains(&"session_end"));
    verify_store.close().await.unwrap();
}

#[tokio::test]
async fn path_traversal_is_blocked_before_spawn() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    let provider = MockProvider::new(
        "mock",
        vec![ScriptedCall::ToolCall {
            tool_name: "read_file",
            arguments: serde_json::json!({"path": "/etc/passwd"}),
        }],
    );
    let mut kernel = build_kernel(config, provider).await;

    let request = SessionRequest::new("read a system file").unwrap();
    let result = kernel.run(request).await.unwrap();
    kernel.close().await.unwrap();

    assert_eq!(result.status, SessionStatus::Failed);
    assert!(matches!(result.error_type.as_deref(), Some("PathTraversal") | Some("SecurityError")));
}

#[tokio::test]
async fn step_limit_loop_terminates() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.max_steps = 2;

    let provider = MockProvider::new(
        "mock",
        vec![ScriptedCall::ToolCall {
            tool_name: "nonexistent",
            arguments: serde_json::json!({}),
        }],
    );
    let mut kernel = build_kernel(config, provider).await;

    let request = SessionRequest::new("loop forever").unwrap();
    let result = kernel.run(request).await.unwrap();
    kernel.close().await.unwrap();

    assert_eq!(result.status, SessionStatus::Failed);
    assert!(result.error_type.is_some());
    assert!(result.steps_taken <= 3);
}

#[tokio::test]
async fn provider_exhaustion_fails_the_session() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    let provider = MockProvider::new(
        "mock",
        vec![
            ScriptedCall::Error(ProviderError::ModelProviderError { status_code: 500 }),
            ScriptedCall::Error(ProviderError::ModelProviderError { status_code: 500 }),
            ScriptedCall::Error(ProviderError::ModelProviderError { status_code: 500 }),
        ],
    );
    let mut kernel = build_kernel(config, provider).await;

    let request = SessionRequest::new("ask something").unwrap();
    let session_id = request.session_id;
    let result = kernel.run(request).await.unwrap();
    kernel.close().await.unwrap();

    assert_eq!(result.status, SessionStatus::Failed);
    assert!(result.answer.is_none());
    assert_eq!(result.error_type.as_deref(), Some("ModelProviderExhausted"));

    let verify_store = AuditStore::open(&config_db_path(&tmp)).await.unwrap();
    let events = verify_store.get_session_events(session_id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == "provider_failure"));
    verify_store.close().await.unwrap();
}

fn config_db_path(tmp: &tempfile::TempDir) -> std::path::PathBuf {
    tmp.path().join("kestrel.db")
}

#[tokio::test]
async fn tampering_with_a_stored_event_breaks_the_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let db_path = config.db_path.clone();

    let provider = MockProvider::new("mock", vec![ScriptedCall::FinalAnswer("done")]);
    let mut kernel = build_kernel(config, provider).await;

    let request = SessionRequest::new("anything").unwrap();
    let session_id = request.session_id;
    kernel.run(request).await.unwrap();
    kernel.close().await.unwrap();

    {
        let store = AuditStore::open(&db_path).await.unwrap();
        assert!(store.verify_chain(session_id).await);
        store.close().await.unwrap();
    }

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .unwrap();
    sqlx::query("UPDATE audit_events SET payload_json = '{\"tampered\":true}' WHERE session_id = ? AND event_type = 'session_start'")
        .bind(session_id.to_string())
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let store = AuditStore::open(&db_path).await.unwrap();
    assert!(!store.verify_chain(session_id).await);
    store.close().await.unwrap();
}
