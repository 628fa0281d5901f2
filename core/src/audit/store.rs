//! SQLite-backed audit store. Holds `sessions`, `steps`, `audit_events`,
//! `kv_memory`, `chain_ledger`, and `schema_version`. Schema application is
//! idempotent; every session's events and steps share one linear hash
//! chain, recorded as an append-only ledger independent of the mutable
//! `steps` row each step update otherwise overwrites.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteQueryResult};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::types::{
    AuditEvent, EventId, LogLevel, Message, Role, Session, SessionId, SessionStatus, StepId,
    StepStatus, StepTrace, StepType,
};

use super::chain;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    task TEXT NOT NULL,
    status TEXT NOT NULL,
    config_json TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    total_steps INTEGER NOT NULL DEFAULT 0,
    total_cost_usd REAL NOT NULL DEFAULT 0.0,
    error_type TEXT,
    error_msg TEXT
);

CREATE TABLE IF NOT EXISTS steps (
    step_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    step_number INTEGER NOT NULL,
    step_type TEXT NOT NULL,
    status TEXT NOT NULL,
    prompt_hash TEXT,
    model_output_hash TEXT,
    tool_name TEXT,
    tool_input_json TEXT,
    tool_output_json TEXT,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0.0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    audit_chain_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_steps_session_number ON steps(session_id, step_number);

CREATE TABLE IF NOT EXISTS kv_memory (
    key TEXT NOT NULL,
    namespace TEXT NOT NULL,
    value_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    session_id TEXT,
    PRIMARY KEY (key, namespace)
);

CREATE TABLE IF NOT EXISTS audit_events (
    event_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    step_id TEXT,
    event_type TEXT NOT NULL,
    level TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    chain_hash TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_session_timestamp ON audit_events(session_id, timestamp);

CREATE TABLE IF NOT EXISTS chain_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    chain_hash TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chain_ledger_session ON chain_ledger(session_id, id);
"#;

pub struct AuditStore {
    pool: SqlitePool,
    chain_heads: Mutex<HashMap<String, String>>,
}

impl AuditStore {
    pub async fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::AuditWriteFailure(format!("failed to create db directory: {e}")))?;
        }

        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| StorageError::AuditWriteFailure(format!("failed to open audit store: {e}")))?;

        let store = Self {
            pool,
            chain_heads: Mutex::new(HashMap::new()),
        };
        store.apply_schema().await?;
        store.run_integrity_check().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::AuditWriteFailure(format!("failed to apply schema: {e}")))?;

        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;

        if row.is_none() {
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(SCHEMA_VERSION)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::AuditWriteFailure(e.to_string()))?;
        }
        Ok(())
    }

    async fn run_integrity_check(&self) -> Result<(), StorageError> {
        let result: (String,) = sqlx::query_as("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
        if result.0 != "ok" {
            return Err(StorageError::MemoryCorruption(format!(
                "sqlite integrity_check failed: {}",
                result.0
            )));
        }
        Ok(())
    }

    async fn chain_head(&self, session_id: &SessionId) -> Result<String, StorageError> {
        let key = session_id.to_string();
        {
            let heads = self.chain_heads.lock().await;
            if let Some(h) = heads.get(&key) {
                return Ok(h.clone());
            }
        }
        let loaded = self.load_chain_head_from_db(session_id).await?;
        self.chain_heads.lock().await.insert(key, loaded.clone());
        Ok(loaded)
    }

    async fn load_chain_head_from_db(&self, session_id: &SessionId) -> Result<String, StorageError> {
        // The ledger is the single source of truth for the chain head: one
        // row per advance, in insertion order, independent of whatever
        // mutable `steps`/`audit_events` rows each advance's payload also
        // happens to be recorded against.
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT chain_hash FROM chain_ledger WHERE session_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;

        Ok(row.map(|(hash,)| hash).unwrap_or_else(chain::seed))
    }

    /// Computes the next chain hash and appends it to the ledger. This is
    /// the only place a chain advance is recorded, so every step-start,
    /// step-end, and event write leaves its own permanent ledger row rather
    /// than sharing a mutable one that a later write could overwrite.
    async fn advance_chain(&self, session_id: &SessionId, payload: &Value) -> Result<String, StorageError> {
        let prev = self.chain_head(session_id).await?;
        let next = chain::next(&prev, payload);
        let now = Utc::now().to_rfc3339();
        exec(
            sqlx::query(
                "INSERT INTO chain_ledger (session_id, payload_json, chain_hash, timestamp) VALUES (?, ?, ?, ?)",
            )
            .bind(session_id.to_string())
            .bind(payload.to_string())
            .bind(&next)
            .bind(now)
            .execute(&self.pool),
        )
        .await?;
        self.chain_heads
            .lock()
            .await
            .insert(session_id.to_string(), next.clone());
        Ok(next)
    }

    pub async fn create_session(&self, session_id: SessionId, task: &str, config_snapshot: &Value) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        exec(
            sqlx::query(
                "INSERT INTO sessions (session_id, task, status, config_json, started_at, total_steps, total_cost_usd)
                 VALUES (?, ?, ?, ?, ?, 0, 0.0)",
            )
            .bind(session_id.to_string())
            .bind(task)
            .bind(serde_json::to_string(&SessionStatus::Idle).unwrap())
            .bind(config_snapshot.to_string())
            .bind(now)
            .execute(&self.pool),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_session_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        total_steps: u32,
        total_cost_usd: f64,
        error_type: Option<&str>,
        error_message: Option<&str>,
        finished: bool,
    ) -> Result<(), StorageError> {
        let finished_at = if finished { Some(Utc::now().to_rfc3339()) } else { None };
        exec(
            sqlx::query(
                "UPDATE sessions SET status = ?, total_steps = ?, total_cost_usd = ?, error_type = ?, error_msg = ?, finished_at = COALESCE(?, finished_at)
                 WHERE session_id = ?",
            )
            .bind(serde_json::to_string(&status).unwrap())
            .bind(total_steps as i64)
            .bind(total_cost_usd)
            .bind(error_type)
            .bind(error_message)
            .bind(finished_at)
            .bind(session_id.to_string())
            .execute(&self.pool),
        )
        .await
    }

    fn conv_key(session_id: SessionId) -> String {
        format!("conv_{session_id}")
    }

    pub async fn append_message(&self, session_id: SessionId, message: &Message) -> Result<(), StorageError> {
        let mut history = self.get_conversation_history(session_id).await?;
        history.push(message.clone());
        let value = serde_json::to_value(&history).map_err(|e| StorageError::AuditWriteFailure(e.to_string()))?;
        self.set_kv(&Self::conv_key(session_id), "system", &value, Some(session_id)).await
    }

    pub async fn get_conversation_history(&self, session_id: SessionId) -> Result<Vec<Message>, StorageError> {
        match self.get_kv(&Self::conv_key(session_id), "system").await? {
            Some(value) => serde_json::from_value(value).map_err(|e| StorageError::MemoryCorruption(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    pub async fn set_kv(&self, key: &str, namespace: &str, value: &Value, session_id: Option<SessionId>) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        exec(
            sqlx::query(
                "INSERT INTO kv_memory (key, namespace, value_json, created_at, updated_at, session_id)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(key, namespace) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(namespace)
            .bind(value.to_string())
            .bind(&now)
            .bind(&now)
            .bind(session_id.map(|s| s.to_string()))
            .execute(&self.pool),
        )
        .await
    }

    pub async fn get_kv(&self, key: &str, namespace: &str) -> Result<Option<Value>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value_json FROM kv_memory WHERE key = ? AND namespace = ?")
            .bind(key)
            .bind(namespace)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
        row.map(|(json,)| serde_json::from_str(&json).map_err(|e| StorageError::MemoryCorruption(e.to_string())))
            .transpose()
    }

    pub async fn write_step_start(&self, trace: &StepTrace) -> Result<(), StorageError> {
        let payload = serde_json::json!({"step_id": trace.step_id.to_string(), "status": "started"});
        let chain_hash = self.advance_chain(&trace.session_id, &payload).await?;
        exec(
            sqlx::query(
                "INSERT INTO steps (step_id, session_id, step_number, step_type, status, started_at, audit_chain_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trace.step_id.to_string())
            .bind(trace.session_id.to_string())
            .bind(trace.step_number as i64)
            .bind(serde_json::to_string(&trace.step_type).unwrap())
            .bind(serde_json::to_string(&StepStatus::Started).unwrap())
            .bind(trace.started_at.to_rfc3339())
            .bind(chain_hash)
            .execute(&self.pool),
        )
        .await
    }

    pub async fn write_step_end(&self, trace: &StepTrace) -> Result<(), StorageError> {
        let payload = serde_json::json!({
            "step_id": trace.step_id.to_string(),
            "status": serde_json::to_string(&trace.status).unwrap(),
            "hash": trace.model_output_hash,
        });
        let chain_hash = self.advance_chain(&trace.session_id, &payload).await?;
        exec(
            sqlx::query(
                "UPDATE steps SET status = ?, prompt_hash = ?, model_output_hash = ?, tool_name = ?, tool_input_json = ?, tool_output_json = ?,
                     input_tokens = ?, output_tokens = ?, cost_usd = ?, duration_ms = ?, finished_at = ?, audit_chain_hash = ?
                 WHERE step_id = ?",
            )
            .bind(serde_json::to_string(&trace.status).unwrap())
            .bind(&trace.prompt_hash)
            .bind(&trace.model_output_hash)
            .bind(&trace.tool_name)
            .bind(trace.tool_input_json.as_ref().map(|v| v.to_string()))
            .bind(trace.tool_output_json.as_ref().map(|v| v.to_string()))
            .bind(trace.input_tokens as i64)
            .bind(trace.output_tokens as i64)
            .bind(trace.cost_usd)
            .bind(trace.duration_ms as i64)
            .bind(trace.finished_at.map(|t| t.to_rfc3339()))
            .bind(chain_hash)
            .bind(trace.step_id.to_string())
            .execute(&self.pool),
        )
        .await
    }

    pub async fn write_event(
        &self,
        session_id: SessionId,
        step_id: Option<StepId>,
        event_type: &str,
        level: LogLevel,
        payload: Value,
    ) -> Result<AuditEvent, StorageError> {
        let chain_hash = self.advance_chain(&session_id, &payload).await?;
        let event = AuditEvent {
            event_id: EventId::new(),
            session_id,
            step_id,
            event_type: event_type.to_string(),
            level,
            payload,
            chain_hash,
            timestamp: Utc::now(),
        };
        exec(
            sqlx::query(
                "INSERT INTO audit_events (event_id, session_id, step_id, event_type, level, payload_json, chain_hash, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event.event_id.to_string())
            .bind(event.session_id.to_string())
            .bind(event.step_id.map(|s| s.to_string()))
            .bind(&event.event_type)
            .bind(serde_json::to_string(&event.level).unwrap())
            .bind(event.payload.to_string())
            .bind(&event.chain_hash)
            .bind(event.timestamp.to_rfc3339())
            .execute(&self.pool),
        )
        .await?;
        Ok(event)
    }

    pub async fn get_session_events(&self, session_id: SessionId) -> Result<Vec<AuditEvent>, StorageError> {
        let rows = sqlx::query(
            "SELECT event_id, session_id, step_id, event_type, level, payload_json, chain_hash, timestamp
             FROM audit_events WHERE session_id = ? ORDER BY timestamp ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;

        rows.into_iter().map(row_to_event).collect()
    }

    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<Session>, StorageError> {
        let rows = sqlx::query(
            "SELECT session_id, task, status, config_json, started_at, finished_at, total_steps, total_cost_usd, error_type, error_msg
             FROM sessions ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;

        rows.into_iter().map(row_to_session).collect()
    }

    /// Recomputes the chain from the seed and compares against stored
    /// values; any mismatch, or any store error, is reported as `false`.
    pub async fn verify_chain(&self, session_id: SessionId) -> bool {
        self.verify_chain_inner(session_id).await.unwrap_or(false)
    }

    async fn verify_chain_inner(&self, session_id: SessionId) -> Result<bool, StorageError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT payload_json, chain_hash FROM chain_ledger WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;

        let mut head = chain::seed();
        for (payload_json, chain_hash) in rows {
            let payload: Value = match serde_json::from_str(&payload_json) {
                Ok(v) => v,
                Err(_) => return Ok(false),
            };
            head = chain::next(&head, &payload);
            if head != chain_hash {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn close(self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<AuditEvent, StorageError> {
    let payload_json: String = row.try_get("payload_json").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let level_json: String = row.try_get("level").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let step_id: Option<String> = row.try_get("step_id").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let session_id: String = row.try_get("session_id").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let event_id: String = row.try_get("event_id").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let event_type: String = row.try_get("event_type").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let chain_hash: String = row.try_get("chain_hash").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let timestamp: String = row.try_get("timestamp").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;

    Ok(AuditEvent {
        event_id: EventId::from_string(&event_id).map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        session_id: SessionId::from_string(&session_id).map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        step_id: step_id
            .map(|s| StepId::from_string(&s))
            .transpose()
            .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        event_type,
        level: serde_json::from_str(&level_json).map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        payload: serde_json::from_str(&payload_json).map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        chain_hash,
        timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?
            .with_timezone(&Utc),
    })
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<Session, StorageError> {
    let session_id: String = row.try_get("session_id").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let task: String = row.try_get("task").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let status_json: String = row.try_get("status").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let config_json: String = row.try_get("config_json").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let started_at: String = row.try_get("started_at").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let finished_at: Option<String> = row.try_get("finished_at").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let total_steps: i64 = row.try_get("total_steps").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let total_cost_usd: f64 = row.try_get("total_cost_usd").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let error_type: Option<String> = row.try_get("error_type").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;
    let error_msg: Option<String> = row.try_get("error_msg").map_err(|e| StorageError::MemoryCorruption(e.to_string()))?;

    Ok(Session {
        session_id: SessionId::from_string(&session_id).map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        task,
        status: serde_json::from_str(&status_json).map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        config_snapshot: serde_json::from_str(&config_json).map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
            .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?
            .with_timezone(&Utc),
        finished_at: finished_at
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| StorageError::MemoryCorruption(e.to_string()))?,
        total_steps: total_steps as u32,
        total_cost_usd,
        error_type,
        error_message: error_msg,
    })
}

async fn exec(query: impl std::future::Future<Output = Result<SqliteQueryResult, sqlx::Error>>) -> Result<(), StorageError> {
    query.await.map(|_| ()).map_err(|e| StorageError::AuditWriteFailure(e.to_string()))
}
