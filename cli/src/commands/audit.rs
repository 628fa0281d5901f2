use clap::Subcommand;
use kestrel_core::audit::AuditStore;
use kestrel_core::types::{KernelConfig, SessionId};

#[derive(Subcommand)]
pub enum AuditCommand {
    /// List recent sessions.
    List {
        #[arg(long, short = 'n')]
        last: Option<u32>,
    },
    /// Dump a session's full event/step history.
    Export {
        #[arg(long)]
        session_id: String,
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Recompute and verify a session's hash chain.
    Verify {
        #[arg(long)]
        session_id: String,
    },
}

pub async fn execute(config: KernelConfig, command: AuditCommand) -> anyhow::Result<()> {
    let store = AuditStore::open(&config.db_path).await?;

    match command {
        AuditCommand::List { last } => {
            let sessions = store.list_sessions(last.unwrap_or(20)).await?;
            for session in sessions {
                println!(
                    "{}  {:?}  steps={}  cost=${:.4}  {}",
                    session.session_id, session.status, session.total_steps, session.total_cost_usd, session.task
                );
            }
        }
        AuditCommand::Export { session_id, format } => {
            let session_id = SessionId::from_string(&session_id)?;
            let events = store.get_session_events(session_id).await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&events)?),
                _ => {
                    for event in events {
                        println!("{}  {}  {}  {}", event.timestamp, event.event_type, event.chain_hash, event.payload);
                    }
                }
            }
        }
        AuditCommand::Verify { session_id } => {
            let session_id = SessionId::from_string(&session_id)?;
            let valid = store.verify_chain(session_id).await;
            println!("{}", if valid { "chain valid" } else { "chain INVALID" });
            store.close().await?;
            if !valid {
                anyhow::bail!("audit chain verification failed for session {session_id}");
            }
            return Ok(());
        }
    }

    store.close().await?;
    Ok(())
}
