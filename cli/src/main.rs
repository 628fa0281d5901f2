//! Kestrel CLI entry point. Checks for the hidden `__dispatch-tool`
//! subcommand before any `clap` parsing happens — that subcommand is never
//! user-facing, it's how the sandbox re-execs this same binary to run a
//! tool in a minimal child process (see `kestrel_core::sandbox`).

mod bootstrap;
mod commands;

use clap::{Parser, Subcommand};
use kestrel_core::sandbox::exec::DISPATCH_SUBCOMMAND;

#[derive(Parser)]
#[command(name = "kestrel", version, about = "Local-first agent runtime")]
struct Cli {
    #[arg(long, global = true, env = "KESTREL_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[arg(long, global = true, env = "KESTREL_DB_PATH")]
    db_path: Option<std::path::PathBuf>,

    #[arg(long, global = true, env = "KESTREL_LOG_PATH")]
    log_path: Option<std::path::PathBuf>,

    #[arg(long, global = true, env = "KESTREL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single agent session.
    Run {
        #[arg(long, short = 't')]
        task: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_steps: Option<u32>,
        /// Resolve configuration and print the registered tools without calling a model.
        #[arg(long)]
        dry_run: bool,
    },
    /// Inspect the audit store.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommand,
    },
    /// Inspect registered tools.
    Tools {
        #[command(subcommand)]
        command: commands::tools::ToolsCommand,
    },
    /// Print the fully resolved configuration (secrets redacted).
    Config,
}

fn main() {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_default();
    if let Some(first) = args.next() {
        if first == DISPATCH_SUBCOMMAND {
            let locator = args.next().unwrap_or_default();
            kestrel_core::sandbox::dispatch_main(&locator);
        }
        // fall through to normal clap parsing below, restoring args.
        drop(program);
    }

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let result = runtime.block_on(run(cli));

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = kestrel_core::config::CliOverrides {
        provider: None,
        model: None,
        max_steps: None,
        max_cost_usd: None,
        db_path: cli.db_path.clone(),
        log_path: cli.log_path.clone(),
        config_file: cli.config.clone(),
    };
    let config = kestrel_core::config::load(&overrides)?;

    let secrets = kestrel_core::secrets::SecretsLoader::new();
    kestrel_core::logging::init(&cli.log_level, Some(&config.log_path), secrets.known_values());

    match cli.command {
        Command::Run { task, provider, model, max_steps, dry_run } => {
            commands::run::execute(config, secrets, task, provider, model, max_steps, dry_run).await
        }
        Command::Audit { command } => commands::audit::execute(config, command).await,
        Command::Tools { command } => commands::tools::execute(config, command).await,
        Command::Config => commands::config::execute(config).await,
    }
}
