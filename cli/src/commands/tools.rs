use clap::Subcommand;
use kestrel_core::registry::ToolRegistry;
use kestrel_core::types::KernelConfig;

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// List every tool the registry resolves for this configuration.
    List,
    /// Print a single tool's manifest, including its schemas.
    Show {
        #[arg(long)]
        name: String,
    },
}

pub async fn execute(config: KernelConfig, command: ToolsCommand) -> anyhow::Result<()> {
    let registry = ToolRegistry::build(&config)?;

    match command {
        ToolsCommand::List => {
            for manifest in registry.all_manifests() {
                let perms: Vec<String> = manifest.permissions.iter().map(|p| format!("{p:?}")).collect();
                println!(
                    "{}  v{}  [{}]  {}",
                    manifest.name,
                    manifest.version,
                    perms.join(","),
                    manifest.description
                );
            }
        }
        ToolsCommand::Show { name } => {
            let manifest = registry
                .all_manifests()
                .into_iter()
                .find(|m| m.name == name)
                .ok_or_else(|| anyhow::anyhow!("no such tool: {name}"))?;
            println!("{}", serde_json::to_string_pretty(manifest)?);
        }
    }

    Ok(())
}
