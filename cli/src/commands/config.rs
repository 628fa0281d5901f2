use kestrel_core::types::KernelConfig;

/// `KernelConfig` never carries API keys or other secrets (those live in
/// `SecretsLoader`, resolved separately at provider-registration time), so
/// printing it directly is safe.
pub async fn execute(config: KernelConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
