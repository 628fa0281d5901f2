use kestrel_core::kernel::Kernel;
use kestrel_core::secrets::SecretsLoader;
use kestrel_core::types::{KernelConfig, SessionRequest};

use crate::bootstrap;

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    config: KernelConfig,
    secrets: SecretsLoader,
    task: String,
    provider: Option<String>,
    model: Option<String>,
    max_steps: Option<u32>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let runtime = bootstrap::build(&config, &secrets).await?;

    if dry_run {
        println!("resolved config:");
        println!("{}", serde_json::to_string_pretty(&redacted_config(&config))?);
        println!("registered tools:");
        for manifest in runtime.registry.all_manifests() {
            println!("  - {} v{} ({})", manifest.name, manifest.version, manifest.description);
        }
        runtime.store.close().await?;
        return Ok(());
    }

    let mut request = SessionRequest::new(task)?;
    request.provider_override = provider;
    request.model_override = model;
    request.max_steps_override = max_steps;

    let mut kernel = Kernel::new(config, runtime.registry, runtime.router, runtime.sandbox, runtime.store);
    let result = kernel.run(request).await;
    kernel.close().await?;

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.error_type.is_some() {
        anyhow::bail!(
            "session {} ended {:?}: {}",
            result.session_id,
            result.status,
            result.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

fn redacted_config(config: &KernelConfig) -> serde_json::Value {
    serde_json::to_value(config).unwrap_or(serde_json::Value::Null)
}
