//! Wires a resolved `KernelConfig` into a `ToolRegistry`, `ModelRouter`,
//! `Sandbox`, and `AuditStore` ready for the kernel to drive.

use kestrel_core::audit::AuditStore;
use kestrel_core::providers::{hosted::HostedProvider, local::LocalProvider};
use kestrel_core::registry::ToolRegistry;
use kestrel_core::router::ModelRouter;
use kestrel_core::sandbox::Sandbox;
use kestrel_core::secrets::SecretsLoader;
use kestrel_core::types::KernelConfig;

pub struct Runtime {
    pub registry: ToolRegistry,
    pub router: ModelRouter,
    pub sandbox: Sandbox,
    pub store: AuditStore,
}

pub async fn build(config: &KernelConfig, secrets: &SecretsLoader) -> anyhow::Result<Runtime> {
    let registry = ToolRegistry::build(config)?;

    let mut router = ModelRouter::new();
    register_provider(&mut router, &config.primary_provider, secrets);
    if let Some(fallback) = &config.fallback_provider {
        register_provider(&mut router, fallback, secrets);
    }

    let sandbox = Sandbox::new()?;
    let store = AuditStore::open(&config.db_path).await?;

    Ok(Runtime { registry, router, sandbox, store })
}

fn register_provider(router: &mut ModelRouter, name: &str, secrets: &SecretsLoader) {
    if name == "ollama" || name == "local" {
        let endpoint = secrets.optional("KESTREL_LOCAL_ENDPOINT").unwrap_or_else(|| "http://localhost:11434".to_string());
        router.register(std::sync::Arc::new(LocalProvider::new(name, endpoint)));
        return;
    }

    let key_env = format!("{}_API_KEY", name.to_uppercase());
    match secrets.require(&key_env) {
        Ok(api_key) => {
            let base_url = secrets.optional(&format!("{}_BASE_URL", name.to_uppercase())).unwrap_or_else(|| "https://api.anthropic.com".to_string());
            router.register(std::sync::Arc::new(HostedProvider::new(name, api_key, base_url)));
        }
        Err(e) => {
            tracing::warn!(provider = name, error = %e, "provider secret unavailable; provider left unregistered");
        }
    }
}
