//! Tool registry: discovers built-in tools plus any plugin under
//! `config.extra_plugin_dirs`, validates each manifest against the static
//! permission policy, and rejects duplicate names. Immutable after `build`.

use std::collections::HashMap;

use crate::error::{SecurityError, ValidationError};
use crate::types::{KernelConfig, Permission, ToolManifest};

#[derive(Debug, Clone)]
struct Entry {
    manifest: ToolManifest,
    module_locator: String,
}

pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    ordered_names: Vec<String>,
}

impl ToolRegistry {
    pub fn build(config: &KernelConfig) -> Result<Self, ValidationError> {
        let mut entries = HashMap::new();
        let mut ordered_names = Vec::new();

        for (locator, manifest) in crate::tools::builtin_manifests() {
            register(&mut entries, &mut ordered_names, config, manifest, locator)?;
        }

        for dir in &config.extra_plugin_dirs {
            for (locator, manifest) in crate::tools::discover_plugin_dir(dir) {
                register(&mut entries, &mut ordered_names, config, manifest, locator)?;
            }
        }

        Ok(Self {
            entries,
            ordered_names,
        })
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get_manifest(&self, name: &str) -> Result<&ToolManifest, SecurityError> {
        self.entries
            .get(name)
            .map(|e| &e.manifest)
            .ok_or_else(|| SecurityError::UnknownTool(name.to_string()))
    }

    pub fn get_module_path(&self, name: &str) -> Result<&str, SecurityError> {
        self.entries
            .get(name)
            .map(|e| e.module_locator.as_str())
            .ok_or_else(|| SecurityError::UnknownTool(name.to_string()))
    }

    pub fn all_manifests(&self) -> Vec<&ToolManifest> {
        self.ordered_names
            .iter()
            .filter_map(|name| self.entries.get(name).map(|e| &e.manifest))
            .collect()
    }

    /// Re-verify a tool's declared permissions against the live policy;
    /// called again by the kernel immediately before every dispatch so a
    /// permission revoked at runtime blocks the call even if the tool was
    /// already loaded at build time.
    pub fn check_permission(&self, name: &str, config: &KernelConfig) -> Result<(), SecurityError> {
        let manifest = self.get_manifest(name)?;
        for permission in &manifest.permissions {
            if !config.allowed_permissions.contains(permission) {
                return Err(SecurityError::PermissionDenied {
                    tool: name.to_string(),
                    permission: format!("{permission:?}"),
                });
            }
        }
        Ok(())
    }
}

fn register(
    entries: &mut HashMap<String, Entry>,
    ordered_names: &mut Vec<String>,
    config: &KernelConfig,
    mut manifest: ToolManifest,
    module_locator: String,
) -> Result<(), ValidationError> {
    if entries.contains_key(&manifest.name) {
        return Err(ValidationError::Manifest(format!(
            "duplicate tool registration: '{}'",
            manifest.name
        )));
    }
    for permission in &manifest.permissions {
        if !config.allowed_permissions.contains(permission) {
            return Err(ValidationError::Manifest(format!(
                "tool '{}' requests permission {:?} not in allowed_permissions",
                manifest.name, permission
            )));
        }
    }

    // A tool's own `allowed_paths` is just its declared default; the
    // deployment-wide `config.allowed_paths` restriction, when set, always
    // wins for any tool touching the filesystem.
    if !config.allowed_paths.is_empty()
        && manifest.permissions.iter().any(|p| matches!(p, Permission::FsRead | Permission::FsWrite))
    {
        manifest.allowed_paths = config.allowed_paths.clone();
    }

    ordered_names.push(manifest.name.clone());
    entries.insert(manifest.name.clone(), Entry { manifest, module_locator });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::types::Permission;

    fn config_with(permissions: BTreeSet<Permission>) -> KernelConfig {
        let mut config = KernelConfig::default();
        config.allowed_permissions = permissions;
        config
    }

    #[test]
    fn builds_with_sufficient_permissions() {
        let config = config_with(BTreeSet::from([Permission::FsRead, Permission::FsWrite]));
        let registry = ToolRegistry::build(&config).unwrap();
        assert!(registry.has_tool("read_file"));
        assert!(registry.has_tool("write_file"));
    }

    #[test]
    fn rejects_tool_exceeding_allowed_permissions() {
        let config = config_with(BTreeSet::new());
        let result = ToolRegistry::build(&config);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_tool_lookup_fails() {
        let config = config_with(BTreeSet::from([Permission::FsRead, Permission::FsWrite]));
        let registry = ToolRegistry::build(&config).unwrap();
        assert!(registry.get_manifest("nonexistent").is_err());
    }

    #[test]
    fn revoking_permission_blocks_dispatch_check() {
        let mut config = config_with(BTreeSet::from([Permission::FsRead, Permission::FsWrite]));
        let registry = ToolRegistry::build(&config).unwrap();
        config.allowed_permissions = BTreeSet::from([Permission::FsRead]);
        assert!(registry.check_permission("write_file", &config).is_err());
        assert!(registry.check_permission("read_file", &config).is_ok());
    }
}
