//! Tool plugin contract and dispatch. Built-in tools are compiled into the
//! binary and addressed by a plain `builtin:<name>` locator; plugins found
//! under `config.extra_plugin_dirs` are addressed by their shared-object
//! path and loaded dynamically, once, by whichever process resolves the
//! locator (the registry at startup for manifests, the sandboxed child at
//! dispatch time for execution).

pub mod read_file;
pub mod write_file;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::types::ToolManifest;

/// A loadable tool module: a manifest plus a synchronous `execute` entry
/// point. Implemented directly by built-ins; implemented on the plugin
/// side (via `extern "C"` exports) for dynamically loaded `.so`/`.dylib`
/// modules.
pub trait ToolPlugin: Send + Sync {
    fn manifest(&self) -> ToolManifest;
    fn execute(&self, arguments: Value) -> Result<Value, String>;
}

static BUILTINS: Lazy<HashMap<&'static str, Arc<dyn ToolPlugin>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Arc<dyn ToolPlugin>> = HashMap::new();
    map.insert("builtin:read_file", Arc::new(read_file::ReadFile));
    map.insert("builtin:write_file", Arc::new(write_file::WriteFile));
    map
});

/// Manifests for every built-in tool, in registration order — used by the
/// registry at build time.
pub fn builtin_manifests() -> Vec<(String, ToolManifest)> {
    vec![
        ("builtin:read_file".to_string(), read_file::ReadFile.manifest()),
        ("builtin:write_file".to_string(), write_file::WriteFile.manifest()),
    ]
}

/// Discover dynamically loadable plugins under `dir`. A file that fails to
/// load a plugin export is skipped with a warning rather than aborting
/// registry build.
pub fn discover_plugin_dir(dir: &Path) -> Vec<(String, ToolManifest)> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::warn!(dir = %dir.display(), "plugin directory not readable");
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_lib = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "so" | "dylib" | "dll"));
        if !is_lib {
            continue;
        }
        match load_plugin_manifest(&path) {
            Ok(manifest) => found.push((path.to_string_lossy().into_owned(), manifest)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load plugin manifest"),
        }
    }
    found
}

type ManifestFn = unsafe extern "C" fn() -> *mut std::os::raw::c_char;

fn load_plugin_manifest(path: &Path) -> Result<ToolManifest, String> {
    // SAFETY: the plugin contract requires a `kestrel_tool_manifest` export
    // returning a heap `CString` pointer the caller owns. A third-party
    // `.so` that doesn't honor this can misbehave; plugin directories are
    // operator-configured and trusted at the same level as the binary itself.
    unsafe {
        let library = libloading::Library::new(path).map_err(|e| e.to_string())?;
        let manifest_fn: libloading::Symbol<ManifestFn> = library
            .get(b"kestrel_tool_manifest")
            .map_err(|e| e.to_string())?;
        let raw = manifest_fn();
        if raw.is_null() {
            return Err("kestrel_tool_manifest returned null".to_string());
        }
        let json = std::ffi::CStr::from_ptr(raw).to_string_lossy().into_owned();
        serde_json::from_str(&json).map_err(|e| e.to_string())
    }
}

/// Execute a tool by locator from inside the sandboxed child. Built-ins are
/// dispatched directly; a `.so`/`.dylib`/`.dll` locator is loaded fresh in
/// this short-lived process and its `kestrel_tool_execute` export invoked.
pub fn execute_locator(locator: &str, arguments: Value) -> Result<Value, String> {
    if let Some(plugin) = BUILTINS.get(locator) {
        return plugin.execute(arguments);
    }
    execute_dynamic_plugin(locator, arguments)
}

type ExecuteFn = unsafe extern "C" fn(*const std::os::raw::c_char) -> *mut std::os::raw::c_char;

fn execute_dynamic_plugin(locator: &str, arguments: Value) -> Result<Value, String> {
    // SAFETY: same trust boundary as `load_plugin_manifest`; this call runs
    // inside the already-rlimited sandbox child, never the parent.
    unsafe {
        let library = libloading::Library::new(locator).map_err(|e| e.to_string())?;
        let execute_fn: libloading::Symbol<ExecuteFn> =
            library.get(b"kestrel_tool_execute").map_err(|e| e.to_string())?;
        let input = std::ffi::CString::new(arguments.to_string()).map_err(|e| e.to_string())?;
        let raw = execute_fn(input.as_ptr());
        if raw.is_null() {
            return Err("kestrel_tool_execute returned null".to_string());
        }
        let json = std::ffi::CStr::from_ptr(raw).to_string_lossy().into_owned();
        serde_json::from_str(&json).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_manifests_are_well_formed() {
        let manifests = builtin_manifests();
        assert_eq!(manifests.len(), 2);
        for (_, manifest) in manifests {
            assert!(!manifest.name.is_empty());
        }
    }

    #[test]
    fn unknown_locator_fails() {
        let result = execute_locator("builtin:does_not_exist", Value::Null);
        assert!(result.is_err());
    }
}
