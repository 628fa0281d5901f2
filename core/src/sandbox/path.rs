//! Path-traversal validation: every string argument that looks like a path
//! must resolve (symlinks and `..` followed, same as `Path.resolve()` —
//! succeeding even when the path's final component doesn't exist yet) to
//! somewhere under one of the manifest's `allowed_paths`.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::SecurityError;

fn looks_like_path(s: &str) -> bool {
    s.contains('/') || s.starts_with('.')
}

fn under_allowed_base(candidate: &Path, base: &Path) -> bool {
    candidate == base || candidate.starts_with(base)
}

fn make_absolute(path: &Path) -> Result<PathBuf, SecurityError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|_| SecurityError::PathTraversal {
            path: path.to_string_lossy().into_owned(),
        })
}

/// Resolves `raw` the way `Path.resolve()` does: symlinks are followed
/// component by component as each prefix is reached, but a component (or
/// tail of components) that doesn't exist yet is kept literally rather
/// than rejected, so a path to a file about to be created still resolves.
/// `..` is applied after canonicalizing what precedes it, so it pops the
/// real (post-symlink) parent rather than a lexical one.
fn canonicalize_claim(raw: &str) -> Result<PathBuf, SecurityError> {
    let absolute = make_absolute(Path::new(raw))?;

    use std::path::Component;
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                if let Ok(canon) = std::fs::canonicalize(&resolved) {
                    resolved = canon;
                }
                resolved.pop();
            }
            Component::CurDir => {}
            Component::Normal(seg) => {
                resolved.push(seg);
                if let Ok(canon) = std::fs::canonicalize(&resolved) {
                    resolved = canon;
                }
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    Ok(resolved)
}

/// Validate one candidate path string against the manifest's allowed bases.
fn validate_one(raw: &str, allowed_paths: &[PathBuf]) -> Result<(), SecurityError> {
    let resolved = canonicalize_claim(raw)?;
    let canonical_bases: Vec<PathBuf> = allowed_paths
        .iter()
        .filter_map(|b| std::fs::canonicalize(b).ok().or_else(|| Some(b.clone())))
        .collect();

    if canonical_bases.iter().any(|base| under_allowed_base(&resolved, base)) {
        Ok(())
    } else {
        Err(SecurityError::PathTraversal {
            path: raw.to_string(),
        })
    }
}

fn walk(value: &Value, allowed_paths: &[PathBuf]) -> Result<(), SecurityError> {
    match value {
        Value::String(s) if looks_like_path(s) => validate_one(s, allowed_paths),
        Value::Object(map) => {
            for v in map.values() {
                walk(v, allowed_paths)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                walk(v, allowed_paths)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Entry point used by the sandbox pipeline. A no-op when `allowed_paths`
/// is empty: the manifest is declaring it needs no filesystem access at all.
pub fn validate_paths(arguments: &Value, allowed_paths: &[PathBuf]) -> Result<(), SecurityError> {
    if allowed_paths.is_empty() {
        return Ok(());
    }
    walk(arguments, allowed_paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skip_check_when_allowed_paths_empty() {
        let args = json!({"path": "/etc/passwd"});
        assert!(validate_paths(&args, &[]).is_ok());
    }

    #[test]
    fn accepts_path_under_allowed_base() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("hello.txt");
        std::fs::write(&file, b"hi").unwrap();
        let args = json!({"path": file.to_string_lossy()});
        let allowed = vec![tmp.path().to_path_buf()];
        assert!(validate_paths(&args, &allowed).is_ok());
    }

    #[test]
    fn rejects_path_outside_allowed_base() {
        let tmp = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let file = other.path().join("secret.txt");
        std::fs::write(&file, b"hi").unwrap();
        let args = json!({"path": file.to_string_lossy()});
        let allowed = vec![tmp.path().to_path_buf()];
        assert!(validate_paths(&args, &allowed).is_err());
    }

    #[test]
    fn accepts_nonexistent_path_under_allowed_base() {
        // A path whose leaf doesn't exist yet must still validate — this is
        // the common case for `write_file` creating a new file.
        let tmp = tempfile::tempdir().unwrap();
        let args = json!({"path": tmp.path().join("missing.txt").to_string_lossy()});
        let allowed = vec![tmp.path().to_path_buf()];
        assert!(validate_paths(&args, &allowed).is_ok());
    }

    #[test]
    fn rejects_nonexistent_path_outside_allowed_base() {
        let tmp = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let args = json!({"path": other.path().join("missing.txt").to_string_lossy()});
        let allowed = vec![tmp.path().to_path_buf()];
        assert!(validate_paths(&args, &allowed).is_err());
    }

    #[test]
    fn rejects_traversal_via_parent_components_to_a_nonexistent_leaf() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = tmp.path().join("sandbox");
        std::fs::create_dir(&sandbox).unwrap();
        let args = json!({"path": sandbox.join("../../etc/passwd").to_string_lossy()});
        let allowed = vec![sandbox.clone()];
        assert!(validate_paths(&args, &allowed).is_err());
    }

    #[test]
    fn ignores_non_path_like_strings() {
        let args = json!({"name": "simple-value-no-slash-or-dot-prefix"});
        assert!(validate_paths(&args, &[PathBuf::from("/tmp")]).is_ok());
    }
}
