//! Built-in `read_file` tool. Declares `fs_read` and goes through the exact
//! same sandboxed subprocess path as any plugin-supplied tool.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::types::Permission;

use super::ToolPlugin;

pub struct ReadFile;

impl ToolPlugin for ReadFile {
    fn manifest(&self) -> crate::types::ToolManifest {
        crate::types::ToolManifest::new(
            "read_file",
            "1.0.0",
            "Reads the full contents of a text file from disk.",
            BTreeSet::from([Permission::FsRead]),
            30,
            64,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "minLength": 1},
                },
                "required": ["path"],
                "additionalProperties": false,
            }),
            json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string"},
                },
                "required": ["content"],
                "additionalProperties": false,
            }),
            vec![],
        )
        .expect("built-in read_file manifest is statically valid")
    }

    fn execute(&self, arguments: Value) -> Result<Value, String> {
        let path = arguments
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'path' argument".to_string())?;
        let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
        Ok(json!({ "content": content }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_existing_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "hello").unwrap();
        let result = ReadFile.execute(json!({"path": tmp.path().to_string_lossy()})).unwrap();
        assert_eq!(result["content"], "hello");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ReadFile.execute(json!({"path": "/nonexistent/path/xyz"}));
        assert!(result.is_err());
    }
}
