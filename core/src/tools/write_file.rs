//! Built-in `write_file` tool. Declares `fs_write`.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::types::Permission;

use super::ToolPlugin;

pub struct WriteFile;

impl ToolPlugin for WriteFile {
    fn manifest(&self) -> crate::types::ToolManifest {
        crate::types::ToolManifest::new(
            "write_file",
            "1.0.0",
            "Writes text content to a file on disk, overwriting it.",
            BTreeSet::from([Permission::FsWrite]),
            30,
            64,
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "minLength": 1},
                    "content": {"type": "string"},
                },
                "required": ["path", "content"],
                "additionalProperties": false,
            }),
            json!({
                "type": "object",
                "properties": {
                    "bytes_written": {"type": "integer", "minimum": 0},
                },
                "required": ["bytes_written"],
                "additionalProperties": false,
            }),
            vec![],
        )
        .expect("built-in write_file manifest is statically valid")
    }

    fn execute(&self, arguments: Value) -> Result<Value, String> {
        let path = arguments
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'path' argument".to_string())?;
        let content = arguments
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'content' argument".to_string())?;
        std::fs::write(path, content).map_err(|e| format!("failed to write {path}: {e}"))?;
        Ok(json!({ "bytes_written": content.len() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_file_and_reports_length() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("out.txt");
        let result = WriteFile
            .execute(json!({"path": file.to_string_lossy(), "content": "hello"}))
            .unwrap();
        assert_eq!(result["bytes_written"], 5);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello");
    }

    #[test]
    fn missing_content_is_an_error() {
        let result = WriteFile.execute(json!({"path": "/tmp/x"}));
        assert!(result.is_err());
    }
}
