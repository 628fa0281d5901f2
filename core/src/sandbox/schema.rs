//! Hand-rolled validator for the restricted JSON-Schema subset tool
//! manifests are allowed to declare. Deliberately not a full JSON-Schema
//! implementation: the subset is small and fixed, and a custom validator
//! lets error paths read `input.key.subkey: message` the way the kernel's
//! error messages are specified to.

use serde_json::Value;

use crate::error::ValidationError;

fn type_mismatch(path: &str, expected: &str, value: &Value) -> ValidationError {
    ValidationError::ToolInput {
        path: path.to_string(),
        message: format!("expected {expected}, got {}", describe(value)),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

/// Validate `value` against `schema`, the way [`validate_input`] /
/// [`validate_output`] are specified to: the caller supplies the root path
/// prefix (`"input"` or `"output"`).
fn validate(schema: &Value, value: &Value, path: &str) -> Result<(), ValidationError> {
    let Some(ty) = schema.get("type").and_then(Value::as_str) else {
        // No `type` constraint declared: nothing further to check at this node.
        return Ok(());
    };

    match ty {
        "object" => validate_object(schema, value, path),
        "string" => validate_string(schema, value, path),
        "integer" => validate_integer(schema, value, path),
        "boolean" => {
            if !value.is_boolean() {
                return Err(type_mismatch(path, "boolean", value));
            }
            Ok(())
        }
        "array" => {
            if !value.is_array() {
                return Err(type_mismatch(path, "array", value));
            }
            Ok(())
        }
        other => Err(ValidationError::Manifest(format!(
            "unsupported schema type '{other}' at {path}"
        ))),
    }
}

fn validate_object(schema: &Value, value: &Value, path: &str) -> Result<(), ValidationError> {
    let Value::Object(obj) = value else {
        return Err(type_mismatch(path, "object", value));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for req in required {
            let Some(name) = req.as_str() else { continue };
            if !obj.contains_key(name) {
                return Err(ValidationError::ToolInput {
                    path: join_path(path, name),
                    message: "required field missing".to_string(),
                });
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let additional_properties = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    for (key, child_value) in obj {
        match properties.and_then(|p| p.get(key)) {
            Some(child_schema) => validate(child_schema, child_value, &join_path(path, key))?,
            None if !additional_properties => {
                return Err(ValidationError::ToolInput {
                    path: join_path(path, key),
                    message: "additional property not allowed".to_string(),
                });
            }
            None => {}
        }
    }

    Ok(())
}

fn validate_string(schema: &Value, value: &Value, path: &str) -> Result<(), ValidationError> {
    let Some(s) = value.as_str() else {
        return Err(type_mismatch(path, "string", value));
    };

    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if (s.chars().count() as u64) < min {
            return Err(ValidationError::ToolInput {
                path: path.to_string(),
                message: format!("length must be >= {min}"),
            });
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if (s.chars().count() as u64) > max {
            return Err(ValidationError::ToolInput {
                path: path.to_string(),
                message: format!("length must be <= {max}"),
            });
        }
    }
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        let allowed_strs: Vec<&str> = allowed.iter().filter_map(Value::as_str).collect();
        if !allowed_strs.contains(&s) {
            return Err(ValidationError::ToolInput {
                path: path.to_string(),
                message: format!("must be one of {allowed_strs:?}"),
            });
        }
    }
    Ok(())
}

fn validate_integer(schema: &Value, value: &Value, path: &str) -> Result<(), ValidationError> {
    // JSON has no distinct integer/bool kind at the serde_json::Value level
    // beyond Bool vs Number, but booleans must not satisfy an integer schema.
    if value.is_boolean() {
        return Err(type_mismatch(path, "integer", value));
    }
    let Some(n) = value.as_i64() else {
        return Err(type_mismatch(path, "integer", value));
    };
    if let Some(min) = schema.get("minimum").and_then(Value::as_i64) {
        if n < min {
            return Err(ValidationError::ToolInput {
                path: path.to_string(),
                message: format!("must be >= {min}"),
            });
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_i64) {
        if n > max {
            return Err(ValidationError::ToolInput {
                path: path.to_string(),
                message: format!("must be <= {max}"),
            });
        }
    }
    Ok(())
}

pub fn validate_input(schema: &Value, value: &Value) -> Result<(), ValidationError> {
    validate(schema, value, "input")
}

pub fn validate_output(schema: &Value, value: &Value) -> Result<(), ValidationError> {
    validate(schema, value, "output").map_err(|e| match e {
        ValidationError::ToolInput { path, message } => ValidationError::ToolOutput { path, message },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100},
            },
            "required": ["path"],
            "additionalProperties": false,
        })
    }

    #[test]
    fn accepts_well_typed_input() {
        let value = json!({"path": "/tmp/x", "limit": 5});
        assert!(validate_input(&manifest_schema(), &value).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let value = json!({"limit": 5});
        let err = validate_input(&manifest_schema(), &value).unwrap_err();
        assert!(matches!(err, ValidationError::ToolInput { .. }));
    }

    #[test]
    fn rejects_wrong_type() {
        let value = json!({"path": 123});
        assert!(validate_input(&manifest_schema(), &value).is_err());
    }

    #[test]
    fn rejects_extra_property() {
        let value = json!({"path": "/tmp/x", "extra": true});
        assert!(validate_input(&manifest_schema(), &value).is_err());
    }

    #[test]
    fn rejects_out_of_range_integer() {
        let value = json!({"path": "/tmp/x", "limit": 999});
        assert!(validate_input(&manifest_schema(), &value).is_err());
    }

    #[test]
    fn rejects_bool_for_integer() {
        let value = json!({"path": "/tmp/x", "limit": true});
        assert!(validate_input(&manifest_schema(), &value).is_err());
    }

    #[test]
    fn rejects_enum_mismatch() {
        let schema = json!({"type": "string", "enum": ["a", "b"]});
        assert!(validate_input(&schema, &json!("c")).is_err());
        assert!(validate_input(&schema, &json!("a")).is_ok());
    }
}
