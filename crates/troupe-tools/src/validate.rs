// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Argument validation against the subset of JSON Schema that tool
//! parameter schemas actually use: `type`, `properties`, `required`,
//! `additionalProperties: false`, `enum`, and `items`.
//!
//! Validation happens at the registry boundary so individual tools can
//! assume well-shaped arguments.  The error string is prefixed by the
//! caller (`"schema: …"`) to mark it as a validation failure.

use serde_json::Value;

/// Validate `args` against `schema`.  Returns the first violation found.
pub fn validate_args(args: &Value, schema: &Value) -> Result<(), String> {
    validate_value(args, schema, "arguments")
}

fn validate_value(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
        check_type(value, expected, path)?;
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("{path} must be one of {allowed:?}"));
        }
    }

    if value.is_object() {
        let obj = value.as_object().unwrap();
        let props = schema.get("properties").and_then(|p| p.as_object());

        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for req in required {
                if let Some(name) = req.as_str() {
                    if !obj.contains_key(name) {
                        return Err(format!("missing required parameter '{name}'"));
                    }
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            for key in obj.keys() {
                let known = props.map(|p| p.contains_key(key)).unwrap_or(false);
                if !known {
                    return Err(format!("unknown parameter '{key}'"));
                }
            }
        }

        if let Some(props) = props {
            for (key, sub_schema) in props {
                if let Some(sub_value) = obj.get(key) {
                    validate_value(sub_value, sub_schema, key)?;
                }
            }
        }
    }

    if value.is_array() {
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in value.as_array().unwrap().iter().enumerate() {
                validate_value(item, item_schema, &format!("{path}[{i}]"))?;
            }
        }
    }

    Ok(())
}

fn check_type(value: &Value, expected: &str, path: &str) -> Result<(), String> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        // JSON Schema "integer" admits whole-numbered floats; serde_json
        // parses bare integers as i64/u64, so is_i64/is_u64 covers the wire.
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "null" => value.is_null(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("{path} must be of type {expected}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": "integer" },
                "mode": { "type": "string", "enum": ["fast", "slow"] },
                "names": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    #[test]
    fn valid_args_pass() {
        let args = json!({ "path": "/x", "limit": 10 });
        assert!(validate_args(&args, &schema()).is_ok());
    }

    #[test]
    fn missing_required_rejected() {
        let args = json!({ "limit": 10 });
        let err = validate_args(&args, &schema()).unwrap_err();
        assert!(err.contains("path"));
    }

    #[test]
    fn wrong_type_rejected() {
        let args = json!({ "path": 42 });
        let err = validate_args(&args, &schema()).unwrap_err();
        assert!(err.contains("string"));
    }

    #[test]
    fn unknown_parameter_rejected() {
        let args = json!({ "path": "/x", "bogus": true });
        let err = validate_args(&args, &schema()).unwrap_err();
        assert!(err.contains("bogus"));
    }

    #[test]
    fn enum_violation_rejected() {
        let args = json!({ "path": "/x", "mode": "sideways" });
        assert!(validate_args(&args, &schema()).is_err());
    }

    #[test]
    fn array_item_type_checked() {
        let args = json!({ "path": "/x", "names": ["a", 1] });
        assert!(validate_args(&args, &schema()).is_err());
    }

    #[test]
    fn non_object_arguments_rejected_by_object_schema() {
        let err = validate_args(&Value::Null, &schema()).unwrap_err();
        assert!(err.contains("object"));
    }

    #[test]
    fn schema_without_constraints_accepts_anything() {
        let loose = json!({ "type": "object" });
        assert!(validate_args(&json!({ "anything": 1 }), &loose).is_ok());
    }
}
