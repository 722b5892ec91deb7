//! Minimal JSON-schema validation for structured LLM output.
//!
//! Covers the subset the classification and enhancement schemas use:
//! `type`, `properties`, `required`, `items`, `enum`, numeric bounds and
//! string length bounds. Unknown keywords are ignored.

use serde_json::Value;

/// Validate `value` against `schema`. Returns the first violation as a
/// dotted-path message.
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        check_type(value, expected, path)?;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{}: value not in enum", path));
        }
    }

    if let Some(minimum) = schema_obj.get("minimum").and_then(Value::as_f64) {
        if let Some(n) = value.as_f64() {
            if n < minimum {
                return Err(format!("{}: {} below minimum {}", path, n, minimum));
            }
        }
    }

    if let Some(maximum) = schema_obj.get("maximum").and_then(Value::as_f64) {
        if let Some(n) = value.as_f64() {
            if n > maximum {
                return Err(format!("{}: {} above maximum {}", path, n, maximum));
            }
        }
    }

    if let Some(min_len) = schema_obj.get("minLength").and_then(Value::as_u64) {
        if let Some(s) = value.as_str() {
            if (s.chars().count() as u64) < min_len {
                return Err(format!("{}: shorter than minLength {}", path, min_len));
            }
        }
    }

    if let Some(max_len) = schema_obj.get("maxLength").and_then(Value::as_u64) {
        if let Some(s) = value.as_str() {
            if (s.chars().count() as u64) > max_len {
                return Err(format!("{}: longer than maxLength {}", path, max_len));
            }
        }
    }

    if let Some(max_items) = schema_obj.get("maxItems").and_then(Value::as_u64) {
        if let Some(items) = value.as_array() {
            if (items.len() as u64) > max_items {
                return Err(format!("{}: more than maxItems {}", path, max_items));
            }
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        if let Some(obj) = value.as_object() {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    return Err(format!("{}: missing required field '{}'", path, key));
                }
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        if let Some(obj) = value.as_object() {
            for (key, prop_schema) in properties {
                if let Some(prop_value) = obj.get(key) {
                    validate_at(prop_value, prop_schema, &format!("{}.{}", path, key))?;
                }
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items") {
        if let Some(items) = value.as_array() {
            for (i, item) in items.iter().enumerate() {
                validate_at(item, item_schema, &format!("{}[{}]", path, i))?;
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
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("{}: expected {}", path, expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classification_schema() -> Value {
        json!({
            "type": "object",
            "required": ["segment", "category", "contentType", "confidence"],
            "properties": {
                "segment": {"type": "string", "minLength": 1},
                "category": {"type": "string", "minLength": 1},
                "contentType": {"type": "string", "minLength": 1},
                "organization": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "keyConcepts": {"type": "array", "maxItems": 5, "items": {"type": "string"}},
                "summary": {"type": "string"}
            }
        })
    }

    #[test]
    fn test_valid_classification() {
        let value = json!({
            "segment": "A", "category": "LLM", "contentType": "T",
            "confidence": 0.92, "keyConcepts": ["agents"], "summary": "An LLM tool."
        });
        assert!(validate(&value, &classification_schema()).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let value = json!({"segment": "A", "category": "LLM", "confidence": 0.9});
        let err = validate(&value, &classification_schema()).unwrap_err();
        assert!(err.contains("contentType"));
    }

    #[test]
    fn test_confidence_out_of_range() {
        let value = json!({
            "segment": "A", "category": "LLM", "contentType": "T", "confidence": 1.4
        });
        let err = validate(&value, &classification_schema()).unwrap_err();
        assert!(err.contains("maximum"));
    }

    #[test]
    fn test_wrong_type() {
        let value = json!({
            "segment": 7, "category": "LLM", "contentType": "T", "confidence": 0.5
        });
        let err = validate(&value, &classification_schema()).unwrap_err();
        assert!(err.contains("expected string"));
    }

    #[test]
    fn test_too_many_items() {
        let value = json!({
            "segment": "A", "category": "LLM", "contentType": "T", "confidence": 0.5,
            "keyConcepts": ["a", "b", "c", "d", "e", "f"]
        });
        let err = validate(&value, &classification_schema()).unwrap_err();
        assert!(err.contains("maxItems"));
    }

    #[test]
    fn test_enum() {
        let schema = json!({"type": "string", "enum": ["function", "organization"]});
        assert!(validate(&json!("function"), &schema).is_ok());
        assert!(validate(&json!("other"), &schema).is_err());
    }
}
