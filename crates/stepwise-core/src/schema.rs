//! Minimal JSON-schema subset used by action contracts.
//!
//! Supported keywords: `type`, `const`, `enum`, `required`, `properties`,
//! `additionalProperties: false`, `items`.

use serde_json::Value;

/// Coarse shape of a JSON value, as far as template compatibility cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Scalar,
    Composite,
    Unknown,
}

/// Validate `value` against `schema`. A null schema accepts everything.
pub fn validate_schema(value: &Value, schema: &Value) -> Result<(), String> {
    if schema.is_null() {
        return Ok(());
    }
    validate_value_against_schema(value, schema, "$")
}

fn validate_value_against_schema(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let schema_obj = schema
        .as_object()
        .ok_or_else(|| format!("schema at '{}' must be an object", path))?;

    if let Some(type_spec) = schema_obj.get("type") {
        validate_json_type(value, type_spec, path)?;
    }

    if let Some(constant) = schema_obj.get("const") {
        if value != constant {
            return Err(format!("{} expected const {}", path, constant));
        }
    }

    if let Some(variants) = schema_obj.get("enum").and_then(|v| v.as_array()) {
        if !variants.iter().any(|candidate| candidate == value) {
            return Err(format!("{} is not one of the allowed enum values", path));
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
        let object = value
            .as_object()
            .ok_or_else(|| format!("{} must be an object for required fields", path))?;
        for key in required.iter().filter_map(|v| v.as_str()) {
            if !object.contains_key(key) {
                return Err(format!("{} missing required field '{}'", path, key));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|v| v.as_object()) {
        let object = value
            .as_object()
            .ok_or_else(|| format!("{} must be an object for properties validation", path))?;
        for (key, property_schema) in properties {
            if let Some(child_value) = object.get(key) {
                let child_path = format!("{}.{}", path, key);
                validate_value_against_schema(child_value, property_schema, &child_path)?;
            }
        }

        if schema_obj
            .get("additionalProperties")
            .and_then(|v| v.as_bool())
            == Some(false)
        {
            for key in object.keys() {
                if !properties.contains_key(key) {
                    return Err(format!("{} contains unknown field '{}'", path, key));
                }
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items") {
        let array = value
            .as_array()
            .ok_or_else(|| format!("{} must be an array for items validation", path))?;
        for (idx, item) in array.iter().enumerate() {
            let item_path = format!("{}[{}]", path, idx);
            validate_value_against_schema(item, item_schema, &item_path)?;
        }
    }

    Ok(())
}

fn json_type_matches(type_name: &str, value: &Value) -> bool {
    match type_name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn validate_json_type(value: &Value, type_spec: &Value, path: &str) -> Result<(), String> {
    match type_spec {
        Value::String(type_name) => {
            if json_type_matches(type_name, value) {
                Ok(())
            } else {
                Err(format!("{} expected type '{}'", path, type_name))
            }
        }
        Value::Array(types) => {
            let any_match = types
                .iter()
                .filter_map(|ty| ty.as_str())
                .any(|type_name| json_type_matches(type_name, value));
            if any_match {
                Ok(())
            } else {
                Err(format!("{} did not match any allowed types", path))
            }
        }
        _ => Err(format!("{} schema.type must be string or array", path)),
    }
}

/// All keys under `properties`.
pub fn declared_properties(schema: &Value) -> Vec<String> {
    schema
        .get("properties")
        .and_then(|v| v.as_object())
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

/// Shape of `properties.<key>` as declared by its `type`.
///
/// A union counts as scalar only when every member is scalar, and as
/// composite only when every member is composite.
pub fn property_shape(schema: &Value, key: &str) -> ValueShape {
    let Some(type_spec) = schema
        .get("properties")
        .and_then(|props| props.get(key))
        .and_then(|prop| prop.get("type"))
    else {
        return ValueShape::Unknown;
    };

    let names: Vec<&str> = match type_spec {
        Value::String(name) => vec![name.as_str()],
        Value::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
        _ => return ValueShape::Unknown,
    };
    if names.is_empty() {
        return ValueShape::Unknown;
    }

    let is_composite = |name: &&str| matches!(*name, "object" | "array");
    if names.iter().all(is_composite) {
        ValueShape::Composite
    } else if names.iter().any(is_composite) {
        ValueShape::Unknown
    } else {
        ValueShape::Scalar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_schema_reports_wrong_nested_type() {
        let schema = json!({
            "type": "object",
            "properties": { "count": { "type": "integer" } },
            "required": ["count"]
        });
        assert!(validate_schema(&json!({"count": 3}), &schema).is_ok());
        let err = validate_schema(&json!({"count": "3"}), &schema).expect_err("type");
        assert!(err.contains("$.count expected type 'integer'"));
        let err = validate_schema(&json!({}), &schema).expect_err("required");
        assert!(err.contains("missing required field 'count'"));
    }

    #[test]
    fn test_additional_properties_false_rejects_unknown_keys() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": false
        });
        let err = validate_schema(&json!({"a": "x", "b": 1}), &schema).expect_err("unknown");
        assert!(err.contains("unknown field 'b'"));
    }

    #[test]
    fn test_property_shape_classifies_declared_types() {
        let schema = json!({
            "properties": {
                "text": { "type": "string" },
                "files": { "type": "array" },
                "meta": { "type": ["object", "array"] },
                "mixed": { "type": ["string", "array"] },
                "untyped": {}
            }
        });
        assert_eq!(property_shape(&schema, "text"), ValueShape::Scalar);
        assert_eq!(property_shape(&schema, "files"), ValueShape::Composite);
        assert_eq!(property_shape(&schema, "meta"), ValueShape::Composite);
        assert_eq!(property_shape(&schema, "mixed"), ValueShape::Unknown);
        assert_eq!(property_shape(&schema, "untyped"), ValueShape::Unknown);
        assert_eq!(property_shape(&schema, "absent"), ValueShape::Unknown);
    }
}
