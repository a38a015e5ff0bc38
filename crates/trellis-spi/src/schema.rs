//! Schema validation for handler params, outputs and provider configs.
//!
//! A small JSON-schema subset: `type`, `const`, `enum`, `required`,
//! `properties`, `additionalProperties` and `items`. Failures carry
//! fully-qualified key paths.

use serde_json::Value;

use crate::PluginError;

/// Validate `value` against `schema`, labelling errors with `context`
/// (e.g. `"input of action 'build'"`). A null schema accepts anything.
pub fn validate_schema(value: &Value, schema: &Value, context: &str) -> Result<(), PluginError> {
    if schema.is_null() {
        return Ok(());
    }
    validate_at(value, schema, "$").map_err(|(path, reason)| PluginError::Schema {
        context: context.to_string(),
        path,
        reason,
    })
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), (String, String)> {
    let schema_obj = schema
        .as_object()
        .ok_or_else(|| (path.to_string(), "schema must be an object".to_string()))?;

    if let Some(type_spec) = schema_obj.get("type") {
        validate_type(value, type_spec, path)?;
    }

    if let Some(constant) = schema_obj.get("const") {
        if value != constant {
            return Err((path.to_string(), format!("expected const {}", constant)));
        }
    }

    if let Some(variants) = schema_obj.get("enum").and_then(|v| v.as_array()) {
        if !variants.iter().any(|candidate| candidate == value) {
            return Err((
                path.to_string(),
                "not one of the allowed enum values".to_string(),
            ));
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
        let object = value.as_object().ok_or_else(|| {
            (
                path.to_string(),
                "must be an object to satisfy required fields".to_string(),
            )
        })?;
        for key in required.iter().filter_map(|v| v.as_str()) {
            if !object.contains_key(key) {
                return Err((
                    format!("{}.{}", path, key),
                    "missing required field".to_string(),
                ));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|v| v.as_object()) {
        let object = value.as_object().ok_or_else(|| {
            (
                path.to_string(),
                "must be an object for properties validation".to_string(),
            )
        })?;
        for (key, property_schema) in properties {
            if let Some(child) = object.get(key) {
                validate_at(child, property_schema, &format!("{}.{}", path, key))?;
            }
        }
        if schema_obj
            .get("additionalProperties")
            .and_then(|v| v.as_bool())
            == Some(false)
        {
            for key in object.keys() {
                if !properties.contains_key(key) {
                    return Err((
                        format!("{}.{}", path, key),
                        "unknown field".to_string(),
                    ));
                }
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items") {
        let array = value.as_array().ok_or_else(|| {
            (
                path.to_string(),
                "must be an array for items validation".to_string(),
            )
        })?;
        for (idx, item) in array.iter().enumerate() {
            validate_at(item, item_schema, &format!("{}[{}]", path, idx))?;
        }
    }

    Ok(())
}

fn validate_type(value: &Value, type_spec: &Value, path: &str) -> Result<(), (String, String)> {
    let matches = |t: &str, v: &Value| match t {
        "object" => v.is_object(),
        "array" => v.is_array(),
        "string" => v.is_string(),
        "number" => v.is_number(),
        "integer" => v.as_i64().is_some() || v.as_u64().is_some(),
        "boolean" => v.is_boolean(),
        "null" => v.is_null(),
        _ => false,
    };

    match type_spec {
        Value::String(type_name) => {
            if matches(type_name, value) {
                Ok(())
            } else {
                Err((path.to_string(), format!("expected type '{}'", type_name)))
            }
        }
        Value::Array(types) => {
            if types
                .iter()
                .filter_map(|t| t.as_str())
                .any(|t| matches(t, value))
            {
                Ok(())
            } else {
                Err((
                    path.to_string(),
                    "did not match any allowed type".to_string(),
                ))
            }
        }
        _ => Err((
            path.to_string(),
            "schema.type must be a string or array".to_string(),
        )),
    }
}
