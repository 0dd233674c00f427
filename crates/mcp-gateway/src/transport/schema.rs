//! JSON Schema normalization for `list_tools` (spec §4.1 "Schema normalization").
//!
//! Normalization is pure: the raw server schema is never mutated in place,
//! only projected into a usable shape for the aggregator.

use serde_json::{json, Value};

/// Normalize a single tool's input schema.
pub fn normalize_input_schema(name: &str, raw: Option<&Value>) -> Value {
    let schema = match raw {
        None => synthesize_schema(name),
        Some(v) if is_empty_schema(v) => synthesize_schema(name),
        Some(v) => v.clone(),
    };
    ensure_object_shape(schema)
}

fn is_empty_schema(v: &Value) -> bool {
    matches!(v, Value::Null) || matches!(v, Value::Object(m) if m.is_empty())
}

fn synthesize_schema(name: &str) -> Value {
    let lower = name.to_ascii_lowercase();
    let mut properties = serde_json::Map::new();

    if lower.contains("search") || lower.contains("find") {
        properties.insert("query".to_string(), json!({"type": "string"}));
    }
    if lower.contains("read") || lower.contains("get") {
        properties.insert("path".to_string(), json!({"type": "string"}));
        properties.insert("uri".to_string(), json!({"type": "string"}));
    }
    if lower.contains("write") || lower.contains("update") {
        properties.insert("content".to_string(), json!({"type": "string"}));
    }
    if lower.contains("file") || lower.contains("path") {
        properties.insert("file_path".to_string(), json!({"type": "string"}));
    }

    json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": true,
    })
}

fn ensure_object_shape(mut schema: Value) -> Value {
    let Value::Object(ref mut map) = schema else {
        return schema;
    };
    map.entry("type").or_insert_with(|| json!("object"));
    if map.get("type").and_then(Value::as_str) == Some("object") {
        map.entry("properties").or_insert_with(|| json!({}));
    }
    schema
}

/// Fast-upstream `arguments: [{name,type,required,description}]` shape, converted
/// into JSON Schema `properties` + `required` (spec §4.1, rule 3).
pub fn convert_fast_arguments(arguments: &[Value]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for arg in arguments {
        let Some(name) = arg.get("name").and_then(Value::as_str) else {
            continue;
        };
        let ty = arg.get("type").and_then(Value::as_str).unwrap_or("string");
        let mut prop = serde_json::Map::new();
        prop.insert("type".to_string(), json!(ty));
        if let Some(desc) = arg.get("description").and_then(Value::as_str) {
            prop.insert("description".to_string(), json!(desc));
        }
        properties.insert(name.to_string(), Value::Object(prop));

        if arg.get("required").and_then(Value::as_bool).unwrap_or(false) {
            required.push(json!(name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schema_synthesizes_object() {
        let schema = normalize_input_schema("echo", None);
        assert_eq!(schema["type"], json!("object"));
        assert_eq!(schema["additionalProperties"], json!(true));
    }

    #[test]
    fn empty_object_schema_synthesizes_hints() {
        let schema = normalize_input_schema("search_docs", Some(&json!({})));
        assert!(schema["properties"].get("query").is_some());
    }

    #[test]
    fn file_path_hint_injected() {
        let schema = normalize_input_schema("read_file", Some(&json!(null)));
        assert!(schema["properties"].get("file_path").is_some());
        assert!(schema["properties"].get("path").is_some());
    }

    #[test]
    fn present_schema_left_mostly_untouched() {
        let raw = json!({"type": "object", "properties": {"x": {"type": "number"}}});
        let schema = normalize_input_schema("custom", Some(&raw));
        assert_eq!(schema, raw);
    }

    #[test]
    fn object_without_properties_gets_empty_map() {
        let raw = json!({"type": "object"});
        let schema = normalize_input_schema("custom", Some(&raw));
        assert_eq!(schema["properties"], json!({}));
    }

    #[test]
    fn fast_arguments_convert_to_json_schema() {
        let args = vec![
            json!({"name": "q", "type": "string", "required": true}),
            json!({"name": "limit", "type": "number"}),
        ];
        let schema = convert_fast_arguments(&args);
        assert_eq!(schema["properties"]["q"]["type"], json!("string"));
        assert_eq!(schema["required"], json!(["q"]));
    }
}
