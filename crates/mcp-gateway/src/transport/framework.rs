//! Framework (Standard/Fast) classification, modeled as an enum plus a small
//! capability record rather than branching on raw strings at call sites
//! (spec §9, "duck-typed capability detection").

use serde_json::Value;

use crate::model::Framework;

/// Classify an upstream from its `initialize` response, per spec §4.1.
pub fn classify(server_info: &Value, capabilities: &Value) -> Framework {
    let name_version = format!(
        "{} {}",
        server_info.get("name").and_then(Value::as_str).unwrap_or_default(),
        server_info.get("version").and_then(Value::as_str).unwrap_or_default(),
    )
    .to_ascii_lowercase();

    let fast_markers = ["fastmcp", "fast-mcp", "mcp-fast"];
    if fast_markers.iter().any(|m| name_version.contains(m)) {
        return Framework::Fast;
    }

    if has_rich_capability_shape(capabilities) {
        return Framework::Fast;
    }

    Framework::Standard
}

fn has_rich_capability_shape(capabilities: &Value) -> bool {
    let has_experimental = capabilities.get("experimental").is_some();
    let tools_rich = capabilities
        .get("tools")
        .and_then(Value::as_object)
        .is_some_and(|o| !o.is_empty());
    let resources_rich = capabilities
        .get("resources")
        .and_then(Value::as_object)
        .is_some_and(|o| !o.is_empty());

    has_experimental && (tools_rich || resources_rich)
}

/// For Fast upstreams, nested object/array argument values may need to travel
/// as pre-serialized JSON strings (spec §4.1, "argument encoding").
pub fn encode_arguments(framework: Framework, arguments: Value) -> Value {
    if framework != Framework::Fast {
        return arguments;
    }
    match arguments {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let encoded = match v {
                        Value::Object(_) | Value::Array(_) => {
                            Value::String(v.to_string())
                        }
                        other => other,
                    };
                    (k, encoded)
                })
                .collect(),
        ),
        other => other,
    }
}

/// For Fast upstreams, surface the first `content` text block as `result.text`
/// (spec §4.1, "response unwrapping"). Never changes correctness, only convenience.
pub fn unwrap_response(framework: Framework, result: Value) -> Value {
    if framework != Framework::Fast {
        return result;
    }
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return result;
    };
    let Some(text) = content
        .iter()
        .find_map(|block| block.get("text").and_then(Value::as_str))
    else {
        return result;
    };

    let mut result = result;
    if let Value::Object(ref mut map) = result {
        map.insert("text".to_string(), Value::String(text.to_string()));
    }
    result
}
