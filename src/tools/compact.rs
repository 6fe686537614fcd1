//! Reduced tool definitions for compact mode.

use super::traits::ToolSpec;
use serde_json::{Map, Value};

/// Tools that stay visible to the model in compact mode.
pub const COMPACT_TOOL_ALLOWLIST: &[&str] = &[
    "read",
    "write",
    "edit",
    "exec",
    "process",
    "message",
    "web_search",
    "web_fetch",
    "memory_search",
];

pub fn is_compact_tool(name: &str) -> bool {
    COMPACT_TOOL_ALLOWLIST.contains(&name)
}

/// Keep the top-level `type`, the `required` list, and each required property
/// reduced to its `type` and `enum`. Descriptions, defaults and optional
/// properties are dropped.
pub fn minimal_schema(schema: &Value) -> Value {
    let Some(object) = schema.as_object() else {
        return serde_json::json!({ "type": "object", "properties": {} });
    };

    let required: Vec<&str> = object
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut properties = Map::new();
    if let Some(all) = object.get("properties").and_then(Value::as_object) {
        for name in &required {
            let Some(property) = all.get(*name) else {
                continue;
            };
            let mut reduced = Map::new();
            for key in ["type", "enum"] {
                if let Some(value) = property.get(key) {
                    reduced.insert(key.to_string(), value.clone());
                }
            }
            properties.insert((*name).to_string(), Value::Object(reduced));
        }
    }

    let mut minimal = Map::new();
    minimal.insert(
        "type".into(),
        object
            .get("type")
            .cloned()
            .unwrap_or_else(|| Value::String("object".into())),
    );
    minimal.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        minimal.insert(
            "required".into(),
            Value::Array(required.iter().map(|name| Value::String((*name).into())).collect()),
        );
    }
    Value::Object(minimal)
}

/// First sentence or line of a description, for compact listings.
pub fn one_line_description(description: &str) -> &str {
    let line = description.lines().next().unwrap_or_default().trim();
    match line.find(". ") {
        Some(idx) => &line[..=idx],
        None => line,
    }
}

/// Filter to the allow-list and shrink each schema.
pub fn compact_specs(specs: Vec<ToolSpec>) -> Vec<ToolSpec> {
    specs
        .into_iter()
        .filter(|spec| is_compact_tool(&spec.name))
        .map(|spec| ToolSpec {
            description: one_line_description(&spec.description).to_string(),
            parameters: minimal_schema(&spec.parameters),
            name: spec.name,
        })
        .collect()
}
