//! JSON-schema cleanup for capability input schemas.
//!
//! Remote providers publish full JSON Schema, but OpenAI-compatible model
//! endpoints (Gemini's in particular) reject several keywords. [`sanitize`]
//! strips them recursively and reports what it removed.

use serde_json::{Map, Value};

/// Schema keywords the model client does not accept.
pub const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "$comment",
    "definitions",
    "additionalProperties",
    "unevaluatedProperties",
    "patternProperties",
    "default",
    "examples",
    "title",
    "readOnly",
    "writeOnly",
];

/// Keywords whose value is a single subschema.
const SUBSCHEMA_KEYWORDS: &[&str] = &["items", "not", "additionalItems", "contains"];

/// Keywords whose value is a list of subschemas.
const SUBSCHEMA_LIST_KEYWORDS: &[&str] = &["anyOf", "oneOf", "allOf", "prefixItems"];

/// Remove unsupported keywords in place and return the JSON paths dropped.
///
/// A non-object schema is replaced with an empty object schema.
pub fn sanitize(schema: &mut Value) -> Vec<String> {
    let mut dropped = Vec::new();
    if !schema.is_object() {
        *schema = serde_json::json!({ "type": "object", "properties": {} });
        dropped.push("$".to_string());
        return dropped;
    }
    walk(schema, "$", &mut dropped);

    if let Some(obj) = schema.as_object_mut() {
        obj.entry("type").or_insert_with(|| Value::String("object".into()));
        if obj.get("type").and_then(Value::as_str) == Some("object") {
            obj.entry("properties").or_insert_with(|| Value::Object(Map::new()));
        }
    }
    dropped
}

fn walk(node: &mut Value, path: &str, dropped: &mut Vec<String>) {
    let Some(obj) = node.as_object_mut() else {
        return;
    };

    obj.retain(|key, _| {
        let keep = !UNSUPPORTED_KEYWORDS.contains(&key.as_str());
        if !keep {
            dropped.push(format!("{path}.{key}"));
        }
        keep
    });

    // Property names are user data, not keywords: recurse into their values only.
    if let Some(Value::Object(props)) = obj.get_mut("properties") {
        for (name, prop) in props.iter_mut() {
            walk(prop, &format!("{path}.properties.{name}"), dropped);
        }
    }

    for key in SUBSCHEMA_KEYWORDS {
        if let Some(child) = obj.get_mut(*key) {
            match child {
                Value::Array(items) => {
                    for (i, item) in items.iter_mut().enumerate() {
                        walk(item, &format!("{path}.{key}[{i}]"), dropped);
                    }
                }
                other => walk(other, &format!("{path}.{key}"), dropped),
            }
        }
    }

    for key in SUBSCHEMA_LIST_KEYWORDS {
        if let Some(Value::Array(items)) = obj.get_mut(*key) {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, &format!("{path}.{key}[{i}]"), dropped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_schema_is_untouched() {
        let mut schema = json!({
            "type": "object",
            "properties": { "paper_url": { "type": "string", "description": "Link" } },
            "required": ["paper_url"]
        });
        let before = schema.clone();
        assert!(sanitize(&mut schema).is_empty());
        assert_eq!(schema, before);
    }

    #[test]
    fn drops_unsupported_keywords_recursively() {
        let mut schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "retrieve_related_papersArguments",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "topic": { "type": "string", "title": "Topic" },
                "max_results": { "type": "integer", "default": 3, "title": "Max Results" },
                "filters": {
                    "type": "array",
                    "items": { "type": "string", "examples": ["cs.CL"] }
                }
            }
        });
        let dropped = sanitize(&mut schema);
        assert!(dropped.contains(&"$.$schema".to_string()));
        assert!(dropped.contains(&"$.properties.max_results.default".to_string()));
        assert!(dropped.contains(&"$.properties.filters.items.examples".to_string()));
        assert_eq!(dropped.len(), 7);
        assert!(schema.get("additionalProperties").is_none());
        assert_eq!(schema["properties"]["max_results"], json!({ "type": "integer" }));
    }

    #[test]
    fn property_names_matching_keywords_survive() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "default": { "type": "boolean" }
            }
        });
        assert!(sanitize(&mut schema).is_empty());
        assert!(schema["properties"].get("title").is_some());
        assert!(schema["properties"].get("default").is_some());
    }

    #[test]
    fn any_of_branches_are_cleaned() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "limit": { "anyOf": [ { "type": "integer", "default": 5 }, { "type": "null" } ] }
            }
        });
        let dropped = sanitize(&mut schema);
        assert_eq!(dropped, vec!["$.properties.limit.anyOf[0].default"]);
    }

    #[test]
    fn missing_schema_becomes_empty_object() {
        let mut schema = Value::Null;
        sanitize(&mut schema);
        assert_eq!(schema, json!({ "type": "object", "properties": {} }));

        let mut bare = json!({});
        assert!(sanitize(&mut bare).is_empty());
        assert_eq!(bare["type"], "object");
    }
}
