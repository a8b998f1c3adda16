//! Tool-parameter JSON Schema sanitizer shared by both protocol bridges
//! (spec §4.5.3). Vendors reject constraint/structural keywords that the
//! host's tool schemas routinely carry, so every schema handed to a vendor
//! passes through here first.

use serde_json::{Map, Value};

/// Constraint keywords whose value is folded into `description` as a hint
/// rather than dropped silently.
const HINTED_KEYWORDS: &[&str] = &[
    "minLength",
    "maxLength",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "pattern",
    "minItems",
    "maxItems",
    "format",
    "default",
    "examples",
];

/// Structural keywords that are simply not supported and carry no useful
/// hint for the model.
const DROPPED_KEYWORDS: &[&str] = &[
    "$schema",
    "$defs",
    "definitions",
    "const",
    "$ref",
    "additionalProperties",
    "propertyNames",
    "title",
    "$id",
    "$comment",
];

/// Sanitize a tool-parameter schema in place, recursing into every nested
/// subschema position (`properties`, `items`, `anyOf`/`oneOf`/`allOf`,
/// `not`). Property *names* under `properties` are never interpreted as
/// keywords, even if they shadow one (e.g. a property literally named
/// `"default"`).
pub fn sanitize_tool_schema(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };
    sanitize_object(obj);
}

fn sanitize_object(obj: &mut Map<String, Value>) {
    strip_dropped_keywords(obj);
    fold_hinted_keywords(obj);
    recurse_into_subschemas(obj);
    placeholder_if_propertyless_object(obj);
}

fn strip_dropped_keywords(obj: &mut Map<String, Value>) {
    for key in DROPPED_KEYWORDS {
        obj.remove(*key);
    }
}

fn fold_hinted_keywords(obj: &mut Map<String, Value>) {
    let mut hints = Vec::new();
    for key in HINTED_KEYWORDS {
        if let Some(value) = obj.remove(*key) {
            hints.push(format!("({key}: {})", render_hint_value(&value)));
        }
    }
    if hints.is_empty() {
        return;
    }
    let hint_text = hints.join(" ");
    let description = obj
        .entry("description")
        .or_insert_with(|| Value::String(String::new()));
    if let Value::String(existing) = description {
        if existing.is_empty() {
            *existing = hint_text;
        } else {
            *existing = format!("{existing} {hint_text}");
        }
    }
}

fn render_hint_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn recurse_into_subschemas(obj: &mut Map<String, Value>) {
    if let Some(Value::Object(properties)) = obj.get_mut("properties") {
        for (_, subschema) in properties.iter_mut() {
            if let Some(sub_obj) = subschema.as_object_mut() {
                sanitize_object(sub_obj);
            }
        }
    }

    match obj.get_mut("items") {
        Some(Value::Object(item_obj)) => sanitize_object(item_obj),
        Some(Value::Array(items)) => {
            for item in items.iter_mut() {
                if let Some(item_obj) = item.as_object_mut() {
                    sanitize_object(item_obj);
                }
            }
        }
        _ => {}
    }

    for combinator in ["anyOf", "oneOf", "allOf"] {
        if let Some(Value::Array(subschemas)) = obj.get_mut(combinator) {
            for subschema in subschemas.iter_mut() {
                if let Some(sub_obj) = subschema.as_object_mut() {
                    sanitize_object(sub_obj);
                }
            }
        }
    }

    if let Some(Value::Object(not_obj)) = obj.get_mut("not") {
        sanitize_object(not_obj);
    }
}

/// VALIDATED mode (spec §4.5.1) rejects parameter-less tools; an object
/// schema with no `properties` gets a single placeholder property so the
/// call remains well-formed.
fn placeholder_if_propertyless_object(obj: &mut Map<String, Value>) {
    let is_object_type = matches!(obj.get("type"), Some(Value::String(t)) if t == "object");
    if !is_object_type {
        return;
    }
    let has_properties = matches!(obj.get("properties"), Some(Value::Object(props)) if !props.is_empty());
    if has_properties {
        return;
    }

    let mut properties = Map::new();
    properties.insert(
        "_placeholder".to_string(),
        serde_json::json!({
            "type": "boolean",
            "description": "Placeholder. Always pass true."
        }),
    );
    obj.insert("properties".to_string(), Value::Object(properties));
    obj.insert(
        "required".to_string(),
        Value::Array(vec![Value::String("_placeholder".to_string())]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hinted_keyword_is_folded_into_description() {
        let mut schema = json!({
            "type": "string",
            "minLength": 3,
            "description": "a name"
        });
        sanitize_tool_schema(&mut schema);
        assert_eq!(schema["minLength"], Value::Null);
        assert!(!schema.as_object().unwrap().contains_key("minLength"));
        assert_eq!(schema["description"], "a name (minLength: 3)");
    }

    #[test]
    fn hinted_keyword_without_existing_description() {
        let mut schema = json!({ "type": "string", "format": "email" });
        sanitize_tool_schema(&mut schema);
        assert_eq!(schema["description"], "(format: email)");
    }

    #[test]
    fn dropped_keywords_are_removed_outright() {
        let mut schema = json!({
            "type": "object",
            "$schema": "http://json-schema.org/draft-07/schema#",
            "additionalProperties": false,
            "properties": { "x": { "type": "number" } }
        });
        sanitize_tool_schema(&mut schema);
        let obj = schema.as_object().unwrap();
        assert!(!obj.contains_key("$schema"));
        assert!(!obj.contains_key("additionalProperties"));
    }

    #[test]
    fn property_named_default_is_not_treated_as_a_keyword() {
        let mut schema = json!({
            "type": "object",
            "properties": { "default": { "type": "string" } }
        });
        sanitize_tool_schema(&mut schema);
        assert!(schema["properties"]["default"].is_object());
    }

    #[test]
    fn propertyless_object_gets_placeholder() {
        let mut schema = json!({ "type": "object" });
        sanitize_tool_schema(&mut schema);
        assert_eq!(schema["required"], json!(["_placeholder"]));
        assert!(schema["properties"]["_placeholder"].is_object());
    }

    #[test]
    fn recurses_into_nested_properties_and_items() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "minItems": 1,
                    "items": { "type": "string", "pattern": "^[a-z]+$" }
                }
            }
        });
        sanitize_tool_schema(&mut schema);
        assert_eq!(
            schema["properties"]["tags"]["description"],
            "(minItems: 1)"
        );
        assert_eq!(
            schema["properties"]["tags"]["items"]["description"],
            "(pattern: ^[a-z]+$)"
        );
    }

    fn arb_schema() -> impl proptest::strategy::Strategy<Value = Value> {
        use proptest::prelude::*;
        let leaf = prop_oneof![
            Just(json!({ "type": "string" })),
            Just(json!({ "type": "string", "minLength": 1 })),
            Just(json!({ "type": "string", "pattern": "^[a-z]+$" })),
            Just(json!({ "type": "number", "default": 0 })),
            Just(json!({ "type": "object", "$schema": "ignored", "additionalProperties": false })),
        ];
        leaf.prop_recursive(3, 8, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(|item| json!({ "type": "array", "minItems": 1, "items": item })),
                prop::collection::vec((("[a-z]{1,6}"), inner), 0..3).prop_map(|props| {
                    let properties: Map<String, Value> = props.into_iter().collect();
                    json!({ "type": "object", "properties": Value::Object(properties) })
                }),
            ]
        })
    }

    proptest::proptest! {
        /// Sanitizing twice is the same as sanitizing once: every dropped
        /// keyword is already gone and every hinted keyword already folded,
        /// so the second pass has nothing left to do.
        #[test]
        fn sanitizing_is_idempotent(mut schema in arb_schema()) {
            sanitize_tool_schema(&mut schema);
            let once = schema.clone();
            sanitize_tool_schema(&mut schema);
            proptest::prop_assert_eq!(schema, once);
        }
    }
}
