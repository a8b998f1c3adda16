//! Request Translator, Qwen target (C5.2, spec §4.5.2).

use serde_json::{Value, json};

use relay_core::schema::sanitize_tool_schema;

use crate::normalize::build_messages;

pub const DEFAULT_MAX_TOKENS: i64 = 8192;

/// The workaround tool injected when the caller defines none, to stop a
/// Qwen misbehavior where the model otherwise emits stray tokens (spec
/// §4.5.2, §9 Open Questions — remove if a future model revision fixes
/// this upstream).
pub const QWEN_DUMMY_TOOL_NAME: &str = "do_not_call_this_tool";

#[derive(Debug, Clone, Default)]
pub struct TranslationOutcome {
    pub forced_streaming_for_tools: bool,
}

/// `/responses` → `/chat/completions`; a bare `/completions` also becomes
/// `/chat/completions`.
pub fn rewrite_url(url: &str) -> String {
    if let Some(prefix) = url.strip_suffix("/responses") {
        return format!("{prefix}/chat/completions");
    }
    if url.ends_with("/completions") && !url.ends_with("/chat/completions") {
        if let Some(prefix) = url.strip_suffix("/completions") {
            return format!("{prefix}/chat/completions");
        }
    }
    url.to_string()
}

/// Transforms a host "Responses"-dialect request body into a Qwen
/// Chat-Completions body. `requested_streaming` is the caller's original
/// `stream` flag; the returned [`TranslationOutcome`] reports whether it
/// was force-enabled for tool-call reliability.
pub fn prepare(mut request: Value, requested_streaming: bool) -> (Value, TranslationOutcome) {
    let mut outcome = TranslationOutcome::default();
    let mut body = serde_json::Map::new();

    let input = request
        .get("input")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    body.insert("messages".to_string(), Value::Array(build_messages(&input)));

    if let Some(model) = request.get("model") {
        body.insert("model".to_string(), model.clone());
    }
    for key in ["temperature", "top_p", "stop"] {
        if let Some(value) = request.get(key) {
            body.insert(key.to_string(), value.clone());
        }
    }
    let max_tokens = request
        .get("max_output_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_MAX_TOKENS);
    body.insert("max_tokens".to_string(), json!(max_tokens));

    let has_real_tools = normalize_tools(&mut request, &mut body);

    let force_streaming = !requested_streaming && has_real_tools;
    let streaming = requested_streaming || force_streaming;
    if force_streaming {
        outcome.forced_streaming_for_tools = true;
    }
    body.insert("stream".to_string(), json!(streaming));
    if streaming {
        body.insert("stream_options".to_string(), json!({ "include_usage": true }));
    }

    (Value::Object(body), outcome)
}

/// Normalizes the `tools` field (accepting both Chat and Responses
/// shapes) and injects the dummy tool when none are defined. Returns
/// whether any *real* (non-dummy) tool ended up in the request.
fn normalize_tools(request: &mut Value, body: &mut serde_json::Map<String, Value>) -> bool {
    let raw_tools = request.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut normalized = Vec::with_capacity(raw_tools.len());
    for tool in &raw_tools {
        if let Some(function) = tool.get("function") {
            let mut function = function.clone();
            if let Some(parameters) = function.get_mut("parameters") {
                sanitize_tool_schema(parameters);
            }
            normalized.push(json!({ "type": "function", "function": function }));
            continue;
        }
        let name = tool.get("name").cloned().unwrap_or(Value::Null);
        let description = tool.get("description").cloned().unwrap_or(Value::Null);
        let mut parameters = tool.get("parameters").cloned().unwrap_or_else(|| json!({ "type": "object" }));
        sanitize_tool_schema(&mut parameters);
        normalized.push(json!({
            "type": "function",
            "function": { "name": name, "description": description, "parameters": parameters },
        }));
    }

    let has_real_tools = !normalized.is_empty();
    if has_real_tools {
        body.insert("tools".to_string(), Value::Array(normalized));
    } else {
        body.insert(
            "tools".to_string(),
            json!([{
                "type": "function",
                "function": {
                    "name": QWEN_DUMMY_TOOL_NAME,
                    "description": "Do not call this tool under any circumstances.",
                    "parameters": { "type": "object", "properties": {} },
                },
            }]),
        );
        body.insert("tool_choice".to_string(), json!("none"));
    }
    has_real_tools
}
