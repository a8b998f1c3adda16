//! Response Translator, Antigravity target (C6.1, spec §4.6.1).

use serde_json::{Value, json};
use uuid::Uuid;

use crate::envelope::unwrap_response_envelope;

/// Non-streaming path: unwraps the envelope and, when `to_host_output` is
/// set, additionally maps `candidates[0].content.parts` into an OpenAI
/// "Responses" `output` array (text parts become one `message` item,
/// `functionCall` parts become `function_call` items) plus a mapped
/// `usage` object. When unset, the unwrapped Gemini-shaped body is
/// returned as-is.
pub fn translate_non_streaming(raw_body: &Value, to_host_output: bool) -> Value {
    let unwrapped = unwrap_response_envelope(raw_body);
    if !to_host_output {
        return unwrapped;
    }
    build_responses_object(&unwrapped)
}

fn build_responses_object(unwrapped: &Value) -> Value {
    let mut output = Vec::new();
    let mut content_items = Vec::new();

    if let Some(parts) = unwrapped
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                content_items.push(json!({ "type": "output_text", "text": text }));
            } else if let Some(function_call) = part.get("functionCall") {
                let name = function_call.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = function_call.get("args").cloned().unwrap_or_else(|| json!({}));
                output.push(json!({
                    "type": "function_call",
                    "call_id": format!("call_{}", Uuid::new_v4()),
                    "name": name,
                    "arguments": args.to_string(),
                }));
            }
        }
    }

    if !content_items.is_empty() {
        output.insert(
            0,
            json!({ "type": "message", "role": "assistant", "content": content_items }),
        );
    }

    let mut result = json!({ "output": output });
    if let Some(usage_metadata) = unwrapped.get("usageMetadata") {
        result["usage"] = json!({
            "input_tokens": usage_metadata.get("promptTokenCount").and_then(Value::as_i64).unwrap_or(0),
            "output_tokens": usage_metadata.get("candidatesTokenCount").and_then(Value::as_i64).unwrap_or(0),
        });
    }
    result
}

/// Streaming path (spec §9 "Cross-dialect streaming"): forward non-`data:`
/// lines unchanged; for `data:` lines other than `[DONE]`, unwrap the
/// envelope and optionally apply the same host-output transform, then
/// re-emit as `data: <json>\n`. Returns `None` for lines that carry no
/// content worth forwarding (blank keep-alives).
pub fn translate_streaming_line(line: &str, to_host_output: bool) -> Option<String> {
    let Some(payload) = line.strip_prefix("data:") else {
        if line.is_empty() {
            return None;
        }
        return Some(line.to_string());
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Some(line.to_string());
    }
    let Ok(parsed) = serde_json::from_str::<Value>(payload) else {
        tracing::debug!(payload, "unparseable streaming chunk, forwarding unchanged");
        return Some(line.to_string());
    };
    let unwrapped = unwrap_response_envelope(&parsed);
    let transformed = if to_host_output {
        build_responses_object(&unwrapped)
    } else {
        unwrapped
    };
    Some(format!("data: {transformed}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_streaming_unwraps_without_host_transform() {
        let body = json!({ "response": { "candidates": [] } });
        let translated = translate_non_streaming(&body, false);
        assert_eq!(translated, json!({ "candidates": [] }));
    }

    #[test]
    fn non_streaming_maps_text_and_function_call_parts() {
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "internal reasoning", "thought": true },
                        { "text": "hello" },
                        { "functionCall": { "name": "lookup", "args": { "q": "x" } } }
                    ]
                }
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5 }
        });
        let translated = translate_non_streaming(&body, true);
        let output = translated["output"].as_array().unwrap();
        assert_eq!(output[0]["type"], "message");
        assert_eq!(output[0]["content"][0]["text"], "hello");
        assert_eq!(output[1]["type"], "function_call");
        assert_eq!(output[1]["name"], "lookup");
        assert_eq!(translated["usage"]["input_tokens"], 10);
        assert_eq!(translated["usage"]["output_tokens"], 5);
    }

    #[test]
    fn streaming_forwards_non_data_lines_unchanged() {
        assert_eq!(
            translate_streaming_line("event: ping", false),
            Some("event: ping".to_string())
        );
    }

    #[test]
    fn streaming_forwards_done_sentinel_unchanged() {
        assert_eq!(
            translate_streaming_line("data: [DONE]", true),
            Some("data: [DONE]".to_string())
        );
    }

    #[test]
    fn streaming_unwraps_and_reemits_data_lines() {
        let line = r#"data: {"response":{"candidates":[]}}"#;
        let result = translate_streaming_line(line, false).unwrap();
        assert!(result.starts_with("data: "));
        assert!(result.contains("candidates"));
    }
}
