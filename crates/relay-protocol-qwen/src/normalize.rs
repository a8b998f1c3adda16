//! `input` → `messages` mapping and tool-continuity normalization
//! (spec §4.5.2).

use serde_json::{Value, json};
use std::collections::HashSet;

/// Builds the Chat-Completions `messages` array from a host "Responses"
/// `input` array, synthesizing missing `function_call` items so every
/// `role:"tool"` message has an immediately preceding assistant message
/// carrying a matching `tool_call_id` (the invariant spec §4.5.2 names).
pub fn build_messages(input: &[Value]) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut seen_call_ids = HashSet::new();

    for item in input {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or("message");
        match item_type {
            "message" => {
                let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
                let role = if role == "developer" { "system" } else { role };
                let content = item.get("content").cloned().unwrap_or(Value::Null);
                messages.push(json!({
                    "role": role,
                    "content": simplify_content(&normalize_content(&content)),
                }));
            }
            "function_call" => {
                let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or_default();
                let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
                let arguments = item
                    .get("arguments")
                    .map(arguments_to_string)
                    .unwrap_or_else(|| "{}".to_string());
                seen_call_ids.insert(call_id.to_string());
                messages.push(function_call_message(call_id, name, &arguments));
            }
            "function_call_output" => {
                // Covers both the bare-unseen-call_id case and the
                // item_reference-preceded case: either way an unseen call_id
                // needs a synthesized function_call before the tool result.
                let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or_default();
                if !seen_call_ids.contains(call_id) {
                    let name = item.get("name").and_then(Value::as_str).unwrap_or("unknown_function");
                    messages.push(function_call_message(call_id, name, "{}"));
                    seen_call_ids.insert(call_id.to_string());
                }
                let output = item
                    .get("output")
                    .map(arguments_to_string)
                    .unwrap_or_default();
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output,
                }));
            }
            // "item_reference" is consumed during normalization and emits nothing.
            _ => {}
        }
    }

    let merged = merge_consecutive_assistant_tool_calls(messages);
    let demoted = demote_orphaned_tool_messages(merged);
    ensure_non_empty_and_well_terminated(demoted)
}

fn function_call_message(call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "role": "assistant",
        "content": Value::Null,
        "tool_calls": [{
            "id": call_id,
            "type": "function",
            "function": { "name": name, "arguments": arguments },
        }],
    })
}

fn arguments_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Converts every content part whose `type ∈ {input_text, output_text}` to
/// `{type:"text", text:…}`.
fn normalize_content(content: &Value) -> Value {
    match content {
        Value::Array(parts) => Value::Array(parts.iter().map(normalize_part).collect()),
        other => other.clone(),
    }
}

fn normalize_part(part: &Value) -> Value {
    let is_text_variant = matches!(
        part.get("type").and_then(Value::as_str),
        Some("input_text") | Some("output_text")
    );
    if is_text_variant {
        let text = part.get("text").and_then(Value::as_str).unwrap_or("");
        return json!({ "type": "text", "text": text });
    }
    part.clone()
}

/// Collapses an all-text content-part array into a plain string.
fn simplify_content(content: &Value) -> Value {
    let Value::Array(parts) = content else {
        return content.clone();
    };
    let mut texts = Vec::with_capacity(parts.len());
    for part in parts {
        let is_text = part.get("type").and_then(Value::as_str) == Some("text");
        match (is_text, part.get("text").and_then(Value::as_str)) {
            (true, Some(text)) => texts.push(text.to_string()),
            _ => return content.clone(),
        }
    }
    Value::String(texts.join(""))
}

fn is_assistant_tool_call_message(message: &Value) -> bool {
    message.get("role").and_then(Value::as_str) == Some("assistant")
        && message.get("tool_calls").and_then(Value::as_array).is_some()
}

fn merge_consecutive_assistant_tool_calls(messages: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(messages.len());
    for message in messages {
        if is_assistant_tool_call_message(&message) {
            if let Some(last) = merged.last_mut() {
                if is_assistant_tool_call_message(last) {
                    let new_calls = message["tool_calls"].as_array().cloned().unwrap_or_default();
                    if let Some(existing) = last.get_mut("tool_calls").and_then(Value::as_array_mut) {
                        existing.extend(new_calls);
                        continue;
                    }
                }
            }
        }
        merged.push(message);
    }
    merged
}

fn demote_orphaned_tool_messages(messages: Vec<Value>) -> Vec<Value> {
    let mut result = Vec::with_capacity(messages.len());
    let mut announced_call_ids: HashSet<String> = HashSet::new();
    for message in messages {
        if is_assistant_tool_call_message(&message) {
            announced_call_ids.clear();
            if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    if let Some(id) = call.get("id").and_then(Value::as_str) {
                        announced_call_ids.insert(id.to_string());
                    }
                }
            }
            result.push(message);
            continue;
        }
        if message.get("role").and_then(Value::as_str) != Some("tool") {
            announced_call_ids.clear();
            result.push(message);
            continue;
        }
        let call_id = message.get("tool_call_id").and_then(Value::as_str).unwrap_or_default();
        if announced_call_ids.contains(call_id) {
            result.push(message);
        } else {
            let content = message.get("content").and_then(Value::as_str).unwrap_or_default();
            result.push(json!({
                "role": "user",
                "content": format!("[Tool result; call_id={call_id}]: {content}"),
            }));
        }
    }
    result
}

fn ensure_non_empty_and_well_terminated(mut messages: Vec<Value>) -> Vec<Value> {
    if messages.is_empty() {
        return vec![json!({ "role": "user", "content": "Hello" })];
    }
    let last_is_well_formed = messages
        .last()
        .map(|m| {
            let role = m.get("role").and_then(Value::as_str);
            matches!(role, Some("user") | Some("tool") | Some("function")) || is_assistant_tool_call_message(m)
        })
        .unwrap_or(false);
    if !last_is_well_formed {
        messages.push(json!({ "role": "user", "content": "Continue." }));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_text_message_maps_and_simplifies() {
        let input = vec![json!({
            "type": "message",
            "role": "user",
            "content": [{ "type": "input_text", "text": "hi" }],
        })];
        let messages = build_messages(&input);
        assert_eq!(messages, vec![json!({ "role": "user", "content": "hi" })]);
    }

    #[test]
    fn developer_role_becomes_system() {
        let input = vec![json!({
            "type": "message",
            "role": "developer",
            "content": [{ "type": "input_text", "text": "be terse" }],
        })];
        let messages = build_messages(&input);
        assert_eq!(messages[0]["role"], "system");
    }

    #[test]
    fn item_reference_then_unseen_function_call_output_synthesizes_stub() {
        let input = vec![
            json!({ "type": "item_reference", "id": "x" }),
            json!({ "type": "function_call_output", "call_id": "x", "name": "fn", "output": "ok" }),
        ];
        let messages = build_messages(&input);
        assert_eq!(
            messages,
            vec![
                json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{ "id": "x", "type": "function", "function": { "name": "fn", "arguments": "{}" } }],
                }),
                json!({ "role": "tool", "tool_call_id": "x", "content": "ok" }),
            ]
        );
    }

    #[test]
    fn consecutive_assistant_tool_calls_are_merged() {
        let input = vec![
            json!({ "type": "function_call", "call_id": "a", "name": "f1", "arguments": "{}" }),
            json!({ "type": "function_call", "call_id": "b", "name": "f2", "arguments": "{}" }),
            json!({ "type": "function_call_output", "call_id": "a", "output": "1" }),
            json!({ "type": "function_call_output", "call_id": "b", "output": "2" }),
        ];
        let messages = build_messages(&input);
        assert_eq!(messages[0]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[2]["role"], "tool");
    }

    #[test]
    fn unseen_function_call_output_without_item_reference_synthesizes_with_default_name() {
        let input = vec![json!({ "type": "function_call_output", "call_id": "missing", "output": "x" })];
        let messages = build_messages(&input);
        assert_eq!(messages[0]["tool_calls"][0]["function"]["name"], "unknown_function");
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], "missing");
    }

    #[test]
    fn empty_input_gets_a_placeholder_message() {
        let messages = build_messages(&[]);
        assert_eq!(messages, vec![json!({ "role": "user", "content": "Hello" })]);
    }

    #[test]
    fn trailing_assistant_without_tool_calls_gets_continue_appended() {
        let input = vec![json!({
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "output_text", "text": "done" }],
        })];
        let messages = build_messages(&input);
        assert_eq!(messages.last().unwrap()["content"], "Continue.");
    }
}
