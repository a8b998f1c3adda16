//! Response Translator, Qwen target (C6.2, spec §4.6.2).

use std::collections::HashMap;

use serde_json::{Value, json};

struct ToolCallState {
    call_id: String,
    name: Option<String>,
    arguments: String,
    item_added: bool,
    done: bool,
}

/// Drives the Chat-Completions SSE delta stream → Responses-event state
/// machine described in spec §4.6.2. One instance per outbound call;
/// feed every delta chunk through [`Self::feed`] as it arrives, then call
/// [`Self::finish`] once on stream EOF.
pub struct StreamTranslator {
    message_item_id: String,
    created_emitted: bool,
    message_item_added: bool,
    content_part_added: bool,
    message_closed: bool,
    full_content: String,
    tool_calls: Vec<ToolCallState>,
    index_to_position: HashMap<u64, usize>,
    last_usage: Option<Value>,
    sole_tool_hint: Option<String>,
}

impl StreamTranslator {
    pub fn new(now_ms: i64) -> Self {
        Self {
            message_item_id: format!("msg_{now_ms}"),
            created_emitted: false,
            message_item_added: false,
            content_part_added: false,
            message_closed: false,
            full_content: String::new(),
            tool_calls: Vec::new(),
            index_to_position: HashMap::new(),
            last_usage: None,
            sole_tool_hint: None,
        }
    }

    /// The per-index tool-name hint captured at request time, used to
    /// fill a tool-name gap a stream never supplies (spec §4.6.2 step 5).
    pub fn hint_sole_tool_name(&mut self, name: impl Into<String>) {
        self.sole_tool_hint = Some(name.into());
    }

    pub fn feed(&mut self, chunk: &Value) -> Vec<Value> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.get("usage") {
            self.last_usage = Some(usage.clone());
        }

        let delta = chunk.pointer("/choices/0/delta").cloned().unwrap_or_else(|| json!({}));
        let finish_reason = chunk
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);

        let content = delta.get("content").and_then(Value::as_str).filter(|s| !s.is_empty());
        let tool_call_deltas = delta.get("tool_calls").and_then(Value::as_array).filter(|a| !a.is_empty());

        if !self.created_emitted && (content.is_some() || tool_call_deltas.is_some()) {
            events.push(json!({ "type": "response.created" }));
            self.created_emitted = true;
        }
        if !self.message_item_added && (content.is_some() || tool_call_deltas.is_some()) {
            events.push(json!({
                "type": "response.output_item.added",
                "item": { "type": "message", "id": self.message_item_id },
            }));
            self.message_item_added = true;
        }

        if let Some(text) = content {
            if !self.content_part_added {
                events.push(json!({ "type": "response.content_part.added" }));
                self.content_part_added = true;
            }
            events.push(json!({ "type": "response.output_text.delta", "delta": text }));
            self.full_content.push_str(text);
        }

        if let Some(tool_calls) = tool_call_deltas {
            if !self.message_closed {
                self.close_message_events(&mut events);
            }
            for call_delta in tool_calls {
                self.apply_tool_call_delta(call_delta, &mut events);
            }
        }

        if matches!(finish_reason.as_deref(), Some("tool_calls") | Some("function_call")) {
            self.finalize_tool_calls(&mut events);
        }

        events
    }

    fn apply_tool_call_delta(&mut self, call_delta: &Value, events: &mut Vec<Value>) {
        let index = call_delta.get("index").and_then(Value::as_u64).unwrap_or(0);

        let position = match self.index_to_position.get(&index).copied() {
            Some(pos) => pos,
            None => {
                let call_id = call_delta
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{index}"));
                let name = call_delta
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| self.sole_tool_hint.clone());
                let pos = self.tool_calls.len();
                self.tool_calls.push(ToolCallState {
                    call_id: call_id.clone(),
                    name,
                    arguments: String::new(),
                    item_added: true,
                    done: false,
                });
                self.index_to_position.insert(index, pos);
                events.push(json!({
                    "type": "response.output_item.added",
                    "item": {
                        "type": "function_call",
                        "id": format!("fc_{call_id}"),
                        "call_id": call_id,
                        "arguments": "",
                    },
                }));
                pos
            }
        };

        if let Some(name) = call_delta.pointer("/function/name").and_then(Value::as_str) {
            if self.tool_calls[position].name.is_none() {
                self.tool_calls[position].name = Some(name.to_string());
            }
        }

        if let Some(fragment) = call_delta.pointer("/function/arguments").and_then(Value::as_str) {
            self.tool_calls[position].arguments.push_str(fragment);
            let call_id = self.tool_calls[position].call_id.clone();
            events.push(json!({
                "type": "response.function_call_arguments.delta",
                "item_id": format!("fc_{call_id}"),
                "delta": fragment,
            }));
        }
    }

    fn close_message_events(&mut self, events: &mut Vec<Value>) {
        if self.content_part_added {
            events.push(json!({ "type": "response.output_text.done", "text": self.full_content }));
            events.push(json!({ "type": "response.content_part.done" }));
        }
        if self.message_item_added {
            events.push(json!({
                "type": "response.output_item.done",
                "item": {
                    "type": "message",
                    "id": self.message_item_id,
                    "content": [{ "type": "output_text", "text": self.full_content }],
                },
            }));
        }
        self.message_closed = true;
    }

    fn finalize_tool_calls(&mut self, events: &mut Vec<Value>) {
        let sole_name = if self.tool_calls.len() == 1 {
            self.sole_tool_hint.clone()
        } else {
            None
        };
        for tool_call in &mut self.tool_calls {
            if tool_call.done {
                continue;
            }
            if tool_call.arguments.is_empty() {
                tool_call.arguments = "{}".to_string();
            }
            let name = tool_call.name.clone().or_else(|| sole_name.clone()).unwrap_or_default();
            tool_call.name = Some(name.clone());
            let item_id = format!("fc_{}", tool_call.call_id);
            events.push(json!({
                "type": "response.function_call_arguments.done",
                "item_id": item_id,
                "arguments": tool_call.arguments,
            }));
            events.push(json!({
                "type": "response.output_item.done",
                "item": {
                    "type": "function_call",
                    "id": item_id,
                    "call_id": tool_call.call_id,
                    "name": name,
                    "arguments": tool_call.arguments,
                },
            }));
            tool_call.done = true;
        }
    }

    /// EOF: closes the message item if still open, finalizes any
    /// still-open tool calls, and emits `response.completed` with the
    /// composed `output` and usage mapped from the last-seen `usage`
    /// chunk.
    pub fn finish(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        if self.message_item_added && !self.message_closed {
            self.close_message_events(&mut events);
        }
        self.finalize_tool_calls(&mut events);

        let mut output = Vec::new();
        if self.message_item_added {
            output.push(json!({
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": self.full_content }],
            }));
        }
        for tool_call in &self.tool_calls {
            output.push(json!({
                "type": "function_call",
                "call_id": tool_call.call_id,
                "name": tool_call.name.clone().unwrap_or_default(),
                "arguments": tool_call.arguments,
            }));
        }

        let usage = self.last_usage.as_ref().map(map_usage);
        let mut completed = json!({ "output": output });
        if let Some(usage) = usage {
            completed["usage"] = usage;
        }

        events.push(json!({ "type": "response.completed", "response": completed }));
        events
    }
}

fn map_usage(usage: &Value) -> Value {
    json!({
        "input_tokens": usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
        "output_tokens": usage.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0),
        "total_tokens": usage.get("total_tokens").and_then(Value::as_i64).unwrap_or(0),
        "cached_input_tokens": usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0),
    })
}

/// Truly non-streaming path (no tools forced streaming): maps
/// `choices[0].message` into a Responses object with a `message` output
/// item (always present, possibly empty text) plus one `function_call`
/// item per `tool_calls` entry.
pub fn translate_non_streaming(body: &Value) -> Value {
    let message = body.pointer("/choices/0/message").cloned().unwrap_or_else(|| json!({}));
    let text = message.get("content").and_then(Value::as_str).unwrap_or("");
    let mut output = vec![json!({
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "output_text", "text": text }],
    })];
    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            output.push(json!({
                "type": "function_call",
                "call_id": tool_call.get("id").and_then(Value::as_str).unwrap_or_default(),
                "name": tool_call.pointer("/function/name").and_then(Value::as_str).unwrap_or_default(),
                "arguments": tool_call.pointer("/function/arguments").and_then(Value::as_str).unwrap_or_default(),
            }));
        }
    }
    let mut result = json!({ "output": output });
    if let Some(usage) = body.get("usage") {
        result["usage"] = map_usage(usage);
    }
    result
}

/// Genuinely-streaming path: re-emits every translated event as its own
/// `data: <json>\n\n` line, preserving the order `StreamTranslator`
/// produced them in (spec §9 "re-emit events … as they are synthesized").
pub fn replay_as_sse(sse_body: &str, now_ms: i64) -> String {
    let mut translator = StreamTranslator::new(now_ms);
    let mut out = String::new();
    for line in sse_body.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(chunk) => {
                for event in translator.feed(&chunk) {
                    out.push_str(&format!("data: {event}\n\n"));
                }
            }
            Err(_) => tracing::debug!(payload, "unparseable qwen stream chunk, dropping from replay"),
        }
    }
    for event in translator.finish() {
        out.push_str(&format!("data: {event}\n\n"));
    }
    out.push_str("data: [DONE]\n\n");
    out
}

/// Consumes an internally force-streamed SSE body (spec §4.5.2
/// `forcedStreamingForTools`) and replays it as a single buffered
/// Responses object, per `response.completed.response`.
pub fn buffer_forced_stream(sse_body: &str, now_ms: i64) -> Value {
    let mut translator = StreamTranslator::new(now_ms);
    for line in sse_body.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            continue;
        }
        if let Ok(chunk) = serde_json::from_str::<Value>(payload) {
            translator.feed(&chunk);
        }
    }
    translator
        .finish()
        .into_iter()
        .find(|event| event.get("type").and_then(Value::as_str) == Some("response.completed"))
        .and_then(|event| event.get("response").cloned())
        .unwrap_or_else(|| json!({ "output": [] }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_event_ordering_for_text_then_single_tool_call() {
        let mut translator = StreamTranslator::new(0);
        let mut all_events = Vec::new();

        all_events.extend(translator.feed(&json!({ "choices": [{ "delta": { "content": "Hi" } }] })));
        all_events.extend(translator.feed(&json!({
            "choices": [{ "delta": { "tool_calls": [{
                "index": 0, "id": "t1", "function": { "name": "f", "arguments": "{\"a\":1}" }
            }] } }]
        })));
        all_events.extend(translator.feed(&json!({ "choices": [{ "finish_reason": "tool_calls" }] })));
        all_events.extend(translator.finish());

        let types: Vec<&str> = all_events
            .iter()
            .map(|e| e.get("type").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(
            types,
            vec![
                "response.created",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                "response.output_item.added",
                "response.function_call_arguments.delta",
                "response.function_call_arguments.done",
                "response.output_item.done",
                "response.completed",
            ]
        );
        assert_eq!(all_events[3]["delta"], "Hi");
        assert_eq!(all_events[8]["delta"], "{\"a\":1}");
    }

    #[test]
    fn eof_without_explicit_finish_reason_still_closes_tool_calls() {
        let mut translator = StreamTranslator::new(0);
        translator.feed(&json!({
            "choices": [{ "delta": { "tool_calls": [{ "index": 0, "id": "t1", "function": { "name": "f" } }] } }]
        }));
        let events = translator.finish();
        let done_event = events
            .iter()
            .find(|e| e.get("type").and_then(Value::as_str) == Some("response.output_item.done"))
            .unwrap();
        assert_eq!(done_event["item"]["arguments"], "{}");
    }

    #[test]
    fn non_streaming_maps_message_and_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "hello",
                    "tool_calls": [{ "id": "c1", "function": { "name": "f", "arguments": "{}" } }],
                }
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
        });
        let translated = translate_non_streaming(&body);
        assert_eq!(translated["output"][0]["content"][0]["text"], "hello");
        assert_eq!(translated["output"][1]["name"], "f");
        assert_eq!(translated["usage"]["total_tokens"], 5);
    }

    #[test]
    fn buffer_forced_stream_replays_sse_into_one_object() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n";
        let response = buffer_forced_stream(sse, 0);
        assert_eq!(response["output"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn replay_as_sse_emits_one_data_line_per_event_in_order() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n";
        let replayed = replay_as_sse(sse, 0);
        let event_types: Vec<String> = replayed
            .lines()
            .filter(|l| l.starts_with("data: ") && *l != "data: [DONE]")
            .map(|l| {
                let json: Value = serde_json::from_str(l.trim_start_matches("data: ")).unwrap();
                json["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(event_types[0], "response.created");
        assert!(replayed.ends_with("data: [DONE]\n\n"));
    }
}
