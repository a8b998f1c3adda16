//! Request Translator, Antigravity target (C5.1, spec §4.5.1).

use serde_json::{Value, json};
use uuid::Uuid;

use relay_core::schema::sanitize_tool_schema;

use crate::envelope::AntigravityEnvelope;
use crate::headers::HeaderStyle;

/// Vendor endpoint fallback order (spec §6).
pub const ENDPOINT_FALLBACK: &[&str] = &[
    "daily-cloudcode-pa.sandbox.googleapis.com",
    "cloudcode-pa.googleapis.com",
];

const THINKING_BUDGET_LOW: i64 = 8192;
const THINKING_BUDGET_MEDIUM: i64 = 16384;
const THINKING_BUDGET_HIGH: i64 = 32768;

const INTERLEAVED_THINKING_HINT: &str =
    "You may interleave brief reasoning between tool calls; keep each thinking block short.";

#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub base_model: String,
    pub thinking_budget: Option<i64>,
}

/// Strips an optional `<provider>:` prefix and a `-low|-medium|-high`
/// tier suffix, returning the bare model id the vendor API expects plus
/// the thinking budget the suffix implied, if any.
pub fn resolve_model(model_id: &str) -> ResolvedModel {
    let without_provider = model_id.split_once(':').map(|(_, id)| id).unwrap_or(model_id);

    for (suffix, budget) in [
        ("-low", THINKING_BUDGET_LOW),
        ("-medium", THINKING_BUDGET_MEDIUM),
        ("-high", THINKING_BUDGET_HIGH),
    ] {
        if let Some(base) = without_provider.strip_suffix(suffix) {
            return ResolvedModel {
                base_model: base.to_string(),
                thinking_budget: Some(budget),
            };
        }
    }

    ResolvedModel {
        base_model: without_provider.to_string(),
        thinking_budget: None,
    }
}

pub fn is_claude_model(base_model: &str) -> bool {
    base_model.to_ascii_lowercase().contains("claude")
}

pub fn endpoint_url(endpoint: &str, streaming: bool) -> String {
    if streaming {
        format!("https://{endpoint}/v1internal:streamGenerateContent?alt=sse")
    } else {
        format!("https://{endpoint}/v1internal:generateContent")
    }
}

pub struct PreparedRequest {
    pub envelope: AntigravityEnvelope,
    pub header_style: HeaderStyle,
    pub claude_thinking: bool,
}

/// Transforms an inbound Gemini-shaped request (`contents`,
/// `systemInstruction`, `tools`, `generationConfig`) into the envelope the
/// vendor expects.
pub fn prepare(model_id: &str, mut request: Value, project_id: &str, streaming: bool) -> PreparedRequest {
    let resolved = resolve_model(model_id);
    let claude = is_claude_model(&resolved.base_model);
    let has_tools = request
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|a| !a.is_empty())
        .unwrap_or(false);

    let obj = request.as_object_mut().expect("gemini request body is an object");
    sanitize_declared_tool_schemas(obj);

    if claude {
        if has_tools {
            obj.insert(
                "toolConfig".to_string(),
                json!({ "functionCallingConfig": { "mode": "VALIDATED" } }),
            );
        } else {
            obj.remove("toolConfig");
            obj.remove("tools");
        }
    }

    let mut claude_thinking = false;
    if claude {
        if let Some(budget) = resolved.thinking_budget {
            claude_thinking = true;
            let generation_config = obj
                .entry("generationConfig")
                .or_insert_with(|| json!({}))
                .as_object_mut()
                .expect("generationConfig must be an object");
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({ "include_thoughts": true, "thinking_budget": budget }),
            );

            if has_tools {
                append_interleaved_thinking_hint(obj);
            }
        }
    }

    obj.insert(
        "sessionId".to_string(),
        Value::String(format!("sess-{}", Uuid::new_v4())),
    );

    let envelope = AntigravityEnvelope::wrap(project_id.to_string(), resolved.base_model, request);
    PreparedRequest {
        envelope,
        header_style: if claude { HeaderStyle::Antigravity } else { HeaderStyle::GeminiCli },
        claude_thinking,
    }
}

/// Applies the shared schema sanitizer (spec §4.5.3) to every declared
/// function's `parameters` schema in-place, before the envelope is built.
fn sanitize_declared_tool_schemas(obj: &mut serde_json::Map<String, Value>) {
    let Some(tools) = obj.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };
    for tool in tools {
        let Some(declarations) = tool.get_mut("functionDeclarations").and_then(Value::as_array_mut) else {
            continue;
        };
        for declaration in declarations {
            if let Some(parameters) = declaration.get_mut("parameters") {
                sanitize_tool_schema(parameters);
            }
        }
    }
}

fn append_interleaved_thinking_hint(obj: &mut serde_json::Map<String, Value>) {
    let system_instruction = obj.entry("systemInstruction").or_insert_with(|| json!({ "parts": [] }));
    if !system_instruction.is_object() {
        *system_instruction = json!({ "parts": [] });
    }
    let si_obj = system_instruction.as_object_mut().expect("just normalized to an object");
    let parts = si_obj.entry("parts").or_insert_with(|| json!([]));
    if !parts.is_array() {
        *parts = json!([]);
    }
    parts
        .as_array_mut()
        .expect("just normalized to an array")
        .push(json!({ "text": INTERLEAVED_THINKING_HINT }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_provider_prefix_and_tier_suffix() {
        let resolved = resolve_model("anthropic:claude-3-7-sonnet-high");
        assert_eq!(resolved.base_model, "claude-3-7-sonnet");
        assert_eq!(resolved.thinking_budget, Some(THINKING_BUDGET_HIGH));
    }

    #[test]
    fn no_suffix_means_no_thinking_budget() {
        let resolved = resolve_model("gemini-2.5-pro");
        assert_eq!(resolved.base_model, "gemini-2.5-pro");
        assert_eq!(resolved.thinking_budget, None);
    }

    #[test]
    fn claude_with_tools_sets_validated_mode() {
        let request = json!({ "contents": [], "tools": [{ "functionDeclarations": [] }] });
        let prepared = prepare("claude-3-7-sonnet", request, "proj", false);
        assert_eq!(
            prepared.envelope.request["toolConfig"]["functionCallingConfig"]["mode"],
            "VALIDATED"
        );
    }

    #[test]
    fn claude_without_tools_drops_tool_config_and_tools() {
        let request = json!({ "contents": [], "toolConfig": { "x": 1 } });
        let prepared = prepare("claude-3-7-sonnet", request, "proj", false);
        assert!(prepared.envelope.request.get("toolConfig").is_none());
        assert!(prepared.envelope.request.get("tools").is_none());
    }

    #[test]
    fn thinking_model_with_tools_appends_hint() {
        let request = json!({ "contents": [], "tools": [{ "functionDeclarations": [] }] });
        let prepared = prepare("claude-3-7-sonnet-medium", request, "proj", false);
        assert!(prepared.claude_thinking);
        assert_eq!(
            prepared.envelope.request["generationConfig"]["thinkingConfig"]["thinking_budget"],
            THINKING_BUDGET_MEDIUM
        );
        let parts = prepared.envelope.request["systemInstruction"]["parts"].as_array().unwrap();
        assert!(parts.iter().any(|p| p["text"] == INTERLEAVED_THINKING_HINT));
    }

    #[test]
    fn declared_tool_parameter_schemas_are_sanitized_before_wrapping() {
        let request = json!({
            "contents": [],
            "tools": [{
                "functionDeclarations": [{
                    "name": "search",
                    "parameters": {
                        "type": "object",
                        "$schema": "http://json-schema.org/draft-07/schema#",
                        "properties": { "query": { "type": "string", "minLength": 1 } }
                    }
                }]
            }]
        });
        let prepared = prepare("gemini-2.5-pro", request, "proj", false);
        let declarations = prepared.envelope.request["tools"][0]["functionDeclarations"].as_array().unwrap();
        let parameters = &declarations[0]["parameters"];
        assert!(!parameters.as_object().unwrap().contains_key("$schema"));
        assert_eq!(parameters["properties"]["query"]["description"], "(minLength: 1)");
    }

    #[test]
    fn non_claude_model_ignores_tool_config_rules() {
        let request = json!({ "contents": [], "tools": [{ "functionDeclarations": [] }] });
        let prepared = prepare("gemini-2.5-pro", request, "proj", false);
        assert!(prepared.envelope.request.get("toolConfig").is_none());
        assert_eq!(prepared.header_style, HeaderStyle::GeminiCli);
    }

    proptest::proptest! {
        /// For any bare model id free of `:`/tier suffixes, prepending a
        /// provider prefix and/or appending a tier suffix always strips
        /// back down to exactly that bare id, with the budget the suffix
        /// implies (or none for a bare id).
        #[test]
        fn prefix_and_suffix_strip_back_to_the_bare_model_id(
            base in "[a-z][a-z0-9.-]{2,20}",
            provider in proptest::option::of("[a-z]{3,8}"),
            tier in proptest::sample::select(vec!["", "-low", "-medium", "-high"]),
        ) {
            proptest::prop_assume!(!base.ends_with("-low") && !base.ends_with("-medium") && !base.ends_with("-high"));
            let with_tier = format!("{base}{tier}");
            let model_id = match &provider {
                Some(p) => format!("{p}:{with_tier}"),
                None => with_tier,
            };
            let resolved = resolve_model(&model_id);
            proptest::prop_assert_eq!(resolved.base_model, base.clone());
            let expected_budget = match tier {
                "-low" => Some(THINKING_BUDGET_LOW),
                "-medium" => Some(THINKING_BUDGET_MEDIUM),
                "-high" => Some(THINKING_BUDGET_HIGH),
                _ => None,
            };
            proptest::prop_assert_eq!(resolved.thinking_budget, expected_budget);
        }
    }
}
