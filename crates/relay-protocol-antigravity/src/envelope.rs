//! The `{project, model, request, userAgent, requestId}` envelope every
//! Antigravity call is wrapped in (spec §4.5.1).

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub const USER_AGENT: &str = "antigravity/0.1.0";

#[derive(Debug, Clone, Serialize)]
pub struct AntigravityEnvelope {
    pub project: String,
    pub model: String,
    pub request: Value,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl AntigravityEnvelope {
    pub fn wrap(project: String, model: String, request: Value) -> Self {
        Self {
            project,
            model,
            request,
            user_agent: USER_AGENT.to_string(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Unwraps the `{response: …}` shape the non-streaming endpoint returns;
/// if the outer `response` key is absent the body is assumed to already
/// be the inner payload.
pub fn unwrap_response_envelope(body: &Value) -> Value {
    body.get("response").cloned().unwrap_or_else(|| body.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrap_assigns_fresh_request_id_and_user_agent() {
        let envelope = AntigravityEnvelope::wrap("proj".into(), "gemini-2.5-pro".into(), json!({}));
        assert_eq!(envelope.project, "proj");
        assert_eq!(envelope.user_agent, USER_AGENT);
        assert!(!envelope.request_id.is_empty());
    }

    #[test]
    fn unwrap_falls_back_to_the_body_itself() {
        let body = json!({ "candidates": [] });
        assert_eq!(unwrap_response_envelope(&body), body);
    }

    #[test]
    fn unwrap_pulls_the_response_key() {
        let inner = json!({ "candidates": [] });
        let body = json!({ "response": inner.clone() });
        assert_eq!(unwrap_response_envelope(&body), inner);
    }
}
