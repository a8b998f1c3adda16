//! Request Orchestrator (C7, spec §4.7): the single per-outbound-call
//! state machine tying account selection, token refresh, protocol
//! translation, and rate-limit recovery together. Grounded on the
//! teacher's top-level `siumai` facade dispatch loop, generalized from a
//! single always-available client to the account-rotation/endpoint-
//! fallback loop this system needs.

use std::sync::Arc;

use relay_accounts::AccountManager;
use relay_core::{Account, HostHttpClient, HostHttpRequest, HostHttpResponse, RelayError, RequestType};
use relay_protocol_antigravity as antigravity;
use relay_protocol_qwen as qwen;
use serde_json::Value;
use tracing::{debug, info_span, warn};

use crate::config::RelayConfig;

/// Host-supplied header carrying a session fingerprint for sticky
/// selection (spec §3, §4.4.1). Hosts that don't send one simply get
/// fresh selection every call.
pub const SESSION_HEADER: &str = "x-relay-session-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vendor {
    Antigravity,
    Qwen,
}

fn vendor_name(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::Antigravity => "antigravity",
        Vendor::Qwen => "qwen",
    }
}

/// Recognizes the vendor a URL belongs to, or `None` to pass the call
/// through unchanged (spec §4.7 step 1).
fn detect_vendor(url: &str, config: &RelayConfig) -> Option<Vendor> {
    if config.antigravity_endpoints.iter().any(|endpoint| url.contains(endpoint.as_str()))
        || url.contains("googleapis.com")
    {
        Some(Vendor::Antigravity)
    } else if url.contains("qwen.ai") || url.contains(config.qwen_base_url.as_str()) {
        Some(Vendor::Qwen)
    } else {
        None
    }
}

/// Model id extracted from the body, falling back to a `:model=` path
/// segment some hosts encode directly in the URL.
fn extract_model(body: &Value, url: &str) -> String {
    if let Some(model) = body.get("model").and_then(Value::as_str) {
        return model.to_string();
    }
    url.split("model=").nth(1).map(|rest| rest.split('&').next().unwrap_or(rest).to_string()).unwrap_or_default()
}

/// `RequestType` is a cooldown-pool partition key, not a literal vendor
/// name: Qwen model ids fall into the same `Gemini` bucket as
/// Antigravity's Gemini route because neither uses a dedicated quota
/// pool (spec §9 open question 1 resolution).
fn determine_request_type(model: &str) -> RequestType {
    let lower = model.to_ascii_lowercase();
    if lower.contains("image") {
        RequestType::ImageGen
    } else if lower.contains("claude") {
        RequestType::Claude
    } else {
        RequestType::Gemini
    }
}

fn session_id_from_headers(headers: &[(String, String)]) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(SESSION_HEADER))
        .map(|(_, value)| value.clone())
}

enum AttemptOutcome {
    Done(HostHttpResponse),
    Rotate,
}

pub struct Orchestrator {
    accounts: Arc<AccountManager>,
    http: Arc<dyn HostHttpClient>,
    config: RelayConfig,
}

impl Orchestrator {
    pub fn new(accounts: Arc<AccountManager>, http: Arc<dyn HostHttpClient>, config: RelayConfig) -> Self {
        Self { accounts, http, config }
    }

    /// Drives one outbound call through the full flow (spec §4.7).
    /// `now_ms` is supplied by the host so the core never reads the
    /// system clock directly.
    pub async fn handle(&self, request: HostHttpRequest, now_ms: i64) -> Result<HostHttpResponse, RelayError> {
        let Some(vendor) = detect_vendor(&request.url, &self.config) else {
            return self.http.send(request).await;
        };

        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let model = extract_model(&body, &request.url);
        let request_type = determine_request_type(&model);
        let session_id = session_id_from_headers(&request.headers);
        let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

        let span = info_span!("relay.request", vendor = vendor_name(vendor), model = %model, request_type = ?request_type);
        let _entered = span.enter();

        let account_count = self.accounts.account_count();
        if account_count == 0 {
            return Err(RelayError::NoAccounts);
        }

        let mut account = self.accounts.get_account_for_request(request_type, session_id.as_deref(), now_ms)?;
        let mut attempted: Vec<u32> = Vec::new();
        let max_attempts = 2 * account_count;

        for attempt in 0..max_attempts {
            debug!(attempt, account = %account.identifier(), "selected account for outbound call");
            attempted.push(account.index);

            match self.try_account(vendor, &account, &model, &body, streaming, request_type, now_ms).await? {
                AttemptOutcome::Done(response) => return Ok(response),
                AttemptOutcome::Rotate => match self.accounts.select_fresh(request_type, &attempted, now_ms) {
                    Ok(next) => account = next,
                    Err(err) => return Err(err),
                },
            }
        }

        Err(RelayError::InternalError("exceeded orchestrator attempt ceiling".into()))
    }

    /// One account's full endpoint-fallback loop (spec §4.7 step 4).
    async fn try_account(
        &self,
        vendor: Vendor,
        account: &Account,
        model: &str,
        body: &Value,
        streaming: bool,
        request_type: RequestType,
        now_ms: i64,
    ) -> Result<AttemptOutcome, RelayError> {
        let endpoints = self.endpoints_for(vendor, account);
        let mut access_token = self.accounts.get_valid_access_token(account.index, now_ms).await?;

        for endpoint in &endpoints {
            let built = self.build_request_with_token(vendor, model, body.clone(), account, streaming, endpoint, &access_token)?;
            let mut response = self.http.send(built.request).await?;
            let mut effective_streaming = built.effective_streaming;

            if response.status == 401 {
                access_token = self.accounts.force_refresh_access_token(account.index).await?;
                let retry = self.build_request_with_token(vendor, model, body.clone(), account, streaming, endpoint, &access_token)?;
                let retried = self.http.send(retry.request).await?;
                if retried.status == 401 {
                    return Err(RelayError::ReauthenticationRequired(account.identifier()));
                }
                response = retried;
                effective_streaming = retry.effective_streaming;
            }

            if response.status == 429 || matches!(response.status, 500 | 503 | 529) {
                warn!(status = response.status, account = %account.identifier(), "upstream reported rate limit or server error");
                self.record_cooldown(account, &response, now_ms);
                if self.accounts.is_rate_limited(&account.identifier(), now_ms)
                    && self.another_account_available(request_type, account.index, now_ms)
                {
                    return Ok(AttemptOutcome::Rotate);
                }
                let min_wait = self.accounts.get_min_wait_seconds(now_ms);
                return Ok(AttemptOutcome::Done(synthesize_rate_limited_response(min_wait)));
            }

            if response.status != 200 {
                return Ok(AttemptOutcome::Done(response));
            }

            return self.finish_attempt(vendor, response, effective_streaming, now_ms);
        }

        unreachable!("endpoint list is never empty")
    }

    fn finish_attempt(
        &self,
        vendor: Vendor,
        response: HostHttpResponse,
        effective_streaming: bool,
        now_ms: i64,
    ) -> Result<AttemptOutcome, RelayError> {
        let translated = self.translate_response(vendor, &response, effective_streaming, now_ms)?;
        Ok(AttemptOutcome::Done(translated))
    }

    fn another_account_available(&self, request_type: RequestType, excluding: u32, now_ms: i64) -> bool {
        self.accounts.select_fresh(request_type, std::slice::from_ref(&excluding), now_ms).is_ok()
    }

    fn record_cooldown(&self, account: &Account, response: &HostHttpResponse, now_ms: i64) {
        let retry_after_header = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
            .map(|(_, value)| value.as_str());
        let body_text = String::from_utf8_lossy(&response.body);
        if let Some(parsed) = relay_accounts::parse_rate_limit(response.status, retry_after_header, &body_text) {
            self.accounts.mark_rate_limited(&account.identifier(), parsed, now_ms);
        }
    }

    fn endpoints_for(&self, vendor: Vendor, _account: &Account) -> Vec<String> {
        match vendor {
            Vendor::Antigravity => self.config.antigravity_endpoints.clone(),
            Vendor::Qwen => vec![self.config.qwen_base_url.clone()],
        }
    }

    fn build_request_with_token(
        &self,
        vendor: Vendor,
        model: &str,
        body: Value,
        account: &Account,
        streaming: bool,
        endpoint: &str,
        access_token: &str,
    ) -> Result<BuiltRequest, RelayError> {
        match vendor {
            Vendor::Antigravity => {
                let prepared = antigravity::prepare(model, body, &account.project_id, streaming);
                let plan = antigravity::HeaderPlan { streaming, claude_thinking: prepared.claude_thinking };
                let headers = antigravity::build_headers(prepared.header_style, access_token, plan);
                let url = antigravity::endpoint_url(endpoint, streaming);
                let payload = serde_json::to_vec(&prepared.envelope)
                    .map_err(|err| RelayError::TransformFailure(err.to_string()))?;
                Ok(BuiltRequest {
                    request: HostHttpRequest { method: "POST".to_string(), url, headers, body: payload },
                    effective_streaming: streaming,
                })
            }
            Vendor::Qwen => {
                let (translated, outcome) = qwen::prepare(body, streaming);
                let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
                let headers = vec![
                    ("Authorization".to_string(), format!("Bearer {access_token}")),
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("User-Agent".to_string(), "google-api-nodejs-client/9.0.0".to_string()),
                    ("X-Goog-Api-Client".to_string(), "gl-node/20 gccl/gemini-cli".to_string()),
                    ("Client-Metadata".to_string(), "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED".to_string()),
                ];
                let payload = serde_json::to_vec(&translated).map_err(|err| RelayError::TransformFailure(err.to_string()))?;
                Ok(BuiltRequest {
                    request: HostHttpRequest { method: "POST".to_string(), url, headers, body: payload },
                    effective_streaming: streaming && !outcome.forced_streaming_for_tools,
                })
            }
        }
    }

    /// `effective_streaming` is whether the *host* asked for streaming;
    /// a Qwen call force-streamed only for tool-call reliability is
    /// replayed as one buffered object instead (spec §4.6.2, §9).
    fn translate_response(&self, vendor: Vendor, response: &HostHttpResponse, effective_streaming: bool, now_ms: i64) -> Result<HostHttpResponse, RelayError> {
        match vendor {
            Vendor::Antigravity => {
                if effective_streaming {
                    let text = String::from_utf8_lossy(&response.body);
                    let translated: String = text
                        .lines()
                        .filter_map(|line| antigravity::translate_streaming_line(line, true))
                        .map(|line| format!("{line}\n"))
                        .collect();
                    Ok(HostHttpResponse { status: response.status, headers: response.headers.clone(), body: translated.into_bytes() })
                } else {
                    let parsed: Value = serde_json::from_slice(&response.body).unwrap_or(Value::Null);
                    let translated = antigravity::translate_non_streaming(&parsed, true);
                    let bytes = serde_json::to_vec(&translated).map_err(|err| RelayError::TransformFailure(err.to_string()))?;
                    Ok(HostHttpResponse { status: response.status, headers: response.headers.clone(), body: bytes })
                }
            }
            Vendor::Qwen => {
                let text = String::from_utf8_lossy(&response.body);
                if effective_streaming {
                    let sse = qwen::replay_as_sse(&text, now_ms);
                    Ok(HostHttpResponse { status: response.status, headers: response.headers.clone(), body: sse.into_bytes() })
                } else if text.contains("data:") {
                    let translated = qwen::buffer_forced_stream(&text, now_ms);
                    let bytes = serde_json::to_vec(&translated).map_err(|err| RelayError::TransformFailure(err.to_string()))?;
                    Ok(HostHttpResponse { status: response.status, headers: response.headers.clone(), body: bytes })
                } else {
                    let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    let translated = qwen::translate_non_streaming(&parsed);
                    let bytes = serde_json::to_vec(&translated).map_err(|err| RelayError::TransformFailure(err.to_string()))?;
                    Ok(HostHttpResponse { status: response.status, headers: response.headers.clone(), body: bytes })
                }
            }
        }
    }
}

struct BuiltRequest {
    request: HostHttpRequest,
    effective_streaming: bool,
}

/// Synthesizes the 429 `AllCooled` surfaces to the host (spec §6
/// "Rate-limit surface", §4.7 step 4d).
fn synthesize_rate_limited_response(min_wait_seconds: u64) -> HostHttpResponse {
    let body = serde_json::json!({
        "error": { "message": "all configured accounts are rate-limited", "type": "rate_limit_exceeded" }
    });
    HostHttpResponse {
        status: 429,
        headers: vec![("Retry-After".to_string(), min_wait_seconds.to_string())],
        body: serde_json::to_vec(&body).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_vendor_recognizes_configured_antigravity_endpoints() {
        let config = RelayConfig::default();
        assert_eq!(detect_vendor("https://cloudcode-pa.googleapis.com/v1internal:generateContent", &config), Some(Vendor::Antigravity));
    }

    #[test]
    fn detect_vendor_recognizes_qwen_host() {
        let config = RelayConfig::default();
        assert_eq!(detect_vendor("https://portal.qwen.ai/v1/chat/completions", &config), Some(Vendor::Qwen));
    }

    #[test]
    fn detect_vendor_returns_none_for_unrelated_urls() {
        let config = RelayConfig::default();
        assert_eq!(detect_vendor("https://api.example.com/v1/models", &config), None);
    }

    #[test]
    fn determine_request_type_buckets_claude_and_image_and_else() {
        assert_eq!(determine_request_type("claude-3-7-sonnet"), RequestType::Claude);
        assert_eq!(determine_request_type("imagen-3"), RequestType::ImageGen);
        assert_eq!(determine_request_type("qwen-max"), RequestType::Gemini);
    }

    #[test]
    fn session_id_is_read_case_insensitively() {
        let headers = vec![("X-Relay-Session-Id".to_string(), "abc".to_string())];
        assert_eq!(session_id_from_headers(&headers), Some("abc".to_string()));
    }

    #[test]
    fn synthesized_rate_limit_response_carries_retry_after() {
        let response = synthesize_rate_limited_response(42);
        assert_eq!(response.status, 429);
        assert_eq!(response.headers[0], ("Retry-After".to_string(), "42".to_string()));
    }
}
