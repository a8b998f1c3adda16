//! Google OAuth 2.0 Authorization-Code+PKCE flow for the Antigravity
//! backend (spec §4.1).
//!
//! Grounded on `other_examples/2a779f28_dfft546-gproxy…antigravity-oauth.rs`
//! (authorize-URL shape, project-id discovery probe sequence, userinfo
//! best-effort fetch) adapted to this crate's `RelayError`/`Tokens` types
//! and the teacher's manual-`reqwest`-client style
//! (`siumai-core::auth::adc`).

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use relay_core::RelayError;
use serde::Deserialize;

use crate::pkce::generate_pkce;
use crate::types::{AuthorizationStart, StatePayload, Tokens};

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v1/userinfo?alt=json";
const REDIRECT_PORT: u16 = 51121;
const OAUTH_SCOPE: &str =
    "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/userinfo.email";

/// Vendor-dependent sequence of endpoints probed to discover a project id
/// when the caller didn't already know one (spec §4.1).
const PROJECT_DISCOVERY_ENDPOINTS: &[&str] = &[
    "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal:loadCodeAssist",
    "https://cloudcode-pa.googleapis.com/v1internal:loadCodeAssist",
];

const DEFAULT_PROJECT_ID: &str = "antigravity-default";

#[derive(Debug, Clone)]
pub struct AntigravityOAuth {
    http: reqwest::Client,
    client_id: String,
}

impl AntigravityOAuth {
    pub fn new(http: reqwest::Client, client_id: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
        }
    }

    pub fn start_authorization_code_flow(&self) -> AuthorizationStart {
        let pkce = generate_pkce();
        let state_payload = StatePayload {
            verifier: pkce.verifier.clone(),
            project_id: String::new(),
        };
        let state = encode_state(&state_payload);
        let redirect_uri = format!("http://localhost:{REDIRECT_PORT}/oauth-callback");
        let authorization_url = build_authorize_url(&self.client_id, &redirect_uri, &state, &pkce.challenge);
        AuthorizationStart {
            authorization_url,
            verifier: pkce.verifier,
            state,
        }
    }

    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<Tokens, RelayError> {
        let payload = decode_state(state)?;
        if payload.verifier.is_empty() {
            return Err(RelayError::InvalidState);
        }
        let redirect_uri = format!("http://localhost:{REDIRECT_PORT}/oauth-callback");
        let t0 = now_ms();
        let body = format!(
            "code={}&client_id={}&redirect_uri={}&code_verifier={}&grant_type=authorization_code",
            urlencoding::encode(code),
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&payload.verifier),
        );
        let raw = self.post_token(DEFAULT_TOKEN_URL, body).await?;
        let refresh_token = raw
            .refresh_token
            .clone()
            .ok_or(RelayError::MissingRefreshToken)?;
        let expires_at = t0 + raw.expires_in.unwrap_or(3600) * 1000;

        let email = self.fetch_user_email(&raw.access_token).await.ok().flatten();

        let project_id = if payload.project_id.is_empty() {
            self.discover_project_id(&raw.access_token)
                .await
                .unwrap_or(None)
                .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string())
        } else {
            payload.project_id
        };

        Ok(Tokens {
            access_token: raw.access_token,
            refresh_token,
            expires_at,
            project_id: Some(project_id),
            email,
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Tokens, RelayError> {
        let t0 = now_ms();
        let body = format!(
            "refresh_token={}&client_id={}&grant_type=refresh_token",
            urlencoding::encode(refresh_token),
            urlencoding::encode(&self.client_id),
        );
        let raw = self.post_token(DEFAULT_TOKEN_URL, body).await?;
        let expires_at = t0 + raw.expires_in.unwrap_or(3600) * 1000;
        Ok(Tokens {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
            expires_at,
            project_id: None,
            email: None,
        })
    }

    async fn post_token(&self, url: &str, body: String) -> Result<RawTokenResponse, RelayError> {
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            if status.as_u16() == 400 && body_mentions_invalid_grant(&bytes) {
                return Err(RelayError::InvalidGrant("refresh_token".to_string()));
            }
            return Err(RelayError::UpstreamError {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn fetch_user_email(&self, access_token: &str) -> Result<Option<String>, RelayError> {
        let resp = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let payload: serde_json::Value = resp.json().await?;
        Ok(payload
            .get("email")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    async fn discover_project_id(&self, access_token: &str) -> Result<Option<String>, RelayError> {
        for endpoint in PROJECT_DISCOVERY_ENDPOINTS {
            let resp = self
                .http
                .post(*endpoint)
                .bearer_auth(access_token)
                .json(&serde_json::json!({}))
                .send()
                .await;
            let Ok(resp) = resp else { continue };
            if !resp.status().is_success() {
                continue;
            }
            let Ok(payload) = resp.json::<serde_json::Value>().await else {
                continue;
            };
            if let Some(project_id) = payload
                .get("cloudaicompanionProject")
                .and_then(|v| v.as_str())
            {
                return Ok(Some(project_id.to_string()));
            }
        }
        Ok(None)
    }
}

fn body_mentions_invalid_grant(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .map(|error| error == "invalid_grant")
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn build_authorize_url(client_id: &str, redirect_uri: &str, state: &str, challenge: &str) -> String {
    let params = [
        ("response_type", "code"),
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("scope", OAUTH_SCOPE),
        ("access_type", "offline"),
        ("prompt", "consent"),
        ("code_challenge_method", "S256"),
        ("code_challenge", challenge),
        ("state", state),
    ];
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{DEFAULT_AUTH_URL}?{query}")
}

fn encode_state(payload: &StatePayload) -> String {
    let json = serde_json::to_vec(payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn decode_state(state: &str) -> Result<StatePayload, RelayError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(state)
        .map_err(|_| RelayError::InvalidState)?;
    serde_json::from_slice(&bytes).map_err(|_| RelayError::InvalidState)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let oauth = AntigravityOAuth::new(reqwest::Client::new(), "client-123");
        let start = oauth.start_authorization_code_flow();
        assert!(start.authorization_url.contains("code_challenge_method=S256"));
        assert!(start.authorization_url.contains("client_id=client-123"));
        assert!(!start.verifier.is_empty());
        assert!(!start.state.is_empty());
    }

    #[test]
    fn state_round_trips_verifier_and_project_id() {
        let payload = StatePayload {
            verifier: "verifier-value".to_string(),
            project_id: "proj-1".to_string(),
        };
        let encoded = encode_state(&payload);
        let decoded = decode_state(&encoded).unwrap();
        assert_eq!(decoded.verifier, "verifier-value");
        assert_eq!(decoded.project_id, "proj-1");
    }

    #[test]
    fn empty_state_fails_decode_into_missing_verifier() {
        let decoded = decode_state(&URL_SAFE_NO_PAD.encode("{}")).unwrap();
        assert!(decoded.verifier.is_empty());
    }
}
