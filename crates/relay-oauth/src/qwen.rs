//! Qwen Device-Authorization+PKCE flow (RFC 8628) and refresh (spec §4.1).
//!
//! Grounded on `other_examples/8cc1eb48_hushhenry-zeroai…qwen_portal.rs`
//! (device/token endpoint shapes, client id, the 1.5x/10s-cap poll
//! backoff) and `other_examples/40805609_inkolin-smartopol-ai…qwen_oauth.rs`
//! (refresh request body, `ensure_token` double-checked-locking shape that
//! `relay-accounts`'s token store later generalizes).

use std::time::{SystemTime, UNIX_EPOCH};

use relay_core::RelayError;
use serde::Deserialize;

use crate::pkce::generate_pkce;
use crate::types::{DeviceStart, Tokens};

const DEVICE_CODE_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/device/code";
const TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const SCOPE: &str = "openid profile email model.completion";
const GRANT_TYPE_DEVICE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Spec §4.1: the poll loop gives up after five minutes regardless of what
/// `expires_in` the server advertised.
pub const MAX_POLL_DURATION_MS: i64 = 5 * 60 * 1000;
/// RFC 8628 default poll interval when the server's response omits one
/// (spec §4.1).
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
const MAX_POLL_INTERVAL_SECONDS: u64 = 10;
const BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct QwenOAuth {
    http: reqwest::Client,
}

/// Outcome of a single device-token poll attempt.
pub enum PollOutcome {
    Pending { next_interval_seconds: u64 },
    Tokens(Tokens),
}

impl QwenOAuth {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn start_device_flow(&self) -> Result<DeviceStart, RelayError> {
        let pkce = generate_pkce();
        let form = [
            ("client_id", CLIENT_ID),
            ("scope", SCOPE),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        let resp = self.http.post(DEVICE_CODE_URL).form(&form).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(RelayError::UpstreamError {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        let raw: RawDeviceResponse = serde_json::from_slice(&bytes)?;
        Ok(DeviceStart {
            device_code: raw.device_code,
            verifier: pkce.verifier,
            user_code: raw.user_code,
            verification_uri: raw.verification_uri.clone(),
            verification_uri_complete: raw
                .verification_uri_complete
                .unwrap_or(raw.verification_uri),
            expires_in_seconds: raw.expires_in,
            interval_seconds: raw.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS),
        })
    }

    /// Performs a single poll of the token endpoint. Callers drive the
    /// sleep/backoff loop themselves using the returned interval, stopping
    /// once [`MAX_POLL_DURATION_MS`] has elapsed since the flow started
    /// (spec §4.1).
    pub async fn poll_device_token(
        &self,
        device_code: &str,
        verifier: &str,
        current_interval_seconds: u64,
    ) -> Result<PollOutcome, RelayError> {
        let t0 = now_ms();
        let form = [
            ("client_id", CLIENT_ID),
            ("device_code", device_code),
            ("code_verifier", verifier),
            ("grant_type", GRANT_TYPE_DEVICE),
        ];
        let resp = self.http.post(TOKEN_URL).form(&form).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if status.is_success() {
            let raw: RawTokenResponse = serde_json::from_slice(&bytes)?;
            let refresh_token = raw
                .refresh_token
                .ok_or(RelayError::MissingRefreshToken)?;
            let expires_at = t0 + raw.expires_in.unwrap_or(3600) * 1000;
            return Ok(PollOutcome::Tokens(Tokens {
                access_token: raw.access_token,
                refresh_token,
                expires_at,
                project_id: None,
                email: None,
            }));
        }

        let error: RawDeviceError = serde_json::from_slice(&bytes).unwrap_or(RawDeviceError {
            error: "unknown_error".to_string(),
        });
        match error.error.as_str() {
            "authorization_pending" => Ok(PollOutcome::Pending {
                next_interval_seconds: current_interval_seconds,
            }),
            "slow_down" => {
                let next = ((current_interval_seconds as f64) * BACKOFF_FACTOR).round() as u64;
                Ok(PollOutcome::Pending {
                    next_interval_seconds: next.min(MAX_POLL_INTERVAL_SECONDS),
                })
            }
            "expired_token" => Err(RelayError::DeviceCodeExpired),
            "access_denied" => Err(RelayError::AccessDenied),
            other => Err(RelayError::OAuthProtocolError(other.to_string())),
        }
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Tokens, RelayError> {
        let t0 = now_ms();
        let form = [
            ("client_id", CLIENT_ID),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let resp = self.http.post(TOKEN_URL).form(&form).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            if status.as_u16() == 400 {
                return Err(RelayError::InvalidGrant("refresh_token".to_string()));
            }
            return Err(RelayError::UpstreamError {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        let raw: RawTokenResponse = serde_json::from_slice(&bytes)?;
        let expires_at = t0 + raw.expires_in.unwrap_or(3600) * 1000;
        Ok(Tokens {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
            expires_at,
            project_id: None,
            email: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawDeviceResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceError {
    error: String,
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
    fn slow_down_applies_backoff_factor_and_caps() {
        let oauth = QwenOAuth::new(reqwest::Client::new());
        let _ = oauth;
        let mut interval = 2u64;
        for _ in 0..10 {
            interval = ((interval as f64) * BACKOFF_FACTOR).round() as u64;
            interval = interval.min(MAX_POLL_INTERVAL_SECONDS);
        }
        assert_eq!(interval, MAX_POLL_INTERVAL_SECONDS);
    }

    #[test]
    fn max_poll_duration_is_five_minutes() {
        assert_eq!(MAX_POLL_DURATION_MS, 300_000);
    }
}
