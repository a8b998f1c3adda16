//! Flow-result and pending-state types shared by both OAuth drivers
//! (spec §3 `PendingOAuth`, §4.1).

use serde::{Deserialize, Serialize};

/// Result of a successful token exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute epoch milliseconds.
    pub expires_at: i64,
    /// Present only when discovered/returned during this exchange; callers
    /// that already know the project id should keep using their own value
    /// when this is `None`.
    pub project_id: Option<String>,
    pub email: Option<String>,
}

/// Start-of-flow artifacts for the Authorization-Code+PKCE flow.
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub authorization_url: String,
    pub verifier: String,
    pub state: String,
}

/// Start-of-flow artifacts for the Device-Authorization+PKCE flow.
#[derive(Debug, Clone)]
pub struct DeviceStart {
    pub device_code: String,
    pub verifier: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in_seconds: u64,
    pub interval_seconds: u64,
}

/// Pending OAuth state persisted only so a restart mid-flow is
/// recoverable (spec §3 `PendingOAuth`); cleared on completion or
/// timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PendingOAuth {
    AuthorizationCode {
        verifier: String,
        encoded_state: String,
    },
    Device {
        device_code: String,
        verifier: String,
    },
}

/// Decoded `state` payload for the Authorization-Code flow (spec §4.1:
/// `base64url(UTF-8(JSON))` of `{verifier, project_id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePayload {
    pub verifier: String,
    #[serde(default)]
    pub project_id: String,
}

pub fn default_expiry_buffer_ms() -> i64 {
    5 * 60 * 1000
}

pub fn is_token_expired(expires_at: i64, now_ms: i64, buffer_ms: i64) -> bool {
    now_ms >= expires_at - buffer_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_buffer_is_five_minutes() {
        assert_eq!(default_expiry_buffer_ms(), 300_000);
    }

    #[test]
    fn token_expired_respects_buffer() {
        assert!(!is_token_expired(1_000_000, 699_000, 300_000));
        assert!(is_token_expired(1_000_000, 700_000, 300_000));
    }
}
