//! OAuth Driver (spec §4.1): Authorization-Code+PKCE for Antigravity and
//! Device-Authorization+PKCE for Qwen, plus the shared PKCE/state helpers
//! both flows build on.

mod antigravity;
mod pkce;
mod qwen;
mod types;

use async_trait::async_trait;
use relay_core::RelayError;

pub use antigravity::AntigravityOAuth;
pub use pkce::{Pkce, generate_pkce};
pub use qwen::{MAX_POLL_DURATION_MS, PollOutcome, QwenOAuth};
pub use types::{
    AuthorizationStart, DeviceStart, PendingOAuth, StatePayload, Tokens, default_expiry_buffer_ms,
    is_token_expired,
};

/// Vendor-agnostic seam the Token Store (`relay-accounts`) refreshes
/// through, so it doesn't need to know which of the two flows an account
/// belongs to.
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str, project_id: Option<&str>) -> Result<Tokens, RelayError>;
}

#[async_trait]
impl OAuthRefresher for AntigravityOAuth {
    async fn refresh(&self, refresh_token: &str, _project_id: Option<&str>) -> Result<Tokens, RelayError> {
        AntigravityOAuth::refresh(self, refresh_token).await
    }
}

#[async_trait]
impl OAuthRefresher for QwenOAuth {
    async fn refresh(&self, refresh_token: &str, _project_id: Option<&str>) -> Result<Tokens, RelayError> {
        QwenOAuth::refresh(self, refresh_token).await
    }
}
