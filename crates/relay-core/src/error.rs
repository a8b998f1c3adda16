//! Error Handling Module
//!
//! A single `thiserror`-derived error currency shared by every crate in the
//! workspace, mirroring the one-`LlmError`-per-ecosystem shape used
//! throughout the pack this crate learned from: every domain error kind
//! named in the specification (`InvalidState`, `AllCooled`, …) is a variant
//! here rather than a crate-local error type.

use thiserror::Error;

/// Broad category an error falls into, used to decide retry/propagation
/// policy without matching every variant at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller-visible failure the user must act on (re-auth, missing
    /// accounts, malformed OAuth state).
    Client,
    /// Transient condition the orchestrator already knows how to recover
    /// from (rate limit, 401, upstream 5xx).
    Recoverable,
    /// Local bug or invariant violation.
    Internal,
}

#[derive(Debug, Error)]
pub enum RelayError {
    // --- OAuth Driver (C1) ---
    #[error("oauth state is missing or corrupt")]
    InvalidState,

    #[error("token exchange did not return a refresh token")]
    MissingRefreshToken,

    #[error("device code expired before the user authorized it")]
    DeviceCodeExpired,

    #[error("user denied the authorization request")]
    AccessDenied,

    #[error("oauth protocol error: {0}")]
    OAuthProtocolError(String),

    // --- Token Store (C2) ---
    #[error("account requires re-authentication: {0}")]
    ReauthenticationRequired(String),

    #[error("refresh token was revoked (invalid_grant) for account {0}")]
    InvalidGrant(String),

    // --- Account Selector (C4) ---
    #[error("no accounts are configured")]
    NoAccounts,

    #[error("all accounts are rate-limited for this request type; retry in {min_wait_seconds}s")]
    AllCooled { min_wait_seconds: u64 },

    // --- Request Orchestrator (C7) ---
    #[error("upstream returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("failed to transform a response chunk or body: {0}")]
    TransformFailure(String),

    // --- ambient / transport ---
    #[error("http error: {0}")]
    HttpError(String),

    #[error("json error: {0}")]
    JsonError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("secret store error: {0}")]
    SecretStoreError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl RelayError {
    pub fn category(&self) -> ErrorCategory {
        use RelayError::*;
        match self {
            InvalidState
            | MissingRefreshToken
            | DeviceCodeExpired
            | AccessDenied
            | OAuthProtocolError(_)
            | ReauthenticationRequired(_)
            | NoAccounts
            | AllCooled { .. }
            | UpstreamError { .. } => ErrorCategory::Client,

            InvalidGrant(_) | HttpError(_) | JsonError(_) | TransformFailure(_) => {
                ErrorCategory::Recoverable
            }

            ConfigurationError(_) | SecretStoreError(_) | InternalError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether the orchestrator should attempt local recovery (endpoint
    /// fallback, account rotation, token refresh) rather than surface this
    /// to the caller unchanged. See spec §7 "Propagation policy".
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::HttpError(_) | RelayError::InvalidGrant(_) | RelayError::TransformFailure(_)
        )
    }
}

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpError(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_cooled_is_client_category() {
        let err = RelayError::AllCooled {
            min_wait_seconds: 30,
        };
        assert_eq!(err.category(), ErrorCategory::Client);
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_grant_is_recoverable_by_disable() {
        let err = RelayError::InvalidGrant("user@example.com".into());
        assert_eq!(err.category(), ErrorCategory::Recoverable);
    }
}
