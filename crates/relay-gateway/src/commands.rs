//! Command surface: thin wrappers over the OAuth Driver and Token Store
//! (spec §6 "Command surface (thin)"). Each command maps directly to one
//! or two calls on its collaborators and carries no semantics of its own.

use std::sync::Arc;

use relay_accounts::AccountManager;
use relay_core::{Account, RelayError};
use relay_oauth::{AntigravityOAuth, AuthorizationStart, DeviceStart, PollOutcome, QwenOAuth, Tokens};

/// A one-line summary of an account for `status`/`accounts` output. Kept
/// separate from `Account` itself so the command surface never leaks the
/// refresh token or other storage-only fields to a caller.
#[derive(Debug, Clone)]
pub struct AccountSummary {
    pub index: u32,
    pub identifier: String,
    pub disabled_reason: Option<String>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            index: account.index,
            identifier: account.identifier(),
            disabled_reason: account.disabled.as_ref().map(|d| d.reason.clone()),
        }
    }
}

/// Drives `login`/`logout`/`status`/`add-account`/`accounts`/`remove-account`
/// against a single `AccountManager`. One instance per backend the host
/// wants to authenticate against; a host juggling both Antigravity and
/// Qwen accounts keeps two `AccountManager`s and picks the matching
/// `Commands` for whichever flow the user invoked.
pub struct Commands {
    accounts: Arc<AccountManager>,
    antigravity: AntigravityOAuth,
    qwen: QwenOAuth,
}

impl Commands {
    pub fn new(accounts: Arc<AccountManager>, antigravity: AntigravityOAuth, qwen: QwenOAuth) -> Self {
        Self { accounts, antigravity, qwen }
    }

    /// `login` (Antigravity): returns the URL the host should open in a
    /// browser. The caller completes the flow with
    /// [`Self::complete_antigravity_login`] once the redirect lands.
    pub fn start_antigravity_login(&self) -> AuthorizationStart {
        self.antigravity.start_authorization_code_flow()
    }

    pub async fn complete_antigravity_login(&self, code: &str, state: &str, now_ms: i64) -> Result<u32, RelayError> {
        let tokens = self.antigravity.exchange_code(code, state).await?;
        self.add_account(tokens, now_ms).await
    }

    /// `login` (Qwen): returns the user code and verification URL to
    /// display. The caller polls with [`Self::poll_qwen_login`] at the
    /// returned interval until it resolves to tokens or an error.
    pub async fn start_qwen_login(&self) -> Result<DeviceStart, RelayError> {
        self.qwen.start_device_flow().await
    }

    /// One poll iteration; the caller owns the sleep/backoff loop and the
    /// five-minute ceiling (spec §4.1), since only it knows how to yield
    /// control back to its own event loop between polls.
    pub async fn poll_qwen_login(
        &self,
        device_code: &str,
        verifier: &str,
        current_interval_seconds: u64,
        now_ms: i64,
    ) -> Result<QwenLoginPoll, RelayError> {
        match self.qwen.poll_device_token(device_code, verifier, current_interval_seconds).await? {
            PollOutcome::Pending { next_interval_seconds } => Ok(QwenLoginPoll::Pending { next_interval_seconds }),
            PollOutcome::Tokens(tokens) => Ok(QwenLoginPoll::Complete(self.add_account(tokens, now_ms).await?)),
        }
    }

    async fn add_account(&self, tokens: Tokens, now_ms: i64) -> Result<u32, RelayError> {
        self.accounts.add_account(tokens, now_ms).await
    }

    /// `logout`/`remove-account`: identical operation under two names in
    /// the spec's command surface; both remove the account outright.
    pub async fn remove_account(&self, index: u32) -> Result<(), RelayError> {
        self.accounts.remove_account(index).await
    }

    /// `accounts`: the list view.
    pub fn list_accounts(&self) -> Vec<AccountSummary> {
        self.accounts.accounts().iter().map(AccountSummary::from).collect()
    }

    /// `status`: account count plus the list view, since the spec gives
    /// this command no semantics beyond what Token Store already exposes.
    pub fn status(&self) -> GatewayStatus {
        let accounts = self.list_accounts();
        GatewayStatus { account_count: accounts.len(), accounts }
    }
}

#[derive(Debug, Clone)]
pub enum QwenLoginPoll {
    Pending { next_interval_seconds: u64 },
    Complete(u32),
}

#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub account_count: usize,
    pub accounts: Vec<AccountSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_summary_carries_disabled_reason() {
        let account = Account {
            index: 0,
            email: Some("a@example.com".into()),
            project_id: "proj".into(),
            refresh_token: "rt".into(),
            access_token: None,
            expires_at: None,
            added_at: 0,
            last_used_at: 0,
            subscription_tier: relay_core::SubscriptionTier::Free,
            disabled: Some(relay_core::DisabledState { reason: "invalid_grant".into() }),
        };
        let summary = AccountSummary::from(&account);
        assert_eq!(summary.identifier, "a@example.com");
        assert_eq!(summary.disabled_reason.as_deref(), Some("invalid_grant"));
    }
}
