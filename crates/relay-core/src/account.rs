//! The `Account` data model (spec §3).

use serde::{Deserialize, Serialize};

/// Priority tier among accounts; lower `priority()` wins round-robin ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionTier {
    Ultra,
    Pro,
    Free,
    Unknown,
}

impl SubscriptionTier {
    /// Ordinal priority key used by the selector's stable sort
    /// (`tier_priority ascending`). Lower is selected first.
    pub fn priority(self) -> u8 {
        match self {
            SubscriptionTier::Ultra => 0,
            SubscriptionTier::Pro => 1,
            SubscriptionTier::Free => 2,
            SubscriptionTier::Unknown => 3,
        }
    }
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        SubscriptionTier::Unknown
    }
}

/// Why an account was disabled (e.g. an observed `invalid_grant`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisabledState {
    pub reason: String,
}

/// One authenticated identity with associated tokens, quota, and metadata.
///
/// Invariants (spec §3): indices are dense after any mutation and equal to
/// the account's position in the owning store's ordered sequence; the
/// identifier is unique within the set; a disabled account is never
/// selected; `expires_at` is only meaningful when `access_token` is
/// `Some`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub index: u32,
    pub email: Option<String>,
    pub project_id: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
    /// Absolute epoch milliseconds.
    pub expires_at: Option<i64>,
    /// Absolute epoch milliseconds.
    pub added_at: i64,
    /// Absolute epoch milliseconds; 0 means never used.
    pub last_used_at: i64,
    pub subscription_tier: SubscriptionTier,
    pub disabled: Option<DisabledState>,
}

impl Account {
    /// The identifier used to key rate-limit records and session bindings:
    /// the email if known, otherwise the string form of the index.
    pub fn identifier(&self) -> String {
        self.email
            .clone()
            .unwrap_or_else(|| self.index.to_string())
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }

    pub fn token_is_stale(&self, now_ms: i64, buffer_ms: i64) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(expires_at)) => now_ms >= expires_at - buffer_ms,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_prefers_email() {
        let mut account = sample_account(3);
        assert_eq!(account.identifier(), "3");
        account.email = Some("user@example.com".into());
        assert_eq!(account.identifier(), "user@example.com");
    }

    #[test]
    fn tier_priority_orders_ultra_first() {
        assert!(SubscriptionTier::Ultra.priority() < SubscriptionTier::Pro.priority());
        assert!(SubscriptionTier::Pro.priority() < SubscriptionTier::Free.priority());
        assert!(SubscriptionTier::Free.priority() < SubscriptionTier::Unknown.priority());
    }

    #[test]
    fn token_is_stale_without_access_token() {
        let account = sample_account(0);
        assert!(account.token_is_stale(0, 0));
    }

    fn sample_account(index: u32) -> Account {
        Account {
            index,
            email: None,
            project_id: "proj".into(),
            refresh_token: "rt".into(),
            access_token: None,
            expires_at: None,
            added_at: 0,
            last_used_at: 0,
            subscription_tier: SubscriptionTier::Unknown,
            disabled: None,
        }
    }
}
