//! Schema-version-1 persisted account blob (spec §6) and the conversion
//! to/from the in-memory [`Account`] the rest of the workspace operates
//! on.

use relay_core::{Account, DisabledState, SubscriptionTier};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default)]
    pub models: Vec<serde_json::Value>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(rename = "addedAt")]
    pub added_at: i64,
    #[serde(rename = "lastUsed")]
    pub last_used: i64,
    #[serde(rename = "subscriptionTier", skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<Quota>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(rename = "disabledReason", skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageBlob {
    pub version: u32,
    pub accounts: Vec<StoredAccount>,
    #[serde(rename = "currentIndex")]
    pub current_index: i64,
}

impl StorageBlob {
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            accounts: Vec::new(),
            current_index: 0,
        }
    }
}

fn tier_to_string(tier: SubscriptionTier) -> Option<String> {
    match tier {
        SubscriptionTier::Unknown => None,
        SubscriptionTier::Ultra => Some("ULTRA".to_string()),
        SubscriptionTier::Pro => Some("PRO".to_string()),
        SubscriptionTier::Free => Some("FREE".to_string()),
    }
}

fn tier_from_string(raw: Option<&str>) -> SubscriptionTier {
    match raw {
        Some("ULTRA") => SubscriptionTier::Ultra,
        Some("PRO") => SubscriptionTier::Pro,
        Some("FREE") => SubscriptionTier::Free,
        _ => SubscriptionTier::Unknown,
    }
}

/// Access tokens are never persisted; a freshly loaded account always
/// starts with `access_token: None`, forcing a refresh on first use.
pub fn account_to_stored(account: &Account) -> StoredAccount {
    StoredAccount {
        email: account.email.clone(),
        project_id: account.project_id.clone(),
        refresh_token: account.refresh_token.clone(),
        added_at: account.added_at,
        last_used: account.last_used_at,
        subscription_tier: tier_to_string(account.subscription_tier),
        quota: None,
        disabled: account.disabled.is_some(),
        disabled_reason: account.disabled.as_ref().map(|d| d.reason.clone()),
    }
}

pub fn stored_to_account(index: u32, stored: &StoredAccount) -> Account {
    Account {
        index,
        email: stored.email.clone(),
        project_id: stored.project_id.clone(),
        refresh_token: stored.refresh_token.clone(),
        access_token: None,
        expires_at: None,
        added_at: stored.added_at,
        last_used_at: stored.last_used,
        subscription_tier: tier_from_string(stored.subscription_tier.as_deref()),
        disabled: if stored.disabled {
            Some(DisabledState {
                reason: stored
                    .disabled_reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            })
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_externally_observable_fields() {
        let account = Account {
            index: 0,
            email: Some("user@example.com".into()),
            project_id: "proj-1".into(),
            refresh_token: "rt-1".into(),
            access_token: Some("at-1".into()),
            expires_at: Some(123),
            added_at: 1000,
            last_used_at: 2000,
            subscription_tier: SubscriptionTier::Pro,
            disabled: None,
        };
        let stored = account_to_stored(&account);
        let restored = stored_to_account(0, &stored);
        assert_eq!(restored.email, account.email);
        assert_eq!(restored.project_id, account.project_id);
        assert_eq!(restored.refresh_token, account.refresh_token);
        assert_eq!(restored.added_at, account.added_at);
        assert_eq!(restored.last_used_at, account.last_used_at);
        assert_eq!(restored.subscription_tier, account.subscription_tier);
        assert!(restored.access_token.is_none());
    }

    #[test]
    fn disabled_reason_round_trips() {
        let account = Account {
            index: 2,
            email: None,
            project_id: "p".into(),
            refresh_token: "rt".into(),
            access_token: None,
            expires_at: None,
            added_at: 0,
            last_used_at: 0,
            subscription_tier: SubscriptionTier::Unknown,
            disabled: Some(DisabledState {
                reason: "invalid_grant".into(),
            }),
        };
        let stored = account_to_stored(&account);
        assert!(stored.disabled);
        assert_eq!(stored.disabled_reason.as_deref(), Some("invalid_grant"));
        let restored = stored_to_account(2, &stored);
        assert_eq!(restored.disabled.unwrap().reason, "invalid_grant");
    }

    #[test]
    fn unknown_tier_is_omitted_from_json() {
        let account = Account {
            index: 0,
            email: None,
            project_id: "p".into(),
            refresh_token: "rt".into(),
            access_token: None,
            expires_at: None,
            added_at: 0,
            last_used_at: 0,
            subscription_tier: SubscriptionTier::Unknown,
            disabled: None,
        };
        let stored = account_to_stored(&account);
        let json = serde_json::to_value(&stored).unwrap();
        assert!(json.get("subscriptionTier").is_none());
    }
}
