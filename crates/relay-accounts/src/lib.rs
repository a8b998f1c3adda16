//! Token Store (C2) + Account Selector (C4) + Rate-Limit Parser (C3),
//! composed into one `AccountManager` facade the orchestrator drives.
//!
//! The Token Store and Account Selector stay implemented as separate
//! types (`store::TokenStore`, `selector::AccountSelector`) matching the
//! spec's component boundary; `AccountManager` only wires the few
//! cross-component effects the spec calls for — `removeAccount` clearing
//! the selector's rate-limit record for that identifier, and account
//! selection touching `last_used_at` back on the store.

mod blob;
mod rate_limit_parser;
mod selector;
mod store;

use std::sync::Arc;

use relay_core::{Account, RelayError, RequestType, SecretStore};
use relay_oauth::{OAuthRefresher, Tokens};

pub use blob::{Quota, SCHEMA_VERSION, StorageBlob, StoredAccount};
pub use rate_limit_parser::{ParsedRateLimit, parse_rate_limit};
pub use selector::AccountSelector;
pub use store::TokenStore;

pub struct AccountManager {
    store: TokenStore,
    selector: AccountSelector,
}

impl AccountManager {
    pub async fn initialize(
        secret_store: Arc<dyn SecretStore>,
        refresher: Arc<dyn OAuthRefresher>,
        storage_key: impl Into<String>,
    ) -> Result<Self, RelayError> {
        let store = TokenStore::initialize(secret_store, refresher, storage_key).await?;
        Ok(Self {
            store,
            selector: AccountSelector::new(),
        })
    }

    pub fn account_count(&self) -> usize {
        self.store.account_count()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.store.snapshot()
    }

    pub async fn add_account(&self, tokens: Tokens, now_ms: i64) -> Result<u32, RelayError> {
        self.store.add_account(tokens, now_ms).await
    }

    pub async fn remove_account(&self, index: u32) -> Result<(), RelayError> {
        let (identifier, remaining) = self.store.remove_account(index).await?;
        self.selector.forget_account(&identifier, remaining);
        Ok(())
    }

    pub async fn disable_account(&self, index: u32, reason: impl Into<String>) -> Result<(), RelayError> {
        self.store.disable_account(index, reason).await
    }

    /// `getAccountForRequest` (spec §4.4.1) plus the store-side
    /// `last_used_at` touch the selector's tie-break depends on.
    pub fn get_account_for_request(
        &self,
        request_type: RequestType,
        session_id: Option<&str>,
        now_ms: i64,
    ) -> Result<Account, RelayError> {
        let snapshot = self.store.snapshot();
        let index = self
            .selector
            .get_account_for_request(&snapshot, request_type, session_id, now_ms)?;
        self.store.touch_last_used(index, now_ms);
        snapshot
            .into_iter()
            .find(|a| a.index == index)
            .ok_or_else(|| RelayError::InternalError("selector returned an unknown index".into()))
    }

    /// Re-entry point for the orchestrator's endpoint-fallback/rotation
    /// loop (spec §4.7 step 4d): fresh selection only, excluding accounts
    /// already attempted within this outbound call.
    pub fn select_fresh(
        &self,
        request_type: RequestType,
        attempted: &[u32],
        now_ms: i64,
    ) -> Result<Account, RelayError> {
        let snapshot = self.store.snapshot();
        let index = self
            .selector
            .select_fresh(&snapshot, request_type, attempted, now_ms)?;
        self.store.touch_last_used(index, now_ms);
        snapshot
            .into_iter()
            .find(|a| a.index == index)
            .ok_or_else(|| RelayError::InternalError("selector returned an unknown index".into()))
    }

    pub async fn get_valid_access_token(&self, index: u32, now_ms: i64) -> Result<String, RelayError> {
        self.store.get_valid_access_token(index, now_ms).await
    }

    /// 401-recovery (spec §4.7 step 4c): refresh unconditionally, since
    /// the vendor just rejected a token this store otherwise considers
    /// fresh.
    pub async fn force_refresh_access_token(&self, index: u32) -> Result<String, RelayError> {
        self.store.force_refresh_access_token(index).await
    }

    pub fn mark_rate_limited(&self, identifier: &str, parsed: ParsedRateLimit, now_ms: i64) {
        self.selector.mark_rate_limited(identifier, parsed, now_ms);
    }

    pub fn is_rate_limited(&self, identifier: &str, now_ms: i64) -> bool {
        self.selector.is_rate_limited(identifier, now_ms)
    }

    pub fn get_min_wait_seconds(&self, now_ms: i64) -> u64 {
        self.selector.get_min_wait_seconds(now_ms)
    }

    pub fn to_storage_blob(&self) -> StorageBlob {
        self.store.to_storage_blob()
    }
}
