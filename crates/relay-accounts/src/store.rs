//! Token Store (C2, spec §4.2): owns the account set and the persisted
//! blob, and performs single-flight access-token refresh.
//!
//! The single-flight map-of-locks pattern (one `tokio::sync::Mutex` per
//! in-flight account index, looked up/created behind a short-lived
//! `std::sync::Mutex`) is grounded on the double-checked `ensure_token`
//! locking shown in `other_examples/…skynet-agent-src-qwen_oauth.rs`,
//! adapted from that file's single-account case to this store's
//! per-account map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use relay_core::{Account, DisabledState, RelayError, SecretStore};
use relay_oauth::{OAuthRefresher, Tokens, default_expiry_buffer_ms, is_token_expired};

use crate::blob::{StorageBlob, account_to_stored, stored_to_account};

pub struct TokenStore {
    secret_store: Arc<dyn SecretStore>,
    refresher: Arc<dyn OAuthRefresher>,
    storage_key: String,
    accounts: RwLock<Vec<Account>>,
    current_index: RwLock<i64>,
    refresh_locks: Mutex<HashMap<u32, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenStore {
    /// Decodes the secret-store blob and reassigns dense indices starting
    /// at 0. Disabled accounts are kept in the in-memory set (tagged
    /// disabled) rather than dropped, since `removeAccount`/`addAccount`
    /// and the selector's "invisible but retained" invariant both need to
    /// address them by index; only the selector treats them as invisible.
    pub async fn initialize(
        secret_store: Arc<dyn SecretStore>,
        refresher: Arc<dyn OAuthRefresher>,
        storage_key: impl Into<String>,
    ) -> Result<Self, RelayError> {
        let storage_key = storage_key.into();
        let blob = match secret_store.get(&storage_key).await? {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice::<StorageBlob>(&bytes)?,
            _ => StorageBlob::empty(),
        };
        let accounts = blob
            .accounts
            .iter()
            .enumerate()
            .map(|(i, stored)| stored_to_account(i as u32, stored))
            .collect();
        Ok(Self {
            secret_store,
            refresher,
            storage_key,
            accounts: RwLock::new(accounts),
            current_index: RwLock::new(blob.current_index),
            refresh_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn snapshot(&self) -> Vec<Account> {
        self.accounts.read().unwrap().clone()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().unwrap().len()
    }

    /// `addAccount` (spec §4.2): updates an existing account matched by
    /// email or refresh token, else appends a new one.
    pub async fn add_account(&self, tokens: Tokens, now_ms: i64) -> Result<u32, RelayError> {
        let index;
        {
            let mut accounts = self.accounts.write().unwrap();
            let existing = accounts.iter_mut().find(|a| {
                (tokens.email.is_some() && a.email == tokens.email)
                    || a.refresh_token == tokens.refresh_token
            });
            if let Some(account) = existing {
                account.refresh_token = tokens.refresh_token.clone();
                account.access_token = Some(tokens.access_token.clone());
                account.expires_at = Some(tokens.expires_at);
                if let Some(project_id) = &tokens.project_id {
                    account.project_id = project_id.clone();
                }
                if tokens.email.is_some() {
                    account.email = tokens.email.clone();
                }
                account.disabled = None;
                index = account.index;
            } else {
                let new_index = accounts.len() as u32;
                accounts.push(Account {
                    index: new_index,
                    email: tokens.email.clone(),
                    project_id: tokens.project_id.clone().unwrap_or_default(),
                    refresh_token: tokens.refresh_token.clone(),
                    access_token: Some(tokens.access_token.clone()),
                    expires_at: Some(tokens.expires_at),
                    added_at: now_ms,
                    last_used_at: 0,
                    subscription_tier: relay_core::SubscriptionTier::Unknown,
                    disabled: None,
                });
                index = new_index;
            }
        }
        self.persist().await?;
        Ok(index)
    }

    /// `removeAccount` (spec §4.2): removes and re-indexes densely.
    /// Returns the removed account's identifier and the new account count
    /// so the caller (`AccountManager`) can clean up selector-owned state
    /// keyed by that identifier.
    pub async fn remove_account(&self, index: u32) -> Result<(String, usize), RelayError> {
        let (identifier, remaining);
        {
            let mut accounts = self.accounts.write().unwrap();
            let position = accounts
                .iter()
                .position(|a| a.index == index)
                .ok_or_else(|| RelayError::InternalError(format!("no account at index {index}")))?;
            let removed = accounts.remove(position);
            identifier = removed.identifier();
            for (new_index, account) in accounts.iter_mut().enumerate() {
                account.index = new_index as u32;
            }
            remaining = accounts.len();
        }
        self.persist().await?;
        Ok((identifier, remaining))
    }

    pub async fn disable_account(&self, index: u32, reason: impl Into<String>) -> Result<(), RelayError> {
        {
            let mut accounts = self.accounts.write().unwrap();
            let account = accounts
                .iter_mut()
                .find(|a| a.index == index)
                .ok_or_else(|| RelayError::InternalError(format!("no account at index {index}")))?;
            account.disabled = Some(DisabledState {
                reason: reason.into(),
            });
        }
        self.persist().await
    }

    pub fn touch_last_used(&self, index: u32, now_ms: i64) {
        let mut accounts = self.accounts.write().unwrap();
        if let Some(account) = accounts.iter_mut().find(|a| a.index == index) {
            account.last_used_at = now_ms;
        }
    }

    /// `getValidAccessToken` (spec §4.2): single-flight per account index.
    pub async fn get_valid_access_token(&self, index: u32, now_ms: i64) -> Result<String, RelayError> {
        if let Some(token) = self.fresh_token(index, now_ms) {
            return Ok(token);
        }
        self.refresh_now(index, Some(now_ms)).await
    }

    /// Unconditional refresh: skips the staleness check entirely, even
    /// behind the single-flight lock. The orchestrator's 401-recovery
    /// step (spec §4.7 step 4c) calls this once per attempt because a
    /// 401 means the vendor already rejected a token this store still
    /// considers fresh.
    pub async fn force_refresh_access_token(&self, index: u32) -> Result<String, RelayError> {
        self.refresh_now(index, None).await
    }

    /// `recheck_freshness_ms`: re-checks `fresh_token` once the
    /// single-flight lock is held, so a burst of concurrent callers that
    /// all missed the pre-lock check still only issues one refresh.
    /// `None` (used by [`Self::force_refresh_access_token`]) always
    /// refreshes.
    async fn refresh_now(&self, index: u32, recheck_freshness_ms: Option<i64>) -> Result<String, RelayError> {
        let lock = self.refresh_lock_for(index);
        let _guard = lock.lock().await;

        if let Some(now_ms) = recheck_freshness_ms {
            if let Some(token) = self.fresh_token(index, now_ms) {
                return Ok(token);
            }
        }

        let (refresh_token, project_id, identifier) = {
            let accounts = self.accounts.read().unwrap();
            let account = accounts
                .iter()
                .find(|a| a.index == index)
                .ok_or_else(|| RelayError::InternalError(format!("no account at index {index}")))?;
            (
                account.refresh_token.clone(),
                Some(account.project_id.clone()).filter(|p| !p.is_empty()),
                account.identifier(),
            )
        };

        match self.refresher.refresh(&refresh_token, project_id.as_deref()).await {
            Ok(tokens) => {
                {
                    let mut accounts = self.accounts.write().unwrap();
                    if let Some(account) = accounts.iter_mut().find(|a| a.index == index) {
                        account.access_token = Some(tokens.access_token.clone());
                        account.expires_at = Some(tokens.expires_at);
                        account.refresh_token = tokens.refresh_token.clone();
                        if let Some(project_id) = &tokens.project_id {
                            account.project_id = project_id.clone();
                        }
                    }
                }
                self.persist().await?;
                Ok(tokens.access_token)
            }
            Err(RelayError::InvalidGrant(_)) => {
                self.disable_account(index, "invalid_grant").await?;
                Err(RelayError::InvalidGrant(identifier))
            }
            Err(other) => Err(RelayError::ReauthenticationRequired(other.to_string())),
        }
    }

    pub fn to_storage_blob(&self) -> StorageBlob {
        let accounts = self.accounts.read().unwrap();
        StorageBlob {
            version: crate::blob::SCHEMA_VERSION,
            accounts: accounts.iter().map(account_to_stored).collect(),
            current_index: *self.current_index.read().unwrap(),
        }
    }

    fn fresh_token(&self, index: u32, now_ms: i64) -> Option<String> {
        let accounts = self.accounts.read().unwrap();
        let account = accounts.iter().find(|a| a.index == index)?;
        let access_token = account.access_token.as_ref()?;
        let expires_at = account.expires_at?;
        if is_token_expired(expires_at, now_ms, default_expiry_buffer_ms()) {
            None
        } else {
            Some(access_token.clone())
        }
    }

    fn refresh_lock_for(&self, index: u32) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock().unwrap();
        locks
            .entry(index)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn persist(&self) -> Result<(), RelayError> {
        let blob = self.to_storage_blob();
        let bytes = serde_json::to_vec(&blob)?;
        self.secret_store.set(&self.storage_key, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct InMemorySecretStore {
        value: StdMutex<Option<Vec<u8>>>,
    }

    impl InMemorySecretStore {
        fn new() -> Self {
            Self {
                value: StdMutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SecretStore for InMemorySecretStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, RelayError> {
            Ok(self.value.lock().unwrap().clone())
        }
        async fn set(&self, _key: &str, value: Vec<u8>) -> Result<(), RelayError> {
            *self.value.lock().unwrap() = Some(value);
            Ok(())
        }
    }

    struct StubRefresher {
        result: StdMutex<Option<Result<Tokens, RelayError>>>,
    }

    #[async_trait]
    impl OAuthRefresher for StubRefresher {
        async fn refresh(&self, _refresh_token: &str, _project_id: Option<&str>) -> Result<Tokens, RelayError> {
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(RelayError::InternalError("no stub result".into())))
        }
    }

    fn sample_tokens(email: &str) -> Tokens {
        Tokens {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: 10_000,
            project_id: Some("proj".into()),
            email: Some(email.to_string()),
        }
    }

    #[tokio::test]
    async fn add_account_then_remove_keeps_indices_dense() {
        let secret_store = Arc::new(InMemorySecretStore::new());
        let refresher = Arc::new(StubRefresher {
            result: StdMutex::new(None),
        });
        let store = TokenStore::initialize(secret_store, refresher, "key").await.unwrap();
        let a = store.add_account(sample_tokens("a@example.com"), 0).await.unwrap();
        let b = store.add_account(sample_tokens("b@example.com"), 0).await.unwrap();
        let c = store.add_account(sample_tokens("c@example.com"), 0).await.unwrap();
        assert_eq!([a, b, c], [0, 1, 2]);

        store.remove_account(b).await.unwrap();
        let snapshot = store.snapshot();
        let indices: Vec<u32> = snapshot.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(snapshot[1].email.as_deref(), Some("c@example.com"));
    }

    #[tokio::test]
    async fn storage_blob_round_trips_through_initialize() {
        let secret_store = Arc::new(InMemorySecretStore::new());
        let refresher = Arc::new(StubRefresher {
            result: StdMutex::new(None),
        });
        let store = TokenStore::initialize(secret_store.clone(), refresher.clone(), "key")
            .await
            .unwrap();
        store.add_account(sample_tokens("a@example.com"), 1234).await.unwrap();

        let reloaded = TokenStore::initialize(secret_store, refresher, "key").await.unwrap();
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].email.as_deref(), Some("a@example.com"));
        assert_eq!(snapshot[0].added_at, 1234);
        assert!(snapshot[0].access_token.is_none());
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_reauthentication_required_without_removing_account() {
        let secret_store = Arc::new(InMemorySecretStore::new());
        let refresher = Arc::new(StubRefresher {
            result: StdMutex::new(Some(Err(RelayError::HttpError("timeout".into())))),
        });
        let store = TokenStore::initialize(secret_store, refresher, "key").await.unwrap();
        let index = store.add_account(sample_tokens("a@example.com"), 0).await.unwrap();
        {
            let mut accounts = store.accounts.write().unwrap();
            accounts[0].access_token = None;
        }
        let err = store.get_valid_access_token(index, 0).await.unwrap_err();
        assert!(matches!(err, RelayError::ReauthenticationRequired(_)));
        assert_eq!(store.snapshot().len(), 1);
        assert!(!store.snapshot()[0].is_disabled());
    }

    #[tokio::test]
    async fn invalid_grant_during_refresh_disables_the_account() {
        let secret_store = Arc::new(InMemorySecretStore::new());
        let refresher = Arc::new(StubRefresher {
            result: StdMutex::new(Some(Err(RelayError::InvalidGrant("a@example.com".into())))),
        });
        let store = TokenStore::initialize(secret_store, refresher, "key").await.unwrap();
        let index = store.add_account(sample_tokens("a@example.com"), 0).await.unwrap();
        {
            let mut accounts = store.accounts.write().unwrap();
            accounts[0].access_token = None;
        }
        let err = store.get_valid_access_token(index, 0).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidGrant(_)));
        assert!(store.snapshot()[0].is_disabled());
    }

    #[tokio::test]
    async fn force_refresh_ignores_a_token_the_store_still_considers_fresh() {
        let secret_store = Arc::new(InMemorySecretStore::new());
        let refresher = Arc::new(StubRefresher {
            result: StdMutex::new(Some(Ok(Tokens {
                access_token: "new-token".into(),
                refresh_token: "rt".into(),
                expires_at: 99_999,
                project_id: Some("proj".into()),
                email: Some("a@example.com".into()),
            }))),
        });
        let store = TokenStore::initialize(secret_store, refresher, "key").await.unwrap();
        let index = store.add_account(sample_tokens("a@example.com"), 0).await.unwrap();
        assert_eq!(store.get_valid_access_token(index, 0).await.unwrap(), "at");

        let refreshed = store.force_refresh_access_token(index).await.unwrap();
        assert_eq!(refreshed, "new-token");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        RemoveAt(usize),
    }

    fn arb_ops() -> impl proptest::strategy::Strategy<Value = Vec<Op>> {
        use proptest::prelude::*;
        prop::collection::vec(
            prop_oneof![
                3 => Just(Op::Add),
                1 => (0usize..8).prop_map(Op::RemoveAt),
            ],
            0..30,
        )
    }

    proptest::proptest! {
        /// Spec §3 dense-index invariant: after any interleaving of
        /// `addAccount`/`removeAccount`, surviving indices are exactly
        /// `0..len` with no gaps or duplicates.
        #[test]
        fn indices_stay_dense_after_any_add_remove_interleaving(ops in arb_ops()) {
            // `prop_assert_eq!` early-returns out of the enclosing fn, so it
            // must not be called from inside the `async move` block below —
            // collect snapshots there and assert on them out here instead.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let snapshots_after_each_op: Vec<Vec<u32>> = runtime.block_on(async {
                let secret_store = Arc::new(InMemorySecretStore::new());
                let refresher = Arc::new(StubRefresher { result: StdMutex::new(None) });
                let store = TokenStore::initialize(secret_store, refresher, "key").await.unwrap();
                let mut next_email = 0u32;
                let mut snapshots = Vec::new();

                for op in ops {
                    match op {
                        Op::Add => {
                            store.add_account(sample_tokens(&format!("user{next_email}@example.com")), 0).await.unwrap();
                            next_email += 1;
                        }
                        Op::RemoveAt(raw) => {
                            let snapshot = store.snapshot();
                            if snapshot.is_empty() {
                                continue;
                            }
                            let index = snapshot[raw % snapshot.len()].index;
                            store.remove_account(index).await.unwrap();
                        }
                    }
                    snapshots.push(store.snapshot().iter().map(|a| a.index).collect());
                }
                snapshots
            });

            for indices in snapshots_after_each_op {
                let expected: Vec<u32> = (0..indices.len() as u32).collect();
                proptest::prop_assert_eq!(indices, expected);
            }
            });
        }
    }
}
