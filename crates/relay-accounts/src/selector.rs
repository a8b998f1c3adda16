//! Account Selector (C4, spec §4.4): session stickiness, the global lock,
//! and tier/round-robin fresh selection, plus the rate-limit bookkeeping
//! that feeds the cooldown checks.
//!
//! All state here is process-local (never persisted, spec §3) and the
//! selector never performs I/O, so a single `std::sync::Mutex` guarding a
//! plain struct is sufficient — there is no suspension point to design
//! around, unlike the Token Store's refresh path.

use std::collections::HashMap;
use std::sync::Mutex;

use relay_core::{Account, GlobalLock, RateLimitRecord, RelayError, RequestType, SessionBinding};

use crate::rate_limit_parser::ParsedRateLimit;

const DEFAULT_MIN_WAIT_SECONDS: u64 = 60;

struct SelectorState {
    rate_limits: HashMap<String, RateLimitRecord>,
    bindings: HashMap<String, SessionBinding>,
    global_lock: Option<GlobalLock>,
    cursor: u64,
}

pub struct AccountSelector {
    state: Mutex<SelectorState>,
}

impl Default for AccountSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountSelector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SelectorState {
                rate_limits: HashMap::new(),
                bindings: HashMap::new(),
                global_lock: None,
                cursor: 0,
            }),
        }
    }

    /// Full `getAccountForRequest` protocol (spec §4.4.1): session
    /// stickiness, then the global lock, then fresh selection.
    pub fn get_account_for_request(
        &self,
        accounts: &[Account],
        request_type: RequestType,
        session_id: Option<&str>,
        now_ms: i64,
    ) -> Result<u32, RelayError> {
        let mut state = self.state.lock().unwrap();

        if let Some(session_id) = session_id {
            if let Some(binding) = state.bindings.get(session_id).copied() {
                let eligible = accounts
                    .iter()
                    .find(|a| a.index == binding.account_index)
                    .filter(|a| !a.is_disabled())
                    .filter(|a| !state.is_cooled(&a.identifier(), request_type, now_ms));
                if let Some(account) = eligible {
                    let index = account.index;
                    if !request_type.is_image_gen() {
                        state.global_lock = Some(GlobalLock {
                            account_index: index,
                            stamped_at: now_ms,
                        });
                    }
                    return Ok(index);
                }
                state.bindings.remove(session_id);
            }
        }

        if !request_type.is_image_gen() {
            if let Some(lock) = state.global_lock {
                if lock.is_active(now_ms) {
                    let eligible = accounts
                        .iter()
                        .find(|a| a.index == lock.account_index)
                        .filter(|a| !a.is_disabled())
                        .filter(|a| !state.is_cooled(&a.identifier(), request_type, now_ms));
                    if let Some(account) = eligible {
                        let index = account.index;
                        if let Some(session_id) = session_id {
                            state
                                .bindings
                                .insert(session_id.to_string(), SessionBinding { account_index: index });
                        }
                        return Ok(index);
                    }
                }
            }
        }

        let index = state.select_fresh(accounts, request_type, &[], now_ms)?;
        if let Some(session_id) = session_id {
            state
                .bindings
                .insert(session_id.to_string(), SessionBinding { account_index: index });
        }
        Ok(index)
    }

    /// The "Fresh selection" sub-step (spec §4.4.1 step 3) exposed on its
    /// own so the orchestrator (C7) can re-enter here directly when
    /// rotating past an account that just failed, without re-running
    /// session stickiness or the global lock.
    pub fn select_fresh(
        &self,
        accounts: &[Account],
        request_type: RequestType,
        attempted: &[u32],
        now_ms: i64,
    ) -> Result<u32, RelayError> {
        let mut state = self.state.lock().unwrap();
        state.select_fresh(accounts, request_type, attempted, now_ms)
    }

    pub fn mark_rate_limited(&self, identifier: &str, parsed: ParsedRateLimit, now_ms: i64) {
        let mut state = self.state.lock().unwrap();
        let record = RateLimitRecord::new(now_ms, parsed.retry_after_ms, parsed.reason);
        state.rate_limits.insert(identifier.to_string(), record);
    }

    pub fn is_rate_limited(&self, identifier: &str, now_ms: i64) -> bool {
        let state = self.state.lock().unwrap();
        state
            .rate_limits
            .get(identifier)
            .map(|r| r.is_active(now_ms))
            .unwrap_or(false)
    }

    /// Minimum remaining wait across all currently-cooled accounts;
    /// defaults to 60s when none are cooled (spec §4.4.3).
    pub fn get_min_wait_seconds(&self, now_ms: i64) -> u64 {
        let state = self.state.lock().unwrap();
        state
            .rate_limits
            .values()
            .filter(|r| r.is_active(now_ms))
            .map(|r| r.remaining_seconds(now_ms))
            .min()
            .unwrap_or(DEFAULT_MIN_WAIT_SECONDS)
    }

    /// Drops the rate-limit record keyed by the removed account's
    /// identifier and clamps the round-robin cursor (spec §4.2
    /// `removeAccount`). Dense re-indexing invalidates every existing
    /// session binding's `account_index`, so bindings are dropped
    /// wholesale rather than remapped; a session simply re-selects fresh
    /// on its next call.
    pub fn forget_account(&self, identifier: &str, remaining_len: usize) {
        let mut state = self.state.lock().unwrap();
        state.rate_limits.remove(identifier);
        state.bindings.clear();
        state.cursor = if remaining_len == 0 {
            0
        } else {
            state.cursor % remaining_len as u64
        };
    }
}

impl SelectorState {
    fn is_cooled(&self, identifier: &str, _request_type: RequestType, now_ms: i64) -> bool {
        self.rate_limits
            .get(identifier)
            .map(|r| r.is_active(now_ms))
            .unwrap_or(false)
    }

    fn select_fresh(
        &mut self,
        accounts: &[Account],
        request_type: RequestType,
        attempted: &[u32],
        now_ms: i64,
    ) -> Result<u32, RelayError> {
        let mut candidates: Vec<&Account> = accounts
            .iter()
            .filter(|a| !a.is_disabled())
            .filter(|a| !attempted.contains(&a.index))
            .filter(|a| !self.is_cooled(&a.identifier(), request_type, now_ms))
            .collect();

        if candidates.is_empty() {
            let min_wait_seconds = self
                .rate_limits
                .values()
                .filter(|r| r.is_active(now_ms))
                .map(|r| r.remaining_seconds(now_ms))
                .min()
                .unwrap_or(DEFAULT_MIN_WAIT_SECONDS);
            return Err(RelayError::AllCooled { min_wait_seconds });
        }

        candidates.sort_by(|a, b| {
            a.subscription_tier
                .priority()
                .cmp(&b.subscription_tier.priority())
                .then(a.last_used_at.cmp(&b.last_used_at))
        });

        let idx = (self.cursor as usize) % candidates.len();
        let chosen = candidates[idx];
        self.cursor = self.cursor.wrapping_add(1);

        if !request_type.is_image_gen() {
            self.global_lock = Some(GlobalLock {
                account_index: chosen.index,
                stamped_at: now_ms,
            });
        }

        Ok(chosen.index)
    }
}
