//! Ambient configuration surface (spec §12). The host constructs one
//! `RelayConfig` and hands it to [`crate::orchestrator::Orchestrator`]
//! alongside its `SecretStore`/`HostHttpClient` implementations — mirrors
//! the teacher's builder-supplied transport/config pattern rather than a
//! file-based config format.

use std::time::Duration;

use relay_core::SchedulingMode;

pub const DEFAULT_ANTIGRAVITY_ENDPOINTS: &[&str] =
    &["daily-cloudcode-pa.sandbox.googleapis.com", "cloudcode-pa.googleapis.com"];

pub const DEFAULT_QWEN_BASE_URL: &str = "https://portal.qwen.ai/v1";

const QWEN_BASE_URL_ENV: &str = "RELAY_QWEN_BASE_URL";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub scheduling_mode: SchedulingMode,
    /// Antigravity endpoint fallback order (spec §6); tried in sequence by
    /// the orchestrator's per-call loop.
    pub antigravity_endpoints: Vec<String>,
    /// Qwen API base URL. Normally overridden per-account from the OAuth
    /// token response's `resource_url`; this is only the fallback default,
    /// itself overridable via `RELAY_QWEN_BASE_URL` for integration tests
    /// against a local `wiremock` server.
    pub qwen_base_url: String,
    /// OAuth authorization-code callback wait (spec §5 "Timeouts").
    pub oauth_callback_timeout: Duration,
    /// Device-flow polling ceiling (spec §5); mirrors
    /// `relay_oauth::MAX_POLL_DURATION_MS`.
    pub device_poll_ceiling: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            scheduling_mode: SchedulingMode::default(),
            antigravity_endpoints: DEFAULT_ANTIGRAVITY_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            qwen_base_url: std::env::var(QWEN_BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_QWEN_BASE_URL.to_string()),
            oauth_callback_timeout: Duration::from_secs(300),
            device_poll_ceiling: Duration::from_millis(relay_oauth::MAX_POLL_DURATION_MS as u64),
        }
    }
}

impl RelayConfig {
    /// Overrides the Qwen base URL for a specific account's
    /// `resource_url`, falling back to the configured default.
    pub fn qwen_base_url_for(&self, resource_url: Option<&str>) -> String {
        resource_url.map(str::to_string).unwrap_or_else(|| self.qwen_base_url.clone())
    }
}
