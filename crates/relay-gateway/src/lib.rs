//! Request Orchestrator (C7) and the thin command surface (spec §6), wired
//! against a concrete `reqwest`-backed `HostHttpClient` so a host can start
//! from `Orchestrator::new`/`Commands::new` without writing its own
//! transport first.

pub mod commands;
pub mod config;
pub mod orchestrator;

pub use commands::{AccountSummary, Commands, GatewayStatus, QwenLoginPoll};
pub use config::RelayConfig;
pub use orchestrator::{Orchestrator, SESSION_HEADER};

use async_trait::async_trait;
use relay_core::{HostHttpClient, HostHttpRequest, HostHttpResponse, RelayError};

/// Default `HostHttpClient`, grounded on the teacher's
/// `HttpTransport`/`HttpTransportRequest` pair
/// (`siumai-core::execution::http::transport`) but scoped to the buffered
/// request/response shape the orchestrator already builds — no
/// interceptor chain, since that concern belongs to whatever sits above
/// this crate.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HostHttpClient for ReqwestHttpClient {
    async fn send(&self, request: HostHttpRequest) -> Result<HostHttpResponse, RelayError> {
        let mut builder = self.client.request(
            request.method.parse().map_err(|_| RelayError::InternalError(format!("invalid method {}", request.method)))?,
            request.url.as_str(),
        );
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(HostHttpResponse { status, headers, body })
    }
}

/// Installs a `tracing_subscriber` formatter reading `RUST_LOG`, matching
/// the teacher's example-program initialization
/// (`tracing_subscriber::fmt().with_max_level(...).init()`). Opt-in: a
/// host that already installed its own subscriber should not call this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
