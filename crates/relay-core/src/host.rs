//! Host-collaborator traits.
//!
//! Spec §1 names these as external collaborators whose interfaces the core
//! consumes rather than implements: a secret store, a logger, an HTTP
//! client. Modeling them as injectable trait objects is grounded on the
//! teacher's `HttpTransport` abstraction
//! (`siumai-core::execution::http::transport`), which exists for the same
//! reason — let the host observe/override the final request without the
//! library assuming a particular runtime.

use crate::error::RelayError;
use async_trait::async_trait;

/// Opaque key/value durable storage supplied by the host. The core never
/// assumes a particular backing (keychain, encrypted file, cloud secret
/// manager); it only needs to round-trip an opaque blob under one key.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RelayError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), RelayError>;
}

/// Minimal structured-logging seam for hosts that want the core's
/// `tracing` spans routed somewhere specific. Most hosts can ignore this
/// and simply install their own `tracing` subscriber; this trait exists for
/// hosts that have their own bespoke logger and no `tracing` subscriber at
/// all.
pub trait HostLogger: Send + Sync {
    fn log(&self, level: tracing::Level, message: &str);
}

/// A single outbound HTTP transport request, vendor-agnostic. The
/// orchestrator (C7) builds these; the host supplies the `HostHttpClient`
/// that actually performs the I/O, mirroring the teacher's
/// `HttpTransportRequest`/`HttpTransportResponse` pair.
#[derive(Debug, Clone)]
pub struct HostHttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HostHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Host-supplied HTTP client. The default implementation in
/// `relay-gateway` wraps `reqwest::Client` directly; hosts that need to
/// route through their own fetch layer (e.g. a sandboxed plugin runtime)
/// implement this instead.
#[async_trait]
pub trait HostHttpClient: Send + Sync {
    async fn send(&self, request: HostHttpRequest) -> Result<HostHttpResponse, RelayError>;
}
