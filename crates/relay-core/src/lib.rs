//! Shared types, error currency, and host-collaborator traits for the
//! account-rotation / protocol-bridge / OAuth gateway core.
//!
//! This crate has no network or persistence code of its own: it defines the
//! vocabulary (`Account`, `RateLimitRecord`, `SessionBinding`, …) and the
//! seams (`SecretStore`, `HostLogger`, `HostHttpClient`) that the other
//! crates in this workspace implement against.

pub mod account;
pub mod error;
pub mod host;
pub mod rate_limit;
pub mod schema;
pub mod session;

pub use account::{Account, DisabledState, SubscriptionTier};
pub use error::{ErrorCategory, RelayError};
pub use host::{HostHttpClient, HostHttpRequest, HostHttpResponse, HostLogger, SecretStore};
pub use rate_limit::{RateLimitReason, RateLimitRecord};
pub use session::{GlobalLock, RequestType, SchedulingMode, SessionBinding};
