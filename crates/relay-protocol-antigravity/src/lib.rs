//! Request/Response Translator, Antigravity (Gemini envelope) target
//! (spec §4.5.1, §4.6.1).

pub mod envelope;
pub mod headers;
pub mod request;
pub mod response;

pub use envelope::AntigravityEnvelope;
pub use headers::{HeaderPlan, HeaderStyle, build_headers};
pub use request::{ENDPOINT_FALLBACK, PreparedRequest, ResolvedModel, endpoint_url, is_claude_model, prepare, resolve_model};
pub use response::{translate_non_streaming, translate_streaming_line};
