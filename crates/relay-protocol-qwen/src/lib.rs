//! Request/Response Translator, Qwen (Chat Completions) target (spec
//! §4.5.2, §4.6.2).

pub mod normalize;
pub mod request;
pub mod response;

pub use normalize::build_messages;
pub use request::{DEFAULT_MAX_TOKENS, QWEN_DUMMY_TOOL_NAME, TranslationOutcome, prepare, rewrite_url};
pub use response::{StreamTranslator, buffer_forced_stream, replay_as_sse, translate_non_streaming};
