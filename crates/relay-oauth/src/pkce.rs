//! PKCE verifier/challenge generation (spec §4.1).
//!
//! Grounded on the pack's own Antigravity/Qwen OAuth clients
//! (`other_examples/…antigravity-oauth.rs`, `…qwen_portal.rs`), which both
//! reach for `rand` + `sha2` + `base64` URL-safe-no-pad encoding for
//! exactly this. The teacher carries none of this itself — `sha2` is the
//! one dependency this crate adds beyond the teacher's own `Cargo.toml`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

const VERIFIER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const VERIFIER_LENGTH: usize = 64;

#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

/// Generates a 64-character verifier over `[A-Za-z0-9-._~]` using a
/// cryptographic RNG and derives the S256 challenge.
pub fn generate_pkce() -> Pkce {
    let mut rng = rand::thread_rng();
    let verifier: String = (0..VERIFIER_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..VERIFIER_ALPHABET.len());
            VERIFIER_ALPHABET[idx] as char
        })
        .collect();
    let challenge = challenge_for(&verifier);
    Pkce {
        verifier,
        challenge,
    }
}

fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
