//! Random identifiers and token comparison.
//!
//! Every secret the daemon mints (one-time tokens, the dashboard session id,
//! the broker topic and signing secret) comes from the OS-seeded thread RNG.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// `len` random bytes, lowercase hex encoded (`2 * len` chars).
pub fn random_hex(len: usize) -> String {
    hex::encode(random_bytes(len))
}

/// `len` random bytes, base64url encoded without padding.
pub fn random_urlsafe(len: usize) -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(len))
}

/// A URL-safe random string of exactly `len` characters.
pub fn random_string(len: usize) -> String {
    let mut s = random_urlsafe(len);
    s.truncate(len);
    s
}

/// Exact, constant-time string equality. Lengths are not secret.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
