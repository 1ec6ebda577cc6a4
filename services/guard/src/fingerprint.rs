//! Device fingerprints
//!
//! A fingerprint is an anomaly heuristic derived from the user agent and
//! client IP. It is not a credential and carries no secret.

use sha2::{Digest, Sha256};

/// Stand-in for an absent user agent or IP
pub const MISSING_INPUT: &str = "unknown";

const FINGERPRINT_PREFIX: &str = "fp_";
const FINGERPRINT_HEX_LEN: usize = 16;

/// Deterministic opaque device id for `(user_agent, ip)`
pub fn fingerprint(user_agent: &str, ip_address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(user_agent).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize(ip_address).as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    format!("{}{}", FINGERPRINT_PREFIX, &digest[..FINGERPRINT_HEX_LEN])
}

fn normalize(input: &str) -> &str {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        MISSING_INPUT
    } else {
        trimmed
    }
}
