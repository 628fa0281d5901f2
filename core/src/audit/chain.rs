//! Hash-chain primitives shared by event and step writes. One chain per
//! session, seeded with 64 hex zeros, advanced by every chained write in
//! the order it occurs — events and steps share the same sequence.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn seed() -> String {
    "0".repeat(64)
}

pub fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `chain_hash[i] = H(chain_hash[i-1] ++ H(payload_i))`.
pub fn next(prev: &str, payload: &Value) -> String {
    let payload_bytes = serde_json::to_vec(payload).unwrap_or_default();
    let payload_hash = hash_hex(&payload_bytes);
    hash_hex(format!("{prev}{payload_hash}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seed_is_64_zeros() {
        assert_eq!(seed(), "0".repeat(64));
        assert_eq!(seed().len(), 64);
    }

    #[test]
    fn chain_is_deterministic() {
        let a = next(&seed(), &json!({"x": 1}));
        let b = next(&seed(), &json!({"x": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn tampering_with_payload_changes_downstream_hash() {
        let h1 = next(&seed(), &json!({"x": 1}));
        let h2 = next(&seed(), &json!({"x": 2}));
        assert_ne!(h1, h2);
    }
}
