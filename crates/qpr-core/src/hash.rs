// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical serialization and content hashing.
//!
//! Grounded in the teacher's `canonical_json`/`receipt_hash` pair: any
//! `Serialize` type is first round-tripped through `serde_json::Value` so
//! that map keys are sorted (via `BTreeMap`) before hashing, giving a
//! stable byte sequence independent of field-declaration order.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Errors that can occur while canonicalizing or hashing a value.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The value could not be serialized to JSON.
    #[error("failed to serialize value for canonicalization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Produce a stable (sorted-key) JSON string for any `Serialize` type.
///
/// Re-serializes through a `BTreeMap`-backed intermediate so object keys at
/// every nesting level are lexicographically ordered, and numbers keep
/// `serde_json`'s stable textual form.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, HashError> {
    let json = serde_json::to_value(value)?;
    let canonical = canonicalize(json);
    Ok(serde_json::to_string(&canonical)?)
}

fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        other => other,
    }
}

/// Hex-encoded SHA-256 digest of the given bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex_encode(&digest)
}

/// Canonically serialize and hash a value in one step.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, HashError> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
