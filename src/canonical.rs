//! Canonical serialization for deterministic comparison and hashing.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable map order: documents keep unknown fields in `BTreeMap`s
//! - Stable Vec order: vectors serialize in index order
//!
//! Two values with equal canonical bytes are treated as identical; the change
//! verifier and idempotent assembly both rely on this.

use serde::Serialize;
use sha2::{Digest, Sha256};
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical (compact) JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// Canonical JSON text of a value.
pub fn to_canonical_string<T: Serialize>(value: &T) -> String {
    String::from_utf8(to_canonical_bytes(value)).expect("serde_json emits UTF-8")
}

/// Indented JSON for prompts and reports. Not used for hashing.
pub fn to_pretty_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).expect("Pretty serialization failed")
}

/// Compute canonical xxh64 hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

/// SHA-256 of the canonical bytes, as 64 lowercase hex characters.
///
/// Used as the document digest handed to callers for persistence checks.
pub fn canonical_digest<T: Serialize>(value: &T) -> String {
    hex::encode(Sha256::digest(to_canonical_bytes(value)))
}

/// Whether two values serialize to identical canonical bytes.
pub fn canonically_equal<A: Serialize, B: Serialize>(a: &A, b: &B) -> bool {
    to_canonical_bytes(a) == to_canonical_bytes(b)
}
