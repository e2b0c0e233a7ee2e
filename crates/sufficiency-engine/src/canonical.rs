//! Canonical JSON serialization and content hashing.
//!
//! Two pipeline runs with identical inputs must produce identical
//! `build_hash_v1` values, so every hashed document goes through one
//! canonical form: object keys sorted lexicographically, `,`/`:` separators
//! with no whitespace, non-ASCII preserved verbatim, numbers in their
//! shortest round-trip form. Hash-bearing fields are stripped before a
//! document is hashed so a hash never feeds itself.

use serde_json::Value;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Canonical writer
// ---------------------------------------------------------------------------

/// Serialize a JSON value canonically: sorted keys, stable separators.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // serde_json renders scalars deterministically (ryu shortest
            // form for floats, minimal escapes for strings).
            out.push_str(&value.to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 of a text document.
pub fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Lowercase hex SHA-256 of raw bytes (pack file validation).
pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Remove hash-bearing fields from a document before hashing it.
///
/// Any object key containing `hash` or `sha256` (case-insensitive) is
/// dropped recursively, so stored digests never participate in the digest
/// computed over the document.
pub fn strip_hash_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut cleaned = serde_json::Map::new();
            for (key, child) in map {
                let key_lower = key.to_lowercase();
                if key_lower.contains("hash") || key_lower.contains("sha256") {
                    continue;
                }
                cleaned.insert(key.clone(), strip_hash_fields(child));
            }
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_hash_fields).collect()),
        other => other.clone(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
