//! Canonical JSON and the state hash.
//!
//! One routine backs both the hash-based divergence check and the
//! output-level equality check: object keys sorted by byte order, array
//! order preserved, compact separators. The hash is SHA-256 over the
//! canonical text, hex-encoded.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("value is not JSON-serializable: {0}")]
    NotSerializable(String),
}

/// Recursively rebuild `value` with sorted object keys.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical JSON text for any serializable value.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let value =
        serde_json::to_value(value).map_err(|e| CanonicalError::NotSerializable(e.to_string()))?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

// Emits keys in sorted order regardless of how the map stores them.
fn write_canonical(value: &Value, out: &mut String) -> Result<(), CanonicalError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&encode_leaf(&Value::String(key.clone()))?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        leaf => out.push_str(&encode_leaf(leaf)?),
    }
    Ok(())
}

fn encode_leaf(value: &Value) -> Result<String, CanonicalError> {
    serde_json::to_string(value).map_err(|e| CanonicalError::NotSerializable(e.to_string()))
}

/// SHA-256 of the canonical JSON text, lowercase hex.
pub fn state_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let text = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(text.as_bytes())))
}

/// Deep equality under canonicalization.
pub fn canonical_eq<A: Serialize + ?Sized, B: Serialize + ?Sized>(
    a: &A,
    b: &B,
) -> Result<bool, CanonicalError> {
    Ok(canonical_json(a)? == canonical_json(b)?)
}
