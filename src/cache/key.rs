//! Deterministic cache keys for (operation, parameters) pairs.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Length of an encoded key, in hex characters (128 bits).
pub const KEY_LENGTH: usize = 32;

/// Turns an operation name and its parameter bundle into a stable key.
///
/// Two calls that mean the same thing collide: volatile fields such as
/// correlation ids or timeouts are ignored, and lists made only of strings
/// are compared as sets. Any other difference yields a different key.
#[derive(Debug, Clone)]
pub struct CacheKeyCodec {
    volatile_fields: BTreeSet<String>,
}

impl CacheKeyCodec {
    /// Creates a codec that ignores the given fields at any depth.
    pub fn new<I, S>(volatile_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            volatile_fields: volatile_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Fields dropped during normalization.
    pub fn volatile_fields(&self) -> impl Iterator<Item = &str> {
        self.volatile_fields.iter().map(String::as_str)
    }

    /// Normalizes a parameter bundle.
    ///
    /// Drops volatile fields, sorts all-string lists and recurses into nested
    /// objects and arrays. Every other value is returned untouched.
    pub fn normalize(&self, params: &Value) -> Value {
        match params {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(k, _)| !self.volatile_fields.contains(k.as_str()))
                    .map(|(k, v)| (k.clone(), self.normalize(v)))
                    .collect(),
            ),
            Value::Array(items) if items.iter().all(Value::is_string) => {
                let mut strings: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                strings.sort_unstable();
                Value::Array(strings.into_iter().map(|s| Value::String(s.to_string())).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.normalize(v)).collect()),
            other => other.clone(),
        }
    }

    /// Encodes an (operation, parameters) pair as a fixed-length hex digest.
    pub fn encode(&self, operation: &str, params: &Value) -> String {
        // serde_json maps are ordered by key, so the serialization is canonical.
        let document = json!({
            "operation": operation,
            "params": self.normalize(params),
        });

        let mut hasher = Sha256::new();
        hasher.update(document.to_string().as_bytes());

        let mut key = hex::encode(hasher.finalize());
        key.truncate(KEY_LENGTH);
        key
    }
}

impl Default for CacheKeyCodec {
    fn default() -> Self {
        Self::new(crate::types::config::CacheConfig::default().volatile_fields)
    }
}
