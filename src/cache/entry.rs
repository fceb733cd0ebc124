//! A single cached value and its bookkeeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cached value with access bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Encoded key.
    pub key: String,

    /// Operation that produced the value.
    #[serde(default)]
    pub operation: String,

    /// Cached payload.
    pub value: Value,

    /// Moment the value was stored.
    pub created_at: DateTime<Utc>,

    /// Last time the value was read or written.
    pub last_accessed: DateTime<Utc>,

    /// Number of hits served.
    #[serde(default)]
    pub access_count: u64,

    /// Time to live.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// Size of the serialized payload.
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Creates a new entry with fresh timestamps.
    pub fn new(
        key: impl Into<String>,
        operation: impl Into<String>,
        value: Value,
        ttl: Duration,
        size_bytes: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            operation: operation.into(),
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
            size_bytes,
        }
    }

    /// Whether the entry is past its TTL at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // A creation time in the future (clock skew) counts as zero age.
        let elapsed = now
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        elapsed > self.ttl
    }

    /// Whether the entry is past its TTL.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Records a hit.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }
}

/// Serializes a [`Duration`] as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(ttl.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
