//! Memoization of expensive external calls.
//!
//! - [`CacheKeyCodec`] turns `(operation, params)` into a stable key.
//! - [`CacheStore`] keeps values under a byte budget with TTL expiry and LRU
//!   eviction, and persists crash-safe snapshots on a background thread.
//!
//! ## Example
//!
//! ```rust,ignore
//! use reelsmith::cache::CacheStore;
//!
//! let store = CacheStore::open(&config.cache, metrics)?;
//! let params = json!({"category": "animals"});
//!
//! if store.get("theme", &params).is_none() {
//!     store.set("theme", &params, "Why do crows remember faces?", ttl);
//! }
//! ```

mod entry;
mod key;
mod snapshot;
mod store;

pub use entry::CacheEntry;
pub use key::{CacheKeyCodec, KEY_LENGTH};
pub use snapshot::{load_snapshot, write_snapshot, SnapshotDocument, SnapshotWriter, SNAPSHOT_VERSION};
pub use store::{CacheStats, CacheStore};
