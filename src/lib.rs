//! # Reelsmith
//!
//! Cache-aware task orchestration for short-video generation pipelines.
//!
//! Reelsmith memoizes expensive external calls (generation models, media
//! search) in a persistent LRU cache, runs independent generation tasks
//! concurrently with per-task fallbacks, and picks the best media candidates
//! before downloading them in parallel.
//!
//! ## Modules
//!
//! - [`cache`] - Key codec and persistent LRU/TTL store
//! - [`dispatch`] - Concurrent batch execution with fallbacks
//! - [`selection`] - Candidate ranking and bounded concurrent fetching
//! - [`executors`] - External collaborators (executors, scorers, fetchers)
//! - [`metrics`] - Shared performance counters
//! - [`cli`] - Command line interface
//! - [`types`] - Configuration and errors

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod dispatch;
pub mod executors;
pub mod metrics;
pub mod selection;
pub mod types;

pub use types::config::Config;
pub use types::errors::{ReelError, ReelResult};
