//! External collaborators of the orchestration core.
//!
//! The core only talks to the outside world through three traits:
//!
//! - [`TaskExecutor`] - generation calls (themes, scripts, keywords...)
//! - [`RelevanceScorer`] - relevance of a candidate clip to a reference text
//! - [`MediaFetcher`] - downloads a candidate's media to a local path
//!
//! Command-line backed implementations are provided for each, plus a local
//! lexical scorer.

mod base;
mod command;
mod fetcher;
mod scorer;

pub use base::{parse_output, TaskExecutor};
pub use command::CommandExecutor;
pub use fetcher::{CommandFetcher, MediaFetcher};
pub use scorer::{KeywordScorer, RelevanceScorer};
