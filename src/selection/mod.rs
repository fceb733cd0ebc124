//! Candidate selection.
//!
//! Candidates are scored with an external relevance score blended with a
//! local quality heuristic, picked with a per-category cap and a one-time
//! diversity bonus, then fetched concurrently.

mod candidate;
mod selector;

pub use candidate::{Candidate, QualityMetadata, RankedCandidate, SelectedCandidate};
pub use selector::CandidateSelector;
