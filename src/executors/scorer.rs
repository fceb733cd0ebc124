//! Relevance scoring collaborators.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::selection::Candidate;
use crate::ReelResult;

/// Scores how well a candidate matches a reference text.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Returns a score in `[0, 1]`. Values outside the range are clamped by
    /// the caller.
    async fn score(&self, reference: &str, candidate: &Candidate) -> ReelResult<f64>;
}

/// Local scorer based on word overlap.
///
/// Jaccard similarity between the words of the reference and the words of
/// the candidate's description and category.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    /// Creates a new keyword scorer.
    pub fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(str::to_lowercase)
            .collect()
    }

    /// Synchronous form of [`RelevanceScorer::score`].
    pub fn similarity(reference: &str, candidate: &Candidate) -> f64 {
        let left = Self::tokens(reference);
        let right = Self::tokens(&format!("{} {}", candidate.description, candidate.category));

        let union = left.union(&right).count();
        if union == 0 {
            return 0.0;
        }
        left.intersection(&right).count() as f64 / union as f64
    }
}

#[async_trait]
impl RelevanceScorer for KeywordScorer {
    async fn score(&self, reference: &str, candidate: &Candidate) -> ReelResult<f64> {
        Ok(Self::similarity(reference, candidate))
    }
}
