//! Candidate media items.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Technical metadata used by the quality heuristic.
///
/// Zero means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetadata {
    /// Width in pixels.
    #[serde(default)]
    pub width: u32,

    /// Height in pixels.
    #[serde(default)]
    pub height: u32,

    /// Clip length in seconds.
    #[serde(default)]
    pub duration_secs: f64,
}

impl QualityMetadata {
    /// Creates new metadata.
    pub fn new(width: u32, height: u32, duration_secs: f64) -> Self {
        Self {
            width,
            height,
            duration_secs,
        }
    }

    /// Whether both dimensions are known.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Whether the clip is taller than wide.
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

/// An item competing for a place in the selected set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Identifier understood by the fetcher.
    pub id: String,

    /// Category used for diversity.
    #[serde(default)]
    pub category: String,

    /// Technical metadata.
    #[serde(default)]
    pub quality: QualityMetadata,

    /// Free text handed to the relevance scorer.
    #[serde(default)]
    pub description: String,
}

impl Candidate {
    /// Creates a candidate without metadata.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            quality: QualityMetadata::default(),
            description: String::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the technical metadata.
    #[must_use]
    pub fn with_quality(mut self, quality: QualityMetadata) -> Self {
        self.quality = quality;
        self
    }
}

/// A ranked candidate before fetching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    /// The candidate itself.
    pub candidate: Candidate,

    /// Relevance reported by the scorer, clamped to `[0, 1]`.
    pub relevance: f64,

    /// Weighted score including the diversity bonus it earned.
    pub final_score: f64,
}

/// A selected and successfully fetched candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedCandidate {
    /// The candidate itself.
    pub candidate: Candidate,

    /// Score it was selected with.
    pub final_score: f64,

    /// Where the fetcher stored the media.
    pub local_path: PathBuf,
}
