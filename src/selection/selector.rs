//! Ranking, diversity-aware selection and bounded concurrent fetching.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::candidate::{Candidate, RankedCandidate, SelectedCandidate};
use crate::executors::{MediaFetcher, RelevanceScorer};
use crate::metrics::MetricsAccumulator;
use crate::types::config::SelectionConfig;
use crate::{ReelError, ReelResult};

/// Reference resolution for the quality heuristic (short edge, in pixels).
const REFERENCE_RESOLUTION: f64 = 1080.0;

/// Score given to a property that cannot be judged.
const NEUTRAL_SCORE: f64 = 0.5;

/// A candidate with its weighted score before the diversity bonus.
#[derive(Debug, Clone)]
struct Scored {
    candidate: Candidate,
    relevance: f64,
    base_score: f64,
}

/// Picks the best candidates and downloads them.
pub struct CandidateSelector {
    config: SelectionConfig,
    fetch_semaphore: Arc<Semaphore>,
    metrics: Option<Arc<MetricsAccumulator>>,
}

impl CandidateSelector {
    /// Creates a selector.
    pub fn new(config: SelectionConfig) -> ReelResult<Self> {
        if config.max_parallel_fetches == 0 {
            return Err(ReelError::config(
                "selection.max_parallel_fetches must be greater than 0",
            ));
        }
        if config.fetch_timeout_secs == 0 {
            return Err(ReelError::config("selection.fetch_timeout_secs must be greater than 0"));
        }
        for (name, weight) in [
            ("relevance_weight", config.relevance_weight),
            ("quality_weight", config.quality_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ReelError::config(format!(
                    "selection.{} must be between 0 and 1",
                    name
                )));
            }
        }

        let fetch_semaphore = Arc::new(Semaphore::new(config.max_parallel_fetches));
        Ok(Self {
            config,
            fetch_semaphore,
            metrics: None,
        })
    }

    /// Records the time saved by parallel downloads in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsAccumulator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Selection settings.
    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Local quality heuristic in `[0, 1]`.
    ///
    /// Mean of three parts: resolution (short edge relative to 1080p, capped
    /// at 1), orientation (1 for the preferred orientation, 0.75 for square,
    /// 0.5 otherwise) and how close the duration is to the target length.
    /// Unknown properties score 0 for resolution and 0.5 for the rest; a
    /// non-finite duration or target counts as unknown.
    pub fn quality_score(&self, candidate: &Candidate) -> f64 {
        let quality = &candidate.quality;

        let resolution = if quality.has_dimensions() {
            (quality.width.min(quality.height) as f64 / REFERENCE_RESOLUTION).min(1.0)
        } else {
            0.0
        };

        let orientation = if !quality.has_dimensions() {
            NEUTRAL_SCORE
        } else if quality.width == quality.height {
            0.75
        } else if quality.is_portrait() == self.config.prefer_portrait {
            1.0
        } else {
            0.5
        };

        let target = self.config.target_duration_secs;
        let duration = if quality.duration_secs.is_finite()
            && target.is_finite()
            && quality.duration_secs > 0.0
            && target > 0.0
        {
            let longest = quality.duration_secs.max(target);
            1.0 - (quality.duration_secs - target).abs() / longest
        } else {
            NEUTRAL_SCORE
        };

        (resolution + orientation + duration) / 3.0
    }

    async fn score_all(
        &self,
        reference: &str,
        candidates: Vec<Candidate>,
        scorer: &dyn RelevanceScorer,
    ) -> Vec<Scored> {
        let mut scored = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let relevance = match scorer.score(reference, &candidate).await {
                Ok(score) if score.is_nan() => 0.0,
                Ok(score) => score.clamp(0.0, 1.0),
                Err(e) => {
                    tracing::warn!(
                        candidate = %candidate.id,
                        error = %e,
                        "Relevance scoring failed, using 0"
                    );
                    0.0
                }
            };

            let base_score = self.config.relevance_weight * relevance
                + self.config.quality_weight * self.quality_score(&candidate);
            scored.push(Scored {
                candidate,
                relevance,
                base_score,
            });
        }

        scored
    }

    /// Scores and ranks candidates without fetching anything.
    ///
    /// Candidates are picked greedily by their current effective score (the
    /// diversity bonus applies while their category has not been picked
    /// yet), at most `category_cap` per category. When that yields fewer
    /// than `max_count` picks, the cap is lifted for the remaining slots. The
    /// result is sorted by descending final score, ties broken by id.
    pub async fn rank(
        &self,
        reference: &str,
        candidates: Vec<Candidate>,
        scorer: &dyn RelevanceScorer,
        max_count: usize,
        category_cap: usize,
    ) -> Vec<RankedCandidate> {
        if max_count == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let scored = self.score_all(reference, candidates, scorer).await;
        self.pick(scored, max_count, category_cap)
    }

    fn pick(&self, mut remaining: Vec<Scored>, max_count: usize, category_cap: usize) -> Vec<RankedCandidate> {
        let mut picked = Vec::with_capacity(max_count.min(remaining.len()));
        let mut per_category: HashMap<String, usize> = HashMap::new();

        for cap in [Some(category_cap), None] {
            while picked.len() < max_count {
                let best = remaining
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| match cap {
                        Some(cap) => per_category.get(&s.candidate.category).copied().unwrap_or(0) < cap,
                        None => true,
                    })
                    .map(|(index, s)| (index, self.effective_score(s, &per_category)))
                    .max_by(|(a_index, a_score), (b_index, b_score)| {
                        // Lower id wins ties, so it must compare as greater.
                        a_score.total_cmp(b_score).then_with(|| {
                            remaining[*b_index]
                                .candidate
                                .id
                                .cmp(&remaining[*a_index].candidate.id)
                        })
                    });

                let Some((index, final_score)) = best else {
                    break;
                };

                let chosen = remaining.swap_remove(index);
                *per_category.entry(chosen.candidate.category.clone()).or_insert(0) += 1;
                picked.push(RankedCandidate {
                    candidate: chosen.candidate,
                    relevance: chosen.relevance,
                    final_score,
                });
            }

            if picked.len() >= max_count || remaining.is_empty() {
                break;
            }
            tracing::debug!(
                picked = picked.len(),
                max_count,
                category_cap,
                "Relaxing category cap"
            );
        }

        picked.sort_by(compare_ranked);
        picked
    }

    fn effective_score(&self, scored: &Scored, per_category: &HashMap<String, usize>) -> f64 {
        if per_category.contains_key(&scored.candidate.category) {
            scored.base_score
        } else {
            scored.base_score + self.config.diversity_bonus
        }
    }

    /// Ranks candidates and fetches the winners.
    ///
    /// Downloads run concurrently, at most `max_parallel_fetches` at a time
    /// and each under `fetch_timeout_secs`. A candidate whose fetch fails is
    /// logged and dropped; it is not replaced, so the result may be shorter
    /// than `max_count`. The result keeps the ranking order.
    pub async fn select_and_fetch(
        &self,
        reference: &str,
        candidates: Vec<Candidate>,
        scorer: &dyn RelevanceScorer,
        fetcher: Arc<dyn MediaFetcher>,
        max_count: usize,
        category_cap: usize,
    ) -> Vec<SelectedCandidate> {
        let ranked = self
            .rank(reference, candidates, scorer, max_count, category_cap)
            .await;
        if ranked.is_empty() {
            return Vec::new();
        }

        let mut paths = self.fetch_all(&ranked, fetcher).await;

        let selected: Vec<SelectedCandidate> = ranked
            .into_iter()
            .enumerate()
            .filter_map(|(index, ranked)| {
                paths.remove(&index).map(|local_path| SelectedCandidate {
                    candidate: ranked.candidate,
                    final_score: ranked.final_score,
                    local_path,
                })
            })
            .collect();

        tracing::info!(selected = selected.len(), max_count, "Candidates selected");
        selected
    }

    /// Same as [`CandidateSelector::select_and_fetch`] with the configured
    /// category cap.
    pub async fn select_and_fetch_default(
        &self,
        reference: &str,
        candidates: Vec<Candidate>,
        scorer: &dyn RelevanceScorer,
        fetcher: Arc<dyn MediaFetcher>,
        max_count: usize,
    ) -> Vec<SelectedCandidate> {
        let cap = self.config.category_cap;
        self.select_and_fetch(reference, candidates, scorer, fetcher, max_count, cap)
            .await
    }

    /// Fetches every ranked candidate, returning the paths by rank index.
    async fn fetch_all(
        &self,
        ranked: &[RankedCandidate],
        fetcher: Arc<dyn MediaFetcher>,
    ) -> HashMap<usize, PathBuf> {
        let mut join_set = JoinSet::new();
        let mut pending = HashMap::with_capacity(ranked.len());
        let started = Instant::now();

        for (index, item) in ranked.iter().enumerate() {
            let fetcher = Arc::clone(&fetcher);
            let semaphore = Arc::clone(&self.fetch_semaphore);
            let timeout = self.config.fetch_timeout();
            let id = item.candidate.id.clone();

            let handle = join_set.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let fetch_started = Instant::now();
                let result = match tokio::time::timeout(timeout, fetcher.fetch(&id)).await {
                    Ok(result) => result,
                    Err(_) => Err(ReelError::FetchFailed(id, "timed out".to_string())),
                };
                (result, fetch_started.elapsed())
            });
            pending.insert(handle.id(), index);
        }

        let mut paths = HashMap::with_capacity(ranked.len());
        let mut busy = Duration::ZERO;
        while let Some(joined) = join_set.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((task_id, (outcome, latency))) => {
                    busy += latency;
                    (task_id, outcome)
                }
                Err(e) => (e.id(), Err(ReelError::other(format!("fetch task aborted: {}", e)))),
            };
            let Some(index) = pending.remove(&task_id) else {
                continue;
            };

            match outcome {
                Ok(path) => {
                    paths.insert(index, path);
                }
                Err(e) => {
                    tracing::warn!(
                        candidate = %ranked[index].candidate.id,
                        error = %e,
                        "Fetch failed, dropping candidate"
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_time_saved(busy.as_secs_f64() - started.elapsed().as_secs_f64());
        }

        paths
    }
}

fn compare_ranked(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}
