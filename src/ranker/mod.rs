// Ranker Module - Multi-factor Recommendation
//
// Produces the ordered recommendation list for a query file by combining
// three signals: semantic similarity from the ANN index, temporal recency
// of modification and access, and accumulated co-access counts. Each
// factor lands in [0, 1]; the final score is their configured weighted
// sum, deliberately not re-normalized.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity::ActivityTracker;
use crate::config::RankingConfig;
use crate::database::{FileRecord, FileStore};
use crate::embeddings::cosine_similarity;
use crate::error::{Error, Result};
use crate::index::VectorIndex;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Bounds on the requested result count.
const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 100;

/// Per-factor breakdown attached to every recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factors {
    pub semantic: f64,
    pub recency: f64,
    pub cooccurrence: f64,
}

/// The weights the scores were combined with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Weights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub path: String,
    pub final_score: f64,
    pub factors: Factors,
    pub weights: Weights,
}

/// Semantic score: cosine similarity clamped to [0, 1]. Negative cosines
/// carry no ranking signal here.
pub fn semantic_score(cosine: f32) -> f64 {
    (cosine as f64).clamp(0.0, 1.0)
}

/// Recency score from the ages of last modification and last access, in
/// fractional days. A missing access age contributes nothing. Both decay
/// terms are exponential; the sum is clamped to [0, 1].
pub fn recency_score(
    modified_age_days: f64,
    accessed_age_days: Option<f64>,
    config: &RankingConfig,
) -> f64 {
    let modified_term = 0.4 * (-modified_age_days.max(0.0) / config.modified_decay_days).exp();
    let accessed_term = match accessed_age_days {
        Some(age) => 0.6 * (-age.max(0.0) / config.accessed_decay_days).exp(),
        None => 0.0,
    };
    (modified_term + accessed_term).clamp(0.0, 1.0)
}

/// Co-occurrence score: a sigmoid over the pair count, in [0, 1).
/// n=0 yields 0, n=5 is roughly 0.46, n=10 roughly 0.76.
pub fn cooccurrence_score(co_count: u32) -> f64 {
    2.0 / (1.0 + (-(co_count as f64) / 5.0).exp()) - 1.0
}

struct Candidate {
    id: i64,
    path: String,
    factors: Factors,
    final_score: f64,
}

/// Combines the three signals into a ranked candidate list.
pub struct Ranker {
    store: Arc<FileStore>,
    index: Arc<VectorIndex>,
    activity: Arc<ActivityTracker>,
    config: RankingConfig,
}

impl Ranker {
    pub fn new(
        store: Arc<FileStore>,
        index: Arc<VectorIndex>,
        activity: Arc<ActivityTracker>,
        config: RankingConfig,
    ) -> Self {
        Self {
            store,
            index,
            activity,
            config,
        }
    }

    /// Ranked recommendations for the query path.
    ///
    /// Logs a self-access before assembling the candidate set, so every
    /// query feeds future co-occurrence; the query file itself is always
    /// excluded from the results.
    pub async fn recommend(
        &self,
        path: &str,
        limit: usize,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Recommendation>> {
        let limit = limit.clamp(MIN_LIMIT, MAX_LIMIT);

        let query = self
            .store
            .get_file_by_path(path)?
            .ok_or_else(|| Error::NotFound(format!("path is not indexed: {path}")))?;

        // Side effect first: the query itself is an access event, and the
        // candidate reads below must observe it.
        self.activity.log(path, now).await?;
        self.index.ensure_current(&self.store, cancel).await?;

        // A tombstoned or never-embedded query file still ranks by recency
        // and co-access; semantic is zero across the board.
        let query_embedding = if query.tombstoned {
            None
        } else {
            self.store.get_embedding(query.id)?
        };

        let mut ann_scores: HashMap<i64, f32> = HashMap::new();
        if let Some(embedding) = &query_embedding {
            let k_ann = (4 * limit).max(32);
            for (id, cosine) in self.index.query(embedding, k_ann)? {
                if id != query.id {
                    ann_scores.insert(id, cosine);
                }
            }
        }

        let mut co_counts: HashMap<i64, u32> = HashMap::new();
        for (id, count) in self.store.copartners(query.id)? {
            co_counts.insert(id, count);
        }

        let mut candidate_ids: Vec<i64> = ann_scores
            .keys()
            .chain(co_counts.keys())
            .copied()
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        candidate_ids.sort_unstable();

        let mut candidates = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let Some(file) = self.store.get_file_by_id(id)? else {
                continue;
            };
            if file.tombstoned {
                continue;
            }
            candidates.push(self.score_candidate(
                query_embedding.as_deref(),
                &ann_scores,
                &co_counts,
                file,
                now,
            )?);
        }

        // Deterministic order: final score, then semantic, then recency,
        // then ascending id.
        candidates.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| b.factors.semantic.total_cmp(&a.factors.semantic))
                .then_with(|| b.factors.recency.total_cmp(&a.factors.recency))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);

        debug!(
            "Ranked {} candidates for {} (limit {})",
            candidates.len(),
            path,
            limit
        );

        let weights = Weights {
            alpha: self.config.alpha,
            beta: self.config.beta,
            gamma: self.config.gamma,
        };
        Ok(candidates
            .into_iter()
            .map(|c| Recommendation {
                path: c.path,
                final_score: c.final_score,
                factors: c.factors,
                weights: weights.clone(),
            })
            .collect())
    }

    fn score_candidate(
        &self,
        query_embedding: Option<&[f32]>,
        ann_scores: &HashMap<i64, f32>,
        co_counts: &HashMap<i64, u32>,
        file: FileRecord,
        now: i64,
    ) -> Result<Candidate> {
        let semantic = match ann_scores.get(&file.id) {
            Some(&cosine) => semantic_score(cosine),
            None => match query_embedding {
                // Co-access candidates outside the ANN cut still get their
                // true similarity when both vectors exist.
                Some(qe) => match self.store.get_embedding(file.id)? {
                    Some(candidate_embedding) => {
                        semantic_score(cosine_similarity(qe, &candidate_embedding))
                    }
                    None => 0.0,
                },
                None => 0.0,
            },
        };

        let modified_age_days = (now - file.last_modified).max(0) as f64 / MS_PER_DAY;
        let accessed_age_days = self
            .store
            .get_activity(file.id)?
            .map(|a| (now - a.last_accessed).max(0) as f64 / MS_PER_DAY);
        let recency = recency_score(modified_age_days, accessed_age_days, &self.config);

        let cooccurrence = cooccurrence_score(co_counts.get(&file.id).copied().unwrap_or(0));

        let final_score = self.config.alpha * semantic
            + self.config.beta * recency
            + self.config.gamma * cooccurrence;

        Ok(Candidate {
            id: file.id,
            path: file.path,
            factors: Factors {
                semantic,
                recency,
                cooccurrence,
            },
            final_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RankingConfig {
        RankingConfig::default()
    }

    #[test]
    fn semantic_clamps_negative_cosines() {
        assert_eq!(semantic_score(-0.4), 0.0);
        assert_eq!(semantic_score(0.5), 0.5);
        assert_eq!(semantic_score(1.2), 1.0);
    }

    #[test]
    fn recency_is_monotone_in_access_age() {
        let cfg = config();
        let fresher = recency_score(10.0, Some(1.0), &cfg);
        let staler = recency_score(10.0, Some(5.0), &cfg);
        assert!(fresher > staler);
    }

    #[test]
    fn recency_is_monotone_in_modification_age() {
        let cfg = config();
        let fresher = recency_score(1.0, Some(3.0), &cfg);
        let staler = recency_score(20.0, Some(3.0), &cfg);
        assert!(fresher > staler);
    }

    #[test]
    fn recency_without_activity_drops_the_access_term() {
        let cfg = config();
        let with_access = recency_score(0.0, Some(0.0), &cfg);
        let without_access = recency_score(0.0, None, &cfg);
        assert!((with_access - 1.0).abs() < 1e-9);
        assert!((without_access - 0.4).abs() < 1e-9);
    }

    #[test]
    fn recency_clamps_future_timestamps() {
        let cfg = config();
        let score = recency_score(-5.0, Some(-5.0), &cfg);
        assert!(score <= 1.0);
    }

    #[test]
    fn cooccurrence_matches_reference_points() {
        assert_eq!(cooccurrence_score(0), 0.0);
        assert!((cooccurrence_score(5) - 0.462).abs() < 0.01);
        assert!((cooccurrence_score(10) - 0.762).abs() < 0.01);
        assert!(cooccurrence_score(1000) < 1.0);
    }

    #[test]
    fn cooccurrence_is_monotone() {
        let mut previous = -1.0;
        for n in 0..50 {
            let score = cooccurrence_score(n);
            assert!(score > previous);
            previous = score;
        }
    }
}
