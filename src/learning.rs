//! Adaptive parameter learning from recommendation effectiveness
//!
//! Consumes effectiveness events and nudges the TF-IDF threshold, strategy
//! weights, and learning rate, keeping every parameter inside its bounds.

use crate::error::{Result, StorageError};
use crate::store::RecommendationRepository;
use crate::types::{EffectivenessEvent, LearningParameters, RecommendationStrategy};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Maximum effectiveness history length
const HISTORY_LIMIT: usize = 1000;

/// EWMA window over recent scores for threshold adaptation
const EWMA_WINDOW: usize = 20;

/// EWMA smoothing factor
const EWMA_ALPHA: f32 = 0.1;

/// Variance window for learning-rate adaptation
const VARIANCE_WINDOW: usize = 30;

const THRESHOLD_BOUNDS: (f32, f32) = (0.1, 0.5);
const WEIGHT_BOUNDS: (f32, f32) = (0.1, 3.0);
const RATE_BOUNDS: (f32, f32) = (0.01, 0.1);

/// Closes the feedback loop between recommendations and their outcomes
pub struct LearningAlgorithm {
    repo: Arc<RecommendationRepository>,
}

impl LearningAlgorithm {
    pub fn new(repo: Arc<RecommendationRepository>) -> Self {
        Self { repo }
    }

    /// Record one effectiveness event and adapt the persisted parameters
    pub async fn record_effectiveness(
        &self,
        event: &EffectivenessEvent,
    ) -> Result<LearningParameters> {
        let recommendation = self
            .repo
            .get(event.recommendation_id)
            .await?
            .ok_or_else(|| {
                StorageError::Constraint(format!(
                    "no recommendation with id {}",
                    event.recommendation_id
                ))
            })?;

        self.repo.record_effectiveness(event).await?;

        let mut parameters = self.repo.load_parameters().await?;
        apply_update(
            &mut parameters,
            recommendation.strategy,
            event.effectiveness_score,
        );
        self.repo.save_parameters(&parameters).await?;

        debug!(
            strategy = %recommendation.strategy,
            score = event.effectiveness_score,
            threshold = parameters.tfidf_threshold,
            rate = parameters.learning_rate,
            "Updated learning parameters"
        );
        Ok(parameters)
    }
}

/// Apply one effectiveness score to the parameters in place
pub fn apply_update(
    parameters: &mut LearningParameters,
    strategy: RecommendationStrategy,
    score: f32,
) {
    let score = score.clamp(0.0, 1.0);

    parameters.effectiveness_history.push(score);
    let len = parameters.effectiveness_history.len();
    if len > HISTORY_LIMIT {
        parameters.effectiveness_history.drain(..len - HISTORY_LIMIT);
    }

    adjust_strategy_weight(parameters, strategy, score);
    adapt_threshold(parameters);
    adapt_learning_rate(parameters);

    parameters.last_updated = Utc::now();
}

fn adjust_strategy_weight(
    parameters: &mut LearningParameters,
    strategy: RecommendationStrategy,
    score: f32,
) {
    let delta = ((score - 0.5) * parameters.learning_rate).clamp(-0.1, 0.1);
    let weight = parameters.strategy_weights.entry(strategy).or_insert(1.0);
    *weight = (*weight + delta).clamp(WEIGHT_BOUNDS.0, WEIGHT_BOUNDS.1);

    // Renormalize so the mean weight stays at 1.0, then re-clamp so a single
    // runaway weight cannot push another out of bounds
    let mean: f32 = parameters.strategy_weights.values().sum::<f32>()
        / parameters.strategy_weights.len() as f32;
    if mean > 0.0 {
        for weight in parameters.strategy_weights.values_mut() {
            *weight = (*weight / mean).clamp(WEIGHT_BOUNDS.0, WEIGHT_BOUNDS.1);
        }
    }
}

fn adapt_threshold(parameters: &mut LearningParameters) {
    let history = &parameters.effectiveness_history;
    let window = &history[history.len().saturating_sub(EWMA_WINDOW)..];
    let Some(first) = window.first() else {
        return;
    };

    let ewma = window
        .iter()
        .skip(1)
        .fold(*first, |acc, s| EWMA_ALPHA * s + (1.0 - EWMA_ALPHA) * acc);

    if ewma > 0.7 {
        parameters.tfidf_threshold -= 0.02;
    } else if ewma < 0.3 {
        parameters.tfidf_threshold += 0.02;
    }
    parameters.tfidf_threshold = parameters
        .tfidf_threshold
        .clamp(THRESHOLD_BOUNDS.0, THRESHOLD_BOUNDS.1);
}

fn adapt_learning_rate(parameters: &mut LearningParameters) {
    let history = &parameters.effectiveness_history;
    let window = &history[history.len().saturating_sub(VARIANCE_WINDOW)..];
    if window.is_empty() {
        return;
    }

    let mean: f32 = window.iter().sum::<f32>() / window.len() as f32;
    let variance: f32 =
        window.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / window.len() as f32;

    if variance < 0.1 {
        parameters.learning_rate += 0.01;
    } else if variance > 0.3 {
        parameters.learning_rate -= 0.01;
    }
    parameters.learning_rate = parameters.learning_rate.clamp(RATE_BOUNDS.0, RATE_BOUNDS.1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LearningParameters {
        LearningParameters::default()
    }

    #[test]
    fn test_history_bounded() {
        let mut p = params();
        for i in 0..1200 {
            apply_update(&mut p, RecommendationStrategy::TermRemoval, (i % 2) as f32);
        }
        assert_eq!(p.effectiveness_history.len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_good_scores_raise_weight_and_lower_threshold() {
        let mut p = params();
        for _ in 0..40 {
            apply_update(&mut p, RecommendationStrategy::TermRefinement, 0.95);
        }
        let weight = p.strategy_weights[&RecommendationStrategy::TermRefinement];
        assert!(weight > 1.0);
        // Consistent high scores push the EWMA over 0.7 and the threshold down
        assert!(p.tfidf_threshold < 0.25);
        assert!(p.tfidf_threshold >= THRESHOLD_BOUNDS.0);
    }

    #[test]
    fn test_bad_scores_lower_weight_and_raise_threshold() {
        let mut p = params();
        for _ in 0..40 {
            apply_update(&mut p, RecommendationStrategy::ContextualAddition, 0.05);
        }
        let weight = p.strategy_weights[&RecommendationStrategy::ContextualAddition];
        assert!(weight < 1.0);
        assert!(p.tfidf_threshold > 0.25);
        assert!(p.tfidf_threshold <= THRESHOLD_BOUNDS.1);
    }

    #[test]
    fn test_bounds_hold_under_arbitrary_sequences() {
        let mut p = params();
        let scores = [0.0, 1.0, 0.5, 0.9, 0.1, 0.99, 0.01, 0.7, 0.3];
        for (i, score) in scores.iter().cycle().take(500).enumerate() {
            let strategy = RecommendationStrategy::ALL[i % 3];
            apply_update(&mut p, strategy, *score);

            assert!((THRESHOLD_BOUNDS.0..=THRESHOLD_BOUNDS.1).contains(&p.tfidf_threshold));
            assert!((RATE_BOUNDS.0..=RATE_BOUNDS.1).contains(&p.learning_rate));
            assert!(p.effectiveness_history.len() <= HISTORY_LIMIT);
            for weight in p.strategy_weights.values() {
                assert!((WEIGHT_BOUNDS.0..=WEIGHT_BOUNDS.1).contains(weight));
            }
        }
    }

    #[test]
    fn test_low_variance_raises_learning_rate() {
        let mut p = params();
        for _ in 0..35 {
            apply_update(&mut p, RecommendationStrategy::TermRemoval, 0.5);
        }
        assert!(p.learning_rate > 0.05);
    }

    #[test]
    fn test_out_of_range_score_clamped() {
        let mut p = params();
        apply_update(&mut p, RecommendationStrategy::TermRemoval, 7.5);
        assert_eq!(p.effectiveness_history, vec![1.0]);
    }
}
