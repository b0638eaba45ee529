//! Recommendation, effectiveness, and learning-parameter persistence

use super::{parse_timestamp, Database};
use crate::error::{Result, StorageError};
use crate::types::{
    EffectivenessEvent, LearningParameters, Recommendation, RecommendationStrategy,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Repository owning the recommendation, effectiveness, and learning tables
pub struct RecommendationRepository {
    db: Arc<Database>,
}

impl RecommendationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a recommendation row
    pub async fn save(&self, recommendation: &Recommendation) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO search_recommendations
                (id, query, suggested_terms, strategy, tfidf_threshold, confidence,
                 generated_at, expires_at, total_documents, analyzed_documents)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                recommendation.id.to_string(),
                recommendation.query,
                serde_json::to_string(&recommendation.suggested_terms)?,
                recommendation.strategy.as_str(),
                recommendation.tfidf_threshold as f64,
                recommendation.confidence as f64,
                recommendation.generated_at.to_rfc3339(),
                recommendation.expires_at.to_rfc3339(),
                recommendation.total_documents as i64,
                recommendation.analyzed_documents as i64
            ],
        )
        .map_err(StorageError::Sql)?;
        debug!(query = %recommendation.query, strategy = %recommendation.strategy, "Saved recommendation");
        Ok(())
    }

    /// Most recent non-expired recommendation for a query, if any
    pub async fn get_current(&self, query: &str) -> Result<Option<Recommendation>> {
        let conn = self.db.lock().await;
        let now = Utc::now().to_rfc3339();
        conn.query_row(
            r#"
            SELECT id, query, suggested_terms, strategy, tfidf_threshold, confidence,
                   generated_at, expires_at, total_documents, analyzed_documents
            FROM search_recommendations
            WHERE query = ?1 AND expires_at > ?2
            ORDER BY generated_at DESC
            LIMIT 1
            "#,
            params![query, now],
            recommendation_from_row,
        )
        .optional()
        .map_err(|e| StorageError::Sql(e).into())
    }

    /// Fetch a recommendation by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Recommendation>> {
        let conn = self.db.lock().await;
        conn.query_row(
            r#"
            SELECT id, query, suggested_terms, strategy, tfidf_threshold, confidence,
                   generated_at, expires_at, total_documents, analyzed_documents
            FROM search_recommendations
            WHERE id = ?1
            "#,
            [id.to_string()],
            recommendation_from_row,
        )
        .optional()
        .map_err(|e| StorageError::Sql(e).into())
    }

    /// Append an effectiveness event
    pub async fn record_effectiveness(&self, event: &EffectivenessEvent) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            r#"
            INSERT INTO recommendation_effectiveness
                (recommendation_id, was_used, improved_results, usage_time,
                 effectiveness_score, original_result_count, improved_result_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.recommendation_id.to_string(),
                event.was_used,
                event.improved_results,
                event.usage_time.map(|t| t.to_rfc3339()),
                event.effectiveness_score.clamp(0.0, 1.0) as f64,
                event.original_result_count as i64,
                event.improved_result_count.map(|c| c as i64)
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Constraint(format!(
                    "no recommendation with id {}",
                    event.recommendation_id
                ))
            }
            other => StorageError::Sql(other),
        })?;
        Ok(())
    }

    /// Remove expired recommendations (effectiveness rows cascade)
    pub async fn purge_expired(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let now = Utc::now().to_rfc3339();
        let removed = conn
            .execute(
                "DELETE FROM search_recommendations WHERE expires_at <= ?1",
                [now],
            )
            .map_err(StorageError::Sql)?;
        Ok(removed)
    }

    /// Load the learning parameters, initializing the singleton row on first
    /// access
    pub async fn load_parameters(&self) -> Result<LearningParameters> {
        let conn = self.db.lock().await;
        let existing = conn
            .query_row(
                r#"
                SELECT tfidf_threshold, effectiveness_history, strategy_weights,
                       learning_rate, last_updated
                FROM learning_parameters
                WHERE id = 1
                "#,
                [],
                parameters_from_row,
            )
            .optional()
            .map_err(StorageError::Sql)?;

        if let Some(params) = existing {
            return Ok(params);
        }

        let defaults = LearningParameters::default();
        conn.execute(
            r#"
            INSERT INTO learning_parameters
                (id, tfidf_threshold, effectiveness_history, strategy_weights,
                 learning_rate, last_updated)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                defaults.tfidf_threshold as f64,
                serde_json::to_string(&defaults.effectiveness_history)?,
                serde_json::to_string(&defaults.strategy_weights)?,
                defaults.learning_rate as f64,
                defaults.last_updated.to_rfc3339()
            ],
        )
        .map_err(StorageError::Sql)?;
        Ok(defaults)
    }

    /// Persist the learning parameters singleton
    pub async fn save_parameters(&self, parameters: &LearningParameters) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO learning_parameters
                (id, tfidf_threshold, effectiveness_history, strategy_weights,
                 learning_rate, last_updated)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                parameters.tfidf_threshold as f64,
                serde_json::to_string(&parameters.effectiveness_history)?,
                serde_json::to_string(&parameters.strategy_weights)?,
                parameters.learning_rate as f64,
                parameters.last_updated.to_rfc3339()
            ],
        )
        .map_err(StorageError::Sql)?;
        Ok(())
    }

    /// Drop recommendations and effectiveness rows, preserving the learning
    /// parameters
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(StorageError::Sql)?;
        tx.execute("DELETE FROM recommendation_effectiveness", [])
            .map_err(StorageError::Sql)?;
        tx.execute("DELETE FROM search_recommendations", [])
            .map_err(StorageError::Sql)?;
        tx.commit().map_err(StorageError::Sql)?;
        Ok(())
    }
}

fn recommendation_from_row(row: &Row<'_>) -> rusqlite::Result<Recommendation> {
    let id: String = row.get(0)?;
    let suggested_terms: String = row.get(2)?;
    let strategy: String = row.get(3)?;
    let generated_at: String = row.get(6)?;
    let expires_at: String = row.get(7)?;

    Ok(Recommendation {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        query: row.get(1)?,
        suggested_terms: serde_json::from_str(&suggested_terms).unwrap_or_default(),
        strategy: RecommendationStrategy::parse(&strategy)
            .unwrap_or(RecommendationStrategy::TermRemoval),
        tfidf_threshold: row.get::<_, f64>(4)? as f32,
        confidence: row.get::<_, f64>(5)? as f32,
        generated_at: parse_timestamp(&generated_at).unwrap_or_else(|_| Utc::now()),
        expires_at: parse_timestamp(&expires_at).unwrap_or_else(|_| Utc::now()),
        total_documents: row.get::<_, i64>(8)? as usize,
        analyzed_documents: row.get::<_, i64>(9)? as usize,
    })
}

fn parameters_from_row(row: &Row<'_>) -> rusqlite::Result<LearningParameters> {
    let history: String = row.get(1)?;
    let weights: String = row.get(2)?;
    let last_updated: String = row.get(4)?;

    let mut parameters = LearningParameters {
        tfidf_threshold: row.get::<_, f64>(0)? as f32,
        effectiveness_history: serde_json::from_str(&history).unwrap_or_default(),
        strategy_weights: serde_json::from_str(&weights).unwrap_or_default(),
        learning_rate: row.get::<_, f64>(3)? as f32,
        last_updated: parse_timestamp(&last_updated).unwrap_or_else(|_| Utc::now()),
    };
    // Rows written before a strategy existed still get a weight
    for strategy in RecommendationStrategy::ALL {
        parameters.strategy_weights.entry(strategy).or_insert(1.0);
    }
    Ok(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn repo() -> RecommendationRepository {
        RecommendationRepository::new(Arc::new(Database::open_in_memory(4).unwrap()))
    }

    fn recommendation(query: &str, expires_in: Duration) -> Recommendation {
        let now = Utc::now();
        Recommendation {
            id: Uuid::new_v4(),
            query: query.to_string(),
            suggested_terms: vec!["alpha".to_string(), "bravo".to_string()],
            strategy: RecommendationStrategy::TermRemoval,
            tfidf_threshold: 0.25,
            confidence: 0.8,
            generated_at: now,
            expires_at: now + expires_in,
            total_documents: 10,
            analyzed_documents: 5,
        }
    }

    #[tokio::test]
    async fn test_save_and_lookup() {
        let repo = repo();
        let rec = recommendation("rust async", Duration::days(30));
        repo.save(&rec).await.unwrap();

        let found = repo.get_current("rust async").await.unwrap().unwrap();
        assert_eq!(found.id, rec.id);
        assert_eq!(found.suggested_terms, rec.suggested_terms);
        assert_eq!(found.strategy, RecommendationStrategy::TermRemoval);

        assert!(repo.get_current("other query").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_rows_invisible() {
        let repo = repo();
        let rec = recommendation("stale", Duration::seconds(-5));
        repo.save(&rec).await.unwrap();

        assert!(repo.get_current("stale").await.unwrap().is_none());
        assert_eq!(repo.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_effectiveness_requires_recommendation() {
        let repo = repo();
        let event = EffectivenessEvent {
            recommendation_id: Uuid::new_v4(),
            was_used: true,
            improved_results: Some(true),
            usage_time: Some(Utc::now()),
            effectiveness_score: 0.9,
            original_result_count: 2,
            improved_result_count: Some(8),
        };
        assert!(repo.record_effectiveness(&event).await.is_err());

        let rec = recommendation("tracked", Duration::days(30));
        repo.save(&rec).await.unwrap();
        let event = EffectivenessEvent {
            recommendation_id: rec.id,
            ..event
        };
        repo.record_effectiveness(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_parameters_initialized_on_first_access() {
        let repo = repo();
        let params = repo.load_parameters().await.unwrap();
        assert_eq!(params.tfidf_threshold, 0.25);
        assert_eq!(params.learning_rate, 0.05);

        let mut updated = params.clone();
        updated.tfidf_threshold = 0.31;
        updated.effectiveness_history.push(0.7);
        repo.save_parameters(&updated).await.unwrap();

        let reloaded = repo.load_parameters().await.unwrap();
        assert!((reloaded.tfidf_threshold - 0.31).abs() < 1e-6);
        assert_eq!(reloaded.effectiveness_history, vec![0.7]);
    }

    #[tokio::test]
    async fn test_clear_preserves_learning_parameters() {
        let repo = repo();
        let rec = recommendation("cleared", Duration::days(30));
        repo.save(&rec).await.unwrap();

        let mut params = repo.load_parameters().await.unwrap();
        params.learning_rate = 0.09;
        repo.save_parameters(&params).await.unwrap();

        repo.clear().await.unwrap();
        assert!(repo.get_current("cleared").await.unwrap().is_none());

        let reloaded = repo.load_parameters().await.unwrap();
        assert!((reloaded.learning_rate - 0.09).abs() < 1e-6);
    }
}
