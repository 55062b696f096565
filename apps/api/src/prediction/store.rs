//! Prediction Store: the only write path for predictions.
//!
//! Flow for `recalculate`: resolve interview (NotFound if gone) → fetch prep inputs
//! (each degrades to `None` on failure) → extract factors → score → re-rank
//! recommendations against the previous row → upsert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PredictionConfig;
use crate::errors::AppError;
use crate::models::interview::{InterviewContext, InterviewRecord, PredictionKey};
use crate::models::prep::{
    ChecklistItemRow, CompanyResearchRow, PastOutcomeRow, PracticeSessionRow, PrepInputs,
    RoleProfileRow,
};
use crate::prediction::factors::extract_factors;
use crate::prediction::model::{compute_prediction, Prediction};
use crate::prediction::recommendations::{generate_recommendations, RecommendationRules};
use crate::prediction::retry::with_retry;

/// Read access to the prep collaborators. The interview lookup is authoritative
/// for existence; everything else is best-effort input.
#[async_trait]
pub trait PrepSource: Send + Sync {
    async fn interview(&self, key: PredictionKey) -> Result<Option<InterviewRecord>, AppError>;

    async fn checklist(&self, key: PredictionKey)
        -> Result<Option<Vec<ChecklistItemRow>>, AppError>;

    async fn company_research(
        &self,
        user_id: Uuid,
        company: &str,
    ) -> Result<Option<CompanyResearchRow>, AppError>;

    async fn practice_sessions(
        &self,
        user_id: Uuid,
        job_id: Uuid,
    ) -> Result<Vec<PracticeSessionRow>, AppError>;

    async fn outcome_history(&self, user_id: Uuid) -> Result<Vec<PastOutcomeRow>, AppError>;

    async fn role_profile(
        &self,
        user_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<RoleProfileRow>, AppError>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    async fn find(&self, key: PredictionKey) -> Result<Option<Prediction>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Prediction>, AppError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Prediction>, AppError>;

    /// Inserts or updates the single row for the prediction's (job, interview) key.
    async fn upsert(&self, prediction: &Prediction) -> Result<Prediction, AppError>;
}

pub struct PredictionStore {
    source: Arc<dyn PrepSource>,
    repo: Arc<dyn PredictionRepository>,
    config: PredictionConfig,
    /// Serializes read-modify-write of prediction rows so a completion mark is
    /// never overwritten by a recalculation that read the older row.
    write_lock: Mutex<()>,
}

impl PredictionStore {
    pub fn new(
        source: Arc<dyn PrepSource>,
        repo: Arc<dyn PredictionRepository>,
        config: PredictionConfig,
    ) -> Self {
        Self {
            source,
            repo,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    pub async fn get(&self, key: PredictionKey) -> Result<Prediction, AppError> {
        let prediction = with_retry(&self.config.retry, "load prediction", || {
            self.repo.find(key)
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No prediction for {key}")))?;

        Ok(with_fresh_days(prediction))
    }

    /// Current interview details straight from the collaborator, no prediction needed.
    pub async fn interview_context(
        &self,
        key: PredictionKey,
    ) -> Result<InterviewContext, AppError> {
        let record = with_retry(&self.config.retry, "resolve interview", || {
            self.source.interview(key)
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Interview not found: {key}")))?;
        Ok(record.context.refreshed(Utc::now()))
    }

    /// User owning the interview, `None` if the interview does not exist.
    pub async fn interview_owner(&self, key: PredictionKey) -> Result<Option<Uuid>, AppError> {
        let record = with_retry(&self.config.retry, "resolve interview owner", || {
            self.source.interview(key)
        })
        .await?;
        Ok(record.map(|r| r.user_id))
    }

    /// Predictions for interviews today or later, soonest first.
    pub async fn list_upcoming(&self, user_id: Uuid) -> Result<Vec<Prediction>, AppError> {
        let predictions = with_retry(&self.config.retry, "list predictions", || {
            self.repo.list_for_user(user_id)
        })
        .await?;

        let mut upcoming: Vec<Prediction> = predictions
            .into_iter()
            .map(with_fresh_days)
            .filter(|p| p.interview_context.days_until_interview >= 0)
            .collect();
        upcoming.sort_by_key(|p| p.interview_context.interview_date);
        Ok(upcoming)
    }

    /// Recomputes the prediction for one interview and upserts it.
    ///
    /// First call creates the row; later calls update it in place.
    pub async fn recalculate(&self, key: PredictionKey) -> Result<Prediction, AppError> {
        let now = Utc::now();

        let record = with_retry(&self.config.retry, "resolve interview", || {
            self.source.interview(key)
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Interview not found: {key}")))?;

        let inputs = self.gather_inputs(key, &record).await;
        let context = record.context.refreshed(now);
        let extracted = extract_factors(&inputs, now);
        let outcome = compute_prediction(
            &extracted.scores,
            &self.config.weights,
            &extracted.realness,
        );

        let _guard = self.write_lock.lock().await;

        let previous = with_retry(&self.config.retry, "load prediction", || {
            self.repo.find(key)
        })
        .await?;

        let rules = RecommendationRules {
            thresholds: &self.config.thresholds,
            weights: &self.config.weights,
            cap: self.config.recommendation_cap,
        };
        let recommendations = generate_recommendations(
            &extracted.scores,
            &context,
            previous
                .as_ref()
                .map(|p| p.recommendations.as_slice())
                .unwrap_or(&[]),
            &rules,
        );

        let prediction = Prediction {
            id: previous.as_ref().map(|p| p.id).unwrap_or_else(Uuid::new_v4),
            user_id: record.user_id,
            job_id: key.job_id,
            interview_id: key.interview_id,
            interview_context: context,
            factors: extracted.scores,
            weights: self.config.weights,
            success_probability: outcome.success_probability,
            confidence: outcome.confidence,
            recommendations,
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };

        let saved = with_retry(&self.config.retry, "save prediction", || {
            self.repo.upsert(&prediction)
        })
        .await?;

        info!(
            "Recalculated prediction for {key}: {}% ({} confidence, {} recommendations)",
            saved.success_probability,
            saved.confidence.as_str(),
            saved.recommendations.len()
        );
        Ok(saved)
    }

    /// Marks one recommendation done without recomputing factor scores.
    pub async fn mark_recommendation_complete(
        &self,
        prediction_id: Uuid,
        index: usize,
    ) -> Result<Prediction, AppError> {
        let _guard = self.write_lock.lock().await;

        let mut prediction = with_retry(&self.config.retry, "load prediction", || {
            self.repo.find_by_id(prediction_id)
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Prediction {prediction_id} not found")))?;

        let count = prediction.recommendations.len();
        let rec = prediction.recommendations.get_mut(index).ok_or_else(|| {
            AppError::Validation(format!(
                "Recommendation index {index} out of range (prediction has {count})"
            ))
        })?;

        if rec.completed {
            debug!("Recommendation {index} of {prediction_id} already completed");
            return Ok(with_fresh_days(prediction));
        }
        rec.completed = true;
        prediction.updated_at = Utc::now();

        let saved = with_retry(&self.config.retry, "save prediction", || {
            self.repo.upsert(&prediction)
        })
        .await?;
        Ok(with_fresh_days(saved))
    }

    /// Fetches every factor input concurrently. A failed fetch is logged and
    /// becomes `None`, which the extractors score as the neutral default.
    async fn gather_inputs(&self, key: PredictionKey, record: &InterviewRecord) -> PrepInputs {
        let retry = &self.config.retry;
        let user_id = record.user_id;
        let company = record.context.company.as_str();

        let (checklist, research, practice, history, role) = tokio::join!(
            with_retry(retry, "load checklist", || self.source.checklist(key)),
            with_retry(retry, "load company research", || {
                self.source.company_research(user_id, company)
            }),
            with_retry(retry, "load practice sessions", || {
                self.source.practice_sessions(user_id, key.job_id)
            }),
            with_retry(retry, "load outcome history", || {
                self.source.outcome_history(user_id)
            }),
            with_retry(retry, "load role profile", || {
                self.source.role_profile(user_id, key.job_id)
            }),
        );

        PrepInputs {
            checklist: degrade("checklist", key, checklist).flatten(),
            research: degrade("company research", key, research).flatten(),
            practice: degrade("practice sessions", key, practice),
            history: degrade("outcome history", key, history),
            role: degrade("role profile", key, role).flatten(),
        }
    }
}

fn degrade<T>(what: &str, key: PredictionKey, result: Result<T, AppError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Using neutral default for {what} of {key}: {e}");
            None
        }
    }
}

fn with_fresh_days(mut prediction: Prediction) -> Prediction {
    prediction.interview_context = prediction.interview_context.refreshed(Utc::now());
    prediction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::prep::ChecklistItemRow;
    use crate::prediction::model::Confidence;
    use crate::prediction::recommendations::RecommendationCategory;
    use crate::prediction::testing::{
        sample_record, test_config, InMemoryPredictionRepository, InMemoryPrepSource,
    };
    use chrono::Duration;

    fn store_with(
        source: Arc<InMemoryPrepSource>,
        repo: Arc<InMemoryPredictionRepository>,
    ) -> PredictionStore {
        PredictionStore::new(source, repo, test_config())
    }

    fn checklist(done: usize, open: usize) -> Vec<ChecklistItemRow> {
        (0..done + open)
            .map(|i| ChecklistItemRow {
                id: Uuid::new_v4(),
                category: "technical".to_string(),
                completed: i < done,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_interview_is_not_found_and_creates_nothing() {
        let source = Arc::new(InMemoryPrepSource::default());
        let repo = Arc::new(InMemoryPredictionRepository::default());
        let store = store_with(source, repo.clone());

        let key = PredictionKey::new(Uuid::new_v4(), Uuid::new_v4());
        let err = store.recalculate(key).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(repo.len(), 0);
    }

    #[tokio::test]
    async fn test_first_recalculation_creates_then_updates_in_place() {
        let source = Arc::new(InMemoryPrepSource::default());
        let repo = Arc::new(InMemoryPredictionRepository::default());
        let record = sample_record(5);
        let key = record.context.key();
        source.add_interview(record);
        let store = store_with(source.clone(), repo.clone());

        let first = store.recalculate(key).await.unwrap();
        source.set_checklist(key, checklist(3, 1));
        let second = store.recalculate(key).await.unwrap();

        assert_eq!(repo.len(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.factors.preparation_score > first.factors.preparation_score);
    }

    #[tokio::test]
    async fn test_recalculate_is_idempotent() {
        let source = Arc::new(InMemoryPrepSource::default());
        let repo = Arc::new(InMemoryPredictionRepository::default());
        let record = sample_record(4);
        let key = record.context.key();
        source.add_interview(record);
        source.set_checklist(key, checklist(1, 3));
        let store = store_with(source, repo);

        let first = store.recalculate(key).await.unwrap();
        let mut second = store.recalculate(key).await.unwrap();
        assert!(second.updated_at >= first.updated_at);
        second.updated_at = first.updated_at;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_all_missing_inputs_give_neutral_low_confidence() {
        let source = Arc::new(InMemoryPrepSource::default());
        let record = sample_record(7);
        let key = record.context.key();
        source.add_interview(record);
        let store = store_with(source, Arc::new(InMemoryPredictionRepository::default()));

        let prediction = store.recalculate(key).await.unwrap();
        assert_eq!(prediction.success_probability, 50);
        assert_eq!(prediction.confidence, Confidence::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collaborator_failure_degrades_instead_of_failing() {
        let source = Arc::new(InMemoryPrepSource::default());
        let record = sample_record(3);
        let key = record.context.key();
        source.add_interview(record);
        source.set_checklist(key, checklist(0, 4));
        source.fail_checklist(true);
        let store = store_with(source, Arc::new(InMemoryPredictionRepository::default()));

        let prediction = store.recalculate(key).await.unwrap();
        assert_eq!(prediction.factors.preparation_score, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_save_failures_are_retried() {
        let source = Arc::new(InMemoryPrepSource::default());
        let repo = Arc::new(InMemoryPredictionRepository::default());
        let record = sample_record(3);
        let key = record.context.key();
        source.add_interview(record);
        repo.fail_next_upserts(2);
        let store = store_with(source, repo.clone());

        assert!(store.recalculate(key).await.is_ok());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_transient_error() {
        let source = Arc::new(InMemoryPrepSource::default());
        let repo = Arc::new(InMemoryPredictionRepository::default());
        let record = sample_record(3);
        let key = record.context.key();
        source.add_interview(record);
        repo.fail_next_upserts(10);
        let store = store_with(source, repo.clone());

        let err = store.recalculate(key).await.unwrap_err();
        assert!(matches!(err, AppError::TransientIo(_)));
        assert_eq!(repo.len(), 0);
    }

    #[tokio::test]
    async fn test_completion_survives_recalculation() {
        let source = Arc::new(InMemoryPrepSource::default());
        let record = sample_record(6);
        let key = record.context.key();
        source.add_interview(record);
        source.set_checklist(key, checklist(1, 4));
        let store = store_with(source, Arc::new(InMemoryPredictionRepository::default()));

        let prediction = store.recalculate(key).await.unwrap();
        let index = prediction
            .recommendations
            .iter()
            .position(|r| r.category == RecommendationCategory::Preparation)
            .unwrap();
        let template = prediction.recommendations[index].template_key.clone();

        let marked = store
            .mark_recommendation_complete(prediction.id, index)
            .await
            .unwrap();
        assert!(marked.recommendations[index].completed);

        let recalculated = store.recalculate(key).await.unwrap();
        let carried = recalculated
            .recommendations
            .iter()
            .find(|r| r.template_key == template)
            .unwrap();
        assert!(carried.completed);
    }

    #[tokio::test]
    async fn test_mark_complete_rejects_bad_index_and_unknown_id() {
        let source = Arc::new(InMemoryPrepSource::default());
        let record = sample_record(6);
        let key = record.context.key();
        source.add_interview(record);
        let store = store_with(source, Arc::new(InMemoryPredictionRepository::default()));
        let prediction = store.recalculate(key).await.unwrap();

        let err = store
            .mark_recommendation_complete(prediction.id, 99)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = store
            .mark_recommendation_complete(Uuid::new_v4(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_upcoming_filters_past_and_sorts() {
        let source = Arc::new(InMemoryPrepSource::default());
        let user_id = Uuid::new_v4();
        let mut keys = Vec::new();
        for days in [9, -3, 2] {
            let mut record = sample_record(days);
            record.user_id = user_id;
            keys.push(record.context.key());
            source.add_interview(record);
        }
        let store = store_with(source, Arc::new(InMemoryPredictionRepository::default()));
        for key in &keys {
            store.recalculate(*key).await.unwrap();
        }

        let upcoming = store.list_upcoming(user_id).await.unwrap();
        let days: Vec<i64> = upcoming
            .iter()
            .map(|p| p.interview_context.days_until_interview)
            .collect();
        assert_eq!(days, vec![2, 9]);
        assert!(store.list_upcoming(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_prediction_is_not_found() {
        let store = store_with(
            Arc::new(InMemoryPrepSource::default()),
            Arc::new(InMemoryPredictionRepository::default()),
        );
        let key = PredictionKey::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(store.get(key).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_refreshes_days_until() {
        let source = Arc::new(InMemoryPrepSource::default());
        let repo = Arc::new(InMemoryPredictionRepository::default());
        let record = sample_record(4);
        let key = record.context.key();
        source.add_interview(record);
        let store = store_with(source, repo.clone());
        store.recalculate(key).await.unwrap();

        repo.shift_interview_date(key, Duration::days(-10));
        let fetched = store.get(key).await.unwrap();
        assert_eq!(fetched.interview_context.days_until_interview, -6);
    }

    #[tokio::test]
    async fn test_interview_owner_resolves_without_a_prediction() {
        let source = Arc::new(InMemoryPrepSource::default());
        let repo = Arc::new(InMemoryPredictionRepository::default());
        let record = sample_record(3);
        let key = record.context.key();
        let owner = record.user_id;
        source.add_interview(record);
        let store = store_with(source, repo.clone());

        assert_eq!(store.interview_owner(key).await.unwrap(), Some(owner));
        let unknown = PredictionKey::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(store.interview_owner(unknown).await.unwrap(), None);
        assert_eq!(repo.len(), 0);
    }
}
