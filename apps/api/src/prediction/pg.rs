//! Postgres-backed collaborators: read-only prep tables and the predictions table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::interview::{InterviewContext, InterviewRecord, InterviewType, PredictionKey};
use crate::models::prediction::{PredictionRow, StoredRecommendation};
use crate::models::prep::{
    ChecklistItemRow, CompanyResearchRow, PastOutcomeRow, PracticeSessionRow, RoleProfileRow,
};
use crate::prediction::model::Prediction;
use crate::prediction::store::{PredictionRepository, PrepSource};

/// Outcomes older than this many entries never reach the rolling average.
const HISTORY_FETCH_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct PgPrepSource {
    pool: PgPool,
}

impl PgPrepSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct InterviewJoinRow {
    user_id: Uuid,
    job_title: String,
    company: String,
    interview_type: String,
    scheduled_at: DateTime<Utc>,
}

#[async_trait]
impl PrepSource for PgPrepSource {
    async fn interview(&self, key: PredictionKey) -> Result<Option<InterviewRecord>, AppError> {
        let row: Option<InterviewJoinRow> = sqlx::query_as(
            r#"
            SELECT j.user_id, j.title AS job_title, j.company, i.interview_type, i.scheduled_at
            FROM interviews i
            JOIN jobs j ON j.id = i.job_id
            WHERE i.id = $1 AND i.job_id = $2
            "#,
        )
        .bind(key.interview_id)
        .bind(key.job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| InterviewRecord {
            user_id: r.user_id,
            context: InterviewContext {
                job_id: key.job_id,
                interview_id: key.interview_id,
                job_title: r.job_title,
                company: r.company,
                interview_type: InterviewType::from_db(&r.interview_type),
                interview_date: r.scheduled_at,
                days_until_interview: 0,
            },
        }))
    }

    async fn checklist(
        &self,
        key: PredictionKey,
    ) -> Result<Option<Vec<ChecklistItemRow>>, AppError> {
        let items: Vec<ChecklistItemRow> = sqlx::query_as(
            "SELECT id, category, completed FROM interview_checklist_items WHERE job_id = $1 AND interview_id = $2",
        )
        .bind(key.job_id)
        .bind(key.interview_id)
        .fetch_all(&self.pool)
        .await?;

        Ok((!items.is_empty()).then_some(items))
    }

    async fn company_research(
        &self,
        user_id: Uuid,
        company: &str,
    ) -> Result<Option<CompanyResearchRow>, AppError> {
        Ok(sqlx::query_as(
            r#"
            SELECT overview, mission_values, culture_notes, recent_news, products, competitors,
                   interviewer_notes,
                   COALESCE(questions_to_ask, '{}') AS questions_to_ask,
                   COALESCE(talking_points, '{}') AS talking_points
            FROM company_research
            WHERE user_id = $1 AND lower(company) = lower($2)
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(company)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn practice_sessions(
        &self,
        user_id: Uuid,
        job_id: Uuid,
    ) -> Result<Vec<PracticeSessionRow>, AppError> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, session_type, score, completed_at,
                   COALESCE(focus_areas, '{}') AS focus_areas
            FROM practice_sessions
            WHERE user_id = $1 AND job_id = $2 AND completed_at IS NOT NULL
            ORDER BY completed_at DESC
            "#,
        )
        .bind(user_id)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn outcome_history(&self, user_id: Uuid) -> Result<Vec<PastOutcomeRow>, AppError> {
        Ok(sqlx::query_as(
            r#"
            SELECT score, occurred_at FROM (
                SELECT rating::INT4 AS score, occurred_at
                FROM interview_outcomes
                WHERE user_id = $1
                UNION ALL
                SELECT score::INT4 AS score, completed_at AS occurred_at
                FROM practice_sessions
                WHERE user_id = $1 AND score IS NOT NULL AND completed_at IS NOT NULL
            ) history
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(HISTORY_FETCH_LIMIT)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn role_profile(
        &self,
        user_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<RoleProfileRow>, AppError> {
        Ok(sqlx::query_as(
            r#"
            SELECT COALESCE(j.requirements, '{}') AS job_requirements,
                   COALESCE(p.skills, '{}') AS user_skills
            FROM jobs j
            LEFT JOIN user_profiles p ON p.user_id = j.user_id
            WHERE j.id = $1 AND j.user_id = $2
            "#,
        )
        .bind(job_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[derive(Clone)]
pub struct PgPredictionRepository {
    pool: PgPool,
}

impl PgPredictionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PredictionRepository for PgPredictionRepository {
    async fn find(&self, key: PredictionKey) -> Result<Option<Prediction>, AppError> {
        let row: Option<PredictionRow> = sqlx::query_as(
            "SELECT * FROM interview_predictions WHERE job_id = $1 AND interview_id = $2",
        )
        .bind(key.job_id)
        .bind(key.interview_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Prediction::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Prediction>, AppError> {
        let row: Option<PredictionRow> =
            sqlx::query_as("SELECT * FROM interview_predictions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Prediction::from))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Prediction>, AppError> {
        let rows: Vec<PredictionRow> =
            sqlx::query_as("SELECT * FROM interview_predictions WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Prediction::from).collect())
    }

    /// One row per (job_id, interview_id): the unique constraint turns a second
    /// recalculation into an in-place update that keeps `id` and `created_at`.
    async fn upsert(&self, prediction: &Prediction) -> Result<Prediction, AppError> {
        let recommendations: Vec<StoredRecommendation> = prediction
            .recommendations
            .iter()
            .map(StoredRecommendation::from)
            .collect();
        let row: PredictionRow = sqlx::query_as(
            r#"
            INSERT INTO interview_predictions
                (id, user_id, job_id, interview_id, interview_context, factors, weights,
                 success_probability, confidence, recommendations, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (job_id, interview_id) DO UPDATE SET
                interview_context = EXCLUDED.interview_context,
                factors = EXCLUDED.factors,
                weights = EXCLUDED.weights,
                success_probability = EXCLUDED.success_probability,
                confidence = EXCLUDED.confidence,
                recommendations = EXCLUDED.recommendations,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(prediction.id)
        .bind(prediction.user_id)
        .bind(prediction.job_id)
        .bind(prediction.interview_id)
        .bind(Json(&prediction.interview_context))
        .bind(Json(&prediction.factors))
        .bind(Json(&prediction.weights))
        .bind(i16::from(prediction.success_probability))
        .bind(prediction.confidence.as_str())
        .bind(Json(&recommendations))
        .bind(prediction.created_at)
        .bind(prediction.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}
