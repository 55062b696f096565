use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::interview::InterviewContext;
use crate::prediction::model::{Confidence, FactorScores, Prediction, Weights};
use crate::prediction::recommendations::Recommendation;

/// JSONB form of a recommendation: the wire fields plus the template key that
/// completion carry-over matches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecommendation {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    pub template_key: String,
}

impl From<&Recommendation> for StoredRecommendation {
    fn from(rec: &Recommendation) -> Self {
        Self {
            recommendation: rec.clone(),
            template_key: rec.template_key.clone(),
        }
    }
}

impl From<StoredRecommendation> for Recommendation {
    fn from(stored: StoredRecommendation) -> Self {
        Recommendation {
            template_key: stored.template_key,
            ..stored.recommendation
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PredictionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub interview_id: Uuid,
    pub interview_context: Json<InterviewContext>,
    pub factors: Json<FactorScores>,
    pub weights: Json<Weights>,
    pub success_probability: i16,
    pub confidence: String,
    pub recommendations: Json<Vec<StoredRecommendation>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PredictionRow> for Prediction {
    fn from(row: PredictionRow) -> Self {
        Prediction {
            id: row.id,
            user_id: row.user_id,
            job_id: row.job_id,
            interview_id: row.interview_id,
            interview_context: row.interview_context.0,
            factors: row.factors.0,
            weights: row.weights.0,
            success_probability: row.success_probability.clamp(0, 100) as u8,
            confidence: Confidence::from_db(&row.confidence),
            recommendations: row.recommendations.0.into_iter().map(Into::into).collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
