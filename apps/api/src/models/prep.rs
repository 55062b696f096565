//! Read-only records owned by the prep collaborators (checklist, research,
//! practice, outcomes, profile). The prediction engine never writes these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistCategory {
    Research,
    Technical,
    Behavioral,
    Questions,
    Logistics,
    FollowUp,
    Other,
}

impl ChecklistCategory {
    pub fn from_db(value: &str) -> Self {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "research" | "company_research" => ChecklistCategory::Research,
            "technical" | "technical_prep" => ChecklistCategory::Technical,
            "behavioral" | "behavioural" => ChecklistCategory::Behavioral,
            "questions" | "questions_to_ask" => ChecklistCategory::Questions,
            "logistics" => ChecklistCategory::Logistics,
            "follow_up" | "followup" => ChecklistCategory::FollowUp,
            _ => ChecklistCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChecklistItemRow {
    pub id: Uuid,
    pub category: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct CompanyResearchRow {
    pub overview: Option<String>,
    pub mission_values: Option<String>,
    pub culture_notes: Option<String>,
    pub recent_news: Option<String>,
    pub products: Option<String>,
    pub competitors: Option<String>,
    pub interviewer_notes: Option<String>,
    pub questions_to_ask: Vec<String>,
    pub talking_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PracticeSessionRow {
    pub id: Uuid,
    pub session_type: String,
    /// 0–100 self or coach rating; `None` when the session was not scored.
    pub score: Option<i32>,
    pub completed_at: DateTime<Utc>,
    pub focus_areas: Vec<String>,
}

/// A past interview or practice outcome for the user, normalized to 0–100.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PastOutcomeRow {
    pub score: i32,
    pub occurred_at: DateTime<Utc>,
}

/// Job requirements paired with the user's declared skills.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct RoleProfileRow {
    pub job_requirements: Vec<String>,
    pub user_skills: Vec<String>,
}

/// Everything the factor extractors read for one recalculation.
/// `None` means the record is absent or could not be fetched.
#[derive(Debug, Clone, Default)]
pub struct PrepInputs {
    pub checklist: Option<Vec<ChecklistItemRow>>,
    pub research: Option<CompanyResearchRow>,
    pub practice: Option<Vec<PracticeSessionRow>>,
    pub history: Option<Vec<PastOutcomeRow>>,
    pub role: Option<RoleProfileRow>,
}
