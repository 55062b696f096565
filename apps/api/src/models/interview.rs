use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the single prediction slot for one interview of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionKey {
    pub job_id: Uuid,
    pub interview_id: Uuid,
}

impl PredictionKey {
    pub fn new(job_id: Uuid, interview_id: Uuid) -> Self {
        Self {
            job_id,
            interview_id,
        }
    }
}

impl fmt::Display for PredictionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} / interview {}", self.job_id, self.interview_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    Phone,
    Video,
    Onsite,
    Technical,
    Behavioral,
}

impl InterviewType {
    /// Parses the collaborator's stored type. Unknown values fall back to `Video`,
    /// the most common format in the interviews table.
    pub fn from_db(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "phone" => InterviewType::Phone,
            "onsite" | "on_site" | "in_person" => InterviewType::Onsite,
            "technical" => InterviewType::Technical,
            "behavioral" | "behavioural" => InterviewType::Behavioral,
            _ => InterviewType::Video,
        }
    }
}

/// Snapshot of the interview a prediction was computed for.
///
/// `days_until_interview` is derived from `interview_date` at read time and goes
/// negative once the interview is in the past.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewContext {
    pub job_id: Uuid,
    pub interview_id: Uuid,
    pub job_title: String,
    pub company: String,
    pub interview_type: InterviewType,
    pub interview_date: DateTime<Utc>,
    pub days_until_interview: i64,
}

impl InterviewContext {
    pub fn key(&self) -> PredictionKey {
        PredictionKey::new(self.job_id, self.interview_id)
    }

    /// Recomputes `days_until_interview` against `now` (calendar days, UTC).
    pub fn refreshed(mut self, now: DateTime<Utc>) -> Self {
        self.days_until_interview = days_between(now, self.interview_date);
        self
    }
}

pub fn days_between(now: DateTime<Utc>, date: DateTime<Utc>) -> i64 {
    (date.date_naive() - now.date_naive()).num_days()
}

/// What the job/interview collaborator returns for an existing interview.
#[derive(Debug, Clone)]
pub struct InterviewRecord {
    pub user_id: Uuid,
    pub context: InterviewContext,
}
