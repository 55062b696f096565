//! In-memory collaborators for store, bus and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::PredictionConfig;
use crate::errors::AppError;
use crate::models::interview::{InterviewContext, InterviewRecord, InterviewType, PredictionKey};
use crate::models::prep::{
    ChecklistItemRow, CompanyResearchRow, PastOutcomeRow, PracticeSessionRow, RoleProfileRow,
};
use crate::prediction::model::Prediction;
use crate::prediction::retry::RetryPolicy;
use crate::prediction::store::{PredictionRepository, PrepSource};

pub fn test_config() -> PredictionConfig {
    PredictionConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: StdDuration::from_millis(5),
        },
        ..PredictionConfig::default()
    }
}

pub fn sample_record(days_until: i64) -> InterviewRecord {
    InterviewRecord {
        user_id: Uuid::new_v4(),
        context: InterviewContext {
            job_id: Uuid::new_v4(),
            interview_id: Uuid::new_v4(),
            job_title: "Staff Engineer".to_string(),
            company: "Initech".to_string(),
            interview_type: InterviewType::Onsite,
            interview_date: Utc::now() + Duration::days(days_until),
            days_until_interview: days_until,
        },
    }
}

#[derive(Default)]
pub struct InMemoryPrepSource {
    interviews: Mutex<HashMap<PredictionKey, InterviewRecord>>,
    checklists: Mutex<HashMap<PredictionKey, Vec<ChecklistItemRow>>>,
    fail_checklist: AtomicBool,
}

impl InMemoryPrepSource {
    pub fn add_interview(&self, record: InterviewRecord) {
        self.interviews
            .lock()
            .unwrap()
            .insert(record.context.key(), record);
    }

    pub fn set_checklist(&self, key: PredictionKey, items: Vec<ChecklistItemRow>) {
        self.checklists.lock().unwrap().insert(key, items);
    }

    pub fn fail_checklist(&self, fail: bool) {
        self.fail_checklist.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PrepSource for InMemoryPrepSource {
    async fn interview(&self, key: PredictionKey) -> Result<Option<InterviewRecord>, AppError> {
        Ok(self.interviews.lock().unwrap().get(&key).cloned())
    }

    async fn checklist(
        &self,
        key: PredictionKey,
    ) -> Result<Option<Vec<ChecklistItemRow>>, AppError> {
        if self.fail_checklist.load(Ordering::SeqCst) {
            return Err(AppError::TransientIo("checklist service down".to_string()));
        }
        Ok(self.checklists.lock().unwrap().get(&key).cloned())
    }

    async fn company_research(
        &self,
        _user_id: Uuid,
        _company: &str,
    ) -> Result<Option<CompanyResearchRow>, AppError> {
        Ok(None)
    }

    async fn practice_sessions(
        &self,
        _user_id: Uuid,
        _job_id: Uuid,
    ) -> Result<Vec<PracticeSessionRow>, AppError> {
        Ok(vec![])
    }

    async fn outcome_history(&self, _user_id: Uuid) -> Result<Vec<PastOutcomeRow>, AppError> {
        Ok(vec![])
    }

    async fn role_profile(
        &self,
        _user_id: Uuid,
        _job_id: Uuid,
    ) -> Result<Option<RoleProfileRow>, AppError> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct InMemoryPredictionRepository {
    rows: Mutex<HashMap<PredictionKey, Prediction>>,
    failing_upserts: AtomicU32,
}

impl InMemoryPredictionRepository {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn fail_next_upserts(&self, count: u32) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    pub fn shift_interview_date(&self, key: PredictionKey, by: Duration) {
        if let Some(p) = self.rows.lock().unwrap().get_mut(&key) {
            p.interview_context.interview_date += by;
        }
    }
}

#[async_trait]
impl PredictionRepository for InMemoryPredictionRepository {
    async fn find(&self, key: PredictionKey) -> Result<Option<Prediction>, AppError> {
        Ok(self.rows.lock().unwrap().get(&key).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Prediction>, AppError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Prediction>, AppError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn upsert(&self, prediction: &Prediction) -> Result<Prediction, AppError> {
        let remaining = self.failing_upserts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_upserts.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::TransientIo("connection reset".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        let stored = match rows.get(&prediction.key()) {
            Some(existing) => Prediction {
                id: existing.id,
                created_at: existing.created_at,
                ..prediction.clone()
            },
            None => prediction.clone(),
        };
        rows.insert(stored.key(), stored.clone());
        Ok(stored)
    }
}
