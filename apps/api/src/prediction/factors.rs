//! Factor Extractors: pure functions from raw prep records to 0-100 sub-scores.
//!
//! An absent record is meaningful input, not an error: the extractor returns the
//! neutral default with `real = false`, which lowers confidence downstream.

use chrono::{DateTime, Utc};

use crate::models::prep::{
    ChecklistCategory, ChecklistItemRow, CompanyResearchRow, PastOutcomeRow, PracticeSessionRow,
    PrepInputs, RoleProfileRow,
};
use crate::prediction::model::{FactorRealness, FactorScores};

/// Score used when a factor has no backing data.
pub const NEUTRAL_DEFAULT: u8 = 50;

/// Number of most-recent outcomes in the historical rolling average.
const HISTORY_WINDOW: usize = 10;

/// Practice scoring: up to 40 points for volume, 40 for quality, 20 for recency.
const PRACTICE_VOLUME_CAP: usize = 5;
const PRACTICE_POINTS_PER_SESSION: f64 = 8.0;
const PRACTICE_QUALITY_SHARE: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactorReading {
    pub score: u8,
    pub real: bool,
}

impl FactorReading {
    fn real(score: f64) -> Self {
        Self {
            score: score.round().clamp(0.0, 100.0) as u8,
            real: true,
        }
    }

    fn neutral() -> Self {
        Self {
            score: NEUTRAL_DEFAULT,
            real: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedFactors {
    pub scores: FactorScores,
    pub realness: FactorRealness,
}

/// Runs all five extractors over one snapshot of prep inputs.
pub fn extract_factors(inputs: &PrepInputs, now: DateTime<Utc>) -> ExtractedFactors {
    let preparation = preparation_score(inputs.checklist.as_deref());
    let research = company_research_score(inputs.research.as_ref());
    let practice = practice_score(inputs.practice.as_deref(), now);
    let history = historical_performance(inputs.history.as_deref());
    let role = role_match_score(inputs.role.as_ref(), inputs.practice.as_deref());

    ExtractedFactors {
        scores: FactorScores {
            preparation_score: preparation.score,
            company_research_score: research.score,
            practice_score: practice.score,
            historical_performance: history.score,
            role_match_score: role.score,
        },
        realness: FactorRealness {
            preparation: preparation.real,
            company_research: research.real,
            practice: practice.real,
            historical_performance: history.real,
            role_match: role.real,
        },
    }
}

fn category_weight(category: ChecklistCategory) -> f64 {
    match category {
        ChecklistCategory::Technical => 1.5,
        ChecklistCategory::Behavioral => 1.25,
        ChecklistCategory::Research | ChecklistCategory::Questions | ChecklistCategory::Other => {
            1.0
        }
        ChecklistCategory::Logistics => 0.75,
        ChecklistCategory::FollowUp => 0.5,
    }
}

/// Checklist completion ratio, weighted by category.
pub fn preparation_score(checklist: Option<&[ChecklistItemRow]>) -> FactorReading {
    let items = match checklist {
        Some(items) if !items.is_empty() => items,
        _ => return FactorReading::neutral(),
    };

    let mut total = 0.0_f64;
    let mut done = 0.0_f64;
    for item in items {
        let weight = category_weight(ChecklistCategory::from_db(&item.category));
        total += weight;
        if item.completed {
            done += weight;
        }
    }

    FactorReading::real(done / total * 100.0)
}

/// Share of research fields that carry non-blank content.
pub fn company_research_score(research: Option<&CompanyResearchRow>) -> FactorReading {
    let Some(r) = research else {
        return FactorReading::neutral();
    };

    let text_fields = [
        &r.overview,
        &r.mission_values,
        &r.culture_notes,
        &r.recent_news,
        &r.products,
        &r.competitors,
        &r.interviewer_notes,
    ];
    let filled_text = text_fields
        .iter()
        .filter(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty()))
        .count();
    let filled_lists = [&r.questions_to_ask, &r.talking_points]
        .iter()
        .filter(|l| l.iter().any(|s| !s.trim().is_empty()))
        .count();

    let total = (text_fields.len() + 2) as f64;
    FactorReading::real((filled_text + filled_lists) as f64 / total * 100.0)
}

fn recency_points(days_since: i64) -> f64 {
    match days_since {
        i64::MIN..=3 => 20.0,
        4..=7 => 15.0,
        8..=14 => 8.0,
        _ => 0.0,
    }
}

/// Session count, average session score, and how recently the user practiced.
pub fn practice_score(
    sessions: Option<&[PracticeSessionRow]>,
    now: DateTime<Utc>,
) -> FactorReading {
    let sessions = match sessions {
        Some(s) if !s.is_empty() => s,
        _ => return FactorReading::neutral(),
    };

    let volume = sessions.len().min(PRACTICE_VOLUME_CAP) as f64 * PRACTICE_POINTS_PER_SESSION;

    let scored: Vec<f64> = sessions
        .iter()
        .filter_map(|s| s.score)
        .map(|s| f64::from(s.clamp(0, 100)))
        .collect();
    let average = if scored.is_empty() {
        f64::from(NEUTRAL_DEFAULT)
    } else {
        scored.iter().sum::<f64>() / scored.len() as f64
    };
    let quality = average * PRACTICE_QUALITY_SHARE;

    let recency = sessions
        .iter()
        .map(|s| s.completed_at)
        .max()
        .map(|latest| recency_points((now - latest).num_days()))
        .unwrap_or(0.0);

    FactorReading::real(volume + quality + recency)
}

/// Rolling average of the user's most recent outcomes.
pub fn historical_performance(history: Option<&[PastOutcomeRow]>) -> FactorReading {
    let outcomes = match history {
        Some(h) if !h.is_empty() => h,
        _ => return FactorReading::neutral(),
    };

    let mut recent: Vec<&PastOutcomeRow> = outcomes.iter().collect();
    recent.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    recent.truncate(HISTORY_WINDOW);

    let sum: f64 = recent.iter().map(|o| f64::from(o.score.clamp(0, 100))).sum();
    FactorReading::real(sum / recent.len() as f64)
}

/// Coverage of the job's requirements by the user's skills and practice focus areas.
pub fn role_match_score(
    role: Option<&RoleProfileRow>,
    sessions: Option<&[PracticeSessionRow]>,
) -> FactorReading {
    let Some(role) = role else {
        return FactorReading::neutral();
    };

    let requirements: Vec<Vec<String>> = role
        .job_requirements
        .iter()
        .map(|r| tokens(r))
        .filter(|r| !r.is_empty())
        .collect();

    let mut evidence: Vec<Vec<String>> = role.user_skills.iter().map(|s| tokens(s)).collect();
    if let Some(sessions) = sessions {
        evidence.extend(
            sessions
                .iter()
                .flat_map(|s| s.focus_areas.iter())
                .map(|f| tokens(f)),
        );
    }
    evidence.retain(|e| !e.is_empty());

    if requirements.is_empty() || evidence.is_empty() {
        return FactorReading::neutral();
    }

    let covered = requirements
        .iter()
        .filter(|req| {
            evidence
                .iter()
                .any(|e| contains_phrase(e, req) || contains_phrase(req, e))
        })
        .count();

    FactorReading::real(covered as f64 / requirements.len() as f64 * 100.0)
}

/// Lowercased words; `+` and `#` stay part of a word so "c++" and "c#" survive.
fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether `needle` occurs in `haystack` as a run of whole tokens.
fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
