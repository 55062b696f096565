//! Prediction Model: the shape of a prediction and the pure function that scores it.
//!
//! successProbability = clamp(round(Σ weight·factor), 0, 100).
//! Confidence is a data-completeness tier driven by how many factors were backed
//! by real collaborator data rather than the neutral default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::interview::{InterviewContext, PredictionKey};
use crate::prediction::recommendations::Recommendation;

/// Allowed drift of the weight sum away from 1.0.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Factor {
    Preparation,
    CompanyResearch,
    Practice,
    HistoricalPerformance,
    RoleMatch,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::Preparation,
        Factor::CompanyResearch,
        Factor::Practice,
        Factor::HistoricalPerformance,
        Factor::RoleMatch,
    ];
}

/// Five normalized sub-scores, each 0–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorScores {
    pub preparation_score: u8,
    pub company_research_score: u8,
    pub practice_score: u8,
    pub historical_performance: u8,
    pub role_match_score: u8,
}

impl FactorScores {
    pub fn get(&self, factor: Factor) -> u8 {
        match factor {
            Factor::Preparation => self.preparation_score,
            Factor::CompanyResearch => self.company_research_score,
            Factor::Practice => self.practice_score,
            Factor::HistoricalPerformance => self.historical_performance,
            Factor::RoleMatch => self.role_match_score,
        }
    }
}

/// Which factors were derived from actual data (`true`) vs the neutral default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorRealness {
    pub preparation: bool,
    pub company_research: bool,
    pub practice: bool,
    pub historical_performance: bool,
    pub role_match: bool,
}

impl FactorRealness {
    pub fn get(&self, factor: Factor) -> bool {
        match factor {
            Factor::Preparation => self.preparation,
            Factor::CompanyResearch => self.company_research,
            Factor::Practice => self.practice,
            Factor::HistoricalPerformance => self.historical_performance,
            Factor::RoleMatch => self.role_match,
        }
    }

    pub fn real_count(&self) -> usize {
        Factor::ALL.iter().filter(|f| self.get(**f)).count()
    }
}

/// Fixed factor weights. Validated once at startup; must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weights {
    pub preparation: f64,
    pub company_research: f64,
    pub practice: f64,
    pub historical_performance: f64,
    pub role_match: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            preparation: 0.3,
            company_research: 0.2,
            practice: 0.2,
            historical_performance: 0.15,
            role_match: 0.15,
        }
    }
}

impl Weights {
    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Preparation => self.preparation,
            Factor::CompanyResearch => self.company_research,
            Factor::Practice => self.practice,
            Factor::HistoricalPerformance => self.historical_performance,
            Factor::RoleMatch => self.role_match,
        }
    }

    /// Builds weights from five values in `Factor::ALL` order and validates them.
    pub fn from_slice(values: &[f64]) -> Result<Self, AppError> {
        let [preparation, company_research, practice, historical_performance, role_match] = values
        else {
            return Err(AppError::Configuration(format!(
                "expected 5 weights, got {}",
                values.len()
            )));
        };
        let weights = Self {
            preparation: *preparation,
            company_research: *company_research,
            practice: *practice,
            historical_performance: *historical_performance,
            role_match: *role_match,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for factor in Factor::ALL {
            let w = self.get(factor);
            if !w.is_finite() || w < 0.0 {
                return Err(AppError::Configuration(format!(
                    "weight for {factor:?} must be a non-negative number, got {w}"
                )));
            }
        }
        let sum: f64 = Factor::ALL.iter().map(|f| self.get(*f)).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(AppError::Configuration(format!(
                "weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// ≥4 real factors → high, 2–3 → medium, ≤1 → low.
    pub fn from_real_count(real: usize) -> Self {
        match real {
            0..=1 => Confidence::Low,
            2..=3 => Confidence::Medium,
            _ => Confidence::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionOutcome {
    pub success_probability: u8,
    pub confidence: Confidence,
}

/// Combines factor scores into a success probability and confidence tier.
///
/// Weights are assumed validated; a bad weight set is a startup error, never a per-call one.
pub fn compute_prediction(
    factors: &FactorScores,
    weights: &Weights,
    realness: &FactorRealness,
) -> PredictionOutcome {
    let weighted: f64 = Factor::ALL
        .iter()
        .map(|f| weights.get(*f) * f64::from(factors.get(*f)))
        .sum();

    PredictionOutcome {
        success_probability: weighted.round().clamp(0.0, 100.0) as u8,
        confidence: Confidence::from_real_count(realness.real_count()),
    }
}

/// The persisted aggregate: at most one per (jobId, interviewId).
/// Field names are the wire contract with UI clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: Uuid,
    /// Owner of the interview; stored and used for routing, not part of the wire shape.
    #[serde(skip_serializing, default)]
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub interview_id: Uuid,
    pub interview_context: InterviewContext,
    pub factors: FactorScores,
    pub weights: Weights,
    pub success_probability: u8,
    pub confidence: Confidence,
    pub recommendations: Vec<Recommendation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prediction {
    pub fn key(&self) -> PredictionKey {
        PredictionKey::new(self.job_id, self.interview_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(p: u8, c: u8, pr: u8, h: u8, r: u8) -> FactorScores {
        FactorScores {
            preparation_score: p,
            company_research_score: c,
            practice_score: pr,
            historical_performance: h,
            role_match_score: r,
        }
    }

    fn realness(count: usize) -> FactorRealness {
        FactorRealness {
            preparation: count > 0,
            company_research: count > 1,
            practice: count > 2,
            historical_performance: count > 3,
            role_match: count > 4,
        }
    }

    #[test]
    fn test_weighted_scenario_rounds_to_62() {
        let outcome = compute_prediction(
            &scores(80, 60, 40, 50, 70),
            &Weights::default(),
            &realness(5),
        );
        assert_eq!(outcome.success_probability, 62);
        assert_eq!(outcome.confidence, Confidence::High);
    }

    #[test]
    fn test_all_defaults_is_low_confidence_fifty() {
        let outcome = compute_prediction(
            &scores(50, 50, 50, 50, 50),
            &Weights::default(),
            &FactorRealness::default(),
        );
        assert_eq!(outcome.success_probability, 50);
        assert_eq!(outcome.confidence, Confidence::Low);
    }

    #[test]
    fn test_probability_bounded_and_deterministic() {
        let weights = Weights::default();
        for value in [0u8, 1, 33, 50, 99, 100] {
            let f = scores(value, 100 - value, value, 100 - value, value);
            let first = compute_prediction(&f, &weights, &realness(3));
            let second = compute_prediction(&f, &weights, &realness(3));
            assert_eq!(first, second);
            assert!(first.success_probability <= 100);
        }
        let max = compute_prediction(&scores(100, 100, 100, 100, 100), &weights, &realness(5));
        assert_eq!(max.success_probability, 100);
        let min = compute_prediction(&scores(0, 0, 0, 0, 0), &weights, &realness(0));
        assert_eq!(min.success_probability, 0);
    }

    #[test]
    fn test_confidence_monotonic_in_real_count() {
        let mut previous = Confidence::Low;
        for count in 0..=5 {
            let tier = Confidence::from_real_count(count);
            assert!(tier >= previous, "tier dropped at {count} real factors");
            previous = tier;
        }
        assert_eq!(Confidence::from_real_count(1), Confidence::Low);
        assert_eq!(Confidence::from_real_count(2), Confidence::Medium);
        assert_eq!(Confidence::from_real_count(3), Confidence::Medium);
        assert_eq!(Confidence::from_real_count(4), Confidence::High);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let err = Weights::from_slice(&[0.3, 0.3, 0.3, 0.3, 0.3]).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(Weights::from_slice(&[0.2, 0.2, 0.2, 0.2, 0.2]).is_ok());
    }

    #[test]
    fn test_weights_reject_negative_and_wrong_length() {
        assert!(Weights::from_slice(&[1.2, -0.2, 0.0, 0.0, 0.0]).is_err());
        assert!(Weights::from_slice(&[0.5, 0.5]).is_err());
        assert!(Weights::default().validate().is_ok());
    }

    #[test]
    fn test_confidence_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Confidence::High).unwrap(), "high");
        assert_eq!(Confidence::from_db(Confidence::Medium.as_str()), Confidence::Medium);
    }
}
