//! Recommendation Generator: ranked action items for sub-threshold factors.
//!
//! Algorithm:
//! 1. For every factor below its threshold, pick one template keyed by
//!    (category, severity band) and fill it from the interview context.
//! 2. Add a timing item when the interview is at most two days out and preparation
//!    or practice is still below threshold.
//! 3. Carry `completed = true` over from previous items with the same
//!    (category, template key).
//! 4. Sort by priority, then potential impact, and keep the top `cap`.
//!
//! Step 3 must run before step 4.

use serde::{Deserialize, Serialize};

use crate::models::interview::{InterviewContext, InterviewType};
use crate::prediction::model::{Factor, FactorScores, Weights};

/// Days before the interview when a timing item can be emitted.
const FINAL_STRETCH_DAYS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Preparation,
    Research,
    Practice,
    Strategy,
    Timing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub action: String,
    pub category: RecommendationCategory,
    pub priority: Priority,
    /// Estimated percentage points the success probability could gain.
    pub potential_impact: u8,
    pub completed: bool,
    /// Stable identity of the template the action was rendered from.
    /// Persisted with the row, never sent to clients.
    #[serde(skip_serializing, default)]
    pub template_key: String,
}

/// Per-factor score below which a recommendation is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorThresholds {
    pub preparation: u8,
    pub company_research: u8,
    pub practice: u8,
    pub historical_performance: u8,
    pub role_match: u8,
}

impl Default for FactorThresholds {
    fn default() -> Self {
        Self {
            preparation: 60,
            company_research: 60,
            practice: 50,
            historical_performance: 50,
            role_match: 60,
        }
    }
}

impl FactorThresholds {
    pub fn get(&self, factor: Factor) -> u8 {
        match factor {
            Factor::Preparation => self.preparation,
            Factor::CompanyResearch => self.company_research,
            Factor::Practice => self.practice,
            Factor::HistoricalPerformance => self.historical_performance,
            Factor::RoleMatch => self.role_match,
        }
    }
}

pub struct RecommendationRules<'a> {
    pub thresholds: &'a FactorThresholds,
    pub weights: &'a Weights,
    pub cap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Critical,
    Moderate,
    Minor,
}

impl Severity {
    fn classify(score: u8, threshold: u8) -> Option<Self> {
        if score >= threshold {
            return None;
        }
        match threshold - score {
            30.. => Some(Severity::Critical),
            15..=29 => Some(Severity::Moderate),
            _ => Some(Severity::Minor),
        }
    }

    fn priority(self) -> Priority {
        match self {
            Severity::Critical => Priority::High,
            Severity::Moderate => Priority::Medium,
            Severity::Minor => Priority::Low,
        }
    }

    fn band(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Moderate => "moderate",
            Severity::Minor => "minor",
        }
    }
}

fn category_for(factor: Factor) -> RecommendationCategory {
    match factor {
        Factor::Preparation => RecommendationCategory::Preparation,
        Factor::CompanyResearch => RecommendationCategory::Research,
        Factor::Practice => RecommendationCategory::Practice,
        Factor::HistoricalPerformance | Factor::RoleMatch => RecommendationCategory::Strategy,
    }
}

fn template_stem(factor: Factor) -> &'static str {
    match factor {
        Factor::Preparation => "preparation.checklist",
        Factor::CompanyResearch => "research.company",
        Factor::Practice => "practice.sessions",
        Factor::HistoricalPerformance => "strategy.history",
        Factor::RoleMatch => "strategy.role_match",
    }
}

fn interview_label(kind: InterviewType) -> &'static str {
    match kind {
        InterviewType::Phone => "phone screen",
        InterviewType::Video => "video interview",
        InterviewType::Onsite => "onsite",
        InterviewType::Technical => "technical interview",
        InterviewType::Behavioral => "behavioral interview",
    }
}

fn render_action(factor: Factor, severity: Severity, ctx: &InterviewContext) -> String {
    let company = &ctx.company;
    let role = &ctx.job_title;
    let kind = interview_label(ctx.interview_type);
    match (factor, severity) {
        (Factor::Preparation, Severity::Critical) => {
            format!("Start your {company} {kind} checklist today; most prep items are still open")
        }
        (Factor::Preparation, Severity::Moderate) => {
            format!("Work through the remaining checklist items for your {kind}")
        }
        (Factor::Preparation, Severity::Minor) => {
            "Close out the last few checklist items before the interview".to_string()
        }
        (Factor::CompanyResearch, Severity::Critical) => format!(
            "Research {company}: products, recent news, culture, and who you will meet"
        ),
        (Factor::CompanyResearch, Severity::Moderate) => {
            format!("Fill the gaps in your {company} research notes")
        }
        (Factor::CompanyResearch, Severity::Minor) => {
            format!("Prepare two or three thoughtful questions to ask {company}")
        }
        (Factor::Practice, Severity::Critical) => {
            format!("Schedule a full mock {kind} this week")
        }
        (Factor::Practice, Severity::Moderate) => {
            format!("Run another practice session focused on {role} questions")
        }
        (Factor::Practice, Severity::Minor) => {
            "Do a short refresher practice session close to the interview date".to_string()
        }
        (Factor::HistoricalPerformance, Severity::Critical) => {
            "Review feedback from past interviews and write down the recurring gaps".to_string()
        }
        (Factor::HistoricalPerformance, Severity::Moderate) => {
            "Rehearse answers for the question types that tripped you up before".to_string()
        }
        (Factor::HistoricalPerformance, Severity::Minor) => {
            "Note what went well in recent interviews and repeat it".to_string()
        }
        (Factor::RoleMatch, Severity::Critical) => format!(
            "Map each {role} requirement to a concrete STAR story, and plan how to address gaps"
        ),
        (Factor::RoleMatch, Severity::Moderate) => {
            format!("Prepare examples for the {role} requirements you have not covered yet")
        }
        (Factor::RoleMatch, Severity::Minor) => {
            format!("Tailor your introduction to the {role} role")
        }
    }
}

/// Points the probability would gain if `factor` reached 100.
fn potential_impact(factor: Factor, score: u8, weights: &Weights) -> u8 {
    (weights.get(factor) * f64::from(100 - score.min(100)))
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Builds the ranked recommendation list for one prediction.
///
/// Returns an empty list when every factor meets its threshold.
pub fn generate_recommendations(
    factors: &FactorScores,
    context: &InterviewContext,
    previous: &[Recommendation],
    rules: &RecommendationRules<'_>,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    for factor in Factor::ALL {
        let score = factors.get(factor);
        let Some(severity) = Severity::classify(score, rules.thresholds.get(factor)) else {
            continue;
        };
        recommendations.push(Recommendation {
            action: render_action(factor, severity, context),
            category: category_for(factor),
            priority: severity.priority(),
            potential_impact: potential_impact(factor, score, rules.weights),
            completed: false,
            template_key: format!("{}.{}", template_stem(factor), severity.band()),
        });
    }

    if let Some(timing) = final_stretch(factors, context, rules) {
        recommendations.push(timing);
    }

    merge_completed(&mut recommendations, previous);

    // Stable sort keeps factor order for equal priority and impact.
    recommendations.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.potential_impact.cmp(&a.potential_impact))
    });
    recommendations.truncate(rules.cap);
    recommendations
}

fn final_stretch(
    factors: &FactorScores,
    context: &InterviewContext,
    rules: &RecommendationRules<'_>,
) -> Option<Recommendation> {
    if !(0..=FINAL_STRETCH_DAYS).contains(&context.days_until_interview) {
        return None;
    }

    let lagging: Vec<Factor> = [Factor::Preparation, Factor::Practice]
        .into_iter()
        .filter(|f| factors.get(*f) < rules.thresholds.get(*f))
        .collect();
    if lagging.is_empty() {
        return None;
    }

    let impact = lagging
        .iter()
        .map(|f| potential_impact(*f, factors.get(*f), rules.weights))
        .max()
        .unwrap_or(0);

    let action = if context.days_until_interview == 0 {
        "Your interview is today: spend the time left on your weakest prep area".to_string()
    } else {
        format!(
            "Only {} day(s) left: block focused time for checklist and practice before the {}",
            context.days_until_interview,
            interview_label(context.interview_type)
        )
    };

    Some(Recommendation {
        action,
        category: RecommendationCategory::Timing,
        priority: Priority::High,
        potential_impact: impact,
        completed: false,
        template_key: "timing.final_stretch".to_string(),
    })
}

/// Copies `completed = true` from previous items with the same (category, template key).
fn merge_completed(current: &mut [Recommendation], previous: &[Recommendation]) {
    for rec in current.iter_mut() {
        let was_completed = previous.iter().any(|p| {
            p.completed && p.category == rec.category && p.template_key == rec.template_key
        });
        if was_completed {
            rec.completed = true;
        }
    }
}
