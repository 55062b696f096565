//! Follow-up and preparation timing hints derived from the interview date.
//!
//! Pure presentation copy: nothing here feeds the success probability.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::Serialize;

use crate::models::interview::{InterviewContext, InterviewType};

const THANK_YOU_HOURS: i64 = 24;
const FOLLOW_UP_BUSINESS_DAYS: u32 = 5;
const STATUS_CHECK_DAYS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingWindow {
    PrepMilestone,
    ThankYou,
    FollowUp,
    StatusCheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingHint {
    pub window: TimingWindow,
    pub message: String,
    pub due_at: DateTime<Utc>,
}

/// Hints that are still actionable at `now`, earliest due first.
pub fn timing_guidance(context: &InterviewContext, now: DateTime<Utc>) -> Vec<TimingHint> {
    let date = context.interview_date;
    let mut hints = Vec::new();

    if now < date {
        for (days_before, message) in prep_milestones(context) {
            let due_at = date - Duration::days(days_before);
            if due_at >= now {
                hints.push(TimingHint {
                    window: TimingWindow::PrepMilestone,
                    message,
                    due_at,
                });
            }
        }
        return hints;
    }

    let thank_you_due = date + Duration::hours(THANK_YOU_HOURS);
    if now < thank_you_due {
        hints.push(TimingHint {
            window: TimingWindow::ThankYou,
            message: format!(
                "Send a thank-you note to your {} interviewers",
                context.company
            ),
            due_at: thank_you_due,
        });
    }

    let status_check_due = date + Duration::days(STATUS_CHECK_DAYS);
    if now < status_check_due {
        hints.push(TimingHint {
            window: TimingWindow::FollowUp,
            message: format!(
                "Follow up with {} if you have not heard back about the {} role",
                context.company, context.job_title
            ),
            due_at: add_business_days(date, FOLLOW_UP_BUSINESS_DAYS),
        });
    } else {
        hints.push(TimingHint {
            window: TimingWindow::StatusCheck,
            message: format!(
                "Check in on your {} application status or move it forward in your pipeline",
                context.company
            ),
            due_at: status_check_due,
        });
    }

    hints
}

fn prep_milestones(context: &InterviewContext) -> Vec<(i64, String)> {
    let final_check = match context.interview_type {
        InterviewType::Phone => "Confirm the call time and find a quiet place to talk",
        InterviewType::Video => "Test your camera, microphone and meeting link",
        InterviewType::Onsite => "Plan your route and aim to arrive 10 minutes early",
        InterviewType::Technical => "Warm up with one practice problem and review fundamentals",
        InterviewType::Behavioral => "Rehearse your strongest STAR stories out loud",
    };

    vec![
        (
            7,
            format!("Finish your research on {}", context.company),
        ),
        (
            3,
            format!("Run a mock interview for the {} role", context.job_title),
        ),
        (1, final_check.to_string()),
    ]
}

fn add_business_days(from: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let mut date = from;
    let mut remaining = days;
    while remaining > 0 {
        date += Duration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    date
}
