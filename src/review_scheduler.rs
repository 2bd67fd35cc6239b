use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashSet;

use crate::database::ReviewState;
use crate::models::QuestionRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    Forgot,
    Hard,
    Mastered,
}

impl ReviewOutcome {
    /// Trimmed, case-insensitive `forgot | hard | mastered`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "forgot" => Ok(ReviewOutcome::Forgot),
            "hard" => Ok(ReviewOutcome::Hard),
            "mastered" => Ok(ReviewOutcome::Mastered),
            other => Err(anyhow!("Unknown review result '{}'", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Forgot => "forgot",
            ReviewOutcome::Hard => "hard",
            ReviewOutcome::Mastered => "mastered",
        }
    }
}

/// Fixed-interval scheduler: anything short of mastery comes back the next day.
#[derive(Clone)]
pub struct ReviewScheduler {
    retry_interval: Duration,
}

impl Default for ReviewScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewScheduler {
    pub fn new() -> Self {
        Self {
            retry_interval: Duration::days(1),
        }
    }

    pub fn apply(&self, question: &QuestionRow, outcome: ReviewOutcome, now: NaiveDateTime) -> ReviewState {
        let review_count = question.review_count + 1;
        let mastery_status = outcome.as_str().to_string();

        match outcome {
            ReviewOutcome::Mastered => ReviewState {
                review_count,
                last_review_at: now,
                next_review_at: None,
                review_status: 1,
                mastery_status,
                is_mastered: true,
                is_important: false,
            },
            ReviewOutcome::Forgot | ReviewOutcome::Hard => ReviewState {
                review_count,
                last_review_at: now,
                next_review_at: Some(now + self.retry_interval),
                review_status: 0,
                mastery_status,
                is_mastered: false,
                is_important: question.is_important || outcome == ReviewOutcome::Hard,
            },
        }
    }
}

/// Consecutive days ending `today` that appear in `review_days` (`YYYY-MM-DD`).
/// Zero when today itself has no review.
pub fn streak_days(review_days: &[String], today: NaiveDate) -> i64 {
    let days: HashSet<NaiveDate> = review_days
        .iter()
        .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .collect();

    let mut streak = 0;
    let mut cursor = today;
    while days.contains(&cursor) {
        streak += 1;
        match cursor.pred_opt() {
            Some(previous) => cursor = previous,
            None => break,
        }
    }
    streak
}
