use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::database::{Database, ExamDraw};
use crate::errors::{ApiError, ServiceResult};
use crate::models::*;
use crate::question_service::percentage;
use crate::{log_service_start, log_service_success};

pub const DEFAULT_QUESTION_COUNT: i64 = 20;
pub const MIN_QUESTION_COUNT: i64 = 5;
pub const MAX_QUESTION_COUNT: i64 = 50;
pub const UNANSWERED: &str = "Not answered";

/// Lower-cases and removes spaces before comparing answers.
pub fn normalize_answer(answer: &str) -> String {
    answer.to_lowercase().replace(' ', "")
}

pub fn answers_match(given: &str, expected: &str) -> bool {
    !given.is_empty() && !expected.is_empty() && normalize_answer(given) == normalize_answer(expected)
}

fn difficulty_filter(mode: Option<&str>) -> Option<i64> {
    match mode.map(str::trim) {
        Some("simple") => Some(1),
        Some("medium") => Some(2),
        Some("hard") => Some(3),
        _ => None,
    }
}

/// Parses the submitted id list, collapsing duplicates while keeping the first occurrence.
/// `None` when the list is missing, empty, or holds an entry that is not an id.
pub fn parse_question_ids(value: Option<&Value>) -> Option<Vec<i64>> {
    let items = value?.as_array()?;
    if items.is_empty() {
        return None;
    }
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let id = flex::value_to_int(item)?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Some(ids)
}

fn submitted_answer(answers: &Map<String, Value>, question_id: i64) -> String {
    match answers.get(&question_id.to_string()) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Scores `questions` (in submission order) against `answers`.
pub fn grade(questions: &[QuestionRow], answers: &Map<String, Value>, time_used: i64) -> ExamResult {
    let mut details = Vec::with_capacity(questions.len());
    let (mut correct_count, mut wrong_count, mut unanswered_count) = (0, 0, 0);

    for question in questions {
        let my_answer = submitted_answer(answers, question.id);
        let correct_answer = question.answer.as_deref().unwrap_or_default().trim().to_string();
        let is_correct = answers_match(&my_answer, &correct_answer);

        if my_answer.is_empty() {
            unanswered_count += 1;
        } else if is_correct {
            correct_count += 1;
        } else {
            wrong_count += 1;
        }

        details.push(ExamAnswerDetail {
            question_id: question.id,
            question_title: question.title.clone(),
            my_answer: if my_answer.is_empty() {
                UNANSWERED.to_string()
            } else {
                my_answer
            },
            correct_answer,
            is_correct,
        });
    }

    let total = details.len() as i64;
    ExamResult {
        score: correct_count,
        total,
        accuracy: percentage(correct_count, total),
        correct_count,
        wrong_count,
        unanswered_count,
        time_used,
        details,
    }
}

#[derive(Clone)]
pub struct ExamService {
    db: Database,
}

impl ExamService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn generate(&self, user_id: i64, request: GenerateExamRequest) -> ServiceResult<GeneratedExam> {
        log_service_start!("exam_service", "generate_exam", user_id = user_id);

        let question_count = match request.question_count {
            None => DEFAULT_QUESTION_COUNT,
            Some(count) => count.unwrap_or(0),
        };
        if !(MIN_QUESTION_COUNT..=MAX_QUESTION_COUNT).contains(&question_count) {
            return Err(ApiError::ValidationError(format!(
                "Question count must be between {} and {}",
                MIN_QUESTION_COUNT, MAX_QUESTION_COUNT
            )));
        }

        let question_mode = request.question_mode.as_deref().map(str::trim);
        let draw = ExamDraw {
            difficulty: difficulty_filter(request.difficulty_mode.as_deref()),
            unreviewed_only: question_mode == Some("unreviewed"),
            important_only: question_mode == Some("important"),
            limit: question_count,
        };

        let rows = self.db.draw_exam_questions(user_id, &draw).await?;
        if rows.is_empty() {
            return Err(ApiError::ValidationError("No questions match the selected criteria".to_string()));
        }

        log_service_success!("exam_service", "generate_exam", format!("{} questions drawn", rows.len()));
        Ok(GeneratedExam {
            exam_id: None,
            question_count: rows.len() as i64,
            time_limit: request.time_limit.unwrap_or(0),
            questions: rows.iter().map(QuestionRow::to_exam_question).collect(),
        })
    }

    pub async fn submit(&self, user_id: i64, request: SubmitExamRequest) -> ServiceResult<ExamResult> {
        let Some(ids) = parse_question_ids(request.question_ids.as_ref()) else {
            if request.question_ids.as_ref().and_then(Value::as_array).is_some_and(|a| !a.is_empty()) {
                return Err(ApiError::ValidationError("Some questions do not exist".to_string()));
            }
            return Err(ApiError::ValidationError("Question id list cannot be empty".to_string()));
        };

        let rows = self.db.get_questions_by_ids(user_id, &ids).await?;
        if rows.len() != ids.len() {
            return Err(ApiError::ValidationError("Some questions do not exist".to_string()));
        }

        let mut by_id: HashMap<i64, QuestionRow> = rows.into_iter().map(|r| (r.id, r)).collect();
        let ordered: Vec<QuestionRow> = ids.iter().filter_map(|id| by_id.remove(id)).collect();

        let answers = request.answers.unwrap_or_default();
        let result = grade(&ordered, &answers, request.time_used.unwrap_or(0));
        log_service_success!("exam_service", "submit_exam", format!("{}/{} correct", result.correct_count, result.total));
        Ok(result)
    }

    pub async fn save_wrong_question(
        &self,
        user_id: i64,
        request: SaveWrongQuestionRequest,
    ) -> ServiceResult<i64> {
        let question_id = match request.question_id {
            Some(id) if id != 0 => id,
            _ => return Err(ApiError::ValidationError("Question id cannot be empty".to_string())),
        };

        if self.db.get_question(user_id, question_id).await?.is_none() {
            return Err(ApiError::NotFound("Question does not exist".to_string()));
        }

        let reason = request.error_reason.as_deref().unwrap_or_default().trim();
        if !reason.is_empty() {
            self.db.update_error_reason(user_id, question_id, reason).await?;
        }
        Ok(question_id)
    }
}
