use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time truncated to whole seconds, the resolution every table stores.
pub fn now_utc() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD` (midnight) or `YYYY-MM-DD HH:MM:SS`.
pub fn parse_filter_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()
}

/// Decodes a JSON-array image column; anything unparsable reads back as empty.
pub fn parse_url_list(raw: Option<&str>) -> Vec<String> {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
}

/// Trims entries and drops blanks; an empty result is stored as NULL.
pub fn encode_url_list(urls: &[Option<String>]) -> Option<String> {
    let cleaned: Vec<String> = urls
        .iter()
        .flatten()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        serde_json::to_string(&cleaned).ok()
    }
}

mod ts_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
    }

    pub mod option {
        use super::TIMESTAMP_FORMAT;
        use chrono::NaiveDateTime;
        use serde::Serializer;

        pub fn serialize<S: Serializer>(
            value: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&v.format(TIMESTAMP_FORMAT).to_string()),
                None => serializer.serialize_none(),
            }
        }
    }
}

/// Lenient deserializers for request bodies written by a loosely-typed browser client.
pub mod flex {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn value_to_int(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Integer from a number or numeric string; anything else is `None`.
    pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value_to_int(&value))
    }

    /// Present key → `Some(truthiness)`, including `null` → `Some(false)`.
    pub fn present_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Some(truthy(&value)))
    }

    /// Present key → `Some(parsed)`, so callers can tell "absent" from "null".
    pub fn present_int<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<i64>>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Some(value_to_int(&value)))
    }

    /// Present key → `Some(string)` with `null` kept as `None` inside.
    pub fn present_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<String>>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Some(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }))
    }
}

// ============================================================================
// Persistent records
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    #[serde(with = "ts_format")]
    pub created_at: NaiveDateTime,
    #[serde(with = "ts_format")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subject {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub sort_order: i64,
    pub question_count: i64,
    #[serde(with = "ts_format")]
    pub created_at: NaiveDateTime,
}

/// A `questions` row joined with its subject's display fields.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub user_id: i64,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub subject_color: Option<String>,
    pub question_type: String,
    pub title: String,
    pub content: Option<String>,
    pub answer: Option<String>,
    pub error_reason: Option<String>,
    pub difficulty: i64,
    pub review_status: i64,
    pub review_count: i64,
    pub last_review_at: Option<NaiveDateTime>,
    pub next_review_at: Option<NaiveDateTime>,
    pub is_important: bool,
    pub is_mastered: bool,
    pub mastery_status: Option<String>,
    pub images: Option<String>,
    pub error_images: Option<String>,
    pub answer_images: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionOption {
    pub id: i64,
    #[serde(skip)]
    pub question_id: i64,
    pub option_key: String,
    pub option_text: String,
    pub is_correct: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct QuestionTag {
    pub question_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChatRecord {
    pub id: i64,
    pub user_id: i64,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
    #[serde(with = "ts_format")]
    pub created_at: NaiveDateTime,
}

// ============================================================================
// Response views
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct QuestionBrief {
    pub id: i64,
    pub title: String,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub subject_color: Option<String>,
    pub difficulty: i64,
    pub question_type: String,
    pub review_status: i64,
    pub mastery_status: Option<String>,
    pub error_reason: Option<String>,
    #[serde(with = "ts_format")]
    pub created_at: NaiveDateTime,
    pub tags: Vec<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionDetail {
    #[serde(flatten)]
    pub brief: QuestionBrief,
    pub content: Option<String>,
    pub answer: Option<String>,
    pub options: Vec<QuestionOption>,
    pub review_count: i64,
    #[serde(with = "ts_format::option")]
    pub last_review_at: Option<NaiveDateTime>,
    #[serde(with = "ts_format::option")]
    pub next_review_at: Option<NaiveDateTime>,
    pub is_important: bool,
    pub is_mastered: bool,
    pub error_images: Vec<String>,
    pub answer_images: Vec<String>,
}

impl QuestionRow {
    pub fn to_brief(&self, tags: Vec<String>) -> QuestionBrief {
        QuestionBrief {
            id: self.id,
            title: self.title.clone(),
            subject_id: self.subject_id,
            subject_name: self.subject_name.clone(),
            subject_color: self.subject_color.clone(),
            difficulty: self.difficulty,
            question_type: self.question_type.clone(),
            review_status: self.review_status,
            mastery_status: self.mastery_status.clone(),
            error_reason: self.error_reason.clone(),
            created_at: self.created_at,
            tags,
            images: parse_url_list(self.images.as_deref()),
        }
    }

    pub fn to_detail(&self, tags: Vec<String>, options: Vec<QuestionOption>) -> QuestionDetail {
        QuestionDetail {
            brief: self.to_brief(tags),
            content: self.content.clone(),
            answer: self.answer.clone(),
            options,
            review_count: self.review_count,
            last_review_at: self.last_review_at,
            next_review_at: self.next_review_at,
            is_important: self.is_important,
            is_mastered: self.is_mastered,
            error_images: parse_url_list(self.error_images.as_deref()),
            answer_images: parse_url_list(self.answer_images.as_deref()),
        }
    }

    pub fn to_review_item(&self) -> ReviewItem {
        ReviewItem {
            id: self.id,
            title: self.title.clone(),
            content: self.content.clone(),
            answer: self.answer.clone(),
            error_reason: self.error_reason.clone(),
            difficulty: self.difficulty,
            review_count: self.review_count,
            last_review_at: self.last_review_at,
            subject_id: self.subject_id,
            subject_name: self.subject_name.clone(),
            mastery_status: self.mastery_status.clone(),
        }
    }

    pub fn to_exam_question(&self) -> ExamQuestion {
        ExamQuestion {
            id: self.id,
            title: self.title.clone(),
            content: self.content.clone(),
            answer: self.answer.clone(),
            difficulty: self.difficulty,
            subject_id: self.subject_id,
            subject_name: self.subject_name.clone(),
            question_type: self.question_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub answer: Option<String>,
    pub error_reason: Option<String>,
    pub difficulty: i64,
    pub review_count: i64,
    #[serde(with = "ts_format::option")]
    pub last_review_at: Option<NaiveDateTime>,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub mastery_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcomeView {
    pub review_count: i64,
    #[serde(with = "ts_format")]
    pub last_review_at: NaiveDateTime,
    pub review_status: i64,
    pub mastery_status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewStats {
    pub today_count: i64,
    pub pending_count: i64,
    pub reviewed_count: i64,
    pub streak_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamQuestion {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub answer: Option<String>,
    pub difficulty: i64,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub question_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedExam {
    pub exam_id: Option<i64>,
    pub question_count: i64,
    pub time_limit: i64,
    pub questions: Vec<ExamQuestion>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExamAnswerDetail {
    pub question_id: i64,
    pub question_title: String,
    pub my_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamResult {
    pub score: i64,
    pub total: i64,
    pub accuracy: f64,
    pub correct_count: i64,
    pub wrong_count: i64,
    pub unanswered_count: i64,
    pub time_used: i64,
    pub details: Vec<ExamAnswerDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_count: i64,
    pub subject_count: i64,
    pub reviewed_count: i64,
    pub pending_count: i64,
    pub review_rate: f64,
    pub week_reviewed_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubjectShare {
    pub name: String,
    pub value: i64,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewTrend {
    pub dates: Vec<String>,
    pub counts: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasteryShare {
    pub name: &'static str,
    pub value: i64,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub list: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSubjectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "flex::int")]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSubjectRequest {
    #[serde(default, deserialize_with = "flex::present_string")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "flex::present_string")]
    pub color: Option<Option<String>>,
    #[serde(default, deserialize_with = "flex::present_string")]
    pub icon: Option<Option<String>>,
    #[serde(default, deserialize_with = "flex::present_int")]
    pub sort_order: Option<Option<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionInput {
    #[serde(default)]
    pub option_key: Option<String>,
    #[serde(default)]
    pub option_text: Option<String>,
    #[serde(default, deserialize_with = "flex::present_bool")]
    pub is_correct: Option<bool>,
    #[serde(default, deserialize_with = "flex::int")]
    pub sort_order: Option<i64>,
}

/// Option ready for insertion, after blank entries were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOption {
    pub option_key: String,
    pub option_text: String,
    pub is_correct: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateQuestionRequest {
    #[serde(default, deserialize_with = "flex::int")]
    pub subject_id: Option<i64>,
    #[serde(default)]
    pub question_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default, deserialize_with = "flex::int")]
    pub difficulty: Option<i64>,
    #[serde(default, deserialize_with = "flex::int")]
    pub review_status: Option<i64>,
    #[serde(default, deserialize_with = "flex::present_bool")]
    pub is_important: Option<bool>,
    #[serde(default, deserialize_with = "flex::present_bool")]
    pub is_mastered: Option<bool>,
    #[serde(default)]
    pub options: Option<Vec<OptionInput>>,
    #[serde(default)]
    pub tags: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub images: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub error_images: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub answer_images: Option<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateQuestionRequest {
    #[serde(default, deserialize_with = "flex::present_int")]
    pub subject_id: Option<Option<i64>>,
    #[serde(default)]
    pub question_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default, deserialize_with = "flex::int")]
    pub difficulty: Option<i64>,
    #[serde(default, deserialize_with = "flex::int")]
    pub review_status: Option<i64>,
    #[serde(default, deserialize_with = "flex::present_bool")]
    pub is_important: Option<bool>,
    #[serde(default, deserialize_with = "flex::present_bool")]
    pub is_mastered: Option<bool>,
    #[serde(default)]
    pub options: Option<Vec<OptionInput>>,
    #[serde(default)]
    pub tags: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub images: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub error_images: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub answer_images: Option<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewSubmitRequest {
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateExamRequest {
    #[serde(default, deserialize_with = "flex::present_int")]
    pub question_count: Option<Option<i64>>,
    #[serde(default)]
    pub difficulty_mode: Option<String>,
    #[serde(default)]
    pub question_mode: Option<String>,
    #[serde(default, deserialize_with = "flex::int")]
    pub time_limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitExamRequest {
    #[serde(default)]
    pub question_ids: Option<serde_json::Value>,
    #[serde(default)]
    pub answers: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, deserialize_with = "flex::int")]
    pub time_used: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveWrongQuestionRequest {
    #[serde(default, deserialize_with = "flex::int")]
    pub question_id: Option<i64>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default, rename = "oldPassword")]
    pub old_password: Option<String>,
    #[serde(default, rename = "newPassword")]
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Filters for the question list, already parsed from the query string.
#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    pub keyword: Option<String>,
    pub subject_id: Option<i64>,
    pub difficulty: Option<i64>,
    pub question_type: Option<String>,
    pub review_status: Option<i64>,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
}
