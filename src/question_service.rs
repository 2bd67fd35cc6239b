use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::database::{Database, QuestionFields, ReviewListMode};
use crate::errors::{ApiError, ServiceResult};
use crate::models::*;
use crate::review_scheduler::{streak_days, ReviewOutcome, ReviewScheduler};
use crate::{log_service_start, log_service_success, log_service_warn};

pub const DEFAULT_SUBJECT_COLOR: &str = "#4299e1";
pub const DEFAULT_SUBJECT_ICON: &str = "fas fa-book";
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

const SUBJECT_NOT_FOUND: &str = "Subject does not exist or has been deleted";
const QUESTION_NOT_FOUND: &str = "Question does not exist or has been deleted";

/// Integer query parameter; blank or unparsable values are `None`.
pub fn lenient_int(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse::<i64>().ok())
}

/// `page >= 1` (default 1) and `page_size` clamped to `1..=100` (default 10).
pub fn parse_pagination(page: Option<&str>, page_size: Option<&str>) -> (i64, i64) {
    let page = lenient_int(page).unwrap_or(1).max(1);
    let page_size = lenient_int(page_size)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, page_size)
}

pub fn clean_options(options: &[OptionInput]) -> Vec<NewOption> {
    options
        .iter()
        .filter_map(|item| {
            let option_key = item.option_key.as_deref().unwrap_or_default().trim();
            let option_text = item.option_text.as_deref().unwrap_or_default().trim();
            if option_key.is_empty() || option_text.is_empty() {
                return None;
            }
            Some(NewOption {
                option_key: option_key.to_string(),
                option_text: option_text.to_string(),
                is_correct: item.is_correct.unwrap_or(false),
                sort_order: item.sort_order.unwrap_or(0),
            })
        })
        .collect()
}

pub fn clean_tags(tags: &[Option<String>]) -> Vec<String> {
    tags.iter()
        .flatten()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

fn has_urls(value: &Option<Vec<Option<String>>>) -> bool {
    value
        .as_ref()
        .map(|urls| urls.iter().flatten().any(|u| !u.trim().is_empty()))
        .unwrap_or(false)
}

fn validate_difficulty(difficulty: i64) -> ServiceResult<i64> {
    if (1..=3).contains(&difficulty) {
        Ok(difficulty)
    } else {
        Err(ApiError::ValidationError("Difficulty must be between 1 and 3".to_string()))
    }
}

fn validate_review_status(review_status: i64) -> ServiceResult<i64> {
    if review_status == 0 || review_status == 1 {
        Ok(review_status)
    } else {
        Err(ApiError::ValidationError("Review status must be 0 or 1".to_string()))
    }
}

fn start_of_day(date: chrono::NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Review queue response: a bare list when `limit` was given, a page otherwise.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReviewListing {
    Items(Vec<ReviewItem>),
    Page(Paginated<ReviewItem>),
}

#[derive(Debug, Clone, Default)]
pub struct ReviewListQuery {
    pub mode: ReviewListMode,
    pub subject_id: Option<i64>,
    pub difficulty: Option<i64>,
    pub page: i64,
    pub page_size: i64,
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct QuestionService {
    db: Database,
    scheduler: ReviewScheduler,
}

impl QuestionService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            scheduler: ReviewScheduler::new(),
        }
    }

    // Subject operations
    pub async fn list_subjects(&self, user_id: i64) -> ServiceResult<Vec<Subject>> {
        Ok(self.db.list_subjects(user_id).await?)
    }

    pub async fn create_subject(&self, user_id: i64, request: CreateSubjectRequest) -> ServiceResult<Subject> {
        log_service_start!("question_service", "create_subject", user_id = user_id);

        let name = request.name.as_deref().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(ApiError::ValidationError("Subject name cannot be empty".to_string()));
        }
        let color = non_blank_or(request.color.as_deref(), DEFAULT_SUBJECT_COLOR);
        let icon = non_blank_or(request.icon.as_deref(), DEFAULT_SUBJECT_ICON);
        let sort_order = request.sort_order.unwrap_or(0);

        let subject = self
            .db
            .create_subject(user_id, name, &color, &icon, sort_order)
            .await?;
        log_service_success!("question_service", "create_subject", format!("subject {} created", subject.id));
        Ok(subject)
    }

    pub async fn update_subject(
        &self,
        user_id: i64,
        subject_id: i64,
        request: UpdateSubjectRequest,
    ) -> ServiceResult<Subject> {
        let mut subject = self
            .db
            .get_subject(user_id, subject_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(SUBJECT_NOT_FOUND.to_string()))?;

        if let Some(name) = request.name {
            let name = name.unwrap_or_default();
            let name = name.trim();
            if name.is_empty() {
                return Err(ApiError::ValidationError("Subject name cannot be empty".to_string()));
            }
            subject.name = name.to_string();
        }
        if let Some(color) = request.color {
            subject.color = non_blank_or(color.as_deref(), &subject.color);
        }
        if let Some(icon) = request.icon {
            subject.icon = non_blank_or(icon.as_deref(), &subject.icon);
        }
        if let Some(Some(sort_order)) = request.sort_order {
            subject.sort_order = sort_order;
        }

        self.db.update_subject(&subject).await?;
        self.db
            .get_subject(user_id, subject_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(SUBJECT_NOT_FOUND.to_string()))
    }

    pub async fn delete_subject(&self, user_id: i64, subject_id: i64) -> ServiceResult<()> {
        if self.db.soft_delete_subject(user_id, subject_id).await? {
            Ok(())
        } else {
            Err(ApiError::NotFound(SUBJECT_NOT_FOUND.to_string()))
        }
    }

    // Question operations
    pub async fn list_questions(
        &self,
        user_id: i64,
        filter: &QuestionFilter,
        page: i64,
        page_size: i64,
    ) -> ServiceResult<Paginated<QuestionBrief>> {
        let (rows, total) = self.db.list_questions(user_id, filter, page, page_size).await?;
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut tags = self.db.tags_for_questions(&ids).await?;

        let list = rows
            .iter()
            .map(|row| row.to_brief(tags.remove(&row.id).unwrap_or_default()))
            .collect();

        Ok(Paginated {
            list,
            total,
            page,
            page_size,
        })
    }

    pub async fn get_question_detail(&self, user_id: i64, question_id: i64) -> ServiceResult<QuestionDetail> {
        let row = self.require_question(user_id, question_id).await?;
        self.detail_for(row).await
    }

    pub async fn create_question(
        &self,
        user_id: i64,
        request: CreateQuestionRequest,
    ) -> ServiceResult<QuestionDetail> {
        log_service_start!("question_service", "create_question", user_id = user_id);

        let mut missing = Vec::new();
        if !has_text(&request.title) {
            missing.push("title");
        }
        if !has_text(&request.question_type) {
            missing.push("question_type");
        }
        if request.difficulty.unwrap_or(0) == 0 {
            missing.push("difficulty");
        }
        if !has_text(&request.content) && !has_urls(&request.images) {
            missing.push("content");
        }
        if !has_text(&request.answer) && !has_urls(&request.answer_images) {
            missing.push("answer");
        }
        if !missing.is_empty() {
            return Err(ApiError::ValidationError(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let difficulty = validate_difficulty(request.difficulty.unwrap_or(2))?;
        let review_status = validate_review_status(request.review_status.unwrap_or(0))?;
        let subject_id = self.resolve_subject(user_id, request.subject_id).await?;

        let fields = QuestionFields {
            subject_id,
            question_type: request.question_type.unwrap_or_default().trim().to_string(),
            title: request.title.unwrap_or_default().trim().to_string(),
            content: request.content,
            answer: request.answer,
            error_reason: request.error_reason,
            difficulty,
            review_status,
            is_important: request.is_important.unwrap_or(false),
            is_mastered: request.is_mastered.unwrap_or(false),
            images: request.images.as_deref().and_then(encode_url_list),
            error_images: request.error_images.as_deref().and_then(encode_url_list),
            answer_images: request.answer_images.as_deref().and_then(encode_url_list),
            options: Some(request.options.as_deref().map(clean_options).unwrap_or_default()),
            tags: Some(request.tags.as_deref().map(clean_tags).unwrap_or_default()),
        };

        let question_id = self.db.create_question(user_id, &fields).await?;
        log_service_success!("question_service", "create_question", user_id = user_id, question_id = question_id);

        self.get_question_detail(user_id, question_id).await
    }

    pub async fn update_question(
        &self,
        user_id: i64,
        question_id: i64,
        request: UpdateQuestionRequest,
    ) -> ServiceResult<QuestionDetail> {
        let row = self.require_question(user_id, question_id).await?;

        let subject_id = match request.subject_id {
            Some(requested) => self.resolve_subject(user_id, requested).await?,
            None => row.subject_id,
        };

        let difficulty = match request.difficulty {
            Some(difficulty) => validate_difficulty(difficulty)?,
            None => row.difficulty,
        };
        let review_status = match request.review_status {
            Some(status) => validate_review_status(status)?,
            None => row.review_status,
        };

        let merge_urls = |update: Option<Vec<Option<String>>>, current: &Option<String>| match update {
            Some(urls) => encode_url_list(&urls),
            None => current.clone(),
        };

        let fields = QuestionFields {
            subject_id,
            question_type: request.question_type.unwrap_or_else(|| row.question_type.clone()),
            title: request.title.unwrap_or_else(|| row.title.clone()),
            content: request.content.or_else(|| row.content.clone()),
            answer: request.answer.or_else(|| row.answer.clone()),
            error_reason: request.error_reason.or_else(|| row.error_reason.clone()),
            difficulty,
            review_status,
            is_important: request.is_important.unwrap_or(row.is_important),
            is_mastered: request.is_mastered.unwrap_or(row.is_mastered),
            images: merge_urls(request.images, &row.images),
            error_images: merge_urls(request.error_images, &row.error_images),
            answer_images: merge_urls(request.answer_images, &row.answer_images),
            options: request.options.as_deref().map(clean_options),
            tags: request.tags.as_deref().map(clean_tags),
        };

        self.db.update_question(user_id, question_id, &fields).await?;
        log_service_success!("question_service", "update_question", user_id = user_id, question_id = question_id);

        self.get_question_detail(user_id, question_id).await
    }

    pub async fn delete_question(&self, user_id: i64, question_id: i64) -> ServiceResult<()> {
        if self.db.soft_delete_question(user_id, question_id).await? {
            Ok(())
        } else {
            Err(ApiError::NotFound(QUESTION_NOT_FOUND.to_string()))
        }
    }

    // Review operations
    pub async fn review_stats(&self, user_id: i64) -> ServiceResult<ReviewStats> {
        let today = now_utc().date();
        let today_start = start_of_day(today);

        let today_count = self
            .db
            .count_reviewed_between(user_id, today_start, today_start + Duration::days(1))
            .await?;
        let pending_count = self.db.count_by_review_status(user_id, 0).await?;
        let reviewed_count = self.db.count_by_review_status(user_id, 1).await?;
        let review_days = self.db.review_days(user_id).await?;

        Ok(ReviewStats {
            today_count,
            pending_count,
            reviewed_count,
            streak_days: streak_days(&review_days, today),
        })
    }

    pub async fn review_list(&self, user_id: i64, query: &ReviewListQuery) -> ServiceResult<ReviewListing> {
        let (limit, offset) = match query.limit {
            Some(limit) => (limit.clamp(1, MAX_PAGE_SIZE), 0),
            None => (query.page_size, (query.page - 1) * query.page_size),
        };

        let (rows, total) = self
            .db
            .list_review_questions(user_id, query.mode, query.subject_id, query.difficulty, limit, offset)
            .await?;
        let items: Vec<ReviewItem> = rows.iter().map(QuestionRow::to_review_item).collect();

        Ok(match query.limit {
            Some(_) => ReviewListing::Items(items),
            None => ReviewListing::Page(Paginated {
                list: items,
                total,
                page: query.page,
                page_size: query.page_size,
            }),
        })
    }

    pub async fn submit_review(
        &self,
        user_id: i64,
        question_id: i64,
        result: Option<&str>,
    ) -> ServiceResult<ReviewOutcomeView> {
        let row = self.require_question(user_id, question_id).await?;

        let outcome = ReviewOutcome::parse(result.unwrap_or_default()).map_err(|e| {
            log_service_warn!("question_service", "submit_review", e);
            ApiError::ValidationError("Invalid review result".to_string())
        })?;

        let state = self.scheduler.apply(&row, outcome, now_utc());
        self.db.save_review_state(user_id, question_id, &state).await?;
        log_service_success!("question_service", "submit_review", user_id = user_id, question_id = question_id);

        Ok(ReviewOutcomeView {
            review_count: state.review_count,
            last_review_at: state.last_review_at,
            review_status: state.review_status,
            mastery_status: state.mastery_status,
        })
    }

    // Dashboard aggregates
    pub async fn dashboard_stats(&self, user_id: i64) -> ServiceResult<DashboardStats> {
        let today = now_utc().date();
        let week_start = start_of_day(today - Duration::days(today.weekday().num_days_from_monday() as i64));
        let counts = self.db.dashboard_counts(user_id, week_start).await?;

        Ok(DashboardStats {
            total_count: counts.total_count,
            subject_count: counts.subject_count,
            reviewed_count: counts.reviewed_count,
            pending_count: counts.pending_count,
            review_rate: percentage(counts.reviewed_count, counts.total_count),
            week_reviewed_count: counts.week_reviewed_count,
        })
    }

    pub async fn subject_distribution(&self, user_id: i64) -> ServiceResult<Vec<SubjectShare>> {
        Ok(self.db.subject_distribution(user_id).await?)
    }

    pub async fn review_trend(&self, user_id: i64) -> ServiceResult<ReviewTrend> {
        let today = now_utc().date();
        let first_day = today - Duration::days(6);
        let by_day = self.db.review_counts_by_day(user_id, start_of_day(first_day)).await?;

        let mut dates = Vec::with_capacity(7);
        let mut counts = Vec::with_capacity(7);
        for offset in 0..7 {
            let day = first_day + Duration::days(offset);
            dates.push(day.format("%m/%d").to_string());
            counts.push(by_day.get(&day.format("%Y-%m-%d").to_string()).copied().unwrap_or(0));
        }

        Ok(ReviewTrend { dates, counts })
    }

    pub async fn mastery_status(&self, user_id: i64) -> ServiceResult<Vec<MasteryShare>> {
        let counts = self.db.mastery_counts(user_id).await?;
        let count = |status: &str| counts.get(status).copied().unwrap_or(0);

        Ok(vec![
            MasteryShare { name: "Mastered", value: count("mastered"), status: "mastered" },
            MasteryShare { name: "Hard", value: count("hard"), status: "hard" },
            MasteryShare { name: "Forgot", value: count("forgot"), status: "forgot" },
            MasteryShare { name: "Not reviewed", value: count(""), status: "none" },
        ])
    }

    // Helpers
    pub async fn require_question(&self, user_id: i64, question_id: i64) -> ServiceResult<QuestionRow> {
        self.db
            .get_question(user_id, question_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(QUESTION_NOT_FOUND.to_string()))
    }

    async fn detail_for(&self, row: QuestionRow) -> ServiceResult<QuestionDetail> {
        let mut tags = self.db.tags_for_questions(&[row.id]).await?;
        let options = self.db.options_for_question(row.id).await?;
        Ok(row.to_detail(tags.remove(&row.id).unwrap_or_default(), options))
    }

    /// `None` or `0` clears the subject; any other id must be a live subject of the user.
    async fn resolve_subject(&self, user_id: i64, subject_id: Option<i64>) -> ServiceResult<Option<i64>> {
        match subject_id {
            None | Some(0) => Ok(None),
            Some(id) => {
                let subject = self
                    .db
                    .get_subject(user_id, id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(SUBJECT_NOT_FOUND.to_string()))?;
                Ok(Some(subject.id))
            }
        }
    }
}

fn non_blank_or(value: Option<&str>, fallback: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => fallback.to_string(),
    }
}

/// `part / whole` as a percentage rounded to one decimal; zero when `whole` is zero.
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_parsing() {
        assert_eq!(parse_pagination(None, None), (1, 10));
        assert_eq!(parse_pagination(Some("3"), Some("25")), (3, 25));
        assert_eq!(parse_pagination(Some("0"), Some("500")), (1, 100));
        assert_eq!(parse_pagination(Some("-4"), Some("0")), (1, 1));
        assert_eq!(parse_pagination(Some("abc"), Some("")), (1, 10));
    }

    #[test]
    fn test_clean_options_drops_blank_entries() {
        let options = vec![
            OptionInput {
                option_key: Some(" A ".to_string()),
                option_text: Some("3".to_string()),
                is_correct: Some(true),
                sort_order: Some(1),
            },
            OptionInput {
                option_key: Some("B".to_string()),
                option_text: Some("  ".to_string()),
                ..Default::default()
            },
            OptionInput::default(),
        ];
        let cleaned = clean_options(&options);
        assert_eq!(
            cleaned,
            vec![NewOption {
                option_key: "A".to_string(),
                option_text: "3".to_string(),
                is_correct: true,
                sort_order: 1,
            }]
        );
    }

    #[test]
    fn test_clean_tags() {
        let tags = vec![Some(" algebra ".to_string()), None, Some("".to_string()), Some("linear".to_string())];
        assert_eq!(clean_tags(&tags), vec!["algebra", "linear"]);
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(5, 5), 100.0);
    }

    #[test]
    fn test_non_blank_or() {
        assert_eq!(non_blank_or(Some(" #fff "), DEFAULT_SUBJECT_COLOR), "#fff");
        assert_eq!(non_blank_or(Some("  "), DEFAULT_SUBJECT_COLOR), DEFAULT_SUBJECT_COLOR);
        assert_eq!(non_blank_or(None, DEFAULT_SUBJECT_ICON), DEFAULT_SUBJECT_ICON);
    }
}
