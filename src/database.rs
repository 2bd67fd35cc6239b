use anyhow::Result;
use chrono::NaiveDateTime;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::log_db_operation;
use crate::models::*;

const QUESTION_SELECT: &str = r#"
    SELECT q.id, q.user_id, q.subject_id, s.name AS subject_name, s.color AS subject_color,
           q.question_type, q.title, q.content, q.answer, q.error_reason, q.difficulty,
           q.review_status, q.review_count, q.last_review_at, q.next_review_at,
           q.is_important, q.is_mastered, q.mastery_status, q.images, q.error_images,
           q.answer_images, q.created_at, q.updated_at
    FROM questions q
    LEFT JOIN subjects s ON s.id = q.subject_id
"#;

const SUBJECT_SELECT: &str = r#"
    SELECT s.id, s.user_id, s.name, s.color, s.icon, s.sort_order, s.created_at,
           (SELECT COUNT(*) FROM questions q
             WHERE q.subject_id = s.id AND q.is_deleted = 0) AS question_count
    FROM subjects s
"#;

const USER_SELECT: &str = r#"
    SELECT id, username, password_hash, nickname, email, phone, gender, avatar, bio,
           created_at, updated_at
    FROM users
"#;

/// Column values for inserting or rewriting a question. `options` and `tags`
/// are replaced only when `Some`.
#[derive(Debug, Clone, Default)]
pub struct QuestionFields {
    pub subject_id: Option<i64>,
    pub question_type: String,
    pub title: String,
    pub content: Option<String>,
    pub answer: Option<String>,
    pub error_reason: Option<String>,
    pub difficulty: i64,
    pub review_status: i64,
    pub is_important: bool,
    pub is_mastered: bool,
    pub images: Option<String>,
    pub error_images: Option<String>,
    pub answer_images: Option<String>,
    pub options: Option<Vec<NewOption>>,
    pub tags: Option<Vec<String>>,
}

/// Review bookkeeping written after a review outcome is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewState {
    pub review_count: i64,
    pub last_review_at: NaiveDateTime,
    pub next_review_at: Option<NaiveDateTime>,
    pub review_status: i64,
    pub mastery_status: String,
    pub is_mastered: bool,
    pub is_important: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReviewListMode {
    #[default]
    Pending,
    Important,
    Random,
    Difficulty,
}

impl ReviewListMode {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("important") => ReviewListMode::Important,
            Some("random") => ReviewListMode::Random,
            Some("difficulty") => ReviewListMode::Difficulty,
            _ => ReviewListMode::Pending,
        }
    }
}

/// Filters for the exam draw.
#[derive(Debug, Clone, Default)]
pub struct ExamDraw {
    pub difficulty: Option<i64>,
    pub unreviewed_only: bool,
    pub important_only: bool,
    pub limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardCounts {
    pub total_count: i64,
    pub subject_count: i64,
    pub reviewed_count: i64,
    pub pending_count: i64,
    pub week_reviewed_count: i64,
}

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir(database_url)?;
        // Every connection to `:memory:` opens its own empty database, so keep exactly one alive.
        let pool = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?
        };
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                nickname TEXT,
                email TEXT,
                phone TEXT,
                gender TEXT DEFAULT 'secret',
                avatar TEXT,
                bio TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS subjects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '#4299e1',
                icon TEXT NOT NULL DEFAULT 'fas fa-book',
                sort_order INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                subject_id INTEGER,
                question_type TEXT NOT NULL DEFAULT 'single_choice',
                title TEXT NOT NULL,
                content TEXT,
                answer TEXT,
                error_reason TEXT,
                difficulty INTEGER NOT NULL DEFAULT 2,
                review_status INTEGER NOT NULL DEFAULT 0,
                review_count INTEGER NOT NULL DEFAULT 0,
                last_review_at TEXT,
                next_review_at TEXT,
                is_important BOOLEAN NOT NULL DEFAULT 0,
                is_mastered BOOLEAN NOT NULL DEFAULT 0,
                mastery_status TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                images TEXT,
                error_images TEXT,
                answer_images TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE SET NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS question_options (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question_id INTEGER NOT NULL,
                option_key TEXT NOT NULL,
                option_text TEXT NOT NULL,
                is_correct BOOLEAN NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS question_tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ai_chat_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                model TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_subjects_user ON subjects(user_id, is_deleted);",
            "CREATE INDEX IF NOT EXISTS idx_questions_user ON questions(user_id, is_deleted, created_at);",
            "CREATE INDEX IF NOT EXISTS idx_questions_subject ON questions(subject_id);",
            "CREATE INDEX IF NOT EXISTS idx_options_question ON question_options(question_id);",
            "CREATE INDEX IF NOT EXISTS idx_tags_question ON question_tags(question_id);",
            "CREATE INDEX IF NOT EXISTS idx_chat_user ON ai_chat_records(user_id, created_at);",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        log_db_operation!(info, "migrate", "schema is up to date");
        Ok(())
    }

    // User operations
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        nickname: &str,
    ) -> Result<User> {
        let now = format_timestamp(&now_utc());
        let id = sqlx::query(
            r#"
            INSERT INTO users (username, password_hash, nickname, gender, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'secret', ?4, ?4)
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(nickname)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_user_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User {} not found after insert", id))
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("{USER_SELECT} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("{USER_SELECT} WHERE username = ?1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Writes the editable profile columns of `user` and bumps `updated_at`.
    pub async fn update_user_profile(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET nickname = ?1, email = ?2, phone = ?3, gender = ?4, bio = ?5, updated_at = ?6
            WHERE id = ?7
            "#,
        )
        .bind(&user.nickname)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.gender)
        .bind(&user.bio)
        .bind(format_timestamp(&now_utc()))
        .bind(user.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(password_hash)
            .bind(format_timestamp(&now_utc()))
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_avatar(&self, user_id: i64, avatar_url: &str) -> Result<()> {
        sqlx::query("UPDATE users SET avatar = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(avatar_url)
            .bind(format_timestamp(&now_utc()))
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Subject operations
    pub async fn list_subjects(&self, user_id: i64) -> Result<Vec<Subject>> {
        let subjects = sqlx::query_as::<_, Subject>(&format!(
            "{SUBJECT_SELECT} WHERE s.user_id = ?1 AND s.is_deleted = 0 ORDER BY s.sort_order, s.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(debug, "list_subjects", user_id = user_id, count = subjects.len());
        Ok(subjects)
    }

    pub async fn get_subject(&self, user_id: i64, subject_id: i64) -> Result<Option<Subject>> {
        let subject = sqlx::query_as::<_, Subject>(&format!(
            "{SUBJECT_SELECT} WHERE s.id = ?1 AND s.user_id = ?2 AND s.is_deleted = 0"
        ))
        .bind(subject_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subject)
    }

    pub async fn create_subject(
        &self,
        user_id: i64,
        name: &str,
        color: &str,
        icon: &str,
        sort_order: i64,
    ) -> Result<Subject> {
        let now = format_timestamp(&now_utc());
        let id = sqlx::query(
            r#"
            INSERT INTO subjects (user_id, name, color, icon, sort_order, is_deleted, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(color)
        .bind(icon)
        .bind(sort_order)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_subject(user_id, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Subject {} not found after insert", id))
    }

    pub async fn update_subject(&self, subject: &Subject) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subjects
            SET name = ?1, color = ?2, icon = ?3, sort_order = ?4, updated_at = ?5
            WHERE id = ?6 AND user_id = ?7 AND is_deleted = 0
            "#,
        )
        .bind(&subject.name)
        .bind(&subject.color)
        .bind(&subject.icon)
        .bind(subject.sort_order)
        .bind(format_timestamp(&now_utc()))
        .bind(subject.id)
        .bind(subject.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns `false` when no live subject matched.
    pub async fn soft_delete_subject(&self, user_id: i64, subject_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subjects SET is_deleted = 1, updated_at = ?1
            WHERE id = ?2 AND user_id = ?3 AND is_deleted = 0
            "#,
        )
        .bind(format_timestamp(&now_utc()))
        .bind(subject_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // Question operations
    pub async fn list_questions(
        &self,
        user_id: i64,
        filter: &QuestionFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<QuestionRow>, i64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM questions q LEFT JOIN subjects s ON s.id = q.subject_id",
        );
        push_question_filters(&mut count_query, user_id, filter);
        let (total,): (i64,) = count_query.build_query_as().fetch_one(&self.pool).await?;

        let mut list_query = QueryBuilder::<Sqlite>::new(QUESTION_SELECT);
        push_question_filters(&mut list_query, user_id, filter);
        list_query.push(" ORDER BY q.created_at DESC, q.id DESC LIMIT ");
        list_query.push_bind(page_size);
        list_query.push(" OFFSET ");
        list_query.push_bind((page - 1) * page_size);

        let rows = list_query
            .build_query_as::<QuestionRow>()
            .fetch_all(&self.pool)
            .await?;

        log_db_operation!(debug, "list_questions", user_id = user_id, count = rows.len());
        Ok((rows, total))
    }

    pub async fn get_question(&self, user_id: i64, question_id: i64) -> Result<Option<QuestionRow>> {
        let row = sqlx::query_as::<_, QuestionRow>(&format!(
            "{QUESTION_SELECT} WHERE q.id = ?1 AND q.user_id = ?2 AND q.is_deleted = 0"
        ))
        .bind(question_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Live questions among `ids`, in arbitrary order.
    pub async fn get_questions_by_ids(&self, user_id: i64, ids: &[i64]) -> Result<Vec<QuestionRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = QueryBuilder::<Sqlite>::new(QUESTION_SELECT);
        query.push(" WHERE q.user_id = ");
        query.push_bind(user_id);
        query.push(" AND q.is_deleted = 0 AND q.id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = query.build_query_as::<QuestionRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn tags_for_questions(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(tags);
        }

        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT question_id, name FROM question_tags WHERE question_id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let rows = query.build_query_as::<QuestionTag>().fetch_all(&self.pool).await?;
        for row in rows {
            tags.entry(row.question_id).or_default().push(row.name);
        }
        Ok(tags)
    }

    pub async fn options_for_question(&self, question_id: i64) -> Result<Vec<QuestionOption>> {
        let options = sqlx::query_as::<_, QuestionOption>(
            r#"
            SELECT id, question_id, option_key, option_text, is_correct, sort_order
            FROM question_options WHERE question_id = ?1
            ORDER BY sort_order, id
            "#,
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(options)
    }

    /// Inserts the question with its options and tags in one transaction.
    pub async fn create_question(&self, user_id: i64, fields: &QuestionFields) -> Result<i64> {
        let now = format_timestamp(&now_utc());
        let mut tx = self.pool.begin().await?;

        let question_id = sqlx::query(
            r#"
            INSERT INTO questions (user_id, subject_id, question_type, title, content, answer,
                                   error_reason, difficulty, review_status, review_count,
                                   is_important, is_mastered, is_deleted, images, error_images,
                                   answer_images, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11, 0, ?12, ?13, ?14, ?15, ?15)
            "#,
        )
        .bind(user_id)
        .bind(fields.subject_id)
        .bind(&fields.question_type)
        .bind(&fields.title)
        .bind(&fields.content)
        .bind(&fields.answer)
        .bind(&fields.error_reason)
        .bind(fields.difficulty)
        .bind(fields.review_status)
        .bind(fields.is_important)
        .bind(fields.is_mastered)
        .bind(&fields.images)
        .bind(&fields.error_images)
        .bind(&fields.answer_images)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        if let Some(options) = &fields.options {
            replace_options(&mut tx, question_id, options, &now).await?;
        }
        if let Some(tags) = &fields.tags {
            replace_tags(&mut tx, question_id, tags, &now).await?;
        }

        tx.commit().await?;
        Ok(question_id)
    }

    /// Rewrites every column from `fields`; options and tags only when present.
    pub async fn update_question(
        &self,
        user_id: i64,
        question_id: i64,
        fields: &QuestionFields,
    ) -> Result<()> {
        let now = format_timestamp(&now_utc());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE questions
            SET subject_id = ?1, question_type = ?2, title = ?3, content = ?4, answer = ?5,
                error_reason = ?6, difficulty = ?7, review_status = ?8, is_important = ?9,
                is_mastered = ?10, images = ?11, error_images = ?12, answer_images = ?13,
                updated_at = ?14
            WHERE id = ?15 AND user_id = ?16 AND is_deleted = 0
            "#,
        )
        .bind(fields.subject_id)
        .bind(&fields.question_type)
        .bind(&fields.title)
        .bind(&fields.content)
        .bind(&fields.answer)
        .bind(&fields.error_reason)
        .bind(fields.difficulty)
        .bind(fields.review_status)
        .bind(fields.is_important)
        .bind(fields.is_mastered)
        .bind(&fields.images)
        .bind(&fields.error_images)
        .bind(&fields.answer_images)
        .bind(&now)
        .bind(question_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if let Some(options) = &fields.options {
            replace_options(&mut tx, question_id, options, &now).await?;
        }
        if let Some(tags) = &fields.tags {
            replace_tags(&mut tx, question_id, tags, &now).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn soft_delete_question(&self, user_id: i64, question_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE questions SET is_deleted = 1, updated_at = ?1
            WHERE id = ?2 AND user_id = ?3 AND is_deleted = 0
            "#,
        )
        .bind(format_timestamp(&now_utc()))
        .bind(question_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_error_reason(&self, user_id: i64, question_id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE questions SET error_reason = ?1, updated_at = ?2
            WHERE id = ?3 AND user_id = ?4 AND is_deleted = 0
            "#,
        )
        .bind(reason)
        .bind(format_timestamp(&now_utc()))
        .bind(question_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Review operations
    pub async fn save_review_state(&self, user_id: i64, question_id: i64, state: &ReviewState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE questions
            SET review_count = ?1, last_review_at = ?2, next_review_at = ?3, review_status = ?4,
                mastery_status = ?5, is_mastered = ?6, is_important = ?7, updated_at = ?8
            WHERE id = ?9 AND user_id = ?10 AND is_deleted = 0
            "#,
        )
        .bind(state.review_count)
        .bind(format_timestamp(&state.last_review_at))
        .bind(state.next_review_at.as_ref().map(format_timestamp))
        .bind(state.review_status)
        .bind(&state.mastery_status)
        .bind(state.is_mastered)
        .bind(state.is_important)
        .bind(format_timestamp(&now_utc()))
        .bind(question_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_reviewed_between(
        &self,
        user_id: i64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM questions
            WHERE user_id = ?1 AND is_deleted = 0
              AND last_review_at >= ?2 AND last_review_at < ?3
            "#,
        )
        .bind(user_id)
        .bind(format_timestamp(&from))
        .bind(format_timestamp(&to))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count_by_review_status(&self, user_id: i64, review_status: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM questions WHERE user_id = ?1 AND is_deleted = 0 AND review_status = ?2",
        )
        .bind(user_id)
        .bind(review_status)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Distinct `YYYY-MM-DD` days on which any live question was last reviewed.
    pub async fn review_days(&self, user_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT substr(last_review_at, 1, 10) FROM questions
            WHERE user_id = ?1 AND is_deleted = 0 AND last_review_at IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(day,)| day).collect())
    }

    /// Review queue page. `limit`/`offset` come from either the bare-limit or paginated form.
    pub async fn list_review_questions(
        &self,
        user_id: i64,
        mode: ReviewListMode,
        subject_id: Option<i64>,
        difficulty: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<QuestionRow>, i64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM questions q");
        push_review_filters(&mut count_query, user_id, mode, subject_id, difficulty);
        let (total,): (i64,) = count_query.build_query_as().fetch_one(&self.pool).await?;

        let mut list_query = QueryBuilder::<Sqlite>::new(QUESTION_SELECT);
        push_review_filters(&mut list_query, user_id, mode, subject_id, difficulty);
        list_query.push(match mode {
            ReviewListMode::Random => " ORDER BY RANDOM()",
            ReviewListMode::Difficulty => " ORDER BY q.difficulty ASC, q.created_at DESC, q.id DESC",
            _ => " ORDER BY q.created_at DESC, q.id DESC",
        });
        list_query.push(" LIMIT ");
        list_query.push_bind(limit);
        list_query.push(" OFFSET ");
        list_query.push_bind(offset);

        let rows = list_query
            .build_query_as::<QuestionRow>()
            .fetch_all(&self.pool)
            .await?;

        log_db_operation!(debug, "list_review_questions", user_id = user_id, count = rows.len());
        Ok((rows, total))
    }

    // Exam operations
    pub async fn draw_exam_questions(&self, user_id: i64, draw: &ExamDraw) -> Result<Vec<QuestionRow>> {
        let mut query = QueryBuilder::<Sqlite>::new(QUESTION_SELECT);
        query.push(" WHERE q.user_id = ");
        query.push_bind(user_id);
        query.push(" AND q.is_deleted = 0");
        if let Some(difficulty) = draw.difficulty {
            query.push(" AND q.difficulty = ");
            query.push_bind(difficulty);
        }
        if draw.unreviewed_only {
            query.push(" AND q.review_status = 0");
        }
        if draw.important_only {
            query.push(" AND q.is_important = 1");
        }
        query.push(" ORDER BY RANDOM() LIMIT ");
        query.push_bind(draw.limit);

        let rows = query.build_query_as::<QuestionRow>().fetch_all(&self.pool).await?;
        log_db_operation!(debug, "draw_exam_questions", user_id = user_id, count = rows.len());
        Ok(rows)
    }

    // Chat record operations
    pub async fn insert_chat_record(
        &self,
        user_id: i64,
        role: &str,
        content: &str,
        model: Option<&str>,
    ) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO ai_chat_records (user_id, role, content, model, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(user_id)
        .bind(role)
        .bind(content)
        .bind(model)
        .bind(format_timestamp(&now_utc()))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// The `count` most recent records, returned oldest first.
    pub async fn recent_chat_records(&self, user_id: i64, count: i64) -> Result<Vec<ChatRecord>> {
        let mut records = sqlx::query_as::<_, ChatRecord>(
            r#"
            SELECT id, user_id, role, content, model, created_at FROM ai_chat_records
            WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(count)
        .fetch_all(&self.pool)
        .await?;
        records.reverse();
        Ok(records)
    }

    /// The first `limit` records in chronological order.
    pub async fn chat_history(&self, user_id: i64, limit: i64) -> Result<Vec<ChatRecord>> {
        let records = sqlx::query_as::<_, ChatRecord>(
            r#"
            SELECT id, user_id, role, content, model, created_at FROM ai_chat_records
            WHERE user_id = ?1 ORDER BY created_at ASC, id ASC LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn delete_chat_history(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ai_chat_records WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Dashboard aggregates
    pub async fn dashboard_counts(&self, user_id: i64, week_start: NaiveDateTime) -> Result<DashboardCounts> {
        let (total_count, reviewed_count, pending_count, week_reviewed_count): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(CASE WHEN review_status = 1 THEN 1 ELSE 0 END), 0),
                       COALESCE(SUM(CASE WHEN review_status = 0 THEN 1 ELSE 0 END), 0),
                       COALESCE(SUM(CASE WHEN review_status = 1 AND last_review_at >= ?2
                                         THEN 1 ELSE 0 END), 0)
                FROM questions WHERE user_id = ?1 AND is_deleted = 0
                "#,
            )
            .bind(user_id)
            .bind(format_timestamp(&week_start))
            .fetch_one(&self.pool)
            .await?;

        let (subject_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subjects WHERE user_id = ?1 AND is_deleted = 0")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(DashboardCounts {
            total_count,
            subject_count,
            reviewed_count,
            pending_count,
            week_reviewed_count,
        })
    }

    pub async fn subject_distribution(&self, user_id: i64) -> Result<Vec<SubjectShare>> {
        let shares = sqlx::query_as::<_, SubjectShare>(
            r#"
            SELECT s.name AS name, COUNT(q.id) AS value, s.color AS color
            FROM subjects s
            JOIN questions q ON q.subject_id = s.id AND q.is_deleted = 0 AND q.user_id = s.user_id
            WHERE s.user_id = ?1 AND s.is_deleted = 0
            GROUP BY s.id, s.name, s.color
            HAVING COUNT(q.id) > 0
            ORDER BY s.sort_order, s.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(shares)
    }

    /// Review counts keyed by `YYYY-MM-DD`, for reviews at or after `since`.
    pub async fn review_counts_by_day(&self, user_id: i64, since: NaiveDateTime) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT substr(last_review_at, 1, 10) AS day, COUNT(*)
            FROM questions
            WHERE user_id = ?1 AND is_deleted = 0 AND last_review_at >= ?2
            GROUP BY day
            "#,
        )
        .bind(user_id)
        .bind(format_timestamp(&since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Question counts keyed by mastery status; NULL and empty fold into `""`.
    pub async fn mastery_counts(&self, user_id: i64) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT COALESCE(mastery_status, '') AS status, COUNT(*)
            FROM questions
            WHERE user_id = ?1 AND is_deleted = 0
            GROUP BY status
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// True once any user exists; used by the seeding tool.
    pub async fn has_users(&self) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

fn push_question_filters(query: &mut QueryBuilder<'_, Sqlite>, user_id: i64, filter: &QuestionFilter) {
    query.push(" WHERE q.user_id = ");
    query.push_bind(user_id);
    query.push(" AND q.is_deleted = 0");

    if let Some(keyword) = &filter.keyword {
        let pattern = format!("%{}%", keyword.to_lowercase());
        query.push(" AND (LOWER(q.title) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR LOWER(COALESCE(q.content, '')) LIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
    if let Some(subject_id) = filter.subject_id {
        query.push(" AND q.subject_id = ");
        query.push_bind(subject_id);
    }
    if let Some(difficulty) = filter.difficulty {
        query.push(" AND q.difficulty = ");
        query.push_bind(difficulty);
    }
    if let Some(question_type) = &filter.question_type {
        query.push(" AND q.question_type = ");
        query.push_bind(question_type.clone());
    }
    if let Some(review_status) = filter.review_status {
        query.push(" AND q.review_status = ");
        query.push_bind(review_status);
    }
    if let Some(start) = &filter.start_date {
        query.push(" AND q.created_at >= ");
        query.push_bind(format_timestamp(start));
    }
    if let Some(end) = &filter.end_date {
        query.push(" AND q.created_at <= ");
        query.push_bind(format_timestamp(end));
    }
}

fn push_review_filters(
    query: &mut QueryBuilder<'_, Sqlite>,
    user_id: i64,
    mode: ReviewListMode,
    subject_id: Option<i64>,
    difficulty: Option<i64>,
) {
    query.push(" WHERE q.user_id = ");
    query.push_bind(user_id);
    query.push(" AND q.is_deleted = 0");
    match mode {
        ReviewListMode::Important => query.push(" AND q.is_important = 1"),
        _ => query.push(" AND q.review_status = 0"),
    };
    if let Some(subject_id) = subject_id {
        query.push(" AND q.subject_id = ");
        query.push_bind(subject_id);
    }
    if let Some(difficulty) = difficulty {
        query.push(" AND q.difficulty = ");
        query.push_bind(difficulty);
    }
}

async fn replace_options(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    question_id: i64,
    options: &[NewOption],
    now: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM question_options WHERE question_id = ?1")
        .bind(question_id)
        .execute(&mut **tx)
        .await?;

    for option in options {
        sqlx::query(
            r#"
            INSERT INTO question_options (question_id, option_key, option_text, is_correct, sort_order, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(question_id)
        .bind(&option.option_key)
        .bind(&option.option_text)
        .bind(option.is_correct)
        .bind(option.sort_order)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn replace_tags(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    question_id: i64,
    tags: &[String],
    now: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM question_tags WHERE question_id = ?1")
        .bind(question_id)
        .execute(&mut **tx)
        .await?;

    for tag in tags {
        sqlx::query("INSERT INTO question_tags (question_id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(question_id)
            .bind(tag)
            .bind(now)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// On-disk path of a file-backed SQLite URL; `None` for in-memory databases.
pub fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url.strip_prefix("sqlite:")?;
    let path = rest.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}

fn ensure_sqlite_parent_dir(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_file_path(database_url) else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn sample_fields(title: &str) -> QuestionFields {
        QuestionFields {
            question_type: "single_choice".to_string(),
            title: title.to_string(),
            content: Some("What is the slope of y = 3x + 1?".to_string()),
            answer: Some("3".to_string()),
            difficulty: 2,
            options: Some(vec![NewOption {
                option_key: "A".to_string(),
                option_text: "3".to_string(),
                is_correct: true,
                sort_order: 0,
            }]),
            tags: Some(vec!["algebra".to_string(), "linear".to_string()]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_question_round_trip_with_children() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash", "alice").await.unwrap();

        let id = db.create_question(user.id, &sample_fields("Slope")).await.unwrap();
        let row = db.get_question(user.id, id).await.unwrap().unwrap();
        assert_eq!(row.title, "Slope");
        assert_eq!(row.review_status, 0);
        assert!(!row.is_important);

        let options = db.options_for_question(id).await.unwrap();
        assert_eq!(options.len(), 1);
        assert!(options[0].is_correct);

        let tags = db.tags_for_questions(&[id]).await.unwrap();
        assert_eq!(tags[&id], vec!["algebra", "linear"]);

        // Another user cannot see it
        let bob = db.create_user("bob", "hash", "bob").await.unwrap();
        assert!(db.get_question(bob.id, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_leaves_children_when_absent() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash", "alice").await.unwrap();
        let id = db.create_question(user.id, &sample_fields("Slope")).await.unwrap();

        let mut fields = sample_fields("Slope v2");
        fields.options = None;
        fields.tags = Some(vec!["geometry".to_string()]);
        db.update_question(user.id, id, &fields).await.unwrap();

        assert_eq!(db.options_for_question(id).await.unwrap().len(), 1);
        let tags = db.tags_for_questions(&[id]).await.unwrap();
        assert_eq!(tags[&id], vec!["geometry"]);
        let row = db.get_question(user.id, id).await.unwrap().unwrap();
        assert_eq!(row.title, "Slope v2");
    }

    #[tokio::test]
    async fn test_soft_delete_hides_rows() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash", "alice").await.unwrap();
        let subject = db
            .create_subject(user.id, "Math", "#4299e1", "fas fa-book", 0)
            .await
            .unwrap();
        let mut fields = sample_fields("Slope");
        fields.subject_id = Some(subject.id);
        let id = db.create_question(user.id, &fields).await.unwrap();

        let subjects = db.list_subjects(user.id).await.unwrap();
        assert_eq!(subjects[0].question_count, 1);

        assert!(db.soft_delete_question(user.id, id).await.unwrap());
        assert!(!db.soft_delete_question(user.id, id).await.unwrap());
        assert!(db.get_question(user.id, id).await.unwrap().is_none());

        let subjects = db.list_subjects(user.id).await.unwrap();
        assert_eq!(subjects[0].question_count, 0);

        assert!(db.soft_delete_subject(user.id, subject.id).await.unwrap());
        assert!(db.list_subjects(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filters_and_pagination() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash", "alice").await.unwrap();
        for i in 0..5 {
            let mut fields = sample_fields(&format!("Question {}", i));
            fields.difficulty = if i % 2 == 0 { 1 } else { 3 };
            db.create_question(user.id, &fields).await.unwrap();
        }

        let filter = QuestionFilter {
            difficulty: Some(1),
            ..Default::default()
        };
        let (rows, total) = db.list_questions(user.id, &filter, 1, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 2);

        let filter = QuestionFilter {
            keyword: Some("QUESTION 4".to_string()),
            ..Default::default()
        };
        let (rows, total) = db.list_questions(user.id, &filter, 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].title, "Question 4");

        let tomorrow = now_utc() + Duration::days(1);
        let filter = QuestionFilter {
            start_date: Some(tomorrow),
            ..Default::default()
        };
        let (_, total) = db.list_questions(user.id, &filter, 1, 10).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_chat_history_ordering() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash", "alice").await.unwrap();
        for i in 0..8 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            db.insert_chat_record(user.id, role, &format!("message {}", i), None)
                .await
                .unwrap();
        }

        let recent = db.recent_chat_records(user.id, 6).await.unwrap();
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0].content, "message 2");
        assert_eq!(recent[5].content, "message 7");

        let history = db.chat_history(user.id, 3).await.unwrap();
        assert_eq!(history[0].content, "message 0");
        assert_eq!(history[2].content, "message 2");

        assert_eq!(db.delete_chat_history(user.id).await.unwrap(), 8);
    }

    #[test]
    fn test_review_list_mode_parsing() {
        assert_eq!(ReviewListMode::parse(None), ReviewListMode::Pending);
        assert_eq!(ReviewListMode::parse(Some("Important")), ReviewListMode::Important);
        assert_eq!(ReviewListMode::parse(Some("random")), ReviewListMode::Random);
        assert_eq!(ReviewListMode::parse(Some("difficulty")), ReviewListMode::Difficulty);
        assert_eq!(ReviewListMode::parse(Some("bogus")), ReviewListMode::Pending);
    }

    #[test]
    fn test_sqlite_file_path() {
        assert_eq!(sqlite_file_path("sqlite:data/app.db?mode=rwc"), Some(PathBuf::from("data/app.db")));
        assert_eq!(sqlite_file_path("sqlite:///tmp/app.db"), Some(PathBuf::from("/tmp/app.db")));
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
        assert_eq!(sqlite_file_path("postgres://localhost/db"), None);
    }
}
