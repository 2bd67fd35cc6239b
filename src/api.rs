use axum::{
    async_trait,
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Json, Response,
    },
    routing::{get, post, put},
    Router,
};
use futures_util::StreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    account_service::{AccountService, AvatarResponse, LoginResponse},
    auth::{require_auth, CurrentUser, TokenService},
    config::Config,
    database::{Database, ReviewListMode},
    errors::{ApiError, ErrorContext, ErrorResponse, ServiceResult},
    exam::ExamService,
    llm_service::{ChatSettings, LLMService},
    models::*,
    question_service::{
        lenient_int, parse_pagination, QuestionService, ReviewListQuery, ReviewListing, DEFAULT_PAGE_SIZE,
        MAX_PAGE_SIZE,
    },
    upload::{UploadKind, UploadStore},
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

/// Request bodies above this are rejected before reaching a handler.
pub const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;
const DEFAULT_HISTORY_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub tokens: TokenService,
    pub accounts: AccountService,
    pub questions: QuestionService,
    pub exams: ExamService,
    pub llm: LLMService,
    pub uploads: UploadStore,
    pub static_dir: PathBuf,
    pub template_dir: PathBuf,
}

impl AppState {
    pub fn new(config: &Config, db: Database) -> anyhow::Result<Self> {
        let tokens = TokenService::new(&config.auth.secret_key, config.auth.token_expiration_hours);
        Ok(Self {
            accounts: AccountService::new(db.clone(), tokens.clone()),
            questions: QuestionService::new(db.clone()),
            exams: ExamService::new(db.clone()),
            llm: LLMService::new(&config.llm, Arc::new(db.clone()))?,
            uploads: UploadStore::new(config.upload.upload_dir.clone(), config.upload_url_prefix()?),
            static_dir: config.server.static_dir.clone(),
            template_dir: config.server.template_dir.clone(),
            tokens,
            db,
        })
    }
}

/// The `{code, message, data}` envelope every JSON endpoint answers with.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::success_with_message(data, "ok")
    }

    pub fn success_with_message(data: T, message: &str) -> Self {
        Self {
            code: 0,
            message: message.to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

/// JSON body that tolerates an empty or `null` payload (treated as `{}`).
/// Malformed JSON is a 400 in the usual envelope.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()).to_response())?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(JsonBody(T::default()));
        }

        let invalid = |e: serde_json::Error| {
            ApiError::BadRequest(format!("Invalid JSON body: {}", e))
                .to_response_with_context(ErrorContext::new("parse_body", "request"))
        };
        let value: Value = serde_json::from_slice(&bytes).map_err(invalid)?;
        if value.is_null() {
            return Ok(JsonBody(T::default()));
        }
        serde_json::from_value(value).map(JsonBody).map_err(invalid)
    }
}

fn respond<T>(result: ServiceResult<T>, message: &str, context: ErrorContext) -> ApiResult<T> {
    result
        .map(|data| Json(ApiResponse::success_with_message(data, message)))
        .map_err(|e| e.to_response_with_context(context))
}

/// Ids in the path that do not parse name nothing that exists.
fn path_id(raw: &str, resource: &str, context: ErrorContext) -> Result<i64, ErrorResponse> {
    raw.trim().parse::<i64>().map_err(|_| {
        ApiError::NotFound(format!("{} does not exist or has been deleted", resource))
            .to_response_with_context(context)
    })
}

fn query_str<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str)
}

fn non_blank(params: &HashMap<String, String>, key: &str) -> Option<String> {
    query_str(params, key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Auth
// ============================================================================

pub async fn register(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CredentialsRequest>,
) -> ApiResult<User> {
    log_api_start!("register");
    let result = state.accounts.register(request).await;
    if let Ok(user) = &result {
        log_api_success!("register", user_id = user.id, "account created");
    }
    respond(result, "Registered successfully", ErrorContext::new("register", "user"))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CredentialsRequest>,
) -> ApiResult<LoginResponse> {
    log_api_start!("login");
    respond(
        state.accounts.login(request).await,
        "Login successful",
        ErrorContext::new("login", "session"),
    )
}

// ============================================================================
// Profile
// ============================================================================

pub async fn get_profile(Extension(CurrentUser(user)): Extension<CurrentUser>) -> ApiResult<User> {
    Ok(Json(ApiResponse::success(user)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<UpdateProfileRequest>,
) -> ApiResult<User> {
    let context = ErrorContext::new("update_profile", "user").with_user(user.id);
    respond(state.accounts.update_profile(user, request).await, "Profile updated", context)
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<ChangePasswordRequest>,
) -> ApiResult<Value> {
    let context = ErrorContext::new("change_password", "user").with_user(user.id);
    let result = state.accounts.change_password(&user, request).await.map(|_| Value::Null);
    respond(result, "Password changed", context)
}

pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<AvatarResponse> {
    let context = ErrorContext::new("upload_avatar", "user").with_user(user.id);
    let result = async {
        let form = read_form(multipart, "avatar").await?;
        let (filename, bytes) = form
            .file
            .ok_or_else(|| ApiError::ValidationError("Please choose an avatar image".to_string()))?;
        state.accounts.set_avatar(user.id, &state.uploads, &filename, &bytes).await
    }
    .await;
    respond(result, "Avatar updated", context)
}

// ============================================================================
// Subjects
// ============================================================================

pub async fn list_subjects(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Vec<Subject>> {
    let context = ErrorContext::new("list_subjects", "subject").with_user(user.id);
    respond(state.questions.list_subjects(user.id).await, "ok", context)
}

pub async fn create_subject(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<CreateSubjectRequest>,
) -> ApiResult<Subject> {
    let context = ErrorContext::new("create_subject", "subject").with_user(user.id);
    respond(state.questions.create_subject(user.id, request).await, "Subject created", context)
}

pub async fn update_subject(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<UpdateSubjectRequest>,
) -> ApiResult<Subject> {
    let context = || ErrorContext::new("update_subject", "subject").with_id(&id).with_user(user.id);
    let subject_id = path_id(&id, "Subject", context())?;
    respond(
        state.questions.update_subject(user.id, subject_id, request).await,
        "Subject updated",
        context(),
    )
}

pub async fn delete_subject(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let context = || ErrorContext::new("delete_subject", "subject").with_id(&id).with_user(user.id);
    let subject_id = path_id(&id, "Subject", context())?;
    let result = state.questions.delete_subject(user.id, subject_id).await.map(|_| Value::Null);
    respond(result, "Subject deleted", context())
}

// ============================================================================
// Questions
// ============================================================================

fn question_filter(params: &HashMap<String, String>) -> QuestionFilter {
    QuestionFilter {
        keyword: non_blank(params, "keyword"),
        subject_id: lenient_int(query_str(params, "subject_id")).filter(|v| *v != 0),
        difficulty: lenient_int(query_str(params, "difficulty")).filter(|v| *v != 0),
        question_type: non_blank(params, "question_type"),
        review_status: lenient_int(query_str(params, "review_status")).filter(|v| *v == 0 || *v == 1),
        start_date: query_str(params, "start_date").and_then(parse_filter_datetime),
        end_date: query_str(params, "end_date").and_then(parse_filter_datetime),
    }
}

pub async fn list_questions(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Paginated<QuestionBrief>> {
    log_api_start!("list_questions", user_id = user.id);
    let (page, page_size) = parse_pagination(query_str(&params, "page"), query_str(&params, "page_size"));
    let filter = question_filter(&params);

    let result = state.questions.list_questions(user.id, &filter, page, page_size).await;
    if let Ok(listing) = &result {
        log_api_success!("list_questions", user_id = user.id, count = listing.list.len(), "questions listed");
    }
    respond(result, "ok", ErrorContext::new("list_questions", "question").with_user(user.id))
}

pub async fn get_question(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<QuestionDetail> {
    let context = || ErrorContext::new("get_question", "question").with_id(&id).with_user(user.id);
    let question_id = path_id(&id, "Question", context())?;
    respond(state.questions.get_question_detail(user.id, question_id).await, "ok", context())
}

pub async fn create_question(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<CreateQuestionRequest>,
) -> ApiResult<QuestionDetail> {
    log_api_start!("create_question", user_id = user.id);
    let result = state.questions.create_question(user.id, request).await;
    if let Ok(detail) = &result {
        log_api_success!("create_question", user_id = user.id, question_id = detail.brief.id, "question created");
    }
    respond(
        result,
        "Question created",
        ErrorContext::new("create_question", "question").with_user(user.id),
    )
}

pub async fn update_question(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<UpdateQuestionRequest>,
) -> ApiResult<QuestionDetail> {
    let context = || ErrorContext::new("update_question", "question").with_id(&id).with_user(user.id);
    let question_id = path_id(&id, "Question", context())?;
    respond(
        state.questions.update_question(user.id, question_id, request).await,
        "Question updated",
        context(),
    )
}

pub async fn delete_question(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let context = || ErrorContext::new("delete_question", "question").with_id(&id).with_user(user.id);
    let question_id = path_id(&id, "Question", context())?;
    let result = state.questions.delete_question(user.id, question_id).await.map(|_| Value::Null);
    respond(result, "Question deleted", context())
}

// ============================================================================
// Reviews
// ============================================================================

pub async fn review_stats(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<ReviewStats> {
    let context = ErrorContext::new("review_stats", "review").with_user(user.id);
    respond(state.questions.review_stats(user.id).await, "ok", context)
}

pub async fn review_list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<ReviewListing> {
    let (page, page_size) = parse_pagination(query_str(&params, "page"), query_str(&params, "page_size"));
    let limit = non_blank(&params, "limit")
        .map(|raw| lenient_int(Some(&raw)).unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE));

    let query = ReviewListQuery {
        mode: ReviewListMode::parse(query_str(&params, "mode")),
        subject_id: lenient_int(query_str(&params, "subject_id")).filter(|v| *v != 0),
        difficulty: lenient_int(query_str(&params, "difficulty")).filter(|v| *v != 0),
        page,
        page_size,
        limit,
    };
    let context = ErrorContext::new("review_list", "review").with_user(user.id);
    respond(state.questions.review_list(user.id, &query).await, "ok", context)
}

pub async fn submit_review(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<ReviewSubmitRequest>,
) -> ApiResult<ReviewOutcomeView> {
    let context = || ErrorContext::new("submit_review", "question").with_id(&id).with_user(user.id);
    let question_id = path_id(&id, "Question", context())?;
    respond(
        state.questions.submit_review(user.id, question_id, request.result.as_deref()).await,
        "Review recorded",
        context(),
    )
}

// ============================================================================
// Exams
// ============================================================================

pub async fn generate_exam(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<GenerateExamRequest>,
) -> ApiResult<GeneratedExam> {
    let context = ErrorContext::new("generate_exam", "exam").with_user(user.id);
    respond(state.exams.generate(user.id, request).await, "Exam generated", context)
}

pub async fn submit_exam(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<SubmitExamRequest>,
) -> ApiResult<ExamResult> {
    let context = ErrorContext::new("submit_exam", "exam").with_user(user.id);
    respond(state.exams.submit(user.id, request).await, "Exam submitted", context)
}

pub async fn save_wrong_question(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<SaveWrongQuestionRequest>,
) -> ApiResult<Value> {
    let context = ErrorContext::new("save_wrong_question", "question").with_user(user.id);
    let result = state
        .exams
        .save_wrong_question(user.id, request)
        .await
        .map(|question_id| json!({ "question_id": question_id }));
    respond(result, "Saved to mistake notebook", context)
}

// ============================================================================
// AI chat
// ============================================================================

pub async fn chat(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Result<Response, ErrorResponse> {
    log_api_start!("ai_chat", user_id = user.id);
    let receiver = state
        .llm
        .start_chat(user.id, request)
        .await
        .map_err(|e| e.to_response_with_context(ErrorContext::new("ai_chat", "chat").with_user(user.id)))?;

    let events = ReceiverStream::new(receiver)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.payload())));

    Ok((
        [(header::CACHE_CONTROL, "no-cache"), (header::HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

pub async fn chat_history(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Value> {
    // Unbounded above; non-positive falls back to the default.
    let limit = lenient_int(query_str(&params, "limit"))
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    let result = state
        .db
        .chat_history(user.id, limit)
        .await
        .map(|records| {
            let messages: Vec<Value> = records
                .iter()
                .map(|r| {
                    json!({
                        "role": r.role,
                        "content": r.content,
                        "created_at": format_timestamp(&r.created_at),
                    })
                })
                .collect();
            json!({ "messages": messages })
        })
        .map_err(ApiError::from);
    respond(result, "ok", ErrorContext::new("chat_history", "chat").with_user(user.id))
}

pub async fn delete_chat_history(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Value> {
    let result = state
        .db
        .delete_chat_history(user.id)
        .await
        .map(|deleted| json!({ "deleted_count": deleted }))
        .map_err(ApiError::from);
    if let Ok(body) = &result {
        log_api_success!("delete_chat_history", user_id = user.id, body["deleted_count"]);
    }
    respond(result, "Chat history cleared", ErrorContext::new("delete_chat_history", "chat").with_user(user.id))
}

pub async fn chat_settings(State(state): State<AppState>) -> ApiResult<ChatSettings> {
    Ok(Json(ApiResponse::success(state.llm.settings())))
}

// ============================================================================
// Uploads
// ============================================================================

#[derive(Debug, Default)]
struct UploadForm {
    file: Option<(String, Bytes)>,
    fields: HashMap<String, String>,
}

/// Collects the file part named `file_field` and every text field.
async fn read_form(mut multipart: Multipart, file_field: &str) -> ServiceResult<UploadForm> {
    let mut form = UploadForm::default();
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let Some(field) = field else { break };

        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        if name == file_field {
            let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
            if let Some(filename) = filename.filter(|f| !f.trim().is_empty()) {
                form.file = Some((filename, bytes));
            }
        } else if filename.is_none() {
            let text = field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
            form.fields.insert(name, text);
        }
    }
    Ok(form)
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub url: String,
}

pub async fn upload_file(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(params): Query<HashMap<String, String>>,
    multipart: Multipart,
) -> ApiResult<UploadedFile> {
    let context = ErrorContext::new("upload_file", "upload").with_user(user.id);
    let result = async {
        let form = read_form(multipart, "file").await?;
        let requested = form
            .fields
            .get("type")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| non_blank(&params, "type"))
            .unwrap_or_else(|| "general".to_string());
        let kind = UploadKind::parse(&requested)
            .ok_or_else(|| ApiError::ValidationError(format!("Unsupported upload type '{}'", requested)))?;
        let (filename, bytes) = form
            .file
            .ok_or_else(|| ApiError::ValidationError("Please choose a file to upload".to_string()))?;

        if kind == UploadKind::Avatar {
            let avatar = state.accounts.set_avatar(user.id, &state.uploads, &filename, &bytes).await?;
            return Ok(UploadedFile { url: avatar.avatar_url });
        }
        let stored = state.uploads.save(kind, &filename, &bytes).await?;
        Ok(UploadedFile { url: stored.url })
    }
    .await;

    if let Err(e) = &result {
        log_api_warn!("upload_file", user_id = user.id, e);
    }
    respond(result, "Upload successful", context)
}

pub async fn upload_question_image(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<UploadedFile> {
    let context = ErrorContext::new("upload_question_image", "upload").with_user(user.id);
    let result = async {
        let form = read_form(multipart, "file").await?;
        let (filename, bytes) = form
            .file
            .ok_or_else(|| ApiError::ValidationError("Please choose an image to upload".to_string()))?;
        let stored = state.uploads.save(UploadKind::Question, &filename, &bytes).await?;
        Ok(UploadedFile { url: stored.url })
    }
    .await;
    respond(result, "Upload successful", context)
}

// ============================================================================
// Dashboard
// ============================================================================

pub async fn dashboard_stats(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<DashboardStats> {
    let context = ErrorContext::new("dashboard_stats", "dashboard").with_user(user.id);
    respond(state.questions.dashboard_stats(user.id).await, "ok", context)
}

pub async fn subject_distribution(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Vec<SubjectShare>> {
    let context = ErrorContext::new("subject_distribution", "dashboard").with_user(user.id);
    respond(state.questions.subject_distribution(user.id).await, "ok", context)
}

pub async fn review_trend(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<ReviewTrend> {
    let context = ErrorContext::new("review_trend", "dashboard").with_user(user.id);
    respond(state.questions.review_trend(user.id).await, "ok", context)
}

pub async fn mastery_status(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Vec<MasteryShare>> {
    let context = ErrorContext::new("mastery_status", "dashboard").with_user(user.id);
    respond(state.questions.mastery_status(user.id).await, "ok", context)
}

// ============================================================================
// Pages
// ============================================================================

fn is_page_name(page: &str) -> bool {
    !page.is_empty() && page.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

async fn render_page(state: &AppState, page: &str) -> Response {
    if !is_page_name(page) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let path = state.template_dir.join(format!("{}.html", page));
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Html(content).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log_api_warn!("render_page", format!("no template for page '{}'", page));
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            log_api_error!("render_page", error = e, format!("template for '{}' unreadable", page));
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

pub async fn login_page(State(state): State<AppState>) -> Response {
    render_page(&state, "login").await
}

pub async fn register_page(State(state): State<AppState>) -> Response {
    render_page(&state, "register").await
}

pub async fn named_page(State(state): State<AppState>, Path(page): Path<String>) -> Response {
    render_page(&state, &page).await
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        // Auth and profile
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/profile", get(get_profile).put(update_profile))
        .route("/api/password", put(change_password))
        .route("/api/avatar", post(upload_avatar))
        // Subjects
        .route("/api/subjects", get(list_subjects).post(create_subject))
        .route("/api/subjects/:id", put(update_subject).delete(delete_subject))
        // Questions
        .route("/api/questions", get(list_questions).post(create_question))
        .route("/api/questions/upload-image", post(upload_question_image))
        .route("/api/questions/:id", get(get_question).put(update_question).delete(delete_question))
        // Reviews
        .route("/api/review/stats", get(review_stats))
        .route("/api/review/list", get(review_list))
        .route("/api/review/:id", post(submit_review))
        // Exams
        .route("/api/exam/generate", post(generate_exam))
        .route("/api/exam/submit", post(submit_exam))
        .route("/api/exam/save-wrong-question", post(save_wrong_question))
        // AI chat
        .route("/api/ai/chat", post(chat))
        .route("/api/ai/chat/history", get(chat_history).delete(delete_chat_history))
        .route("/api/ai/chat/settings", get(chat_settings))
        // Uploads
        .route("/api/upload/file", post(upload_file))
        // Dashboard
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route("/api/dashboard/subject-distribution", get(subject_distribution))
        .route("/api/dashboard/review-trend", get(review_trend))
        .route("/api/dashboard/mastery-status", get(mastery_status))
        // Pages and assets
        .route("/", get(login_page))
        .route("/login", get(login_page))
        .route("/register", get(register_page))
        .route("/:page", get(named_page))
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_names() {
        assert!(is_page_name("dashboard"));
        assert!(is_page_name("ai-solve"));
        assert!(is_page_name("question_list"));
        assert!(!is_page_name(""));
        assert!(!is_page_name("..%2Fsecret"));
        assert!(!is_page_name("a.b"));
    }

    #[test]
    fn test_question_filter_parsing() {
        let params: HashMap<String, String> = [
            ("keyword", "  slope "),
            ("subject_id", "0"),
            ("difficulty", "2"),
            ("review_status", "5"),
            ("start_date", "2024-03-01"),
            ("end_date", "garbage"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let filter = question_filter(&params);
        assert_eq!(filter.keyword.as_deref(), Some("slope"));
        assert_eq!(filter.subject_id, None);
        assert_eq!(filter.difficulty, Some(2));
        assert_eq!(filter.review_status, None);
        assert!(filter.start_date.is_some());
        assert!(filter.end_date.is_none());
    }

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::success(json!({"id": 1}))).unwrap();
        assert_eq!(body, json!({"code": 0, "message": "ok", "data": {"id": 1}}));

        let body = serde_json::to_value(ApiResponse::<()>::error(404, "missing".to_string())).unwrap();
        assert_eq!(body, json!({"code": 404, "message": "missing", "data": null}));
    }
}
