use crate::api::ApiResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{error, info, warn};

/// Failures surfaced by handlers and services.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A business rule rejected the request. Reported with HTTP 200 and `code = 1`
    /// so the browser client surfaces the message as-is.
    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    DuplicateResource(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),

    #[error("LLM service error: {0}")]
    LLMError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Where an error happened, attached to its log record.
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_id: Option<i64>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_id: None,
        }
    }

    pub fn with_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Error half of every handler result.
pub type ErrorResponse = (StatusCode, Json<ApiResponse<()>>);

/// Result type of the service layer; `anyhow` errors convert into `DatabaseError`.
pub type ServiceResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Envelope `code` and HTTP status for this error.
    pub fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            ApiError::ValidationError(_) => (StatusCode::OK, 1),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, 400),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, 401),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, 404),
            ApiError::DuplicateResource(_) => (StatusCode::CONFLICT, 409),
            ApiError::DatabaseError(_) | ApiError::LLMError(_) | ApiError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, 500)
            }
        }
    }

    /// Text placed in the envelope. Storage and internal failures keep their
    /// details in the log only.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::LLMError(detail) => detail.clone(),
            ApiError::DatabaseError(_) => "Database operation failed. Please try again.".to_string(),
            ApiError::InternalError(_) => "An internal error occurred. Please try again.".to_string(),
            other => other.to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::ValidationError(_) => "validation",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::DuplicateResource(_) => "duplicate",
            ApiError::DatabaseError(_) => "database",
            ApiError::LLMError(_) => "llm",
            ApiError::InternalError(_) => "internal",
        }
    }

    /// Logs the failure against `context` and builds the `{code, message, data}` envelope.
    pub fn to_response_with_context(self, context: ErrorContext) -> ErrorResponse {
        let (status, code) = self.status_and_code();
        let kind = self.kind();
        let ErrorContext { operation, resource_id, resource_type, user_id } = context;

        match &self {
            ApiError::NotFound(_) | ApiError::Unauthorized(_) => info!(
                operation = %operation, resource_type = %resource_type, resource_id = ?resource_id,
                user_id = ?user_id, kind, error = %self, "Request refused"
            ),
            ApiError::ValidationError(_) | ApiError::BadRequest(_) | ApiError::DuplicateResource(_) => warn!(
                operation = %operation, resource_type = %resource_type, resource_id = ?resource_id,
                user_id = ?user_id, kind, error = %self, "Request rejected"
            ),
            ApiError::DatabaseError(_) | ApiError::LLMError(_) | ApiError::InternalError(_) => error!(
                operation = %operation, resource_type = %resource_type, resource_id = ?resource_id,
                user_id = ?user_id, kind, error = %self, "Request failed"
            ),
        }

        (status, Json(ApiResponse::error(code, self.public_message())))
    }

    /// Conversion for places without a handler context, such as extractor rejections.
    pub fn to_response(self) -> ErrorResponse {
        self.to_response_with_context(ErrorContext::new("request", "request"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.to_response().into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(anyhow::Error::from(err))
    }
}

/// Maps storage failures onto client-facing errors by inspecting the message chain.
pub fn classify_database_error(error: &anyhow::Error) -> ApiError {
    let error_str = format!("{:#}", error).to_lowercase();

    if error_str.contains("already exists") || error_str.contains("unique constraint") {
        ApiError::DuplicateResource("Resource already exists".to_string())
    } else if error_str.contains("not found") || error_str.contains("no rows") {
        ApiError::NotFound("Resource not found".to_string())
    } else if error_str.contains("not null constraint") || error_str.contains("cannot be null") {
        ApiError::ValidationError("Required field is missing or invalid".to_string())
    } else {
        ApiError::DatabaseError(anyhow::anyhow!("{:#}", error))
    }
}
