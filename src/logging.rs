//! Structured logging macros.
//!
//! Each layer logs through its own macro family so field names stay uniform
//! across handlers, services, the database and the chat relay:
//! `operation` names the action, `user_id` / `question_id` identify the
//! records involved and `component` tags cross-cutting subsystems.

// ============================================================================
// HTTP handlers
// ============================================================================

#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, user_id = $user_id:expr) => {
        tracing::debug!(layer = "api", operation = $operation, user_id = $user_id, "Request received");
    };
    ($operation:expr) => {
        tracing::debug!(layer = "api", operation = $operation, "Request received");
    };
}

#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, user_id = $user_id:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::info!(
            layer = "api",
            operation = $operation,
            user_id = $user_id,
            question_id = $question_id,
            "Request handled: {}",
            $msg
        );
    };
    ($operation:expr, user_id = $user_id:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            layer = "api",
            operation = $operation,
            user_id = $user_id,
            count = $count,
            "Request handled: {}",
            $msg
        );
    };
    ($operation:expr, user_id = $user_id:expr, $msg:expr) => {
        tracing::info!(layer = "api", operation = $operation, user_id = $user_id, "Request handled: {}", $msg);
    };
}

/// Failures the envelope does not already report, e.g. unreadable templates.
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(layer = "api", operation = $operation, error = %$error, "Request failed: {}", $msg);
    };
}

#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, user_id = $user_id:expr, $msg:expr) => {
        tracing::warn!(layer = "api", operation = $operation, user_id = $user_id, "Request rejected: {}", $msg);
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(layer = "api", operation = $operation, "Request rejected: {}", $msg);
    };
}

// ============================================================================
// Services
// ============================================================================

#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, user_id = $user_id:expr) => {
        tracing::debug!(service = $service, operation = $operation, user_id = $user_id, "Service call");
    };
    ($service:expr, $operation:expr) => {
        tracing::debug!(service = $service, operation = $operation, "Service call");
    };
}

#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, user_id = $user_id:expr, question_id = $question_id:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            user_id = $user_id,
            question_id = $question_id,
            "Question updated"
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::info!(service = $service, operation = $operation, "{}", $msg);
    };
}

#[macro_export]
macro_rules! log_service_error {
    ($service:expr, $operation:expr, user_id = $user_id:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            user_id = $user_id,
            error = %$error,
            "Service call failed"
        );
    };
    ($service:expr, $operation:expr, error = $error:expr) => {
        tracing::error!(service = $service, operation = $operation, error = %$error, "Service call failed");
    };
}

#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(service = $service, operation = $operation, "{}", $msg);
    };
}

// ============================================================================
// Database
// ============================================================================

#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, user_id = $user_id:expr, count = $count:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            user_id = $user_id,
            rows = $count,
            "Query returned rows"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(component = "database", operation = $operation, "{}", $msg);
    };
}

// ============================================================================
// Chat relay
// ============================================================================

/// Upstream chat events, tagged with the model in use.
#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, model = $model:expr, user_id = $user_id:expr) => {
        tracing::info!(
            component = "llm_relay",
            operation = $operation,
            model = %$model,
            user_id = $user_id,
            "Relay started"
        );
    };
    (success, $operation:expr, model = $model:expr, duration_ms = $duration:expr, chars = $chars:expr) => {
        tracing::info!(
            component = "llm_relay",
            operation = $operation,
            model = %$model,
            duration_ms = $duration,
            reply_chars = $chars,
            "Reply saved"
        );
    };
    (error, $operation:expr, model = $model:expr, error = $error:expr) => {
        tracing::error!(
            component = "llm_relay",
            operation = $operation,
            model = %$model,
            error = %$error,
            "Relay failed"
        );
    };
    (warn, $operation:expr, $msg:expr) => {
        tracing::warn!(component = "llm_relay", operation = $operation, "{}", $msg);
    };
}

// ============================================================================
// Process lifecycle
// ============================================================================

#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(event_type = "startup", component = $component, "{}", $msg);
    };
    (shutdown, component = $component:expr, $msg:expr) => {
        tracing::info!(event_type = "shutdown", component = $component, "{}", $msg);
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "{}", $msg);
    };
}

#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(event_type = "validation", component = $component, result = "success", "{}", $msg);
    };
}
