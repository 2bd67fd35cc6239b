pub mod account_service;
pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod exam;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod models;
pub mod question_service;
pub mod review_scheduler;
pub mod upload;

pub use account_service::AccountService;
pub use api::{create_router, ApiResponse, AppState};
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use exam::ExamService;
pub use llm_service::LLMService;
pub use question_service::QuestionService;
pub use review_scheduler::ReviewScheduler;
pub use upload::UploadStore;
