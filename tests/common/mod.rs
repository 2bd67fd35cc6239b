#![allow(dead_code)]

use axum::http::{header, HeaderValue};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

use mistake_notebook::config::{
    AuthConfig, DatabaseConfig, LLMConfig, LoggingConfig, ServerConfig, UploadConfig,
};
use mistake_notebook::{create_router, AppState, Config, Database};

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn test_config(root: &Path, llm_base_url: &str, llm_api_key: &str) -> Config {
    Config {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
        },
        auth: AuthConfig {
            secret_key: TEST_SECRET.to_string(),
            token_expiration_hours: 24,
        },
        llm: LLMConfig {
            api_key: llm_api_key.to_string(),
            base_url: llm_base_url.to_string(),
            chat_path: "/chat/completions".to_string(),
            model: "glm-4.5-flash".to_string(),
            max_tokens: 1024,
            timeout_secs: 5,
        },
        server: ServerConfig {
            port: 3000,
            host: "127.0.0.1".to_string(),
            static_dir: root.join("static"),
            template_dir: root.join("templates"),
        },
        upload: UploadConfig {
            upload_dir: root.join("static").join("uploads"),
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            file_enabled: false,
            console_enabled: false,
            log_directory: root.join("logs").display().to_string(),
        },
    }
}

/// A router over an in-memory database with its files under a temporary directory.
pub struct TestApp {
    pub server: TestServer,
    pub db: Database,
    pub root: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_llm("http://127.0.0.1:9", "").await
    }

    pub async fn with_llm(base_url: &str, api_key: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("templates")).unwrap();
        std::fs::create_dir_all(root.path().join("static")).unwrap();

        let config = test_config(root.path(), base_url, api_key);
        let db = Database::new(&config.database.url).await.unwrap();
        let state = AppState::new(&config, db.clone()).unwrap();
        state.uploads.ensure_dirs().await.unwrap();

        let server = TestServer::new(create_router(state)).unwrap();
        Self { server, db, root }
    }

    /// Registers `username` and returns a bearer token for it.
    pub async fn login_as(&self, username: &str, password: &str) -> String {
        let credentials = json!({ "username": username, "password": password });
        let registered: Value = self.server.post("/api/auth/register").json(&credentials).await.json();
        assert_eq!(registered["code"], 0, "register failed: {}", registered);

        let login: Value = self.server.post("/api/auth/login").json(&credentials).await.json();
        assert_eq!(login["code"], 0, "login failed: {}", login);
        login["data"]["token"].as_str().unwrap().to_string()
    }

    pub async fn user_token(&self) -> String {
        self.login_as("student", "secret1").await
    }

    pub async fn create_subject(&self, token: &str, name: &str) -> i64 {
        let body: Value = self
            .server
            .post("/api/subjects")
            .add_header(header::AUTHORIZATION, bearer(token))
            .json(&json!({ "name": name }))
            .await
            .json();
        assert_eq!(body["code"], 0, "create subject failed: {}", body);
        body["data"]["id"].as_i64().unwrap()
    }

    pub async fn create_question(&self, token: &str, payload: Value) -> Value {
        let body: Value = self
            .server
            .post("/api/questions")
            .add_header(header::AUTHORIZATION, bearer(token))
            .json(&payload)
            .await
            .json();
        assert_eq!(body["code"], 0, "create question failed: {}", body);
        body["data"].clone()
    }
}

pub fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

pub fn question(title: &str, answer: &str, difficulty: i64) -> Value {
    json!({
        "title": title,
        "question_type": "single_choice",
        "content": format!("Content of {}", title),
        "answer": answer,
        "difficulty": difficulty,
    })
}
