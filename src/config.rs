use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::{Component, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

// Import logging macros
use crate::{log_system_event, log_validation};

pub const DEFAULT_SECRET_KEY: &str = "change-me-secret-key";

/// Settings for the notebook server, read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub llm: LLMConfig,
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Token signing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub secret_key: String,
    pub token_expiration_hours: i64,
}

/// Upstream chat-completion service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_path: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub static_dir: PathBuf,
    pub template_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub upload_dir: PathBuf,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Reads every section from the environment, falling back to defaults for unset keys.
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Reading notebook settings from the environment");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            llm: LLMConfig::from_env()?,
            server: ServerConfig::from_env()?,
            upload: UploadConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        Ok(config)
    }

    /// Logs the effective settings with secrets masked.
    pub fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            token_expiration_hours = self.auth.token_expiration_hours,
            llm_base_url = %self.llm.base_url,
            llm_model = %self.llm.model,
            llm_api_key_masked = %mask_sensitive_data(&self.llm.api_key),
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            upload_dir = %self.upload.upload_dir.display(),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Public path of the upload root: `/static` followed by `UPLOAD_DIR` relative to `STATIC_DIR`.
    pub fn upload_url_prefix(&self) -> Result<String> {
        let outside = || {
            anyhow!(
                "UPLOAD_DIR ({}) must be inside STATIC_DIR ({})",
                self.upload.upload_dir.display(),
                self.server.static_dir.display()
            )
        };
        let relative = self
            .upload
            .upload_dir
            .strip_prefix(&self.server.static_dir)
            .map_err(|_| outside())?;

        let mut prefix = String::from("/static");
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    prefix.push('/');
                    prefix.push_str(&part.to_string_lossy());
                }
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        Ok(prefix)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.auth.token_expiration_hours <= 0 {
            return Err(anyhow!("TOKEN_EXPIRATION_HOURS must be greater than 0"));
        }

        self.upload_url_prefix()?;

        if self.auth.secret_key == DEFAULT_SECRET_KEY {
            warn!("SECRET_KEY is the built-in default - set a real secret before deploying");
        }

        if self.llm.api_key.is_empty() {
            warn!("LLM_API_KEY is empty - AI chat will be unavailable");
        }

        log_validation!(success, "configuration", "Settings passed validation");
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env_or("DATABASE_URL", "sqlite:data/app.db?mode=rwc");
        Ok(DatabaseConfig { url })
    }
}

impl AuthConfig {
    fn from_env() -> Result<Self> {
        let secret_key = env_or("SECRET_KEY", DEFAULT_SECRET_KEY);
        let token_expiration_hours = parse_env("TOKEN_EXPIRATION_HOURS", 24i64)?;

        Ok(AuthConfig {
            secret_key,
            token_expiration_hours,
        })
    }
}

impl LLMConfig {
    fn from_env() -> Result<Self> {
        Ok(LLMConfig {
            api_key: env_or("LLM_API_KEY", ""),
            base_url: env_or("LLM_BASE_URL", "https://open.bigmodel.cn/api/paas/v4"),
            chat_path: env_or("LLM_CHAT_PATH", "/chat/completions"),
            model: env_or("LLM_MODEL", "glm-4.5-flash"),
            max_tokens: parse_env("LLM_MAX_TOKENS", 4096u32)?,
            timeout_secs: parse_env("LLM_TIMEOUT_SECS", 60u64)?,
        })
    }

    pub fn chat_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.chat_path.trim_start_matches('/')
        )
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env_or("PORT", "3000");
        let port = port_str.trim().parse::<u16>().map_err(|_| {
            anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str)
        })?;

        Ok(ServerConfig {
            port,
            host: env_or("HOST", "0.0.0.0"),
            static_dir: PathBuf::from(env_or("STATIC_DIR", "static")),
            template_dir: PathBuf::from(env_or("TEMPLATE_DIR", "templates")),
        })
    }
}

impl UploadConfig {
    fn from_env() -> Result<Self> {
        Ok(UploadConfig {
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "static/uploads")),
        })
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env_or("RUST_LOG", "info,mistake_notebook=debug");

        let file_enabled = env_or("LOG_FILE_ENABLED", "true").parse::<bool>().unwrap_or(true);

        let console_enabled = env_or("LOG_CONSOLE_ENABLED", "true")
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env_or("LOG_DIRECTORY", "logs");

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

/// Keeps the first and last four characters of longer secrets.
pub fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
