use std::env;
use std::sync::Mutex;

use mistake_notebook::config::{mask_sensitive_data, DEFAULT_SECRET_KEY};
use mistake_notebook::Config;

// Tests in this binary share the process environment.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const KEYS: &[&str] = &[
    "DATABASE_URL",
    "SECRET_KEY",
    "TOKEN_EXPIRATION_HOURS",
    "LLM_API_KEY",
    "LLM_BASE_URL",
    "LLM_CHAT_PATH",
    "LLM_MODEL",
    "LLM_MAX_TOKENS",
    "LLM_TIMEOUT_SECS",
    "HOST",
    "PORT",
    "UPLOAD_DIR",
    "STATIC_DIR",
    "TEMPLATE_DIR",
    "RUST_LOG",
    "LOG_FILE_ENABLED",
    "LOG_CONSOLE_ENABLED",
    "LOG_DIRECTORY",
];

fn with_env<F: FnOnce()>(vars: &[(&str, &str)], test: F) {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    // SAFETY: every test touching the environment holds ENV_LOCK.
    unsafe {
        for key in KEYS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
    }
    test();
}

#[test]
fn test_defaults_without_environment() {
    with_env(&[], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.database.url, "sqlite:data/app.db?mode=rwc");
        assert_eq!(config.auth.secret_key, DEFAULT_SECRET_KEY);
        assert_eq!(config.auth.token_expiration_hours, 24);
        assert_eq!(config.llm.model, "glm-4.5-flash");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.llm.timeout_secs, 60);
        assert!(config.llm.api_key.is_empty());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.upload.upload_dir.to_str(), Some("static/uploads"));
        assert!(config.logging.file_enabled);
        assert!(config.logging.console_enabled);

        // Defaults are valid; the built-in secret only warns
        assert!(config.validate().is_ok());
    });
}

#[test]
fn test_values_are_read_from_environment() {
    with_env(
        &[
            ("DATABASE_URL", "sqlite:/tmp/notebook.db"),
            ("SECRET_KEY", "prod-secret"),
            ("TOKEN_EXPIRATION_HOURS", "12"),
            ("LLM_API_KEY", "sk-test-0123456789"),
            ("LLM_BASE_URL", "http://localhost:8080/v1/"),
            ("LLM_MAX_TOKENS", " 2048 "),
            ("PORT", "8088"),
            ("LOG_FILE_ENABLED", "false"),
            ("LOG_CONSOLE_ENABLED", "not-a-bool"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.database.url, "sqlite:/tmp/notebook.db");
            assert_eq!(config.auth.secret_key, "prod-secret");
            assert_eq!(config.auth.token_expiration_hours, 12);
            assert_eq!(config.llm.max_tokens, 2048);
            assert_eq!(config.llm.chat_url(), "http://localhost:8080/v1/chat/completions");
            assert_eq!(config.server.port, 8088);
            assert!(!config.logging.file_enabled);
            assert!(config.logging.console_enabled);
            assert!(config.validate().is_ok());
        },
    );
}

#[test]
fn test_invalid_numbers_are_errors() {
    for (key, value) in [
        ("PORT", "http"),
        ("PORT", "70000"),
        ("TOKEN_EXPIRATION_HOURS", "soon"),
        ("LLM_TIMEOUT_SECS", "-5"),
    ] {
        with_env(&[(key, value)], || {
            let result = Config::from_env();
            assert!(result.is_err(), "{}={} should be rejected", key, value);
            assert!(result.unwrap_err().to_string().contains(key));
        });
    }
}

#[test]
fn test_validation_rejects_unusable_settings() {
    with_env(&[("DATABASE_URL", "postgres://localhost/app")], || {
        let config = Config::from_env().unwrap();
        assert!(config.validate().is_err());
    });

    with_env(&[("TOKEN_EXPIRATION_HOURS", "0")], || {
        let config = Config::from_env().unwrap();
        assert!(config.validate().is_err());
    });

    with_env(&[("PORT", "0")], || {
        let config = Config::from_env().unwrap();
        assert!(config.validate().is_err());
    });
}

#[test]
fn test_secrets_are_masked_for_logging() {
    assert_eq!(mask_sensitive_data(""), "");
    assert_eq!(mask_sensitive_data("12345678"), "********");
    assert_eq!(mask_sensitive_data("sk-test-0123456789"), "sk-t***6789");
}

#[test]
fn test_upload_dir_maps_to_a_static_url() {
    with_env(&[], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.upload_url_prefix().unwrap(), "/static/uploads");
    });

    with_env(&[("STATIC_DIR", "public"), ("UPLOAD_DIR", "public/media/files")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.upload_url_prefix().unwrap(), "/static/media/files");
        assert!(config.validate().is_ok());
    });

    // Files written outside the static root could never be served back
    with_env(&[("UPLOAD_DIR", "/var/uploads")], || {
        let config = Config::from_env().unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("UPLOAD_DIR"));
    });

    with_env(&[("UPLOAD_DIR", "static/../outside")], || {
        let config = Config::from_env().unwrap();
        assert!(config.upload_url_prefix().is_err());
    });
}
