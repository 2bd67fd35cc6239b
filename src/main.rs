use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mistake_notebook::config::LoggingConfig;
use mistake_notebook::{create_router, log_system_event, AppState, Config, Database};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _guard = setup_logging(&config.logging)?;
    config.log_configuration_summary();
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting mistake notebook server");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let state = AppState::new(&config, db)?;
    state.uploads.ensure_dirs().await?;

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log_system_event!(startup, component = "server", format!("listening on {}", addr));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_system_event!(shutdown, component = "server", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    log_system_event!(shutdown, component = "server", "Shutdown signal received");
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    // console
    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    // daily-rotated file, no ANSI
    let mut guard = None;
    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create logs directory: {}", e);
        });
        let file_appender = tracing_appender::rolling::daily(&config.log_directory, "mistake-notebook.log");
        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking_file),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        directory = %config.log_directory,
        file_enabled = config.file_enabled,
        "Logging initialized with daily rotation"
    );

    Ok(guard)
}
