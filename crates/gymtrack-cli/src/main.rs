//! gymtrack - a command-line client for the gym API.
//!
//! Sign in, keep the session across runs, edit the profile and browse
//! exercises by muscle group.

mod commands;

use std::io;

use anyhow::Result;
use gymtrack_core::{ApiClient, Config, SessionManager};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

/// Log file name prefix inside the log directory (rotated daily)
const LOG_FILE_PREFIX: &str = "gymtrack.log";

/// Initialize the tracing subscriber for logging.
///
/// Console output follows `RUST_LOG` (default `warn`); the log file always
/// records `debug` and above for this workspace.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("gymtrack_core=debug,gymtrack=debug"));
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_filter(filter))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let (config, config_error) = match Config::load() {
        Ok(c) => (c, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let _log_guard = init_tracing(&config);
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, commands::USAGE);
            std::process::exit(2);
        }
    };

    let api = ApiClient::new(config.api_url())?;
    let store = config.credential_store()?;
    let manager = SessionManager::new(api, store, config.session_options());

    info!(api_url = config.api_url(), "gymtrack starting");
    manager.restore().await;

    let result = commands::run(command, &manager, config).await;
    manager.shutdown();
    result
}
