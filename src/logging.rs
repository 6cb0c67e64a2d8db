//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and to a JSON
//! log file per process. Log records carry task ids, de-identified file names and
//! sizes; PHI values are never logged.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Returns the log file path when file output is active. Safe to call repeatedly;
/// only the first call installs the subscriber.
pub fn init_structured_logging(config: &LoggingConfig) -> Option<PathBuf> {
    LOGGER_INITIALIZED
        .get_or_init(|| {
            let environment = get_environment();
            let log_level = config
                .level
                .clone()
                .unwrap_or_else(|| get_log_level(&environment).to_string());

            let console = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(log_level.clone()));

            let log_dir = &config.directory;
            let file_ready = config.file_output && fs::create_dir_all(log_dir).is_ok();

            if !file_ready {
                if tracing_subscriber::registry().with(console).try_init().is_err() {
                    tracing::debug!("Global tracing subscriber already initialized");
                }
                tracing::info!(
                    environment = %environment,
                    "🔧 STRUCTURED LOGGING: Initialized with console output only"
                );
                return None;
            }

            // One file per process: <env>.<pid>.<timestamp>.log
            let pid = process::id();
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            let log_filename = format!("{environment}.{pid}.{timestamp}.log");
            let log_path = log_dir.join(&log_filename);

            let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

            let subscriber = tracing_subscriber::registry().with(console).with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level)),
            );

            // A subscriber installed by the host application wins
            if subscriber.try_init().is_err() {
                tracing::debug!("Global tracing subscriber already initialized");
                return None;
            }

            tracing::info!(
                pid = pid,
                environment = %environment,
                log_file = %log_path.display(),
                "🔧 STRUCTURED LOGGING: Initialized with file output"
            );

            // Keep the writer alive for the life of the process
            std::mem::forget(guard);
            Some(log_path)
        })
        .clone()
}

fn get_environment() -> String {
    std::env::var("RECON_TRANSFER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for task lifecycle operations
pub fn log_task_operation(
    operation: &str,
    task_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = task_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log structured data for file transfers
pub fn log_transfer_operation(
    operation: &str,
    task_id: Option<&str>,
    bytes: Option<u64>,
    duration_ms: Option<u64>,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        task_id = task_id,
        bytes = bytes,
        duration_ms = duration_ms,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🚚 TRANSFER_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
