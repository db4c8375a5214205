//! Logging initialization and configuration.
//!
//! - **Production**: JSON logs to rolling files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events

use std::path::PathBuf;
use std::sync::OnceLock;

use lumen_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Overrides the configured level when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "LUMEN_LOG_LEVEL";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the global subscriber.
///
/// The filter comes from `RUST_LOG`, then `LUMEN_LOG_LEVEL`, then
/// `config.level`.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_level(config)))?;

    if config.production {
        init_production(env_filter);
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn fallback_level(config: &LoggingConfig) -> String {
    std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| config.level.clone())
}

fn init_production(env_filter: EnvFilter) {
    let log_dir = log_directory();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("cannot create log directory {}: {e}", log_dir.display());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "lumen");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // No ANSI colors for journald
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/lumen")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "lumen")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
