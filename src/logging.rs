//! Structured logging: console plus a daily-rotated file, correlated by run id.
//!
//! Environment:
//! - `LOG_FORMAT=pretty|json` (default pretty)
//! - `LOG_DIR` (default `./logs`)
//! - `RUN_ID=<uuid>` (default: fresh v4)
//! - `RUST_LOG` (default [`DEFAULT_FILTER`])

use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub const DEFAULT_FILTER: &str = "info,parity_streak_bot=info,hyper=warn,reqwest=warn";

const LOG_FILE_PREFIX: &str = "parity_bot.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub log_dir: String,
    pub run_id: Uuid,
    pub filter: String,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            format: LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default()),
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string()),
            run_id: run_id(),
            filter: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
        }
    }
}

/// `RUN_ID` if set to a valid UUID, otherwise a new one.
pub fn run_id() -> Uuid {
    std::env::var("RUN_ID")
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

/// Install the global subscriber. Keep the returned guard alive for the whole
/// process so buffered file lines are flushed on exit.
pub fn init_logging(config: &LogConfig) -> WorkerGuard {
    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("Failed to create log directory {}: {}", config.log_dir, e);
    }
    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = || {
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match config.format {
        LogFormat::Pretty => {
            let console = fmt::layer()
                .with_writer(io::stdout)
                .with_target(false)
                .with_ansi(true)
                .pretty()
                .with_filter(filter());
            let file = fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_line_number(true)
                .with_ansi(false)
                .compact()
                .with_filter(filter());
            tracing_subscriber::registry().with(console).with(file).init();
        }
        LogFormat::Json => {
            let console = fmt::layer()
                .with_writer(io::stdout)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_filter(filter());
            let file = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_filter(filter());
            tracing_subscriber::registry().with(console).with(file).init();
        }
    }

    tracing::info!(
        run_id = %config.run_id,
        log_format = ?config.format,
        log_dir = %config.log_dir,
        filter = %config.filter,
        "Logging initialized"
    );
    guard
}
