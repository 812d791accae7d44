use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::Span;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::model::{ContextId, StreamId};

static INIT: OnceCell<()> = OnceCell::new();

/// Filter used when neither `SCRIBE_LOG_LEVEL` nor `RUST_LOG` is set. The
/// HTTP and sqlite stacks log per request, so they stay at `warn`.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn,rusqlite=warn";

const DEFAULT_LOG_FILE: &str = "scribe.logs.jsonl";

/// Span wrapping one driven generation. Every event logged by the driver,
/// writer and store while the generation runs carries both ids.
pub fn stream_span(stream_id: StreamId, context_id: &ContextId) -> Span {
    tracing::info_span!("stream", stream_id = %stream_id, context_id = %context_id)
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled() -> bool {
    std::env::var("SCRIBE_OBSERVABILITY_ENABLED")
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(true)
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("SCRIBE_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

/// Splits a configured log path into the directory and file name the
/// appender expects.
fn log_file_target(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_owned();
    (dir, file_name)
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `SCRIBE_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `SCRIBE_LOG_LEVEL`: optional level/filter override (`info`, `scribe_core=debug`, etc.).
/// - `SCRIBE_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file,
///   with the enclosing `stream` span attached to each line.
///   If unset, logs go to stdout in a compact console format.
/// - `RUST_LOG`: fallback filter; [`DEFAULT_FILTER`] applies when neither is set.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("SCRIBE_JSON_LOG_PATH") {
            let (dir, file_name) = log_file_target(Path::new(&path_raw));
            let _ = std::fs::create_dir_all(&dir);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_writer(std::io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
