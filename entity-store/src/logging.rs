//! Logging setup for applications embedding entity-store
//!
//! The stores log every state transition at `debug` and cache-timer activity
//! at `trace`. Nothing is printed unless the host installs a subscriber, which
//! these helpers do for the common cases.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Filter used by [`LoggingMode::Development`] when no override is set
const DEVELOPMENT_FILTER: &str = "warn,entity_store=info,entity_map=info";

/// Filter used by [`LoggingMode::Debug`] and [`LoggingMode::Json`]
const TRANSITION_FILTER: &str = "warn,entity_store=debug,entity_map=debug";

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output; use when the host renders to the terminal itself
    Silent,
    /// Compact stderr lines, store logs at `info`
    Development,
    /// Every transition, pretty-printed with source locations
    Debug,
    /// Every transition as one JSON object per line
    Json,
}

impl LoggingMode {
    fn default_filter(self) -> &'static str {
        match self {
            LoggingMode::Silent => "off",
            LoggingMode::Development => DEVELOPMENT_FILTER,
            LoggingMode::Debug | LoggingMode::Json => TRANSITION_FILTER,
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid filter directives '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },
}

/// Install a global subscriber for `mode`
///
/// `ENTITY_STORE_LOG_LEVEL` (or else `RUST_LOG`) replaces the mode's default
/// filter, e.g. `entity_store=trace` to see cache-timer activity.
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    if mode == LoggingMode::Silent {
        return Ok(());
    }
    let filter = env_filter(mode.default_filter())?;

    let layer = match mode {
        LoggingMode::Development => fmt::layer()
            .compact()
            .with_target(false)
            .boxed(),
        LoggingMode::Debug => fmt::layer()
            .pretty()
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LoggingMode::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .flatten_event(true)
            .boxed(),
        LoggingMode::Silent => return Ok(()),
    };

    Registry::default()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Install a subscriber chosen by `ENTITY_STORE_LOG_MODE`
///
/// Accepts `development`, `debug` or `json`; anything else is silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("ENTITY_STORE_LOG_MODE").as_deref() {
        Ok("development") => LoggingMode::Development,
        Ok("debug") => LoggingMode::Debug,
        Ok("json") => LoggingMode::Json,
        _ => LoggingMode::Silent,
    };
    init_logging(mode)
}

fn env_filter(default_directives: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var("ENTITY_STORE_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_directives.to_string());

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
        reason: e.to_string(),
        directives,
    })
}

/// Whether a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

/// Equivalent to `init_logging(LoggingMode::Silent)`
pub fn init_silent() -> Result<(), LoggingError> {
    init_logging(LoggingMode::Silent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode_installs_nothing() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
        assert!(init_silent().is_ok());
    }

    #[test]
    fn test_default_filters_parse() {
        for mode in [LoggingMode::Development, LoggingMode::Debug, LoggingMode::Json] {
            assert!(EnvFilter::try_new(mode.default_filter()).is_ok(), "{mode:?}");
        }
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        let err = EnvFilter::try_new("entity_store=notalevel").map_err(|e| LoggingError::InvalidFilter {
            reason: e.to_string(),
            directives: "entity_store=notalevel".into(),
        });
        assert!(err.unwrap_err().to_string().contains("entity_store=notalevel"));
    }
}
