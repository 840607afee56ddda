//! Logging bootstrap: `tracing` events rendered by `tracing-subscriber`.
//!
//! Text or JSON output on stderr, level filter from `--log-filter` or
//! `RUST_LOG`, falling back to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Explicit filter directive (`"info,tranched_presale=debug"`). `None` reads `RUST_LOG`.
    pub env_filter: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("bad log filter {directive:?}: {source}")]
    Filter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("global subscriber already set: {0}")]
    AlreadySet(#[from] tracing_subscriber::util::TryInitError),
}

fn build_filter(cfg: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    match &cfg.env_filter {
        Some(directive) => {
            EnvFilter::try_new(directive).map_err(|source| TelemetryError::Filter {
                directive: directive.clone(),
                source,
            })
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Installs the global subscriber. Call once, at process start.
pub fn init_logging(cfg: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(cfg)?;

    let fmt_layer = {
        let base = fmt::layer().with_writer(std::io::stderr).with_target(true);
        if cfg.json {
            base.json().with_ansi(false).flatten_event(true).boxed()
        } else {
            base.boxed()
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
