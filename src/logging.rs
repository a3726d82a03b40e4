//! # Structured Logging
//!
//! Environment-aware tracing initialization. Production emits JSON lines for
//! the log shipper; development and test get human-readable console output.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging for the current environment.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = detect_environment();
        let default_level = default_log_level(&environment);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.clone()));

        let registry = tracing_subscriber::registry();

        let init_result = if environment == "production" {
            registry
                .with(filter)
                .with(fmt::layer().json().with_target(true).with_current_span(true))
                .try_init()
        } else {
            registry
                .with(filter)
                .with(fmt::layer().with_target(true).with_ansi(true))
                .try_init()
        };

        if init_result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            level = %default_level,
            "Structured logging initialized"
        );
    });
}

/// Current runtime environment from PROPCAST_ENV, defaulting to development
pub fn detect_environment() -> String {
    std::env::var("PROPCAST_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}
