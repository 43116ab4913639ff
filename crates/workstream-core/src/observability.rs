//! Observability infrastructure for the workstream runtime.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors so that every service loop
//! reports the same fields.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: controls log levels (e.g. `info`, `workstream_flow=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for a stream consumer loop with standard fields.
#[must_use]
pub fn consumer_span(stream: &str, group: &str, consumer: &str) -> Span {
    tracing::info_span!(
        "consumer",
        stream = stream,
        group = group,
        consumer = consumer,
    )
}

/// Creates a span for a workflow operation scoped to a project.
#[must_use]
pub fn workflow_span(operation: &str, project_id: &str) -> Span {
    tracing::info_span!("workflow", op = operation, project_id = project_id)
}
