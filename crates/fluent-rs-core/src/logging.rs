//! Logging integration for fluent-rs.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating the spans the
//! migration runner attaches to every run and every step.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level`. In debug mode a pretty,
/// human-readable format is used; otherwise a structured JSON format is used.
/// Calling this more than once is harmless: later calls are ignored.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a span covering one runner invocation against one database.
///
/// # Examples
///
/// ```
/// use fluent_rs_core::logging::run_span;
///
/// let span = run_span("forward", "default");
/// let _guard = span.enter();
/// tracing::info!("starting run");
/// ```
pub fn run_span(mode: &str, database: &str) -> tracing::Span {
    tracing::info_span!("migration_run", mode, database)
}

/// Creates a span for a single migration step.
///
/// Every event emitted while the step's `prepare` or `revert` runs carries
/// the database, migration name, and batch.
pub fn migration_span(database: &str, name: &str, batch: i64) -> tracing::Span {
    tracing::info_span!("migration", database, name, batch)
}
