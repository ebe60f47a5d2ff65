//! Logging integration for cms-rs.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating per-query spans.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The log level is read from `settings.log_level` (e.g. "debug", "info", "warn",
/// "error", or a full `EnvFilter` directive such as `cms_rs_db=trace`). In debug
/// mode a pretty, human-readable format is used; otherwise a structured JSON
/// format is used.
///
/// Installing a subscriber twice is a no-op.
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

/// Creates a tracing span for one engine query.
///
/// All SQL and populate fan-out logged while the span is entered carries the
/// model uid and the operation name.
///
/// # Examples
///
/// ```
/// use cms_rs_core::logging::query_span;
///
/// let span = query_span("api::product.product", "find");
/// let _guard = span.enter();
/// tracing::info!("running query");
/// ```
pub fn query_span(uid: &str, operation: &'static str) -> tracing::Span {
    tracing::debug_span!("query", uid = uid, op = operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_twice_does_not_panic() {
        let settings = Settings::default();
        setup_logging(&settings);
        setup_logging(&settings);
    }

    #[test]
    fn test_query_span_enter() {
        let span = query_span("api::shop.shop", "count");
        let _guard = span.enter();
        tracing::debug!("inside span");
    }
}
