//! Logging setup.
//!
//! Logs go to stderr because stdout carries click actions. `SAFTBAR_LOG`
//! takes a full `EnvFilter` directive; otherwise `DEBUG_LOGGING=1` enables
//! debug output for this crate.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const FILTER_ENV: &str = "SAFTBAR_LOG";

fn filter_directive(debug_logging: bool) -> &'static str {
    if debug_logging { "info,saftbar=debug" } else { "info" }
}

pub fn init() {
    let debug_logging = std::env::var("DEBUG_LOGGING").is_ok();

    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(debug_logging)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::NONE);

    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(filter)
        .try_init();

    tracing::debug!(debug_logging, "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(false), "info");
        assert_eq!(filter_directive(true), "info,saftbar=debug");
    }
}
