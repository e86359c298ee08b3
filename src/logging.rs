//! `tracing` subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise `[logging].level` is used. Logs go
//! to stderr so command output on stdout stays machine-readable.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level)));

        let layer = if config.json {
            fmt::layer().json().with_writer(std::io::stderr).boxed()
        } else {
            fmt::layer().with_writer(std::io::stderr).boxed()
        };

        let _ = tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init();
    });
}

/// A bare level applies to this workspace's crates only; anything else is
/// taken as a full filter directive.
fn filter_directive(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => {
            format!("fraud_assist={l},fraud_assist_core={l},fraudctl={l},tower_http={l}")
        }
        _ => level.to_string(),
    }
}
