//! Logging setup.
//!
//! All log output goes to stderr so interactive shells and `dd` progress keep
//! stdout. The filter comes from `SDMAKER_LOG`, then `RUST_LOG`, then the
//! verbosity passed by the CLI. `SDMAKER_LOG_FORMAT=json` (or `--log-format
//! json`) switches to structured JSON lines.

use std::io;
use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the global subscriber. Later calls are no-ops.
pub fn init(format: Option<&str>, verbose: bool) {
    INIT.call_once(|| {
        let filter = create_env_filter(if verbose { "debug" } else { "info" });

        let env_format = std::env::var("SDMAKER_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        let result = match effective_format {
            "json" => tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true).with_writer(io::stderr))
                .with(filter)
                .try_init(),
            _ => tracing_subscriber::registry()
                .with(fmt::layer().with_target(false).with_writer(io::stderr))
                .with(filter)
                .try_init(),
        };
        if result.is_ok() {
            tracing::debug!("Logging initialized with format: {}", effective_format);
        }
    });
}

pub fn is_initialized() -> bool {
    INIT.is_completed()
}

fn create_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(spec) = std::env::var("SDMAKER_LOG") {
        return EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new(default_level));
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init(None, false);
        init(Some("json"), true);
        assert!(is_initialized());
    }
}
