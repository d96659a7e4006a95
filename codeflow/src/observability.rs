//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want
//! to see them install a subscriber here; the filter comes from `RUST_LOG`
//! and falls back to `codeflow=info`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "codeflow=info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a global subscriber.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is kept.
pub fn init_tracing(format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(true);
    let installed = match format {
        LogFormat::Plain => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().with_current_span(true).try_init().is_ok(),
    };
    if installed {
        tracing::debug!(?format, "Tracing initialized");
    }
    installed
}

/// Installs a test-friendly subscriber that writes through the test harness.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        init_test_tracing();
        assert!(!init_tracing(LogFormat::Plain));
        assert!(!init_tracing(LogFormat::Json));
    }

    #[test]
    fn test_log_format_serde() {
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
        assert_eq!(
            serde_json::from_str::<LogFormat>("\"plain\"").unwrap(),
            LogFormat::Plain
        );
    }
}
