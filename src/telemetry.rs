//! Tracing subscriber setup shared by the server and the CLI.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Build the filter: `RUST_LOG` wins over the configured default level.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean. Calling this twice is a no-op.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = env_filter(default_level);
    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_does_not_panic() {
        init_tracing("debug", LogFormat::Pretty);
        init_tracing("debug", LogFormat::Json);
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let filter = env_filter("not a [valid directive");
        assert!(!filter.to_string().is_empty());
    }
}
