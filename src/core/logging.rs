//! Tracing setup for the `taskhive` binary.
//!
//! Library code only emits events; the subscriber is installed once by the CLI.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const LOG_ENV: &str = "TASKHIVE_LOG";
const DEFAULT_LOG_FILTER: &str = "taskhive=info";
const VERBOSE_LOG_FILTER: &str = "taskhive=debug";

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    pub verbose: bool,
}

fn filter_for(config: LogConfig) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(spec) if !spec.trim().is_empty() => {
            EnvFilter::try_new(spec).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
        }
        _ if config.verbose => EnvFilter::new(VERBOSE_LOG_FILTER),
        _ => EnvFilter::new(DEFAULT_LOG_FILTER),
    }
}

/// Installs a stderr subscriber. Stdout stays reserved for command output.
/// Calling it twice is harmless.
pub fn init_logging(config: LogConfig) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter_for(config))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init_logging(LogConfig::default());
        init_logging(LogConfig { verbose: true });
        tracing::info!("logging initialized");
    }
}
