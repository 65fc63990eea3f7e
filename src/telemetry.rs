//! Tracing subscriber setup.
//!
//! Everything in the crate logs through `tracing`; nothing is printed until
//! an application installs a subscriber, normally with [`init`] at the top
//! of `main`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer as _};

const DEFAULT_FILTER: &str = "info,vitrine=debug";

/// Log line format, chosen with `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// `"json"` or `"pretty"`; anything else falls back to pretty with a
    /// warning on stderr, since no subscriber exists yet to log it.
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            other => {
                eprintln!("WARNING: unknown LOG_FORMAT={other:?}, falling back to pretty");
                Self::Pretty
            }
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT").map_or_else(|_| Self::default(), |v| Self::parse(&v))
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub log_format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl TracingConfig {
    pub fn new(log_format: LogFormat) -> Self {
        Self { log_format, default_filter: DEFAULT_FILTER.to_owned() }
    }

    pub fn from_env() -> Self {
        Self::new(LogFormat::from_env())
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(LogFormat::default())
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Returns `false` if a subscriber was already installed, which is common
/// in tests; the existing one is left in place.
pub fn init(config: TracingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("pretty", LogFormat::Pretty)]
    #[case("JSON", LogFormat::Pretty)]
    #[case("", LogFormat::Pretty)]
    fn parse_falls_back_to_pretty(#[case] input: &str, #[case] expected: LogFormat) {
        assert_eq!(LogFormat::parse(input), expected);
    }

    #[test]
    fn default_config_filters_crate_at_debug() {
        let config = TracingConfig::default();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.default_filter, "info,vitrine=debug");
    }

    #[test]
    fn second_init_is_refused_not_fatal() {
        let _ = init(TracingConfig::default());
        assert!(!init(TracingConfig::new(LogFormat::Json)));
    }
}
