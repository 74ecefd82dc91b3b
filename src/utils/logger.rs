//! Logging setup
//!
//! Console logging through `tracing-subscriber`, filtered to this crate.

#![allow(dead_code)]

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Verbosity selected with `--log-level` or `--verbose`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Level from CLI flags; `--verbose` wins over an unset level
    pub fn from_flags(level: Option<&str>, verbose: bool) -> Self {
        match level.and_then(Self::from_str) {
            Some(level) => level,
            None if verbose => LogLevel::Debug,
            None => LogLevel::Info,
        }
    }

    fn directive(self) -> String {
        format!("stepwise={}", self.to_tracing_level())
    }
}

/// Install the global subscriber; `RUST_LOG` directives are added on top
pub fn init_logger(level: LogLevel) {
    let mut filter = EnvFilter::new(level.directive());
    if let Ok(extra) = std::env::var("RUST_LOG") {
        for directive in extra.split(',').filter_map(|d| d.parse().ok()) {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
