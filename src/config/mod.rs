//! Configuration module
//!
//! File configuration, environment overrides and the frozen `RunConfig`
//! handed to the scheduler.

#![allow(dead_code)]

mod env;
mod file;
mod run;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use env::{print_env_help, EnvBuilder, EnvConfig};
pub use file::ConfigFile;
pub(crate) use file::is_yaml_file;
pub use run::{RunConfig, Strategy, TableRowFilter, TableRowsError, TagFilter};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name recorded on suite results
    pub project_name: String,

    /// Command line starting a runner process
    pub runner_command: Option<String>,

    /// Working directory for runner processes
    pub runner_dir: Option<PathBuf>,

    /// Run in parallel streams by default
    pub parallel: bool,

    /// Streams used when running in parallel
    pub streams: usize,

    pub strategy: Strategy,

    /// Share one runner across streams if it supports it
    pub multithreading: bool,

    /// Attempts per scenario instance
    pub max_retries: u32,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    pub kill_timeout_secs: u64,

    /// Where runs are stored; defaults to the user data directory
    pub results_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_name: "stepwise".to_string(),
            runner_command: None,
            runner_dir: None,
            parallel: false,
            streams: default_streams(),
            strategy: Strategy::Eager,
            multithreading: false,
            max_retries: 1,
            connect_timeout_secs: 30,
            request_timeout_secs: 300,
            kill_timeout_secs: 5,
            results_dir: None,
        }
    }
}

fn default_streams() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl AppConfig {
    /// Apply environment overrides on top of file values
    pub fn apply_env(&mut self, env: &EnvConfig) -> Result<()> {
        if let Some(streams) = env.streams {
            self.streams = streams;
        }
        if let Some(strategy) = &env.strategy {
            self.strategy = strategy
                .parse()
                .map_err(|e| anyhow!("Invalid STEPWISE_STRATEGY: {e}"))?;
        }
        if let Some(parallel) = env.parallel {
            self.parallel = parallel;
        }
        if let Some(multithreading) = env.multithreading {
            self.multithreading = multithreading;
        }
        if let Some(command) = &env.runner {
            self.runner_command = Some(command.clone());
        }
        if let Some(dir) = &env.results_dir {
            self.results_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Settings for a run; CLI flags are applied on the result
    pub fn to_run_config(&self) -> RunConfig {
        let mut config = RunConfig::new()
            .with_project_name(&self.project_name)
            .with_strategy(self.strategy)
            .with_multithreading(self.multithreading)
            .with_max_retries(self.max_retries);
        if self.parallel {
            config = config.with_parallel(self.streams);
        }
        config.kill_timeout = self.kill_timeout();
        config
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.max_retries, 1);
        assert!(config.streams >= 1);
        assert_eq!(config.kill_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = AppConfig::default();
        let env = EnvConfig {
            streams: Some(6),
            strategy: Some("lazy".to_string()),
            parallel: Some(true),
            ..Default::default()
        };

        config.apply_env(&env).unwrap();
        let run = config.to_run_config();

        assert!(run.parallel);
        assert_eq!(run.streams, 6);
        assert_eq!(run.strategy, Strategy::Lazy);
    }

    #[test]
    fn test_bad_env_strategy_rejected() {
        let env = EnvConfig {
            strategy: Some("sideways".to_string()),
            ..Default::default()
        };
        assert!(AppConfig::default().apply_env(&env).is_err());
    }

    #[test]
    fn test_serial_run_config_keeps_one_stream() {
        let config = AppConfig {
            streams: 4,
            ..Default::default()
        };
        let run = config.to_run_config();
        assert!(!run.parallel);
        assert_eq!(run.streams, 1);
    }
}
