//! Environment variable configuration
//!
//! `STEPWISE_*` variables override config file values; CLI flags override
//! both.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "STEPWISE";

/// Overrides read from the environment
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// STEPWISE_STREAMS
    pub streams: Option<usize>,
    /// STEPWISE_STRATEGY
    pub strategy: Option<String>,
    /// STEPWISE_PARALLEL
    pub parallel: Option<bool>,
    /// STEPWISE_MULTITHREADING
    pub multithreading: Option<bool>,
    /// STEPWISE_TABLE_ROWS
    pub table_rows: Option<String>,
    /// STEPWISE_TAGS
    pub tags: Option<String>,
    /// STEPWISE_RUNNER
    pub runner: Option<String>,
    /// STEPWISE_CONFIG
    pub config_file: Option<String>,
    /// STEPWISE_RESULTS_DIR
    pub results_dir: Option<String>,
    /// STEPWISE_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    pub fn load() -> Self {
        Self {
            streams: get_env_parse("STREAMS"),
            strategy: get_env("STRATEGY"),
            parallel: get_env_bool("PARALLEL"),
            multithreading: get_env_bool("MULTITHREADING"),
            table_rows: get_env("TABLE_ROWS"),
            tags: get_env("TAGS"),
            runner: get_env("RUNNER"),
            config_file: get_env("CONFIG"),
            results_dir: get_env("RESULTS_DIR"),
            verbose: get_env_bool("VERBOSE"),
        }
    }

    pub fn has_any(&self) -> bool {
        self.streams.is_some()
            || self.strategy.is_some()
            || self.parallel.is_some()
            || self.multithreading.is_some()
            || self.table_rows.is_some()
            || self.tags.is_some()
            || self.runner.is_some()
            || self.config_file.is_some()
            || self.results_dir.is_some()
            || self.verbose.is_some()
    }

    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_STREAMS:        {:?}", self.streams);
        println!("  {ENV_PREFIX}_STRATEGY:       {:?}", self.strategy);
        println!("  {ENV_PREFIX}_PARALLEL:       {:?}", self.parallel);
        println!("  {ENV_PREFIX}_MULTITHREADING: {:?}", self.multithreading);
        println!("  {ENV_PREFIX}_TABLE_ROWS:     {:?}", self.table_rows);
        println!("  {ENV_PREFIX}_TAGS:           {:?}", self.tags);
        println!("  {ENV_PREFIX}_RUNNER:         {:?}", self.runner);
        println!("  {ENV_PREFIX}_CONFIG:         {:?}", self.config_file);
        println!("  {ENV_PREFIX}_RESULTS_DIR:    {:?}", self.results_dir);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Sets `STEPWISE_*` variables, mostly for tests
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn streams(self, streams: usize) -> Self {
        self.var("STREAMS", streams.to_string())
    }

    pub fn strategy(self, strategy: impl Into<String>) -> Self {
        self.var("STRATEGY", strategy)
    }

    pub fn parallel(self, parallel: bool) -> Self {
        self.var("PARALLEL", parallel.to_string())
    }

    pub fn table_rows(self, rows: impl Into<String>) -> Self {
        self.var("TABLE_ROWS", rows)
    }

    pub fn results_dir(self, dir: impl Into<String>) -> Self {
        self.var("RESULTS_DIR", dir)
    }

    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all STEPWISE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_STREAMS         Streams used for parallel runs");
    println!("  {ENV_PREFIX}_STRATEGY        Parallel scheduling: eager or lazy");
    println!("  {ENV_PREFIX}_PARALLEL        Run in parallel (true/false)");
    println!("  {ENV_PREFIX}_MULTITHREADING  Share a multithreaded runner (true/false)");
    println!("  {ENV_PREFIX}_TABLE_ROWS      Data table rows to run, e.g. 1,3-5");
    println!("  {ENV_PREFIX}_TAGS            Tag expression, e.g. smoke,!slow");
    println!("  {ENV_PREFIX}_RUNNER          Runner command line");
    println!("  {ENV_PREFIX}_CONFIG          Path to configuration file");
    println!("  {ENV_PREFIX}_RESULTS_DIR     Directory for stored runs");
    println!("  {ENV_PREFIX}_VERBOSE         Enable verbose output (true/false)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_STREAMS=4");
    println!("  export {ENV_PREFIX}_RUNNER='python runner.py'");
    println!("  stepwise run specs/ --parallel");
}
