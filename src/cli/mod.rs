//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Specification execution orchestrator
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(version)]
#[command(about = "Run specifications against step runners, serially or in parallel streams")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute specifications
    Run(RunArgs),

    /// View stored run results
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite documents or directories holding them
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Run in parallel streams
    #[arg(short, long)]
    pub parallel: bool,

    /// Number of streams (when parallel)
    #[arg(short = 'n', long)]
    pub streams: Option<usize>,

    /// Scheduling strategy (eager, lazy)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Share one runner across streams if it supports it
    #[arg(long)]
    pub multithreading: bool,

    /// Data table rows to run, e.g. "1,3-5"
    #[arg(long)]
    pub table_rows: Option<String>,

    /// Tag expression, e.g. "smoke,!slow"
    #[arg(short, long)]
    pub tags: Option<String>,

    /// Only rerun what failed in the last run
    #[arg(long)]
    pub failed: bool,

    /// Run against a scripted runner that passes every step
    #[arg(long)]
    pub dry_run: bool,

    /// Command line starting a runner process
    #[arg(short, long)]
    pub runner: Option<String>,

    /// Attempts per scenario
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Results directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Do not store this run
    #[arg(long)]
    pub no_save: bool,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// List stored runs
    #[arg(short, long)]
    pub list: bool,

    /// Show a specific run instead of the last one
    #[arg(long)]
    pub run: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Export to file (.json or .csv)
    #[arg(short, long)]
    pub export: Option<PathBuf>,

    /// Results directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "stepwise.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Include environment overrides
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate; defaults to the first standard location
        file: Option<PathBuf>,
    },

    /// List supported environment variables
    Env,
}
