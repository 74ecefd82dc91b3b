//! Results storage and retrieval
//!
//! Every run is written twice: as a timestamped `StoredRun` kept for
//! history, and as `last_run_result.json`, which `run --failed` reads back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{RunConfig, Strategy};
use crate::models::SuiteResult;

/// File holding the most recent suite result
pub const LAST_RUN_FILE: &str = "last_run_result.json";

const RUNS_DIR: &str = "runs";

/// One stored run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique run ID
    pub id: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Scheduling used for the run
    pub settings: RunSettings,

    pub result: SuiteResult,

    pub environment: EnvironmentInfo,
}

/// Scheduling settings recorded with a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSettings {
    pub parallel: bool,
    pub streams: usize,
    pub strategy: Strategy,
    pub table_rows: Option<String>,
    pub tags: Option<String>,
}

impl From<&RunConfig> for RunSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            parallel: config.parallel,
            streams: config.streams,
            strategy: config.strategy,
            table_rows: config.table_rows.as_ref().map(|f| f.as_str().to_string()),
            tags: config.tags.as_ref().map(|t| t.to_string()),
        }
    }
}

/// Environment information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,

    pub arch: String,

    /// Runner command line, if a process runner was used
    pub runner: Option<String>,

    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            runner: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl StoredRun {
    /// Wrap a finished suite result; the start time comes from the suite
    pub fn new(result: SuiteResult, config: &RunConfig) -> Self {
        Self {
            id: generate_run_id(),
            started_at: result.timestamp,
            completed_at: Utc::now(),
            settings: RunSettings::from(config),
            result,
            environment: EnvironmentInfo::default(),
        }
    }

    pub fn with_runner(mut self, command: impl Into<String>) -> Self {
        self.environment.runner = Some(command.into());
        self
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Results storage manager
pub struct ResultsStorage {
    base_dir: PathBuf,
}

impl ResultsStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Storage under the user data directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepwise")
            .join("results");
        Self::new(base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(self.runs_dir())
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;
        Ok(())
    }

    fn runs_dir(&self) -> PathBuf {
        self.base_dir.join(RUNS_DIR)
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.base_dir.join(LAST_RUN_FILE)
    }

    /// Save a run and replace the last-run result
    pub fn save(&self, run: &StoredRun) -> Result<PathBuf> {
        self.ensure_dir()?;

        let path = self.run_path(&run.id);
        write_json(&path, run)?;
        write_json(&self.last_run_path(), &run.result)?;

        info!("Saved run {} to {}", run.id, path.display());
        Ok(path)
    }

    pub fn load(&self, run_id: &str) -> Result<StoredRun> {
        let run = read_json(&self.run_path(run_id))?;
        debug!("Loaded run {}", run_id);
        Ok(run)
    }

    /// Suite result of the most recent run, if any was saved
    pub fn last_result(&self) -> Result<Option<SuiteResult>> {
        let path = self.last_run_path();
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Stored runs, newest first
    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        let runs_dir = self.runs_dir();
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&runs_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match read_json::<StoredRun>(&path) {
                    Ok(run) => runs.push(RunInfo::from(&run)),
                    Err(e) => debug!("Failed to load {}: {}", path.display(), e),
                }
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    pub fn latest(&self) -> Result<Option<StoredRun>> {
        match self.list_runs()?.first() {
            Some(info) => self.load(&info.id).map(Some),
            None => Ok(None),
        }
    }

    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted results: {}", path.display());
        }
        Ok(())
    }

    /// Write a suite result in the requested format
    pub fn export(&self, result: &SuiteResult, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => write_json(path, result)?,
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                writer.write_record([
                    "spec",
                    "scenario",
                    "line",
                    "spec_row",
                    "scenario_row",
                    "status",
                    "retries",
                    "execution_time_ms",
                ])?;

                for spec in &result.spec_results {
                    for scenario in &spec.scenarios {
                        writer.write_record([
                            spec.file_name.clone(),
                            scenario.heading.clone(),
                            scenario.line_no.to_string(),
                            row_label(scenario.spec_row),
                            row_label(scenario.scenario_row),
                            scenario.status.to_string(),
                            scenario.retries_count.to_string(),
                            scenario.execution_time.to_string(),
                        ])?;
                    }
                }
                writer.flush()?;
            }
        }

        info!("Exported results to {}", path.display());
        Ok(())
    }
}

fn row_label(row: Option<usize>) -> String {
    row.map(|r| (r + 1).to_string()).unwrap_or_default()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create results file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).context("Failed to write results")
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open results file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file)).context("Failed to parse results")
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub specs: usize,
    pub failed: bool,
    pub success_rate: f64,
}

impl From<&StoredRun> for RunInfo {
    fn from(run: &StoredRun) -> Self {
        Self {
            id: run.id.clone(),
            started_at: run.started_at,
            specs: run.result.specs_count(),
            failed: run.result.failed,
            success_rate: run.result.success_rate(),
        }
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}
