//! stepwise - Specification Execution Orchestrator
//!
//! Drives specifications through an external step runner. Specs are
//! resolved against concept definitions and data tables, scheduled over
//! one or more streams, and their partial results are merged into a single
//! suite result.
//!
//! ## Features
//!
//! - Serial execution, or parallel streams with eager or lazy scheduling
//! - Runner processes per stream, or one shared multithreaded runner
//! - Data-table expansion with row filtering
//! - Concept expansion with nested parameter resolution
//! - Stored runs, rerun of failed scenarios, JSON and CSV export
//!
//! ## Usage
//!
//! ```bash
//! # Run a suite serially
//! stepwise run specs/ --runner "python runner.py"
//!
//! # Run across 4 streams, pulling work lazily
//! stepwise run specs/ --parallel -n 4 --strategy lazy
//!
//! # Rerun what failed last time
//! stepwise run specs/ --failed
//!
//! # Show the last run
//! stepwise results
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod cli;
mod config;
mod document;
mod events;
mod executor;
mod models;
mod resolve;
mod results;
mod runner;
mod utils;
mod validation;

use cli::Args;
use config::{AppConfig, ConfigFile, EnvConfig, RunConfig, Strategy, TableRowFilter, TagFilter};
use document::LoadedSuite;
use events::{spawn_log_reporter, EventBus};
use executor::{
    expand_data_table_specs, filter_by_tags, ExecutionContext, ParallelExecution, SimpleExecution,
};
use models::SuiteResult;
use resolve::SpecialResolver;
use results::{restrict_to_failed, ExportFormat, ResultsStorage, StoredRun};
use runner::{ProcessRunnerFactory, RunnerFactory, ScriptedRunnerFactory};
use utils::{init_logger, LogLevel};
use validation::{populate_build_errors, StaticValidator};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::from_flags(
        args.log_level.as_deref(),
        args.verbose || env.verbose.unwrap_or(false),
    ));

    let config_path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    match args.command {
        cli::Command::Run(run_args) => {
            let app = load_app_config(config_path, &env)?;
            let suite = run_specs(run_args, app, &env).await?;
            if suite.failed {
                std::process::exit(1);
            }
        }
        cli::Command::Results(results_args) => {
            let app = load_app_config(config_path, &env)?;
            show_results(results_args, &app)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, config_path, &env)?;
        }
    }

    Ok(())
}

/// File configuration with environment overrides applied
fn load_app_config(path: Option<PathBuf>, env: &EnvConfig) -> Result<AppConfig> {
    let file = ConfigFile::load_or_default(path.as_deref())?;
    let mut app = file.app;
    app.apply_env(env)?;
    Ok(app)
}

/// CLI flags on top of file and environment settings
fn build_run_config(args: &cli::RunArgs, app: &AppConfig, env: &EnvConfig) -> Result<RunConfig> {
    let mut config = app.to_run_config();

    if args.parallel || args.streams.is_some() {
        config = config.with_parallel(args.streams.unwrap_or(app.streams));
    }
    if let Some(strategy) = &args.strategy {
        let strategy: Strategy = strategy.parse().map_err(|e| anyhow!("Invalid --strategy: {e}"))?;
        config = config.with_strategy(strategy);
    }
    if args.multithreading {
        config = config.with_multithreading(true);
    }
    if let Some(retries) = args.max_retries {
        config = config.with_max_retries(retries);
    }
    if let Some(rows) = args.table_rows.as_ref().or(env.table_rows.as_ref()) {
        let filter = TableRowFilter::parse(rows).context("Invalid table rows")?;
        config = config.with_table_rows(filter);
    }
    if let Some(tags) = args.tags.as_ref().or(env.tags.as_ref()) {
        config = config.with_tags(TagFilter::parse(tags));
    }

    Ok(config)
}

fn runner_factory(args: &cli::RunArgs, app: &AppConfig) -> Result<(Arc<dyn RunnerFactory>, String)> {
    if args.dry_run {
        info!("Dry run: every step passes");
        return Ok((Arc::new(ScriptedRunnerFactory::default()), "dry-run".to_string()));
    }

    let command = args
        .runner
        .clone()
        .or_else(|| app.runner_command.clone())
        .ok_or_else(|| {
            anyhow!("No runner command configured. Use --runner, STEPWISE_RUNNER or runner_command in the config file.")
        })?;

    let mut factory = ProcessRunnerFactory::new(&command).with_timeouts(
        app.connect_timeout(),
        app.request_timeout(),
        app.kill_timeout(),
    );
    if let Some(dir) = &app.runner_dir {
        factory = factory.with_working_dir(dir);
    }
    Ok((Arc::new(factory), command))
}

async fn run_specs(args: cli::RunArgs, app: AppConfig, env: &EnvConfig) -> Result<SuiteResult> {
    let config = build_run_config(&args, &app, env)?;
    let storage = match args.results_dir.as_ref().or(app.results_dir.as_ref()) {
        Some(dir) => ResultsStorage::new(dir),
        None => ResultsStorage::default_dir(),
    };

    let loaded = LoadedSuite::load(&args.paths)?;
    let mut build_errors = loaded.build_errors;

    if let Some(implemented) = &loaded.implemented_steps {
        let aliases: Vec<&str> = loaded.step_aliases.iter().map(String::as_str).collect();
        let validator = StaticValidator::new(implemented.iter()).with_aliases(&aliases);
        let added = populate_build_errors(&loaded.specs, &loaded.dictionary, &validator, &mut build_errors);
        if added > 0 {
            warn!("Validation found {} error(s)", added);
        }
    }

    let mut specs = loaded.specs;
    if args.failed {
        let previous = storage
            .last_result()?
            .ok_or_else(|| anyhow!("No previous run found in {}", storage.base_dir().display()))?;
        specs = restrict_to_failed(specs, &previous);
        if specs.is_empty() {
            println!("✓ Nothing failed in the last run");
            return Ok(SuiteResult::new(&config.project_name));
        }
        info!("Rerunning {} failed spec(s)", specs.len());
    }
    if let Some(tags) = &config.tags {
        specs = filter_by_tags(specs, tags);
        debug!("{} spec(s) left after tag filter {}", specs.len(), tags);
    }

    let (factory, runner_command) = runner_factory(&args, &app)?;
    let base_dir = std::env::current_dir().context("Failed to read current directory")?;
    let (events, rx) = EventBus::channel();
    let reporter = spawn_log_reporter(rx);

    let ctx = ExecutionContext::new(config.clone())
        .with_dictionary(loaded.dictionary)
        .with_build_errors(build_errors)
        .with_special(SpecialResolver::new(base_dir))
        .with_events(events);

    let kill_switch = ctx.kill_switch.clone();
    let kill_timeout = config.kill_timeout;
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping runners");
            kill_switch.trigger(kill_timeout).await;
        }
    });

    let instances = expand_data_table_specs(&specs, &config);
    info!(
        "{} spec(s) expanded into {} instance(s)",
        specs.len(),
        instances.len()
    );

    let suite = if config.parallel {
        ParallelExecution::new(ctx, factory).run(instances).await?
    } else {
        SimpleExecution::new(ctx, factory).run(instances).await?
    };
    interrupt.abort();

    match reporter.await {
        Ok(seen) => debug!("Reporter handled {} event(s)", seen),
        Err(e) => warn!("Event reporter stopped: {}", e),
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&suite)?),
        _ => println!("{suite}"),
    }

    if !args.no_save {
        let run = StoredRun::new(suite.clone(), &config).with_runner(runner_command);
        let path = storage.save(&run)?;
        println!("✓ Results saved to: {}", path.display());
    }

    Ok(suite)
}

fn show_results(args: cli::ResultsArgs, app: &AppConfig) -> Result<()> {
    let storage = match args.results_dir.as_ref().or(app.results_dir.as_ref()) {
        Some(dir) => ResultsStorage::new(dir),
        None => ResultsStorage::default_dir(),
    };

    if args.list {
        let runs = storage.list_runs()?;
        if runs.is_empty() {
            println!("\n📭 No stored runs found.");
            println!("   Run specs with: stepwise run <paths>");
            return Ok(());
        }

        println!("\n┌──────────────────────────────────────────────────────────────────┐");
        println!("│ Stored Runs                                                      │");
        println!("├──────────────────────────────────────────────────────────────────┤");
        for run in &runs {
            println!(
                "│ {:28} │ {} │ {:4} specs │ {:5.1}% │ {} │",
                run.id,
                run.started_at.format("%Y-%m-%d %H:%M"),
                run.specs,
                run.success_rate,
                if run.failed { "✗" } else { "✓" }
            );
        }
        println!("└──────────────────────────────────────────────────────────────────┘");
        return Ok(());
    }

    let result = match &args.run {
        Some(id) => storage.load(id)?.result,
        None => match storage.last_result()? {
            Some(result) => result,
            None => {
                println!("No results found in {}", storage.base_dir().display());
                return Ok(());
            }
        },
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => println!("{result}"),
    }

    if let Some(path) = &args.export {
        let format = ExportFormat::from_extension(path).unwrap_or(ExportFormat::Json);
        storage.export(&result, path, format)?;
        println!("\n✓ Results exported to: {}", path.display());
    }

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, path: Option<PathBuf>, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env: with_env, format } => {
            let mut config = ConfigFile::load_or_default(path.as_deref())?;
            if with_env {
                env.print_summary();
                config.app.apply_env(env)?;
            }
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or(path)
                .or_else(ConfigFile::find)
                .ok_or_else(|| anyhow!("No configuration file found"))?;

            match ConfigFile::load(&path).and_then(|config| config.validate()) {
                Ok(()) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            config::print_env_help();
        }
    }

    Ok(())
}
