//! unitrun - xUnit-style test runner
//!
//! Discovers YAML suite files, selects units by tag and attribute
//! predicates, runs them with module, class and instance fixtures, and
//! reports one outcome per unit.
//!
//! ## Usage
//!
//! ```bash
//! # Run everything under tests/
//! unitrun run tests/
//!
//! # Only fast tests owned by core, on four workers
//! unitrun run --select "not 'slow' in tags" --attr owner=core -j 4
//!
//! # List what would run, with metadata
//! unitrun list --profile smoke --detailed
//!
//! # Write a JUnit report for CI
//! unitrun run --report target/unitrun.xml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::process::ExitCode;
use tracing::{error, info, warn};

use unitrun::cli::{self, Args, Command};
use unitrun::config::{self, ConfigFile, EnvConfig, RunSettings};
use unitrun::executor::{CancelToken, ParallelExecutor, TestRunner};
use unitrun::models::RunReport;
use unitrun::output::{
    write_report, ConsoleReporter, OutputFormat, Reporter, ResultFormatter, SummaryReporter,
};
use unitrun::registry::{Registry, Suite};
use unitrun::utils::{init_logger, Stopwatch};

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    init_logger(level);

    let result = match &args.command {
        Command::Run(run_args) => run_tests(&args, run_args).await,
        Command::List(list_args) => list_tests(&args, list_args).map(|_| ExitCode::SUCCESS),
        Command::Config(config_args) => manage_config(&args, config_args).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// Layer config file, profile, environment and flags
fn resolve_settings(
    args: &Args,
    profile: Option<&str>,
    overrides: &config::CliOverrides,
) -> Result<RunSettings> {
    let env = EnvConfig::load();
    let file = config::load_config(args.config.as_deref(), &env)?;
    let profile = config::select_profile(&file, profile, &env)?;
    if let Some(profile) = &profile {
        info!("Using profile '{}'", profile.name);
    }
    RunSettings::resolve(&file.app, profile.as_ref(), &env, overrides)
}

/// Discover and select; the returned suite holds only selected units
fn collect(settings: &RunSettings, stopwatch: &mut Stopwatch) -> Result<Suite> {
    let selector = settings.selector().context("Invalid selection")?;

    let registry = Registry::new(settings.naming.clone());
    let suite = registry.discover_path(&settings.path)?;
    stopwatch.lap("discovery");

    let suite = if selector.is_all() {
        suite
    } else {
        info!("Selecting {selector}");
        selector.select(&suite)
    };
    stopwatch.lap("selection");
    Ok(suite)
}

fn reporter_for(settings: &RunSettings) -> Box<dyn Reporter + Send> {
    match settings.format {
        OutputFormat::Text => Box::new(
            ConsoleReporter::new(io::stdout())
                .verbose(settings.verbose)
                .with_color(settings.color)
                .with_symbols(settings.symbols.clone()),
        ),
        OutputFormat::Summary => Box::new(SummaryReporter::new(
            io::stdout(),
            ResultFormatter::new(OutputFormat::Summary).with_color(settings.color),
        )),
    }
}

async fn run_tests(args: &Args, run_args: &cli::RunArgs) -> Result<ExitCode> {
    let overrides = run_args.overrides(args)?;
    let report_target = run_args.report_format()?;
    let settings = resolve_settings(args, run_args.selection.profile.as_deref(), &overrides)?;

    let mut stopwatch = Stopwatch::new();
    let suite = collect(&settings, &mut stopwatch)?;
    if suite.is_empty() {
        warn!("No tests selected under {}", settings.path.display());
    }

    let token = CancelToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    warn!("Interrupted, finishing current tests");
                    interrupt.cancel("interrupted");
                }
            }
            _ = interrupt.cancelled() => {}
        }
    });

    let options = settings.run_options();
    let mut reporter = reporter_for(&settings);
    let report: RunReport = if options.workers > 1 {
        let executor = ParallelExecutor::new(options.workers);
        executor
            .run(&suite, &options, &token, &mut *reporter)
            .await?
    } else {
        let runner = TestRunner::new(options).with_token(token);
        tokio::task::spawn_blocking(move || runner.run(&suite, &mut *reporter))
            .await
            .context("Runner thread failed")??
    };
    stopwatch.lap("execution");

    if let Some((path, format)) = report_target {
        write_report(&path, &report, format)?;
    }
    stopwatch.lap("report");
    stopwatch.log();

    if settings.passed(&report) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILED))
    }
}

fn list_tests(args: &Args, list_args: &cli::ListArgs) -> Result<()> {
    let overrides = list_args.overrides(args);
    let settings = resolve_settings(args, list_args.selection.profile.as_deref(), &overrides)?;
    let mut stopwatch = Stopwatch::new();
    let suite = collect(&settings, &mut stopwatch)?;

    let formatter = ResultFormatter::default().with_color(settings.color);
    print!("{}", formatter.format_listing(&suite, list_args.detailed));
    stopwatch.log();
    Ok(())
}

fn manage_config(args: &Args, config_args: &cli::ConfigArgs) -> Result<()> {
    match &config_args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }
            ConfigFile::example().save(output)?;
            println!("Configuration file created: {}", output.display());
        }

        cli::ConfigAction::Show { format } => {
            let env = EnvConfig::load();
            let config = config::load_config(args.config.as_deref(), &env)?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Env { help_vars } => {
            if *help_vars {
                config::env::print_env_help();
            } else {
                EnvConfig::load().print_summary();
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .clone()
                .or_else(|| args.config.clone())
                .or_else(ConfigFile::find)
                .context("No configuration file found")?;
            ConfigFile::load(&path)?;
            println!("Configuration file is valid: {}", path.display());
        }

        cli::ConfigAction::Profiles { detailed } => {
            let env = EnvConfig::load();
            let config = config::load_config(args.config.as_deref(), &env)?;
            println!("Selection Profiles:");
            println!("{:-<60}", "");
            for profile in config.profile_manager().list() {
                if *detailed {
                    println!("  {}", profile.name);
                    println!("    Description: {}", profile.description);
                    match profile.selector() {
                        Ok(selector) => println!("    Selects: {selector}"),
                        Err(e) => println!("    Invalid selection: {e}"),
                    }
                    if let Some(workers) = profile.parallel {
                        println!("    Workers: {workers}");
                    }
                    if let Some(fail_fast) = profile.fail_fast {
                        println!("    Fail fast: {fail_fast}");
                    }
                    println!();
                } else {
                    println!("  {:12} - {}", profile.name, profile.description);
                }
            }
        }
    }
    Ok(())
}
