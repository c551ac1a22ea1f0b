//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use anyhow::{anyhow, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CliOverrides;
use crate::models::UnexpectedSuccessPolicy;
use crate::output::{OutputFormat, ReportFormat};
use crate::utils::LogLevel;

/// xUnit-style test runner
#[derive(Parser, Debug)]
#[command(name = "unitrun")]
#[command(version)]
#[command(about = "Discover, select and run xUnit-style test suites")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// One line per test and debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Args {
    /// Explicit level, else debug when verbose, else the default
    pub fn log_level(&self) -> Result<LogLevel> {
        match &self.log_level {
            Some(level) => {
                LogLevel::from_str(level).ok_or_else(|| anyhow!("Unknown log level: {level}"))
            }
            None if self.verbose => Ok(LogLevel::Debug),
            None => Ok(LogLevel::default()),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover, select and run tests
    Run(RunArgs),

    /// List discovered tests without running them
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Selection flags shared by `run` and `list`
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct SelectArgs {
    /// Suite file or directory to search
    pub path: Option<PathBuf>,

    /// Selector expression, e.g. 'not slow and priority <= 2'
    #[arg(short, long)]
    pub select: Option<String>,

    /// Attribute spec, e.g. 'owner=core,!slow'; repeat to OR specs
    #[arg(short, long = "attr")]
    pub attrs: Vec<String>,

    /// Only tests whose full id contains this text
    #[arg(short = 'k', long)]
    pub filter: Option<String>,

    /// Named selection profile
    #[arg(short, long)]
    pub profile: Option<String>,
}

/// Arguments for run command
#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectArgs,

    /// Run modules on N workers
    #[arg(short = 'j', long)]
    pub parallel: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Stop after the first failing test
    #[arg(short = 'x', long)]
    pub fail_fast: bool,

    /// Exit 1 when the run is cancelled, even if nothing failed
    #[arg(long)]
    pub fail_on_cancel: bool,

    /// Console format (text, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Write a report to this file
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Report format (json, json-pretty, csv, junit); defaults to the file extension
    #[arg(long)]
    pub report_format: Option<String>,

    /// Whether an unexpected success fails the run (failure, success)
    #[arg(long)]
    pub unexpected_success: Option<String>,
}

impl RunArgs {
    pub fn overrides(&self, args: &Args) -> Result<CliOverrides> {
        let format = self
            .format
            .as_deref()
            .map(|f| OutputFormat::from_str(f).ok_or_else(|| anyhow!("Unknown format: {f}")))
            .transpose()?;
        let unexpected_success = self
            .unexpected_success
            .as_deref()
            .map(|p| p.parse::<UnexpectedSuccessPolicy>().map_err(|e| anyhow!(e)))
            .transpose()?;

        Ok(CliOverrides {
            path: self.selection.path.clone(),
            select: self.selection.select.clone(),
            attrs: self.selection.attrs.clone(),
            filter: self.selection.filter.clone(),
            parallel: self.parallel,
            timeout: self.timeout,
            fail_fast: self.fail_fast,
            fail_on_cancel: self.fail_on_cancel,
            format,
            verbose: args.verbose,
            no_color: args.no_color,
            unexpected_success,
        })
    }

    /// Explicit format, else inferred from the report path
    pub fn report_format(&self) -> Result<Option<(PathBuf, ReportFormat)>> {
        let Some(path) = &self.report else {
            return Ok(None);
        };
        let format = match &self.report_format {
            Some(name) => ReportFormat::from_str(name)
                .ok_or_else(|| anyhow!("Unknown report format: {name}"))?,
            None => ReportFormat::from_extension(path).unwrap_or(ReportFormat::Json),
        };
        Ok(Some((path.clone(), format)))
    }
}

/// Arguments for list command
#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: SelectArgs,

    /// Show tags, attributes and decorations
    #[arg(short, long)]
    pub detailed: bool,
}

impl ListArgs {
    pub fn overrides(&self, args: &Args) -> CliOverrides {
        CliOverrides {
            path: self.selection.path.clone(),
            select: self.selection.select.clone(),
            attrs: self.selection.attrs.clone(),
            filter: self.selection.filter.clone(),
            no_color: args.no_color,
            ..CliOverrides::default()
        }
    }
}

/// Arguments for config command
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "unitrun.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration file
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Show UNITRUN_* environment variables
    Env {
        /// Describe the variables instead of showing their values
        #[arg(long)]
        help_vars: bool,
    },

    /// Check a configuration file
    Validate {
        /// File to check; defaults to the first one found
        file: Option<PathBuf>,
    },

    /// List selection profiles
    Profiles {
        /// Show each profile's selection
        #[arg(short, long)]
        detailed: bool,
    },
}
