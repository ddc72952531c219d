//! CLI argument definitions for the canvass binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "canvass",
    version,
    about = "Edit checking and imputation for survey records",
    long_about = "Check records against declared consistency edits and fill \n\
                  missing values by model-based imputation.\n\n\
                  Rules and imputation plans are JSON files; record data is CSV."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for debug, -vv for trace, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a dataset against the declared edits.
    Check(CheckArgs),

    /// Fill missing values per an imputation plan.
    Impute(ImputeArgs),
}

#[derive(Parser)]
pub struct CheckArgs {
    /// CSV file of records to check.
    #[arg(value_name = "DATA")]
    pub data: PathBuf,

    /// Rules file declaring fields, edits and optional ratio bounds.
    #[arg(long = "rules", value_name = "PATH")]
    pub rules: PathBuf,

    /// Column labelling records in failure reports (default: row position).
    #[arg(long = "id-column", value_name = "NAME")]
    pub id_column: Option<String>,

    /// Search passing reassignments for each failing record.
    ///
    /// Requires every data column to be declared in the rules file.
    #[arg(long = "alternatives")]
    pub alternatives: bool,

    /// Wall-clock budget per alternative search, in milliseconds (0 = unbounded).
    #[arg(long = "search-budget-ms", value_name = "MS", default_value_t = 0)]
    pub search_budget_ms: u64,

    /// Write the check report as JSON.
    #[arg(long = "report", value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Parser)]
pub struct ImputeArgs {
    /// CSV file of records to fill.
    #[arg(value_name = "DATA")]
    pub data: PathBuf,

    /// Rules file; accepted draws must clear these edits.
    #[arg(long = "rules", value_name = "PATH")]
    pub rules: PathBuf,

    /// Imputation plan file.
    #[arg(long = "plan", value_name = "PATH")]
    pub plan: PathBuf,

    /// Write the accepted draws as CSV.
    #[arg(long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write the run report as JSON.
    #[arg(long = "report", value_name = "PATH")]
    pub report: Option<PathBuf>,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
