use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch (or read) a report and refresh the published page.
    Run(RunArgs),
    /// Extract a report and print what was found.
    Extract(ExtractArgs),
    /// List the regions of a published page.
    Check(CheckArgs),
    /// Show the latest expected and next releases.
    Schedule(ScheduleArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Report to read (PDF, or a text dump with form-feed page breaks).
    /// Fetched from the publication site when omitted.
    pub source: Option<PathBuf>,

    /// Published HTML page to refresh. Must exist.
    #[arg(long)]
    pub html: PathBuf,

    /// Matcher rules YAML (default: built-in rules).
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Release to process, e.g. `4/25` (default: latest expected release).
    #[arg(long)]
    pub release: Option<String>,

    /// Keep downloaded reports here and reuse them on later runs.
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Copy the previous page here before replacing it.
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Write a JSON run report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Do everything except writing the page.
    #[arg(long)]
    pub dry_run: bool,

    /// Treat any failed table as a hard failure.
    #[arg(long)]
    pub strict: bool,

    /// Decimal separator for regions whose text does not show one.
    #[arg(long, default_value_t = ',')]
    pub decimal_separator: char,
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Report to read (PDF or text dump).
    pub source: PathBuf,

    /// Matcher rules YAML (default: built-in rules).
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Release label used for forecast rows (default: from the file name).
    #[arg(long)]
    pub release: Option<String>,

    /// Print the full result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Published HTML page.
    #[arg(long)]
    pub html: PathBuf,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Date to evaluate the calendar at (default: today).
    #[arg(long)]
    pub today: Option<NaiveDate>,
}
