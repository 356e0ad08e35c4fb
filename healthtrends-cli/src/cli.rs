use clap::{Parser, Subcommand, ValueEnum};
use healthtrends::{ActivityLevel, Gender};
use is_terminal::IsTerminal;
use std::io;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenderArg {
    Female,
    Male,
    Other,
}

impl From<GenderArg> for Gender {
    fn from(arg: GenderArg) -> Self {
        match arg {
            GenderArg::Female => Gender::Female,
            GenderArg::Male => Gender::Male,
            GenderArg::Other => Gender::Other,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityArg {
    Sedentary,
    Moderate,
    Active,
    VeryActive,
}

impl From<ActivityArg> for ActivityLevel {
    fn from(arg: ActivityArg) -> Self {
        match arg {
            ActivityArg::Sedentary => ActivityLevel::Sedentary,
            ActivityArg::Moderate => ActivityLevel::Moderate,
            ActivityArg::Active => ActivityLevel::Active,
            ActivityArg::VeryActive => ActivityLevel::VeryActive,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "healthtrends")]
#[command(version)]
#[command(about = "Trend analysis and comparisons for personal health exports")]
#[command(long_about = "
healthtrends reads a CSV health export, computes per-metric trends in a
background worker pool and caches the results on disk between runs.

The export needs three columns: metric,timestamp,value
Timestamps may be RFC 3339 or plain YYYY-MM-DD dates.

Example usage:
  healthtrends metrics                              # Known metric names
  healthtrends analyze --data export.csv            # Trends for every metric in the file
  healthtrends compare --data export.csv --metric steps --seasonal
  healthtrends cache status                         # What is cached and how old it is
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Override the trend cache directory
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the metric names the processor accepts
    #[command(long_about = "
Lists every metric the trend processor will accept, with how same-day
samples are combined before analysis (sum for counts, mean for readings).

Examples:
  healthtrends metrics
  healthtrends metrics --format json
")]
    Metrics {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Compute trends for metrics in a health export
    #[command(long_about = "
Imports a CSV export and refreshes the trend for every affected metric,
or only the ones named with --metric. Results are written to the trend
cache so later runs and comparisons can reuse them.

Exit codes:
  0 - Every requested metric produced a trend
  1 - Some metrics had too little data or failed
  2 - The export or arguments were invalid

Examples:
  healthtrends analyze --data export.csv
  healthtrends analyze --data export.csv --metric steps --metric heart_rate
  healthtrends analyze --data export.csv --format json
")]
    Analyze {
        /// CSV export with metric,timestamp,value columns
        #[arg(long, value_name = "CSV")]
        data: PathBuf,

        /// Only analyse these metrics
        #[arg(long = "metric", value_name = "METRIC")]
        metrics: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Compare a metric against its own history, the season or a cohort
    #[command(long_about = "
Compares one metric against its own rolling windows and the same period
last year. Optionally adds a seasonal baseline, and a demographic cohort
comparison when --share-demographics is given.

Demographic comparisons use anonymised cohort figures and are refused for
cohorts smaller than 50 people.

Examples:
  healthtrends compare --data export.csv --metric steps
  healthtrends compare --data export.csv --metric steps --date 2024-06-30 --lookback 90
  healthtrends compare --data export.csv --metric steps --seasonal --location Sydney
  healthtrends compare --data export.csv --metric steps --age 34 --share-demographics
")]
    Compare {
        /// CSV export with metric,timestamp,value columns
        #[arg(long, value_name = "CSV")]
        data: PathBuf,

        /// Metric to compare
        #[arg(long)]
        metric: String,

        /// Comparison date (YYYY-MM-DD or RFC 3339), defaults to now
        #[arg(long)]
        date: Option<String>,

        /// Days of history used for the personal best and average
        #[arg(long, default_value_t = 365)]
        lookback: i64,

        /// Add a seasonal comparison
        #[arg(long)]
        seasonal: bool,

        /// Location used to pick the hemisphere for seasonal comparisons
        #[arg(long)]
        location: Option<String>,

        /// Age for a demographic comparison
        #[arg(long)]
        age: Option<i32>,

        /// Gender for the demographic cohort
        #[arg(long, value_enum, requires = "age")]
        gender: Option<GenderArg>,

        /// Activity level for the demographic cohort
        #[arg(long, value_enum, requires = "age")]
        activity: Option<ActivityArg>,

        /// Allow anonymised demographic comparison
        #[arg(long)]
        share_demographics: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Inspect or clear the on-disk trend cache
    #[command(long_about = "
Shows which trends are cached on disk and how old they are, or removes
them so the next analysis recomputes from scratch.

Examples:
  healthtrends cache status
  healthtrends cache clear
  healthtrends cache clear --metric steps
")]
    Cache {
        #[command(subcommand)]
        subcommand: CacheSubcommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    /// Show cached trends and their age
    Status {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Remove cached trends
    Clear {
        /// Only remove this metric's entry
        #[arg(long)]
        metric: Option<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    #[allow(dead_code)]
    pub fn try_parse_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(args)
    }

    pub fn is_tty() -> bool {
        io::stdout().is_terminal()
    }

    pub fn should_use_color() -> bool {
        Self::is_tty() && std::env::var("NO_COLOR").is_err()
    }
}
