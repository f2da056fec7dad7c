//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::tracker::SinkKind;
use clap::Parser;
use std::path::PathBuf;

/// PagePulse - page engagement and performance telemetry
///
/// Replay recorded page traces (or a live NDJSON signal stream) through
/// the page tracker and report what it would have sent to analytics.
///
/// Examples:
///   pagepulse --trace traces/home.json
///   pagepulse --trace traces/ --format json --output pulse.json
///   pagepulse --trace traces/ --sink http --endpoint https://collector.example.com/events
///   cat session.ndjson | pagepulse --live --sink stdout
///   pagepulse --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Trace file or directory of traces to replay
    ///
    /// Directories are searched recursively for `*.json` traces.
    /// Not required with --live or --init-config.
    #[arg(
        short,
        long,
        value_name = "PATH",
        required_unless_present_any = ["live", "init_config"]
    )]
    pub trace: Option<PathBuf>,

    /// Read a live NDJSON signal stream from stdin
    ///
    /// The first line is the page environment, each following line one signal.
    #[arg(long, conflicts_with = "trace")]
    pub live: bool,

    /// Where to send analytics events
    ///
    /// Can also be set via PAGEPULSE_SINK env var or .pagepulse.toml config.
    #[arg(short, long, value_name = "SINK", env = "PAGEPULSE_SINK")]
    pub sink: Option<SinkKind>,

    /// Collector endpoint for the http sink
    #[arg(long, value_name = "URL", env = "PAGEPULSE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// NDJSON file the file sink appends to
    #[arg(long, value_name = "FILE")]
    pub events_file: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Defaults to pagepulse_report.md (or the config file setting)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .pagepulse.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Scroll depth thresholds in percent (comma-separated)
    ///
    /// Example: --thresholds 25,50,75,100
    #[arg(long, value_name = "PERCENTS", value_delimiter = ',')]
    pub thresholds: Option<Vec<u32>>,

    /// Install the tracker disabled (every session reports nothing)
    #[arg(long)]
    pub disable: bool,

    /// Print the debug snapshot of sessions on debug hostnames
    #[arg(long)]
    pub debug_snapshot: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: load and validate traces without replaying them
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .pagepulse.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.live && self.dry_run {
            return Err("--dry-run only applies to trace replay".to_string());
        }

        if let Some(ref trace) = self.trace {
            if !trace.exists() {
                return Err(format!("Trace path does not exist: {}", trace.display()));
            }
        }

        if let Some(ref endpoint) = self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err("Endpoint must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref thresholds) = self.thresholds {
            if thresholds.is_empty() {
                return Err("At least one scroll threshold is required".to_string());
            }
            if let Some(bad) = thresholds.iter().find(|t| !(1..=100).contains(*t)) {
                return Err(format!("Scroll threshold {} is not between 1 and 100", bad));
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
