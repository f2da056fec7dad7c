//! PagePulse - page engagement and performance telemetry
//!
//! A CLI tool that drives the page tracker with recorded traces or a
//! live signal stream, forwards the resulting analytics events to a
//! configurable sink, and writes a session report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad trace, config, sink setup, etc.)

mod analysis;
mod cli;
mod config;
mod models;
mod report;
mod session;
mod tracker;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use report::{Report, ReportMetadata};
use session::SessionOutcome;
use std::path::Path;
use std::time::Instant;
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracker::SinkFactory;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("PagePulse v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .pagepulse.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize thresholds, timers, the sink, and the report.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the sessions and write the report. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    if args.dry_run {
        return handle_dry_run(&args);
    }

    let factory = SinkFactory::new(&config.sink).context("Failed to set up the event sink")?;
    let sink_name = format!("{:?}", factory.kind()).to_lowercase();

    let sessions = if args.live {
        eprintln!("📡 Reading live signals from stdin (Ctrl-C to stop)...");
        let sink = factory.make()?;
        let reader = BufReader::new(tokio::io::stdin());
        vec![session::run_live(reader, &config.tracker, sink).await?]
    } else {
        replay_all(&args, &config, &factory)?
    };

    if let Some(delivered) = factory.finish().await {
        info!("Collector accepted {} events", delivered);
    }

    if args.debug_snapshot {
        print_debug_snapshots(&sessions)?;
    }

    let metadata = ReportMetadata {
        generated_at: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sink: sink_name,
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let report = Report::new(metadata, sessions);

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report, &config.report),
    };

    let output_path = Path::new(&config.general.output);
    std::fs::write(output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    if !args.quiet {
        eprintln!("\n📊 Session Summary:");
        for line in analysis::generate_summary_text(&report.aggregate).lines() {
            eprintln!("   {}", line);
        }
        eprintln!(
            "\n✅ Done! Report saved to: {}",
            output_path.display()
        );
    }

    Ok(0)
}

/// Replay every trace under `--trace`, one fresh tracker and sink per trace.
fn replay_all(args: &Args, config: &Config, factory: &SinkFactory) -> Result<Vec<SessionOutcome>> {
    let Some(ref trace_path) = args.trace else {
        anyhow::bail!("No trace given");
    };

    let paths = session::resolve_traces(trace_path)?;
    info!("Replaying {} trace(s)", paths.len());

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(paths.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb
    };

    let mut sessions = Vec::with_capacity(paths.len());
    for path in &paths {
        let source = path.display().to_string();
        progress.set_message(source.clone());

        let trace = session::load_trace(path)?;
        let sink = factory.make()?;
        sessions.push(session::replay(&trace, &source, &config.tracker, sink));

        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(sessions)
}

/// Handle --dry-run: load every trace, print what would be replayed, exit.
fn handle_dry_run(args: &Args) -> Result<i32> {
    let Some(ref trace_path) = args.trace else {
        anyhow::bail!("No trace given");
    };

    println!("\n🔍 Dry run: validating traces (no events are sent)...\n");

    let paths = session::resolve_traces(trace_path)?;
    for path in &paths {
        let trace = session::load_trace(path)?;
        let order = if trace.is_sorted() { "" } else { ", out of order" };
        println!(
            "     📄 {} ({}, {} signals, {:.1}s{})",
            path.display(),
            trace.page.hostname,
            trace.signals.len(),
            trace.duration_ms() as f64 / 1000.0,
            order
        );
    }
    println!("\n   Total: {} traces", paths.len());

    println!("\n✅ Dry run complete. No events were sent.");
    Ok(0)
}

/// Print the debug snapshot of every session on a debug hostname.
fn print_debug_snapshots(sessions: &[SessionOutcome]) -> Result<()> {
    let mut printed = 0;
    for session in sessions {
        if let Some(ref snapshot) = session.debug_snapshot {
            println!("// {}", session.source);
            println!("{}", serde_json::to_string_pretty(snapshot)?);
            printed += 1;
        }
    }
    if printed == 0 {
        warn!("No session ran on a debug hostname; nothing to print");
    }
    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
