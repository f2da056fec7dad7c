//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pagepulse.toml` files.

use crate::tracker::SinkKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".pagepulse.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Tracker settings.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Outbound sink settings.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "pagepulse_report.md".to_string()
}

/// Tracker behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Install the tracker at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Scroll depth percentages reported once each.
    #[serde(default = "default_scroll_thresholds")]
    pub scroll_thresholds: Vec<u32>,

    /// Minimum intersection ratio for a section to count as viewed.
    #[serde(default = "default_section_ratio")]
    pub section_visibility_ratio: f64,

    /// Active-time accumulation timer period.
    #[serde(default = "default_active_tick")]
    pub active_tick_interval_ms: u64,

    /// Memory sampling timer period.
    #[serde(default = "default_memory_interval")]
    pub memory_sample_interval_ms: u64,

    /// Tasks at least this long are reported.
    #[serde(default = "default_long_task")]
    pub long_task_threshold_ms: f64,

    /// Active-time milestones in seconds, reported once each.
    #[serde(default = "default_milestones")]
    pub engagement_milestones_secs: Vec<u64>,

    /// Hostnames under which the debug snapshot is exposed.
    #[serde(default = "default_debug_hostnames")]
    pub debug_hostnames: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scroll_thresholds: default_scroll_thresholds(),
            section_visibility_ratio: default_section_ratio(),
            active_tick_interval_ms: default_active_tick(),
            memory_sample_interval_ms: default_memory_interval(),
            long_task_threshold_ms: default_long_task(),
            engagement_milestones_secs: default_milestones(),
            debug_hostnames: default_debug_hostnames(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scroll_thresholds() -> Vec<u32> {
    vec![25, 50, 75, 90]
}

fn default_section_ratio() -> f64 {
    0.5
}

fn default_active_tick() -> u64 {
    1000
}

fn default_memory_interval() -> u64 {
    30_000
}

fn default_long_task() -> f64 {
    50.0
}

fn default_milestones() -> Vec<u64> {
    vec![30, 60, 120, 300]
}

fn default_debug_hostnames() -> Vec<String> {
    vec!["localhost", "127.0.0.1", "0.0.0.0", "[::1]"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Outbound sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Which sink receives events.
    #[serde(default)]
    pub kind: SinkKind,

    /// Collector URL for the `http` sink.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// NDJSON path for the `file` sink.
    #[serde(default)]
    pub events_file: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            endpoint: None,
            events_file: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// List individual events in the report.
    #[serde(default = "default_true")]
    pub include_events: bool,

    /// Maximum events listed per session.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Include the device snapshot section.
    #[serde(default = "default_true")]
    pub include_device: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_events: true,
            max_events: default_max_events(),
            include_device: true,
        }
    }
}

fn default_max_events() -> usize {
    200
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(kind) = args.sink {
            self.sink.kind = kind;
        }
        if let Some(ref endpoint) = args.endpoint {
            self.sink.endpoint = Some(endpoint.clone());
        }
        if let Some(ref events_file) = args.events_file {
            self.sink.events_file = Some(events_file.display().to_string());
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(ref thresholds) = args.thresholds {
            self.tracker.scroll_thresholds = thresholds.clone();
        }
        if args.disable {
            self.tracker.enabled = false;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
