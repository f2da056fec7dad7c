//! Recorded page-session traces.
//!
//! A trace is one JSON document holding the page environment and the
//! host signals observed during one page load, each stamped with its
//! offset in milliseconds.

use crate::models::{PageEnvironment, TimedSignal};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A recorded page session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub page: PageEnvironment,
    #[serde(default)]
    pub signals: Vec<TimedSignal>,
}

impl Trace {
    /// True when signal timestamps never go backwards.
    pub fn is_sorted(&self) -> bool {
        self.signals.windows(2).all(|w| w[0].at_ms <= w[1].at_ms)
    }

    /// Offset of the last signal.
    pub fn duration_ms(&self) -> u64 {
        self.signals.iter().map(|s| s.at_ms).max().unwrap_or(0)
    }
}

/// Load and parse a trace file.
pub fn load_trace(path: &Path) -> Result<Trace> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace file: {}", path.display()))?;

    let trace: Trace = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse trace file: {}", path.display()))?;

    debug!(
        "Loaded {} signals for {} from {}",
        trace.signals.len(),
        trace.page.hostname,
        path.display()
    );
    Ok(trace)
}

/// Find every `*.json` trace below `dir`, sorted by path.
///
/// Hidden files and directories are skipped.
pub fn discover_traces(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut traces = Vec::new();

    let walker = WalkDir::new(dir).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name())) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
        {
            traces.push(path.to_path_buf());
        }
    }

    traces.sort();
    Ok(traces)
}

/// Expand a CLI path into trace files: a file stands for itself, a
/// directory for every trace inside it.
pub fn resolve_traces(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if path.is_dir() {
        let traces = discover_traces(path)?;
        if traces.is_empty() {
            return Err(anyhow::anyhow!(
                "No trace files (*.json) found in {}",
                path.display()
            ));
        }
        return Ok(traces);
    }

    Err(anyhow::anyhow!("Trace path not found: {}", path.display()))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}
