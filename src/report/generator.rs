//! Markdown and JSON report generation.
//!
//! This module renders the outcome of one or more sessions: what the
//! tracker saw, what it forwarded, and what could not be delivered.

use crate::analysis::{
    aggregate_sessions, scroll_depth_reached, sections_in_view_order, top_services, vitals,
    AggregateStats,
};
use crate::config::ReportConfig;
use crate::session::SessionOutcome;
use crate::tracker::{DeviceInfo, TrackerSnapshot};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about the run that produced the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Tool version.
    pub version: String,
    /// Sink the events were forwarded to.
    pub sink: String,
    /// Wall-clock duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub aggregate: AggregateStats,
    pub sessions: Vec<SessionOutcome>,
}

impl Report {
    /// Build a report, computing the aggregate from the sessions.
    pub fn new(metadata: ReportMetadata, sessions: Vec<SessionOutcome>) -> Self {
        Self {
            metadata,
            aggregate: aggregate_sessions(&sessions),
            sessions,
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, config: &ReportConfig) -> String {
    let mut output = String::new();

    output.push_str("# PagePulse Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata, report.sessions.len()));

    if report.sessions.len() > 1 {
        output.push_str(&generate_overview_section(report));
    }

    output.push_str("## Sessions\n\n");
    if report.sessions.is_empty() {
        output.push_str("No sessions were recorded.\n\n");
    }
    for session in &report.sessions {
        output.push_str(&generate_session_section(session, config));
    }

    output.push_str(&generate_footer());
    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata, sessions: usize) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **PagePulse:** v{}\n", metadata.version));
    section.push_str(&format!("- **Sink:** `{}`\n", metadata.sink));
    section.push_str(&format!("- **Sessions:** {}\n", sessions));
    section.push_str(&format!(
        "- **Run Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the cross-session overview.
fn generate_overview_section(report: &Report) -> String {
    let stats = &report.aggregate;
    let mut section = String::new();

    section.push_str("## Overview\n\n");
    section.push_str("| Sessions | Events | Clicks | Avg Active | Avg Max Scroll | Avg Load |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {:.1}s | {:.0}% | {} |\n\n",
        stats.sessions,
        stats.total_events,
        stats.total_clicks,
        stats.avg_active_secs,
        stats.avg_max_scroll_percent,
        stats
            .avg_page_load_ms
            .map(|ms| format!("{:.0}ms", ms))
            .unwrap_or_else(|| "n/a".to_string()),
    ));

    if !stats.summary.by_name.is_empty() {
        section.push_str("### Events by Name\n\n");
        section.push_str("| Event | Count |\n");
        section.push_str("|:---|:---:|\n");

        let mut names: Vec<_> = stats.summary.by_name.iter().collect();
        names.sort_by_key(|(_, count)| std::cmp::Reverse(**count));
        for (name, count) in names {
            section.push_str(&format!("| `{}` | {} |\n", name, count));
        }
        section.push('\n');
    }

    let services = top_services(&report.sessions, 5);
    if !services.is_empty() {
        section.push_str("### Top Services\n\n");
        section.push_str("| Service | Clicks |\n");
        section.push_str("|:---|:---:|\n");
        for (service, clicks) in services {
            section.push_str(&format!("| {} | {} |\n", service, clicks));
        }
        section.push('\n');
    }

    section
}

/// Generate the section for one session.
fn generate_session_section(session: &SessionOutcome, config: &ReportConfig) -> String {
    let mut section = String::new();

    section.push_str(&format!("### {}\n\n", session.source));
    section.push_str(&format!(
        "*Host: {} | Signals: {} | Duration: {:.1}s*\n\n",
        session.page.hostname,
        session.signals_processed,
        session.duration_ms as f64 / 1000.0
    ));

    let Some(ref snapshot) = session.snapshot else {
        section.push_str("> ⚠️ Tracker was inactive for this session; nothing was reported.\n\n");
        section.push_str("---\n\n");
        return section;
    };

    if config.include_device {
        section.push_str(&generate_device_block(&snapshot.device));
    }
    section.push_str(&generate_engagement_block(snapshot, session));
    section.push_str(&generate_vitals_block(session));

    if config.include_events && !session.events.is_empty() {
        section.push_str(&generate_events_block(session, config.max_events));
    }

    let stats = snapshot.stats;
    if stats.dropped > 0 || stats.failed > 0 {
        section.push_str(&format!(
            "> ⚠️ **Undelivered:** {} dropped (no sink), {} rejected by the sink\n\n",
            stats.dropped, stats.failed
        ));
    }

    section.push_str("---\n\n");
    section
}

fn generate_device_block(device: &DeviceInfo) -> String {
    let mut block = String::new();

    block.push_str("**Device**\n\n");
    block.push_str("| Type | Viewport | Screen | Pixel Ratio | Language | Connection |\n");
    block.push_str("|:---|:---:|:---:|:---:|:---:|:---:|\n");
    block.push_str(&format!(
        "| {} | {}x{} | {}x{} | {} | {} | {} |\n\n",
        device.class,
        device.viewport_width,
        device.viewport_height,
        device.screen_width,
        device.screen_height,
        device.pixel_ratio,
        device.language,
        device.connection.as_deref().unwrap_or("unknown"),
    ));

    block
}

fn generate_engagement_block(snapshot: &TrackerSnapshot, session: &SessionOutcome) -> String {
    let mut block = String::new();

    block.push_str("**Engagement**\n\n");
    block.push_str(&format!(
        "- Active time: {:.1}s\n",
        snapshot.active_time_ms as f64 / 1000.0
    ));
    if let Some(load) = snapshot.page_load_ms {
        block.push_str(&format!("- Page load: {:.0}ms\n", load));
    }
    block.push_str(&format!(
        "- Max scroll: {:.0}%",
        snapshot.max_scroll_percent
    ));
    match scroll_depth_reached(&session.events) {
        Some(depth) => block.push_str(&format!(" (deepest threshold reported: {}%)\n", depth)),
        None => block.push('\n'),
    }
    if !snapshot.sections_viewed.is_empty() {
        block.push_str(&format!(
            "- Sections viewed: {}",
            snapshot.sections_viewed.join(" → ")
        ));
        let delivered = sections_in_view_order(&session.events).len();
        if delivered < snapshot.sections_viewed.len() {
            block.push_str(&format!(" ({} delivered)", delivered));
        }
        block.push('\n');
    }
    block.push_str(&format!("- Clicks: {}\n", snapshot.total_clicks));
    for (service, count) in &snapshot.service_clicks {
        block.push_str(&format!("  - {}: {}\n", service, count));
    }
    block.push('\n');

    block
}

fn generate_vitals_block(session: &SessionOutcome) -> String {
    let rated = vitals(&session.events);
    if rated.is_empty() {
        return String::new();
    }

    let mut block = String::new();
    block.push_str("**Web Vitals**\n\n");
    block.push_str("| Metric | Value | Rating |\n");
    block.push_str("|:---|:---:|:---|\n");
    for (event, rating) in rated {
        let value = if event.name == "cumulative_layout_shift" {
            format!("{:.3}", event.value)
        } else {
            format!("{:.0}ms", event.value)
        };
        block.push_str(&format!(
            "| `{}` | {} | {} {} |\n",
            event.name,
            value,
            rating.emoji(),
            rating
        ));
    }
    block.push('\n');

    block
}

fn generate_events_block(session: &SessionOutcome, max_events: usize) -> String {
    let mut block = String::new();

    block.push_str("<details>\n<summary>Events</summary>\n\n");
    block.push_str("| At | Event | Category | Value |\n");
    block.push_str("|---:|:---|:---|---:|\n");
    for event in session.events.iter().take(max_events) {
        block.push_str(&format!(
            "| {:.1}s | `{}` | {} | {} |\n",
            event.timestamp_ms as f64 / 1000.0,
            event.name,
            event.category,
            event.value
        ));
    }
    if session.events.len() > max_events {
        block.push_str(&format!(
            "\n*{} more events not shown.*\n",
            session.events.len() - max_events
        ));
    }
    block.push_str("\n</details>\n\n");

    block
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by PagePulse*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
