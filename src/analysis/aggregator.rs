//! Event aggregation and statistics.
//!
//! This module provides utilities for summarising the events each session
//! forwarded and for combining several replayed sessions.

use crate::models::{AnalyticsEvent, EventSummary};
use crate::session::SessionOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Deepest scroll threshold that was reported.
pub fn scroll_depth_reached(events: &[AnalyticsEvent]) -> Option<u32> {
    events
        .iter()
        .filter(|e| e.name == "scroll_depth")
        .map(|e| e.value as u32)
        .max()
}

/// Section ids in the order their view events were sent.
pub fn sections_in_view_order(events: &[AnalyticsEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.name == "section_view")
        .filter_map(|e| e.param_str("section_id").map(String::from))
        .collect()
}

/// Services with the most clicks across sessions, highest first.
pub fn top_services(outcomes: &[SessionOutcome], n: usize) -> Vec<(String, u64)> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();

    for snapshot in outcomes.iter().filter_map(|o| o.snapshot.as_ref()) {
        for (service, count) in &snapshot.service_clicks {
            *totals.entry(service.clone()).or_insert(0) += count;
        }
    }

    let mut ranked: Vec<(String, u64)> = totals.into_iter().collect();
    // Stable sort keeps equal counts in name order.
    ranked.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
    ranked.truncate(n);
    ranked
}

/// How a web-vital measurement compares to the published thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalRating {
    Good,
    NeedsImprovement,
    Poor,
}

impl VitalRating {
    pub fn emoji(&self) -> &'static str {
        match self {
            VitalRating::Good => "🟢",
            VitalRating::NeedsImprovement => "🟡",
            VitalRating::Poor => "🔴",
        }
    }
}

impl fmt::Display for VitalRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VitalRating::Good => write!(f, "Good"),
            VitalRating::NeedsImprovement => write!(f, "Needs improvement"),
            VitalRating::Poor => write!(f, "Poor"),
        }
    }
}

/// Rate a web-vital event value; `None` for events that are not vitals.
pub fn rate_vital(name: &str, value: f64) -> Option<VitalRating> {
    let (good, poor) = match name {
        "largest_contentful_paint" => (2500.0, 4000.0),
        "first_input_delay" => (100.0, 300.0),
        "cumulative_layout_shift" => (0.1, 0.25),
        "first_contentful_paint" => (1800.0, 3000.0),
        _ => return None,
    };

    Some(if value <= good {
        VitalRating::Good
    } else if value <= poor {
        VitalRating::NeedsImprovement
    } else {
        VitalRating::Poor
    })
}

/// Web-vital events of one session with their ratings.
pub fn vitals(events: &[AnalyticsEvent]) -> Vec<(&AnalyticsEvent, VitalRating)> {
    events
        .iter()
        .filter_map(|e| rate_vital(&e.name, e.value).map(|rating| (e, rating)))
        .collect()
}

/// Totals across several sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub sessions: usize,
    pub inactive_sessions: usize,
    pub total_events: usize,
    pub total_clicks: u64,
    pub dropped_events: u64,
    pub failed_events: u64,
    pub avg_active_secs: f64,
    pub avg_max_scroll_percent: f64,
    /// Average over sessions that reported a page load.
    pub avg_page_load_ms: Option<f64>,
    pub summary: EventSummary,
}

/// Combine the outcomes of a batch replay.
pub fn aggregate_sessions(outcomes: &[SessionOutcome]) -> AggregateStats {
    let all_events: Vec<AnalyticsEvent> = outcomes
        .iter()
        .flat_map(|o| o.events.iter().cloned())
        .collect();

    let mut stats = AggregateStats {
        sessions: outcomes.len(),
        total_events: all_events.len(),
        summary: EventSummary::from_events(&all_events),
        ..AggregateStats::default()
    };

    let snapshots: Vec<_> = outcomes.iter().filter_map(|o| o.snapshot.as_ref()).collect();
    stats.inactive_sessions = outcomes.len() - snapshots.len();

    if !snapshots.is_empty() {
        let n = snapshots.len() as f64;
        stats.total_clicks = snapshots.iter().map(|s| s.total_clicks).sum();
        stats.dropped_events = snapshots.iter().map(|s| s.stats.dropped).sum();
        stats.failed_events = snapshots.iter().map(|s| s.stats.failed).sum();
        stats.avg_active_secs =
            snapshots.iter().map(|s| s.active_time_ms as f64).sum::<f64>() / n / 1000.0;
        stats.avg_max_scroll_percent =
            snapshots.iter().map(|s| s.max_scroll_percent).sum::<f64>() / n;

        let loads: Vec<f64> = snapshots.iter().filter_map(|s| s.page_load_ms).collect();
        if !loads.is_empty() {
            stats.avg_page_load_ms = Some(loads.iter().sum::<f64>() / loads.len() as f64);
        }
    }

    stats
}

/// Generate a text summary of one or more sessions for the console.
pub fn generate_summary_text(stats: &AggregateStats) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Sessions: {}", stats.sessions));
    if stats.inactive_sessions > 0 {
        lines.push(format!("- Tracker inactive: {}", stats.inactive_sessions));
    }
    lines.push(format!("Events forwarded: {}", stats.total_events));

    let mut categories: Vec<_> = stats.summary.by_category.iter().collect();
    categories.sort_by_key(|(_, count)| std::cmp::Reverse(**count));
    for (category, count) in categories {
        lines.push(format!("- {} {}: {}", category.emoji(), category, count));
    }

    if stats.dropped_events > 0 || stats.failed_events > 0 {
        lines.push(format!(
            "Not delivered: {} dropped (no sink), {} failed",
            stats.dropped_events, stats.failed_events
        ));
    }
    lines.push(format!("Average active time: {:.1}s", stats.avg_active_secs));
    lines.push(format!(
        "Average max scroll: {:.0}%",
        stats.avg_max_scroll_percent
    ));
    if let Some(load) = stats.avg_page_load_ms {
        lines.push(format!("Average page load: {:.0}ms", load));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventCategory, EventParams, PageEnvironment};
    use crate::tracker::{DeviceInfo, EmitStats, TrackerSnapshot};
    use serde_json::json;

    fn event(name: &str, value: f64) -> AnalyticsEvent {
        AnalyticsEvent {
            name: name.to_string(),
            category: EventCategory::Engagement,
            value,
            timestamp_ms: 0,
            params: EventParams::new(),
        }
    }

    fn section(id: &str) -> AnalyticsEvent {
        let mut e = event("section_view", 100.0);
        e.params.insert("section_id".to_string(), json!(id));
        e
    }

    fn outcome(clicks: &[(&str, u64)], active_ms: u64, load: Option<f64>) -> SessionOutcome {
        let page = PageEnvironment::new("example.com");
        let snapshot = TrackerSnapshot {
            hostname: page.hostname.clone(),
            elapsed_ms: active_ms,
            page_load_ms: load,
            sections_viewed: vec![],
            scroll_thresholds: BTreeMap::new(),
            max_scroll_percent: 50.0,
            active_time_ms: active_ms,
            visible: true,
            total_clicks: clicks.iter().map(|(_, c)| c).sum(),
            service_clicks: clicks.iter().map(|(s, c)| (s.to_string(), *c)).collect(),
            device: DeviceInfo::capture(&page.device).unwrap(),
            stats: EmitStats {
                emitted: 1,
                dropped: 0,
                failed: 1,
            },
            unloaded: true,
        };
        SessionOutcome {
            source: "t.json".to_string(),
            page,
            snapshot: Some(snapshot),
            debug_snapshot: None,
            events: vec![event("page_load", 900.0)],
            signals_processed: 1,
            duration_ms: active_ms,
        }
    }

    #[test]
    fn test_scroll_and_sections() {
        let events = vec![
            event("scroll_depth", 25.0),
            section("pricing"),
            event("scroll_depth", 75.0),
            section("faq"),
        ];
        assert_eq!(scroll_depth_reached(&events), Some(75));
        assert_eq!(sections_in_view_order(&events), vec!["pricing", "faq"]);
        assert_eq!(scroll_depth_reached(&[]), None);
    }

    #[test]
    fn test_rate_vital() {
        assert_eq!(rate_vital("largest_contentful_paint", 2400.0), Some(VitalRating::Good));
        assert_eq!(
            rate_vital("first_input_delay", 250.0),
            Some(VitalRating::NeedsImprovement)
        );
        assert_eq!(rate_vital("cumulative_layout_shift", 0.4), Some(VitalRating::Poor));
        assert_eq!(rate_vital("scroll_depth", 50.0), None);

        let events = vec![event("first_contentful_paint", 900.0), event("page_load", 1.0)];
        assert_eq!(vitals(&events).len(), 1);
    }

    #[test]
    fn test_top_services() {
        let outcomes = vec![
            outcome(&[("audit", 2), ("training", 1)], 1000, None),
            outcome(&[("training", 4), ("consulting", 2)], 1000, None),
        ];
        let top = top_services(&outcomes, 2);
        assert_eq!(
            top,
            vec![("training".to_string(), 5), ("audit".to_string(), 2)]
        );
    }

    #[test]
    fn test_aggregate_sessions() {
        let mut inactive = outcome(&[], 0, None);
        inactive.snapshot = None;
        let outcomes = vec![
            outcome(&[("audit", 2)], 10_000, Some(800.0)),
            outcome(&[("audit", 1)], 20_000, None),
            inactive,
        ];

        let stats = aggregate_sessions(&outcomes);
        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.inactive_sessions, 1);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.total_clicks, 3);
        assert_eq!(stats.failed_events, 2);
        assert!((stats.avg_active_secs - 15.0).abs() < 1e-9);
        assert_eq!(stats.avg_page_load_ms, Some(800.0));
        assert_eq!(stats.summary.count("page_load"), 3);

        let text = generate_summary_text(&stats);
        assert!(text.contains("Sessions: 3"));
        assert!(text.contains("Tracker inactive: 1"));
        assert!(text.contains("Average page load: 800ms"));
    }
}
