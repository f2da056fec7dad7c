//! Deterministic replay of recorded traces.
//!
//! Replay drives the tracker on a [`ManualClock`]: before each signal the
//! clock walks through every timer boundary up to the signal's timestamp,
//! firing the active-time and memory timers in order, then jumps to the
//! signal and dispatches it. A trace that ends without an unload is closed
//! with one at its last timestamp.

use crate::config::TrackerConfig;
use crate::models::{AnalyticsEvent, HostSignal, MemorySample, PageEnvironment};
use crate::session::trace::Trace;
use crate::tracker::{
    EventLog, EventSink, ManualClock, RecordingSink, TrackerHandle, TrackerSnapshot,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Everything one session produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// Trace path, or `stdin` for live sessions.
    pub source: String,
    pub page: PageEnvironment,
    /// Final tracker state; `None` when the tracker was inactive.
    pub snapshot: Option<TrackerSnapshot>,
    /// Present only for debug hostnames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_snapshot: Option<TrackerSnapshot>,
    /// Events the sink accepted, in emission order.
    pub events: Vec<AnalyticsEvent>,
    pub signals_processed: usize,
    pub duration_ms: u64,
}

impl SessionOutcome {
    pub fn tracker_active(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Fixed-period timer on the replay clock.
#[derive(Debug)]
struct ReplayTimer {
    period_ms: u64,
    next_due_ms: u64,
}

impl ReplayTimer {
    fn new(period_ms: u64) -> Self {
        let period_ms = period_ms.max(1);
        Self {
            period_ms,
            next_due_ms: period_ms,
        }
    }

    fn fire(&mut self) -> u64 {
        let due = self.next_due_ms;
        self.next_due_ms += self.period_ms;
        due
    }
}

/// Wrap the sink so the session keeps a copy of what it accepted.
pub(crate) fn recording(
    sink: Option<Box<dyn EventSink>>,
) -> (Option<Box<dyn EventSink>>, EventLog) {
    match sink {
        Some(inner) => {
            let (recording, log) = RecordingSink::wrapping(inner);
            (Some(Box::new(recording)), log)
        }
        None => (None, EventLog::default()),
    }
}

/// Replay one trace through a fresh tracker.
pub fn replay(
    trace: &Trace,
    source: &str,
    config: &TrackerConfig,
    sink: Option<Box<dyn EventSink>>,
) -> SessionOutcome {
    let mut signals = trace.signals.clone();
    if !trace.is_sorted() {
        warn!("{}: signals are out of order; sorting by timestamp", source);
        signals.sort_by_key(|s| s.at_ms);
    }

    let clock = ManualClock::new(0);
    let (sink, log) = recording(sink);
    let mut handle = TrackerHandle::install(config, &trace.page, Box::new(clock.clone()), sink);

    let mut active_timer = ReplayTimer::new(config.active_tick_interval_ms);
    let mut memory_timer = ReplayTimer::new(config.memory_sample_interval_ms);
    let mut host_memory: Option<MemorySample> = None;
    let mut processed = 0;

    for timed in &signals {
        if handle.is_finished() {
            debug!("{}: page unloaded; ignoring remaining signals", source);
            break;
        }

        // Timers due at or before this signal fire first, earliest first.
        loop {
            let next = active_timer.next_due_ms.min(memory_timer.next_due_ms);
            if next > timed.at_ms {
                break;
            }
            if active_timer.next_due_ms <= memory_timer.next_due_ms {
                clock.set(active_timer.fire());
                handle.on_active_tick();
            } else {
                clock.set(memory_timer.fire());
                handle.on_memory_tick(host_memory);
            }
        }

        clock.set(timed.at_ms);
        if let HostSignal::Memory { sample } = timed.signal {
            host_memory = Some(sample);
        }
        handle.dispatch(&timed.signal);
        processed += 1;
    }

    // A recording that stops without an unload ends like the page going away.
    if !handle.is_finished() {
        debug!("{}: trace has no unload; closing the session", source);
        handle.dispatch(&HostSignal::Unload);
    }

    let snapshot = handle.snapshot();
    let debug_snapshot = handle.debug_snapshot();
    info!(
        "{}: replayed {} signals, {} events accepted",
        source,
        processed,
        log.len()
    );

    SessionOutcome {
        source: source.to_string(),
        page: trace.page.clone(),
        snapshot,
        debug_snapshot,
        events: log.events(),
        signals_processed: processed,
        duration_ms: trace.duration_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementRef, TimedSignal};
    use crate::tracker::sink::tests::FailingSink;
    use crate::tracker::sink::LogSink;

    fn at(at_ms: u64, signal: HostSignal) -> TimedSignal {
        TimedSignal { at_ms, signal }
    }

    fn scroll(percent: f64) -> HostSignal {
        HostSignal::Scroll {
            scroll_y: percent * 100.0 - 1000.0,
            viewport_height: 1000.0,
            document_height: 10_000.0,
        }
    }

    fn trace(hostname: &str, signals: Vec<TimedSignal>) -> Trace {
        Trace {
            page: PageEnvironment::new(hostname),
            signals,
        }
    }

    fn names(outcome: &SessionOutcome, name: &str) -> Vec<f64> {
        outcome
            .events
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.value)
            .collect()
    }

    #[test]
    fn test_replay_oscillating_scroll() {
        let trace = trace(
            "example.com",
            vec![
                at(1_000, scroll(40.0)),
                at(2_000, scroll(92.0)),
                at(3_000, scroll(10.0)),
                at(4_000, scroll(95.0)),
                at(5_000, HostSignal::Unload),
            ],
        );

        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), Some(Box::new(LogSink)));
        assert_eq!(names(&outcome, "scroll_depth"), vec![25.0, 50.0, 75.0, 90.0]);
        assert_eq!(outcome.signals_processed, 5);
        assert!(outcome.tracker_active());
        assert!(outcome.debug_snapshot.is_none());
    }

    #[test]
    fn test_replay_active_time_follows_visibility() {
        let trace = trace(
            "example.com",
            vec![
                at(20_000, HostSignal::Visibility { hidden: true }),
                at(80_000, HostSignal::Visibility { hidden: false }),
                at(95_000, HostSignal::Unload),
            ],
        );

        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), Some(Box::new(LogSink)));
        let snapshot = outcome.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.active_time_ms, 35_000);
        assert_eq!(names(&outcome, "engagement_milestone"), vec![30.0]);
        assert_eq!(names(&outcome, "session_end"), vec![35.0]);
    }

    #[test]
    fn test_replay_memory_timer_reads_latest_sample() {
        let sample = |mb: u64| HostSignal::Memory {
            sample: MemorySample {
                used_bytes: mb * 1024 * 1024,
                total_bytes: 100 * 1024 * 1024,
                limit_bytes: 400 * 1024 * 1024,
            },
        };
        let trace = trace(
            "example.com",
            vec![
                at(10_000, sample(20)),
                at(45_000, sample(35)),
                at(95_000, HostSignal::Unload),
            ],
        );

        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), Some(Box::new(LogSink)));
        // Timer fires at 30s (20 MiB), 60s and 90s (35 MiB).
        assert_eq!(names(&outcome, "memory_usage"), vec![20.0, 35.0, 35.0]);
        let first = outcome
            .events
            .iter()
            .find(|e| e.name == "memory_usage")
            .unwrap();
        assert_eq!(first.timestamp_ms, 30_000);
    }

    #[test]
    fn test_replay_sorts_out_of_order_signals() {
        let section = |id: &str| HostSignal::Section {
            section_id: id.to_string(),
            ratio: 1.0,
        };
        let trace = trace(
            "example.com",
            vec![at(3_000, section("b")), at(1_000, section("a"))],
        );

        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), Some(Box::new(LogSink)));
        assert_eq!(
            outcome.snapshot.unwrap().sections_viewed,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_replay_stops_after_unload() {
        let click = HostSignal::Click {
            element: ElementRef {
                service: Some("audit".to_string()),
                ..ElementRef::default()
            },
        };
        let trace = trace(
            "example.com",
            vec![
                at(1_000, HostSignal::Unload),
                at(2_000, click.clone()),
                at(3_000, click),
            ],
        );

        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), Some(Box::new(LogSink)));
        assert_eq!(outcome.signals_processed, 1);
        assert!(names(&outcome, "service_click").is_empty());
    }

    #[test]
    fn test_replay_without_sink_records_nothing() {
        let trace = trace("example.com", vec![at(1_000, scroll(100.0))]);
        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), None);
        assert!(outcome.events.is_empty());
        // Four thresholds plus the closing session_end.
        assert_eq!(outcome.snapshot.unwrap().stats.dropped, 5);
    }

    #[test]
    fn test_replay_failing_sink_counts_failures() {
        let trace = trace("example.com", vec![at(1_000, scroll(100.0))]);
        let outcome = replay(
            &trace,
            "t.json",
            &TrackerConfig::default(),
            Some(Box::new(FailingSink)),
        );
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.snapshot.unwrap().stats.failed, 5);
    }

    #[test]
    fn test_replay_inactive_tracker() {
        let config = TrackerConfig {
            memory_sample_interval_ms: 0,
            ..TrackerConfig::default()
        };
        let trace = trace("example.com", vec![at(5_000, scroll(100.0))]);
        let outcome = replay(&trace, "t.json", &config, Some(Box::new(LogSink)));
        assert!(!outcome.tracker_active());
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.signals_processed, 0);
    }

    #[test]
    fn test_replay_debug_host_exposes_snapshot() {
        let trace = trace("localhost", vec![at(1_000, scroll(30.0))]);
        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), Some(Box::new(LogSink)));
        let debug = outcome.debug_snapshot.unwrap();
        assert_eq!(debug.scroll_thresholds.get(&25), Some(&true));
    }

    #[test]
    fn test_replay_without_unload_closes_session() {
        use crate::models::PerformanceEntry;

        let trace = trace(
            "example.com",
            vec![
                at(
                    500,
                    HostSignal::Performance {
                        entry: PerformanceEntry::LargestContentfulPaint {
                            render_time_ms: 1800.0,
                        },
                    },
                ),
                at(2_000, scroll(60.0)),
            ],
        );

        let outcome = replay(&trace, "t.json", &TrackerConfig::default(), Some(Box::new(LogSink)));
        assert_eq!(names(&outcome, "largest_contentful_paint"), vec![1800.0]);
        assert_eq!(names(&outcome, "session_end"), vec![2.0]);
        assert_eq!(outcome.signals_processed, 2);
        assert!(outcome.snapshot.unwrap().unloaded);
    }
}
