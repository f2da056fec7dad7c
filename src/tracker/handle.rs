//! Installation wrapper that degrades to a no-op tracker.
//!
//! Telemetry must never take the page down with it: if the tracker cannot
//! be built the handle logs why and stays inactive, swallowing every
//! callback.

use crate::config::TrackerConfig;
use crate::models::{HostSignal, MemorySample, PageEnvironment};
use crate::tracker::clock::TimeSource;
use crate::tracker::page_tracker::{PageTracker, TrackerSnapshot};
use crate::tracker::sink::EventSink;
use tracing::{error, info};

/// An installed tracker, or the inert stand-in left after a failed install.
pub enum TrackerHandle {
    Active(Box<PageTracker>),
    Inactive,
}

impl TrackerHandle {
    /// Build the tracker; never fails.
    pub fn install(
        config: &TrackerConfig,
        page: &PageEnvironment,
        clock: Box<dyn TimeSource>,
        sink: Option<Box<dyn EventSink>>,
    ) -> Self {
        if !config.enabled {
            info!("Tracking disabled by configuration");
            return TrackerHandle::Inactive;
        }

        match PageTracker::new(config.clone(), page.clone(), clock, sink) {
            Ok(tracker) => TrackerHandle::Active(Box::new(tracker)),
            Err(e) => {
                error!(
                    "Tracker failed to initialize on {}: {}; tracking disabled",
                    page.hostname, e
                );
                TrackerHandle::Inactive
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TrackerHandle::Active(_))
    }

    /// True once the page has unloaded, or if the tracker never installed.
    pub fn is_finished(&self) -> bool {
        match self {
            TrackerHandle::Active(tracker) => tracker.is_unloaded(),
            TrackerHandle::Inactive => true,
        }
    }

    pub fn dispatch(&mut self, signal: &HostSignal) {
        if let TrackerHandle::Active(tracker) = self {
            tracker.dispatch(signal);
        }
    }

    pub fn on_active_tick(&mut self) {
        if let TrackerHandle::Active(tracker) = self {
            tracker.on_active_tick();
        }
    }

    pub fn on_memory_tick(&mut self, sample: Option<MemorySample>) {
        if let TrackerHandle::Active(tracker) = self {
            tracker.on_memory_tick(sample);
        }
    }

    pub fn snapshot(&self) -> Option<TrackerSnapshot> {
        match self {
            TrackerHandle::Active(tracker) => Some(tracker.snapshot()),
            TrackerHandle::Inactive => None,
        }
    }

    /// State exposed for local development only.
    ///
    /// Returns `None` unless the page hostname is a configured debug host.
    pub fn debug_snapshot(&self) -> Option<TrackerSnapshot> {
        let TrackerHandle::Active(tracker) = self else {
            return None;
        };

        let hostname = &tracker.page().hostname;
        let is_debug_host = tracker
            .config()
            .debug_hostnames
            .iter()
            .any(|h| h.eq_ignore_ascii_case(hostname));

        if is_debug_host {
            Some(tracker.snapshot())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceProfile;
    use crate::tracker::clock::ManualClock;
    use crate::tracker::sink::RecordingSink;

    #[test]
    fn test_failed_install_degrades_to_inactive() {
        let mut page = PageEnvironment::new("example.com");
        page.device = DeviceProfile {
            viewport_height: 0,
            ..DeviceProfile::default()
        };
        let (sink, log) = RecordingSink::new();

        let mut handle = TrackerHandle::install(
            &TrackerConfig::default(),
            &page,
            Box::new(ManualClock::new(0)),
            Some(Box::new(sink)),
        );

        assert!(!handle.is_active());
        handle.dispatch(&HostSignal::PageLoad { duration_ms: 10.0 });
        handle.on_active_tick();
        handle.on_memory_tick(None);
        assert!(handle.snapshot().is_none());
        assert!(log.is_empty());
        assert!(handle.is_finished());
    }

    #[test]
    fn test_disabled_config_installs_nothing() {
        let config = TrackerConfig {
            enabled: false,
            ..TrackerConfig::default()
        };
        let handle = TrackerHandle::install(
            &config,
            &PageEnvironment::new("example.com"),
            Box::new(ManualClock::new(0)),
            None,
        );
        assert!(!handle.is_active());
    }

    #[test]
    fn test_debug_snapshot_only_on_debug_hosts() {
        let install = |host: &str| {
            TrackerHandle::install(
                &TrackerConfig::default(),
                &PageEnvironment::new(host),
                Box::new(ManualClock::new(0)),
                None,
            )
        };

        let public = install("example.com");
        assert!(public.snapshot().is_some());
        assert!(public.debug_snapshot().is_none());

        let local = install("LOCALHOST");
        let snapshot = local.debug_snapshot().unwrap();
        assert_eq!(snapshot.hostname, "LOCALHOST");
        assert!(!local.is_finished());
    }
}
