//! Data models for page telemetry.
//!
//! This module contains the core data structures shared by the tracker,
//! the session drivers and the report: outbound analytics events, the
//! host signals standing in for browser callbacks, and the page
//! environment captured when the tracker is installed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Category attached to every outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Scroll depth, section views, visibility and active time
    Engagement,
    /// Clicks on tracked elements
    Interaction,
    /// Page load, long tasks, memory
    Performance,
    /// Core web vitals (LCP, FID, CLS, FCP)
    WebVitals,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCategory::Engagement => write!(f, "engagement"),
            EventCategory::Interaction => write!(f, "interaction"),
            EventCategory::Performance => write!(f, "performance"),
            EventCategory::WebVitals => write!(f, "web_vitals"),
        }
    }
}

impl EventCategory {
    /// Returns an emoji representation of the category.
    pub fn emoji(&self) -> &'static str {
        match self {
            EventCategory::Engagement => "📜",
            EventCategory::Interaction => "👆",
            EventCategory::Performance => "⏱️",
            EventCategory::WebVitals => "💓",
        }
    }
}

/// Auxiliary key/value attributes of an event.
pub type EventParams = BTreeMap<String, Value>;

/// A single labeled event forwarded to the analytics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Event name (e.g. `scroll_depth`).
    pub name: String,
    /// Event category.
    pub category: EventCategory,
    /// Numeric value carried by the event.
    pub value: f64,
    /// Milliseconds since the tracker was installed.
    pub timestamp_ms: u64,
    /// Extra parameters, device metadata included.
    #[serde(default)]
    pub params: EventParams,
}

impl AnalyticsEvent {
    /// Look up a parameter by key.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Look up a string parameter by key.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Counts of emitted events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    /// Total number of events.
    pub total: usize,
    /// Events per category.
    pub by_category: BTreeMap<EventCategory, usize>,
    /// Events per name.
    pub by_name: BTreeMap<String, usize>,
}

impl EventSummary {
    /// Creates a summary from a list of events.
    pub fn from_events(events: &[AnalyticsEvent]) -> Self {
        let mut summary = Self {
            total: events.len(),
            ..Self::default()
        };

        for event in events {
            *summary.by_category.entry(event.category).or_insert(0) += 1;
            *summary.by_name.entry(event.name.clone()).or_insert(0) += 1;
        }

        summary
    }

    pub fn count(&self, name: &str) -> usize {
        self.by_name.get(name).copied().unwrap_or(0)
    }
}

/// A DOM element the user clicked, reduced to the markers the tracker reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementRef {
    /// Tag name, lowercase (`a`, `button`, ...).
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Service marker (`data-service` on the page).
    #[serde(default)]
    pub service: Option<String>,
    /// Enclosing section marker, if any.
    #[serde(default)]
    pub section: Option<String>,
    /// Link target for anchors.
    #[serde(default)]
    pub href: Option<String>,
}

/// A memory reading as exposed by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

/// Entries delivered by the host's performance observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry_type", rename_all = "snake_case")]
pub enum PerformanceEntry {
    Navigation {
        load_event_end_ms: f64,
    },
    Paint {
        name: String,
        start_time_ms: f64,
    },
    LargestContentfulPaint {
        render_time_ms: f64,
    },
    FirstInput {
        start_time_ms: f64,
        processing_start_ms: f64,
    },
    LayoutShift {
        value: f64,
        #[serde(default)]
        had_recent_input: bool,
    },
    LongTask {
        duration_ms: f64,
    },
}

/// One host callback, as delivered to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostSignal {
    PageLoad {
        duration_ms: f64,
    },
    Scroll {
        scroll_y: f64,
        viewport_height: f64,
        document_height: f64,
    },
    Click {
        element: ElementRef,
    },
    Visibility {
        hidden: bool,
    },
    Section {
        section_id: String,
        ratio: f64,
    },
    Performance {
        entry: PerformanceEntry,
    },
    Memory {
        sample: MemorySample,
    },
    Unload,
}

impl HostSignal {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HostSignal::PageLoad { .. } => "page_load",
            HostSignal::Scroll { .. } => "scroll",
            HostSignal::Click { .. } => "click",
            HostSignal::Visibility { .. } => "visibility",
            HostSignal::Section { .. } => "section",
            HostSignal::Performance { .. } => "performance",
            HostSignal::Memory { .. } => "memory",
            HostSignal::Unload => "unload",
        }
    }
}

/// A host signal stamped with its offset from the start of the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSignal {
    pub at_ms: u64,
    #[serde(flatten)]
    pub signal: HostSignal,
}

/// Raw device and viewport attributes reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    #[serde(default)]
    pub user_agent: String,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_screen_width")]
    pub screen_width: u32,
    #[serde(default = "default_screen_height")]
    pub screen_height: u32,
    #[serde(default = "default_pixel_ratio")]
    pub device_pixel_ratio: f64,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub platform: String,
    /// Effective connection type (`4g`, `3g`, ...) when the host exposes it.
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub touch: bool,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            device_pixel_ratio: default_pixel_ratio(),
            language: default_language(),
            platform: String::new(),
            connection: None,
            touch: false,
        }
    }
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_screen_width() -> u32 {
    1920
}

fn default_screen_height() -> u32 {
    1080
}

fn default_pixel_ratio() -> f64 {
    1.0
}

fn default_language() -> String {
    "en-US".to_string()
}

/// The page the tracker is installed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEnvironment {
    pub hostname: String,
    #[serde(default)]
    pub url: String,
    /// True when the page was opened in a background tab.
    #[serde(default)]
    pub initially_hidden: bool,
    #[serde(default)]
    pub device: DeviceProfile,
}

impl PageEnvironment {
    /// Environment for `hostname` with default device attributes.
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            url: format!("https://{}/", hostname),
            hostname,
            initially_hidden: false,
            device: DeviceProfile::default(),
        }
    }
}
