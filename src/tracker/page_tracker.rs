//! The page tracker.
//!
//! One [`PageTracker`] lives for one page load. Each `on_*` method is the
//! body of one host listener: it reads the signal, updates a threshold or
//! counter in the page-local state, and emits through [`PageTracker::emit`].
//! Duplicate reporting is prevented only by the state's flags and sets.

use crate::config::TrackerConfig;
use crate::models::{
    AnalyticsEvent, ElementRef, EventCategory, EventParams, HostSignal, MemorySample,
    PageEnvironment, PerformanceEntry,
};
use crate::tracker::clock::TimeSource;
use crate::tracker::device::DeviceInfo;
use crate::tracker::error::TrackerError;
use crate::tracker::sink::EventSink;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Outcome counters for the single outbound call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitStats {
    /// Accepted by the sink.
    pub emitted: u64,
    /// Dropped because no sink was installed.
    pub dropped: u64,
    /// Rejected by the sink.
    pub failed: u64,
}

/// Serializable copy of the tracker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub hostname: String,
    pub elapsed_ms: u64,
    pub page_load_ms: Option<f64>,
    /// Section ids in the order they were first viewed.
    pub sections_viewed: Vec<String>,
    pub scroll_thresholds: BTreeMap<u32, bool>,
    pub max_scroll_percent: f64,
    pub active_time_ms: u64,
    pub visible: bool,
    pub total_clicks: u64,
    pub service_clicks: BTreeMap<String, u64>,
    pub device: DeviceInfo,
    pub stats: EmitStats,
    pub unloaded: bool,
}

#[derive(Debug, Default)]
struct VitalsState {
    lcp_candidate_ms: Option<f64>,
    cls: f64,
    cls_observed: bool,
    fid_reported: bool,
    fcp_reported: bool,
    flushed: bool,
}

#[derive(Debug)]
struct TrackerState {
    started_at_ms: u64,
    page_load_ms: Option<f64>,
    sections_seen: HashSet<String>,
    section_order: Vec<String>,
    scroll_thresholds: BTreeMap<u32, bool>,
    max_scroll_percent: f64,
    active_time_ms: u64,
    visible_since_ms: Option<u64>,
    milestones: BTreeMap<u64, bool>,
    total_clicks: u64,
    service_clicks: BTreeMap<String, u64>,
    device: DeviceInfo,
    vitals: VitalsState,
    stats: EmitStats,
    unloaded: bool,
}

/// Page-lifetime aggregator wired to one clock and one sink.
pub struct PageTracker {
    config: TrackerConfig,
    page: PageEnvironment,
    clock: Box<dyn TimeSource>,
    sink: Option<Box<dyn EventSink>>,
    device_params: EventParams,
    state: TrackerState,
}

impl PageTracker {
    /// Validate the configuration, snapshot the device and start the clock.
    ///
    /// `sink` may be `None`; events are then dropped with a warning.
    pub fn new(
        config: TrackerConfig,
        page: PageEnvironment,
        clock: Box<dyn TimeSource>,
        sink: Option<Box<dyn EventSink>>,
    ) -> Result<Self, TrackerError> {
        validate_config(&config)?;
        if page.hostname.trim().is_empty() {
            return Err(TrackerError::MissingHostname);
        }

        let device = DeviceInfo::capture(&page.device)?;
        let device_params = device.to_params();

        let scroll_thresholds = config
            .scroll_thresholds
            .iter()
            .map(|threshold| (*threshold, false))
            .collect();
        let milestones = config
            .engagement_milestones_secs
            .iter()
            .filter(|secs| **secs > 0)
            .map(|secs| (*secs, false))
            .collect();

        let state = TrackerState {
            started_at_ms: clock.now_ms(),
            page_load_ms: None,
            sections_seen: HashSet::new(),
            section_order: Vec::new(),
            scroll_thresholds,
            max_scroll_percent: 0.0,
            active_time_ms: 0,
            visible_since_ms: if page.initially_hidden { None } else { Some(0) },
            milestones,
            total_clicks: 0,
            service_clicks: BTreeMap::new(),
            device,
            vitals: VitalsState::default(),
            stats: EmitStats::default(),
            unloaded: false,
        };

        debug!(
            "Tracker installed on {} ({} device, sink: {})",
            page.hostname,
            state.device.class,
            sink.as_ref().map(|s| s.name()).unwrap_or("none")
        );

        Ok(Self {
            config,
            page,
            clock,
            sink,
            device_params,
            state,
        })
    }

    pub fn page(&self) -> &PageEnvironment {
        &self.page
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_unloaded(&self) -> bool {
        self.state.unloaded
    }

    /// Route a host signal to its listener.
    ///
    /// Memory readings are ambient host state read by the memory timer,
    /// so they are not handled here.
    pub fn dispatch(&mut self, signal: &HostSignal) {
        match signal {
            HostSignal::PageLoad { duration_ms } => self.on_page_load(*duration_ms),
            HostSignal::Scroll {
                scroll_y,
                viewport_height,
                document_height,
            } => self.on_scroll(*scroll_y, *viewport_height, *document_height),
            HostSignal::Click { element } => self.on_click(element),
            HostSignal::Visibility { hidden } => self.on_visibility_change(*hidden),
            HostSignal::Section { section_id, ratio } => {
                self.on_section_intersect(section_id, *ratio)
            }
            HostSignal::Performance { entry } => self.on_performance_entry(entry),
            HostSignal::Memory { .. } => {
                debug!("Memory reading noted by host; sampled on the memory timer")
            }
            HostSignal::Unload => self.on_unload(),
        }
    }

    /// Record the page-load duration once.
    pub fn on_page_load(&mut self, duration_ms: f64) {
        if self.state.unloaded || self.state.page_load_ms.is_some() {
            return;
        }
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            debug!("Ignoring invalid page load duration {}", duration_ms);
            return;
        }

        self.state.page_load_ms = Some(duration_ms);
        self.emit(
            "page_load",
            EventCategory::Performance,
            duration_ms.round(),
            EventParams::new(),
        );
    }

    /// Report every not-yet-reported threshold the scroll position has reached.
    pub fn on_scroll(&mut self, scroll_y: f64, viewport_height: f64, document_height: f64) {
        if self.state.unloaded {
            return;
        }
        if !(document_height > 0.0) || !scroll_y.is_finite() || !viewport_height.is_finite() {
            debug!("Ignoring scroll with unusable geometry");
            return;
        }

        let percent = ((scroll_y + viewport_height) / document_height * 100.0).clamp(0.0, 100.0);
        if percent > self.state.max_scroll_percent {
            self.state.max_scroll_percent = percent;
        }

        // BTreeMap iteration keeps the crossings in ascending order.
        let crossed: Vec<u32> = self
            .state
            .scroll_thresholds
            .iter()
            .filter(|(threshold, reported)| !**reported && f64::from(**threshold) <= percent)
            .map(|(threshold, _)| *threshold)
            .collect();

        for threshold in crossed {
            self.state.scroll_thresholds.insert(threshold, true);

            let mut params = EventParams::new();
            params.insert("percent_scrolled".to_string(), json!(percent.round() as u32));
            self.emit(
                "scroll_depth",
                EventCategory::Engagement,
                f64::from(threshold),
                params,
            );
        }
    }

    /// Report a section the first time enough of it intersects the viewport.
    pub fn on_section_intersect(&mut self, section_id: &str, ratio: f64) {
        if self.state.unloaded || section_id.is_empty() {
            return;
        }
        if !(ratio >= self.config.section_visibility_ratio) {
            return;
        }
        if !self.state.sections_seen.insert(section_id.to_string()) {
            return;
        }
        self.state.section_order.push(section_id.to_string());

        let mut params = EventParams::new();
        params.insert("section_id".to_string(), json!(section_id));
        let elapsed = self.elapsed_ms() as f64;
        self.emit("section_view", EventCategory::Engagement, elapsed, params);
    }

    /// Count the click; report service actions and outbound links.
    pub fn on_click(&mut self, element: &ElementRef) {
        if self.state.unloaded {
            return;
        }
        self.state.total_clicks += 1;

        if let Some(service) = element.service.as_deref().filter(|s| !s.is_empty()) {
            let count = {
                let entry = self
                    .state
                    .service_clicks
                    .entry(service.to_string())
                    .or_insert(0);
                *entry += 1;
                *entry
            };

            let mut params = EventParams::new();
            params.insert("service".to_string(), json!(service));
            params.insert("total_clicks".to_string(), json!(self.state.total_clicks));
            if let Some(ref section) = element.section {
                params.insert("section_id".to_string(), json!(section));
            }
            self.emit(
                "service_click",
                EventCategory::Interaction,
                count as f64,
                params,
            );
            return;
        }

        let Some(href) = element.href.as_deref() else {
            return;
        };
        let Some(host) = link_host(href, &self.page.url) else {
            return;
        };
        if host.eq_ignore_ascii_case(self.page.hostname.trim_end_matches('.')) {
            return;
        }

        let mut params = EventParams::new();
        params.insert("href".to_string(), json!(href));
        params.insert("link_host".to_string(), json!(host));
        let total = self.state.total_clicks as f64;
        self.emit("outbound_click", EventCategory::Interaction, total, params);
    }

    /// Pause or resume active time with the page's visibility.
    pub fn on_visibility_change(&mut self, hidden: bool) {
        if self.state.unloaded {
            return;
        }
        let now = self.elapsed_ms();

        match (hidden, self.state.visible_since_ms) {
            (true, Some(since)) => {
                self.state.active_time_ms += now.saturating_sub(since);
                self.state.visible_since_ms = None;
                self.emit_visibility("hidden");
                self.check_milestones();
                self.flush_vitals();
            }
            (false, None) => {
                self.state.visible_since_ms = Some(now);
                self.emit_visibility("visible");
            }
            _ => debug!("Ignoring repeated visibility state (hidden: {})", hidden),
        }
    }

    /// Active-time timer callback.
    pub fn on_active_tick(&mut self) {
        if self.state.unloaded {
            return;
        }
        let Some(since) = self.state.visible_since_ms else {
            return;
        };

        let now = self.elapsed_ms();
        self.state.active_time_ms += now.saturating_sub(since);
        self.state.visible_since_ms = Some(now);
        self.check_milestones();
    }

    /// Memory timer callback; hosts without a memory API pass `None`.
    pub fn on_memory_tick(&mut self, sample: Option<MemorySample>) {
        if self.state.unloaded {
            return;
        }
        let Some(sample) = sample else {
            return;
        };

        let used_mb = sample.used_bytes as f64 / BYTES_PER_MIB;
        let mut params = EventParams::new();
        params.insert(
            "total_mb".to_string(),
            json!(round_to(sample.total_bytes as f64 / BYTES_PER_MIB, 1)),
        );
        params.insert(
            "limit_mb".to_string(),
            json!(round_to(sample.limit_bytes as f64 / BYTES_PER_MIB, 1)),
        );
        if sample.limit_bytes > 0 {
            params.insert(
                "usage_ratio".to_string(),
                json!(round_to(
                    sample.used_bytes as f64 / sample.limit_bytes as f64,
                    3
                )),
            );
        }
        self.emit(
            "memory_usage",
            EventCategory::Performance,
            round_to(used_mb, 1),
            params,
        );
    }

    /// Performance observer callback.
    pub fn on_performance_entry(&mut self, entry: &PerformanceEntry) {
        if self.state.unloaded {
            return;
        }

        match entry {
            PerformanceEntry::Navigation { load_event_end_ms } => {
                self.on_page_load(*load_event_end_ms)
            }
            PerformanceEntry::Paint {
                name,
                start_time_ms,
            } => {
                if name == "first-contentful-paint" && !self.state.vitals.fcp_reported {
                    self.state.vitals.fcp_reported = true;
                    self.emit(
                        "first_contentful_paint",
                        EventCategory::WebVitals,
                        start_time_ms.round(),
                        EventParams::new(),
                    );
                }
            }
            PerformanceEntry::LargestContentfulPaint { render_time_ms } => {
                if !self.state.vitals.flushed {
                    self.state.vitals.lcp_candidate_ms = Some(*render_time_ms);
                }
            }
            PerformanceEntry::FirstInput {
                start_time_ms,
                processing_start_ms,
            } => {
                if !self.state.vitals.fid_reported {
                    self.state.vitals.fid_reported = true;
                    let delay = (processing_start_ms - start_time_ms).max(0.0);
                    self.emit(
                        "first_input_delay",
                        EventCategory::WebVitals,
                        round_to(delay, 1),
                        EventParams::new(),
                    );
                }
            }
            PerformanceEntry::LayoutShift {
                value,
                had_recent_input,
            } => {
                if !had_recent_input && !self.state.vitals.flushed && value.is_finite() {
                    self.state.vitals.cls += value;
                    self.state.vitals.cls_observed = true;
                }
            }
            PerformanceEntry::LongTask { duration_ms } => {
                if *duration_ms >= self.config.long_task_threshold_ms {
                    self.emit(
                        "long_task",
                        EventCategory::Performance,
                        duration_ms.round(),
                        EventParams::new(),
                    );
                }
            }
        }
    }

    /// Close the session: fold active time, flush vitals, send the summary.
    ///
    /// Every listener is a no-op afterwards.
    pub fn on_unload(&mut self) {
        if self.state.unloaded {
            return;
        }

        let now = self.elapsed_ms();
        if let Some(since) = self.state.visible_since_ms.take() {
            self.state.active_time_ms += now.saturating_sub(since);
        }
        self.check_milestones();
        self.flush_vitals();

        let mut params = EventParams::new();
        params.insert("total_clicks".to_string(), json!(self.state.total_clicks));
        params.insert(
            "max_scroll_percent".to_string(),
            json!(self.state.max_scroll_percent.round() as u32),
        );
        params.insert(
            "sections_viewed".to_string(),
            json!(self.state.section_order.len()),
        );
        params.insert(
            "service_clicks".to_string(),
            json!(self.state.service_clicks),
        );
        if let Some(load) = self.state.page_load_ms {
            params.insert("page_load_ms".to_string(), json!(load.round()));
        }
        let active_secs = round_to(self.state.active_time_ms as f64 / 1000.0, 1);
        self.emit("session_end", EventCategory::Engagement, active_secs, params);

        self.state.unloaded = true;
        debug!("Tracker on {} unloaded", self.page.hostname);
    }

    /// Copy of the current state; active time includes the open visible interval.
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            hostname: self.page.hostname.clone(),
            elapsed_ms: self.elapsed_ms(),
            page_load_ms: self.state.page_load_ms,
            sections_viewed: self.state.section_order.clone(),
            scroll_thresholds: self.state.scroll_thresholds.clone(),
            max_scroll_percent: self.state.max_scroll_percent,
            active_time_ms: self.current_active_ms(),
            visible: self.state.visible_since_ms.is_some(),
            total_clicks: self.state.total_clicks,
            service_clicks: self.state.service_clicks.clone(),
            device: self.state.device.clone(),
            stats: self.state.stats,
            unloaded: self.state.unloaded,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.state.started_at_ms)
    }

    fn current_active_ms(&self) -> u64 {
        match self.state.visible_since_ms {
            Some(since) => self.state.active_time_ms + self.elapsed_ms().saturating_sub(since),
            None => self.state.active_time_ms,
        }
    }

    fn emit_visibility(&mut self, state: &str) {
        let mut params = EventParams::new();
        params.insert("state".to_string(), json!(state));
        let active_secs = round_to(self.state.active_time_ms as f64 / 1000.0, 1);
        self.emit(
            "visibility_change",
            EventCategory::Engagement,
            active_secs,
            params,
        );
    }

    fn check_milestones(&mut self) {
        let active_secs = self.state.active_time_ms / 1000;
        let reached: Vec<u64> = self
            .state
            .milestones
            .iter()
            .filter(|(secs, reported)| !**reported && **secs <= active_secs)
            .map(|(secs, _)| *secs)
            .collect();

        for secs in reached {
            self.state.milestones.insert(secs, true);
            let mut params = EventParams::new();
            params.insert("milestone".to_string(), json!(format!("{}s", secs)));
            self.emit(
                "engagement_milestone",
                EventCategory::Engagement,
                secs as f64,
                params,
            );
        }
    }

    /// Report the buffered LCP and CLS values once.
    fn flush_vitals(&mut self) {
        if self.state.vitals.flushed {
            return;
        }
        self.state.vitals.flushed = true;

        if let Some(lcp) = self.state.vitals.lcp_candidate_ms {
            self.emit(
                "largest_contentful_paint",
                EventCategory::WebVitals,
                lcp.round(),
                EventParams::new(),
            );
        }
        if self.state.vitals.cls_observed {
            let cls = round_to(self.state.vitals.cls, 4);
            self.emit(
                "cumulative_layout_shift",
                EventCategory::WebVitals,
                cls,
                EventParams::new(),
            );
        }
    }

    /// The single outbound call. Never fails; problems are logged and counted.
    fn emit(&mut self, name: &str, category: EventCategory, value: f64, params: EventParams) {
        let mut merged = self.device_params.clone();
        merged.extend(params);

        let event = AnalyticsEvent {
            name: name.to_string(),
            category,
            value,
            timestamp_ms: self.elapsed_ms(),
            params: merged,
        };

        match self.sink {
            Some(ref mut sink) => match sink.send(&event) {
                Ok(()) => {
                    self.state.stats.emitted += 1;
                    debug!("Emitted {} ({}) = {}", name, category, value);
                }
                Err(e) => {
                    self.state.stats.failed += 1;
                    warn!("Failed to send {} event to {} sink: {}", name, sink.name(), e);
                }
            },
            None => {
                self.state.stats.dropped += 1;
                warn!("Analytics sink not available; dropping {} event", name);
            }
        }
    }
}

fn validate_config(config: &TrackerConfig) -> Result<(), TrackerError> {
    if config.scroll_thresholds.is_empty() {
        return Err(TrackerError::NoScrollThresholds);
    }
    if let Some(bad) = config
        .scroll_thresholds
        .iter()
        .find(|t| !(1..=100).contains(*t))
    {
        return Err(TrackerError::ScrollThresholdOutOfRange(*bad));
    }
    if config.active_tick_interval_ms == 0 {
        return Err(TrackerError::ZeroInterval {
            name: "active tick",
        });
    }
    if config.memory_sample_interval_ms == 0 {
        return Err(TrackerError::ZeroInterval {
            name: "memory sample",
        });
    }
    let ratio = config.section_visibility_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(TrackerError::InvalidVisibilityRatio(ratio));
    }
    Ok(())
}

/// Lowercase host of an absolute or protocol-relative http(s) link.
///
/// Protocol-relative links take the scheme of `page_url`, or `https` when
/// the page URL does not parse. A trailing root dot is dropped.
fn link_host(href: &str, page_url: &str) -> Option<String> {
    let url = if href.starts_with("//") {
        match Url::parse(page_url) {
            Ok(base) => base.join(href).ok()?,
            Err(_) => Url::parse(&format!("https:{}", href)).ok()?,
        }
    } else {
        Url::parse(href).ok()?
    };

    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let host = url.host_str()?.trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
