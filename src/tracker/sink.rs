//! Outbound event sinks.
//!
//! The tracker hands every event to a single [`EventSink`]. Sinks make no
//! delivery promises: a failed send is reported back to the tracker,
//! which logs it and moves on.

use crate::config::SinkConfig;
use crate::models::AnalyticsEvent;
use crate::tracker::error::SinkError;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination for tracker events.
pub trait EventSink {
    fn name(&self) -> &'static str;
    fn send(&mut self, event: &AnalyticsEvent) -> Result<(), SinkError>;
}

/// Sink selection for config and CLI.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Log each event through tracing (default)
    #[default]
    Log,
    /// Print each event to stdout as one JSON line
    Stdout,
    /// Append each event to an NDJSON file
    File,
    /// POST each event to a collector endpoint
    Http,
    /// No sink installed; events are dropped with a warning
    None,
}

/// Logs events at INFO level.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&mut self, event: &AnalyticsEvent) -> Result<(), SinkError> {
        info!(
            event = %event.name,
            category = %event.category,
            value = event.value,
            at_ms = event.timestamp_ms,
            "analytics event"
        );
        Ok(())
    }
}

/// Writes events to stdout as NDJSON.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn send(&mut self, event: &AnalyticsEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        Ok(())
    }
}

/// Appends events to an NDJSON file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: PathBuf) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Appending events to {}", path.display());
        Ok(Self { path, file })
    }
}

impl EventSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&mut self, event: &AnalyticsEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event)?;
        writeln!(self.file, "{}", line).map_err(|e| {
            SinkError::Unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

/// Queues events for the background HTTP delivery task.
#[derive(Debug, Clone)]
pub struct HttpSink {
    tx: UnboundedSender<AnalyticsEvent>,
}

impl EventSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&mut self, event: &AnalyticsEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|_| SinkError::Unavailable("http delivery task has stopped".to_string()))
    }
}

/// POST queued events one by one until every sender is gone.
///
/// Returns the number of events the collector accepted.
async fn deliver(
    client: reqwest::Client,
    endpoint: String,
    mut rx: UnboundedReceiver<AnalyticsEvent>,
) -> usize {
    let mut delivered = 0;

    while let Some(event) = rx.recv().await {
        match client.post(&endpoint).json(&event).send().await {
            Ok(response) if response.status().is_success() => delivered += 1,
            Ok(response) => {
                warn!(
                    "Collector rejected {} event: HTTP {}",
                    event.name,
                    response.status()
                );
            }
            Err(e) => warn!("Failed to deliver {} event: {}", event.name, e),
        }
    }

    debug!("HTTP delivery task finished ({} delivered)", delivered);
    delivered
}

/// Shared handle to the events a [`RecordingSink`] has accepted.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<AnalyticsEvent>>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Names of the recorded events, in emission order.
    pub fn names(&self) -> Vec<String> {
        self.events.borrow().iter().map(|e| e.name.clone()).collect()
    }

    fn push(&self, event: AnalyticsEvent) {
        self.events.borrow_mut().push(event);
    }
}

/// Keeps a copy of every event, optionally forwarding to another sink first.
///
/// An event is recorded only once the inner sink accepted it.
pub struct RecordingSink {
    inner: Option<Box<dyn EventSink>>,
    log: EventLog,
}

impl RecordingSink {
    /// A sink that only records.
    pub fn new() -> (Self, EventLog) {
        let log = EventLog::default();
        (
            Self {
                inner: None,
                log: log.clone(),
            },
            log,
        )
    }

    /// Record everything `inner` accepts.
    pub fn wrapping(inner: Box<dyn EventSink>) -> (Self, EventLog) {
        let log = EventLog::default();
        (
            Self {
                inner: Some(inner),
                log: log.clone(),
            },
            log,
        )
    }
}

impl EventSink for RecordingSink {
    fn name(&self) -> &'static str {
        match self.inner {
            Some(ref inner) => inner.name(),
            None => "recording",
        }
    }

    fn send(&mut self, event: &AnalyticsEvent) -> Result<(), SinkError> {
        if let Some(ref mut inner) = self.inner {
            inner.send(event)?;
        }
        self.log.push(event.clone());
        Ok(())
    }
}

/// Builds one sink per session from the sink configuration.
///
/// The HTTP sink shares a single delivery task across sessions; call
/// [`SinkFactory::finish`] to drain it before exiting.
pub struct SinkFactory {
    kind: SinkKind,
    events_file: Option<PathBuf>,
    http: Option<(UnboundedSender<AnalyticsEvent>, JoinHandle<usize>)>,
}

impl SinkFactory {
    /// Validate the configuration and start the HTTP delivery task if needed.
    ///
    /// The HTTP sink must be created inside a tokio runtime.
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let mut events_file = None;
        let mut http = None;

        match config.kind {
            SinkKind::File => {
                let path = config.events_file.as_ref().ok_or_else(|| {
                    SinkError::Unavailable("file sink needs an events file".to_string())
                })?;
                events_file = Some(PathBuf::from(path));
            }
            SinkKind::Http => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    SinkError::Unavailable("http sink needs an endpoint".to_string())
                })?;
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|e| SinkError::Unavailable(e.to_string()))?;
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.timeout_seconds))
                    .build()
                    .map_err(|e| SinkError::Unavailable(e.to_string()))?;

                let (tx, rx) = mpsc::unbounded_channel();
                info!("Forwarding events to {}", endpoint);
                let worker = runtime.spawn(deliver(client, endpoint, rx));
                http = Some((tx, worker));
            }
            SinkKind::Log | SinkKind::Stdout | SinkKind::None => {}
        }

        Ok(Self {
            kind: config.kind,
            events_file,
            http,
        })
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    /// Create the sink for one session. `None` means no sink is installed.
    pub fn make(&self) -> Result<Option<Box<dyn EventSink>>, SinkError> {
        let sink: Box<dyn EventSink> = match self.kind {
            SinkKind::Log => Box::new(LogSink),
            SinkKind::Stdout => Box::new(StdoutSink),
            SinkKind::File => {
                let path = self.events_file.clone().ok_or_else(|| {
                    SinkError::Unavailable("file sink needs an events file".to_string())
                })?;
                Box::new(FileSink::open(path)?)
            }
            SinkKind::Http => match self.http {
                Some((ref tx, _)) => Box::new(HttpSink { tx: tx.clone() }),
                None => {
                    return Err(SinkError::Unavailable(
                        "http delivery task was not started".to_string(),
                    ))
                }
            },
            SinkKind::None => return Ok(None),
        };
        Ok(Some(sink))
    }

    /// Close the HTTP queue and wait for queued events to be posted.
    ///
    /// Returns how many events the collector accepted, if an HTTP sink ran.
    pub async fn finish(self) -> Option<usize> {
        let (tx, worker) = self.http?;
        drop(tx);
        match worker.await {
            Ok(delivered) => Some(delivered),
            Err(e) => {
                warn!("HTTP delivery task failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{EventCategory, EventParams};

    /// Sink that rejects every event.
    pub(crate) struct FailingSink;

    impl EventSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn send(&mut self, _event: &AnalyticsEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("collector down".to_string()))
        }
    }

    fn sample_event(name: &str) -> AnalyticsEvent {
        AnalyticsEvent {
            name: name.to_string(),
            category: EventCategory::Engagement,
            value: 25.0,
            timestamp_ms: 1200,
            params: EventParams::new(),
        }
    }

    #[test]
    fn test_recording_sink_records_in_order() {
        let (mut sink, log) = RecordingSink::new();
        sink.send(&sample_event("scroll_depth")).unwrap();
        sink.send(&sample_event("section_view")).unwrap();
        assert_eq!(log.names(), vec!["scroll_depth", "section_view"]);
        assert_eq!(sink.name(), "recording");
    }

    #[test]
    fn test_recording_sink_skips_rejected_events() {
        let (mut sink, log) = RecordingSink::wrapping(Box::new(FailingSink));
        assert!(sink.send(&sample_event("scroll_depth")).is_err());
        assert!(log.is_empty());
        assert_eq!(sink.name(), "failing");
    }

    #[test]
    fn test_file_sink_appends_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        let mut sink = FileSink::open(path.clone()).unwrap();
        sink.send(&sample_event("scroll_depth")).unwrap();
        drop(sink);
        let mut sink = FileSink::open(path.clone()).unwrap();
        sink.send(&sample_event("page_load")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let names: Vec<String> = content
            .lines()
            .map(|line| serde_json::from_str::<AnalyticsEvent>(line).unwrap().name)
            .collect();
        assert_eq!(names, vec!["scroll_depth", "page_load"]);
    }

    #[test]
    fn test_http_sink_queues_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = HttpSink { tx };
        sink.send(&sample_event("page_load")).unwrap();
        assert_eq!(rx.try_recv().unwrap().name, "page_load");

        drop(rx);
        assert!(sink.send(&sample_event("page_load")).is_err());
    }

    #[test]
    fn test_factory_requires_destination() {
        let config = SinkConfig {
            kind: SinkKind::File,
            ..SinkConfig::default()
        };
        assert!(SinkFactory::new(&config).is_err());

        let config = SinkConfig {
            kind: SinkKind::Http,
            ..SinkConfig::default()
        };
        assert!(SinkFactory::new(&config).is_err());
    }

    #[test]
    fn test_factory_none_installs_no_sink() {
        let config = SinkConfig {
            kind: SinkKind::None,
            ..SinkConfig::default()
        };
        let factory = SinkFactory::new(&config).unwrap();
        assert!(factory.make().unwrap().is_none());

        let factory = SinkFactory::new(&SinkConfig::default()).unwrap();
        assert_eq!(factory.make().unwrap().unwrap().name(), "log");
    }

    /// Read one HTTP request from `socket` and return its body.
    async fn read_request_body(socket: &mut tokio::net::TcpStream) -> String {
        use tokio::io::AsyncReadExt;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return String::new();
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = end + 4;
            if buf.len() >= body_start + length {
                return String::from_utf8_lossy(&buf[body_start..body_start + length]).to_string();
            }
        }
    }

    /// Accept `requests` connections, answer each with `status`, return the bodies.
    fn spawn_collector(
        listener: tokio::net::TcpListener,
        status: &'static str,
        requests: usize,
    ) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;

            let mut bodies = Vec::new();
            while bodies.len() < requests {
                let (mut socket, _) = listener.accept().await.unwrap();
                bodies.push(read_request_body(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status
                );
                socket.write_all(response.as_bytes()).await.unwrap();
            }
            bodies
        })
    }

    async fn http_factory() -> (SinkFactory, tokio::net::TcpListener) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = SinkConfig {
            kind: SinkKind::Http,
            endpoint: Some(format!("http://{}/events", addr)),
            ..SinkConfig::default()
        };
        (SinkFactory::new(&config).unwrap(), listener)
    }

    #[tokio::test]
    async fn test_http_sink_posts_events_to_collector() {
        let (factory, listener) = http_factory().await;
        let collector = spawn_collector(listener, "200 OK", 2);

        let mut sink = factory.make().unwrap().unwrap();
        assert_eq!(sink.name(), "http");
        sink.send(&sample_event("page_load")).unwrap();
        sink.send(&sample_event("scroll_depth")).unwrap();
        drop(sink);

        assert_eq!(factory.finish().await, Some(2));

        let names: Vec<String> = collector
            .await
            .unwrap()
            .iter()
            .map(|body| serde_json::from_str::<AnalyticsEvent>(body).unwrap().name)
            .collect();
        assert_eq!(names, vec!["page_load", "scroll_depth"]);
    }

    #[tokio::test]
    async fn test_http_rejections_are_not_counted_as_delivered() {
        let (factory, listener) = http_factory().await;
        let collector = spawn_collector(listener, "503 Service Unavailable", 1);

        let mut sink = factory.make().unwrap().unwrap();
        sink.send(&sample_event("page_load")).unwrap();
        drop(sink);

        assert_eq!(factory.finish().await, Some(0));
        assert_eq!(collector.await.unwrap().len(), 1);
    }
}
