//! Page tracker and its injected collaborators.
//!
//! This module provides the page-lifetime tracker, the sink and clock
//! interfaces it depends on, and the install handle that keeps tracking
//! failures away from the host page.

pub mod clock;
pub mod device;
pub mod error;
pub mod handle;
pub mod page_tracker;
pub mod sink;

pub use clock::{ManualClock, MonotonicClock, TimeSource};
pub use device::DeviceInfo;
pub use handle::TrackerHandle;
pub use page_tracker::{EmitStats, TrackerSnapshot};
pub use sink::{EventLog, EventSink, RecordingSink, SinkFactory, SinkKind};
