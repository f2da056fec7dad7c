//! Error types for tracker construction and event delivery.

use thiserror::Error;

/// Reasons the tracker refuses to install.
#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("no scroll depth thresholds configured")]
    NoScrollThresholds,

    #[error("scroll depth threshold {0} is outside 1..=100")]
    ScrollThresholdOutOfRange(u32),

    #[error("{name} interval must be greater than zero")]
    ZeroInterval { name: &'static str },

    #[error("section visibility ratio {0} must be in (0, 1]")]
    InvalidVisibilityRatio(f64),

    #[error("viewport {width}x{height} is not usable")]
    InvalidViewport { width: u32, height: u32 },

    #[error("page hostname is empty")]
    MissingHostname,
}

/// Failure while handing an event to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
