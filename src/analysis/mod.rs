//! Analysis modules.
//!
//! Summaries over the events each session forwarded.

pub mod aggregator;

pub use aggregator::*;
