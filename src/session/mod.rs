//! Session drivers.
//!
//! A session is one page load: either a recorded trace replayed on a
//! manual clock, or a live signal stream on the real clock.

pub mod live;
pub mod replay;
pub mod trace;

pub use live::run_live;
pub use replay::{replay, SessionOutcome};
pub use trace::{load_trace, resolve_traces, Trace};
