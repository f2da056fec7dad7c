//! Live sessions fed from an NDJSON signal stream.
//!
//! The first line is the [`PageEnvironment`]; every following line is one
//! [`HostSignal`]. The tracker runs on the monotonic clock with two real
//! interval timers that stay armed for the whole session. Everything runs
//! on one task, so the tracker is never touched concurrently.

use crate::config::TrackerConfig;
use crate::models::{HostSignal, MemorySample, PageEnvironment};
use crate::session::replay::{recording, SessionOutcome};
use crate::tracker::{EventSink, MonotonicClock, TimeSource, TrackerHandle};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Run one live session until unload, end of input, or Ctrl-C.
pub async fn run_live<R>(
    reader: R,
    config: &TrackerConfig,
    sink: Option<Box<dyn EventSink>>,
) -> Result<SessionOutcome>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    let page = read_header(&mut lines).await?;
    info!("Live session started on {}", page.hostname);

    let clock = MonotonicClock::new();
    let (sink, log) = recording(sink);
    let mut handle = TrackerHandle::install(config, &page, Box::new(clock), sink);

    let active_period = Duration::from_millis(config.active_tick_interval_ms.max(1));
    let memory_period = Duration::from_millis(config.memory_sample_interval_ms.max(1));
    let mut active_timer = interval_at(Instant::now() + active_period, active_period);
    let mut memory_timer = interval_at(Instant::now() + memory_period, memory_period);
    active_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    memory_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut host_memory: Option<MemorySample> = None;
    let mut processed = 0;
    let mut line_number = 1;

    while !handle.is_finished() {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read signal stream")? else {
                    debug!("Signal stream closed");
                    break;
                };
                line_number += 1;

                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<HostSignal>(line) {
                    Ok(signal) => {
                        debug!("Line {}: {} signal", line_number, signal.kind());
                        if let HostSignal::Memory { sample } = signal {
                            host_memory = Some(sample);
                        }
                        handle.dispatch(&signal);
                        processed += 1;
                    }
                    Err(e) => warn!("Skipping malformed signal on line {}: {}", line_number, e),
                }
            }
            _ = active_timer.tick() => handle.on_active_tick(),
            _ = memory_timer.tick() => handle.on_memory_tick(host_memory),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; closing session");
                break;
            }
        }
    }

    // The page goes away with its input.
    if !handle.is_finished() {
        handle.dispatch(&HostSignal::Unload);
    }

    Ok(SessionOutcome {
        source: "stdin".to_string(),
        page,
        snapshot: handle.snapshot(),
        debug_snapshot: handle.debug_snapshot(),
        events: log.events(),
        signals_processed: processed,
        duration_ms: clock.now_ms(),
    })
}

async fn read_header<R>(lines: &mut tokio::io::Lines<R>) -> Result<PageEnvironment>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read signal stream")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        return serde_json::from_str(line).context("First line must be the page environment");
    }

    Err(anyhow::anyhow!("Signal stream ended before the page environment"))
}
