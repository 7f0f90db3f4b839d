//! Platform metrics bound to the `base` scope.
//!
//! - `cpu.availableProcessors`
//! - `process.uptime` (seconds)
//! - `process.startTime` (milliseconds since the Unix epoch)
//! - `thread.count` (Linux)
//! - `memory.residentBytes` (Linux)

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::metadata::{units, Metadata};
use crate::registry::MetricRegistry;

struct ProcessClock {
    started: Instant,
    started_at_ms: f64,
}

/// Process start, approximated by the first time any base registry is bound.
fn clock() -> &'static ProcessClock {
    static CLOCK: OnceLock<ProcessClock> = OnceLock::new();
    CLOCK.get_or_init(|| ProcessClock {
        started: Instant::now(),
        started_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0),
    })
}

pub(crate) fn register_platform_metrics(registry: &MetricRegistry) -> Result<()> {
    let clock = clock();

    registry.gauge_with_metadata(
        Metadata::new("cpu.availableProcessors")
            .with_description("Number of processors available to the process"),
        &[],
        || {
            std::thread::available_parallelism()
                .map(|n| n.get() as f64)
                .unwrap_or(1.0)
        },
    )?;

    registry.gauge_with_metadata(
        Metadata::new("process.uptime")
            .with_unit(units::SECONDS)
            .with_description("Time since the process started"),
        &[],
        move || clock.started.elapsed().as_secs_f64(),
    )?;

    let started_at_ms = clock.started_at_ms;
    registry.gauge_with_metadata(
        Metadata::new("process.startTime")
            .with_unit(units::MILLISECONDS)
            .with_description("Process start time in milliseconds since the Unix epoch"),
        &[],
        move || started_at_ms,
    )?;

    #[cfg(target_os = "linux")]
    {
        registry.gauge_with_metadata(
            Metadata::new("thread.count").with_description("Current number of live threads"),
            &[],
            || proc_status::read("Threads:").unwrap_or(f64::NAN),
        )?;

        registry.gauge_with_metadata(
            Metadata::new("memory.residentBytes")
                .with_unit(units::BYTES)
                .with_description("Resident set size of the process"),
            &[],
            || {
                proc_status::read("VmRSS:")
                    .map(|kb| kb * 1024.0)
                    .unwrap_or(f64::NAN)
            },
        )?;
    }

    Ok(())
}

#[cfg(target_os = "linux")]
mod proc_status {
    use tracing::warn;

    /// First number after `field` in `/proc/self/status`.
    pub(super) fn read(field: &str) -> Option<f64> {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(e) => {
                warn!(%e, "failed to read /proc/self/status");
                return None;
            }
        };
        parse(&status, field)
    }

    pub(super) fn parse(status: &str, field: &str) -> Option<f64> {
        status
            .lines()
            .find_map(|line| line.strip_prefix(field))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
    }

}
