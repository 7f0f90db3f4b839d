//! Duration timer.

use std::fmt;
use std::time::{Duration, Instant};

use crate::adapters::{MeterHandle, Snapshot};
use crate::id::MetricId;
use crate::store::{CompositeMeter, LocalMeter};

/// Records durations.
///
/// # Example
///
/// ```ignore
/// let timer = registries.application().timer("reqLatency")?;
///
/// // Closure timing, recorded even if the closure panics
/// let rows = timer.time(|| query());
///
/// // Explicit start/stop
/// let ctx = timer.start();
/// work();
/// let elapsed = ctx.stop();
/// ```
pub struct Timer {
    handle: MeterHandle,
}

impl Timer {
    pub(crate) fn new(handle: MeterHandle) -> Self {
        Self { handle }
    }

    pub(crate) fn handle(&self) -> &MeterHandle {
        &self.handle
    }

    pub fn id(&self) -> &MetricId {
        self.handle.id()
    }

    /// Record a duration.
    pub fn update(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        match self.handle.local().and_then(LocalMeter::distribution) {
            Some(dist) => dist.record(nanos),
            None => self.handle.global().record(nanos),
        }
    }

    /// Run `f` and record how long it took.
    ///
    /// The duration is recorded when `f` returns or unwinds. A `Result` returned
    /// by `f` is timed the same way for `Ok` and `Err`.
    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let _context = self.start();
        f()
    }

    /// Start timing. The returned context records once, on `stop` or drop.
    pub fn start(&self) -> TimerContext<'_> {
        TimerContext {
            timer: self,
            started: Instant::now(),
            stopped: false,
        }
    }

    pub fn count(&self) -> u64 {
        self.handle.read(
            |m| m.distribution().map_or(0, |d| d.count()),
            CompositeMeter::distribution_count,
        )
    }

    /// Total of all recorded durations.
    pub fn elapsed_time(&self) -> Duration {
        Duration::from_nanos(self.handle.read(
            |m| m.distribution().map_or(0, |d| d.total()),
            CompositeMeter::distribution_total,
        ))
    }

    /// Snapshot of recorded durations, in seconds.
    pub fn snapshot(&self) -> Snapshot {
        self.handle.read(
            |m| m.distribution().map_or_else(Snapshot::empty, |d| d.snapshot()),
            CompositeMeter::snapshot,
        )
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", self.id())
            .field("count", &self.count())
            .finish()
    }
}

/// An in-flight timing started by [`Timer::start`].
#[must_use = "dropping a TimerContext records immediately"]
pub struct TimerContext<'a> {
    timer: &'a Timer,
    started: Instant,
    stopped: bool,
}

impl TimerContext<'_> {
    /// Record the elapsed time and return it.
    pub fn stop(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        self.stopped = true;
        self.timer.update(elapsed);
        elapsed
    }
}

impl Drop for TimerContext<'_> {
    fn drop(&mut self) {
        if !self.stopped {
            self.record();
        }
    }
}
