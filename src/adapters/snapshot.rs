//! Point-in-time statistics of a histogram or timer.

use std::fmt;

/// Value at one published percentile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileValue {
    /// Quantile in `[0, 1]`.
    pub percentile: f64,
    pub value: f64,
}

/// Cumulative count of values at or below `bound`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketValue {
    pub bound: f64,
    pub count: u64,
}

/// Statistics of a distribution at the time it was taken.
///
/// Values are in the metric's base unit. For timers that is seconds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    count: u64,
    sum: f64,
    max: f64,
    percentiles: Vec<PercentileValue>,
    buckets: Vec<BucketValue>,
}

impl Snapshot {
    pub(crate) fn new(
        count: u64,
        sum: f64,
        max: f64,
        percentiles: Vec<PercentileValue>,
        buckets: Vec<BucketValue>,
    ) -> Self {
        Self {
            count,
            sum,
            max,
            percentiles,
            buckets,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Arithmetic mean, or 0 when nothing was recorded.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn percentiles(&self) -> &[PercentileValue] {
        &self.percentiles
    }

    pub fn buckets(&self) -> &[BucketValue] {
        &self.buckets
    }

    /// Value at a published percentile.
    pub fn value_at(&self, percentile: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|p| (p.percentile - percentile).abs() < f64::EPSILON)
            .map(|p| p.value)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "count: {}", self.count)?;
        writeln!(f, "sum: {}", self.sum)?;
        writeln!(f, "mean: {}", self.mean())?;
        writeln!(f, "max: {}", self.max)?;
        for p in &self.percentiles {
            writeln!(f, "p{}: {}", p.percentile * 100.0, p.value)?;
        }
        for b in &self.buckets {
            writeln!(f, "le {}: {}", b.bound, b.count)?;
        }
        Ok(())
    }
}
