//! Resource Usage Tracker
//!
//! Maintains an exponentially weighted moving average of how frequently a
//! resource is referenced by submitted frames. The residency manager
//! evicts low-usage objects first, so the metric directly shapes eviction
//! order under memory pressure.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Smoothing factor applied per frame. Higher values favour recent use.
const USAGE_EWMA_ALPHA: f32 = 0.2;

/// Lock-free EWMA of per-frame use.
///
/// `mark_used_for_frame` is called during frame-graph building for every
/// referenced resource; `advance_frame` is called once per frame for every
/// registered resource so unused resources cool down.
pub struct UsageTracker {
    /// Current metric, stored as `f32` bits.
    metric_bits: AtomicU32,
    /// Frame number of the most recent use.
    last_used_frame: AtomicU64,
}

impl UsageTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            metric_bits: AtomicU32::new(0.0f32.to_bits()),
            last_used_frame: AtomicU64::new(0),
        }
    }

    /// Records that the resource is referenced by frame `frame_number`.
    pub fn mark_used_for_frame(&self, frame_number: u64) {
        self.last_used_frame.store(frame_number, Ordering::Relaxed);
    }

    /// Folds the given frame into the average; `used` is whether the
    /// resource was referenced during it.
    pub fn advance_frame(&self, used: bool) {
        let sample = if used { 1.0 } else { 0.0 };
        let mut current = self.metric_bits.load(Ordering::Relaxed);
        loop {
            let updated =
                f32::from_bits(current).mul_add(1.0 - USAGE_EWMA_ALPHA, USAGE_EWMA_ALPHA * sample);
            match self.metric_bits.compare_exchange_weak(
                current,
                updated.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current usage metric in `[0, 1]`.
    #[must_use]
    pub fn usage_metric(&self) -> f32 {
        f32::from_bits(self.metric_bits.load(Ordering::Relaxed))
    }

    /// Frame number of the most recent use.
    #[must_use]
    pub fn last_used_frame(&self) -> u64 {
        self.last_used_frame.load(Ordering::Relaxed)
    }

    /// Test/setup hook: forces the metric to an exact value.
    pub fn set_usage_metric(&self, metric: f32) {
        self.metric_bits.store(metric.to_bits(), Ordering::Relaxed);
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_rises_with_use_and_decays_without() {
        let tracker = UsageTracker::new();
        for _ in 0..20 {
            tracker.advance_frame(true);
        }
        let hot = tracker.usage_metric();
        assert!(hot > 0.9, "metric should approach 1.0, got {hot}");

        for _ in 0..20 {
            tracker.advance_frame(false);
        }
        let cold = tracker.usage_metric();
        assert!(cold < 0.1, "metric should approach 0.0, got {cold}");
    }
}
