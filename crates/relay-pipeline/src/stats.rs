//! Throughput accounting per reporting window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::info;

use crate::unit::Unit;

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// One window's figures, as logged by [`StatsAggregator::report`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub pid: u32,
    pub elapsed_ms: u64,
    pub units: u64,
    pub bytes: u64,
    /// Bits per second over the window; zero when no time has elapsed.
    pub bps: f64,
}

/// Counts units and bytes since the last reset.
///
/// Owned and mutated by the relay loop only. A window start of zero means no
/// window has begun yet, which suppresses reporting.
pub struct StatsAggregator {
    clock: Box<dyn Clock>,
    bytes: u64,
    units: u64,
    window_start_ms: u64,
}

impl StatsAggregator {
    /// An aggregator on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            bytes: 0,
            units: 0,
            window_start_ms: 0,
        }
    }

    /// Count one unit.
    pub fn record(&mut self, unit: &Unit) {
        self.units += 1;
        self.bytes += unit.size() as u64;
    }

    /// Log the current window. Does nothing before the first reset.
    pub fn report(&self) -> Option<StatsReport> {
        if self.window_start_ms == 0 {
            return None;
        }

        let elapsed_ms = self.clock.now_ms().saturating_sub(self.window_start_ms);
        let bps = if elapsed_ms == 0 {
            0.0
        } else {
            (self.bytes * 8) as f64 / (elapsed_ms as f64 / 1000.0)
        };

        let report = StatsReport {
            pid: std::process::id(),
            elapsed_ms,
            units: self.units,
            bytes: self.bytes,
            bps,
        };

        info!(
            "PID: {}, Delta: {:.3}s, Units: {}, Bytes: {}, BPS: {:.1}",
            report.pid,
            elapsed_ms as f64 / 1000.0,
            report.units,
            report.bytes,
            report.bps
        );

        Some(report)
    }

    /// Start a new window now.
    pub fn reset(&mut self) {
        self.window_start_ms = self.clock.now_ms();
        self.bytes = 0;
        self.units = 0;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn window_start_ms(&self) -> u64 {
        self.window_start_ms
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_suppressed_before_first_reset() {
        let clock = ManualClock::new(1_000);
        let mut stats = StatsAggregator::with_clock(clock.clone());
        stats.record(&Unit::new(0, vec![0u8; 100]));
        clock.advance(Duration::from_secs(5));

        assert!(stats.report().is_none());
        assert_eq!(stats.units(), 1);
    }

    #[test]
    fn test_window_figures() {
        let clock = ManualClock::new(10_000);
        let mut stats = StatsAggregator::with_clock(clock.clone());
        stats.reset();
        assert_eq!(stats.window_start_ms(), 10_000);

        for (id, size) in [10usize, 20, 30].into_iter().enumerate() {
            stats.record(&Unit::new(id as u64, vec![0u8; size]));
        }
        clock.advance(Duration::from_secs(2));

        let report = stats.report().unwrap();
        assert_eq!(report.pid, std::process::id());
        assert_eq!(report.elapsed_ms, 2_000);
        assert_eq!(report.units, 3);
        assert_eq!(report.bytes, 60);
        assert_eq!(report.bps, 240.0);

        // Reporting is read-only.
        assert_eq!(stats.bytes(), 60);
    }

    #[test]
    fn test_reset_starts_new_window() {
        let clock = ManualClock::new(5_000);
        let mut stats = StatsAggregator::with_clock(clock.clone());
        stats.reset();
        stats.record(&Unit::new(0, vec![0u8; 8]));

        clock.advance(Duration::from_millis(500));
        stats.reset();
        assert_eq!(stats.bytes(), 0);
        assert_eq!(stats.units(), 0);
        assert_eq!(stats.window_start_ms(), 5_500);
    }

    #[test]
    fn test_zero_elapsed_reports_zero_bps() {
        let clock = ManualClock::new(7_000);
        let mut stats = StatsAggregator::with_clock(clock);
        stats.reset();
        stats.record(&Unit::new(0, vec![0u8; 64]));

        let report = stats.report().unwrap();
        assert_eq!(report.elapsed_ms, 0);
        assert_eq!(report.bps, 0.0);
    }
}
