//! Clock sources and report formatting
//!
//! All timing in the crate goes through the [`Clock`] trait so that iterator
//! phase accounting and stall measurement can be driven by a deterministic
//! [`ManualClock`] in tests. Formatting helpers are pure functions over
//! nanosecond and integer values so the unit table is testable on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic time source in nanoseconds
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in nanoseconds from an arbitrary fixed origin
    fn now_nanos(&self) -> u64;
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by `clock_gettime(CLOCK_MONOTONIC)`
///
/// Calls libc directly, bypassing the extra bookkeeping in
/// `std::time::Instant`. Resolution is nanoseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline(always)]
    fn now_nanos(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }

        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
}

/// Create a shared monotonic clock
pub fn monotonic() -> SharedClock {
    Arc::new(MonotonicClock)
}

/// Manually advanced clock for tests and replay
///
/// Unlike a real monotonic clock it can be moved backwards with [`set`],
/// which is how clock-regression handling is exercised.
///
/// [`set`]: ManualClock::set
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start_nanos: u64) -> Self {
        Self {
            nanos: AtomicU64::new(start_nanos),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute reading (may go backwards)
    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Format a duration given in nanoseconds
///
/// Zero renders as a bare `0`. Anything else picks its unit by magnitude:
/// microseconds below 1ms, milliseconds below 1s, seconds otherwise. The
/// unit is chosen on the value as rounded to two decimals, so `999_999` ns
/// prints as `1.00ms`, never `1000.00us`.
///
/// # Examples
///
/// ```
/// use stagestats::util::time::format_duration;
///
/// assert_eq!(format_duration(0), "0");
/// assert_eq!(format_duration(1_500), "1.50us");
/// assert_eq!(format_duration(2_500_000), "2.50ms");
/// assert_eq!(format_duration(5_000_000_000), "5.00s");
/// ```
pub fn format_duration(nanos: u64) -> String {
    // hundredths of the unit, rounded half up
    let hundredths = |unit: u64| nanos.saturating_add(unit / 200) / (unit / 100);

    if nanos == 0 {
        "0".to_string()
    } else if hundredths(1_000) < 100_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else if hundredths(1_000_000) < 100_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", nanos as f64 / 1_000_000_000.0)
    }
}

/// Format a mean duration, rounding to the nearest nanosecond
pub fn format_mean_duration(mean_nanos: f64) -> String {
    format_duration(mean_nanos.round() as u64)
}

/// Format a count as a plain integer
pub fn format_count(n: u64) -> String {
    n.to_string()
}

/// Format a mean count, truncated to an integer
pub fn format_mean_count(mean: f64) -> String {
    format_count(mean.trunc() as u64)
}
