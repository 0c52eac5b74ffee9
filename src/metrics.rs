//! Process-wide counters for the stats endpoint
//!
//! Total searches and cumulative search time are updated with plain
//! atomic fetch-adds; callers may treat them as monotone-since-boot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static SEARCHES_TOTAL: AtomicU64 = AtomicU64::new(0);
static SEARCH_TIME_MICROS: AtomicU64 = AtomicU64::new(0);

static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

/// Anchor the uptime clock. Called once at process start; later calls
/// are no-ops.
pub fn init_uptime() {
    Lazy::force(&STARTED);
}

pub fn uptime_seconds() -> u64 {
    STARTED.elapsed().as_secs()
}

/// Record `count` completed searches taking `elapsed` in total.
pub fn record_searches(count: u64, elapsed: Duration) {
    SEARCHES_TOTAL.fetch_add(count, Ordering::Relaxed);
    SEARCH_TIME_MICROS.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
}

pub fn searches_total() -> u64 {
    SEARCHES_TOTAL.load(Ordering::Relaxed)
}

pub fn search_time_ms_total() -> f64 {
    SEARCH_TIME_MICROS.load(Ordering::Relaxed) as f64 / 1000.0
}

/// Cumulative time divided by count; zero before the first search.
pub fn avg_search_time_ms() -> f64 {
    let count = searches_total();
    if count == 0 {
        return 0.0;
    }
    search_time_ms_total() / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before_count = searches_total();
        let before_ms = search_time_ms_total();

        record_searches(3, Duration::from_millis(30));

        assert_eq!(searches_total(), before_count + 3);
        assert!(search_time_ms_total() >= before_ms + 30.0 - 1e-9);
        assert!(avg_search_time_ms() > 0.0);
    }

    #[test]
    fn test_uptime_monotone() {
        init_uptime();
        let a = uptime_seconds();
        let b = uptime_seconds();
        assert!(b >= a);
    }
}
