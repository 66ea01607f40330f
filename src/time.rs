//! A coarse, cached wall clock.
//!
//! The ingest hot path stamps every sample. Asking the OS for the time on
//! each of those stamps is a meaningful cost at volume, so we keep a global
//! second-resolution clock that a background thread refreshes twice a
//! second. Callers that need more resolution (gauge ordering) use
//! `now_ns`, which does hit the OS.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use std::{cmp, thread, time};

lazy_static! {
    static ref NOW: Arc<AtomicUsize> =
        Arc::new(AtomicUsize::new(Utc::now().timestamp() as usize));
}

/// Current unix time, seconds, at half-second staleness.
pub fn now() -> i64 {
    NOW.load(Ordering::Relaxed) as i64
}

/// Current unix time, nanoseconds. Not cached.
pub fn now_ns() -> u64 {
    let t = Utc::now();
    (t.timestamp() as u64).saturating_mul(1_000_000_000)
        + u64::from(t.timestamp_subsec_nanos())
}

/// Nanoseconds elapsed since `i`.
pub fn elapsed_ns(i: Instant) -> u64 {
    let elapsed = i.elapsed();
    (elapsed.as_secs().saturating_mul(1_000_000_000))
        .saturating_add(u64::from(elapsed.subsec_nanos()))
}

/// Refresh loop for the cached clock. Never returns; run it on its own
/// thread.
pub fn update_time() {
    let dur = time::Duration::from_millis(500);
    loop {
        thread::sleep(dur);
        let now = Utc::now().timestamp() as usize;
        NOW.store(now, Ordering::Relaxed);
    }
}

/// Exponential backoff sleep, capped at sixty seconds.
///
/// Receive loops call this with a count of consecutive empty polls so that
/// an idle channel does not spin a core.
#[inline]
pub fn delay(attempts: u32) {
    if attempts > 0 {
        let max_delay: u32 = 60_000;
        let delay = cmp::min(max_delay, 2u32.saturating_pow(cmp::min(attempts, 16)));
        let sleep_time = time::Duration::from_millis(u64::from(delay));
        thread::sleep(sleep_time);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn now_is_plausible() {
        let cached = now();
        let actual = Utc::now().timestamp();
        assert!((actual - cached).abs() <= 2);
    }

    #[test]
    fn ns_is_monotonic_enough() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }
}
