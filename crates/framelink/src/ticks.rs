//! Monotonic timestamps comparable across the two processes.
//!
//! Keepalive stamps live in the shared connection block, so both sides must
//! read the same clock. On unix that is `CLOCK_MONOTONIC`, which is
//! system-wide; elsewhere the wall clock is close enough for a multi-second
//! staleness threshold.

use std::time::Duration;

/// Current tick count in nanoseconds.
#[cfg(unix)]
pub fn now_ticks() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_MONOTONIC cannot fail with a valid pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

#[cfg(not(unix))]
pub fn now_ticks() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

/// Tick count equivalent of `timeout`.
pub fn ticks_for(timeout: Duration) -> i64 {
    timeout.as_nanos().min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_never_go_backwards() {
        let a = now_ticks();
        let b = now_ticks();
        assert!(b >= a);
    }

    #[test]
    fn ticks_for_converts_to_nanoseconds() {
        assert_eq!(ticks_for(Duration::from_secs(5)), 5_000_000_000);
        assert_eq!(ticks_for(Duration::from_millis(50)), 50_000_000);
    }
}
