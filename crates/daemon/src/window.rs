//! Timed encoding window calculations.
//!
//! Encoding may be restricted to a daily hour-of-day interval; this module
//! computes how long an admission has to wait before that interval opens.

use chrono::{Duration, Local, NaiveDateTime, Timelike};

/// Seconds until the next `[start, end)` daily window opens, measured from `now`.
///
/// Returns 0 when `now` is already inside the window. When the current hour is
/// past the window, the wait rolls over to the window start on the following
/// day. Hours are expected to be in `[0, 23]`; out-of-range starts yield 0.
pub fn seconds_until(start: u32, end: u32, now: NaiveDateTime) -> u64 {
    let hour = now.hour();
    if start <= hour && hour < end {
        return 0;
    }

    let Some(mut window_open) = now.date().and_hms_opt(start, 0, 0) else {
        return 0;
    };
    if hour >= end {
        window_open += Duration::days(1);
    }

    (window_open - now).num_seconds().max(0) as u64
}

/// Seconds until the next `[start, end)` window, measured from the local clock.
pub fn seconds_until_now(start: u32, end: u32) -> u64 {
    seconds_until(start, end, Local::now().naive_local())
}
