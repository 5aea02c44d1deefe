//! Epoch windows — the quantum of time allocation.
//!
//! Time is partitioned into fixed-width windows of [`WINDOW_SIZE`] seconds.
//! Every activity event is discretised into the window containing it, and
//! the allocator apportions exactly one window's worth of seconds across
//! the files touched in that window.

/// Width of an epoch window in seconds.
pub const WINDOW_SIZE: i64 = 60;

/// The start of the window containing timestamp `t`.
pub fn window_of(t: i64) -> i64 {
    t / WINDOW_SIZE * WINDOW_SIZE
}

/// Current wall-clock time in integer seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The start of the currently open window.
///
/// Events in this window are never swept — the window is still collecting.
pub fn current_window() -> i64 {
    window_of(now())
}

/// Render a second count as a compact duration, e.g. `1h2m3s`.
pub fn format_duration(total: i64) -> String {
    let total = total.max(0);
    let h = total / 3600;
    let m = total % 3600 / 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
