//! # Latency Watchdog
//!
//! Times each raw allocation against the host monotonic clock and reports
//! calls that meet the threshold. Purely observational: it never alters
//! the result and never retries.

use guardmem_hal::MonotonicClock;

use crate::record::Origin;

/// Raw-allocation latency at or above this many milliseconds is reported.
pub const LATENCY_THRESHOLD_MS: u64 = 300;

/// Run `op` under the clock and return its result plus elapsed
/// milliseconds.
pub fn timed<T>(clock: &dyn MonotonicClock, op: impl FnOnce() -> T) -> (T, u64) {
    let start = clock.now_ms();
    let value = op();
    (value, clock.now_ms().saturating_sub(start))
}

/// True when `elapsed_ms` meets the reporting threshold.
pub const fn exceeded(elapsed_ms: u64) -> bool {
    elapsed_ms >= LATENCY_THRESHOLD_MS
}

/// Report a raw allocation that crossed the threshold, naming its call
/// site and duration.
pub fn observe(elapsed_ms: u64, size: usize, origin: Origin) {
    if exceeded(elapsed_ms) {
        log::error!(
            "raw allocation took {} ms for size {} requested at {}",
            elapsed_ms,
            size,
            origin
        );
    }
}
