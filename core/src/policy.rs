//! # Context-Aware Allocation Policy
//!
//! Decides, per request, whether it is serviced at all and whether the raw
//! allocation may block. Pathological sizes are a caller programming
//! error, not memory pressure, and are rejected outright; any context that
//! must not sleep gets non-blocking request flags.

use guardmem_hal::{AllocFlags, ContextQuery};

use crate::record::Origin;

/// Upper bound on a single request. Anything larger is a caller bug.
pub const MAX_ALLOC_SIZE: usize = 1024 * 1024;

/// Pass-through requests above this try the reserved pool before the raw
/// allocator.
pub const RESERVED_POOL_THRESHOLD: usize = 4 * 1024;

/// Reject zero and oversized requests, naming the offending call site.
pub fn validate_size(size: usize, origin: Origin) -> bool {
    if size == 0 || size > MAX_ALLOC_SIZE {
        log::error!("allocation with invalid size {} requested at {}", size, origin);
        return false;
    }
    true
}

/// Size check for the virtually-contiguous path. The bound is exclusive
/// here: a request of exactly [`MAX_ALLOC_SIZE`] is rejected.
pub fn validate_virt_size(size: usize, origin: Origin) -> bool {
    if size == 0 || size >= MAX_ALLOC_SIZE {
        log::error!(
            "virtual allocation with invalid size {} requested at {}",
            size,
            origin
        );
        return false;
    }
    true
}

/// Select raw-allocation flags for the caller's execution context.
pub fn request_flags(ctx: &dyn ContextQuery) -> AllocFlags {
    let mut flags = AllocFlags::ZERO;
    if !(ctx.in_interrupt() || ctx.irqs_masked() || ctx.is_atomic()) {
        flags |= AllocFlags::BLOCK;
    }
    flags
}

/// True when a failed raw allocation under `flags` is an expected outcome
/// (memory pressure in atomic context) rather than a fatal condition.
pub fn failure_is_expected(flags: AllocFlags) -> bool {
    !flags.contains(AllocFlags::BLOCK)
}
