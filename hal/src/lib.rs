//! # guardmem HAL
//!
//! Host-service abstraction consumed by the guarded-allocation subsystem.
//! The subsystem itself is portable; everything the host operating system
//! must supply is expressed here as a narrow trait:
//!
//! - [`RawAllocator`]: the underlying allocate/release pair being
//!   instrumented (kmalloc/kfree semantics: release takes no size).
//! - [`MonotonicClock`]: millisecond time source for the latency watchdog.
//! - [`ContextQuery`]: execution-context capabilities, interrupt/atomic
//!   detection and interrupt-state save/restore around critical sections.
//! - [`ReservedPool`]: externally managed pre-carved buffers for large
//!   requests, tried before the raw allocator on the pass-through path.
//! - [`FatalSink`]: the fatal-event reporting pipeline.
//!
//! The [`stub`] module provides deterministic implementations of all five,
//! used by unit tests and early bring-up.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod stub;

use core::fmt;
use core::ptr::NonNull;

bitflags::bitflags! {
    /// Request flags handed to a [`RawAllocator`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// The call may sleep waiting for memory. Never set for callers in
        /// interrupt or atomic context.
        const BLOCK = 1 << 0;
        /// The returned storage must be zeroed.
        const ZERO = 1 << 1;
    }
}

/// The raw allocator being instrumented.
///
/// Contract mirrors a host kernel allocator: `release` takes only the
/// pointer, so implementations own whatever size bookkeeping they need.
pub trait RawAllocator: Send + Sync {
    /// Allocate `size` bytes, honoring `flags`. Returns `None` on
    /// exhaustion; never panics.
    fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>>;

    /// Release storage previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator's `allocate` and must not
    /// have been released already.
    unsafe fn release(&self, ptr: NonNull<u8>);
}

/// Monotonic millisecond clock.
pub trait MonotonicClock: Send + Sync {
    /// Current time in milliseconds. Must never decrease.
    fn now_ms(&self) -> u64;
}

/// Execution-context capability query.
///
/// The allocation policy needs exactly two things from the host: whether the
/// current context forbids sleeping, and the ability to mask interrupts
/// around a short critical section.
pub trait ContextQuery: Send + Sync {
    /// True while servicing a hardware interrupt.
    fn in_interrupt(&self) -> bool;

    /// True while interrupts are masked on the current CPU.
    fn irqs_masked(&self) -> bool;

    /// True in any other non-preemptible context (e.g. holding a spinlock).
    fn is_atomic(&self) -> bool;

    /// Mask interrupts and return an opaque token for the saved state.
    fn irq_save(&self) -> usize;

    /// Restore the interrupt state captured by [`irq_save`](Self::irq_save).
    fn irq_restore(&self, token: usize);
}

/// RAII interrupt-state guard: masks on construction, restores on drop.
///
/// The spin_lock_irqsave shape: the caller takes this guard, then the lock,
/// and both unwind in reverse order at end of scope.
pub struct CriticalSection<'a> {
    ctx: &'a dyn ContextQuery,
    token: usize,
}

impl<'a> CriticalSection<'a> {
    /// Enter a critical section on the current CPU.
    pub fn enter(ctx: &'a dyn ContextQuery) -> Self {
        let token = ctx.irq_save();
        Self { ctx, token }
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.ctx.irq_restore(self.token);
    }
}

impl fmt::Debug for CriticalSection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection")
            .field("token", &self.token)
            .finish()
    }
}

/// Externally managed pool of pre-carved buffers for large requests.
pub trait ReservedPool: Send + Sync {
    /// Hand out a pooled buffer of at least `size` bytes, or `None` when the
    /// pool cannot serve the request.
    fn get(&self, size: usize) -> Option<NonNull<u8>>;

    /// Offer a pointer back. Returns true when the pointer belonged to the
    /// pool and was reclaimed; false means the caller still owns it.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation owned by the caller.
    unsafe fn put(&self, ptr: NonNull<u8>) -> bool;
}

/// Abnormal conditions escalated beyond the ordinary diagnostic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalEvent {
    /// A blocking-mode allocation failed: system-wide memory pressure with
    /// no non-blocking fallback available to the caller.
    BlockingAllocFailed {
        /// Requested size in bytes.
        size: usize,
    },
    /// Free of a pointer the registry does not know: double free or a
    /// pointer not obtained from this subsystem.
    UntrackedFree {
        /// The offending caller-visible address.
        addr: usize,
    },
    /// Tracked allocations remained at subsystem shutdown.
    LeakAtShutdown {
        /// Number of leaked allocations.
        leaked: usize,
    },
}

impl fmt::Display for FatalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockingAllocFailed { size } => {
                write!(f, "blocking allocation of {} bytes failed", size)
            }
            Self::UntrackedFree { addr } => {
                write!(f, "free of untracked pointer {:#x}", addr)
            }
            Self::LeakAtShutdown { leaked } => {
                write!(f, "{} allocations leaked at shutdown", leaked)
            }
        }
    }
}

/// Fatal-event reporting pipeline.
pub trait FatalSink: Send + Sync {
    /// Record an abnormal condition. Whether the host halts afterwards is
    /// the caller's decision, not the sink's.
    fn report(&self, event: FatalEvent);
}
