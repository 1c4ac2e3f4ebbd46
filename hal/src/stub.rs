//! # Host-service stubs
//!
//! Deterministic implementations of the HAL traits, backed by the Rust
//! global allocator and plain atomics. Used by unit tests and early
//! bring-up before the real host bindings exist.

use alloc::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use hashbrown::HashMap;
use spin::Mutex;

use crate::{
    AllocFlags, ContextQuery, FatalEvent, FatalSink, MonotonicClock, RawAllocator, ReservedPool,
};

/// Alignment handed to the global allocator; matches what host kernel
/// allocators guarantee for byte buffers.
const STUB_ALIGN: usize = 8;

// =============================================================================
// Raw allocator
// =============================================================================

/// [`RawAllocator`] backed by the global allocator.
///
/// The trait's release call carries no size, so a size table is kept here;
/// that table doubles as a live-allocation count for tests.
#[derive(Debug)]
pub struct HostAllocator {
    sizes: Mutex<HashMap<usize, usize>>,
    exhausted: AtomicBool,
}

impl HostAllocator {
    /// New allocator with nothing outstanding.
    pub fn new() -> Self {
        Self {
            sizes: Mutex::new(HashMap::new()),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Simulate memory pressure: while set, every `allocate` fails.
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::Relaxed);
    }

    /// Number of allocations handed out and not yet released.
    pub fn live(&self) -> usize {
        self.sizes.lock().len()
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RawAllocator for HostAllocator {
    fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
        if size == 0 || self.exhausted.load(Ordering::Relaxed) {
            return None;
        }
        let layout = Layout::from_size_align(size, STUB_ALIGN).ok()?;
        // SAFETY: layout has nonzero size.
        let raw = unsafe {
            if flags.contains(AllocFlags::ZERO) {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };
        let ptr = NonNull::new(raw)?;
        self.sizes.lock().insert(ptr.as_ptr() as usize, size);
        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        let size = self.sizes.lock().remove(&(ptr.as_ptr() as usize));
        match size {
            Some(size) => {
                // The size was accepted by allocate(), so the layout is valid.
                let layout = unsafe { Layout::from_size_align_unchecked(size, STUB_ALIGN) };
                // SAFETY: caller contract plus the table hit prove this is a
                // live allocation of ours.
                unsafe { dealloc(ptr.as_ptr(), layout) };
            }
            None => {
                log::error!(
                    "HostAllocator: release of unknown pointer {:#x}",
                    ptr.as_ptr() as usize
                );
            }
        }
    }
}

// =============================================================================
// Clock
// =============================================================================

/// [`MonotonicClock`] that advances by a fixed step on every read.
///
/// A step of 0 freezes time; a step at the watchdog threshold makes every
/// timed call appear slow.
#[derive(Debug)]
pub struct SteppingClock {
    now: AtomicU64,
    step: u64,
}

impl SteppingClock {
    /// Clock starting at 0, advancing `step` ms per `now_ms` call.
    pub fn new(step: u64) -> Self {
        Self {
            now: AtomicU64::new(0),
            step,
        }
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::Relaxed);
    }
}

impl MonotonicClock for SteppingClock {
    fn now_ms(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }
}

// =============================================================================
// Execution context
// =============================================================================

/// [`ContextQuery`] with settable interrupt/atomic state and a counted
/// critical-section depth in place of real interrupt masking.
#[derive(Debug)]
pub struct FixedContext {
    in_interrupt: AtomicBool,
    irqs_masked: AtomicBool,
    atomic: AtomicBool,
    critical_depth: AtomicUsize,
}

impl FixedContext {
    fn with_state(in_interrupt: bool, irqs_masked: bool, atomic: bool) -> Self {
        Self {
            in_interrupt: AtomicBool::new(in_interrupt),
            irqs_masked: AtomicBool::new(irqs_masked),
            atomic: AtomicBool::new(atomic),
            critical_depth: AtomicUsize::new(0),
        }
    }

    /// Ordinary preemptible thread context.
    pub fn normal() -> Self {
        Self::with_state(false, false, false)
    }

    /// Hardware-interrupt context.
    pub fn interrupt() -> Self {
        Self::with_state(true, false, false)
    }

    /// Non-preemptible (spinlock-held) context.
    pub fn atomic() -> Self {
        Self::with_state(false, false, true)
    }

    /// Flip interrupt state at runtime.
    pub fn set_in_interrupt(&self, value: bool) {
        self.in_interrupt.store(value, Ordering::Relaxed);
    }

    /// Flip interrupt masking at runtime.
    pub fn set_irqs_masked(&self, value: bool) {
        self.irqs_masked.store(value, Ordering::Relaxed);
    }

    /// Flip atomic state at runtime.
    pub fn set_atomic(&self, value: bool) {
        self.atomic.store(value, Ordering::Relaxed);
    }

    /// Current nesting depth of [`irq_save`](ContextQuery::irq_save) calls.
    pub fn critical_depth(&self) -> usize {
        self.critical_depth.load(Ordering::Relaxed)
    }
}

impl ContextQuery for FixedContext {
    fn in_interrupt(&self) -> bool {
        self.in_interrupt.load(Ordering::Relaxed)
    }

    fn irqs_masked(&self) -> bool {
        self.irqs_masked.load(Ordering::Relaxed)
    }

    fn is_atomic(&self) -> bool {
        self.atomic.load(Ordering::Relaxed)
    }

    fn irq_save(&self) -> usize {
        self.critical_depth.fetch_add(1, Ordering::Relaxed)
    }

    fn irq_restore(&self, _token: usize) {
        self.critical_depth.fetch_sub(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Reserved pool
// =============================================================================

/// [`ReservedPool`] that never serves anything. The default when the host
/// has no pre-carved region.
#[derive(Debug, Default)]
pub struct NullPool;

impl ReservedPool for NullPool {
    fn get(&self, _size: usize) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn put(&self, _ptr: NonNull<u8>) -> bool {
        false
    }
}

/// [`ReservedPool`] that serves from the global allocator and counts
/// traffic, so tests can assert which path an allocation took.
#[derive(Debug)]
pub struct StubPool {
    grants: Mutex<HashMap<usize, usize>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl StubPool {
    /// Empty pool with zeroed counters.
    pub fn new() -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// Buffers handed out so far.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Buffers reclaimed so far.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Buffers handed out and not yet reclaimed.
    pub fn outstanding(&self) -> usize {
        self.grants.lock().len()
    }
}

impl Default for StubPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservedPool for StubPool {
    fn get(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, STUB_ALIGN).ok()?;
        // SAFETY: layout has nonzero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        self.grants.lock().insert(ptr.as_ptr() as usize, size);
        self.gets.fetch_add(1, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn put(&self, ptr: NonNull<u8>) -> bool {
        let size = self.grants.lock().remove(&(ptr.as_ptr() as usize));
        match size {
            Some(size) => {
                let layout = unsafe { Layout::from_size_align_unchecked(size, STUB_ALIGN) };
                // SAFETY: the grants hit proves this is a live pool buffer.
                unsafe { dealloc(ptr.as_ptr(), layout) };
                self.puts.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// Fatal sink
// =============================================================================

/// [`FatalSink`] that logs and records every event for later inspection.
#[derive(Debug)]
pub struct RecordingSink {
    events: Mutex<Vec<FatalEvent>>,
}

impl RecordingSink {
    /// Sink with no recorded events.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything reported so far.
    pub fn events(&self) -> Vec<FatalEvent> {
        self.events.lock().clone()
    }

    /// True when nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FatalSink for RecordingSink {
    fn report(&self, event: FatalEvent) {
        log::error!("fatal event: {}", event);
        self.events.lock().push(event);
    }
}
