//! # Guarded Heap
//!
//! The allocation front end. Each request flows through the size/context
//! policy and the latency watchdog observes the raw call; in instrumented
//! mode the storage is bracketed with canaries and entered into the
//! allocation registry. Free validates the pointer against the
//! registry, checks both guard bands, and releases the storage exactly
//! once.
//!
//! Instrumentation is selected at runtime through [`TrackingMode`]: one
//! allocation interface, two strategies, no duplicated call sites.

use alloc::sync::Arc;
use core::fmt;
use core::ptr::NonNull;
use core::slice;

use guardmem_hal::{
    AllocFlags, ContextQuery, CriticalSection, FatalEvent, FatalSink, MonotonicClock,
    RawAllocator, ReservedPool,
};

use crate::canary::{matches, CANARY_LEN, HEADER_CANARY, TAIL_CANARY};
use crate::policy;
use crate::record::{AllocKind, AllocRecord, Origin};
use crate::registry::{AllocationRegistry, LeakReport, DEFAULT_CAPACITY};
use crate::watchdog;

/// Which allocation path the heap runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// Registry and canary instrumentation on every allocation.
    #[default]
    Instrumented,
    /// Bare pass-through to the raw allocator; the reserved pool still
    /// applies for large requests.
    Passthrough,
}

/// Heap construction parameters.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Instrumented or pass-through path.
    pub mode: TrackingMode,
    /// Registry capacity: the cap on simultaneously tracked allocations.
    pub capacity: usize,
    /// Panic after the shutdown leak report when any leak was found.
    pub halt_on_leak: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Instrumented,
            capacity: DEFAULT_CAPACITY,
            halt_on_leak: false,
        }
    }
}

impl HeapConfig {
    /// Pass-through configuration: no tracking, no canaries.
    pub fn passthrough() -> Self {
        Self {
            mode: TrackingMode::Passthrough,
            ..Default::default()
        }
    }
}

/// Host collaborators the heap runs against.
///
/// All of them are injectable so the subsystem runs (and is tested)
/// without a real host OS underneath.
pub struct HostServices {
    /// General-purpose raw allocator.
    pub general: Arc<dyn RawAllocator>,
    /// Raw allocator for DMA-class buffers.
    pub dma: Arc<dyn RawAllocator>,
    /// Raw allocator for virtually-contiguous buffers.
    pub virt: Arc<dyn RawAllocator>,
    /// Reserved pre-carved pool for large pass-through requests.
    pub pool: Arc<dyn ReservedPool>,
    /// Monotonic time source for the latency watchdog.
    pub clock: Arc<dyn MonotonicClock>,
    /// Execution-context capability query.
    pub context: Arc<dyn ContextQuery>,
    /// Fatal-event reporting pipeline.
    pub fatal: Arc<dyn FatalSink>,
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}

/// Guard-comparison outcome for a released allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CanaryVerdict {
    header_ok: bool,
    tail_ok: bool,
    origin: Origin,
}

/// Guarded allocation front end over the host raw allocators.
pub struct GuardedHeap {
    registry: AllocationRegistry,
    services: HostServices,
    mode: TrackingMode,
    halt_on_leak: bool,
}

impl GuardedHeap {
    /// Initialize the subsystem. Registry table storage is reserved here,
    /// up front.
    pub fn new(config: HeapConfig, services: HostServices) -> Self {
        Self {
            registry: AllocationRegistry::new(config.capacity),
            services,
            mode: config.mode,
            halt_on_leak: config.halt_on_leak,
        }
    }

    /// Allocate `size` zeroed bytes, tracked when instrumented.
    ///
    /// Returns `None` for invalid sizes and on exhaustion; a blocking-mode
    /// exhaustion is additionally escalated to the fatal sink.
    #[track_caller]
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc_at(size, Origin::caller())
    }

    /// [`alloc`](Self::alloc) with an explicit origin, for callers that
    /// forward provenance themselves.
    pub fn alloc_at(&self, size: usize, origin: Origin) -> Option<NonNull<u8>> {
        if !policy::validate_size(size, origin) {
            return None;
        }
        let flags = policy::request_flags(self.services.context.as_ref());
        match self.mode {
            TrackingMode::Passthrough => self.alloc_passthrough(size, flags, origin),
            TrackingMode::Instrumented => {
                self.alloc_tracked(size, flags, origin, AllocKind::General)
            }
        }
    }

    /// Allocate a DMA-class buffer: never legal from interrupt context,
    /// always requested in blocking mode.
    #[track_caller]
    pub fn alloc_dma(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc_dma_at(size, Origin::caller())
    }

    /// [`alloc_dma`](Self::alloc_dma) with an explicit origin.
    pub fn alloc_dma_at(&self, size: usize, origin: Origin) -> Option<NonNull<u8>> {
        if self.services.context.in_interrupt() {
            log::error!("DMA-class allocation from interrupt context at {}", origin);
            return None;
        }
        if !policy::validate_size(size, origin) {
            return None;
        }
        let flags = AllocFlags::BLOCK | AllocFlags::ZERO;
        match self.mode {
            TrackingMode::Passthrough => {
                self.raw_alloc(self.services.dma.as_ref(), size, flags, origin)
            }
            TrackingMode::Instrumented => self.alloc_tracked(size, flags, origin, AllocKind::Dma),
        }
    }

    /// Release a pointer previously returned by [`alloc`](Self::alloc).
    ///
    /// Null is a no-op. In instrumented mode an unknown pointer is a
    /// registry consistency violation: reported, then a panic. Continuing
    /// would risk releasing foreign memory.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have come from `alloc` on this heap and must
    /// not have been freed already. Corrupt guard bands are reported, not
    /// fatal; a wrong pointer is.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else { return };
        match self.mode {
            TrackingMode::Passthrough => {
                // SAFETY: caller contract; the pool declines pointers it
                // does not own.
                unsafe {
                    if self.services.pool.put(ptr) {
                        return;
                    }
                    self.services.general.release(ptr);
                }
            }
            TrackingMode::Instrumented => {
                self.free_tracked(ptr, AllocKind::General);
            }
        }
    }

    /// Release a DMA-class pointer from [`alloc_dma`](Self::alloc_dma).
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](Self::free), for `alloc_dma` pointers.
    pub unsafe fn free_dma(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else { return };
        match self.mode {
            // SAFETY: caller contract.
            TrackingMode::Passthrough => unsafe { self.services.dma.release(ptr) },
            TrackingMode::Instrumented => {
                self.free_tracked(ptr, AllocKind::Dma);
            }
        }
    }

    /// Allocate a virtually-contiguous buffer.
    ///
    /// This path is untracked in every mode: no canaries, no registry
    /// entry, only the latency watchdog over the raw call. The size bound
    /// is exclusive here, and the call always blocks, so it is never legal
    /// from a context that must not sleep.
    #[track_caller]
    pub fn alloc_virt(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc_virt_at(size, Origin::caller())
    }

    /// [`alloc_virt`](Self::alloc_virt) with an explicit origin.
    pub fn alloc_virt_at(&self, size: usize, origin: Origin) -> Option<NonNull<u8>> {
        if !policy::validate_virt_size(size, origin) {
            return None;
        }
        self.raw_alloc(self.services.virt.as_ref(), size, AllocFlags::BLOCK, origin)
    }

    /// Release a pointer from [`alloc_virt`](Self::alloc_virt).
    ///
    /// Null is diagnosed and ignored; the pointer was never tracked, so
    /// there is no registry or canary validation to apply.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have come from `alloc_virt` on this heap and
    /// must not have been freed already.
    pub unsafe fn free_virt(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            log::error!("null pointer passed to virtual free");
            return;
        };
        // SAFETY: caller contract.
        unsafe { self.services.virt.release(ptr) };
    }

    /// Number of live tracked allocations.
    pub fn live_allocations(&self) -> usize {
        self.registry.len()
    }

    /// Drain every remaining tracked allocation, release its storage, and
    /// return the coalesced leak report.
    pub fn drain_and_report(&self) -> LeakReport {
        let records = self.registry.drain();
        if records.is_empty() {
            return LeakReport::default();
        }
        log::error!(
            "allocation registry not empty at drain: {} live entries",
            records.len()
        );
        let report = LeakReport::coalesce(&records);
        for record in &records {
            // SAFETY: each drained record was live until removed above and
            // its base came from the matching raw allocator.
            unsafe {
                self.allocator(record.kind)
                    .release(NonNull::new_unchecked(record.base as *mut u8));
            }
        }
        report
    }

    /// Shut the subsystem down: drain, report leaks to the fatal sink, and
    /// halt when configured to.
    pub fn shutdown(self) -> LeakReport {
        let report = self.drain_and_report();
        if !report.is_empty() {
            self.services
                .fatal
                .report(FatalEvent::LeakAtShutdown {
                    leaked: report.total(),
                });
            if self.halt_on_leak {
                panic!(
                    "guardmem: {} allocations leaked at shutdown",
                    report.total()
                );
            }
        }
        report
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn allocator(&self, kind: AllocKind) -> &dyn RawAllocator {
        match kind {
            AllocKind::General => self.services.general.as_ref(),
            AllocKind::Dma => self.services.dma.as_ref(),
        }
    }

    /// Timed raw allocation with the blocking-failure escalation rule.
    fn raw_alloc(
        &self,
        allocator: &dyn RawAllocator,
        size: usize,
        flags: AllocFlags,
        origin: Origin,
    ) -> Option<NonNull<u8>> {
        let (ptr, elapsed) = watchdog::timed(self.services.clock.as_ref(), || {
            allocator.allocate(size, flags)
        });
        watchdog::observe(elapsed, size, origin);
        if ptr.is_none() && !policy::failure_is_expected(flags) {
            log::error!("blocking allocation of {} bytes failed at {}", size, origin);
            self.services
                .fatal
                .report(FatalEvent::BlockingAllocFailed { size });
        }
        ptr
    }

    fn alloc_passthrough(
        &self,
        size: usize,
        flags: AllocFlags,
        origin: Origin,
    ) -> Option<NonNull<u8>> {
        if size > policy::RESERVED_POOL_THRESHOLD {
            if let Some(ptr) = self.services.pool.get(size) {
                return Some(ptr);
            }
        }
        self.raw_alloc(self.services.general.as_ref(), size, flags, origin)
    }

    fn alloc_tracked(
        &self,
        size: usize,
        flags: AllocFlags,
        origin: Origin,
        kind: AllocKind,
    ) -> Option<NonNull<u8>> {
        let total = size + 2 * CANARY_LEN;
        let base = self.raw_alloc(self.allocator(kind), total, flags, origin)?;
        let record = AllocRecord {
            base: base.as_ptr() as usize,
            size,
            origin,
            seq: 0,
            kind,
        };

        // SAFETY: the raw allocator handed out `total` bytes at `base`;
        // both guard regions lie inside that range.
        unsafe {
            core::ptr::copy_nonoverlapping(HEADER_CANARY.as_ptr(), base.as_ptr(), CANARY_LEN);
            core::ptr::copy_nonoverlapping(
                TAIL_CANARY.as_ptr(),
                record.tail_addr() as *mut u8,
                CANARY_LEN,
            );
        }

        {
            let _cs = CriticalSection::enter(self.services.context.as_ref());
            if let Err(err) = self.registry.insert(record) {
                // The storage is already owned by the caller at this point;
                // it stays usable, just untracked.
                log::error!("unable to track allocation at {}: {}", origin, err);
            }
        }

        // SAFETY: user_addr is CANARY_LEN bytes into a live `total`-sized
        // allocation, hence non-null.
        Some(unsafe { NonNull::new_unchecked(record.user_addr() as *mut u8) })
    }

    fn free_tracked(&self, ptr: NonNull<u8>, expected: AllocKind) -> CanaryVerdict {
        let addr = ptr.as_ptr() as usize;
        let removed = {
            let _cs = CriticalSection::enter(self.services.context.as_ref());
            self.registry.remove(addr)
        };
        let record = match removed {
            Ok(record) => record,
            Err(err) => {
                log::error!("free of untracked pointer {:#x}: {}", addr, err);
                self.services.fatal.report(FatalEvent::UntrackedFree { addr });
                panic!(
                    "guardmem: free of untracked pointer {:#x} (double free?)",
                    addr
                );
            }
        };

        if record.kind != expected {
            log::warn!(
                "allocation from {} released through the wrong free variant",
                record.origin
            );
        }

        // SAFETY: the record was live until the removal above, so the whole
        // backing range is still readable.
        let verdict = unsafe {
            CanaryVerdict {
                header_ok: matches(
                    slice::from_raw_parts(record.base as *const u8, CANARY_LEN),
                    &HEADER_CANARY,
                ),
                tail_ok: matches(
                    slice::from_raw_parts(record.tail_addr() as *const u8, CANARY_LEN),
                    &TAIL_CANARY,
                ),
                origin: record.origin,
            }
        };
        if !verdict.header_ok {
            log::error!("memory header corrupted: allocated at {}", record.origin);
        }
        if !verdict.tail_ok {
            log::error!("memory trailer corrupted: allocated at {}", record.origin);
        }

        // Corruption is reported, not escalated: halting here would mask
        // the original bug with a crash at an unrelated site. The storage
        // is still released exactly once.
        // SAFETY: base came from the matching raw allocator and the record
        // has just left the registry, so this is the only release.
        unsafe {
            self.allocator(record.kind)
                .release(NonNull::new_unchecked(record.base as *mut u8));
        }
        verdict
    }
}

impl fmt::Debug for GuardedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedHeap")
            .field("mode", &self.mode)
            .field("live", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MAX_ALLOC_SIZE;
    use guardmem_hal::stub::{
        FixedContext, HostAllocator, RecordingSink, SteppingClock, StubPool,
    };

    const SITE_A: Origin = Origin {
        file: "site_a.rs",
        line: 100,
    };
    const SITE_B: Origin = Origin {
        file: "site_b.rs",
        line: 200,
    };

    struct Rig {
        heap: GuardedHeap,
        general: Arc<HostAllocator>,
        dma: Arc<HostAllocator>,
        virt: Arc<HostAllocator>,
        pool: Arc<StubPool>,
        context: Arc<FixedContext>,
        sink: Arc<RecordingSink>,
    }

    fn rig_with(config: HeapConfig) -> Rig {
        let general = Arc::new(HostAllocator::new());
        let dma = Arc::new(HostAllocator::new());
        let virt = Arc::new(HostAllocator::new());
        let pool = Arc::new(StubPool::new());
        let context = Arc::new(FixedContext::normal());
        let sink = Arc::new(RecordingSink::new());
        let heap = GuardedHeap::new(
            config,
            HostServices {
                general: general.clone(),
                dma: dma.clone(),
                virt: virt.clone(),
                pool: pool.clone(),
                clock: Arc::new(SteppingClock::new(1)),
                context: context.clone(),
                fatal: sink.clone(),
            },
        );
        Rig {
            heap,
            general,
            dma,
            virt,
            pool,
            context,
            sink,
        }
    }

    fn rig() -> Rig {
        rig_with(HeapConfig::default())
    }

    #[test]
    fn test_alloc_free_net_zero() {
        let rig = rig();
        for size in [1usize, 64, 4096, MAX_ALLOC_SIZE] {
            let ptr = rig.heap.alloc(size).unwrap();
            assert_eq!(rig.heap.live_allocations(), 1);
            // Writing all requested bytes must be safe and must not
            // disturb the guards.
            unsafe {
                core::ptr::write_bytes(ptr.as_ptr(), 0x5a, size);
                rig.heap.free(ptr.as_ptr());
            }
            assert_eq!(rig.heap.live_allocations(), 0);
        }
        assert_eq!(rig.general.live(), 0);
        assert!(rig.sink.is_empty());
    }

    #[test]
    fn test_allocation_is_zeroed() {
        let rig = rig();
        let ptr = rig.heap.alloc(64).unwrap();
        let bytes = unsafe { slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { rig.heap.free(ptr.as_ptr()) };
    }

    #[test]
    fn test_invalid_sizes_never_touch_registry() {
        let rig = rig();
        assert!(rig.heap.alloc(0).is_none());
        assert!(rig.heap.alloc(MAX_ALLOC_SIZE + 1).is_none());
        assert_eq!(rig.heap.live_allocations(), 0);
        assert_eq!(rig.general.live(), 0);
        assert!(rig.sink.is_empty());
    }

    #[test]
    fn test_full_payload_write_leaves_guards_clean() {
        let rig = rig();
        let ptr = rig.heap.alloc_at(64, SITE_A).unwrap();
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0xff, 64) };
        let verdict = rig.heap.free_tracked(ptr, AllocKind::General);
        assert!(verdict.header_ok);
        assert!(verdict.tail_ok);
        assert_eq!(rig.heap.live_allocations(), 0);
    }

    #[test]
    fn test_one_byte_overrun_trips_tail_guard() {
        let rig = rig();
        let ptr = rig.heap.alloc_at(64, SITE_A).unwrap();
        // 65th byte lands in the tail guard.
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0xff, 65) };
        let verdict = rig.heap.free_tracked(ptr, AllocKind::General);
        assert!(verdict.header_ok);
        assert!(!verdict.tail_ok);
        assert_eq!(verdict.origin, SITE_A);
        // The storage was still released.
        assert_eq!(rig.heap.live_allocations(), 0);
        assert_eq!(rig.general.live(), 0);
    }

    #[test]
    fn test_underrun_trips_header_guard() {
        let rig = rig();
        let ptr = rig.heap.alloc_at(32, SITE_B).unwrap();
        unsafe { *ptr.as_ptr().sub(1) ^= 0xff };
        let verdict = rig.heap.free_tracked(ptr, AllocKind::General);
        assert!(!verdict.header_ok);
        assert!(verdict.tail_ok);
        assert_eq!(verdict.origin, SITE_B);
        assert_eq!(rig.general.live(), 0);
    }

    #[test]
    fn test_tail_guard_sits_at_requested_size_offset() {
        // Pins the offset convention: the tail guard is read back at
        // user_ptr + requested size, exactly where construction wrote it.
        let rig = rig();
        let ptr = rig.heap.alloc(16).unwrap();
        let tail = unsafe { slice::from_raw_parts(ptr.as_ptr().add(16), CANARY_LEN) };
        assert_eq!(tail, &TAIL_CANARY);
        unsafe { rig.heap.free(ptr.as_ptr()) };
    }

    #[test]
    fn test_null_free_is_noop() {
        let rig = rig();
        unsafe {
            rig.heap.free(core::ptr::null_mut());
            rig.heap.free_dma(core::ptr::null_mut());
            rig.heap.free_virt(core::ptr::null_mut());
        }
        assert!(rig.sink.is_empty());
    }

    #[test]
    #[should_panic(expected = "untracked pointer")]
    fn test_double_free_is_fatal() {
        let rig = rig();
        let ptr = rig.heap.alloc(64).unwrap();
        unsafe {
            rig.heap.free(ptr.as_ptr());
            rig.heap.free(ptr.as_ptr());
        }
    }

    #[test]
    #[should_panic(expected = "untracked pointer")]
    fn test_foreign_pointer_free_is_fatal() {
        let rig = rig();
        let mut local = [0u8; 8];
        unsafe { rig.heap.free(local.as_mut_ptr()) };
    }

    #[test]
    fn test_nonblocking_exhaustion_is_quiet() {
        let rig = rig();
        rig.context.set_atomic(true);
        rig.general.set_exhausted(true);
        assert!(rig.heap.alloc(64).is_none());
        assert!(rig.sink.is_empty());
        assert_eq!(rig.heap.live_allocations(), 0);
    }

    #[test]
    fn test_blocking_exhaustion_is_escalated() {
        let rig = rig();
        rig.general.set_exhausted(true);
        assert!(rig.heap.alloc(64).is_none());
        // The raw request that failed includes guard overhead.
        assert_eq!(
            rig.sink.events(),
            alloc::vec![FatalEvent::BlockingAllocFailed {
                size: 64 + 2 * CANARY_LEN
            }]
        );
    }

    #[test]
    fn test_drain_coalesces_single_site() {
        let rig = rig();
        for _ in 0..100 {
            rig.heap.alloc_at(32, SITE_B).unwrap();
        }
        assert_eq!(rig.heap.live_allocations(), 100);

        let report = rig.heap.drain_and_report();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].count, 100);
        assert_eq!(report.entries[0].size, 32);
        assert_eq!(report.entries[0].origin, SITE_B);
        assert_eq!(rig.heap.live_allocations(), 0);
        assert_eq!(rig.general.live(), 0);
    }

    #[test]
    fn test_drain_separates_distinct_sites() {
        let rig = rig();
        rig.heap.alloc_at(8, SITE_A).unwrap();
        rig.heap.alloc_at(8, SITE_B).unwrap();
        let report = rig.heap.drain_and_report();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn test_drain_on_clean_heap_is_empty() {
        let rig = rig();
        let ptr = rig.heap.alloc(64).unwrap();
        unsafe { rig.heap.free(ptr.as_ptr()) };
        let report = rig.heap.drain_and_report();
        assert!(report.is_empty());
    }

    #[test]
    fn test_shutdown_reports_leaks_to_fatal_sink() {
        let rig = rig();
        rig.heap.alloc_at(16, SITE_A).unwrap();
        rig.heap.alloc_at(16, SITE_A).unwrap();
        let report = rig.heap.shutdown();
        assert_eq!(report.total(), 2);
        assert_eq!(
            rig.sink.events(),
            alloc::vec![FatalEvent::LeakAtShutdown { leaked: 2 }]
        );
    }

    #[test]
    #[should_panic(expected = "leaked at shutdown")]
    fn test_shutdown_halts_on_leak_when_configured() {
        let rig = rig_with(HeapConfig {
            halt_on_leak: true,
            ..Default::default()
        });
        rig.heap.alloc(16).unwrap();
        rig.heap.shutdown();
    }

    #[test]
    fn test_clean_shutdown_is_silent() {
        let rig = rig_with(HeapConfig {
            halt_on_leak: true,
            ..Default::default()
        });
        let ptr = rig.heap.alloc(16).unwrap();
        unsafe { rig.heap.free(ptr.as_ptr()) };
        let report = rig.heap.shutdown();
        assert!(report.is_empty());
    }

    #[test]
    fn test_dma_rejected_in_interrupt_context() {
        let rig = rig();
        rig.context.set_in_interrupt(true);
        assert!(rig.heap.alloc_dma(64).is_none());
        assert_eq!(rig.heap.live_allocations(), 0);
        assert!(rig.sink.is_empty());
    }

    #[test]
    fn test_dma_roundtrip_uses_dma_allocator() {
        let rig = rig();
        let ptr = rig.heap.alloc_dma(128).unwrap();
        assert_eq!(rig.dma.live(), 1);
        assert_eq!(rig.general.live(), 0);
        assert_eq!(rig.heap.live_allocations(), 1);
        unsafe { rig.heap.free_dma(ptr.as_ptr()) };
        assert_eq!(rig.dma.live(), 0);
        assert_eq!(rig.heap.live_allocations(), 0);
    }

    #[test]
    fn test_virt_roundtrip_is_untracked() {
        let rig = rig();
        let ptr = rig.heap.alloc_virt(8192).unwrap();
        assert_eq!(rig.virt.live(), 1);
        assert_eq!(rig.general.live(), 0);
        assert_eq!(rig.heap.live_allocations(), 0);
        unsafe { rig.heap.free_virt(ptr.as_ptr()) };
        assert_eq!(rig.virt.live(), 0);
        assert!(rig.sink.is_empty());
    }

    #[test]
    fn test_virt_size_cap_is_exclusive() {
        // The tracked path accepts exactly MAX_ALLOC_SIZE, this one rejects it.
        let rig = rig();
        assert!(rig.heap.alloc_virt(0).is_none());
        assert!(rig.heap.alloc_virt(MAX_ALLOC_SIZE).is_none());
        assert_eq!(rig.virt.live(), 0);

        let ptr = rig.heap.alloc_virt(MAX_ALLOC_SIZE - 1).unwrap();
        unsafe { rig.heap.free_virt(ptr.as_ptr()) };
    }

    #[test]
    fn test_virt_exhaustion_is_escalated() {
        let rig = rig();
        rig.virt.set_exhausted(true);
        assert!(rig.heap.alloc_virt(64).is_none());
        assert_eq!(
            rig.sink.events(),
            alloc::vec![FatalEvent::BlockingAllocFailed { size: 64 }]
        );
    }

    #[test]
    fn test_virt_untouched_by_mode_switch() {
        let rig = rig_with(HeapConfig::passthrough());
        let ptr = rig.heap.alloc_virt(256).unwrap();
        assert_eq!(rig.virt.live(), 1);
        assert_eq!(rig.pool.gets(), 0);
        unsafe { rig.heap.free_virt(ptr.as_ptr()) };
        assert_eq!(rig.virt.live(), 0);
    }

    #[test]
    fn test_passthrough_skips_registry() {
        let rig = rig_with(HeapConfig::passthrough());
        let ptr = rig.heap.alloc(64).unwrap();
        assert_eq!(rig.heap.live_allocations(), 0);
        assert_eq!(rig.general.live(), 1);
        unsafe { rig.heap.free(ptr.as_ptr()) };
        assert_eq!(rig.general.live(), 0);
    }

    #[test]
    fn test_passthrough_large_request_prefers_pool() {
        let rig = rig_with(HeapConfig::passthrough());
        let ptr = rig.heap.alloc(8192).unwrap();
        assert_eq!(rig.pool.gets(), 1);
        assert_eq!(rig.general.live(), 0);
        unsafe { rig.heap.free(ptr.as_ptr()) };
        assert_eq!(rig.pool.puts(), 1);
        assert_eq!(rig.pool.outstanding(), 0);
    }

    #[test]
    fn test_passthrough_small_request_skips_pool() {
        let rig = rig_with(HeapConfig::passthrough());
        let ptr = rig.heap.alloc(64).unwrap();
        assert_eq!(rig.pool.gets(), 0);
        assert_eq!(rig.general.live(), 1);
        unsafe { rig.heap.free(ptr.as_ptr()) };
        assert_eq!(rig.general.live(), 0);
    }

    #[test]
    fn test_instrumented_path_ignores_pool() {
        let rig = rig();
        let ptr = rig.heap.alloc(8192).unwrap();
        assert_eq!(rig.pool.gets(), 0);
        assert_eq!(rig.general.live(), 1);
        unsafe { rig.heap.free(ptr.as_ptr()) };
    }

    #[test]
    fn test_registry_full_still_returns_memory() {
        let rig = rig_with(HeapConfig {
            capacity: 1,
            ..Default::default()
        });
        let first = rig.heap.alloc(16).unwrap();
        // Over capacity: usable but untracked.
        let second = rig.heap.alloc(16).unwrap();
        assert_eq!(rig.heap.live_allocations(), 1);
        assert_eq!(rig.general.live(), 2);
        unsafe {
            rig.heap.free(first.as_ptr());
            // The untracked pointer must not go through the guarded free;
            // release it behind the heap's back to end the test clean.
            rig.general
                .release(NonNull::new_unchecked(second.as_ptr().sub(CANARY_LEN)));
        }
    }

    #[test]
    fn test_critical_sections_are_balanced() {
        let rig = rig();
        let ptr = rig.heap.alloc(64).unwrap();
        unsafe { rig.heap.free(ptr.as_ptr()) };
        assert_eq!(rig.context.critical_depth(), 0);
    }
}
