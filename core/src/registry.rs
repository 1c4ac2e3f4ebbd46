//! # Allocation Registry
//!
//! Bounded, mutually exclusive table of live tracked allocations, keyed by
//! the caller-visible address. Supports insert-on-allocate,
//! remove-on-free, and bulk drain with coalesced leak reporting at
//! shutdown.
//!
//! The registry never touches the backing storage itself; callers release
//! memory, the registry only accounts for it. Critical sections are O(1)
//! except for drain, which is O(live entries). Interrupt masking around
//! the lock is the caller's job (see `guardmem_hal::CriticalSection`), and
//! no caller holds the lock across a raw allocate/release.

use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use spin::Mutex;

use crate::record::{AllocRecord, Origin};

/// Default cap on simultaneously tracked allocations.
pub const DEFAULT_CAPACITY: usize = 60_000;

/// Registry failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The table is at capacity; the allocation stays untracked.
    Full,
    /// The address is not a live tracked allocation: a double free or a
    /// pointer that never came from this subsystem.
    UnknownPointer(usize),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "registry is full"),
            Self::UnknownPointer(addr) => {
                write!(f, "address {:#x} is not a tracked allocation", addr)
            }
        }
    }
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

struct RegistryInner {
    live: HashMap<usize, AllocRecord>,
    next_seq: u64,
    capacity: usize,
}

/// Bounded table of live tracked allocations.
pub struct AllocationRegistry {
    inner: Mutex<RegistryInner>,
}

impl AllocationRegistry {
    /// Create a registry with table storage reserved up front, so
    /// steady-state insert/remove never allocates under the lock.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                live: HashMap::with_capacity(capacity),
                next_seq: 0,
                capacity,
            }),
        }
    }

    /// Track a new allocation, stamping its insertion sequence.
    pub fn insert(&self, mut record: AllocRecord) -> RegistryResult<()> {
        let mut inner = self.inner.lock();
        if inner.live.len() >= inner.capacity {
            return Err(RegistryError::Full);
        }
        record.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.live.insert(record.user_addr(), record);
        Ok(())
    }

    /// Stop tracking the allocation at `user_addr` and hand back its
    /// record. An unknown address is the caller's consistency violation to
    /// escalate.
    pub fn remove(&self, user_addr: usize) -> RegistryResult<AllocRecord> {
        self.inner
            .lock()
            .live
            .remove(&user_addr)
            .ok_or(RegistryError::UnknownPointer(user_addr))
    }

    /// Number of live tracked allocations.
    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every remaining record, most recent first.
    ///
    /// The caller owns releasing each record's backing storage. The lock is
    /// held only for the table drain itself; ordering happens outside it.
    pub fn drain(&self) -> Vec<AllocRecord> {
        let mut records: Vec<AllocRecord> = {
            let mut inner = self.inner.lock();
            inner.live.drain().map(|(_, r)| r).collect()
        };
        records.sort_unstable_by(|a, b| b.seq.cmp(&a.seq));
        records
    }
}

impl fmt::Debug for AllocationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationRegistry")
            .field("live", &self.len())
            .finish()
    }
}

// =============================================================================
// Leak reporting
// =============================================================================

/// One coalesced leak: `count` allocations of `size` bytes from `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakEntry {
    /// Allocating call site.
    pub origin: Origin,
    /// Caller-visible size of each leaked allocation.
    pub size: usize,
    /// How many consecutive drained records matched.
    pub count: usize,
}

/// Shutdown leak summary.
///
/// Consecutive drained records with the same origin and size collapse into
/// one counted entry, so a call site that leaked ten thousand times
/// produces one line, not ten thousand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// Coalesced entries in drain order.
    pub entries: Vec<LeakEntry>,
}

impl LeakReport {
    /// Coalesce drained records and log each resulting entry.
    pub fn coalesce(records: &[AllocRecord]) -> Self {
        let mut entries: Vec<LeakEntry> = Vec::new();
        for record in records {
            match entries.last_mut() {
                Some(entry) if entry.origin == record.origin && entry.size == record.size => {
                    entry.count += 1;
                }
                _ => entries.push(LeakEntry {
                    origin: record.origin,
                    size: record.size,
                    count: 1,
                }),
            }
        }
        for entry in &entries {
            log::error!(
                "memory leak x{}: {} bytes allocated at {}",
                entry.count,
                entry.size,
                entry.origin
            );
        }
        Self { entries }
    }

    /// Total leaked allocations across all entries.
    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// True when nothing leaked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
