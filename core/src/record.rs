//! # Tracked-Allocation Record
//!
//! Per-allocation metadata for the instrumented path. Unlike the classic
//! prefix-header trick, the record never lives inside the backing storage:
//! only the guard bytes do, and the record sits in the registry keyed by
//! the caller-visible address.

use core::fmt;
use core::panic::Location;

use crate::canary::CANARY_LEN;

/// Call-site provenance of an allocation.
///
/// `file` is a compile-time literal captured through `#[track_caller]`;
/// it is never owned, copied, or freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Source file of the allocating call.
    pub file: &'static str,
    /// Line of the allocating call.
    pub line: u32,
}

impl Origin {
    /// Capture the nearest `#[track_caller]` caller.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&'static Location<'static>> for Origin {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Which raw allocator backs an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// Ordinary guarded allocation.
    General,
    /// DMA-class allocation; never legal from interrupt context.
    Dma,
}

/// One live tracked allocation.
///
/// Backing-storage layout:
///
/// ```text
/// base          base + CANARY_LEN          base + CANARY_LEN + size
///  │ header canary │  caller-visible bytes  │ tail canary │
/// ```
///
/// The tail guard is never inside caller-addressable space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRecord {
    /// Address of the backing storage (start of the header canary).
    pub base: usize,
    /// Caller-visible size in bytes, guard overhead excluded.
    pub size: usize,
    /// Provenance of the allocating call.
    pub origin: Origin,
    /// Registry insertion sequence; larger means more recent.
    pub seq: u64,
    /// Raw allocator that must release the storage.
    pub kind: AllocKind,
}

impl AllocRecord {
    /// Total backing-storage length, both guard bands included.
    pub const fn total_size(&self) -> usize {
        self.size + 2 * CANARY_LEN
    }

    /// Caller-visible address, one guard band past `base`.
    pub const fn user_addr(&self) -> usize {
        self.base + CANARY_LEN
    }

    /// Start of the tail guard.
    ///
    /// Derived from the *recorded* size, matching where the guard was
    /// written at construction; if size bookkeeping ever drifts, the tail
    /// check trips rather than silently following the drift.
    pub const fn tail_addr(&self) -> usize {
        self.user_addr() + self.size
    }
}
