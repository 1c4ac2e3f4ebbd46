//! # guardmem Core
//!
//! The guarded-allocation subsystem: an instrumentation layer between
//! calling code and a host raw allocator. It adds leak and corruption
//! detection, context-aware allocation flags, and latency observability
//! without ever managing memory itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        GuardedHeap                           │
//! │   alloc / alloc_dma / alloc_virt / free / drain / shutdown   │
//! │                                                              │
//! │  ┌───────────┐  ┌──────────────┐  ┌────────────────────────┐ │
//! │  │  Policy   │  │   Watchdog   │  │  Allocation Registry   │ │
//! │  │ size/ctx  │  │  raw-call    │  │  bounded live table    │ │
//! │  │ -> flags  │  │  latency     │  │  + shutdown drain      │ │
//! │  └───────────┘  └──────────────┘  └────────────────────────┘ │
//! │         │                │                    │              │
//! │  ┌──────┴────────────────┴────────────────────┴───────────┐  │
//! │  │              guardmem-hal collaborators                │  │
//! │  │  RawAllocator · Clock · ContextQuery · Pool · Fatal    │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every tracked allocation is bracketed by 8-byte canary bands
//! ([`canary`]); its metadata lives in the [`registry`] keyed by the
//! caller-visible address, so free-time validation is an O(1) table hit
//! rather than pointer arithmetic.
//!
//! Byte-manipulation wrappers with defined null/zero-length behavior live
//! in [`ops`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod canary;
pub mod heap;
pub mod ops;
pub mod policy;
pub mod record;
pub mod registry;
pub mod watchdog;

pub use heap::{GuardedHeap, HeapConfig, HostServices, TrackingMode};
pub use record::{AllocKind, AllocRecord, Origin};
pub use registry::{
    AllocationRegistry, LeakEntry, LeakReport, RegistryError, RegistryResult,
};
