//! Block Allocator Module
//!
//! Two-tier allocation of contiguous block ranges from the persistent region.
//!
//! ## Tiers
//! - **Global**: an atomic segment counter over the whole region, with a
//!   mutex-guarded shared free list once segments run out
//! - **Thread-local**: one bump allocator per worker holding one segment at
//!   a time, plus its own size-classed free list
//!
//! ```text
//!   worker ──► ThreadAllocator ──(local free list / bump)──► block
//!                   │ segment full
//!                   ▼
//!             GlobalAllocator ──(next segment)──► new segment
//!                   │ exhausted
//!                   ▼
//!              shared FreeList (Mutex)
//! ```
//!
//! Freed ranges are filed by block count and never coalesced.

mod free_list;
mod global;
mod local;
mod registry;

pub use free_list::FreeList;
pub use global::{AllocatorStats, GlobalAllocator};
pub use local::{ThreadAllocator, ThreadAllocatorStats};
pub use registry::{AllocatorHandle, AllocatorRegistry};
