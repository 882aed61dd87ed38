//! # nvmkv
//!
//! An embedded key-value engine over a fixed-size memory-mapped persistent
//! region, with:
//! - Hash-indexed, append-mostly record storage with per-record checksums
//! - A two-tier block allocator (global segments + per-worker bump allocation)
//! - Crash recovery by scanning the region, no separate metadata
//! - Lock-free `get`/`set` from many threads
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Engine (get / set)                          │
//! └───────────┬───────────────────────────────┬─────────────────┘
//!             │                               │
//!             ▼                               ▼
//!   ┌──────────────────┐           ┌─────────────────────┐
//!   │  HashDirectory   │──chain──► │    RecordStore      │
//!   │ (atomic buckets) │           │ (key-index arena)   │
//!   └──────────────────┘           └──────────┬──────────┘
//!                                             │ allocate / recycle
//!                                             ▼
//!                                  ┌─────────────────────┐
//!                                  │   Block Allocator   │
//!                                  │ (global + workers)  │
//!                                  └──────────┬──────────┘
//!                                             │
//!                                             ▼
//!                                  ┌─────────────────────┐
//!                                  │  PersistentRegion   │
//!                                  │  (mmap, blocks)     │
//!                                  └─────────────────────┘
//! ```
//!
//! On open of an existing file the `RecoveryScanner` replays the region into
//! the directory, the arena and the allocator before any request is served.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod hash;
pub mod region;
pub mod alloc;
pub mod store;
pub mod directory;
pub mod recovery;
pub mod diag;
pub mod engine;
pub mod db;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NvmError, Result, Status};
pub use config::{Config, OomPolicy, PersistStrategy};
pub use engine::{Engine, EngineStats, Worker};
pub use db::{create_or_open, Db};
pub use recovery::RecoveryResult;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of nvmkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
