//! Worker allocator registry
//!
//! Maps a worker's identity to its thread allocator. A worker looks its
//! handle up once and keeps using it; the per-handle mutex is only ever
//! contended if a handle is shared across threads on purpose.
//!
//! Entries outlive their threads. Spare ranges held by allocators that are
//! not in use are pulled back with [`AllocatorRegistry::reclaim_idle`] once
//! the region runs short, so capacity is never stranded in a finished worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use super::{GlobalAllocator, ThreadAllocator};

/// Shared handle to one worker's allocator
pub type AllocatorHandle = Arc<Mutex<ThreadAllocator>>;

/// Registry of thread allocators keyed by worker identity
pub struct AllocatorRegistry {
    global: Arc<GlobalAllocator>,
    workers: RwLock<HashMap<ThreadId, AllocatorHandle>>,
}

impl AllocatorRegistry {
    pub fn new(global: Arc<GlobalAllocator>) -> Self {
        Self {
            global,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Handle for the calling thread, created on first use
    pub fn current(&self) -> AllocatorHandle {
        self.acquire(thread::current().id())
    }

    /// Handle for a worker, created on first use
    pub fn acquire(&self, worker: ThreadId) -> AllocatorHandle {
        if let Some(handle) = self.workers.read().get(&worker) {
            return Arc::clone(handle);
        }

        let mut workers = self.workers.write();
        let handle = workers.entry(worker).or_insert_with(|| {
            tracing::debug!(?worker, "Registered worker allocator");
            Arc::new(Mutex::new(ThreadAllocator::new(Arc::clone(&self.global))))
        });
        Arc::clone(handle)
    }

    /// Forget a worker; its ranges return to the shared free list once no
    /// clone of the handle remains
    pub fn release(&self, worker: ThreadId) -> bool {
        self.workers.write().remove(&worker).is_some()
    }

    /// Number of registered workers
    pub fn worker_count(&self) -> usize {
        self.workers.read().len()
    }

    /// Move the spare ranges of every allocator not currently locked to the
    /// shared free list, returning the number of blocks reclaimed
    ///
    /// The caller's own handle is skipped if it holds the lock.
    pub fn reclaim_idle(&self) -> u64 {
        let workers = self.workers.read();
        let reclaimed: u64 = workers
            .values()
            .filter_map(|handle| handle.try_lock())
            .map(|mut alloc| alloc.release_spare())
            .sum();
        if reclaimed > 0 {
            tracing::info!(
                reclaimed,
                workers = workers.len(),
                "Reclaimed spare blocks from idle workers"
            );
        }
        reclaimed
    }

    /// Forget every worker, returning their ranges to the shared free list
    pub fn drain(&self) {
        self.workers.write().clear();
    }

    pub fn global(&self) -> &Arc<GlobalAllocator> {
        &self.global
    }
}
