//! Thread-local allocation tier
//!
//! Each worker owns one `ThreadAllocator`. It bump-allocates inside the
//! segment it currently holds and keeps its own size-classed free list, so
//! the hot path takes no locks.

use std::sync::Arc;

use crate::error::{NvmError, Result};

use super::{FreeList, GlobalAllocator};

/// Per-worker bump allocator over one segment at a time
pub struct ThreadAllocator {
    global: Arc<GlobalAllocator>,
    /// Next unallocated block in the held segment
    current: u32,
    /// End (exclusive) of the held segment; equal to `current` when none is held
    end: u32,
    free: FreeList,
    stats: ThreadAllocatorStats,
}

/// Per-worker allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadAllocatorStats {
    pub bump_allocations: u64,
    pub free_list_hits: u64,
    pub shared_hits: u64,
    pub segments_taken: u64,
    pub recycled: u64,
}

impl ThreadAllocator {
    /// Create an allocator that holds no segment yet
    pub fn new(global: Arc<GlobalAllocator>) -> Self {
        let max_class = global.max_class();
        Self {
            global,
            current: 0,
            end: 0,
            free: FreeList::new(max_class),
            stats: ThreadAllocatorStats::default(),
        }
    }

    /// Allocate `size` contiguous blocks, returning the first block index
    ///
    /// Order: local free list, bump within the held segment, a fresh segment
    /// (after filing the old tail), then the shared free list.
    pub fn allocate(&mut self, size: usize) -> Result<u32> {
        if size == 0 || size > self.free.max_class() {
            return Err(NvmError::OutOfMemory(format!(
                "cannot allocate {} blocks (max {})",
                size,
                self.free.max_class()
            )));
        }

        if let Some(block) = self.free.pop(size) {
            self.stats.free_list_hits += 1;
            return Ok(block);
        }

        if let Some(block) = self.bump(size) {
            return Ok(block);
        }

        // Held segment cannot fit the request: keep its tail locally
        let tail = (self.end - self.current) as usize;
        if tail > 0 {
            self.free.push(tail, self.current);
        }
        self.current = self.end;

        while let Some(segment) = self.global.allocate_segment() {
            self.stats.segments_taken += 1;
            self.current = segment.start;
            self.end = segment.end;
            if let Some(block) = self.bump(size) {
                return Ok(block);
            }
            // Short final segment; file it and keep looking
            let tail = (self.end - self.current) as usize;
            if tail > 0 {
                self.free.push(tail, self.current);
            }
            self.current = self.end;
        }

        // The tail we just filed may itself satisfy a smaller request later,
        // but not this one unless a split applies
        if let Some(block) = self.free.pop(size) {
            self.stats.free_list_hits += 1;
            return Ok(block);
        }

        if let Some(block) = self.global.allocate_shared(size) {
            self.stats.shared_hits += 1;
            return Ok(block);
        }

        Err(NvmError::OutOfMemory(format!(
            "no segment or free range for {} blocks",
            size
        )))
    }

    /// Return a range to the local free list under its size class
    pub fn recycle(&mut self, size: usize, block: u32) {
        if size == 0 {
            return;
        }
        self.stats.recycled += 1;
        self.free.push(size, block);
    }

    /// Blocks available without touching the global tier
    pub fn local_free_blocks(&self) -> u64 {
        self.free.free_blocks() + (self.end - self.current) as u64
    }

    pub fn stats(&self) -> ThreadAllocatorStats {
        self.stats
    }

    /// Hand the held segment tail and every locally freed range to the
    /// shared free list, returning the number of blocks given up
    ///
    /// The allocator stays usable; its next request takes a fresh segment
    /// or falls back to the shared list.
    pub fn release_spare(&mut self) -> u64 {
        let tail = (self.end - self.current) as usize;
        if tail > 0 {
            self.free.push(tail, self.current);
            self.current = self.end;
        }
        let spare = self.free.free_blocks();
        self.global.release(&mut self.free);
        spare
    }

    fn bump(&mut self, size: usize) -> Option<u32> {
        let remaining = (self.end - self.current) as usize;
        if size > remaining {
            return None;
        }
        let block = self.current;
        self.current += size as u32;
        self.stats.bump_allocations += 1;
        Some(block)
    }
}

impl Drop for ThreadAllocator {
    /// Hand the unused segment tail and every locally freed range back to
    /// the shared free list
    fn drop(&mut self) {
        self.release_spare();
    }
}
