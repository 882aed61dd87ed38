//! Global allocation tier
//!
//! Hands whole segments to thread allocators through a single atomic
//! counter. Once every segment has been handed out, requests fall back to a
//! shared free list fed by released thread allocators.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

use super::FreeList;

/// Process-wide (per engine) segment allocator
pub struct GlobalAllocator {
    /// Next segment to hand out; may run past `segment_count`
    next_segment: CachePadded<AtomicU64>,
    segment_count: u32,
    block_per_segment: u32,
    total_blocks: u32,
    max_class: usize,
    /// Ranges returned by thread allocators, shared by every thread
    shared: Mutex<FreeList>,
}

/// Snapshot of global allocator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub segments_issued: u32,
    pub segment_count: u32,
    pub shared_free_blocks: u64,
    pub shared_free_ranges: usize,
}

impl GlobalAllocator {
    /// Partition `total_blocks` into segments of `block_per_segment` blocks
    ///
    /// The last segment is short when the region is not a whole number of
    /// segments. `max_class` is the largest allocation in blocks.
    pub fn new(total_blocks: u32, block_per_segment: u32, max_class: usize) -> Self {
        let segment_count = total_blocks.div_ceil(block_per_segment);
        Self {
            next_segment: CachePadded::new(AtomicU64::new(0)),
            segment_count,
            block_per_segment,
            total_blocks,
            max_class,
            shared: Mutex::new(FreeList::new(max_class)),
        }
    }

    /// Hand out the next untouched segment as a block range
    pub fn allocate_segment(&self) -> Option<Range<u32>> {
        let segment = self.next_segment.fetch_add(1, Ordering::Relaxed);
        if segment >= self.segment_count as u64 {
            return None;
        }

        let range = self.segment_range(segment as u32);
        tracing::debug!(
            segment,
            start = range.start,
            end = range.end,
            "Handed out segment"
        );
        Some(range)
    }

    /// Take `size` blocks from the shared free list
    pub fn allocate_shared(&self, size: usize) -> Option<u32> {
        let block = self.shared.lock().pop(size);
        if block.is_some() {
            tracing::warn!(size, "Segments exhausted, served from shared free list");
        }
        block
    }

    /// Return a single range to the shared free list
    pub fn release_range(&self, size: usize, block: u32) {
        if size > 0 {
            self.shared.lock().push(size, block);
        }
    }

    /// Move every range of a thread-local free list to the shared free list
    pub fn release(&self, list: &mut FreeList) {
        if !list.is_empty() {
            self.shared.lock().merge_from(list);
        }
    }

    /// Rebuild allocator state from the occupied ranges found by recovery
    ///
    /// `occupied` yields `(start_block, block_count)` in ascending,
    /// non-overlapping order. Segments up to the one holding the last occupied
    /// block are treated as handed out; the unoccupied gaps inside them go to
    /// the shared free list.
    pub fn restore<I>(&self, occupied: I)
    where
        I: IntoIterator<Item = (u32, usize)>,
    {
        let mut shared = self.shared.lock();
        let mut cursor: u32 = 0;

        for (start, len) in occupied {
            if start > cursor {
                shared.push((start - cursor) as usize, cursor);
            }
            cursor = cursor.max(start + len as u32);
        }

        if cursor == 0 {
            return;
        }

        let touched_segments = (cursor - 1) / self.block_per_segment + 1;
        let touched_end = self.segment_range(touched_segments - 1).end;
        if touched_end > cursor {
            shared.push((touched_end - cursor) as usize, cursor);
        }
        self.next_segment
            .store(touched_segments as u64, Ordering::Relaxed);

        tracing::info!(
            touched_segments,
            reclaimed_blocks = shared.free_blocks(),
            "Restored allocator state"
        );
    }

    /// Block range covered by a segment
    pub fn segment_range(&self, segment: u32) -> Range<u32> {
        let start = segment * self.block_per_segment;
        let end = start
            .saturating_add(self.block_per_segment)
            .min(self.total_blocks);
        start..end
    }

    /// Largest size class in blocks
    pub fn max_class(&self) -> usize {
        self.max_class
    }

    pub fn stats(&self) -> AllocatorStats {
        let issued = self.next_segment.load(Ordering::Relaxed);
        let shared = self.shared.lock();
        AllocatorStats {
            segments_issued: issued.min(self.segment_count as u64) as u32,
            segment_count: self.segment_count,
            shared_free_blocks: shared.free_blocks(),
            shared_free_ranges: shared.range_count(),
        }
    }
}
