//! Size-classed free list
//!
//! Freed block ranges are filed by their block count. Ranges are never
//! coalesced; a request that finds its own class empty may take a range from
//! a larger class and re-file the remainder.

/// Free block ranges bucketed by block count
#[derive(Debug)]
pub struct FreeList {
    /// `classes[n]` holds the start blocks of free ranges of exactly `n` blocks;
    /// index 0 is unused
    classes: Vec<Vec<u32>>,
    /// Total free blocks across all classes
    free_blocks: u64,
}

impl FreeList {
    /// Create a free list with classes `1..=max_class`
    pub fn new(max_class: usize) -> Self {
        Self {
            classes: vec![Vec::new(); max_class + 1],
            free_blocks: 0,
        }
    }

    /// Largest size class
    pub fn max_class(&self) -> usize {
        self.classes.len() - 1
    }

    /// File a free range of `size` blocks starting at `block`
    ///
    /// Ranges larger than the largest class are filed as max-class chunks.
    pub fn push(&mut self, size: usize, block: u32) {
        let max = self.max_class();
        let mut start = block;
        let mut remaining = size;

        while remaining > 0 {
            let chunk = remaining.min(max);
            self.classes[chunk].push(start);
            self.free_blocks += chunk as u64;
            start += chunk as u32;
            remaining -= chunk;
        }
    }

    /// Take a range of exactly `size` blocks
    ///
    /// Tries the exact class first, then the smallest larger class, splitting
    /// off the tail.
    pub fn pop(&mut self, size: usize) -> Option<u32> {
        if size == 0 || size > self.max_class() {
            return None;
        }

        if let Some(block) = self.classes[size].pop() {
            self.free_blocks -= size as u64;
            return Some(block);
        }

        for class in size + 1..self.classes.len() {
            if let Some(block) = self.classes[class].pop() {
                self.free_blocks -= class as u64;
                self.push(class - size, block + size as u32);
                return Some(block);
            }
        }
        None
    }

    /// Move every range from `other` into `self`
    pub fn merge_from(&mut self, other: &mut FreeList) {
        for (class, blocks) in other.classes.iter_mut().enumerate().skip(1) {
            for block in blocks.drain(..) {
                self.push(class, block);
            }
        }
        other.free_blocks = 0;
    }

    /// Total free blocks held
    pub fn free_blocks(&self) -> u64 {
        self.free_blocks
    }

    /// Number of ranges held
    pub fn range_count(&self) -> usize {
        self.classes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.free_blocks == 0
    }
}
