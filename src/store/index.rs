//! Key-index arena
//!
//! Per-key metadata lives in a dense arena addressed by `KeyIndex`. Chain
//! links are indices, never references, so the whole structure can be
//! rebuilt from the region by the recovery scan.
//!
//! Entries are appended by an atomic counter and never freed. The arena is
//! split into fixed-size chunks that are materialised on first touch, so a
//! large capacity costs nothing until keys arrive.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;

use super::record::{Key, KEY_LEN};

/// Handle into the key-index arena
pub type KeyIndex = u32;

/// Sentinel: end of chain / empty bucket
pub const EMPTY: KeyIndex = u32::MAX;

const CHUNK_SHIFT: u32 = 16;
const CHUNK_LEN: usize = 1 << CHUNK_SHIFT;
const CHUNK_MASK: u32 = (1 << CHUNK_SHIFT) - 1;

/// Where a key's current record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub block: u32,
    pub len: u16,
    pub version: u16,
}

impl Location {
    #[inline]
    fn pack(self) -> u64 {
        ((self.block as u64) << 32) | ((self.len as u64) << 16) | self.version as u64
    }

    #[inline]
    fn unpack(word: u64) -> Self {
        Self {
            block: (word >> 32) as u32,
            len: (word >> 16) as u16,
            version: word as u16,
        }
    }
}

/// One key's metadata: chain link, packed location, and the key itself
struct KeyEntry {
    next: AtomicU32,
    location: AtomicU64,
    key: [AtomicU64; 2],
}

impl Default for KeyEntry {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(EMPTY),
            location: AtomicU64::new(0),
            key: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }
}

/// Append-only arena of key-index entries
pub struct KeyIndexTable {
    chunks: Box<[OnceLock<Box<[KeyEntry]>>]>,
    capacity: u32,
    next_index: AtomicU32,
}

impl KeyIndexTable {
    /// Create an arena that can hold `capacity` keys (`capacity < u32::MAX`)
    pub fn new(capacity: u32) -> Self {
        let chunk_count = (capacity as usize).div_ceil(CHUNK_LEN);
        Self {
            chunks: (0..chunk_count).map(|_| OnceLock::new()).collect(),
            capacity,
            next_index: AtomicU32::new(0),
        }
    }

    /// Reserve the next entry; `None` once the arena is full
    pub fn reserve(&self) -> Option<KeyIndex> {
        let capacity = self.capacity;
        self.next_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < capacity).then_some(n + 1)
            })
            .ok()
    }

    /// Fill a freshly reserved entry
    ///
    /// Must happen before the entry is published through the directory.
    pub fn init(&self, index: KeyIndex, key: &Key, location: Location, next: KeyIndex) {
        let entry = self.entry(index);
        let (lo, hi) = split_key(key);
        entry.key[0].store(lo, Ordering::Relaxed);
        entry.key[1].store(hi, Ordering::Relaxed);
        entry.location.store(location.pack(), Ordering::Relaxed);
        entry.next.store(next, Ordering::Relaxed);
    }

    pub fn key(&self, index: KeyIndex) -> Key {
        let entry = self.entry(index);
        let mut bytes = [0u8; KEY_LEN];
        bytes[..8].copy_from_slice(&entry.key[0].load(Ordering::Relaxed).to_le_bytes());
        bytes[8..].copy_from_slice(&entry.key[1].load(Ordering::Relaxed).to_le_bytes());
        Key::new(bytes)
    }

    #[inline]
    pub fn key_matches(&self, index: KeyIndex, key: &Key) -> bool {
        let entry = self.entry(index);
        let (lo, hi) = split_key(key);
        entry.key[0].load(Ordering::Relaxed) == lo && entry.key[1].load(Ordering::Relaxed) == hi
    }

    #[inline]
    pub fn next(&self, index: KeyIndex) -> KeyIndex {
        self.entry(index).next.load(Ordering::Relaxed)
    }

    pub fn set_next(&self, index: KeyIndex, next: KeyIndex) {
        self.entry(index).next.store(next, Ordering::Relaxed);
    }

    #[inline]
    pub fn location(&self, index: KeyIndex) -> Location {
        Location::unpack(self.entry(index).location.load(Ordering::Acquire))
    }

    /// Swap the location only if it still equals `current`
    pub fn compare_swap_location(
        &self,
        index: KeyIndex,
        current: Location,
        new: Location,
    ) -> bool {
        self.entry(index)
            .location
            .compare_exchange(current.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally overwrite the location
    pub fn store_location(&self, index: KeyIndex, location: Location) {
        self.entry(index)
            .location
            .store(location.pack(), Ordering::Release);
    }

    /// Number of reserved entries
    pub fn len(&self) -> u32 {
        self.next_index.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    fn entry(&self, index: KeyIndex) -> &KeyEntry {
        let chunk = (index >> CHUNK_SHIFT) as usize;
        let entries = self.chunks[chunk].get_or_init(|| {
            let start = chunk * CHUNK_LEN;
            let len = CHUNK_LEN.min(self.capacity as usize - start);
            (0..len).map(|_| KeyEntry::default()).collect()
        });
        &entries[(index & CHUNK_MASK) as usize]
    }
}

#[inline]
fn split_key(key: &Key) -> (u64, u64) {
    let bytes = key.as_bytes();
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&bytes[..8]);
    hi.copy_from_slice(&bytes[8..]);
    (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
}
