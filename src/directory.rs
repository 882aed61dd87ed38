//! Hash Directory
//!
//! A fixed array of buckets, each holding the head of a singly linked chain
//! of key-index entries. New keys are pushed at the head with a
//! compare-and-swap, so chains are always well formed and a key can only be
//! linked once.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::hash::{Djb2, KeyHasher};
use crate::store::{Key, KeyIndex, KeyIndexTable, EMPTY};

/// Bucket array mapping key hashes to chain heads
pub struct HashDirectory<H: KeyHasher = Djb2> {
    buckets: Box<[AtomicU32]>,
    _hasher: PhantomData<H>,
}

impl<H: KeyHasher> HashDirectory<H> {
    /// Create `bucket_count` empty buckets
    pub fn new(bucket_count: u32) -> Self {
        Self {
            buckets: (0..bucket_count).map(|_| AtomicU32::new(EMPTY)).collect(),
            _hasher: PhantomData,
        }
    }

    /// Hash a key with the directory's hash function
    #[inline]
    pub fn hash(key: &Key) -> u32 {
        H::hash(key.as_bytes())
    }

    /// Bucket for a hash value
    #[inline]
    pub fn locate(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }

    /// Bucket for a key
    #[inline]
    pub fn bucket_of(&self, key: &Key) -> usize {
        self.locate(Self::hash(key))
    }

    /// Current chain head, or `EMPTY`
    #[inline]
    pub fn head(&self, bucket: usize) -> KeyIndex {
        self.buckets[bucket].load(Ordering::Acquire)
    }

    /// Unconditionally install `index` as head, returning the previous head
    ///
    /// The caller links `index` to the returned head. Only safe when no other
    /// thread inserts into the same bucket (recovery).
    pub fn push_head(&self, bucket: usize, index: KeyIndex) -> KeyIndex {
        self.buckets[bucket].swap(index, Ordering::AcqRel)
    }

    /// Install `index` as head if the head is still `expected`
    ///
    /// On failure returns the head that was actually found.
    pub fn try_install(
        &self,
        bucket: usize,
        expected: KeyIndex,
        index: KeyIndex,
    ) -> Result<(), KeyIndex> {
        self.buckets[bucket]
            .compare_exchange(expected, index, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    /// Walk the chain from `start` looking for `key`
    pub fn find(&self, key: &Key, start: KeyIndex, table: &KeyIndexTable) -> Option<KeyIndex> {
        self.find_between(key, start, EMPTY, table)
    }

    /// Walk the chain from `from`, stopping before `until`
    ///
    /// Used after a failed install to search only the entries prepended
    /// since the head was last read.
    pub fn find_between(
        &self,
        key: &Key,
        from: KeyIndex,
        until: KeyIndex,
        table: &KeyIndexTable,
    ) -> Option<KeyIndex> {
        let mut index = from;
        while index != until && index != EMPTY {
            if table.key_matches(index, key) {
                return Some(index);
            }
            index = table.next(index);
        }
        None
    }

    /// Number of chain entries reachable from a bucket
    pub fn chain_len(&self, bucket: usize, table: &KeyIndexTable) -> usize {
        let mut len = 0;
        let mut index = self.head(bucket);
        while index != EMPTY {
            len += 1;
            index = table.next(index);
        }
        len
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
