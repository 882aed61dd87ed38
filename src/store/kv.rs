//! Record Store
//!
//! Serializes records into allocator-granted block ranges and maintains the
//! key-index arena that points at each key's current record.

use crate::alloc::ThreadAllocator;
use crate::directory::HashDirectory;
use crate::error::{NvmError, Result};
use crate::hash::KeyHasher;
use crate::region::PersistentRegion;

use super::index::{KeyIndex, KeyIndexTable, Location};
use super::record::{self, Key, VALUE_OFFSET};

/// Durable record storage plus per-key side tables
pub struct RecordStore {
    region: PersistentRegion,
    table: KeyIndexTable,
    max_value_len: usize,
}

impl RecordStore {
    pub fn new(region: PersistentRegion, key_capacity: u32, max_value_len: u16) -> Self {
        Self {
            region,
            table: KeyIndexTable::new(key_capacity),
            max_value_len: max_value_len as usize,
        }
    }

    /// Reject values that do not fit the configured maximum
    pub fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() > self.max_value_len {
            return Err(NvmError::ValueTooLarge {
                len: value.len(),
                max: self.max_value_len,
            });
        }
        Ok(())
    }

    /// Write the first record of a key and link it into `bucket`
    ///
    /// `head` is the chain head the caller searched without finding the key.
    /// If another writer links the same key first, this becomes an update of
    /// that entry. Returns the version written.
    pub fn write<H: KeyHasher>(
        &self,
        alloc: &mut ThreadAllocator,
        directory: &HashDirectory<H>,
        bucket: usize,
        head: KeyIndex,
        key: &Key,
        value: &[u8],
    ) -> Result<u16> {
        let location = self.persist_record(alloc, key, 0, value)?;

        let Some(index) = self.table.reserve() else {
            self.recycle(alloc, location);
            return Err(NvmError::OutOfMemory(format!(
                "key-index arena is full ({} keys)",
                self.table.capacity()
            )));
        };

        let mut expected = head;
        self.table.init(index, key, location, expected);

        loop {
            match directory.try_install(bucket, expected, index) {
                Ok(()) => return Ok(location.version),
                Err(actual) => {
                    if let Some(existing) =
                        directory.find_between(key, actual, expected, &self.table)
                    {
                        // Lost the first-insert race; our entry stays unlinked
                        self.recycle(alloc, location);
                        return self.update(alloc, existing, key, value);
                    }
                    expected = actual;
                    self.table.set_next(index, expected);
                }
            }
        }
    }

    /// Write a new version of an existing key and swap it in
    ///
    /// The old block range is recycled once the swap succeeds. If a
    /// concurrent update swaps first, the write is redone on top of it.
    /// Returns the version written.
    pub fn update(
        &self,
        alloc: &mut ThreadAllocator,
        index: KeyIndex,
        key: &Key,
        value: &[u8],
    ) -> Result<u16> {
        loop {
            let current = self.table.location(index);
            let version = current.version.wrapping_add(1);
            let next = self.persist_record(alloc, key, version, value)?;

            if self.table.compare_swap_location(index, current, next) {
                self.recycle(alloc, current);
                return Ok(version);
            }
            self.recycle(alloc, next);
        }
    }

    /// Copy the current value of `index` into `out`
    ///
    /// Retries if the key was updated while copying, so the bytes returned
    /// always belong to one record.
    pub fn read(&self, index: KeyIndex, out: &mut Vec<u8>) -> Location {
        loop {
            let location = self.table.location(index);
            out.clear();
            out.resize(location.len as usize, 0);
            self.region
                .read(self.region.block_offset(location.block) + VALUE_OFFSET, out);

            if self.table.location(index) == location {
                return location;
            }
        }
    }

    /// Return a record's block range to the allocator
    pub fn recycle(&self, alloc: &mut ThreadAllocator, location: Location) {
        alloc.recycle(self.blocks_for(location.len as usize), location.block);
    }

    /// Blocks occupied by a record with a value of `value_len` bytes
    pub fn blocks_for(&self, value_len: usize) -> usize {
        record::blocks_for(value_len, self.region.block_size())
    }

    pub fn region(&self) -> &PersistentRegion {
        &self.region
    }

    pub fn table(&self) -> &KeyIndexTable {
        &self.table
    }

    fn persist_record(
        &self,
        alloc: &mut ThreadAllocator,
        key: &Key,
        version: u16,
        value: &[u8],
    ) -> Result<Location> {
        let blocks = self.blocks_for(value.len());
        let block = alloc.allocate(blocks)?;

        let mut buf = Vec::new();
        record::encode(key, version, value, &mut buf);

        if let Err(e) = self
            .region
            .write_persist(self.region.block_offset(block), &buf)
        {
            alloc.recycle(blocks, block);
            return Err(e);
        }

        Ok(Location {
            block,
            len: value.len() as u16,
            version,
        })
    }
}
