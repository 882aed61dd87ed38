//! Recovery Scanner
//!
//! Rebuilds the hash directory, the key-index arena and the allocator state
//! from an existing region. There is no metadata to trust: every block is a
//! candidate record start, and the checksum decides.
//!
//! ## Algorithm
//! ```text
//! block = 0
//! while block < region blocks:
//!     read value_len at block, record_len = 24 + value_len
//!     checksum over [block, block + record_len - 4) == stored checksum?
//!       yes -> register or supersede the key, block += ceil(record_len / block_size)
//!       no  -> block += 1
//! ```
//!
//! Runs single-threaded before the engine serves requests. A checksum
//! mismatch cannot tell a torn record from space that was never written.

use crate::alloc::GlobalAllocator;
use crate::directory::HashDirectory;
use crate::error::{NvmError, Result};
use crate::hash::KeyHasher;
use crate::store::record::{self, peek_value_len, RecordView, RECORD_FIX_LEN, VAL_SIZE_LEN};
use crate::store::{Location, RecordStore, EMPTY};

/// Blocks between progress log lines
const PROGRESS_INTERVAL: u32 = 1 << 24;

/// Outcome of a recovery scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Blocks covered by the scan
    pub blocks_scanned: u64,

    /// Checksum-valid records found
    pub records_valid: u64,

    /// Distinct keys registered
    pub keys_recovered: u64,

    /// Valid records that lost to (or tied with) another version of their key
    pub records_superseded: u64,

    /// Blocks skipped as non-record content
    pub blocks_skipped: u64,
}

/// Replays a region into an empty directory and store
pub struct RecoveryScanner<'a, H: KeyHasher> {
    store: &'a RecordStore,
    directory: &'a HashDirectory<H>,
    max_value_len: usize,
}

impl<'a, H: KeyHasher> RecoveryScanner<'a, H> {
    pub fn new(store: &'a RecordStore, directory: &'a HashDirectory<H>, max_value_len: u16) -> Self {
        Self {
            store,
            directory,
            max_value_len: max_value_len as usize,
        }
    }

    /// Scan the whole region, then hand the occupied ranges to `global`
    pub fn scan(&self, global: &GlobalAllocator) -> Result<RecoveryResult> {
        let region = self.store.region();
        let total_blocks = region.block_count();
        let mut result = RecoveryResult::default();
        let mut occupied: Vec<(u32, usize)> = Vec::new();
        let mut buf = vec![0u8; record::record_len(self.max_value_len)];
        let mut block: u32 = 0;
        let mut next_progress = PROGRESS_INTERVAL;

        while block < total_blocks {
            if block >= next_progress {
                tracing::debug!(block, total_blocks, "Recovery progress");
                next_progress = next_progress.saturating_add(PROGRESS_INTERVAL);
            }

            match self.candidate(block, &mut buf) {
                Some(view) => {
                    self.apply(&view, block, &mut result)?;
                    let blocks = self.store.blocks_for(view.value_len() as usize);
                    occupied.push((block, blocks));
                    result.records_valid += 1;
                    block += blocks as u32;
                }
                None => {
                    result.blocks_skipped += 1;
                    block += 1;
                }
            }
        }
        result.blocks_scanned = total_blocks as u64;

        global.restore(occupied);

        tracing::info!(
            keys = result.keys_recovered,
            records = result.records_valid,
            superseded = result.records_superseded,
            skipped_blocks = result.blocks_skipped,
            "Recovery scan complete"
        );
        Ok(result)
    }

    /// Read the candidate record starting at `block`, if it is one
    fn candidate<'b>(&self, block: u32, buf: &'b mut [u8]) -> Option<RecordView<'b>> {
        let region = self.store.region();
        let offset = region.block_offset(block);
        let remaining = region.len() - offset;
        if remaining < RECORD_FIX_LEN {
            return None;
        }

        let mut header = [0u8; VAL_SIZE_LEN];
        region.read(offset, &mut header);
        let value_len = peek_value_len(&header) as usize;
        let len = record::record_len(value_len);
        if value_len > self.max_value_len || len > remaining {
            return None;
        }

        let bytes = &mut buf[..len];
        region.read(offset, bytes);
        RecordView::parse(bytes).filter(RecordView::is_valid)
    }

    /// Register a valid record, keeping the highest version per key
    fn apply(&self, view: &RecordView<'_>, block: u32, result: &mut RecoveryResult) -> Result<()> {
        let table = self.store.table();
        let key = view.key();
        let bucket = self.directory.bucket_of(&key);
        let location = Location {
            block,
            len: view.value_len(),
            version: view.version(),
        };

        match self.directory.find(&key, self.directory.head(bucket), table) {
            None => {
                let index = table.reserve().ok_or_else(|| {
                    NvmError::OutOfMemory(format!(
                        "key-index arena ({} keys) too small for recovered region",
                        table.capacity()
                    ))
                })?;
                table.init(index, &key, location, EMPTY);
                let old_head = self.directory.push_head(bucket, index);
                table.set_next(index, old_head);
                result.keys_recovered += 1;
            }
            Some(index) => {
                if location.version > table.location(index).version {
                    table.store_location(index, location);
                }
                result.records_superseded += 1;
            }
        }
        Ok(())
    }
}
