//! Engine Module
//!
//! The facade that opens (or recovers) the persistent region and routes
//! `get`/`set` through the hash directory and record store.
//!
//! ## Responsibilities
//! - Map or create the backing file
//! - Run the recovery scan when the file already existed
//! - Give every worker its own thread allocator
//! - Serve concurrent `get`/`set` calls without a global lock

use std::fs::File;
use std::sync::Arc;

use crate::alloc::{
    AllocatorRegistry, AllocatorStats, GlobalAllocator, ThreadAllocator, ThreadAllocatorStats,
};
use crate::config::{Config, OomPolicy};
use crate::diag::Diagnostics;
use crate::directory::HashDirectory;
use crate::error::{NvmError, Result};
use crate::hash::{Djb2, KeyHasher};
use crate::recovery::{RecoveryResult, RecoveryScanner};
use crate::region::PersistentRegion;
use crate::store::{Key, KeyIndex, RecordStore, EMPTY};

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Reads** (`get`): lock-free chain walk, then a copy out of the region
///   that is retried if the key was updated mid-copy
/// - **New keys**: record written first, then linked with a CAS on the
///   bucket head; a concurrent insert of the same key turns into an update
/// - **Updates**: new record written to a fresh range, then swapped in with
///   a CAS on the key's packed location
/// - **Allocation**: per-worker bump allocator; `set` looks the worker up in
///   a registry, a [`Worker`] handle owns its allocator outright. When the
///   region runs short, spare ranges of idle workers are reclaimed and the
///   write is retried once before the out-of-memory policy applies
pub struct Engine<H: KeyHasher = Djb2> {
    config: Config,
    directory: HashDirectory<H>,
    store: RecordStore,
    registry: AllocatorRegistry,
    diagnostics: Diagnostics,
    recovery: Option<RecoveryResult>,
}

/// Point-in-time engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub keys: u32,
    pub key_capacity: u32,
    pub workers: usize,
    pub allocator: AllocatorStats,
}

impl Engine<Djb2> {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Map the backing file (creating it at `file_size` if absent)
    /// 3. If it already existed, rebuild indexes and allocator state by scanning it
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Diagnostics::disabled())
    }

    /// Open with an optional append-mode diagnostics log
    pub fn open_with_log(config: Config, log: Option<File>) -> Result<Self> {
        Self::open_with(config, Diagnostics::new(log))
    }
}

impl<H: KeyHasher> Engine<H> {
    /// Open with an explicit hash function and diagnostics handle
    pub fn open_with(config: Config, diagnostics: Diagnostics) -> Result<Self> {
        config.validate()?;
        diagnostics.log(format_args!(
            "Init config block size:{} block per segment:{} file size:{}",
            config.block_size, config.block_per_segment, config.file_size
        ));

        let region = PersistentRegion::open(
            &config.path,
            config.file_size,
            config.block_size,
            config.persist,
        )?;
        let created = region.created();

        let global = Arc::new(GlobalAllocator::new(
            region.block_count(),
            config.block_per_segment,
            config.max_record_blocks(),
        ));
        let store = RecordStore::new(region, config.key_capacity, config.max_value_len);
        let directory = HashDirectory::new(config.bucket_count);

        let recovery = if created {
            None
        } else {
            let result =
                RecoveryScanner::new(&store, &directory, config.max_value_len).scan(&global)?;
            diagnostics.log(format_args!(
                "Recovery: {} keys, {} valid records, {} superseded, {} blocks skipped",
                result.keys_recovered,
                result.records_valid,
                result.records_superseded,
                result.blocks_skipped
            ));
            Some(result)
        };

        tracing::info!(
            path = %config.path.display(),
            created,
            keys = store.table().len(),
            "Engine ready"
        );

        Ok(Self {
            config,
            directory,
            store,
            registry: AllocatorRegistry::new(global),
            diagnostics,
            recovery,
        })
    }

    /// Get a value by key
    ///
    /// Returns `Ok(None)` for a key that was never written.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut value = Vec::new();
        Ok(self.get_into(key, &mut value)?.then_some(value))
    }

    /// Get a value into a caller-supplied buffer
    ///
    /// Returns `false` (and leaves `out` untouched) if the key is absent.
    pub fn get_into(&self, key: &[u8], out: &mut Vec<u8>) -> Result<bool> {
        let key = Key::from_slice(key)?;
        match self.lookup(&key) {
            Some(index) => {
                self.store.read(index, out);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Set a key to hold `value`, overwriting any previous value
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let handle = self.registry.current();
        let mut alloc = handle.lock();
        self.set_with(&mut alloc, key, value).map(|_| ())
    }

    /// Current version of a key (0 after the first write)
    pub fn version(&self, key: &[u8]) -> Result<Option<u16>> {
        let key = Key::from_slice(key)?;
        Ok(self
            .lookup(&key)
            .map(|index| self.store.table().location(index).version))
    }

    /// Dedicated worker handle with its own allocator
    pub fn worker(&self) -> Worker<'_, H> {
        Worker {
            engine: self,
            alloc: ThreadAllocator::new(Arc::clone(self.registry.global())),
        }
    }

    /// Result of the startup recovery scan, if one ran
    pub fn recovery_result(&self) -> Option<RecoveryResult> {
        self.recovery
    }

    pub fn stats(&self) -> EngineStats {
        let table = self.store.table();
        EngineStats {
            keys: table.len(),
            key_capacity: table.capacity(),
            workers: self.registry.worker_count(),
            allocator: self.registry.global().stats(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Close the engine, flushing the whole mapping
    ///
    /// Registered workers are dropped first so the logged allocator stats
    /// account for every unused range.
    pub fn close(self) -> Result<()> {
        self.store.region().sync()?;
        let workers = self.registry.worker_count();
        self.registry.drain();

        let stats = self.stats();
        self.diagnostics.log(format_args!(
            "Close: {} keys, {} workers, {}/{} segments issued, {} shared free blocks",
            stats.keys,
            workers,
            stats.allocator.segments_issued,
            stats.allocator.segment_count,
            stats.allocator.shared_free_blocks
        ));
        tracing::info!(keys = stats.keys, "Engine closed");
        Ok(())
    }

    /// Write path shared by `set` and `Worker::set`; returns the version written
    fn set_with(&self, alloc: &mut ThreadAllocator, key: &[u8], value: &[u8]) -> Result<u16> {
        let key = Key::from_slice(key)?;
        self.store.check_value(value)?;

        let result = match self.write_or_update(alloc, &key, value) {
            Err(NvmError::OutOfMemory(_)) if self.registry.reclaim_idle() > 0 => {
                self.write_or_update(alloc, &key, value)
            }
            result => result,
        };
        result.map_err(|e| self.apply_oom_policy(e))
    }

    fn write_or_update(&self, alloc: &mut ThreadAllocator, key: &Key, value: &[u8]) -> Result<u16> {
        let bucket = self.directory.bucket_of(key);
        let head = self.directory.head(bucket);
        match self.directory.find(key, head, self.store.table()) {
            Some(index) => self.store.update(alloc, index, key, value),
            None => self
                .store
                .write(alloc, &self.directory, bucket, head, key, value),
        }
    }

    fn apply_oom_policy(&self, err: NvmError) -> NvmError {
        match (&err, self.config.oom_policy) {
            (NvmError::OutOfMemory(_), OomPolicy::Abort) => {
                tracing::error!(error = %err, "Persistent region exhausted, aborting");
                std::process::abort();
            }
            _ => err,
        }
    }

    fn lookup(&self, key: &Key) -> Option<KeyIndex> {
        let head = self.directory.head(self.directory.bucket_of(key));
        if head == EMPTY {
            return None;
        }
        self.directory.find(key, head, self.store.table())
    }
}

/// A worker bound to one engine, owning its thread allocator
///
/// Skips the registry lookup on every `set`. Dropping the worker returns its
/// unused ranges to the shared free list.
pub struct Worker<'e, H: KeyHasher = Djb2> {
    engine: &'e Engine<H>,
    alloc: ThreadAllocator,
}

impl<H: KeyHasher> Worker<'_, H> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine.get(key)
    }

    /// Set a key, returning the version written
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<u16> {
        self.engine.set_with(&mut self.alloc, key, value)
    }

    /// Counters of this worker's allocator
    pub fn alloc_stats(&self) -> ThreadAllocatorStats {
        self.alloc.stats()
    }
}
