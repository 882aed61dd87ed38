//! Configuration for nvmkv
//!
//! Centralized configuration with the reference sizing as defaults.

use std::path::PathBuf;

use crate::error::{NvmError, Result};
use crate::store::RECORD_FIX_LEN;

/// Main configuration for an nvmkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Region Configuration
    // -------------------------------------------------------------------------
    /// Backing file that is memory-mapped as the persistent region
    pub path: PathBuf,

    /// Total size of the region in bytes (fixed for the file's lifetime)
    pub file_size: u64,

    /// Bytes per allocation unit
    pub block_size: u32,

    /// Blocks per segment (the unit handed out by the global allocator)
    pub block_per_segment: u32,

    /// Persistence barrier issued after each record write
    pub persist: PersistStrategy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Number of hash directory buckets
    pub bucket_count: u32,

    /// Maximum number of distinct keys the key-index arena can hold
    pub key_capacity: u32,

    /// Largest accepted value in bytes
    pub max_value_len: u16,

    // -------------------------------------------------------------------------
    // Failure Policy
    // -------------------------------------------------------------------------
    /// What to do when neither allocator tier can satisfy a request
    pub oom_policy: OomPolicy,
}

/// Persistence barrier applied to each durable write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStrategy {
    /// Synchronously flush the written range (safest, slowest)
    EveryWrite,

    /// Schedule the flush of the written range without waiting for it
    Async,

    /// Leave write-back entirely to the OS
    OsManaged,
}

/// Behaviour when the allocator is exhausted at every tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomPolicy {
    /// Log and abort the process; the region is expected to be pre-sized
    Abort,

    /// Surface `NvmError::OutOfMemory` to the caller
    ReturnError,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./nvmkv.pmem"),
            file_size: 64 * 1024 * 1024 * 1024, // 64 GiB
            block_size: 64,
            block_per_segment: 65536,
            persist: PersistStrategy::EveryWrite,
            bucket_count: 100_000_000,
            key_capacity: 241_591_910,
            max_value_len: 1024,
            oom_policy: OomPolicy::Abort,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Total number of blocks in the region
    pub fn total_blocks(&self) -> u64 {
        self.file_size / self.block_size as u64
    }

    /// Number of blocks occupied by the largest accepted record
    pub fn max_record_blocks(&self) -> usize {
        let max_record = RECORD_FIX_LEN + self.max_value_len as usize;
        max_record.div_ceil(self.block_size as usize)
    }

    /// Check that the options describe a usable region
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(NvmError::Config("block_size must be non-zero".to_string()));
        }
        if self.block_per_segment == 0 {
            return Err(NvmError::Config(
                "block_per_segment must be non-zero".to_string(),
            ));
        }
        if self.bucket_count == 0 {
            return Err(NvmError::Config("bucket_count must be non-zero".to_string()));
        }
        if self.key_capacity == 0 || self.key_capacity == u32::MAX {
            return Err(NvmError::Config(format!(
                "key_capacity must be in 1..{}",
                u32::MAX
            )));
        }

        let total_blocks = self.total_blocks();
        if total_blocks == 0 {
            return Err(NvmError::Config(format!(
                "file_size {} is smaller than one block of {} bytes",
                self.file_size, self.block_size
            )));
        }
        // u32::MAX is reserved as the "no block" sentinel
        if total_blocks >= u32::MAX as u64 {
            return Err(NvmError::Config(format!(
                "region of {} blocks exceeds the addressable block range",
                total_blocks
            )));
        }
        if self.max_record_blocks() as u64 > total_blocks {
            return Err(NvmError::Config(
                "region cannot hold a single maximum-size record".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backing file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the total region size (in bytes)
    pub fn file_size(mut self, bytes: u64) -> Self {
        self.config.file_size = bytes;
        self
    }

    /// Set the block size (in bytes)
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.config.block_size = bytes;
        self
    }

    /// Set the number of blocks per segment
    pub fn block_per_segment(mut self, blocks: u32) -> Self {
        self.config.block_per_segment = blocks;
        self
    }

    /// Set the persistence barrier strategy
    pub fn persist(mut self, strategy: PersistStrategy) -> Self {
        self.config.persist = strategy;
        self
    }

    /// Set the number of hash directory buckets
    pub fn bucket_count(mut self, count: u32) -> Self {
        self.config.bucket_count = count;
        self
    }

    /// Set the key-index arena capacity
    pub fn key_capacity(mut self, count: u32) -> Self {
        self.config.key_capacity = count;
        self
    }

    /// Set the largest accepted value length (in bytes)
    pub fn max_value_len(mut self, len: u16) -> Self {
        self.config.max_value_len = len;
        self
    }

    /// Set the out-of-memory policy
    pub fn oom_policy(mut self, policy: OomPolicy) -> Self {
        self.config.oom_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
