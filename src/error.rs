//! Error types for nvmkv
//!
//! Provides a unified error type for all operations, plus the coarse
//! [`Status`] taxonomy reported to callers of the [`Db`](crate::db::Db) interface.

use thiserror::Error;

/// Result type alias using NvmError
pub type Result<T> = std::result::Result<T, NvmError>;

/// Unified error type for nvmkv operations
#[derive(Debug, Error)]
pub enum NvmError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key length: expected {expected} bytes, got {len}")]
    InvalidKey { len: usize, expected: usize },

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Status taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    IoError,
    OutOfMemory,
}

impl NvmError {
    /// Collapse the error into the caller-facing status code
    ///
    /// Request and configuration errors have no status of their own and are
    /// reported as `IoError`.
    pub fn status(&self) -> Status {
        match self {
            NvmError::OutOfMemory(_) => Status::OutOfMemory,
            _ => Status::IoError,
        }
    }
}
