//! Db interface
//!
//! The minimal embedding contract: open-or-create a store, then `get`/`set`
//! byte slices. Callers that want the coarse status codes use the
//! `*_status` methods.

use std::fs::File;
use std::path::Path;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, Status};
use crate::hash::KeyHasher;

/// A key-value store handle
pub trait Db: Send + Sync {
    /// Get the value of a key; `Ok(None)` if it does not exist
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Set a key to hold a value, overwriting any previous value
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Close the store on exit
    fn close(self: Box<Self>) -> Result<()>;

    /// `get` reporting a status code, writing the value into `value` on `Ok`
    ///
    /// Absent keys give `NotFound`. Every error other than out-of-memory,
    /// including a key that is not 16 bytes, maps to `IoError`.
    fn get_status(&self, key: &[u8], value: &mut Vec<u8>) -> Status {
        match self.get(key) {
            Ok(Some(found)) => {
                *value = found;
                Status::Ok
            }
            Ok(None) => Status::NotFound,
            Err(e) => e.status(),
        }
    }

    /// `set` reporting a status code
    ///
    /// Exhaustion gives `OutOfMemory` (only under `OomPolicy::ReturnError`).
    /// A malformed key, an oversized value and I/O failures all give `IoError`.
    fn set_status(&self, key: &[u8], value: &[u8]) -> Status {
        match self.set(key, value) {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}

impl<H: KeyHasher> Db for Engine<H> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Engine::get(self, key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Engine::set(self, key, value)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Engine::close(*self)
    }
}

/// Create or recover a store backed by the file at `path`
///
/// `config` defaults to [`Config::default`]; its `path` is replaced by
/// `path`. `log` is an optional append-mode diagnostics handle.
pub fn create_or_open(
    path: impl AsRef<Path>,
    config: Option<Config>,
    log: Option<File>,
) -> Result<Box<dyn Db>> {
    let mut config = config.unwrap_or_default();
    config.path = path.as_ref().to_path_buf();
    Ok(Box::new(Engine::open_with_log(config, log)?))
}
