//! Diagnostics log handle
//!
//! An optional append-mode file that receives free-form operational lines
//! (open summary, recovery summary, allocator stats). Without a handle every
//! call is a no-op, and write failures are dropped.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::Result;

/// Optional operational log
#[derive(Default)]
pub struct Diagnostics {
    file: Option<Mutex<File>>,
}

impl Diagnostics {
    /// Diagnostics disabled
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Write to an already opened handle
    pub fn new(file: Option<File>) -> Self {
        Self {
            file: file.map(Mutex::new),
        }
    }

    /// Open (or create) `path` in append mode
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Some(file)))
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Append one timestamped line
    pub fn log(&self, args: fmt::Arguments<'_>) {
        let Some(file) = &self.file else {
            return;
        };
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut file = file.lock();
        let _ = writeln!(file, "[{}] {}", millis, args);
        let _ = file.flush();
    }
}
