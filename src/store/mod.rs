//! Record Store Module
//!
//! Durable records in the persistent region and the in-memory key-index
//! arena that locates them.
//!
//! ## Responsibilities
//! - Serialize versioned, checksummed records into allocated block ranges
//! - Keep each key's chain link, block, length and version
//! - Write a new key, update an existing one, read a value, recycle a range

mod index;
mod kv;
pub mod record;

pub use index::{KeyIndex, KeyIndexTable, Location, EMPTY};
pub use kv::RecordStore;
pub use record::{Key, RecordView, KEY_LEN, RECORD_FIX_LEN};
