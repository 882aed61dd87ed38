//! Persistent Region
//!
//! A single fixed-size file mapped into memory and addressed in fixed-size
//! blocks. All record bytes live here; there is no superblock or other
//! metadata.
//!
//! ## Sharing
//! The mapping is shared by every thread. Writers never overlap because each
//! writes only into block ranges the allocator granted to it exclusively, so
//! the region hands out raw copies instead of `&mut` slices.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::config::PersistStrategy;
use crate::error::{NvmError, Result};

/// Memory-mapped backing file
pub struct PersistentRegion {
    /// Keeps the mapping alive; all access goes through `base`
    mmap: MmapMut,
    base: *mut u8,
    len: usize,
    block_size: usize,
    persist: PersistStrategy,
    path: PathBuf,
    /// True if the file did not exist before `open`
    created: bool,
}

// SAFETY: `base` points into `mmap`, which lives as long as the region.
// Concurrent writers touch disjoint allocator-granted ranges; readers detect
// torn values by re-checking the key's location after the copy.
unsafe impl Send for PersistentRegion {}
unsafe impl Sync for PersistentRegion {}

impl PersistentRegion {
    /// Map `path` as a region of `size` bytes, creating the file if needed
    ///
    /// A pre-existing file must already have exactly `size` bytes.
    pub fn open(
        path: &Path,
        size: u64,
        block_size: u32,
        persist: PersistStrategy,
    ) -> Result<Self> {
        let created = !path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if created {
            // Sparse on most filesystems; unwritten pages read back as zeros
            file.set_len(size)?;
        } else {
            let existing = file.metadata()?.len();
            if existing != size {
                return Err(NvmError::Config(format!(
                    "existing region {} has {} bytes, expected {}",
                    path.display(),
                    existing,
                    size
                )));
            }
        }

        let len = usize::try_from(size).map_err(|_| {
            NvmError::Config(format!("region size {} exceeds address space", size))
        })?;

        // SAFETY: the file is opened read-write by us and kept at a fixed
        // length for the mapping's lifetime.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        tracing::info!(
            path = %path.display(),
            size,
            block_size,
            created,
            "Mapped persistent region"
        );

        Ok(Self {
            mmap,
            base,
            len,
            block_size: block_size as usize,
            persist,
            path: path.to_path_buf(),
            created,
        })
    }

    /// Byte offset of a block
    #[inline]
    pub fn block_offset(&self, block: u32) -> usize {
        block as usize * self.block_size
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    ///
    /// Panics if the range falls outside the region.
    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        self.check_range(offset, buf.len());
        // SAFETY: range checked above; `buf` is a distinct allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(offset), buf.as_mut_ptr(), buf.len());
        }
    }

    /// Copy `data` into the region at `offset` and issue the persistence barrier
    pub fn write_persist(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len());
        // SAFETY: range checked above; the caller owns this range exclusively
        // through the allocator.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(offset), data.len());
        }
        self.persist(offset, data.len())
    }

    /// Issue the configured persistence barrier for a byte range
    pub fn persist(&self, offset: usize, len: usize) -> Result<()> {
        match self.persist {
            PersistStrategy::EveryWrite => self.mmap.flush_range(offset, len)?,
            PersistStrategy::Async => self.mmap.flush_async_range(offset, len)?,
            PersistStrategy::OsManaged => {}
        }
        Ok(())
    }

    /// Flush the whole mapping synchronously
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Region size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of whole blocks in the region
    pub fn block_count(&self) -> u32 {
        (self.len / self.block_size) as u32
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the backing file was created by this open
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "region access {}+{} out of bounds ({})",
            offset,
            len,
            self.len
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("region");

        {
            let region =
                PersistentRegion::open(&path, 4096, 64, PersistStrategy::EveryWrite).unwrap();
            assert!(region.created());
            assert_eq!(region.block_count(), 64);
            region.write_persist(region.block_offset(3), b"hello").unwrap();
        }

        let region = PersistentRegion::open(&path, 4096, 64, PersistStrategy::EveryWrite).unwrap();
        assert!(!region.created());
        let mut buf = [0u8; 5];
        region.read(3 * 64, &mut buf);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_reopen_with_different_size_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("region");
        PersistentRegion::open(&path, 4096, 64, PersistStrategy::OsManaged).unwrap();

        let result = PersistentRegion::open(&path, 8192, 64, PersistStrategy::OsManaged);
        assert!(matches!(result, Err(NvmError::Config(_))));
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_read_panics() {
        let temp = TempDir::new().unwrap();
        let region = PersistentRegion::open(
            &temp.path().join("region"),
            4096,
            64,
            PersistStrategy::OsManaged,
        )
        .unwrap();
        let mut buf = [0u8; 8];
        region.read(4092, &mut buf);
    }
}
