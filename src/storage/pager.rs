//! # Memory-Mapped Pager
//!
//! This module implements `Pager`, the low-level page I/O layer. It wraps
//! one backing file, pre-extended to its full size and memory-mapped for
//! the lifetime of the store.
//!
//! ## Design
//!
//! The file never grows: `create` sizes it to `n_pages · PAGE_SIZE` up
//! front, and running out of space is the allocator's concern, not the
//! pager's. That keeps the mapping stable for the whole session: there
//! is no remap and therefore no window where borrowed page slices could
//! dangle.
//!
//! ## Safety Model
//!
//! Page access borrows from the mapping under the usual rules:
//!
//! ```text
//! page(&self, id) -> &[u8]           // shared borrow
//! page_mut(&mut self, id) -> &mut [u8]  // exclusive borrow
//! ```
//!
//! The borrow checker guarantees no page slice outlives or aliases a
//! mutation, with zero runtime cost.
//!
//! ## Durability
//!
//! Writes land in the mapping immediately (read-after-write visibility is
//! inherent); they reach disk at the explicit durability points:
//! `flush_pages` msyncs a page range, `sync` flushes the whole map.
//!
//! ## Error Handling
//!
//! All fallible operations return `eyre::Result` with the file path or
//! page number attached; underlying `std::io::Error`s stay in the chain
//! and represent unrecoverable storage failures.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::{PageId, PAGE_SIZE};

#[derive(Debug)]
pub struct Pager {
    // Held so the descriptor stays open as long as the mapping.
    #[allow(dead_code)]
    file: File,
    mmap: MmapMut,
    page_count: u32,
}

impl Pager {
    /// Creates the backing file pre-extended to `page_count` pages and
    /// maps it. An existing file at `path` is truncated.
    pub fn create<P: AsRef<Path>>(path: P, page_count: u32) -> Result<Self> {
        let path = path.as_ref();

        ensure!(page_count > 0, "page count must be at least 1");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        let file_size = page_count as u64 * PAGE_SIZE as u64;

        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to extend store file to {} bytes", file_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files
        // can be modified externally. This is safe because:
        // 1. We just created this file with exclusive access (truncate=true)
        // 2. The file size is a valid multiple of PAGE_SIZE
        // 3. The mmap lifetime is tied to Pager, preventing use-after-unmap
        // 4. All access goes through page()/page_mut() which bounds-check ids
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count,
        })
    }

    /// Maps an existing store file. The size must be a non-zero multiple
    /// of the page size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?;
        let file_size = metadata.len();

        ensure!(
            file_size > 0,
            "cannot open empty store file '{}'",
            path.display()
        );
        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "store file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        // SAFETY: same argument as in create(); the file is opened
        // read+write, sized as a whole number of pages, and every access
        // below is bounds-checked against page_count.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count,
        })
    }

    pub fn page(&self, page_no: PageId) -> Result<&[u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&self.mmap[offset..offset + PAGE_SIZE])
    }

    pub fn page_mut(&mut self, page_no: PageId) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&mut self.mmap[offset..offset + PAGE_SIZE])
    }

    /// Borrows `count` contiguous pages starting at `first`. Used for the
    /// bitmap region, which is read and written as one unit.
    pub fn pages(&self, first: PageId, count: u32) -> Result<&[u8]> {
        self.check_range(first, count)?;
        let offset = first as usize * PAGE_SIZE;
        Ok(&self.mmap[offset..offset + count as usize * PAGE_SIZE])
    }

    pub fn pages_mut(&mut self, first: PageId, count: u32) -> Result<&mut [u8]> {
        self.check_range(first, count)?;
        let offset = first as usize * PAGE_SIZE;
        Ok(&mut self.mmap[offset..offset + count as usize * PAGE_SIZE])
    }

    /// Flushes a page range to disk (msync).
    pub fn flush_pages(&self, first: PageId, count: u32) -> Result<()> {
        self.check_range(first, count)?;
        self.mmap
            .flush_range(first as usize * PAGE_SIZE, count as usize * PAGE_SIZE)
            .wrap_err_with(|| format!("failed to flush pages {}..{}", first, first + count))
    }

    /// Flushes the whole mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync store file")
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn file_size(&self) -> u64 {
        self.page_count as u64 * PAGE_SIZE as u64
    }

    fn check_range(&self, first: PageId, count: u32) -> Result<()> {
        ensure!(count > 0, "page range must be non-empty");
        ensure!(
            first.checked_add(count).is_some_and(|end| end <= self.page_count),
            "pages {}..{} out of bounds (page_count={})",
            first,
            first as u64 + count as u64,
            self.page_count
        );
        Ok(())
    }
}
