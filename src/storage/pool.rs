//! # Page Pool
//!
//! `PagePool` combines the pager with the allocation bitmap and enforces
//! the allocator's durability rules. It is the only component that
//! decides which pages are in use.
//!
//! ## Reserved Prefix
//!
//! Page 0 (store header) and pages `1..=B` (the bitmap itself) are
//! permanently allocated; `populate` sets their bits once at creation and
//! nothing may ever free them. Allocation scans start right after the
//! reserved prefix.
//!
//! ## Durability
//!
//! Every `allocate` and `free` rewrites the full bitmap region and
//! flushes it before returning, so the on-disk bitmap never lags a
//! committed allocator mutation. This is coarse but correct for a
//! single-writer store without a log; batching would have to keep the
//! ordering rule (bitmap persist before any write that references a new
//! page becomes externally observable).
//!
//! ## Failure Modes
//!
//! - `NoSpace`: no clear bit at or after the first allocatable index.
//!   Never signalled through a sentinel id, since page 0 is a valid,
//!   always-allocated page and `0` cannot mean "no page".
//! - `DoubleFree`: the bit for the page was already clear. This is an
//!   engine bug surfaced as a typed error.
//! - I/O failures from the flush propagate as storage failures and are
//!   fatal to the store instance.

use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use tracing::{debug, info};

use super::{PageBitmap, PageId, Pager, StoreHeader, PAGE_SIZE};
use crate::error::StoreError;

/// Number of pages needed to hold one bit for each of `n_pages` pages.
pub(crate) fn bitmap_page_count(n_pages: u32) -> u32 {
    let bits_per_page = (PAGE_SIZE * 8) as u32;
    n_pages.div_ceil(bits_per_page)
}

#[derive(Debug)]
pub struct PagePool {
    pager: Pager,
    bitmap: PageBitmap,
    bitmap_pages: u32,
}

impl PagePool {
    /// Creates a pool over a fresh file of `n_pages` pages and populates
    /// the bitmap: all clear except the reserved prefix.
    pub fn create<P: AsRef<Path>>(path: P, n_pages: u32) -> Result<Self> {
        let bitmap_pages = bitmap_page_count(n_pages);
        ensure!(
            n_pages > bitmap_pages + 1,
            "{} pages leave no allocatable space after header and bitmap",
            n_pages
        );

        let pager = Pager::create(path, n_pages)?;
        let bitmap = PageBitmap::new(n_pages as usize, bitmap_pages as usize * PAGE_SIZE);

        let mut pool = Self {
            pager,
            bitmap,
            bitmap_pages,
        };
        pool.populate()?;

        info!(n_pages, bitmap_pages, "created page pool");
        Ok(pool)
    }

    /// Opens a pool over an existing store file. Validates the header and
    /// reloads the bitmap from its on-disk mirror.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pager = Pager::open(path)?;

        let header = *StoreHeader::from_bytes(pager.page(0)?)?;
        ensure!(
            header.n_pages() == pager.page_count(),
            "header page count {} does not match file size ({} pages)",
            header.n_pages(),
            pager.page_count()
        );

        let n_pages = pager.page_count();
        let bitmap_pages = bitmap_page_count(n_pages);
        let bitmap = PageBitmap::new(n_pages as usize, bitmap_pages as usize * PAGE_SIZE);

        let mut pool = Self {
            pager,
            bitmap,
            bitmap_pages,
        };
        pool.load()?;

        ensure!(
            (0..=bitmap_pages as usize).all(|bit| pool.bitmap.get(bit)),
            "bitmap does not mark its own reserved pages as allocated"
        );

        info!(n_pages, bitmap_pages, "opened page pool");
        Ok(pool)
    }

    /// Zeroes the bitmap, marks the reserved prefix, and persists.
    fn populate(&mut self) -> Result<()> {
        for bit in 0..=self.bitmap_pages as usize {
            self.bitmap.set(bit);
        }
        self.dump()
    }

    /// Writes the whole bitmap region to its pages and flushes it.
    pub fn dump(&mut self) -> Result<()> {
        let bytes = self.bitmap.as_bytes().to_vec();
        self.pager
            .pages_mut(1, self.bitmap_pages)?
            .copy_from_slice(&bytes);
        self.pager
            .flush_pages(1, self.bitmap_pages)
            .wrap_err("failed to persist allocation bitmap")
    }

    /// Reloads the bitmap from its on-disk mirror in one read.
    pub fn load(&mut self) -> Result<()> {
        let region = self.pager.pages(1, self.bitmap_pages)?;
        let bytes = region.to_vec();
        self.bitmap.load_bytes(&bytes);
        Ok(())
    }

    /// Claims the first free page after the reserved prefix.
    pub fn allocate(&mut self) -> Result<PageId> {
        let first = self.reserved_pages() as usize;
        let Some(bit) = self.bitmap.first_clear_from(first) else {
            return Err(StoreError::NoSpace.into());
        };

        self.bitmap.set(bit);
        self.dump()?;

        debug!(page = bit, "allocated page");
        Ok(bit as PageId)
    }

    /// Returns a page to the free set. Freeing a free page reports the
    /// engine bug as `DoubleFree`.
    pub fn free(&mut self, page_no: PageId) -> Result<()> {
        ensure!(
            page_no < self.pager.page_count(),
            "page {} out of bounds (page_count={})",
            page_no,
            self.pager.page_count()
        );
        ensure!(
            page_no >= self.reserved_pages(),
            "page {} is reserved and can never be freed",
            page_no
        );
        if !self.bitmap.get(page_no as usize) {
            return Err(StoreError::DoubleFree(page_no).into());
        }

        self.bitmap.clear(page_no as usize);
        self.dump()?;

        debug!(page = page_no, "freed page");
        Ok(())
    }

    /// First allocatable page id: header page plus bitmap pages.
    pub fn reserved_pages(&self) -> u32 {
        self.bitmap_pages + 1
    }

    pub fn is_allocated(&self, page_no: PageId) -> bool {
        (page_no as usize) < self.bitmap.len() && self.bitmap.get(page_no as usize)
    }

    pub fn allocated_count(&self) -> usize {
        self.bitmap.count_set()
    }

    pub fn page_count(&self) -> u32 {
        self.pager.page_count()
    }

    /// Parses the store header from page 0.
    pub fn header(&self) -> Result<StoreHeader> {
        Ok(*StoreHeader::from_bytes(self.pager.page(0)?)?)
    }

    pub fn page(&self, page_no: PageId) -> Result<&[u8]> {
        self.pager.page(page_no)
    }

    pub fn page_mut(&mut self, page_no: PageId) -> Result<&mut [u8]> {
        self.pager.page_mut(page_no)
    }

    pub fn sync(&self) -> Result<()> {
        self.pager.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool(pages: u32) -> (tempfile::TempDir, PagePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = PagePool::create(dir.path().join("test.db"), pages).unwrap();
        (dir, pool)
    }

    #[test]
    fn create_reserves_header_and_bitmap_pages() {
        let (_dir, pool) = create_test_pool(16);

        assert_eq!(pool.reserved_pages(), 2);
        assert!(pool.is_allocated(0));
        assert!(pool.is_allocated(1));
        assert!(!pool.is_allocated(2));
        assert_eq!(pool.allocated_count(), 2);
    }

    #[test]
    fn bitmap_spans_multiple_pages_for_large_pools() {
        assert_eq!(bitmap_page_count(16), 1);
        assert_eq!(bitmap_page_count(PAGE_SIZE as u32 * 8), 1);
        assert_eq!(bitmap_page_count(PAGE_SIZE as u32 * 8 + 1), 2);
    }

    #[test]
    fn create_rejects_pool_with_no_allocatable_pages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PagePool::create(dir.path().join("test.db"), 2).is_err());
    }

    #[test]
    fn allocate_hands_out_pages_after_reserved_prefix() {
        let (_dir, mut pool) = create_test_pool(16);

        assert_eq!(pool.allocate().unwrap(), 2);
        assert_eq!(pool.allocate().unwrap(), 3);
        assert!(pool.is_allocated(2));
        assert!(pool.is_allocated(3));
    }

    #[test]
    fn free_makes_page_reusable() {
        let (_dir, mut pool) = create_test_pool(16);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.free(a).unwrap();

        assert!(!pool.is_allocated(a));
        assert!(pool.is_allocated(b));
        assert_eq!(pool.allocate().unwrap(), a);
    }

    #[test]
    fn double_free_is_typed_error() {
        let (_dir, mut pool) = create_test_pool(16);

        let page = pool.allocate().unwrap();
        pool.free(page).unwrap();

        let err = pool.free(page).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::DoubleFree(page))
        );
    }

    #[test]
    fn freeing_reserved_page_is_rejected() {
        let (_dir, mut pool) = create_test_pool(16);

        assert!(pool.free(0).is_err());
        assert!(pool.free(1).is_err());
        assert!(pool.is_allocated(0));
        assert!(pool.is_allocated(1));
    }

    #[test]
    fn exhausted_pool_reports_no_space() {
        let (_dir, mut pool) = create_test_pool(4);

        assert_eq!(pool.allocate().unwrap(), 2);
        assert_eq!(pool.allocate().unwrap(), 3);

        let err = pool.allocate().unwrap_err();
        assert_eq!(err.downcast_ref::<StoreError>(), Some(&StoreError::NoSpace));
    }

    #[test]
    fn bitmap_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (a, c) = {
            let mut pool = PagePool::create(&path, 16).unwrap();
            let a = pool.allocate().unwrap();
            let b = pool.allocate().unwrap();
            let c = pool.allocate().unwrap();
            pool.free(b).unwrap();

            // open() validates the header, so give page 0 a real one.
            let header = StoreHeader::new(16, a);
            header.write_to(pool.page_mut(0).unwrap()).unwrap();
            pool.sync().unwrap();
            (a, c)
        };

        let pool = PagePool::open(&path).unwrap();
        assert!(pool.is_allocated(a));
        assert!(pool.is_allocated(c));
        assert_eq!(pool.allocated_count(), 4);
        assert_eq!(pool.header().unwrap().root_page(), a);
    }

    #[test]
    fn open_rejects_header_page_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut pool = PagePool::create(&path, 16).unwrap();
            let root = pool.allocate().unwrap();
            let header = StoreHeader::new(99, root);
            header.write_to(pool.page_mut(0).unwrap()).unwrap();
            pool.sync().unwrap();
        }

        let result = PagePool::open(&path);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("does not match file size"));
    }
}
