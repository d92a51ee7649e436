//! # Database Façade
//!
//! `Database` ties the storage and tree layers together and owns every
//! long-lived resource: the page pool (mapped file + bitmap) and the
//! cached root node. It exposes the whole operator surface:
//!
//! - [`Database::create`] / [`Database::open`]: lifecycle
//! - [`Database::insert`]: upsert
//! - [`Database::search`]: point lookup, `Ok(None)` on miss
//! - [`Database::delete`]: idempotent removal
//! - [`Database::dump`]: render the tree for inspection
//! - [`Database::close`]: final sync; `Drop` syncs best-effort
//!
//! ## Durability
//!
//! Allocator mutations flush the bitmap region as they happen; every
//! mutating façade call ends with a full sync, so when `insert` or
//! `delete` returns, everything the operation touched is on disk.
//!
//! ## Root Cache
//!
//! The root node is the only node kept in memory between operations.
//! Mutations thread it through the tree engine by `&mut`, so the cache
//! never goes stale; `search` starts from it without touching the root
//! page.

use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use tracing::info;

use crate::btree::{pad_key, BTree, Node};
use crate::storage::{PagePool, StoreHeader, PAGE_SIZE};

#[derive(Debug)]
pub struct Database {
    pool: PagePool,
    root: Node,
    path: PathBuf,
}

/// Point-in-time page accounting, for the `stats` operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub page_count: u32,
    pub reserved_pages: u32,
    pub allocated_pages: usize,
    pub root_page: u32,
}

impl Database {
    /// Creates a store of at least `target_bytes` (rounded up to whole
    /// pages, floored at the smallest workable file) with an empty tree.
    pub fn create<P: AsRef<Path>>(path: P, target_bytes: u64) -> Result<Self> {
        let path = path.as_ref();

        // Header, bitmap, root node, and at least one value page.
        let n_pages = target_bytes.div_ceil(PAGE_SIZE as u64).clamp(4, u32::MAX as u64) as u32;

        let mut pool = PagePool::create(path, n_pages)
            .wrap_err_with(|| format!("failed to create store at '{}'", path.display()))?;

        let root = BTree::create_empty(&mut pool)?;
        let header = StoreHeader::new(n_pages, root.page);
        header.write_to(pool.page_mut(0)?)?;
        pool.sync()?;

        info!(
            path = %path.display(),
            n_pages,
            root_page = root.page,
            "created store"
        );
        Ok(Self {
            pool,
            root,
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing store, re-reading the header, the bitmap, and
    /// the root node.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let pool = PagePool::open(path)
            .wrap_err_with(|| format!("failed to open store at '{}'", path.display()))?;

        let header = pool.header()?;
        let root = Node::read(&pool, header.root_page())?;
        ensure!(
            root.is_root(),
            "node in root page {} has parent {}",
            root.page,
            root.parent
        );

        info!(
            path = %path.display(),
            n_pages = header.n_pages(),
            root_page = root.page,
            "opened store"
        );
        Ok(Self {
            pool,
            root,
            path: path.to_path_buf(),
        })
    }

    /// Inserts `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = pad_key(key)?;
        BTree::new(&mut self.pool, &mut self.root).insert(key, value)?;
        self.pool.sync()
    }

    /// Looks `key` up. A miss is `Ok(None)`, not an error.
    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = pad_key(key)?;
        BTree::search(&self.pool, &self.root, &key)
    }

    /// Removes `key` if present; removing an absent key is a no-op.
    /// Returns whether an entry was removed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let key = pad_key(key)?;
        let removed = BTree::new(&mut self.pool, &mut self.root).delete(key)?;
        self.pool.sync()?;
        Ok(removed)
    }

    /// Renders every node of the tree into `out`.
    pub fn dump(&self, out: &mut dyn Write) -> Result<()> {
        BTree::dump(&self.pool, &self.root, out)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            page_count: self.pool.page_count(),
            reserved_pages: self.pool.reserved_pages(),
            allocated_pages: self.pool.allocated_count(),
            root_page: self.root.page,
        }
    }

    /// Final sync and teardown. Dropping without `close` syncs
    /// best-effort but swallows the result.
    pub fn close(self) -> Result<()> {
        info!(path = %self.path.display(), "closing store");
        self.pool.sync()
    }

    pub fn root_page(&self) -> u32 {
        self.root.page
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &PagePool {
        &self.pool
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.pool.sync();
    }
}
