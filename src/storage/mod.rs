//! # Storage Module
//!
//! This module provides the storage layer for BurrowDB: a memory-mapped
//! paged file, the page-0 store header, a persistent allocation bitmap,
//! and single-page value storage.
//!
//! ## Architecture Overview
//!
//! The storage layer is built around memory-mapped I/O. The backing file
//! is pre-extended to its full size on creation and mapped once; page
//! reads borrow directly from the mapping and page writes mutate it in
//! place, giving read-after-write visibility without a buffer layer.
//! Durability points are explicit: the bitmap region is flushed on every
//! allocator mutation, and the façade flushes the whole map before a
//! mutating operation returns.
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────────────┐
//! │ Page 0: StoreHeader  │  magic, version, geometry, root page id
//! ├──────────────────────┤
//! │ Pages 1..=B: bitmap  │  one bit per page, LSB-first per byte
//! ├──────────────────────┤
//! │ Pages B+1..n_pages   │  node pages and value pages
//! └──────────────────────┘
//! ```
//!
//! `B = ⌈n_pages / (PAGE_SIZE · 8)⌉`. Bits `0..=B` are permanently set:
//! the header page and the bitmap pages account for themselves.
//!
//! ## Geometry
//!
//! All layout constants are compile-time and recorded in the store
//! header, so `open` can reject a file written with different geometry
//! instead of misreading it.
//!
//! ## Module Organization
//!
//! - `pager`: low-level memory-mapped page access (`Pager`)
//! - `header`: page-0 metadata (`StoreHeader`)
//! - `bitmap`: in-memory bit array (`PageBitmap`)
//! - `pool`: allocator over pager + bitmap (`PagePool`)
//! - `value`: value-page read/write
//!
//! ## Thread Safety
//!
//! Nothing in this module is `Sync`; the store contract is single-
//! threaded and callers add their own lock if they need sharing.

mod bitmap;
mod header;
mod pager;
mod pool;
mod value;

pub use bitmap::PageBitmap;
pub use header::{StoreHeader, CURRENT_VERSION, STORE_MAGIC};
pub use pager::Pager;
pub use pool::PagePool;
pub use value::{read_value, write_value, ValueHeader, VALUE_HEADER_SIZE};

/// Page id inside the backing file. Id 0 is the header page and doubles
/// as the "none" sentinel in node child/parent slots.
pub type PageId = u32;

/// Size of every page in bytes. The unit of I/O and allocation.
pub const PAGE_SIZE: usize = 4096;

/// Size of the store header at the start of page 0.
pub const FILE_HEADER_SIZE: usize = 128;

/// Width of a page id on disk.
pub const PAGE_ID_SIZE: usize = 4;

/// Fixed width of every key. Shorter keys are zero-padded on the right.
pub const KEY_LEN: usize = 16;

/// Serialized node header: page id, parent id, flags, key count.
pub const NODE_HEADER_SIZE: usize = 12;

const MAX_KEYS_RAW: usize =
    (PAGE_SIZE - NODE_HEADER_SIZE - PAGE_ID_SIZE) / (KEY_LEN + 2 * PAGE_ID_SIZE);

/// Maximum keys per node, sized so a serialized node fills one page.
/// Forced odd so that merging two minimum-fill nodes plus their
/// separator lands exactly on MAX_KEYS.
pub const MAX_KEYS: usize = if MAX_KEYS_RAW % 2 == 0 {
    MAX_KEYS_RAW - 1
} else {
    MAX_KEYS_RAW
};

/// Minimum keys in a non-root node.
pub const MIN_KEYS: usize = MAX_KEYS / 2;

/// Serialized size of a node page image.
pub const NODE_SIZE: usize =
    NODE_HEADER_SIZE + MAX_KEYS * (KEY_LEN + PAGE_ID_SIZE) + (MAX_KEYS + 1) * PAGE_ID_SIZE;

/// Largest value payload that fits in one value page.
pub const MAX_VALUE_LEN: usize = PAGE_SIZE - VALUE_HEADER_SIZE;

const _: () = assert!(MAX_KEYS % 2 == 1, "MAX_KEYS must be odd for merge to fit");

const _: () = assert!(
    2 * MIN_KEYS + 1 == MAX_KEYS,
    "a merge of two minimal nodes plus separator must equal MAX_KEYS"
);

const _: () = assert!(NODE_SIZE <= PAGE_SIZE, "node image must fit in one page");

const _: () = assert!(
    FILE_HEADER_SIZE <= PAGE_SIZE,
    "store header must fit in page 0"
);
