//! # BurrowDB - Embedded Ordered Key-Value Store
//!
//! BurrowDB is an embedded, single-file, disk-backed ordered key→value
//! store. All data lives in fixed-size pages of one backing file: B-tree
//! nodes occupy one page each, every value occupies its own page, and a
//! persistent bitmap tracks which pages are in use.
//!
//! ## Quick Start
//!
//! ```ignore
//! use burrowdb::Database;
//!
//! let mut db = Database::create("./burrow.db", 16 * 1024 * 1024)?;
//! db.insert(b"answer", b"42")?;
//! assert_eq!(db.search(b"answer")?, Some(b"42".to_vec()));
//! db.delete(b"answer")?;
//! db.close()?;
//! ```
//!
//! ## Architecture
//!
//! BurrowDB uses a layered architecture:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Public API (Database)          │
//! ├─────────────────────────────────────┤
//! │   B-Tree Engine (search/insert/     │
//! │   delete with split/merge)          │
//! ├──────────────────┬──────────────────┤
//! │   Node Codec     │   Value Pages    │
//! ├──────────────────┴──────────────────┤
//! │   Page Pool (bitmap allocator)      │
//! ├─────────────────────────────────────┤
//! │   Pager (memory-mapped file I/O)    │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! One file, divided into 4KB pages:
//!
//! ```text
//! Page 0        Store header: magic, version, geometry, root page id
//! Pages 1..=B   Allocation bitmap, one bit per page, LSB-first
//! Pages B+1..   Node pages and value pages, allocated on demand
//! ```
//!
//! The root's page id never changes after creation: root splits push the
//! old contents into a fresh left child, and root contraction copies the
//! surviving child back into the root page. The header is therefore
//! written exactly once.
//!
//! ## Keys and Values
//!
//! Keys are fixed-width (16 bytes); shorter input is zero-padded on the
//! right and compared lexicographically over the full width. Values are
//! opaque bytes up to one page minus an 8-byte header; each key owns one
//! value page.
//!
//! ## Concurrency
//!
//! A `Database` is single-threaded: operations are synchronous and run to
//! completion on the calling thread. Wrap it in a lock for shared use.
//!
//! ## Module Overview
//!
//! - [`storage`]: pager, store header, allocation bitmap, value pages
//! - [`btree`]: node codec and the B-tree engine
//! - [`database`]: the `Database` façade
//! - [`error`]: typed error kinds carried inside `eyre` reports

#[macro_use]
mod macros;

pub mod btree;
pub mod database;
pub mod error;
pub mod storage;

pub use database::Database;
pub use error::StoreError;
