//! # Store Header
//!
//! The first 128 bytes of page 0 identify the file and pin its geometry.
//! Everything the engine needs to re-open a store lives here: magic bytes,
//! format version, page size, page count, key width, fanout, and the root
//! node's page id.
//!
//! ## Layout (128 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ----------  -----------------------------------------
//! 0       16    magic       "BurrowDB v1" + zero padding
//! 16      4     version     Format version (currently 1)
//! 20      4     page_size   Must match PAGE_SIZE of this build
//! 24      4     n_pages     Total pages in the file
//! 28      4     key_len     Must match KEY_LEN of this build
//! 32      4     max_keys    Must match MAX_KEYS of this build
//! 36      4     root_page   Page id of the B-tree root
//! 40      88    reserved    Zero
//! ```
//!
//! The root page id is stable for the life of the store (splits and
//! contraction recycle the root page in place), so the header is written
//! once at creation and only ever read afterwards.
//!
//! ## Geometry Validation
//!
//! The node page layout is compile-time, so a file written with a
//! different page size, key width, or fanout cannot be read by this
//! build; `from_bytes` rejects such files outright rather than
//! misinterpreting their pages.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{PageId, FILE_HEADER_SIZE, KEY_LEN, MAX_KEYS, PAGE_SIZE};

pub const STORE_MAGIC: &[u8; 16] = b"BurrowDB v1\x00\x00\x00\x00\x00";

pub const CURRENT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct StoreHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    n_pages: U32,
    key_len: U32,
    max_keys: U32,
    root_page: U32,
    reserved: [u8; 88],
}

const _: () = assert!(std::mem::size_of::<StoreHeader>() == FILE_HEADER_SIZE);

impl StoreHeader {
    pub fn new(n_pages: u32, root_page: PageId) -> Self {
        Self {
            magic: *STORE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            n_pages: U32::new(n_pages),
            key_len: U32::new(KEY_LEN as u32),
            max_keys: U32::new(MAX_KEYS as u32),
            root_page: U32::new(root_page),
            reserved: [0u8; 88],
        }
    }

    /// Parses and validates a header from the start of page 0.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for StoreHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse StoreHeader: {:?}", e))?;

        ensure!(
            &header.magic == STORE_MAGIC,
            "invalid magic bytes: not a BurrowDB store"
        );
        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported store version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );
        ensure!(
            header.page_size.get() as usize == PAGE_SIZE,
            "page size mismatch: store has {}, this build uses {}",
            header.page_size.get(),
            PAGE_SIZE
        );
        ensure!(
            header.key_len.get() as usize == KEY_LEN,
            "key width mismatch: store has {}, this build uses {}",
            header.key_len.get(),
            KEY_LEN
        );
        ensure!(
            header.max_keys.get() as usize == MAX_KEYS,
            "fanout mismatch: store has {}, this build uses {}",
            header.max_keys.get(),
            MAX_KEYS
        );

        Ok(header)
    }

    /// Writes the header into the start of page 0.
    pub fn write_to(&self, page: &mut [u8]) -> Result<()> {
        ensure!(
            page.len() >= FILE_HEADER_SIZE,
            "buffer too small for StoreHeader: {} < {}",
            page.len(),
            FILE_HEADER_SIZE
        );
        page[..FILE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    zerocopy_getters! {
        version: u32,
        page_size: u32,
        n_pages: u32,
        key_len: u32,
        max_keys: u32,
        root_page: u32,
    }
}
