//! # Value Pages
//!
//! Every value is stored out-of-line in its own page, referenced from the
//! tree by page id. A small header precedes the payload:
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ----------  ----------------------------------------
//! 0       4     data_size   Payload length in bytes
//! 4       4     next_page   Continuation page (reserved, always 0)
//! 8       N     payload     The value bytes
//! ```
//!
//! `next_page` is laid out for chained oversized values but unused in
//! this format revision: payloads larger than `MAX_VALUE_LEN` are
//! rejected with `ValueTooLarge` instead of chained.
//!
//! Value pages are never shared between keys. Replacing a key's value
//! writes a freshly allocated page and frees the old one.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{PageId, PagePool, MAX_VALUE_LEN};
use crate::error::StoreError;

pub const VALUE_HEADER_SIZE: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ValueHeader {
    data_size: U32,
    next_page: U32,
}

const _: () = assert!(std::mem::size_of::<ValueHeader>() == VALUE_HEADER_SIZE);

impl ValueHeader {
    pub fn new(data_size: u32) -> Self {
        Self {
            data_size: U32::new(data_size),
            next_page: U32::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= VALUE_HEADER_SIZE,
            "buffer too small for ValueHeader: {} < {}",
            bytes.len(),
            VALUE_HEADER_SIZE
        );
        Self::ref_from_bytes(&bytes[..VALUE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse ValueHeader: {:?}", e))
    }

    zerocopy_getters! {
        data_size: u32,
        next_page: u32,
    }
}

/// Writes `data` with its header into page `page_no`.
pub fn write_value(pool: &mut PagePool, page_no: PageId, data: &[u8]) -> Result<()> {
    if data.len() > MAX_VALUE_LEN {
        return Err(StoreError::ValueTooLarge {
            len: data.len(),
            max: MAX_VALUE_LEN,
        }
        .into());
    }

    let header = ValueHeader::new(data.len() as u32);
    let page = pool.page_mut(page_no)?;
    page[..VALUE_HEADER_SIZE].copy_from_slice(header.as_bytes());
    page[VALUE_HEADER_SIZE..VALUE_HEADER_SIZE + data.len()].copy_from_slice(data);
    Ok(())
}

/// Reads the payload of value page `page_no` into an owned buffer.
pub fn read_value(pool: &PagePool, page_no: PageId) -> Result<Vec<u8>> {
    let page = pool.page(page_no)?;
    let header = ValueHeader::from_bytes(page)?;

    let len = header.data_size() as usize;
    ensure!(
        len <= MAX_VALUE_LEN,
        "value page {} claims {} bytes, more than the {} a page can hold",
        page_no,
        len,
        MAX_VALUE_LEN
    );
    ensure!(
        header.next_page() == 0,
        "value page {} has a continuation page, which this version does not support",
        page_no
    );

    Ok(page[VALUE_HEADER_SIZE..VALUE_HEADER_SIZE + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PAGE_SIZE;

    fn create_test_pool() -> (tempfile::TempDir, PagePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = PagePool::create(dir.path().join("test.db"), 16).unwrap();
        (dir, pool)
    }

    #[test]
    fn value_roundtrip() {
        let (_dir, mut pool) = create_test_pool();
        let page = pool.allocate().unwrap();

        write_value(&mut pool, page, b"hello burrow").unwrap();

        assert_eq!(read_value(&pool, page).unwrap(), b"hello burrow");
    }

    #[test]
    fn empty_value_roundtrip() {
        let (_dir, mut pool) = create_test_pool();
        let page = pool.allocate().unwrap();

        write_value(&mut pool, page, b"").unwrap();

        assert_eq!(read_value(&pool, page).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn largest_value_fills_page() {
        let (_dir, mut pool) = create_test_pool();
        let page = pool.allocate().unwrap();

        let data = vec![0xAB; MAX_VALUE_LEN];
        write_value(&mut pool, page, &data).unwrap();

        assert_eq!(read_value(&pool, page).unwrap(), data);
    }

    #[test]
    fn oversized_value_is_typed_error() {
        let (_dir, mut pool) = create_test_pool();
        let page = pool.allocate().unwrap();

        let data = vec![0u8; MAX_VALUE_LEN + 1];
        let err = write_value(&mut pool, page, &data).unwrap_err();

        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::ValueTooLarge {
                len: MAX_VALUE_LEN + 1,
                max: MAX_VALUE_LEN,
            })
        );
    }

    #[test]
    fn read_rejects_corrupt_length() {
        let (_dir, mut pool) = create_test_pool();
        let page = pool.allocate().unwrap();

        let bogus = ValueHeader::new(PAGE_SIZE as u32);
        pool.page_mut(page).unwrap()[..VALUE_HEADER_SIZE].copy_from_slice(bogus.as_bytes());

        assert!(read_value(&pool, page).is_err());
    }

    #[test]
    fn read_rejects_chained_value() {
        let (_dir, mut pool) = create_test_pool();
        let page = pool.allocate().unwrap();

        write_value(&mut pool, page, b"x").unwrap();
        // Forge a continuation pointer in the header's second field.
        pool.page_mut(page).unwrap()[4..8].copy_from_slice(&7u32.to_le_bytes());

        assert!(read_value(&pool, page).is_err());
    }
}
