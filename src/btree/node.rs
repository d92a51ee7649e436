//! # Node Model and Codec
//!
//! A node exists in two forms: the zerocopy page image (`NodePage`) laid
//! out exactly as on disk, and the owned working form (`Node`) that the
//! tree algorithms mutate. `Node::read` materializes a node from its
//! page; `Node::write` serializes it back. Decoding validates everything
//! the layout can express (key count, page id, flags, non-zero value and
//! child slots) and reports violations as `CorruptNode`.
//!
//! Keys are fixed-width byte strings compared lexicographically over the
//! full width; `pad_key` normalizes caller input (shorter is zero-padded,
//! longer is rejected).

use eyre::Result;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::StoreError;
use crate::storage::{PageId, PagePool, KEY_LEN, MAX_KEYS, MIN_KEYS, NODE_SIZE, PAGE_SIZE};

/// Fixed-width key as stored in a node.
pub type Key = [u8; KEY_LEN];

/// Node flag: the node is a leaf.
pub const FLAG_LEAF: u16 = 0x01;

/// Normalizes caller-supplied key bytes to the fixed width.
pub fn pad_key(input: &[u8]) -> Result<Key> {
    if input.len() > KEY_LEN {
        return Err(StoreError::KeyTooLarge {
            len: input.len(),
            max: KEY_LEN,
        }
        .into());
    }
    let mut key = [0u8; KEY_LEN];
    key[..input.len()].copy_from_slice(input);
    Ok(key)
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodePage {
    page: U32,
    parent: U32,
    flags: U16,
    n_keys: U16,
    keys: [Key; MAX_KEYS],
    vals: [U32; MAX_KEYS],
    children: [U32; MAX_KEYS + 1],
}

const _: () = assert!(std::mem::size_of::<NodePage>() == NODE_SIZE);
const _: () = assert!(std::mem::size_of::<NodePage>() <= PAGE_SIZE);

/// Outcome of a key scan within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// Key present at this index.
    Found(usize),
    /// Key absent; this is the insertion point, and for internal nodes
    /// the index of the child to descend into.
    NotFound(usize),
}

/// Owned, decoded form of one node page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub page: PageId,
    pub parent: PageId,
    pub is_leaf: bool,
    pub keys: Vec<Key>,
    pub vals: Vec<PageId>,
    /// `keys.len() + 1` entries for internal nodes, empty for leaves.
    pub children: Vec<PageId>,
}

impl Node {
    pub fn new_leaf(page: PageId, parent: PageId) -> Self {
        Self {
            page,
            parent,
            is_leaf: true,
            keys: Vec::new(),
            vals: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn n_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() == MAX_KEYS
    }

    pub fn is_root(&self) -> bool {
        self.parent == 0
    }

    /// Whether this node can give up a key during delete rebalancing.
    pub fn can_lend(&self) -> bool {
        self.keys.len() > MIN_KEYS
    }

    /// Linear ordered scan for `key`.
    pub fn search_pos(&self, key: &Key) -> SearchResult {
        for (i, k) in self.keys.iter().enumerate() {
            match k.cmp(key) {
                std::cmp::Ordering::Equal => return SearchResult::Found(i),
                std::cmp::Ordering::Greater => return SearchResult::NotFound(i),
                std::cmp::Ordering::Less => {}
            }
        }
        SearchResult::NotFound(self.keys.len())
    }

    /// Materializes the node stored in `page_no`.
    pub fn read(pool: &PagePool, page_no: PageId) -> Result<Self> {
        Self::decode(page_no, pool.page(page_no)?)
    }

    /// Serializes the node into its own page.
    pub fn write(&self, pool: &mut PagePool) -> Result<()> {
        let image = self.encode();
        let page = pool.page_mut(self.page)?;
        page[..NODE_SIZE].copy_from_slice(image.as_bytes());
        page[NODE_SIZE..].fill(0);
        Ok(())
    }

    pub fn decode(page_no: PageId, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: &str| StoreError::CorruptNode {
            page: page_no,
            reason: reason.to_string(),
        };

        let image = bytes
            .get(..NODE_SIZE)
            .and_then(|prefix| NodePage::ref_from_bytes(prefix).ok())
            .ok_or_else(|| corrupt("page too small for a node image"))?;

        if image.page.get() != page_no {
            return Err(corrupt("stored page id does not match page location").into());
        }
        if image.flags.get() & !FLAG_LEAF != 0 {
            return Err(corrupt("unknown flag bits").into());
        }

        let n_keys = image.n_keys.get() as usize;
        if n_keys > MAX_KEYS {
            return Err(corrupt("key count exceeds node capacity").into());
        }

        let is_leaf = image.flags.get() & FLAG_LEAF != 0;
        let keys: Vec<Key> = image.keys[..n_keys].to_vec();
        let vals: Vec<PageId> = image.vals[..n_keys].iter().map(|v| v.get()).collect();

        if vals.iter().any(|&v| v == 0) {
            return Err(corrupt("zero value page id").into());
        }

        let children: Vec<PageId> = if is_leaf {
            Vec::new()
        } else {
            let children: Vec<PageId> =
                image.children[..n_keys + 1].iter().map(|c| c.get()).collect();
            if children.iter().any(|&c| c == 0) {
                return Err(corrupt("zero child page id in internal node").into());
            }
            children
        };

        Ok(Self {
            page: page_no,
            parent: image.parent.get(),
            is_leaf,
            keys,
            vals,
            children,
        })
    }

    fn encode(&self) -> NodePage {
        debug_assert!(self.keys.len() <= MAX_KEYS);
        debug_assert_eq!(self.keys.len(), self.vals.len());
        debug_assert_eq!(
            self.children.len(),
            if self.is_leaf { 0 } else { self.keys.len() + 1 }
        );

        let mut image = NodePage::new_zeroed();
        image.page = U32::new(self.page);
        image.parent = U32::new(self.parent);
        image.flags = U16::new(if self.is_leaf { FLAG_LEAF } else { 0 });
        image.n_keys = U16::new(self.keys.len() as u16);
        image.keys[..self.keys.len()].copy_from_slice(&self.keys);
        for (slot, &val) in image.vals.iter_mut().zip(&self.vals) {
            *slot = U32::new(val);
        }
        for (slot, &child) in image.children.iter_mut().zip(&self.children) {
            *slot = U32::new(child);
        }
        image
    }
}
