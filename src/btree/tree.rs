//! # B-Tree Operations
//!
//! This module implements the tree algorithms over the page pool: search,
//! upsert with proactive splitting, and deletion with top-down
//! rebalancing.
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. If the root is full, split it first (root page id is preserved)
//! 2. Descend; the current node is never full:
//!    - key already present: replace its value page
//!    - leaf: insert the entry at its sorted position
//!    - internal: if the target child is full, split it and re-decide
//!      against the promoted key, then descend
//! ```
//!
//! Because a full child is split before descent, a promoted key always
//! finds room in its parent; no split ever propagates upward.
//!
//! ## Delete Algorithm
//!
//! ```text
//! 1. Descend; every node entered holds more than MIN_KEYS (root exempt):
//!    - key in a leaf: remove it, free its value page
//!    - key in an internal node: pull up the in-order predecessor (or
//!      successor) from a child that can lend one, then delete that
//!      entry from the subtree; if neither child can lend, merge them
//!      through the key and delete from the merged node
//!    - key not here: top up the target child first (rotate from a
//!      sibling with spare keys, else merge through the separator)
//! 2. An internal root left with no keys collapses: its last child's
//!    body moves into the root page and the child page is freed
//! ```
//!
//! The refill-before-descent discipline means removal at the bottom can
//! never underflow an ancestor, so deletion also never walks back up.
//!
//! ## Write Ordering
//!
//! Every structural mutation writes the affected pages before descending
//! further. Splits and value replacement allocate all pages they need
//! before touching shared state, so an out-of-space failure leaves the
//! tree exactly as it was.

use std::io::Write;

use eyre::{bail, Result};
use tracing::debug;

use super::node::{Key, Node, SearchResult};
use crate::error::StoreError;
use crate::storage::{read_value, write_value, PageId, PagePool, MAX_VALUE_LEN};

/// The B-tree engine, borrowing the pool and the cached root node for
/// the duration of one mutating operation.
#[derive(Debug)]
pub struct BTree<'a> {
    pool: &'a mut PagePool,
    root: &'a mut Node,
}

impl<'a> BTree<'a> {
    pub fn new(pool: &'a mut PagePool, root: &'a mut Node) -> Self {
        Self { pool, root }
    }

    /// Allocates and writes an empty leaf root, returning it for caching.
    pub fn create_empty(pool: &mut PagePool) -> Result<Node> {
        let page = pool.allocate()?;
        let root = Node::new_leaf(page, 0);
        root.write(pool)?;
        Ok(root)
    }

    /// Looks `key` up, starting from the cached root.
    pub fn search(pool: &PagePool, root: &Node, key: &Key) -> Result<Option<Vec<u8>>> {
        match root.search_pos(key) {
            SearchResult::Found(i) => return read_value(pool, root.vals[i]).map(Some),
            SearchResult::NotFound(_) if root.is_leaf => return Ok(None),
            SearchResult::NotFound(i) => {
                let mut node = Node::read(pool, root.children[i])?;
                loop {
                    match node.search_pos(key) {
                        SearchResult::Found(i) => {
                            return read_value(pool, node.vals[i]).map(Some)
                        }
                        SearchResult::NotFound(_) if node.is_leaf => return Ok(None),
                        SearchResult::NotFound(i) => {
                            node = Node::read(pool, node.children[i])?;
                        }
                    }
                }
            }
        }
    }

    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: Key, value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_LEN {
            return Err(StoreError::ValueTooLarge {
                len: value.len(),
                max: MAX_VALUE_LEN,
            }
            .into());
        }

        if self.root.is_full() {
            split_root(self.pool, self.root)?;
        }
        insert_nonfull(self.pool, self.root, key, value)
    }

    /// Removes `key` if present. Returns whether an entry was removed;
    /// deleting an absent key is a no-op.
    pub fn delete(&mut self, key: Key) -> Result<bool> {
        delete_from(self.pool, self.root, &key, true)
    }

    /// Renders every node reachable from the root, pre-order.
    pub fn dump(pool: &PagePool, root: &Node, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "=====================================================")?;
        dump_node(pool, root, 0, out)?;
        writeln!(out, "=====================================================")?;
        Ok(())
    }
}

fn insert_nonfull(pool: &mut PagePool, node: &mut Node, key: Key, value: &[u8]) -> Result<()> {
    debug_assert!(!node.is_full());

    match node.search_pos(&key) {
        SearchResult::Found(i) => replace_value(pool, node, i, value),
        SearchResult::NotFound(i) if node.is_leaf => {
            let val_page = pool.allocate()?;
            write_value(pool, val_page, value)?;
            node.keys.insert(i, key);
            node.vals.insert(i, val_page);
            node.write(pool)
        }
        SearchResult::NotFound(i) => {
            let mut child = Node::read(pool, node.children[i])?;
            if child.is_full() {
                split_child(pool, node, i, &mut child)?;
                // The promoted key now sits at position i; re-decide.
                match key.cmp(&node.keys[i]) {
                    std::cmp::Ordering::Equal => return replace_value(pool, node, i, value),
                    std::cmp::Ordering::Greater => {
                        child = Node::read(pool, node.children[i + 1])?;
                    }
                    std::cmp::Ordering::Less => {}
                }
            }
            insert_nonfull(pool, &mut child, key, value)
        }
    }
}

/// Swaps in a fresh value page for the entry at `i`, freeing the old one.
/// The new page is allocated first so an out-of-space failure changes
/// nothing.
fn replace_value(pool: &mut PagePool, node: &mut Node, i: usize, value: &[u8]) -> Result<()> {
    let new_page = pool.allocate()?;
    write_value(pool, new_page, value)?;

    let old_page = std::mem::replace(&mut node.vals[i], new_page);
    node.write(pool)?;
    pool.free(old_page)?;

    debug!(
        page = node.page,
        old_value_page = old_page,
        new_value_page = new_page,
        "replaced value"
    );
    Ok(())
}

/// Splits the full root in place: its halves move into two fresh
/// siblings and the root shrinks to the single promoted entry, keeping
/// its page id.
fn split_root(pool: &mut PagePool, root: &mut Node) -> Result<()> {
    let left_page = pool.allocate()?;
    let right_page = match pool.allocate() {
        Ok(page) => page,
        Err(err) => {
            pool.free(left_page)?;
            return Err(err);
        }
    };

    let mid = (root.n_keys() + 1) / 2 - 1;

    let right = Node {
        page: right_page,
        parent: root.page,
        is_leaf: root.is_leaf,
        keys: root.keys.split_off(mid + 1),
        vals: root.vals.split_off(mid + 1),
        children: if root.is_leaf {
            Vec::new()
        } else {
            root.children.split_off(mid + 1)
        },
    };

    let (sep_key, sep_val) = match (root.keys.pop(), root.vals.pop()) {
        (Some(k), Some(v)) => (k, v),
        _ => bail!("cannot split root {} with no keys", root.page),
    };

    let left = Node {
        page: left_page,
        parent: root.page,
        is_leaf: root.is_leaf,
        keys: std::mem::take(&mut root.keys),
        vals: std::mem::take(&mut root.vals),
        children: std::mem::take(&mut root.children),
    };

    root.is_leaf = false;
    root.keys = vec![sep_key];
    root.vals = vec![sep_val];
    root.children = vec![left.page, right.page];

    adopt_children(pool, &left)?;
    adopt_children(pool, &right)?;
    left.write(pool)?;
    right.write(pool)?;
    root.write(pool)?;

    debug!(
        root = root.page,
        left = left.page,
        right = right.page,
        "split root"
    );
    Ok(())
}

/// Splits the full child at `parent.children[i]`, promoting its middle
/// entry into the parent. The parent must not be full.
fn split_child(pool: &mut PagePool, parent: &mut Node, i: usize, child: &mut Node) -> Result<()> {
    debug_assert!(!parent.is_full());

    let right_page = pool.allocate()?;
    let mid = (child.n_keys() + 1) / 2 - 1;

    let right = Node {
        page: right_page,
        parent: parent.page,
        is_leaf: child.is_leaf,
        keys: child.keys.split_off(mid + 1),
        vals: child.vals.split_off(mid + 1),
        children: if child.is_leaf {
            Vec::new()
        } else {
            child.children.split_off(mid + 1)
        },
    };

    let (sep_key, sep_val) = match (child.keys.pop(), child.vals.pop()) {
        (Some(k), Some(v)) => (k, v),
        _ => bail!("cannot split node {} with no keys", child.page),
    };

    parent.keys.insert(i, sep_key);
    parent.vals.insert(i, sep_val);
    parent.children.insert(i + 1, right.page);

    adopt_children(pool, &right)?;
    child.write(pool)?;
    right.write(pool)?;
    parent.write(pool)?;

    debug!(
        node = child.page,
        sibling = right.page,
        parent = parent.page,
        "split child"
    );
    Ok(())
}

/// Rewrites the parent link of every child of `node` that points
/// elsewhere. Used after entries move between nodes.
fn adopt_children(pool: &mut PagePool, node: &Node) -> Result<()> {
    for &child_page in &node.children {
        let mut child = Node::read(pool, child_page)?;
        if child.parent != node.page {
            child.parent = node.page;
            child.write(pool)?;
        }
    }
    Ok(())
}

/// Top-down removal. `node` holds more than MIN_KEYS keys unless it is
/// the root. `reclaim` is false when the entry's value page has already
/// been handed to an ancestor by a predecessor/successor replacement.
fn delete_from(pool: &mut PagePool, node: &mut Node, key: &Key, reclaim: bool) -> Result<bool> {
    match node.search_pos(key) {
        SearchResult::Found(i) if node.is_leaf => {
            if reclaim {
                pool.free(node.vals[i])?;
            }
            node.keys.remove(i);
            node.vals.remove(i);
            node.write(pool)?;
            Ok(true)
        }
        SearchResult::Found(i) => delete_from_internal(pool, node, i, key, reclaim),
        SearchResult::NotFound(_) if node.is_leaf => Ok(false),
        SearchResult::NotFound(i) => {
            let mut child = Node::read(pool, node.children[i])?;
            if !child.can_lend() {
                match refill_child(pool, node, i, child)? {
                    Some(refilled) => child = refilled,
                    // The root collapsed into itself; resume from it.
                    None => return delete_from(pool, node, key, reclaim),
                }
            }
            delete_from(pool, &mut child, key, reclaim)
        }
    }
}

/// Removes the entry at `node.keys[i]` of an internal node by replacing
/// it with its in-order predecessor or successor, or by merging the two
/// adjacent children and deleting from the merged node.
fn delete_from_internal(
    pool: &mut PagePool,
    node: &mut Node,
    i: usize,
    key: &Key,
    reclaim: bool,
) -> Result<bool> {
    let mut left = Node::read(pool, node.children[i])?;
    if left.can_lend() {
        if reclaim {
            pool.free(node.vals[i])?;
        }
        let (pred_key, pred_val) = max_entry(pool, &left)?;
        node.keys[i] = pred_key;
        node.vals[i] = pred_val;
        node.write(pool)?;
        delete_from(pool, &mut left, &pred_key, false)?;
        return Ok(true);
    }

    let mut right = Node::read(pool, node.children[i + 1])?;
    if right.can_lend() {
        if reclaim {
            pool.free(node.vals[i])?;
        }
        let (succ_key, succ_val) = min_entry(pool, &right)?;
        node.keys[i] = succ_key;
        node.vals[i] = succ_val;
        node.write(pool)?;
        delete_from(pool, &mut right, &succ_key, false)?;
        return Ok(true);
    }

    // Neither neighbor can lend: push the target entry down into the
    // merged node and continue there.
    merge_children(pool, node, i, &mut left, right)?;
    if node.is_root() && node.n_keys() == 0 {
        collapse_root(pool, node, left)?;
        return delete_from(pool, node, key, reclaim);
    }
    delete_from(pool, &mut left, key, reclaim)
}

/// Brings the child at `parent.children[i]` above minimum fill before
/// descent. Returns the node to descend into, or `None` when the merge
/// emptied the root and the tree collapsed into the root page.
fn refill_child(
    pool: &mut PagePool,
    parent: &mut Node,
    i: usize,
    mut child: Node,
) -> Result<Option<Node>> {
    if i > 0 {
        let mut left = Node::read(pool, parent.children[i - 1])?;
        if left.can_lend() {
            rotate_right(pool, parent, i - 1, &mut left, &mut child)?;
            return Ok(Some(child));
        }
    }

    if i + 1 < parent.children.len() {
        let mut right = Node::read(pool, parent.children[i + 1])?;
        if right.can_lend() {
            rotate_left(pool, parent, i, &mut child, &mut right)?;
            return Ok(Some(child));
        }
    }

    let merged = if i + 1 < parent.children.len() {
        let right = Node::read(pool, parent.children[i + 1])?;
        merge_children(pool, parent, i, &mut child, right)?;
        child
    } else {
        let mut left = Node::read(pool, parent.children[i - 1])?;
        merge_children(pool, parent, i - 1, &mut left, child)?;
        left
    };

    if parent.is_root() && parent.n_keys() == 0 {
        collapse_root(pool, parent, merged)?;
        return Ok(None);
    }
    Ok(Some(merged))
}

/// Moves the separator at `parent.keys[sep]` down to the front of
/// `child` and the last entry of the left sibling up into the parent.
fn rotate_right(
    pool: &mut PagePool,
    parent: &mut Node,
    sep: usize,
    left: &mut Node,
    child: &mut Node,
) -> Result<()> {
    let (lend_key, lend_val) = match (left.keys.pop(), left.vals.pop()) {
        (Some(k), Some(v)) => (k, v),
        _ => bail!("cannot rotate from empty node {}", left.page),
    };
    let sep_key = std::mem::replace(&mut parent.keys[sep], lend_key);
    let sep_val = std::mem::replace(&mut parent.vals[sep], lend_val);
    child.keys.insert(0, sep_key);
    child.vals.insert(0, sep_val);

    if !child.is_leaf {
        let moved = match left.children.pop() {
            Some(c) => c,
            None => bail!("internal node {} has no child to rotate", left.page),
        };
        child.children.insert(0, moved);
        let mut adopted = Node::read(pool, moved)?;
        adopted.parent = child.page;
        adopted.write(pool)?;
    }

    left.write(pool)?;
    child.write(pool)?;
    parent.write(pool)?;

    debug!(
        from = left.page,
        to = child.page,
        parent = parent.page,
        "rotated right"
    );
    Ok(())
}

/// Moves the separator at `parent.keys[sep]` down to the back of
/// `child` and the first entry of the right sibling up into the parent.
fn rotate_left(
    pool: &mut PagePool,
    parent: &mut Node,
    sep: usize,
    child: &mut Node,
    right: &mut Node,
) -> Result<()> {
    if right.keys.is_empty() {
        bail!("cannot rotate from empty node {}", right.page);
    }
    let lend_key = right.keys.remove(0);
    let lend_val = right.vals.remove(0);
    let sep_key = std::mem::replace(&mut parent.keys[sep], lend_key);
    let sep_val = std::mem::replace(&mut parent.vals[sep], lend_val);
    child.keys.push(sep_key);
    child.vals.push(sep_val);

    if !child.is_leaf {
        let moved = right.children.remove(0);
        child.children.push(moved);
        let mut adopted = Node::read(pool, moved)?;
        adopted.parent = child.page;
        adopted.write(pool)?;
    }

    right.write(pool)?;
    child.write(pool)?;
    parent.write(pool)?;

    debug!(
        from = right.page,
        to = child.page,
        parent = parent.page,
        "rotated left"
    );
    Ok(())
}

/// Folds the separator at `parent.keys[sep]` and the whole of `right`
/// into `left`, freeing `right`'s page. Both children are at minimum
/// fill, so the merged node holds exactly MAX_KEYS keys.
fn merge_children(
    pool: &mut PagePool,
    parent: &mut Node,
    sep: usize,
    left: &mut Node,
    mut right: Node,
) -> Result<()> {
    let sep_key = parent.keys.remove(sep);
    let sep_val = parent.vals.remove(sep);
    parent.children.remove(sep + 1);

    left.keys.push(sep_key);
    left.vals.push(sep_val);
    left.keys.append(&mut right.keys);
    left.vals.append(&mut right.vals);
    left.children.append(&mut right.children);

    adopt_children(pool, left)?;
    left.write(pool)?;
    parent.write(pool)?;
    pool.free(right.page)?;

    debug!(
        left = left.page,
        right = right.page,
        parent = parent.page,
        "merged siblings"
    );
    Ok(())
}

/// Replaces the empty internal root's body with its single child's,
/// keeping the root page id, and frees the child's page.
fn collapse_root(pool: &mut PagePool, root: &mut Node, merged: Node) -> Result<()> {
    debug_assert!(root.is_root());
    debug_assert!(root.keys.is_empty());
    debug_assert_eq!(root.children.as_slice(), &[merged.page]);

    let old_page = merged.page;
    root.is_leaf = merged.is_leaf;
    root.keys = merged.keys;
    root.vals = merged.vals;
    root.children = merged.children;

    adopt_children(pool, root)?;
    root.write(pool)?;
    pool.free(old_page)?;

    debug!(root = root.page, absorbed = old_page, "collapsed root");
    Ok(())
}

/// Largest entry in the subtree rooted at `start`: the last entry of the
/// rightmost leaf.
fn max_entry(pool: &PagePool, start: &Node) -> Result<(Key, PageId)> {
    let mut leaf;
    let mut node = start;
    while !node.is_leaf {
        let last = match node.children.last() {
            Some(&c) => c,
            None => bail!("internal node {} has no children", node.page),
        };
        leaf = Node::read(pool, last)?;
        node = &leaf;
    }
    match (node.keys.last(), node.vals.last()) {
        (Some(&k), Some(&v)) => Ok((k, v)),
        _ => bail!("empty leaf {} on rightmost spine", node.page),
    }
}

/// Smallest entry in the subtree rooted at `start`: the first entry of
/// the leftmost leaf.
fn min_entry(pool: &PagePool, start: &Node) -> Result<(Key, PageId)> {
    let mut leaf;
    let mut node = start;
    while !node.is_leaf {
        let first = match node.children.first() {
            Some(&c) => c,
            None => bail!("internal node {} has no children", node.page),
        };
        leaf = Node::read(pool, first)?;
        node = &leaf;
    }
    match (node.keys.first(), node.vals.first()) {
        (Some(&k), Some(&v)) => Ok((k, v)),
        _ => bail!("empty leaf {} on leftmost spine", node.page),
    }
}

fn dump_node(pool: &PagePool, node: &Node, depth: usize, out: &mut dyn Write) -> Result<()> {
    let pad = "    ".repeat(depth);
    writeln!(
        out,
        "{}page {:>4}  parent {:>4}  {}  {} keys",
        pad,
        node.page,
        node.parent,
        if node.is_leaf { "leaf    " } else { "internal" },
        node.n_keys()
    )?;
    for (key, &val) in node.keys.iter().zip(&node.vals) {
        writeln!(out, "{}  {} => value page {}", pad, fmt_key(key), val)?;
    }
    if !node.is_leaf {
        for &child_page in &node.children {
            let child = Node::read(pool, child_page)?;
            dump_node(pool, &child, depth + 1, out)?;
        }
    }
    Ok(())
}

fn fmt_key(key: &Key) -> String {
    let end = key
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let trimmed = &key[..end];
    if !trimmed.is_empty() && trimmed.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        format!("\"{}\"", String::from_utf8_lossy(trimmed))
    } else {
        let hex: String = trimmed.iter().map(|b| format!("{:02x}", b)).collect();
        format!("0x{}", hex)
    }
}
