//! # Error Kinds
//!
//! BurrowDB surfaces failures through [`eyre::Report`] like the rest of
//! the codebase, but the conditions a caller can meaningfully react to
//! are typed: [`StoreError`] variants travel inside the report chain and
//! remain reachable via `Report::downcast_ref::<StoreError>()`.
//!
//! Two conditions are deliberately *not* errors:
//!
//! - a search miss returns `Ok(None)`;
//! - deleting an absent key returns `Ok(false)` (delete is idempotent).
//!
//! Raw I/O failures (map, flush, file metadata) are left as
//! `std::io::Error` inside the chain, wrapped with operation context at
//! each layer; they are fatal to the store instance.

use thiserror::Error;

/// Typed failure kinds of the storage engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The allocation bitmap has no clear bit left.
    #[error("no free pages available")]
    NoSpace,

    /// A value payload does not fit in a single value page.
    #[error("value of {len} bytes exceeds page capacity of {max} bytes")]
    ValueTooLarge { len: usize, max: usize },

    /// A key is wider than the fixed key width.
    #[error("key of {len} bytes exceeds fixed key width of {max} bytes")]
    KeyTooLarge { len: usize, max: usize },

    /// A page failed to decode as a well-formed B-tree node.
    #[error("corrupt node in page {page}: {reason}")]
    CorruptNode { page: u32, reason: String },

    /// A page was freed twice; the engine's bookkeeping is broken.
    #[error("page {0} is already free")]
    DoubleFree(u32),
}
