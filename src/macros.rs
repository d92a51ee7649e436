//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in
//! BurrowDB's on-disk structs.
//!
//! ## zerocopy_getters!
//!
//! Generates getter methods for zerocopy struct fields that use
//! little-endian wrapper types (U16, U32). On-disk headers are built
//! whole and written once, so only the read side needs accessors.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct Header {
//!     n_pages: U32,
//!     root_page: U32,
//! }
//!
//! impl Header {
//!     zerocopy_getters! {
//!         n_pages: u32,
//!         root_page: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn n_pages(&self) -> u32 { self.n_pages.get() }
//! // pub fn root_page(&self) -> u32 { self.root_page.get() }
//! ```

/// Generates getter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_getters {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> $native_ty {
                self.$field.get()
            }
        )*
    };
}
