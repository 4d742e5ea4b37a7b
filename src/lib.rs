//! # lambars-persistent
//!
//! Persistent (immutable, versioned) collections built on 32-way tries.
//!
//! ## Overview
//!
//! Every "mutating" operation returns a new version of the collection in
//! O(log32 N) time and space, and every version observed earlier stays
//! intact and usable. Untouched subtrees are shared between versions and
//! only the nodes along the modified path are copied.
//!
//! - [`persistent::PersistentVector`]: bit-partitioned vector trie with a
//!   trailing tail buffer
//! - [`persistent::PersistentHashMap`]: hash array mapped trie (HAMT)
//! - [`persistent::TransientVector`] / [`persistent::TransientHashMap`]:
//!   single-owner batch-edit handles
//!
//! ## Feature Flags
//!
//! - `arc` (default): nodes are shared through `Arc`, so published versions
//!   can be read from many threads
//! - `fxhash`: use `rustc-hash` as the default map hasher
//! - `ahash`: use `ahash` as the default map hasher
//!
//! ## Example
//!
//! ```rust
//! use lambars_persistent::prelude::*;
//!
//! let vector = PersistentVector::create(1..=3);
//! let extended = vector.cons(4);
//! assert_eq!(vector.size(), 3);
//! assert_eq!(extended.size(), 4);
//!
//! let map = PersistentHashMap::create(["a", "1", "b", "2"]).unwrap();
//! assert_eq!(map.get("a"), Some(&"1"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use lambars_persistent::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::PersistentError;
    pub use crate::persistent::*;
}

pub mod error;
pub mod persistent;

pub use error::PersistentError;
