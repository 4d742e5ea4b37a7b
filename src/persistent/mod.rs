//! Persistent (immutable) data structures.
//!
//! This module provides two immutable collections that use structural
//! sharing to minimize copying:
//!
//! - [`PersistentVector`]: Persistent vector (bit-partitioned vector trie)
//! - [`PersistentHashMap`]: Persistent hash map (HAMT)
//!
//! Each comes with a transient counterpart ([`TransientVector`],
//! [`TransientHashMap`]) for building or rewriting a version in a batch.
//!
//! # Structural Sharing
//!
//! An update copies only the nodes on the path from the root to the
//! modified slot. Every other subtree is shared by reference with the
//! previous version, which stays valid and unchanged.
//!
//! # Examples
//!
//! ## `PersistentVector`
//!
//! ```rust
//! use lambars_persistent::persistent::PersistentVector;
//!
//! let vector = PersistentVector::create(0..100);
//! assert_eq!(vector.get(50), Ok(&50));
//!
//! // Structural sharing: the original vector is preserved
//! let updated = vector.assoc_n(50, 999).unwrap();
//! assert_eq!(vector.get(50), Ok(&50));      // Original unchanged
//! assert_eq!(updated.get(50), Ok(&999));    // New version
//! ```
//!
//! ## `PersistentHashMap`
//!
//! ```rust
//! use lambars_persistent::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .assoc("one".to_string(), 1)
//!     .assoc("two".to_string(), 2);
//! assert_eq!(map.get("one"), Some(&1));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.assoc("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled (default), this is `std::sync::Arc`,
/// which lets published versions cross thread boundaries.
///
/// When the `arc` feature is disabled, this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod hashmap;
mod node;
mod seq;
mod vector;

pub use hashmap::DefaultHashBuilder;
pub use hashmap::PersistentHashMap;
pub use hashmap::TransientHashMap;
pub use seq::MapSeq;
pub use seq::VectorIntoSeq;
pub use seq::VectorSeq;
pub use vector::PersistentVector;
pub use vector::TransientVector;

// =============================================================================
// Tests
// =============================================================================
