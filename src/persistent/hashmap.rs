//! Persistent (immutable) hash map based on a Hash Array Mapped Trie (HAMT).
//!
//! This module provides [`PersistentHashMap`], an immutable hash map
//! that uses structural sharing for efficient updates, and
//! [`TransientHashMap`], its single-owner batch-edit handle.
//!
//! # Overview
//!
//! A HAMT partitions the 32-bit hash of a key into 5-bit chunks, one per
//! level. It provides:
//!
//! - O(log32 N) `get`, `assoc` and `without` (effectively O(1))
//! - O(1) `size`
//!
//! # Internal Structure
//!
//! Three node kinds make up the trie:
//!
//! - Bitmap nodes keep a 32-bit presence bitmap and a compacted slot array
//!   holding entries or children
//! - Array nodes keep a full 32-slot child array; a bitmap node is promoted
//!   once it would exceed 16 slots and an array node is packed back once it
//!   falls to 8 children
//! - Collision nodes hold every entry whose keys share one full hash
//!
//! # Absent Key
//!
//! Besides its hashed keys a map can hold one extra value stored under the
//! "absent key", kept outside the trie. It is addressed through the
//! `*_null` family of methods and is counted in `size()`.
//!
//! # Examples
//!
//! ```rust
//! use lambars_persistent::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .assoc("one".to_string(), 1)
//!     .assoc("two".to_string(), 2);
//!
//! assert_eq!(map.get("one"), Some(&1));
//! assert_eq!(map.get("two"), Some(&2));
//! assert_eq!(map.get("three"), None);
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.assoc("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));
//! assert_eq!(updated.get("one"), Some(&100));
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use super::ReferenceCounter;
use super::node::{
    BITS_PER_LEVEL, BRANCHING_FACTOR, EditGuard, Slots, bit_position, chunk, empty_slots,
    sparse_index,
};
use super::seq::MapSeq;
use crate::error::PersistentError;

// =============================================================================
// Constants
// =============================================================================

/// A bitmap node already holding this many slots is promoted to an array
/// node instead of growing further.
pub(crate) const ARRAY_NODE_PROMOTION_THRESHOLD: usize = 16;

/// An array node with this many children or fewer is packed back into a
/// bitmap node.
pub(crate) const ARRAY_NODE_DEMOTION_THRESHOLD: usize = 8;

// =============================================================================
// Default Hasher
// =============================================================================

/// Default hash builder used by [`PersistentHashMap`].
///
/// With the `fxhash` feature this is `rustc_hash::FxBuildHasher`.
#[cfg(feature = "fxhash")]
pub type DefaultHashBuilder = rustc_hash::FxBuildHasher;

/// Default hash builder used by [`PersistentHashMap`].
///
/// With the `ahash` feature (and without `fxhash`) this is `ahash::RandomState`.
#[cfg(all(feature = "ahash", not(feature = "fxhash")))]
pub type DefaultHashBuilder = ahash::RandomState;

/// Default hash builder used by [`PersistentHashMap`].
///
/// Without a hasher feature this is the standard library's SipHash with
/// fixed keys, so hashes are stable across maps and runs.
#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
pub type DefaultHashBuilder =
    std::hash::BuildHasherDefault<std::collections::hash_map::DefaultHasher>;

/// Folds the 64-bit hash of `key` into the 32 bits the trie partitions.
#[inline]
#[allow(clippy::cast_possible_truncation)]
fn hash_of<Q, S>(hasher: &S, key: &Q) -> u32
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    let full = hasher.hash_one(key);
    (full ^ (full >> 32)) as u32
}

// =============================================================================
// Node Definition
// =============================================================================

/// A slot of a bitmap node.
#[derive(Clone)]
pub(crate) enum Slot<K, V> {
    /// A key-value pair stored inline
    Entry(K, V),
    /// A sub-trie one level down
    Child(ReferenceCounter<Node<K, V>>),
}

/// Internal node of the HAMT.
#[derive(Clone)]
pub(crate) enum Node<K, V> {
    /// Sparse node: one slot per set bit of `bitmap`, in bit order
    BitmapIndexed {
        /// Occupancy of the 32 logical positions
        bitmap: u32,
        /// Occupied slots, compacted
        slots: Vec<Slot<K, V>>,
    },
    /// Dense node addressing its 32 children directly
    Array {
        /// Number of present children
        count: usize,
        /// Child array; `None` marks an absent child
        children: Box<Slots<Node<K, V>>>,
    },
    /// Entries whose keys all share `hash`
    HashCollision {
        /// The full hash shared by every entry
        hash: u32,
        /// Entries in insertion order
        entries: Vec<(K, V)>,
    },
}

/// What a parent does with a slot after a removal below it.
enum Collapse<K, V> {
    /// The child is empty: drop the slot
    Vacated,
    /// The child holds a single entry: store it inline
    Inline(K, V),
    /// Keep the child as is
    Keep,
}

impl<K, V> Node<K, V> {
    const fn empty() -> Self {
        Self::BitmapIndexed {
            bitmap: 0,
            slots: Vec::new(),
        }
    }

    /// A bitmap node at `shift` holding exactly one entry.
    fn single(shift: usize, hash: u32, key: K, value: V) -> Self {
        Self::BitmapIndexed {
            bitmap: bit_position(hash, shift),
            slots: vec![Slot::Entry(key, value)],
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::BitmapIndexed { bitmap, .. } => *bitmap == 0,
            Self::Array { count, .. } => *count == 0,
            Self::HashCollision { entries, .. } => entries.is_empty(),
        }
    }

    /// The entry of a bitmap node holding nothing else.
    fn single_entry(&self) -> Option<(&K, &V)> {
        match self {
            Self::BitmapIndexed { slots, .. } if slots.len() == 1 => match &slots[0] {
                Slot::Entry(key, value) => Some((key, value)),
                Slot::Child(_) => None,
            },
            _ => None,
        }
    }

    /// Looks up `key`, whose hash is `hash`, starting at the root level.
    fn find<Q>(&self, hash: u32, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut node = self;
        let mut shift = 0;

        loop {
            match node {
                Self::BitmapIndexed { bitmap, slots } => {
                    let bit = bit_position(hash, shift);
                    if *bitmap & bit == 0 {
                        return None;
                    }
                    match &slots[sparse_index(*bitmap, bit)] {
                        Slot::Entry(existing, value) => {
                            return (existing.borrow() == key).then_some((existing, value));
                        }
                        Slot::Child(child) => node = &**child,
                    }
                }
                Self::Array { children, .. } => {
                    node = children[chunk(hash, shift)].as_deref()?;
                }
                Self::HashCollision { entries, .. } => {
                    return entries
                        .iter()
                        .find(|(existing, _)| existing.borrow() == key)
                        .map(|(existing, value)| (existing, value));
                }
            }
            shift += BITS_PER_LEVEL;
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone> Node<K, V> {
    /// Inserts or replaces an entry below this node, which sits at `shift`.
    ///
    /// Returns `true` if a new key was added.
    fn assoc<S: BuildHasher>(
        &mut self,
        shift: usize,
        hash: u32,
        key: K,
        value: V,
        hasher: &S,
    ) -> bool {
        match self {
            Self::BitmapIndexed { bitmap, slots } => {
                let bit = bit_position(hash, shift);
                let index = sparse_index(*bitmap, bit);

                if *bitmap & bit == 0 {
                    if slots.len() >= ARRAY_NODE_PROMOTION_THRESHOLD {
                        let promoted =
                            Self::promote(shift, *bitmap, mem::take(slots), hash, key, value, hasher);
                        *self = promoted;
                    } else {
                        slots.insert(index, Slot::Entry(key, value));
                        *bitmap |= bit;
                    }
                    return true;
                }

                let slot = &mut slots[index];
                match slot {
                    Slot::Child(child) => ReferenceCounter::make_mut(child).assoc(
                        shift + BITS_PER_LEVEL,
                        hash,
                        key,
                        value,
                        hasher,
                    ),
                    Slot::Entry(existing_key, existing_value) => {
                        if *existing_key == key {
                            *existing_value = value;
                            return false;
                        }
                        let existing_hash = hash_of(hasher, existing_key);
                        let merged = Self::merge_entries(
                            shift + BITS_PER_LEVEL,
                            (existing_key.clone(), existing_value.clone()),
                            existing_hash,
                            (key, value),
                            hash,
                        );
                        *slot = Slot::Child(ReferenceCounter::new(merged));
                        true
                    }
                }
            }
            Self::Array { count, children } => {
                let slot = &mut children[chunk(hash, shift)];
                match slot {
                    Some(child) => ReferenceCounter::make_mut(child).assoc(
                        shift + BITS_PER_LEVEL,
                        hash,
                        key,
                        value,
                        hasher,
                    ),
                    None => {
                        *slot = Some(ReferenceCounter::new(Self::single(
                            shift + BITS_PER_LEVEL,
                            hash,
                            key,
                            value,
                        )));
                        *count += 1;
                        true
                    }
                }
            }
            Self::HashCollision {
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash == hash {
                    if let Some(entry) = entries.iter_mut().find(|(existing, _)| *existing == key) {
                        entry.1 = value;
                        false
                    } else {
                        entries.push((key, value));
                        true
                    }
                } else {
                    // Nest the collision node under a bitmap node at this level
                    // and insert beside it.
                    let collision_bit = bit_position(*collision_hash, shift);
                    let nested = mem::replace(self, Self::empty());
                    let mut wrapper = Self::BitmapIndexed {
                        bitmap: collision_bit,
                        slots: vec![Slot::Child(ReferenceCounter::new(nested))],
                    };
                    let added = wrapper.assoc(shift, hash, key, value, hasher);
                    *self = wrapper;
                    added
                }
            }
        }
    }

    /// Builds the subtree at `shift` holding two entries with distinct keys.
    fn merge_entries(
        shift: usize,
        first: (K, V),
        first_hash: u32,
        second: (K, V),
        second_hash: u32,
    ) -> Self {
        if first_hash == second_hash {
            tracing::trace!(shift, hash = first_hash, "hash collision node created");
            return Self::HashCollision {
                hash: first_hash,
                entries: vec![first, second],
            };
        }

        let first_bit = bit_position(first_hash, shift);
        let second_bit = bit_position(second_hash, shift);

        if first_bit == second_bit {
            let child = Self::merge_entries(
                shift + BITS_PER_LEVEL,
                first,
                first_hash,
                second,
                second_hash,
            );
            Self::BitmapIndexed {
                bitmap: first_bit,
                slots: vec![Slot::Child(ReferenceCounter::new(child))],
            }
        } else {
            let (low, high) = if first_bit < second_bit {
                (first, second)
            } else {
                (second, first)
            };
            Self::BitmapIndexed {
                bitmap: first_bit | second_bit,
                slots: vec![Slot::Entry(low.0, low.1), Slot::Entry(high.0, high.1)],
            }
        }
    }

    /// Expands a full bitmap node into an array node and adds the new entry.
    fn promote<S: BuildHasher>(
        shift: usize,
        bitmap: u32,
        slots: Vec<Slot<K, V>>,
        hash: u32,
        key: K,
        value: V,
        hasher: &S,
    ) -> Self {
        let mut children: Box<Slots<Self>> = Box::new(empty_slots());
        let positions = (0..BRANCHING_FACTOR).filter(|position| bitmap & (1u32 << position) != 0);
        let count = slots.len() + 1;

        for (position, slot) in positions.zip(slots) {
            children[position] = Some(match slot {
                Slot::Child(child) => child,
                Slot::Entry(existing_key, existing_value) => {
                    let existing_hash = hash_of(hasher, &existing_key);
                    ReferenceCounter::new(Self::single(
                        shift + BITS_PER_LEVEL,
                        existing_hash,
                        existing_key,
                        existing_value,
                    ))
                }
            });
        }
        children[chunk(hash, shift)] = Some(ReferenceCounter::new(Self::single(
            shift + BITS_PER_LEVEL,
            hash,
            key,
            value,
        )));

        tracing::trace!(shift, count, "bitmap node promoted to array node");
        Self::Array { count, children }
    }

    /// Packs a sparse array node back into a bitmap node.
    ///
    /// Children holding a single entry are stored inline.
    fn pack(shift: usize, children: &mut Slots<Self>) -> Self {
        let mut bitmap = 0u32;
        let mut slots = Vec::with_capacity(ARRAY_NODE_DEMOTION_THRESHOLD);

        for (position, child) in children.iter_mut().enumerate() {
            if let Some(child) = child.take() {
                bitmap |= 1u32 << position;
                let inlined = child
                    .single_entry()
                    .map(|(key, value)| Slot::Entry(key.clone(), value.clone()));
                slots.push(inlined.unwrap_or(Slot::Child(child)));
            }
        }

        tracing::trace!(shift, count = slots.len(), "array node packed into bitmap node");
        Self::BitmapIndexed { bitmap, slots }
    }

    /// Removes `key` below this node, which sits at `shift`.
    ///
    /// Returns `true` if an entry was removed.
    fn without<Q>(&mut self, shift: usize, hash: u32, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        match self {
            Self::BitmapIndexed { bitmap, slots } => {
                let bit = bit_position(hash, shift);
                if *bitmap & bit == 0 {
                    return false;
                }
                let index = sparse_index(*bitmap, bit);

                let collapse = match &mut slots[index] {
                    Slot::Entry(existing, _) if <K as Borrow<Q>>::borrow(&*existing) == key => {
                        Collapse::Vacated
                    }
                    Slot::Entry(..) => return false,
                    Slot::Child(child) => {
                        let child_node = ReferenceCounter::make_mut(child);
                        if !child_node.without(shift + BITS_PER_LEVEL, hash, key) {
                            return false;
                        }
                        child_node.collapse()
                    }
                };

                match collapse {
                    Collapse::Vacated => {
                        slots.remove(index);
                        *bitmap &= !bit;
                    }
                    Collapse::Inline(existing_key, existing_value) => {
                        slots[index] = Slot::Entry(existing_key, existing_value);
                    }
                    Collapse::Keep => {}
                }
                true
            }
            Self::Array { count, children } => {
                let position = chunk(hash, shift);
                let Some(child) = &mut children[position] else {
                    return false;
                };
                let child_node = ReferenceCounter::make_mut(child);
                if !child_node.without(shift + BITS_PER_LEVEL, hash, key) {
                    return false;
                }
                if !child_node.is_empty() {
                    return true;
                }

                children[position] = None;
                *count -= 1;
                if *count <= ARRAY_NODE_DEMOTION_THRESHOLD {
                    let packed = Self::pack(shift, children);
                    *self = packed;
                }
                true
            }
            Self::HashCollision {
                hash: collision_hash,
                entries,
            } => {
                let Some(position) = entries
                    .iter()
                    .position(|(existing, _)| existing.borrow() == key)
                else {
                    return false;
                };
                entries.remove(position);

                if entries.len() == 1 {
                    let collision_hash = *collision_hash;
                    if let Some((remaining_key, remaining_value)) = entries.pop() {
                        *self = Self::single(shift, collision_hash, remaining_key, remaining_value);
                    }
                }
                true
            }
        }
    }

    fn collapse(&self) -> Collapse<K, V> {
        if self.is_empty() {
            Collapse::Vacated
        } else if let Some((key, value)) = self.single_entry() {
            Collapse::Inline(key.clone(), value.clone())
        } else {
            Collapse::Keep
        }
    }
}

// =============================================================================
// Root operations
// =============================================================================
//
// Shared by the persistent and transient maps. A persistent map clones its
// root handle before calling these, so `make_mut` copies every node on the
// path that is still shared with the source version.

fn assoc_root<K, V, S>(
    root: &mut Option<ReferenceCounter<Node<K, V>>>,
    hasher: &S,
    key: K,
    value: V,
) -> bool
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    let hash = hash_of(hasher, &key);
    let node = root.get_or_insert_with(|| ReferenceCounter::new(Node::empty()));
    ReferenceCounter::make_mut(node).assoc(0, hash, key, value, hasher)
}

/// Removes `key`. Nothing is copied when the key is absent.
fn without_root<K, V, S, Q>(
    root: &mut Option<ReferenceCounter<Node<K, V>>>,
    hasher: &S,
    key: &Q,
) -> bool
where
    K: Clone + Hash + Eq + Borrow<Q>,
    V: Clone,
    S: BuildHasher,
    Q: Hash + Eq + ?Sized,
{
    let hash = hash_of(hasher, key);
    let Some(node) = root else {
        return false;
    };
    if node.find(hash, key).is_none() {
        return false;
    }

    let node = ReferenceCounter::make_mut(node);
    node.without(0, hash, key);
    if node.is_empty() {
        *root = None;
    }
    true
}

// =============================================================================
// PersistentHashMap Definition
// =============================================================================

/// A persistent (immutable) hash map based on HAMT.
///
/// # Type Parameters
///
/// - `K`: Key type, must implement `Hash + Eq`
/// - `V`: Value type
/// - `S`: Hash builder, [`DefaultHashBuilder`] unless given through
///   [`with_hasher`](Self::with_hasher)
///
/// # Time Complexity
///
/// | Operation      | Complexity       |
/// |----------------|------------------|
/// | `new`          | O(1)             |
/// | `get`          | O(log32 N)       |
/// | `assoc`        | O(log32 N)       |
/// | `without`      | O(log32 N)       |
/// | `contains_key` | O(log32 N)       |
/// | `size`         | O(1)             |
///
/// # Examples
///
/// ```rust
/// use lambars_persistent::persistent::PersistentHashMap;
///
/// let map = PersistentHashMap::new()
///     .assoc(1, "one")
///     .assoc(2, "two");
///
/// assert_eq!(map.get(&1), Some(&"one"));
/// assert_eq!(map.size(), 2);
/// ```
#[derive(Clone)]
pub struct PersistentHashMap<K, V, S = DefaultHashBuilder> {
    /// Root node of the trie, `None` when no hashed key is present
    root: Option<ReferenceCounter<Node<K, V>>>,
    /// Number of entries, including the absent-key entry
    length: usize,
    /// Value stored under the absent key
    null_value: Option<V>,
    hasher: S,
}

impl<K, V> PersistentHashMap<K, V> {
    /// Creates a new empty map using [`DefaultHashBuilder`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K, V, S> PersistentHashMap<K, V, S> {
    /// Creates a new empty map hashing keys with `hasher`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::collections::hash_map::RandomState;
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::with_hasher(RandomState::new()).assoc("key", 1);
    /// assert_eq!(map.get("key"), Some(&1));
    /// ```
    #[inline]
    #[must_use]
    pub const fn with_hasher(hasher: S) -> Self {
        Self {
            root: None,
            length: 0,
            null_value: None,
            hasher,
        }
    }

    /// Returns the number of entries, counting the absent-key entry.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns the number of entries, counting the absent-key entry.
    ///
    /// Same as [`len`](Self::len).
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.length
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the hash builder of this map.
    #[inline]
    #[must_use]
    pub const fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Returns `true` if a value is stored under the absent key.
    #[inline]
    #[must_use]
    pub const fn contains_null_key(&self) -> bool {
        self.null_value.is_some()
    }

    /// Returns the value stored under the absent key, if any.
    #[inline]
    #[must_use]
    pub const fn get_null(&self) -> Option<&V> {
        self.null_value.as_ref()
    }

    /// Returns the value stored under the absent key, or `default`.
    #[must_use]
    pub fn val_at_null<'a>(&'a self, default: &'a V) -> &'a V {
        self.null_value.as_ref().unwrap_or(default)
    }

    /// Returns a one-shot enumerator over the entries.
    ///
    /// Each item is `(Some(&key), &value)`; the absent-key entry, if any,
    /// comes first as `(None, &value)`. The order of the other entries is
    /// unspecified but stable for a given version.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().assoc(1, 10).assoc_null(0);
    /// let mut entries: Vec<_> = map.seq().collect();
    /// assert_eq!(entries.remove(0), (None, &0));
    /// assert_eq!(entries, vec![(Some(&1), &10)]);
    /// ```
    #[must_use]
    pub fn seq(&self) -> MapSeq<'_, K, V> {
        MapSeq::new(self.root.as_deref(), self.null_value.as_ref(), self.length)
    }

    /// Alias of [`seq`](Self::seq).
    #[must_use]
    pub fn iter(&self) -> MapSeq<'_, K, V> {
        self.seq()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> PersistentHashMap<K, V, S> {
    /// Returns a reference to the value for `key`.
    ///
    /// The key may be any borrowed form of the map's key type.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().assoc("hello".to_string(), 42);
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let root = self.root.as_deref()?;
        root.find(hash_of(&self.hasher, key), key)
            .map(|(_, value)| value)
    }

    /// Returns the value for `key`, or `default` when the key is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().assoc("a", 1);
    /// assert_eq!(*map.val_at("a", &0), 1);
    /// assert_eq!(*map.val_at("b", &0), 0);
    /// ```
    pub fn val_at<'a, Q>(&'a self, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }
}

impl<K, V, S> PersistentHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher + Clone,
{
    /// Returns a new map with `key` bound to `value`.
    ///
    /// An existing binding for `key` is replaced; the size grows only when
    /// the key is new.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map1 = PersistentHashMap::new().assoc("key".to_string(), 1);
    /// let map2 = map1.assoc("key".to_string(), 2);
    ///
    /// assert_eq!(map1.get("key"), Some(&1)); // Original unchanged
    /// assert_eq!(map2.get("key"), Some(&2));
    /// assert_eq!(map2.size(), 1);
    /// ```
    #[must_use]
    pub fn assoc(&self, key: K, value: V) -> Self {
        let mut root = self.root.clone();
        let added = assoc_root(&mut root, &self.hasher, key, value);

        Self {
            root,
            length: self.length + usize::from(added),
            null_value: self.null_value.clone(),
            hasher: self.hasher.clone(),
        }
    }

    /// Returns a new map with `value` stored under the absent key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::<&str, i32>::new().assoc_null(7);
    /// assert_eq!(map.get_null(), Some(&7));
    /// assert_eq!(map.size(), 1);
    /// ```
    #[must_use]
    pub fn assoc_null(&self, value: V) -> Self {
        Self {
            root: self.root.clone(),
            length: self.length + usize::from(self.null_value.is_none()),
            null_value: Some(value),
            hasher: self.hasher.clone(),
        }
    }

    /// Returns a new map without `key`.
    ///
    /// When `key` is absent the result shares everything with this map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .assoc("a".to_string(), 1)
    ///     .assoc("b".to_string(), 2);
    /// let removed = map.without("a");
    ///
    /// assert_eq!(removed.get("a"), None);
    /// assert_eq!(removed.size(), 1);
    /// assert_eq!(map.size(), 2); // Original unchanged
    /// ```
    #[must_use]
    pub fn without<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut root = self.root.clone();
        if !without_root(&mut root, &self.hasher, key) {
            return self.clone();
        }

        Self {
            root,
            length: self.length - 1,
            null_value: self.null_value.clone(),
            hasher: self.hasher.clone(),
        }
    }

    /// Returns a new map without the absent-key entry.
    #[must_use]
    pub fn without_null(&self) -> Self {
        if self.null_value.is_none() {
            return self.clone();
        }
        Self {
            root: self.root.clone(),
            length: self.length - 1,
            null_value: None,
            hasher: self.hasher.clone(),
        }
    }

    /// Converts this map into a transient for batch edits.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().assoc(1, "one");
    /// let mut transient = map.clone().transient();
    /// transient.assoc(2, "two").unwrap().without(&1).unwrap();
    /// let edited = transient.persistent().unwrap();
    ///
    /// assert_eq!(edited.get(&2), Some(&"two"));
    /// assert_eq!(edited.get(&1), None);
    /// assert_eq!(map.get(&1), Some(&"one"));
    /// ```
    #[must_use]
    pub fn transient(self) -> TransientHashMap<K, V, S> {
        TransientHashMap {
            root: self.root,
            length: self.length,
            null_value: self.null_value,
            hasher: self.hasher,
            edit: EditGuard::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + Hash + Eq> PersistentHashMap<T, T> {
    /// Creates a map from a flat sequence alternating keys and values.
    ///
    /// A key that occurs more than once keeps the value of its last
    /// occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalArgument`] if the sequence has an
    /// odd number of elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::create(["a", "1", "b", "2", "a", "3"]).unwrap();
    /// assert_eq!(map.size(), 2);
    /// assert_eq!(map.get("a"), Some(&"3"));
    ///
    /// assert!(PersistentHashMap::create(["a", "1", "b"]).is_err());
    /// ```
    pub fn create<I>(elements: I) -> Result<Self, PersistentError>
    where
        I: IntoIterator<Item = T>,
    {
        Self::create_with_hasher(elements, DefaultHashBuilder::default())
    }
}

impl<T, S> PersistentHashMap<T, T, S>
where
    T: Clone + Hash + Eq,
    S: BuildHasher + Clone,
{
    /// Like [`create`](PersistentHashMap::create), hashing keys with `hasher`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalArgument`] if the sequence has an
    /// odd number of elements.
    pub fn create_with_hasher<I>(elements: I, hasher: S) -> Result<Self, PersistentError>
    where
        I: IntoIterator<Item = T>,
    {
        let mut transient = TransientHashMap::with_hasher(hasher);
        let mut elements = elements.into_iter();
        let mut consumed = 0usize;

        while let Some(key) = elements.next() {
            let Some(value) = elements.next() else {
                return Err(PersistentError::IllegalArgument(format!(
                    "expected alternating keys and values, got {} elements",
                    consumed + 1
                )));
            };
            consumed += 2;
            transient.insert(key, value);
        }

        Ok(transient.into_persistent())
    }
}

// =============================================================================
// TransientHashMap Definition
// =============================================================================

/// A transient (temporarily mutable) hash map for efficient batch edits.
///
/// After the edits, convert it into a [`PersistentHashMap`] with
/// [`persistent`](Self::persistent). From then on every operation on the
/// handle fails with [`PersistentError::IllegalState`].
///
/// # Design
///
/// - `PhantomData<Rc<()>>` makes the handle `!Send` and `!Sync`
/// - Clone is not implemented: the handle has a single owner
///
/// # Examples
///
/// ```rust
/// use lambars_persistent::persistent::TransientHashMap;
///
/// let mut transient = TransientHashMap::new();
/// for index in 0..100 {
///     transient.assoc(index, index * 2).unwrap();
/// }
/// let map = transient.persistent().unwrap();
/// assert_eq!(map.size(), 100);
/// assert_eq!(map.get(&50), Some(&100));
/// ```
pub struct TransientHashMap<K, V, S = DefaultHashBuilder> {
    root: Option<ReferenceCounter<Node<K, V>>>,
    length: usize,
    null_value: Option<V>,
    hasher: S,
    edit: EditGuard,
    /// Marker to ensure `!Send` and `!Sync`.
    _marker: PhantomData<Rc<()>>,
}

static_assertions::assert_not_impl_any!(TransientHashMap<i32, i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientHashMap<String, String>: Send, Sync);

impl<K, V> TransientHashMap<K, V> {
    /// Creates a new empty transient map using [`DefaultHashBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K, V> Default for TransientHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> TransientHashMap<K, V, S> {
    /// Creates a new empty transient map hashing keys with `hasher`.
    #[must_use]
    pub const fn with_hasher(hasher: S) -> Self {
        Self {
            root: None,
            length: 0,
            null_value: None,
            hasher,
            edit: EditGuard::new(),
            _marker: PhantomData,
        }
    }

    /// Returns the number of entries, counting the absent-key entry.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the transient holds no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<K, V, S> TransientHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher + Clone,
{
    /// Returns a reference to the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn get<Q>(&self, key: &Q) -> Result<Option<&V>, PersistentError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.edit.ensure_editable("get")?;
        Ok(self
            .root
            .as_deref()
            .and_then(|root| root.find(hash_of(&self.hasher, key), key))
            .map(|(_, value)| value))
    }

    /// Returns `true` if the transient contains `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn contains_key<Q>(&self, key: &Q) -> Result<bool, PersistentError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).map(|value| value.is_some())
    }

    /// Returns the value stored under the absent key, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn get_null(&self) -> Result<Option<&V>, PersistentError> {
        self.edit.ensure_editable("get_null")?;
        Ok(self.null_value.as_ref())
    }

    /// Binds `key` to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn assoc(&mut self, key: K, value: V) -> Result<&mut Self, PersistentError> {
        self.edit.ensure_editable("assoc")?;
        self.insert(key, value);
        Ok(self)
    }

    /// Stores `value` under the absent key.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn assoc_null(&mut self, value: V) -> Result<&mut Self, PersistentError> {
        self.edit.ensure_editable("assoc_null")?;
        if self.null_value.replace(value).is_none() {
            self.length += 1;
        }
        Ok(self)
    }

    /// Removes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn without<Q>(&mut self, key: &Q) -> Result<&mut Self, PersistentError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.edit.ensure_editable("without")?;
        if without_root(&mut self.root, &self.hasher, key) {
            self.length -= 1;
        }
        Ok(self)
    }

    /// Removes the absent-key entry if present.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn without_null(&mut self) -> Result<&mut Self, PersistentError> {
        self.edit.ensure_editable("without_null")?;
        if self.null_value.take().is_some() {
            self.length -= 1;
        }
        Ok(self)
    }

    /// Converts the transient into a persistent map and freezes the handle.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] if called twice.
    pub fn persistent(&mut self) -> Result<PersistentHashMap<K, V, S>, PersistentError> {
        self.edit.freeze()?;
        tracing::debug!(length = self.length, "transient map made persistent");

        Ok(PersistentHashMap {
            root: self.root.take(),
            length: mem::take(&mut self.length),
            null_value: self.null_value.take(),
            hasher: self.hasher.clone(),
        })
    }

    /// Binds `key` without checking the edit guard.
    fn insert(&mut self, key: K, value: V) {
        if assoc_root(&mut self.root, &self.hasher, key, value) {
            self.length += 1;
        }
    }

    fn into_persistent(self) -> PersistentHashMap<K, V, S> {
        PersistentHashMap {
            root: self.root,
            length: self.length,
            null_value: self.null_value,
            hasher: self.hasher,
        }
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V, S: Default> Default for PersistentHashMap<K, V, S> {
    #[inline]
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> FromIterator<(K, V)> for PersistentHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher + Clone + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut transient = TransientHashMap::with_hasher(S::default());
        for (key, value) in iter {
            transient.insert(key, value);
        }
        transient.into_persistent()
    }
}

impl<'a, K, V, S> IntoIterator for &'a PersistentHashMap<K, V, S> {
    type Item = (Option<&'a K>, &'a V);
    type IntoIter = MapSeq<'a, K, V>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.seq()
    }
}

impl<K, V, S> PartialEq for PersistentHashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length
            && self.null_value == other.null_value
            && self.seq().all(|(key, value)| {
                key.is_none_or(|key| other.get(key) == Some(value))
            })
    }
}

impl<K: Hash + Eq, V: Eq, S: BuildHasher> Eq for PersistentHashMap<K, V, S> {}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for PersistentHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.seq()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Hashes integers to themselves so tests can place keys in the trie.
    #[derive(Default)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for byte in bytes {
                self.0 = (self.0 << 8) | u64::from(*byte);
            }
        }

        fn write_u32(&mut self, value: u32) {
            self.0 = u64::from(value);
        }

        fn write_u64(&mut self, value: u64) {
            self.0 = value;
        }
    }

    /// Sends every key to the same hash.
    #[derive(Default)]
    struct ConstantHasher;

    impl Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            7
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    type IdentityMap<K> = PersistentHashMap<K, u32, BuildHasherDefault<IdentityHasher>>;
    type CollidingMap = PersistentHashMap<&'static str, u32, BuildHasherDefault<ConstantHasher>>;

    fn identity_map(keys: impl IntoIterator<Item = u32>) -> IdentityMap<u32> {
        keys.into_iter().map(|key| (key, key * 10)).collect()
    }

    fn root<K, V, S>(map: &PersistentHashMap<K, V, S>) -> &Node<K, V> {
        map.root.as_deref().expect("map has a root")
    }

    #[rstest]
    fn test_sixteen_slots_stay_in_bitmap_node() {
        let map = identity_map(0..16);

        let Node::BitmapIndexed { bitmap, slots } = root(&map) else {
            panic!("root is not a bitmap node");
        };
        assert_eq!(*bitmap, 0xFFFF);
        assert_eq!(slots.len(), 16);
    }

    #[rstest]
    fn test_seventeenth_slot_promotes_to_array_node() {
        let map = identity_map(0..17);

        let Node::Array { count, children } = root(&map) else {
            panic!("root is not an array node");
        };
        assert_eq!(*count, 17);
        assert!(children[..17].iter().all(Option::is_some));
        assert!(children[17..].iter().all(Option::is_none));
        for key in 0..17 {
            assert_eq!(map.get(&key), Some(&(key * 10)));
        }
    }

    #[rstest]
    fn test_array_node_packs_back_at_eight_children() {
        let mut map = identity_map(0..17);
        for key in 8..16 {
            map = map.without(&key);
        }
        assert!(matches!(root(&map), Node::Array { count: 9, .. }));

        let map = map.without(&16);
        let Node::BitmapIndexed { bitmap, slots } = root(&map) else {
            panic!("root is not a bitmap node");
        };
        assert_eq!(*bitmap, 0xFF);
        assert!(slots.iter().all(|slot| matches!(slot, Slot::Entry(..))));
        for key in 0..8 {
            assert_eq!(map.get(&key), Some(&(key * 10)));
        }
        assert_eq!(map.size(), 8);
    }

    #[rstest]
    fn test_shared_chunk_nests_and_inlines_on_removal() {
        // 1 and 33 share the level-0 chunk and differ at level 1.
        let map = identity_map([1, 33]);
        let Node::BitmapIndexed { slots, .. } = root(&map) else {
            panic!("root is not a bitmap node");
        };
        let Slot::Child(child) = &slots[0] else {
            panic!("expected a child slot");
        };
        assert!(matches!(
            child.as_ref(),
            Node::BitmapIndexed { bitmap: 0b11, .. }
        ));

        let removed = map.without(&33);
        let Node::BitmapIndexed { slots, .. } = root(&removed) else {
            panic!("root is not a bitmap node");
        };
        assert!(matches!(slots[0], Slot::Entry(1, 10)));
    }

    #[rstest]
    fn test_equal_hashes_share_collision_node() {
        let map = CollidingMap::default()
            .assoc("a", 1)
            .assoc("b", 2)
            .assoc("c", 3);

        let Node::BitmapIndexed { slots, .. } = root(&map) else {
            panic!("root is not a bitmap node");
        };
        let Slot::Child(child) = &slots[0] else {
            panic!("expected a child slot");
        };
        let Node::HashCollision { entries, .. } = child.as_ref() else {
            panic!("expected a collision node");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(map.get("b"), Some(&2));
        assert_eq!(map.assoc("b", 20).get("b"), Some(&20));
    }

    #[rstest]
    fn test_collision_shrinks_to_inline_entry() {
        let map = CollidingMap::default()
            .assoc("a", 1)
            .assoc("b", 2)
            .assoc("c", 3)
            .without("b")
            .without("c");

        let Node::BitmapIndexed { slots, .. } = root(&map) else {
            panic!("root is not a bitmap node");
        };
        assert!(matches!(slots[0], Slot::Entry("a", 1)));
        assert_eq!(map.size(), 1);
    }

    #[rstest]
    fn test_different_hash_nests_collision_node() {
        // 5 and 5 << 32 fold to the same 32-bit hash; 37 only shares its
        // level-0 chunk with them.
        let colliding = 5u64 << 32;
        let map: IdentityMap<u64> = [(5u64, 1), (colliding, 2), (37, 3)].into_iter().collect();

        let Node::BitmapIndexed { slots, .. } = root(&map) else {
            panic!("root is not a bitmap node");
        };
        let Slot::Child(wrapper) = &slots[0] else {
            panic!("expected a child slot");
        };
        let Node::BitmapIndexed { bitmap, slots } = wrapper.as_ref() else {
            panic!("expected a bitmap wrapper");
        };
        assert_eq!(*bitmap, 0b11);
        let Slot::Child(collision) = &slots[0] else {
            panic!("expected the collision node first");
        };
        assert!(matches!(collision.as_ref(), Node::HashCollision { hash: 5, .. }));
        assert!(matches!(slots[1], Slot::Entry(37, 3)));

        assert_eq!(map.get(&5), Some(&1));
        assert_eq!(map.get(&colliding), Some(&2));
        assert_eq!(map.get(&37), Some(&3));
    }

    #[rstest]
    fn test_without_absent_key_shares_root() {
        let map = identity_map(0..100);
        let same = map.without(&1000);

        assert!(ReferenceCounter::ptr_eq(
            map.root.as_ref().unwrap(),
            same.root.as_ref().unwrap()
        ));
        assert_eq!(same.size(), 100);
    }

    #[rstest]
    fn test_assoc_copies_only_the_path() {
        let map = identity_map(0..40);
        let updated = map.assoc(3, 0);

        let (Node::Array { children: before, .. }, Node::Array { children: after, .. }) =
            (root(&map), root(&updated))
        else {
            panic!("roots are not array nodes");
        };
        assert!(!ReferenceCounter::ptr_eq(
            before[3].as_ref().unwrap(),
            after[3].as_ref().unwrap()
        ));
        assert!(ReferenceCounter::ptr_eq(
            before[4].as_ref().unwrap(),
            after[4].as_ref().unwrap()
        ));
        assert_eq!(map.get(&3), Some(&30));
        assert_eq!(updated.get(&3), Some(&0));
    }

    #[rstest]
    fn test_removing_last_key_drops_root() {
        let map = identity_map([42]).without(&42);
        assert!(map.root.is_none());
        assert!(map.is_empty());
    }

    #[rstest]
    fn test_null_entry_counts_in_size() {
        let map = identity_map(0..3).assoc_null(99);
        assert_eq!(map.size(), 4);
        assert_eq!(map.assoc_null(100).size(), 4);
        assert_eq!(map.without_null().size(), 3);
        assert_eq!(map.without_null().without_null().size(), 3);
    }
}
