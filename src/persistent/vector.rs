//! Persistent (immutable) vector based on a bit-partitioned vector trie.
//!
//! This module provides [`PersistentVector`], an immutable indexed sequence
//! that uses structural sharing for efficient updates, and
//! [`TransientVector`], its single-owner batch-edit handle.
//!
//! # Overview
//!
//! `PersistentVector` is a 32-way branching trie in the style of Clojure's
//! `PersistentVector`. It provides:
//!
//! - O(log32 N) random access (effectively O(1) for practical sizes)
//! - O(1) amortized `cons` thanks to the tail buffer
//! - O(log32 N) `assoc_n` and `pop`
//! - O(1) `size` and `tail_offset`
//!
//! # Internal Structure
//!
//! The vector consists of:
//! - A root node addressing 32 slots; the lowest level holds leaves of
//!   32 elements
//! - A tail buffer (up to 32 elements) absorbing recent appends
//!
//! Every element with an index below `tail_offset()` lives in the trie; the
//! remaining ones live in the tail.
//!
//! # Examples
//!
//! ```rust
//! use lambars_persistent::persistent::PersistentVector;
//!
//! let vector = PersistentVector::new().cons(1).cons(2).cons(3);
//!
//! assert_eq!(vector.get(0), Ok(&1));
//! assert_eq!(vector.get(2), Ok(&3));
//!
//! // Structural sharing: the original vector is preserved
//! let extended = vector.cons(4);
//! assert_eq!(vector.size(), 3);
//! assert_eq!(extended.size(), 4);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use super::ReferenceCounter;
use super::node::{BITS_PER_LEVEL, BRANCHING_FACTOR, EditGuard, MASK, Slots, empty_slots};
use super::seq::{VectorIntoSeq, VectorSeq};
use crate::error::PersistentError;

// =============================================================================
// Node Definition
// =============================================================================

/// Internal node of the vector trie.
#[derive(Clone)]
pub(crate) enum Node<T> {
    /// The canonical node with all 32 slots absent
    Empty,
    /// Branch node with up to 32 children
    Branch(Slots<Self>),
    /// Bottom-level node holding 32 elements
    Leaf(ReferenceCounter<[T]>),
}

impl<T> Node<T> {
    /// The canonical all-absent node. Every empty root is this value.
    pub(crate) const EMPTY: Self = Self::Empty;

    pub(crate) const fn is_empty_node(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Builds a chain of single-child branches from `level` down to `leaf`.
    fn new_path(level: usize, leaf: ReferenceCounter<[T]>) -> Self {
        if level == 0 {
            Self::Leaf(leaf)
        } else {
            let mut slots = empty_slots();
            slots[0] = Some(ReferenceCounter::new(Self::new_path(
                level - BITS_PER_LEVEL,
                leaf,
            )));
            Self::Branch(slots)
        }
    }

    /// Child slots of a branch, materializing `Empty` as a branch first.
    fn slots_mut(&mut self) -> &mut Slots<Self> {
        if self.is_empty_node() {
            *self = Self::Branch(empty_slots());
        }
        match self {
            Self::Branch(slots) => slots,
            Self::Empty | Self::Leaf(_) => unreachable!("leaf node above the bottom level"),
        }
    }
}

// =============================================================================
// Trie primitives
// =============================================================================
//
// These operate on a root reference and its shift, and are shared by the
// persistent and transient vectors. Each modification goes through
// `ReferenceCounter::make_mut`, so a node shared with another version is
// copied first and only exclusively owned nodes change in place.

/// Start index of the tail for a vector of `length` elements.
#[inline]
const fn tail_offset_for(length: usize) -> usize {
    if length <= BRANCHING_FACTOR {
        0
    } else {
        ((length - 1) >> BITS_PER_LEVEL) << BITS_PER_LEVEL
    }
}

/// The leaf holding `index`, which must lie below the tail offset.
fn leaf_for<T>(root: &Node<T>, shift: usize, index: usize) -> Option<&ReferenceCounter<[T]>> {
    let mut node = root;
    let mut level = shift;

    loop {
        match node {
            Node::Branch(slots) => {
                node = slots[(index >> level) & MASK].as_deref()?;
                level = level.saturating_sub(BITS_PER_LEVEL);
            }
            Node::Leaf(elements) => return Some(elements),
            Node::Empty => return None,
        }
    }
}

/// Attaches a full tail as the leaf starting at `tail_offset`.
///
/// Grows the root by one level when it cannot address the new leaf.
fn push_leaf<T: Clone>(
    root: &mut ReferenceCounter<Node<T>>,
    shift: &mut usize,
    tail_offset: usize,
    leaf: ReferenceCounter<[T]>,
) {
    if (tail_offset >> *shift) >= BRANCHING_FACTOR {
        let mut slots = empty_slots();
        slots[0] = Some(root.clone());
        slots[1] = Some(ReferenceCounter::new(Node::new_path(*shift, leaf)));
        *root = ReferenceCounter::new(Node::Branch(slots));
        *shift += BITS_PER_LEVEL;
        tracing::trace!(shift = *shift, tail_offset, "vector root grew one level");
    } else {
        push_leaf_into(root, *shift, tail_offset, leaf);
    }
}

fn push_leaf_into<T: Clone>(
    node: &mut ReferenceCounter<Node<T>>,
    level: usize,
    tail_offset: usize,
    leaf: ReferenceCounter<[T]>,
) {
    let slots = ReferenceCounter::make_mut(node).slots_mut();
    let slot = &mut slots[(tail_offset >> level) & MASK];

    if level == BITS_PER_LEVEL {
        *slot = Some(ReferenceCounter::new(Node::Leaf(leaf)));
        return;
    }
    match slot {
        Some(child) => push_leaf_into(child, level - BITS_PER_LEVEL, tail_offset, leaf),
        None => {
            *slot = Some(ReferenceCounter::new(Node::new_path(
                level - BITS_PER_LEVEL,
                leaf,
            )));
        }
    }
}

/// Replaces the element at `index` below `node`, copying shared nodes on the way.
fn assoc_in<T: Clone>(node: &mut ReferenceCounter<Node<T>>, level: usize, index: usize, value: T) {
    match ReferenceCounter::make_mut(node) {
        Node::Branch(slots) => {
            if let Some(child) = &mut slots[(index >> level) & MASK] {
                assoc_in(child, level.saturating_sub(BITS_PER_LEVEL), index, value);
            }
        }
        Node::Leaf(elements) => set_leaf_element(elements, index & MASK, value),
        Node::Empty => {}
    }
}

fn set_leaf_element<T: Clone>(elements: &mut ReferenceCounter<[T]>, position: usize, value: T) {
    if let Some(unique) = ReferenceCounter::get_mut(elements) {
        unique[position] = value;
    } else {
        let mut copied = elements.to_vec();
        copied[position] = value;
        *elements = ReferenceCounter::from(copied);
    }
}

/// Detaches the rightmost leaf of the trie and returns it.
///
/// `last_index` is the index of the last element stored in that leaf. A root
/// left without children becomes the canonical empty node, and a root whose
/// only child is slot 0 is replaced by that child.
fn pop_leaf<T: Clone>(
    root: &mut ReferenceCounter<Node<T>>,
    shift: &mut usize,
    last_index: usize,
) -> ReferenceCounter<[T]> {
    let leaf = leaf_for(root, *shift, last_index)
        .cloned()
        .unwrap_or_else(|| ReferenceCounter::from(Vec::new()));

    if pop_leaf_from(root, *shift, last_index) {
        *root = ReferenceCounter::new(Node::EMPTY);
    } else if *shift > BITS_PER_LEVEL {
        let only_child = match root.as_ref() {
            Node::Branch(slots) if slots[1].is_none() => slots[0].clone(),
            _ => None,
        };
        if let Some(child) = only_child {
            *root = child;
            *shift -= BITS_PER_LEVEL;
            tracing::trace!(shift = *shift, last_index, "vector root shrank one level");
        }
    }

    leaf
}

/// Returns `true` when `node` is left without children.
fn pop_leaf_from<T: Clone>(
    node: &mut ReferenceCounter<Node<T>>,
    level: usize,
    last_index: usize,
) -> bool {
    let position = (last_index >> level) & MASK;

    if level > BITS_PER_LEVEL {
        let slots = ReferenceCounter::make_mut(node).slots_mut();
        let child_emptied = match &mut slots[position] {
            Some(child) => pop_leaf_from(child, level - BITS_PER_LEVEL, last_index),
            None => true,
        };
        if child_emptied {
            if position == 0 {
                return true;
            }
            slots[position] = None;
        }
        false
    } else if position == 0 {
        true
    } else {
        ReferenceCounter::make_mut(node).slots_mut()[position] = None;
        false
    }
}

// =============================================================================
// PersistentVector Definition
// =============================================================================

/// A persistent (immutable) vector based on a bit-partitioned vector trie.
///
/// # Time Complexity
///
/// | Operation     | Complexity                  |
/// |---------------|-----------------------------|
/// | `new`         | O(1)                        |
/// | `get`         | O(log32 N)                  |
/// | `cons`        | O(log32 N) amortized O(1)   |
/// | `assoc_n`     | O(log32 N)                  |
/// | `pop`         | O(log32 N)                  |
/// | `size`        | O(1)                        |
/// | `seq`         | O(1) to create, O(N) to walk |
///
/// # Examples
///
/// ```rust
/// use lambars_persistent::persistent::PersistentVector;
///
/// let vector = PersistentVector::create(0..100);
/// assert_eq!(vector.size(), 100);
/// assert_eq!(vector.get(50), Ok(&50));
/// ```
#[derive(Clone)]
pub struct PersistentVector<T> {
    /// Total number of elements
    length: usize,
    /// Shift of the root level: (depth - 1) * `BITS_PER_LEVEL`
    shift: usize,
    /// Root node of the trie
    root: ReferenceCounter<Node<T>>,
    /// Tail buffer for efficient append (up to 32 elements)
    tail: ReferenceCounter<[T]>,
}

impl<T> PersistentVector<T> {
    /// Creates a new empty vector.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = PersistentVector::new();
    /// assert!(vector.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            length: 0,
            shift: BITS_PER_LEVEL,
            root: ReferenceCounter::new(Node::EMPTY),
            tail: ReferenceCounter::from(Vec::new()),
        }
    }

    /// Returns the number of elements in the vector.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns the number of elements in the vector.
    ///
    /// Same as [`len`](Self::len).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(1..=5);
    /// assert_eq!(vector.size(), 5);
    /// ```
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.length
    }

    /// Returns `true` if the vector contains no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the index of the first element held in the tail buffer.
    ///
    /// This is the largest multiple of 32 strictly below `size()`, or 0
    /// when the vector holds at most 32 elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// assert_eq!(PersistentVector::create(0..32).tail_offset(), 0);
    /// assert_eq!(PersistentVector::create(0..33).tail_offset(), 32);
    /// assert_eq!(PersistentVector::create(0..64).tail_offset(), 32);
    /// assert_eq!(PersistentVector::create(0..65).tail_offset(), 64);
    /// ```
    #[inline]
    #[must_use]
    pub const fn tail_offset(&self) -> usize {
        tail_offset_for(self.length)
    }

    /// Returns a reference to the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IndexOutOfRange`] unless `index < size()`.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::PersistentError;
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(1..=5);
    /// assert_eq!(vector.get(0), Ok(&1));
    /// assert_eq!(vector.get(4), Ok(&5));
    /// assert!(matches!(vector.get(10), Err(PersistentError::IndexOutOfRange { .. })));
    /// ```
    pub fn get(&self, index: usize) -> Result<&T, PersistentError> {
        self.array_for(index)
            .and_then(|elements| elements.get(index & MASK))
            .ok_or_else(|| PersistentError::index_out_of_range(index, self.length))
    }

    /// Returns a reference to the first element, if any.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.get(0).ok()
    }

    /// Returns a reference to the last element, if any.
    ///
    /// O(1): the last element always lives in the tail.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.tail.last()
    }

    /// Returns a one-shot enumerator over the elements in index order.
    ///
    /// The enumerator borrows this version and is unaffected by any other
    /// version derived from it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(1..=5);
    /// let collected: Vec<&i32> = vector.seq().collect();
    /// assert_eq!(collected, vec![&1, &2, &3, &4, &5]);
    /// ```
    #[must_use]
    pub fn seq(&self) -> VectorSeq<'_, T> {
        VectorSeq::new(&self.root, &self.tail, self.length)
    }

    /// Alias of [`seq`](Self::seq).
    #[must_use]
    pub fn iter(&self) -> VectorSeq<'_, T> {
        self.seq()
    }

    /// The 32-element array holding `index`: a trie leaf or the tail.
    fn array_for(&self, index: usize) -> Option<&[T]> {
        if index >= self.length {
            None
        } else if index >= self.tail_offset() {
            Some(&self.tail[..])
        } else {
            leaf_for(&self.root, self.shift, index).map(|elements| &**elements)
        }
    }

    /// Shared handle on the array holding `index`, used by owning enumerators.
    pub(crate) fn leaf_handle(&self, index: usize) -> Option<ReferenceCounter<[T]>> {
        if index >= self.length {
            None
        } else if index >= self.tail_offset() {
            Some(self.tail.clone())
        } else {
            leaf_for(&self.root, self.shift, index).cloned()
        }
    }
}

impl<T: Clone> PersistentVector<T> {
    /// Creates a vector holding the given elements in order.
    ///
    /// Equivalent to folding [`cons`](Self::cons) over the input starting
    /// from the empty vector; the intermediate versions are never published.
    ///
    /// # Complexity
    ///
    /// O(N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(vec!["a", "b", "c"]);
    /// assert_eq!(vector.size(), 3);
    /// assert_eq!(vector.get(1), Ok(&"b"));
    /// ```
    #[must_use]
    pub fn create<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut transient = TransientVector::new();
        for item in items {
            transient.conj(item);
        }
        transient.into_persistent()
    }

    /// Returns a new vector with `value` appended.
    ///
    /// # Complexity
    ///
    /// O(log32 N), amortized O(1) due to the tail buffer
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(0..32);
    /// let extended = vector.cons(32);
    ///
    /// assert_eq!(vector.size(), 32);   // Original unchanged
    /// assert_eq!(extended.size(), 33);
    /// assert_eq!(extended.get(32), Ok(&32));
    /// ```
    #[must_use]
    pub fn cons(&self, value: T) -> Self {
        if self.tail.len() < BRANCHING_FACTOR {
            let mut tail = Vec::with_capacity(self.tail.len() + 1);
            tail.extend_from_slice(&self.tail);
            tail.push(value);

            Self {
                length: self.length + 1,
                shift: self.shift,
                root: self.root.clone(),
                tail: ReferenceCounter::from(tail),
            }
        } else {
            // The full tail is shared as the new leaf, not copied.
            let mut root = self.root.clone();
            let mut shift = self.shift;
            push_leaf(&mut root, &mut shift, self.tail_offset(), self.tail.clone());

            Self {
                length: self.length + 1,
                shift,
                root,
                tail: ReferenceCounter::from(vec![value]),
            }
        }
    }

    /// Returns a new vector with the element at `index` replaced by `value`.
    ///
    /// `index == size()` appends, exactly like [`cons`](Self::cons).
    /// Only the nodes on the path to `index` are copied.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IndexOutOfRange`] if `index > size()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(1..=5);
    /// let updated = vector.assoc_n(2, 100).unwrap();
    ///
    /// assert_eq!(updated.get(2), Ok(&100));
    /// assert_eq!(vector.get(2), Ok(&3)); // Original unchanged
    ///
    /// let appended = vector.assoc_n(5, 6).unwrap();
    /// assert_eq!(appended.size(), 6);
    /// assert!(vector.assoc_n(7, 0).is_err());
    /// ```
    pub fn assoc_n(&self, index: usize, value: T) -> Result<Self, PersistentError> {
        if index == self.length {
            return Ok(self.cons(value));
        }
        if index > self.length {
            return Err(PersistentError::index_out_of_range(index, self.length));
        }

        if index >= self.tail_offset() {
            let mut tail = self.tail.to_vec();
            tail[index & MASK] = value;

            Ok(Self {
                length: self.length,
                shift: self.shift,
                root: self.root.clone(),
                tail: ReferenceCounter::from(tail),
            })
        } else {
            let mut root = self.root.clone();
            assoc_in(&mut root, self.shift, index, value);

            Ok(Self {
                length: self.length,
                shift: self.shift,
                root,
                tail: self.tail.clone(),
            })
        }
    }

    /// Returns a new vector without its last element.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] if the vector is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(1..=33);
    /// let popped = vector.pop().unwrap();
    ///
    /// assert_eq!(popped.size(), 32);
    /// assert_eq!(popped.last(), Some(&32));
    /// assert!(PersistentVector::<i32>::new().pop().is_err());
    /// ```
    pub fn pop(&self) -> Result<Self, PersistentError> {
        match self.length {
            0 => Err(PersistentError::IllegalState(
                "cannot pop an empty vector".to_string(),
            )),
            1 => Ok(Self::new()),
            _ if self.tail.len() > 1 => Ok(Self {
                length: self.length - 1,
                shift: self.shift,
                root: self.root.clone(),
                tail: ReferenceCounter::from(&self.tail[..self.tail.len() - 1]),
            }),
            _ => {
                let mut root = self.root.clone();
                let mut shift = self.shift;
                let tail = pop_leaf(&mut root, &mut shift, self.length - 2);

                Ok(Self {
                    length: self.length - 1,
                    shift,
                    root,
                    tail,
                })
            }
        }
    }

    /// Converts this vector into a transient for batch edits.
    ///
    /// Nodes still shared with other versions are copied on first write;
    /// nodes the transient owns exclusively are then edited in place.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_persistent::persistent::PersistentVector;
    ///
    /// let vector = PersistentVector::create(0..10);
    /// let mut transient = vector.clone().transient();
    /// transient.cons(10).unwrap().assoc_n(0, 100).unwrap();
    /// let edited = transient.persistent().unwrap();
    ///
    /// assert_eq!(edited.size(), 11);
    /// assert_eq!(edited.get(0), Ok(&100));
    /// assert_eq!(vector.get(0), Ok(&0));
    /// ```
    #[must_use]
    pub fn transient(self) -> TransientVector<T> {
        let mut tail = Vec::with_capacity(BRANCHING_FACTOR);
        tail.extend_from_slice(&self.tail);

        TransientVector {
            length: self.length,
            shift: self.shift,
            root: self.root,
            tail,
            edit: EditGuard::new(),
            _marker: PhantomData,
        }
    }
}

// =============================================================================
// TransientVector Definition
// =============================================================================

/// A transient (temporarily mutable) vector for efficient batch edits.
///
/// After the edits, convert it into a [`PersistentVector`] with
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
/// use lambars_persistent::PersistentError;
/// use lambars_persistent::persistent::TransientVector;
///
/// let mut transient = TransientVector::new();
/// for index in 0..100 {
///     transient.cons(index).unwrap();
/// }
/// let vector = transient.persistent().unwrap();
/// assert_eq!(vector.size(), 100);
///
/// assert!(matches!(transient.cons(100), Err(PersistentError::IllegalState(_))));
/// ```
pub struct TransientVector<T> {
    length: usize,
    shift: usize,
    root: ReferenceCounter<Node<T>>,
    tail: Vec<T>,
    edit: EditGuard,
    /// Marker to ensure `!Send` and `!Sync`.
    _marker: PhantomData<Rc<()>>,
}

static_assertions::assert_not_impl_any!(TransientVector<i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientVector<String>: Send, Sync);

impl<T> TransientVector<T> {
    /// Creates a new empty transient vector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            length: 0,
            shift: BITS_PER_LEVEL,
            root: ReferenceCounter::new(Node::EMPTY),
            tail: Vec::with_capacity(BRANCHING_FACTOR),
            edit: EditGuard::new(),
            _marker: PhantomData,
        }
    }

    /// Returns the number of elements.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the transient holds no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns a reference to the element at `index`.
    ///
    /// # Errors
    ///
    /// [`PersistentError::IllegalState`] after [`persistent`](Self::persistent),
    /// [`PersistentError::IndexOutOfRange`] unless `index < len()`.
    pub fn get(&self, index: usize) -> Result<&T, PersistentError> {
        self.edit.ensure_editable("get")?;

        let element = if index >= self.length {
            None
        } else if index >= tail_offset_for(self.length) {
            self.tail.get(index & MASK)
        } else {
            leaf_for(&self.root, self.shift, index).and_then(|elements| elements.get(index & MASK))
        };
        element.ok_or_else(|| PersistentError::index_out_of_range(index, self.length))
    }
}

impl<T: Clone> TransientVector<T> {
    /// Appends `value`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] after [`persistent`](Self::persistent).
    pub fn cons(&mut self, value: T) -> Result<&mut Self, PersistentError> {
        self.edit.ensure_editable("cons")?;
        self.conj(value);
        Ok(self)
    }

    /// Replaces the element at `index`; `index == len()` appends.
    ///
    /// # Errors
    ///
    /// [`PersistentError::IllegalState`] after [`persistent`](Self::persistent),
    /// [`PersistentError::IndexOutOfRange`] if `index > len()`.
    pub fn assoc_n(&mut self, index: usize, value: T) -> Result<&mut Self, PersistentError> {
        self.edit.ensure_editable("assoc_n")?;

        if index == self.length {
            self.conj(value);
        } else if index > self.length {
            return Err(PersistentError::index_out_of_range(index, self.length));
        } else if index >= tail_offset_for(self.length) {
            self.tail[index & MASK] = value;
        } else {
            assoc_in(&mut self.root, self.shift, index, value);
        }
        Ok(self)
    }

    /// Removes the last element.
    ///
    /// # Errors
    ///
    /// [`PersistentError::IllegalState`] if the transient is empty or was
    /// already made persistent.
    pub fn pop(&mut self) -> Result<&mut Self, PersistentError> {
        self.edit.ensure_editable("pop")?;

        match self.length {
            0 => {
                return Err(PersistentError::IllegalState(
                    "cannot pop an empty vector".to_string(),
                ));
            }
            1 => {
                self.root = ReferenceCounter::new(Node::EMPTY);
                self.shift = BITS_PER_LEVEL;
                self.tail.clear();
            }
            _ if self.tail.len() > 1 => {
                self.tail.pop();
            }
            _ => {
                let leaf = pop_leaf(&mut self.root, &mut self.shift, self.length - 2);
                self.tail.clear();
                self.tail.extend_from_slice(&leaf);
            }
        }
        self.length -= 1;
        Ok(self)
    }

    /// Converts the transient into a persistent vector and freezes the handle.
    ///
    /// # Errors
    ///
    /// Returns [`PersistentError::IllegalState`] if called twice.
    pub fn persistent(&mut self) -> Result<PersistentVector<T>, PersistentError> {
        self.edit.freeze()?;
        tracing::debug!(length = self.length, "transient vector made persistent");

        let root = mem::replace(&mut self.root, ReferenceCounter::new(Node::EMPTY));
        let shift = mem::replace(&mut self.shift, BITS_PER_LEVEL);
        Ok(PersistentVector {
            length: mem::take(&mut self.length),
            shift,
            root,
            tail: ReferenceCounter::from(mem::take(&mut self.tail)),
        })
    }

    /// Appends without checking the edit guard.
    pub(crate) fn conj(&mut self, value: T) {
        if self.tail.len() == BRANCHING_FACTOR {
            let tail_offset = tail_offset_for(self.length);
            let full = mem::replace(&mut self.tail, Vec::with_capacity(BRANCHING_FACTOR));
            push_leaf(
                &mut self.root,
                &mut self.shift,
                tail_offset,
                ReferenceCounter::from(full),
            );
        }
        self.tail.push(value);
        self.length += 1;
    }

    pub(crate) fn into_persistent(self) -> PersistentVector<T> {
        PersistentVector {
            length: self.length,
            shift: self.shift,
            root: self.root,
            tail: ReferenceCounter::from(self.tail),
        }
    }
}

impl<T> Default for TransientVector<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T> Default for PersistentVector<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FromIterator<T> for PersistentVector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::create(iter)
    }
}

impl<T: Clone> IntoIterator for PersistentVector<T> {
    type Item = T;
    type IntoIter = VectorIntoSeq<T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        VectorIntoSeq::new(self)
    }
}

impl<'a, T> IntoIterator for &'a PersistentVector<T> {
    type Item = &'a T;
    type IntoIter = VectorSeq<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.seq()
    }
}

impl<T: PartialEq> PartialEq for PersistentVector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.seq().eq(other.seq())
    }
}

impl<T: Eq> Eq for PersistentVector<T> {}

impl<T: fmt::Debug> fmt::Debug for PersistentVector<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.seq()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn range_items(start: usize, end: usize) -> Vec<String> {
        (start..end).map(|number| format!("item{number}")).collect()
    }

    fn root_slots<T>(vector: &PersistentVector<T>) -> &Slots<Node<T>> {
        match vector.root.as_ref() {
            Node::Branch(slots) => slots,
            Node::Empty | Node::Leaf(_) => panic!("root is not a branch"),
        }
    }

    fn leaf_elements<T>(node: &Node<T>) -> &[T] {
        match node {
            Node::Leaf(elements) => elements,
            Node::Empty | Node::Branch(_) => panic!("node is not a leaf"),
        }
    }

    #[rstest]
    fn test_create_up_to_32_items_keeps_root_empty() {
        for count in 0..=32 {
            let items = range_items(1, count + 1);
            let vector = PersistentVector::create(items.clone());

            assert!(vector.root.is_empty_node(), "root must be empty for {count}");
            assert_eq!(vector.tail.len(), count);
            assert_eq!(&vector.tail[..], &items[..]);
        }
    }

    #[rstest]
    fn test_create_90_items_layout() {
        let vector = PersistentVector::create(range_items(1, 91));
        let slots = root_slots(&vector);

        let first = leaf_elements(slots[0].as_deref().unwrap());
        assert_eq!(first.len(), 32);
        assert_eq!(first[0], "item1");
        assert_eq!(first[31], "item32");

        let second = leaf_elements(slots[1].as_deref().unwrap());
        assert_eq!(second.len(), 32);
        assert_eq!(second[0], "item33");
        assert_eq!(second[31], "item64");

        assert!(slots[2..].iter().all(Option::is_none));
        assert_eq!(vector.tail.len(), 26);
        assert_eq!(vector.tail[0], "item65");
        assert_eq!(vector.tail[25], "item90");
    }

    #[rstest]
    fn test_create_1057_items_grows_root_to_depth_two() {
        let vector = PersistentVector::create(range_items(1, 1058));

        assert_eq!(vector.shift, 2 * BITS_PER_LEVEL);
        let slots = root_slots(&vector);

        let Node::Branch(first_branch) = slots[0].as_deref().unwrap() else {
            panic!("slot 0 is not a branch");
        };
        assert!(first_branch.iter().all(Option::is_some));
        let first_leaf = leaf_elements(first_branch[0].as_deref().unwrap());
        assert_eq!(first_leaf[0], "item1");
        assert_eq!(first_leaf[31], "item32");

        let Node::Branch(second_branch) = slots[1].as_deref().unwrap() else {
            panic!("slot 1 is not a branch");
        };
        let only_leaf = leaf_elements(second_branch[0].as_deref().unwrap());
        assert_eq!(only_leaf[0], "item1025");
        assert!(second_branch[1].is_none());

        assert_eq!(&vector.tail[..], &["item1057".to_string()]);
    }

    #[rstest]
    fn test_tail_offset_for_33_to_200_items() {
        for size in 33..=200 {
            let vector = PersistentVector::create(range_items(0, size));
            let count = size - 1;
            let expected = count - (count % 32);

            assert_eq!(vector.tail_offset(), expected, "size {size}");
            assert_eq!(vector.tail.len(), vector.size() - expected, "size {size}");
        }
    }

    #[rstest]
    fn test_pop_across_level_boundary_shrinks_root() {
        let vector = PersistentVector::create(0..1057);
        let popped = vector.pop().unwrap();

        assert_eq!(popped.shift, BITS_PER_LEVEL);
        assert_eq!(popped.size(), 1056);
        assert_eq!(popped.tail.len(), 32);
        assert_eq!(popped.tail[0], 1024);
        assert_eq!(popped.get(1055), Ok(&1055));
        assert_eq!(vector.shift, 2 * BITS_PER_LEVEL);
    }

    #[rstest]
    fn test_pop_to_32_items_restores_empty_root() {
        let vector = PersistentVector::create(0..33);
        let popped = vector.pop().unwrap();

        assert!(popped.root.is_empty_node());
        assert_eq!(popped.tail.len(), 32);
        assert_eq!(popped.last(), Some(&31));
    }

    #[rstest]
    fn test_pop_everything_matches_fresh_vectors() {
        let mut vector = PersistentVector::create(0..2000);
        for expected_length in (0..2000).rev() {
            vector = vector.pop().unwrap();
            assert_eq!(vector.size(), expected_length);
            assert_eq!(vector.tail_offset(), tail_offset_for(expected_length));
            if expected_length > 0 {
                assert_eq!(vector.last(), Some(&(expected_length - 1)));
            }
        }
        assert!(vector.root.is_empty_node());
        assert_eq!(vector.shift, BITS_PER_LEVEL);
    }

    #[rstest]
    fn test_cons_shares_untouched_subtrees() {
        let vector = PersistentVector::create(0..96);
        let extended = vector.cons(96);

        let before = root_slots(&vector);
        let after = root_slots(&extended);
        assert!(ReferenceCounter::ptr_eq(
            before[0].as_ref().unwrap(),
            after[0].as_ref().unwrap()
        ));
        assert!(ReferenceCounter::ptr_eq(
            before[1].as_ref().unwrap(),
            after[1].as_ref().unwrap()
        ));
        assert!(before[2].is_none());
        assert!(after[2].is_some());
    }

    #[rstest]
    fn test_assoc_n_copies_only_the_path() {
        let vector = PersistentVector::create(0..2000);
        let updated = vector.assoc_n(5, 999).unwrap();

        let before = root_slots(&vector);
        let after = root_slots(&updated);
        assert!(!ReferenceCounter::ptr_eq(
            before[0].as_ref().unwrap(),
            after[0].as_ref().unwrap()
        ));
        assert!(ReferenceCounter::ptr_eq(
            before[1].as_ref().unwrap(),
            after[1].as_ref().unwrap()
        ));
        assert!(ReferenceCounter::ptr_eq(&vector.tail, &updated.tail));
        assert_eq!(vector.get(5), Ok(&5));
        assert_eq!(updated.get(5), Ok(&999));
    }

    #[rstest]
    fn test_cons_full_tail_shares_it_as_leaf() {
        let vector = PersistentVector::create(0..64);
        let extended = vector.cons(64);

        let leaf = root_slots(&extended)[1].as_deref().unwrap();
        let Node::Leaf(elements) = leaf else {
            panic!("slot 1 is not a leaf");
        };
        assert!(ReferenceCounter::ptr_eq(elements, &vector.tail));
    }

    #[rstest]
    fn test_transient_does_not_touch_source_version() {
        let vector = PersistentVector::create(0..100);
        let mut transient = vector.clone().transient();
        transient.assoc_n(3, 300).unwrap();
        transient.assoc_n(99, 9900).unwrap();
        transient.pop().unwrap();
        let edited = transient.persistent().unwrap();

        assert_eq!(vector.get(3), Ok(&3));
        assert_eq!(vector.get(99), Ok(&99));
        assert_eq!(vector.size(), 100);
        assert_eq!(edited.get(3), Ok(&300));
        assert_eq!(edited.size(), 99);
    }

    #[rstest]
    fn test_transient_pop_across_level_boundary() {
        let mut transient = PersistentVector::create(0..1057).transient();
        transient.pop().unwrap();
        let vector = transient.persistent().unwrap();

        assert_eq!(vector.shift, BITS_PER_LEVEL);
        assert_eq!(vector.size(), 1056);
        assert!(vector.seq().copied().eq(0..1056));
    }
}
