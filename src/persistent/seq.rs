//! One-shot forward enumerators over a collection version.
//!
//! An enumerator captures the version it was created from. Versions derived
//! afterwards never affect it, and several enumerators may walk the same
//! version independently.

use std::iter::FusedIterator;
use std::slice;

use smallvec::SmallVec;

use super::ReferenceCounter;
use super::hashmap::{Node as MapNode, Slot};
use super::node::MASK;
use super::vector::{Node as VectorNode, PersistentVector};

// =============================================================================
// Vector Enumerators
// =============================================================================

/// Borrowing enumerator over a [`PersistentVector`], in index order.
///
/// Walks the trie leaves depth-first from the left, then the tail.
///
/// # Examples
///
/// ```rust
/// use lambars_persistent::persistent::PersistentVector;
///
/// let vector = PersistentVector::create(0..100);
/// let mut seq = vector.seq();
/// assert_eq!(seq.len(), 100);
/// assert_eq!(seq.next(), Some(&0));
/// assert_eq!(seq.len(), 99);
/// ```
pub struct VectorSeq<'a, T> {
    /// Branches still being walked, innermost last
    stack: SmallVec<[slice::Iter<'a, Option<ReferenceCounter<VectorNode<T>>>>; 8]>,
    /// Remaining elements of the current leaf
    current: slice::Iter<'a, T>,
    /// The tail, until it has been reached
    tail: Option<&'a [T]>,
    remaining: usize,
}

impl<'a, T> VectorSeq<'a, T> {
    pub(crate) fn new(root: &'a VectorNode<T>, tail: &'a [T], length: usize) -> Self {
        let mut stack = SmallVec::new();
        if let VectorNode::Branch(slots) = root {
            stack.push(slots.iter());
        }

        Self {
            stack,
            current: <&[T]>::default().iter(),
            tail: Some(tail),
            remaining: length,
        }
    }

    fn next_leaf(&mut self) -> Option<&'a [T]> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(Some(child)) => match child.as_ref() {
                    VectorNode::Branch(slots) => self.stack.push(slots.iter()),
                    VectorNode::Leaf(elements) => return Some(&**elements),
                    VectorNode::Empty => {}
                },
                Some(None) => {}
                None => {
                    self.stack.pop();
                }
            }
        }
        self.tail.take()
    }
}

impl<'a, T> Iterator for VectorSeq<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(element) = self.current.next() {
                self.remaining = self.remaining.saturating_sub(1);
                return Some(element);
            }
            self.current = self.next_leaf()?.iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for VectorSeq<'_, T> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl<T> FusedIterator for VectorSeq<'_, T> {}

/// Owning enumerator over a [`PersistentVector`], yielding cloned elements.
///
/// Holds the vector itself, so it outlives the binding it was created from.
pub struct VectorIntoSeq<T> {
    vector: PersistentVector<T>,
    index: usize,
    /// The 32-element array holding `index`
    current: Option<ReferenceCounter<[T]>>,
}

impl<T> VectorIntoSeq<T> {
    pub(crate) const fn new(vector: PersistentVector<T>) -> Self {
        Self {
            vector,
            index: 0,
            current: None,
        }
    }
}

impl<T: Clone> Iterator for VectorIntoSeq<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.vector.len() {
            return None;
        }
        if self.index & MASK == 0 || self.current.is_none() {
            self.current = self.vector.leaf_handle(self.index);
        }

        let element = self.current.as_ref()?.get(self.index & MASK).cloned();
        self.index += 1;
        element
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.vector.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl<T: Clone> ExactSizeIterator for VectorIntoSeq<T> {}

impl<T: Clone> FusedIterator for VectorIntoSeq<T> {}

// =============================================================================
// Map Enumerator
// =============================================================================

enum Frame<'a, K, V> {
    Bitmap(slice::Iter<'a, Slot<K, V>>),
    Array(slice::Iter<'a, Option<ReferenceCounter<MapNode<K, V>>>>),
    Collision(slice::Iter<'a, (K, V)>),
}

/// Borrowing enumerator over a [`PersistentHashMap`](super::PersistentHashMap).
///
/// Yields `(Some(&key), &value)` for hashed keys; the absent-key entry, if
/// present, comes first as `(None, &value)`. Hashed entries follow trie
/// order, which is stable for a given version.
pub struct MapSeq<'a, K, V> {
    null_entry: Option<&'a V>,
    stack: SmallVec<[Frame<'a, K, V>; 8]>,
    remaining: usize,
}

impl<'a, K, V> MapSeq<'a, K, V> {
    pub(crate) fn new(
        root: Option<&'a MapNode<K, V>>,
        null_entry: Option<&'a V>,
        length: usize,
    ) -> Self {
        let mut seq = Self {
            null_entry,
            stack: SmallVec::new(),
            remaining: length,
        };
        if let Some(root) = root {
            seq.push_node(root);
        }
        seq
    }

    fn push_node(&mut self, node: &'a MapNode<K, V>) {
        let frame = match node {
            MapNode::BitmapIndexed { slots, .. } => Frame::Bitmap(slots.iter()),
            MapNode::Array { children, .. } => Frame::Array(children.iter()),
            MapNode::HashCollision { entries, .. } => Frame::Collision(entries.iter()),
        };
        self.stack.push(frame);
    }
}

impl<'a, K, V> Iterator for MapSeq<'a, K, V> {
    type Item = (Option<&'a K>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(value) = self.null_entry.take() {
            self.remaining = self.remaining.saturating_sub(1);
            return Some((None, value));
        }

        loop {
            let child = match self.stack.last_mut()? {
                Frame::Bitmap(slots) => match slots.next() {
                    Some(Slot::Entry(key, value)) => {
                        self.remaining = self.remaining.saturating_sub(1);
                        return Some((Some(key), value));
                    }
                    Some(Slot::Child(child)) => Some(child),
                    None => None,
                },
                Frame::Array(children) => match children.next() {
                    Some(Some(child)) => Some(child),
                    Some(None) => continue,
                    None => None,
                },
                Frame::Collision(entries) => match entries.next() {
                    Some((key, value)) => {
                        self.remaining = self.remaining.saturating_sub(1);
                        return Some((Some(key), value));
                    }
                    None => None,
                },
            };

            match child {
                Some(child) => self.push_node(child),
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for MapSeq<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl<K, V> FusedIterator for MapSeq<'_, K, V> {}

// =============================================================================
// Tests
// =============================================================================
