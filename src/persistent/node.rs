//! Primitives shared by the vector trie and the HAMT.
//!
//! Both engines are 32-way tries. A node's child is selected by a 5-bit
//! chunk of an index (vector) or of a hash (map). Nodes are immutable once
//! they are reachable from a published version: every update goes through
//! [`ReferenceCounter::make_mut`](super::ReferenceCounter), which clones a
//! node that is shared with another version before modifying it. Only a
//! node held exclusively by a transient handle is modified in place.

use super::ReferenceCounter;
use crate::error::PersistentError;

// =============================================================================
// Constants
// =============================================================================

/// Branching factor (2^5 = 32)
pub(crate) const BRANCHING_FACTOR: usize = 32;

/// Bits consumed per trie level
pub(crate) const BITS_PER_LEVEL: usize = 5;

/// Bit mask for extracting the slot index within a node
pub(crate) const MASK: usize = BRANCHING_FACTOR - 1;

/// Width of the hashes the HAMT partitions on
pub(crate) const HASH_BITS: usize = 32;

/// A full 32-slot child array. `None` marks an absent slot.
pub(crate) type Slots<N> = [Option<ReferenceCounter<N>>; BRANCHING_FACTOR];

/// Creates a child array with every slot absent.
pub(crate) fn empty_slots<N>() -> Slots<N> {
    std::array::from_fn(|_| None)
}

// =============================================================================
// Hash chunking
// =============================================================================

/// Extracts the 5-bit chunk of `hash` used at `shift`.
///
/// Returns 0 once every bit of the hash has been consumed.
#[inline]
pub(crate) const fn chunk(hash: u32, shift: usize) -> usize {
    if shift >= HASH_BITS {
        0
    } else {
        ((hash >> shift) as usize) & MASK
    }
}

/// The bitmap bit selected by `hash` at `shift`.
#[inline]
pub(crate) const fn bit_position(hash: u32, shift: usize) -> u32 {
    1u32 << chunk(hash, shift)
}

/// Offset in a compacted array of the slot for `bit`: the number of
/// occupied slots below it.
#[inline]
pub(crate) const fn sparse_index(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

// =============================================================================
// Edit guard
// =============================================================================

/// Liveness flag of a transient handle.
///
/// A transient starts editable. Converting it back into a persistent
/// version freezes it, after which every operation on the handle fails
/// with [`PersistentError::IllegalState`].
#[derive(Debug)]
pub(crate) struct EditGuard {
    editable: bool,
}

impl EditGuard {
    pub(crate) const fn new() -> Self {
        Self { editable: true }
    }

    /// Fails unless the handle is still editable.
    pub(crate) fn ensure_editable(&self, operation: &str) -> Result<(), PersistentError> {
        if self.editable {
            Ok(())
        } else {
            Err(PersistentError::IllegalState(format!(
                "transient used after persistent: cannot {operation}"
            )))
        }
    }

    /// Freezes the handle, failing if it was already frozen.
    pub(crate) fn freeze(&mut self) -> Result<(), PersistentError> {
        self.ensure_editable("persistent")?;
        self.editable = false;
        Ok(())
    }
}
