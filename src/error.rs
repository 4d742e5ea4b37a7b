//! Error types for persistent collections.
//!
//! Every fallible operation in this crate reports a [`PersistentError`].
//! A failed call never touches the version it was invoked on: it either
//! returns a complete new version or leaves everything as it was.

use thiserror::Error;

/// Errors raised by persistent collections and their transient handles.
///
/// # Examples
///
/// ```rust
/// use lambars_persistent::PersistentError;
/// use lambars_persistent::persistent::PersistentVector;
///
/// let vector: PersistentVector<i32> = PersistentVector::create(0..3);
/// assert_eq!(
///     vector.get(3),
///     Err(PersistentError::IndexOutOfRange { index: 3, length: 3 })
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistentError {
    /// An index lies outside the range accepted by the operation.
    #[error("index {index} out of range for length {length}")]
    IndexOutOfRange {
        /// The rejected index.
        index: usize,
        /// The length of the collection at the time of the call.
        length: usize,
    },

    /// The input to a constructor is malformed.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The operation is not allowed in the current state of the value.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl PersistentError {
    pub(crate) const fn index_out_of_range(index: usize, length: usize) -> Self {
        Self::IndexOutOfRange { index, length }
    }
}
