//! Property-based tests for PersistentVector laws.
//!
//! Each law is checked against a standard `Vec` model applying the same
//! operations.

use lambars_persistent::persistent::PersistentVector;
use proptest::prelude::*;

// =============================================================================
// Operations
// =============================================================================

#[derive(Debug, Clone)]
enum Operation {
    Cons(i32),
    AssocN(usize, i32),
    Pop,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => any::<i32>().prop_map(Operation::Cons),
        2 => (any::<usize>(), any::<i32>()).prop_map(|(index, value)| Operation::AssocN(index, value)),
        1 => Just(Operation::Pop),
    ]
}

// =============================================================================
// Basic Laws
// =============================================================================

proptest! {
    /// Get-Assoc Law: an assigned element is read back
    #[test]
    fn prop_get_assoc_law(
        elements in prop::collection::vec(any::<i32>(), 1..200),
        seed in any::<usize>(),
        value in any::<i32>()
    ) {
        let vector = PersistentVector::create(elements.clone());
        let index = seed % elements.len();
        let updated = vector.assoc_n(index, value).unwrap();

        prop_assert_eq!(updated.get(index), Ok(&value));
    }

    /// Get-Assoc-Other Law: assoc_n leaves every other index alone
    #[test]
    fn prop_get_assoc_other_law(
        elements in prop::collection::vec(any::<i32>(), 2..200),
        seed in any::<usize>()
    ) {
        let vector = PersistentVector::create(elements.clone());
        let index = seed % elements.len();
        let updated = vector.assoc_n(index, 0).unwrap();

        for (other, element) in elements.iter().enumerate() {
            if other != index {
                prop_assert_eq!(updated.get(other), Ok(element));
            }
        }
    }

    /// Cons-Pop Law: pop undoes cons
    #[test]
    fn prop_cons_pop_law(
        elements in prop::collection::vec(any::<i32>(), 0..1200),
        value in any::<i32>()
    ) {
        let vector = PersistentVector::create(elements);
        let round_trip = vector.cons(value).pop().unwrap();

        prop_assert_eq!(&round_trip, &vector);
        prop_assert_eq!(round_trip.tail_offset(), vector.tail_offset());
    }

    /// Size Law: size equals the number of elements enumerated
    #[test]
    fn prop_size_law(elements in prop::collection::vec(any::<i32>(), 0..1200)) {
        let vector = PersistentVector::create(elements.clone());

        prop_assert_eq!(vector.size(), elements.len());
        prop_assert_eq!(vector.seq().count(), elements.len());
        prop_assert!(vector.seq().eq(elements.iter()));
    }

    /// Tail Offset Law: the tail offset is the last multiple of 32 below the size
    #[test]
    fn prop_tail_offset_law(size in 0usize..3000) {
        let vector = PersistentVector::create(0..size);
        let expected = if size <= 32 { 0 } else { (size - 1) / 32 * 32 };

        prop_assert_eq!(vector.tail_offset(), expected);
    }
}

// =============================================================================
// Model-Based Laws
// =============================================================================

proptest! {
    /// Any sequence of operations agrees with a Vec model, and every
    /// intermediate version stays unchanged.
    #[test]
    fn prop_operations_match_vec_model(
        initial in prop::collection::vec(any::<i32>(), 0..100),
        operations in prop::collection::vec(operation_strategy(), 0..200)
    ) {
        let mut model = initial.clone();
        let mut vector = PersistentVector::create(initial);
        let mut history = vec![(vector.clone(), model.clone())];

        for operation in operations {
            match operation {
                Operation::Cons(value) => {
                    vector = vector.cons(value);
                    model.push(value);
                }
                Operation::AssocN(seed, value) => {
                    let index = seed % (model.len() + 1);
                    vector = vector.assoc_n(index, value).unwrap();
                    if index == model.len() {
                        model.push(value);
                    } else {
                        model[index] = value;
                    }
                }
                Operation::Pop => {
                    if model.pop().is_some() {
                        vector = vector.pop().unwrap();
                    } else {
                        prop_assert!(vector.pop().is_err());
                    }
                }
            }
            history.push((vector.clone(), model.clone()));
        }

        for (version, expected) in &history {
            prop_assert_eq!(version.size(), expected.len());
            prop_assert!(version.seq().eq(expected.iter()));
        }
    }

    /// A transient applying the same edits yields the same vector
    #[test]
    fn prop_transient_matches_persistent(
        initial in prop::collection::vec(any::<i32>(), 0..100),
        operations in prop::collection::vec(operation_strategy(), 0..200)
    ) {
        let expected_source = initial.clone();
        let source = PersistentVector::create(initial);
        let mut persistent = source.clone();
        let mut transient = source.clone().transient();

        for operation in operations {
            match operation {
                Operation::Cons(value) => {
                    persistent = persistent.cons(value);
                    transient.cons(value).unwrap();
                }
                Operation::AssocN(seed, value) => {
                    let index = seed % (persistent.size() + 1);
                    persistent = persistent.assoc_n(index, value).unwrap();
                    transient.assoc_n(index, value).unwrap();
                }
                Operation::Pop => {
                    if persistent.is_empty() {
                        prop_assert!(transient.pop().is_err());
                    } else {
                        persistent = persistent.pop().unwrap();
                        transient.pop().unwrap();
                    }
                }
            }
        }

        let frozen = transient.persistent().unwrap();
        prop_assert_eq!(frozen, persistent);
        prop_assert!(source.seq().eq(expected_source.iter()));
    }
}
