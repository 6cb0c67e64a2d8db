//! Proptest strategies for identifiers and retry settings

#![allow(dead_code)]

use proptest::prelude::*;

/// Strings that are valid task ids
pub fn task_id_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,64}"
}

/// Free-form user task ids, including separators that must be stripped
pub fn raw_task_id_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ./\\\\:_-]{0,48}"
}

/// Backoff base and cap in seconds, with the cap never below the base
pub fn backoff_strategy() -> impl Strategy<Value = (u64, u64)> {
    (1u64..600).prop_flat_map(|base| (Just(base), base..base * 64))
}

/// Adjustment file names, possibly with PHI-looking originals
pub fn adjustment_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,12}\\.dat", 0..12)
}
