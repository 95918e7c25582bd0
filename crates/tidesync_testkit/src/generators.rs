//! Property-based test generators using proptest.

use proptest::prelude::*;

/// A remote collection shape: length and page size.
#[derive(Debug, Clone, Copy)]
pub struct CollectionShape {
    /// Number of remote items.
    pub total: u64,
    /// Page size of the session.
    pub page_size: usize,
    /// Number of leading items already cached.
    pub cached: u64,
}

/// Strategy for generating valid collection keys.
pub fn collection_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for collections spanning a few pages, some partly cached.
pub fn collection_shape_strategy() -> impl Strategy<Value = CollectionShape> {
    (0u64..60, 1usize..12).prop_flat_map(|(total, page_size)| {
        (0..=total).prop_map(move |cached| CollectionShape {
            total,
            page_size,
            cached,
        })
    })
}

/// Strategy for a script of remote failures, one entry per reconciliation
/// attempt.
pub fn failure_script_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(prop::bool::weighted(0.3), 0..16)
}
