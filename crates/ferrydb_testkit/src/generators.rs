//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating valid model names.
pub fn model_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for generating distinct model names.
pub fn model_names_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(model_name_strategy(), 0..=max)
        .prop_map(|names| names.into_iter().collect())
}

/// Strategy for generating record versions.
pub fn version_strategy() -> impl Strategy<Value = u64> {
    1u64..1_000
}

/// Strategy for generating a linear chain of version labels.
pub fn version_chain_strategy(max_len: usize) -> impl Strategy<Value = Vec<String>> {
    (1..=max_len).prop_map(|len| (0..=len).map(|i| format!("v{i}")).collect())
}

/// Strategy for generating raw remote `Post` items.
///
/// Ids are drawn from a small pool so that versions of the same record
/// collide.
pub fn raw_post_strategy() -> impl Strategy<Value = Value> {
    (0u8..8, version_strategy(), "[a-z ]{0,24}", any::<bool>()).prop_map(
        |(id, version, title, deleted)| {
            json!({
                "id": format!("p{id}"),
                "title": title,
                "_version": version,
                "_lastChangedAt": 1_700_000_000_000_i64,
                "_deleted": deleted,
            })
        },
    )
}

/// Strategy for generating a page of raw items, some malformed.
pub fn raw_page_strategy(max_items: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(
        prop_oneof![
            4 => raw_post_strategy(),
            1 => Just(json!({"title": "missing id", "_version": 1, "_lastChangedAt": 1})),
        ],
        0..=max_items,
    )
}

/// Strategy for generating a report order: every index in `0..n` at least
/// once, plus repeats, shuffled.
pub fn report_order_strategy(n: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..n.max(1), 0..=2 * n)
        .prop_map(move |mut order| {
            order.extend(0..n);
            order
        })
        .prop_shuffle()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn chains_are_linear(chain in version_chain_strategy(6)) {
            prop_assert!(chain.len() >= 2);
            prop_assert_eq!(&chain[0], "v0");
        }

        #[test]
        fn report_orders_cover_every_model(order in report_order_strategy(5)) {
            for index in 0..5 {
                prop_assert!(order.contains(&index));
            }
        }
    }
}
