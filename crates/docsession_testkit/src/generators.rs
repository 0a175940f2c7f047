//! Property-based test generators using proptest.

use crate::fixtures::Item;
use docsession_codec::{Document, Value};
use proptest::prelude::*;

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        "[a-z ]{0,12}".prop_map(Value::Text),
    ]
}

/// Strategy for nested values a few levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for documents with short field names.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for unsaved items.
pub fn item_strategy() -> impl Strategy<Value = Item> {
    (
        "[a-z]{1,10}",
        -1000i64..1000,
        prop::collection::vec("[a-z]{1,5}", 0..4),
    )
        .prop_map(|(name, quantity, tags)| Item {
            id: None,
            name,
            quantity,
            tags,
        })
}

/// A single edit to apply to an item.
#[derive(Debug, Clone)]
pub enum ItemEdit {
    /// Replace the name.
    Rename(String),
    /// Replace the quantity.
    SetQuantity(i64),
    /// Append a tag.
    AddTag(String),
    /// Reverse the tag list.
    ReverseTags,
}

impl ItemEdit {
    /// Applies the edit in place.
    pub fn apply(&self, item: &mut Item) {
        match self {
            ItemEdit::Rename(name) => item.name = name.clone(),
            ItemEdit::SetQuantity(quantity) => item.quantity = *quantity,
            ItemEdit::AddTag(tag) => item.tags.push(tag.clone()),
            ItemEdit::ReverseTags => item.tags.reverse(),
        }
    }
}

/// Strategy for item edits.
pub fn item_edit_strategy() -> impl Strategy<Value = ItemEdit> {
    prop_oneof![
        "[a-z]{1,10}".prop_map(ItemEdit::Rename),
        (-1000i64..1000).prop_map(ItemEdit::SetQuantity),
        "[a-z]{1,5}".prop_map(ItemEdit::AddTag),
        Just(ItemEdit::ReverseTags),
    ]
}
