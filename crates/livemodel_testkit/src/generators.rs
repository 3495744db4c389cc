//! Property-based test generators using proptest.
//!
//! Strategies produce values that fit the test schema in
//! [`fixtures`](crate::fixtures), so generated edits can be saved.

use livemodel_codec::Value;
use livemodel_core::{CoreResult, Instance, Key};
use proptest::prelude::*;

/// Strategy for person keys. Small, so runs revisit the same rows.
pub fn person_key_strategy() -> impl Strategy<Value = Key> {
    (1i64..64).prop_map(Key::Integer)
}

/// Strategy for text keys.
pub fn text_key_strategy() -> impl Strategy<Value = Key> {
    prop::string::string_regex("[a-z0-9]{1,16}")
        .expect("Invalid regex")
        .prop_map(Key::Text)
}

/// Strategy for names, including the empty name.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z ]{0,24}").expect("Invalid regex")
}

/// Strategy for scalar values as they come out of a row.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e6f64..1.0e6).prop_map(Value::Real),
        name_strategy().prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ]
}

/// Strategy for structured values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,8}", inner), 0..4).prop_map(|pairs| {
                Value::map(
                    pairs
                        .into_iter()
                        .map(|(k, v)| (Value::Text(k), v))
                        .collect(),
                )
            }),
        ]
    })
}

/// A single edit to a `person` instance.
#[derive(Debug, Clone, PartialEq)]
pub enum PersonEdit {
    /// Set `name`.
    Name(String),
    /// Set `age`; `None` stores NULL.
    Age(Option<i64>),
    /// Set `last_seen`.
    LastSeen(i64),
}

impl PersonEdit {
    /// Field the edit touches.
    pub fn field(&self) -> &'static str {
        match self {
            PersonEdit::Name(_) => "name",
            PersonEdit::Age(_) => "age",
            PersonEdit::LastSeen(_) => "last_seen",
        }
    }

    /// The value the edit writes.
    pub fn value(&self) -> Value {
        match self {
            PersonEdit::Name(name) => Value::Text(name.clone()),
            PersonEdit::Age(age) => age.map_or(Value::Null, Value::Integer),
            PersonEdit::LastSeen(at) => Value::Integer(*at),
        }
    }

    /// Applies the edit to an instance.
    ///
    /// # Errors
    ///
    /// Fails if the instance is deleted.
    pub fn apply(&self, instance: &Instance) -> CoreResult<()> {
        instance.set(self.field(), self.value())
    }
}

/// Strategy for a single person edit.
pub fn person_edit_strategy() -> impl Strategy<Value = PersonEdit> {
    prop_oneof![
        name_strategy().prop_map(PersonEdit::Name),
        prop::option::of(0i64..120).prop_map(PersonEdit::Age),
        (0i64..2_000_000_000).prop_map(PersonEdit::LastSeen),
    ]
}

/// Strategy for a sequence of person edits.
pub fn person_edits_strategy(max: usize) -> impl Strategy<Value = Vec<PersonEdit>> {
    prop::collection::vec(person_edit_strategy(), 0..max)
}
