// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Immutable state snapshots.

use std::sync::Arc;

use serde_json::Value;

/// Field map backing a snapshot. Iterates in insertion order.
pub type Fields = serde_json::Map<String, Value>;

/// Identifier generated by the storage layer. Never republished.
pub const RESERVED_ID_FIELD: &str = "_id";

/// A point-in-time copy of a device's state.
///
/// Snapshots are never mutated: merging produces a new snapshot and leaves
/// the old one untouched, so a snapshot handed out to a caller cannot be
/// torn by a concurrent update. Cloning is cheap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot(Arc<Fields>);

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns `true` if the field is present.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the snapshot holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the underlying field map.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// Returns an owned copy of the fields.
    #[must_use]
    pub fn to_fields(&self) -> Fields {
        (*self.0).clone()
    }

    /// Shallow-merges `partial` onto this snapshot, later values winning.
    ///
    /// Fields absent from `partial` are preserved. Existing fields keep
    /// their position; new fields are appended.
    #[must_use]
    pub fn merge<I, K>(&self, partial: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut fields = self.to_fields();
        for (key, value) in partial {
            fields.insert(key.into(), value);
        }
        Self(Arc::new(fields))
    }

    /// Returns the fields of `self` whose value differs from `old`.
    ///
    /// A field missing from `old` counts as changed. The reserved
    /// [`RESERVED_ID_FIELD`] is never reported. Order follows `self`.
    ///
    /// Numbers compare by value, so `72` and `72.0` are the same reading.
    #[must_use]
    pub fn changed_since<'a>(&'a self, old: &Snapshot) -> Vec<(&'a str, &'a Value)> {
        self.0
            .iter()
            .filter(|(field, _)| field.as_str() != RESERVED_ID_FIELD)
            .filter(|(field, value)| !old.get(field).is_some_and(|previous| same_value(previous, value)))
            .map(|(field, value)| (field.as_str(), value))
            .collect()
    }
}

/// Structural equality with numbers compared by value.
#[allow(clippy::float_cmp)]
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, x)| y.get(key).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

impl From<Fields> for Snapshot {
    fn from(fields: Fields) -> Self {
        Self(Arc::new(fields))
    }
}

impl serde::Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_preserves_untouched_fields() {
        let first = Snapshot::empty().merge([("a", json!(1))]);
        let second = first.merge([("b", json!(2))]);

        assert_eq!(second.get("a"), Some(&json!(1)));
        assert_eq!(second.get("b"), Some(&json!(2)));
        assert_eq!(first.len(), 1, "merge must not mutate the source snapshot");
    }

    #[test]
    fn merge_keeps_insertion_order() {
        let snapshot = Snapshot::empty()
            .merge([("z", json!(1)), ("a", json!(2))])
            .merge([("m", json!(3)), ("z", json!(4))]);

        let keys: Vec<&str> = snapshot.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn changed_since_uses_value_equality() {
        let old = Snapshot::empty().merge([("mode", json!({"fan": "auto"})), ("setpoint", json!(70))]);
        let new = old.merge([("mode", json!({"fan": "auto"})), ("setpoint", json!(71))]);

        let changed: Vec<&str> = new.changed_since(&old).into_iter().map(|(k, _)| k).collect();
        assert_eq!(changed, vec!["setpoint"]);
    }

    #[test]
    fn integer_and_float_of_same_value_are_unchanged() {
        let old = Snapshot::empty().merge([
            ("temperature", json!(72)),
            ("zones", json!([{"setpoint": 68}])),
            ("offset", json!(-2)),
        ]);
        let new = old.merge([
            ("temperature", json!(72.0)),
            ("zones", json!([{"setpoint": 68.0}])),
            ("offset", json!(-2.5)),
        ]);

        let changed: Vec<&str> = new.changed_since(&old).into_iter().map(|(k, _)| k).collect();
        assert_eq!(changed, vec!["offset"]);
    }

    #[test]
    fn numbers_never_equal_strings() {
        let old = Snapshot::empty().merge([("volume", json!(30))]);
        let new = old.merge([("volume", json!("30"))]);

        assert_eq!(new.changed_since(&old), vec![("volume", &json!("30"))]);
    }

    #[test]
    fn changed_since_counts_new_fields_and_skips_reserved() {
        let new = Snapshot::empty().merge([("_id", json!("5f0c")), ("power", json!("on"))]);

        let changed = new.changed_since(&Snapshot::empty());
        assert_eq!(changed, vec![("power", &json!("on"))]);
    }

    #[test]
    fn serializes_as_plain_object() {
        let snapshot = Snapshot::empty().merge([("volume", json!(-35.5))]);
        assert_eq!(serde_json::to_string(&snapshot).unwrap(), r#"{"volume":-35.5}"#);
    }
}
