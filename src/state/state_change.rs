// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! State change notifications.

use serde_json::Value;

use super::Snapshot;

/// A committed state transition, delivered to every state listener.
///
/// The new snapshot is already stored by the time listeners see the change.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    new: Snapshot,
    old: Snapshot,
}

impl StateChange {
    /// Creates a change from the new and the previous snapshot.
    #[must_use]
    pub fn new(new: Snapshot, old: Snapshot) -> Self {
        Self { new, old }
    }

    /// The snapshot that is now current.
    #[must_use]
    pub fn new_snapshot(&self) -> &Snapshot {
        &self.new
    }

    /// The snapshot that was replaced.
    #[must_use]
    pub fn old_snapshot(&self) -> &Snapshot {
        &self.old
    }

    /// Fields whose value differs between the two snapshots.
    ///
    /// See [`Snapshot::changed_since`].
    #[must_use]
    pub fn changed_fields(&self) -> Vec<(&str, &Value)> {
        self.new.changed_since(&self.old)
    }

    /// Returns `true` if no publishable field changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reassigning_same_value_is_noop() {
        let old = Snapshot::empty().merge([("input", json!("hdmi1"))]);
        let new = old.merge([("input", json!("hdmi1"))]);

        assert!(StateChange::new(new, old).is_noop());
    }

    #[test]
    fn changed_fields_follow_new_snapshot() {
        let old = Snapshot::empty().merge([("temperature", json!(72))]);
        let new = old.merge([("temperature", json!(74)), ("humidity", json!(40))]);
        let change = StateChange::new(new, old);

        assert_eq!(
            change.changed_fields(),
            vec![("temperature", &json!(74)), ("humidity", &json!(40))]
        );
        assert_eq!(change.old_snapshot().get("temperature"), Some(&json!(72)));
    }
}
