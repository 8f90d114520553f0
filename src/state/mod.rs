// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state management.
//!
//! The [`StateStore`] holds the authoritative [`Snapshot`] of a device. Each
//! assignment shallow-merges a partial update onto the previous snapshot,
//! swaps in the result and notifies listeners with a [`StateChange`] that
//! carries both snapshots.
//!
//! # Examples
//!
//! ```
//! use mqtt_shadow::state::StateStore;
//! use serde_json::json;
//!
//! let store = StateStore::new();
//! store.assign([("a", json!(1))]);
//! store.assign([("b", json!(2))]);
//!
//! let snapshot = store.get();
//! assert_eq!(snapshot.get("a"), Some(&json!(1)));
//! assert_eq!(snapshot.get("b"), Some(&json!(2)));
//! ```

mod snapshot;
mod state_change;
mod store;

pub use snapshot::{Fields, RESERVED_ID_FIELD, Snapshot};
pub use state_change::StateChange;
pub use store::{ListenerId, StateStore};
