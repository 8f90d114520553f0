// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The authoritative state store of a device.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, RwLock};
use serde_json::Value;

use crate::error::{Error, panic_message};

use super::{Snapshot, StateChange};

/// Unique identifier for a state listener.
///
/// Returned by [`StateStore::on_change`] and used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

/// Type alias for state change listeners.
type Listener = Arc<dyn Fn(&StateChange) -> Result<(), Error> + Send + Sync>;

/// Type alias for the sink receiving listener failures.
type ErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

/// Holds the current [`Snapshot`] and notifies listeners on every assignment.
///
/// # Ordering
///
/// Assignments are serialized: listeners for one assignment all run before
/// the next assignment commits. A listener may itself call
/// [`assign`](Self::assign); the nested change is delivered before the
/// outer notification continues.
///
/// # Failures
///
/// A listener returning an error or panicking never undoes the assignment
/// and never stops the other listeners. The failure goes to the sink set
/// with [`on_listener_error`](Self::on_listener_error), or to the log if
/// none is set.
pub struct StateStore {
    current: RwLock<Snapshot>,
    commit: ReentrantMutex<()>,
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    error_sink: RwLock<Option<ErrorSink>>,
}

impl StateStore {
    /// Creates a store holding the empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Snapshot::empty()),
            commit: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            error_sink: RwLock::new(None),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn get(&self) -> Snapshot {
        self.current.read().clone()
    }

    /// Merges `partial` onto the current snapshot and notifies listeners.
    pub fn assign<I, K>(&self, partial: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let _commit = self.commit.lock();

        let change = {
            let mut current = self.current.write();
            let new = current.merge(partial);
            let old = std::mem::replace(&mut *current, new.clone());
            StateChange::new(new, old)
        };

        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&change))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.report(e),
                Err(panic) => self.report(Error::Listener(format!(
                    "listener panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            }
        }
    }

    /// Registers a listener for state changes.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange) -> Result<(), Error> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener.
    ///
    /// Returns `true` if the listener was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Sets the sink receiving listener failures.
    pub fn on_listener_error<F>(&self, sink: F)
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        *self.error_sink.write() = Some(Arc::new(sink));
    }

    fn report(&self, error: Error) {
        let sink = self.error_sink.read().clone();
        match sink {
            Some(sink) => sink(error),
            None => tracing::error!(error = %error, "State listener failed"),
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("fields", &self.current.read().len())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn initial_snapshot_is_empty() {
        let store = StateStore::new();
        assert!(store.get().is_empty());
    }

    #[test]
    fn assign_merges_onto_previous() {
        let store = StateStore::new();
        store.assign([("a", json!(1))]);
        store.assign([("b", json!(2))]);

        let snapshot = store.get();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a"), Some(&json!(1)));
        assert_eq!(snapshot.get("b"), Some(&json!(2)));
    }

    #[test]
    fn listener_receives_new_and_old() {
        let store = StateStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        store.on_change(move |change| {
            seen_clone.lock().push((
                change.old_snapshot().get("level").cloned(),
                change.new_snapshot().get("level").cloned(),
            ));
            Ok(())
        });

        store.assign([("level", json!(10))]);
        store.assign([("level", json!(20))]);

        assert_eq!(
            *seen.lock(),
            vec![(None, Some(json!(10))), (Some(json!(10)), Some(json!(20)))]
        );
    }

    #[test]
    fn failing_listener_does_not_roll_back_or_block_others() {
        let store = StateStore::new();
        let errors = Arc::new(AtomicU32::new(0));
        let errors_clone = Arc::clone(&errors);
        store.on_listener_error(move |_| {
            errors_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.on_change(|_| Err(Error::Listener("nope".to_string())));
        store.on_change(|_| panic!("listener blew up"));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        store.on_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        store.assign([("power", json!("on"))]);

        assert_eq!(store.get().get("power"), Some(&json!("on")));
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = StateStore::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let id = store.on_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        store.assign([("x", json!(1))]);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.assign([("x", json!(2))]);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn listener_may_assign_reentrantly() {
        let store = Arc::new(StateStore::new());
        let weak = Arc::downgrade(&store);
        store.on_change(move |change| {
            if change.new_snapshot().get("mode") == Some(&json!("off"))
                && let Some(store) = weak.upgrade()
                && store.get().get("fan") != Some(&json!("off"))
            {
                store.assign([("fan", json!("off"))]);
            }
            Ok(())
        });

        store.assign([("mode", json!("off"))]);

        assert_eq!(store.get().get("fan"), Some(&json!("off")));
    }

    #[test]
    fn listener_ids_are_unique() {
        let store = StateStore::new();
        let a = store.on_change(|_| Ok(()));
        let b = store.on_change(|_| Ok(()));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), format!("Listener({})", a.value()));
    }
}
