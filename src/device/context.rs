// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use serde_json::Value;

use crate::alert::Alerts;
use crate::bus::Publish;
use crate::error::ProtocolError;
use crate::state::{Snapshot, StateStore};
use crate::status::StatusPublisher;
use crate::topics::Topics;

use super::ShutdownHandle;

/// What a command handler can reach of its device.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct DeviceContext {
    store: Arc<StateStore>,
    alerts: Alerts,
    status: StatusPublisher,
    shutdown: ShutdownHandle,
    topics: Topics,
    publisher: Arc<dyn Publish>,
    config: Arc<Value>,
}

impl DeviceContext {
    pub(crate) fn new(
        store: Arc<StateStore>,
        alerts: Alerts,
        status: StatusPublisher,
        shutdown: ShutdownHandle,
        topics: Topics,
        publisher: Arc<dyn Publish>,
        config: Value,
    ) -> Self {
        Self {
            store,
            alerts,
            status,
            shutdown,
            topics,
            publisher,
            config: Arc::new(config),
        }
    }

    /// Returns a point-in-time copy of the device state.
    #[must_use]
    pub fn state(&self) -> Snapshot {
        self.store.get()
    }

    /// Merges `partial` into the device state.
    ///
    /// Changed fields are queued for publishing. The run loop waits for them
    /// to go out before routing the next message.
    pub fn set_state<I, K>(&self, partial: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.store.assign(partial);
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Returns the alert handle.
    #[must_use]
    pub fn alerts(&self) -> &Alerts {
        &self.alerts
    }

    /// Returns the status publisher.
    #[must_use]
    pub fn status(&self) -> &StatusPublisher {
        &self.status
    }

    /// Returns the topic namespace.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Returns the `"config"` settings document read at startup.
    ///
    /// `Value::Null` when the settings store had none.
    #[must_use]
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Publishes a raw message on the bus.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the request.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, retain: bool) -> Result<(), ProtocolError> {
        self.publisher.publish(topic, payload.into(), retain).await
    }

    /// Requests a normal exit once pending alerts are flushed.
    pub fn exit(&self, message: impl Into<String>) {
        self.shutdown.exit(message);
    }

    /// Requests an error exit once pending alerts are flushed.
    pub fn abort(&self, message: impl Into<String>) {
        self.shutdown.abort(message);
    }

    /// Returns a handle that can request shutdown from anywhere.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("topic", &self.topics.root())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
