// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Controller-side view of a remote shadow.
//!
//! A [`ShadowMirror`] is the other end of a [`Device`](crate::Device): it
//! subscribes to `R/status/#`, folds every status message into a local
//! [`StateStore`], and sends commands to `R/set/<key>`.
//!
//! ```text
//! R/status/<field> ──▶ decode ──▶ map_value ──▶ StateStore ──▶ listeners
//! set(key, value)  ──▶ R/set/<key>
//! ```
//!
//! Status payloads are decoded as JSON; anything that is not valid JSON is
//! kept as a string.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{BusClient, BusConnection, BusEvent, BusEvents, LinkOptions, Publish};
use crate::config::ShadowConfig;
use crate::error::{Error, ProtocolError};
use crate::state::{Fields, Snapshot, StateStore};
use crate::topics::Topics;

type ValueMapper = dyn Fn(&str, Value) -> Fields + Send + Sync;

/// Builder for a [`ShadowMirror`].
pub struct MirrorBuilder {
    config: ShadowConfig,
    mapper: Option<Arc<ValueMapper>>,
}

impl MirrorBuilder {
    /// Remaps each inbound status field before it is stored.
    ///
    /// The mapper receives the field name and decoded value and returns the
    /// fields to merge, which may be renamed, split or empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use mqtt_shadow::{Fields, ShadowConfig, ShadowMirror};
    ///
    /// # fn example() -> mqtt_shadow::Result<()> {
    /// let config = ShadowConfig::builder().host("broker").topic("autelis/pool").build()?;
    /// let builder = ShadowMirror::builder(config).map_value(|field, value| {
    ///     let field = if field == "aux1" { "pool_light" } else { field };
    ///     [(field.to_string(), value)].into_iter().collect::<Fields>()
    /// });
    /// # let _ = builder;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn map_value<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str, Value) -> Fields + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Builds the mirror on an MQTT link to the configured broker.
    ///
    /// # Errors
    ///
    /// Returns error if the status subscription cannot be requested.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[cfg(feature = "mqtt")]
    pub fn connect(self) -> Result<ShadowMirror, Error> {
        let (client, events) = crate::bus::connect_mqtt(&self.config);
        self.with_link(client, events)
    }

    /// Builds the mirror on the given transport.
    ///
    /// # Errors
    ///
    /// Returns error if the status subscription cannot be requested.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_link<C, E>(self, client: C, events: E) -> Result<ShadowMirror, Error>
    where
        C: BusClient,
        E: BusEvents,
    {
        let topics = self.config.topics();
        let options: LinkOptions = self.config.link_options();
        let (bus, events) = BusConnection::start(client, events, options);
        bus.subscribe(topics.status_filter())?;

        let store = Arc::new(StateStore::new());
        let task = tokio::spawn(follow_status(
            events,
            topics.clone(),
            Arc::clone(&store),
            self.mapper,
        ));

        tracing::info!(status = %topics.status_root(), "Mirror created");

        Ok(ShadowMirror {
            topics,
            store,
            bus,
            task,
        })
    }
}

impl std::fmt::Debug for MirrorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorBuilder")
            .field("config", &self.config)
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

/// Local copy of a remote device's published state.
///
/// The background task stops when the mirror is dropped.
pub struct ShadowMirror {
    topics: Topics,
    store: Arc<StateStore>,
    bus: BusConnection,
    task: JoinHandle<()>,
}

impl ShadowMirror {
    /// Creates a builder mirroring the device at `config.topic()`.
    #[must_use]
    pub fn builder(config: ShadowConfig) -> MirrorBuilder {
        MirrorBuilder {
            config,
            mapper: None,
        }
    }

    /// Returns the state accumulated so far.
    #[must_use]
    pub fn state(&self) -> Snapshot {
        self.store.get()
    }

    /// Returns the store; register listeners on it to follow changes.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Returns the mirrored topic namespace.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Returns the bus connection.
    #[must_use]
    pub fn bus(&self) -> &BusConnection {
        &self.bus
    }

    /// Sends a command to the device on `R/set/<key>`.
    ///
    /// Strings go out as their raw text, every other value as JSON text.
    /// Dropped while disconnected, like every publish on the bus.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the request.
    pub async fn set(&self, key: &str, value: &Value) -> Result<(), ProtocolError> {
        let payload = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let topic = format!("{}{key}", self.topics.set_root());
        tracing::debug!(topic = %topic, payload = %payload, "Sending command");
        self.bus.publish(&topic, payload.into_bytes(), false).await
    }
}

impl Drop for ShadowMirror {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ShadowMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowMirror")
            .field("topic", &self.topics.root())
            .field("bus", &self.bus)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

async fn follow_status(
    mut events: mpsc::Receiver<BusEvent>,
    topics: Topics,
    store: Arc<StateStore>,
    mapper: Option<Arc<ValueMapper>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            BusEvent::Message { topic, payload } => {
                let Some(field) = topics.field_name(&topic) else {
                    tracing::trace!(topic = %topic, "Ignoring non-status message");
                    continue;
                };
                let value = serde_json::from_str(&payload).unwrap_or(Value::String(payload));
                match &mapper {
                    Some(mapper) => store.assign(mapper(field, value)),
                    None => store.assign([(field, value)]),
                }
            }
            BusEvent::Connected => {
                tracing::info!(status = %topics.status_root(), "Mirror connected");
            }
            BusEvent::Disconnected { reason } => {
                tracing::debug!(status = %topics.status_root(), reason = %reason, "Mirror disconnected");
            }
        }
    }
}
