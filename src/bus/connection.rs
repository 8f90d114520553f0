// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Self-healing bus connection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::ProtocolError;

use super::{BusClient, BusEvent, BusEvents, ConnectionState, LinkEvent, Publish};

/// Timing for the connection task.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Wait between a failure and the next connect attempt.
    pub retry_interval: Duration,
    /// Maximum duration of a single connect attempt.
    pub connect_timeout: Duration,
    /// Capacity of the event channel handed to the owner.
    pub event_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(3),
            event_capacity: 64,
        }
    }
}

/// The single connection to the message bus.
///
/// `BusConnection` is cheaply cloneable (via `Arc`). A background task polls
/// the transport, reconnects after failures at a fixed interval and forwards
/// [`BusEvent`]s to the receiver returned by [`start`](Self::start).
///
/// Publishing while the link is down does not fail: the message is dropped
/// and a warning is logged. Delivery across disconnects is not promised here.
#[derive(Clone)]
pub struct BusConnection {
    inner: Arc<BusConnectionInner>,
}

struct BusConnectionInner {
    client: Box<dyn BusClient>,
    link: Mutex<LinkState>,
    state_tx: watch::Sender<ConnectionState>,
    options: LinkOptions,
}

struct LinkState {
    state: ConnectionState,
    /// Every filter ever requested, in request order.
    filters: Vec<String>,
}

impl BusConnection {
    /// Starts the connection task and returns the handle and its event stream.
    ///
    /// Returns immediately; the first connect attempt runs in the background.
    /// The task stops once the returned receiver is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start<C, E>(client: C, events: E, options: LinkOptions) -> (Self, mpsc::Receiver<BusEvent>)
    where
        C: BusClient,
        E: BusEvents,
    {
        let (event_tx, event_rx) = mpsc::channel(options.event_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let connection = Self {
            inner: Arc::new(BusConnectionInner {
                client: Box::new(client),
                link: Mutex::new(LinkState {
                    state: ConnectionState::Disconnected,
                    filters: Vec::new(),
                }),
                state_tx,
                options,
            }),
        };

        let task_connection = connection.clone();
        tokio::spawn(async move {
            run_link(events, task_connection, event_tx).await;
        });

        (connection, event_rx)
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    /// Returns whether the link is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns a receiver that observes connection state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribes to a topic filter.
    ///
    /// The filter is remembered and re-issued after every reconnect. While
    /// disconnected it is only remembered. Requesting the same filter twice
    /// has no effect.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the request. The filter stays
    /// remembered either way.
    pub fn subscribe(&self, filter: impl Into<String>) -> Result<(), ProtocolError> {
        let filter = filter.into();
        let mut link = self.inner.link.lock();

        if link.filters.contains(&filter) {
            tracing::debug!(filter = %filter, "Already subscribed");
            return Ok(());
        }

        link.filters.push(filter.clone());
        if link.state.is_connected() {
            tracing::debug!(filter = %filter, "Subscribing");
            self.inner.client.subscribe(&filter)?;
        } else {
            tracing::debug!(filter = %filter, "Subscription deferred until connected");
        }
        Ok(())
    }

    /// Returns every remembered subscription filter.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.link.lock().filters.clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut link = self.inner.link.lock();
        if link.state != state {
            link.state = state;
            self.inner.state_tx.send_replace(state);
        }
    }

    /// Marks the link as up and re-issues every remembered filter.
    fn on_connected(&self) {
        let mut link = self.inner.link.lock();
        for filter in &link.filters {
            if let Err(e) = self.inner.client.subscribe(filter) {
                tracing::warn!(filter = %filter, error = %e, "Failed to re-issue subscription");
            }
        }
        link.state = ConnectionState::Connected;
        self.inner.state_tx.send_replace(ConnectionState::Connected);
    }
}

#[async_trait::async_trait]
impl Publish for BusConnection {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            tracing::warn!(topic = %topic, "Dropping publish while disconnected");
            return Ok(());
        }

        tracing::debug!(topic = %topic, bytes = payload.len(), retain, "Publishing");
        self.inner.client.publish(topic, payload, retain).await
    }
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = self.inner.link.lock();
        f.debug_struct("BusConnection")
            .field("state", &link.state)
            .field("subscriptions", &link.filters)
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Polls the transport until the event receiver goes away.
async fn run_link<E: BusEvents>(
    mut events: E,
    connection: BusConnection,
    event_tx: mpsc::Sender<BusEvent>,
) {
    let options = connection.inner.options.clone();
    let mut failures: u32 = 0;

    loop {
        let polled = if connection.is_connected() {
            events.poll().await
        } else {
            connection.set_state(ConnectionState::Connecting);
            match tokio::time::timeout(options.connect_timeout, events.poll()).await {
                Ok(result) => result,
                Err(_) => Err(ProtocolError::Timeout(millis(options.connect_timeout))),
            }
        };

        let event = match polled {
            Ok(LinkEvent::Connected) => {
                connection.on_connected();
                tracing::info!(
                    failed_attempts = failures,
                    subscriptions = connection.subscriptions().len(),
                    "Bus connected"
                );
                failures = 0;
                BusEvent::Connected
            }
            Ok(LinkEvent::Message { topic, payload }) => BusEvent::Message {
                topic,
                payload: String::from_utf8_lossy(&payload).into_owned(),
            },
            Ok(LinkEvent::Other) => continue,
            Err(e) => {
                failures = failures.saturating_add(1);
                connection.set_state(ConnectionState::Disconnected);
                tracing::warn!(
                    error = %e,
                    attempt = failures,
                    retry_ms = millis(options.retry_interval),
                    "Bus connection failed, retrying"
                );

                let event = BusEvent::Disconnected {
                    reason: e.to_string(),
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
                tokio::time::sleep(options.retry_interval).await;
                continue;
            }
        };

        if event_tx.send(event).await.is_err() {
            break;
        }
    }

    tracing::debug!("Bus event receiver dropped, connection task stopped");
}
