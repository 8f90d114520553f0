// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message bus connection.
//!
//! The [`BusConnection`] owns the single link to the broker. It is built on
//! two small transport seams so the connection logic does not depend on a
//! particular client library:
//!
//! - [`BusClient`]: non-blocking subscribe/publish requests
//! - [`BusEvents`]: the stream of link events, polled by one background task
//!
//! With the `mqtt` feature, [`MqttClient`] and [`MqttEvents`] implement both
//! on top of `rumqttc`.
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected ──poll──▶ Connecting ──ConnAck──▶ Connected
//!      ▲                     │                      │
//!      └──── retry wait ◀────┴──── error / loss ◀───┘
//! ```
//!
//! Retries never stop. Every filter passed to [`BusConnection::subscribe`]
//! is remembered and re-issued once after each successful connect.

mod connection;
#[cfg(feature = "mqtt")]
mod mqtt;

pub use connection::{BusConnection, LinkOptions};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttClient, MqttEvents, connect_mqtt, parse_mqtt_url};

use std::future::Future;

use async_trait::async_trait;

use crate::error::ProtocolError;

/// Connection state of the bus link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link to the broker.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is up and subscriptions have been issued.
    Connected,
}

impl ConnectionState {
    /// Returns true if the link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// An event produced by a transport's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The broker accepted the connection.
    Connected,
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic the message was published on.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// Any other protocol traffic (acks, pings).
    Other,
}

/// An event forwarded by [`BusConnection`] to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The link is up and subscriptions were re-issued.
    Connected,
    /// A connect attempt failed or an established link dropped.
    Disconnected {
        /// Description of the failure.
        reason: String,
    },
    /// A message arrived.
    Message {
        /// Topic the message was published on.
        topic: String,
        /// Payload decoded as UTF-8 (lossy).
        payload: String,
    },
}

/// Request side of a transport.
///
/// Requests are queued, never awaited on the network. A publish waits for
/// room in the transport's request queue instead of failing when it is full.
#[async_trait]
pub trait BusClient: Send + Sync + 'static {
    /// Requests a subscription to a topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    fn subscribe(&self, filter: &str) -> Result<(), ProtocolError>;

    /// Requests a publish.
    ///
    /// # Errors
    ///
    /// Returns error if the transport is gone.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), ProtocolError>;
}

/// Event side of a transport.
///
/// Polling after an error starts a new connection attempt.
pub trait BusEvents: Send + 'static {
    /// Waits for the next link event.
    ///
    /// # Errors
    ///
    /// Returns error if the connect attempt failed or the link dropped.
    fn poll(&mut self) -> impl Future<Output = Result<LinkEvent, ProtocolError>> + Send;
}

/// Something messages can be published through.
///
/// Implemented by [`BusConnection`]; the status publisher and the alert
/// queue only depend on this.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Publishes a payload on a topic.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the request.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), ProtocolError>;
}
