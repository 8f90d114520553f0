// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport built on `rumqttc`.

use std::sync::atomic::{AtomicU64, Ordering};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use crate::config::ShadowConfig;
use crate::error::ProtocolError;

use super::{BusClient, BusEvents, LinkEvent};

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Capacity of the `rumqttc` request channel.
const REQUEST_CAPACITY: usize = 64;

/// Request side of an MQTT link.
#[derive(Debug, Clone)]
pub struct MqttClient {
    client: AsyncClient,
}

/// Event side of an MQTT link.
pub struct MqttEvents {
    event_loop: EventLoop,
}

/// Creates an MQTT link for the configured broker.
///
/// Nothing touches the network until [`MqttEvents`] is first polled, which
/// [`BusConnection::start`](super::BusConnection::start) does in the background.
/// Sessions are clean: subscriptions do not survive on the broker side and
/// are re-issued by the connection after every connect.
#[must_use]
pub fn connect_mqtt(config: &ShadowConfig) -> (MqttClient, MqttEvents) {
    let client_id = config.client_id().map_or_else(
        || {
            let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("shadow_{}_{}", std::process::id(), counter)
        },
        str::to_string,
    );

    let mut mqtt_options = MqttOptions::new(&client_id, config.host(), config.port());
    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_clean_session(true);

    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    tracing::debug!(
        client_id = %client_id,
        host = %config.host(),
        port = config.port(),
        "Created MQTT link"
    );

    let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
    (MqttClient { client }, MqttEvents { event_loop })
}

#[async_trait::async_trait]
impl BusClient for MqttClient {
    fn subscribe(&self, filter: &str) -> Result<(), ProtocolError> {
        self.client
            .try_subscribe(filter, QoS::AtLeastOnce)
            .map_err(ProtocolError::Mqtt)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), ProtocolError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(ProtocolError::Mqtt)
    }
}

impl BusEvents for MqttEvents {
    async fn poll(&mut self) -> Result<LinkEvent, ProtocolError> {
        use rumqttc::{Event, Packet};

        match self.event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT connected");
                Ok(LinkEvent::Connected)
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
                Ok(LinkEvent::Other)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(LinkEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::Disconnect)) => Err(ProtocolError::ConnectionFailed(
                "broker closed the session".to_string(),
            )),
            Ok(_) => Ok(LinkEvent::Other),
            Err(e) => Err(ProtocolError::ConnectionFailed(e.to_string())),
        }
    }
}

impl std::fmt::Debug for MqttEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttEvents").finish_non_exhaustive()
    }
}

/// Parses an MQTT URL into host and port.
///
/// Accepts `mqtt://`, `tcp://` or no scheme. The port defaults to 1883.
///
/// # Errors
///
/// Returns error if the host is empty or the port is not a number.
pub fn parse_mqtt_url(url: &str) -> Result<(String, u16), ProtocolError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    if host.is_empty() {
        return Err(ProtocolError::InvalidAddress(
            "broker host is empty".to_string(),
        ));
    }

    Ok((host, port))
}
