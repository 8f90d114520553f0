// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT transport using mockforge-mqtt.

#![cfg(feature = "mqtt")]

use std::time::Duration;

use async_trait::async_trait;
use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use mqtt_shadow::bus::{BusConnection, connect_mqtt};
use mqtt_shadow::{
    BusEvent, CommandHandler, ConnectionState, Device, DeviceContext, Error, Publish, PublishReport,
    ShadowConfig, TerminationReason,
};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to bind
    sleep(Duration::from_millis(500)).await;
}

fn config(port: u16, topic: &str) -> ShadowConfig {
    ShadowConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .topic(topic)
        .retry_interval(Duration::from_millis(200))
        .shutdown_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

async fn wait_connected(mut state: watch::Receiver<ConnectionState>) -> bool {
    timeout(
        Duration::from_secs(5),
        state.wait_for(ConnectionState::is_connected),
    )
    .await
    .is_ok_and(|r| r.is_ok())
}

async fn next_connected(events: &mut mpsc::Receiver<BusEvent>) -> bool {
    timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event == BusEvent::Connected {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false)
}

struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    async fn handle(&self, ctx: &DeviceContext, command: &str, payload: &str) -> Result<(), Error> {
        ctx.set_state([(command, json!(payload))]);
        Ok(())
    }
}

// ============================================================================
// BusConnection Tests
// ============================================================================

mod bus_connection {
    use super::*;

    #[tokio::test]
    async fn connects_and_reports_connected() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let (client, link) = connect_mqtt(&config(port, "test/lamp"));
        let (bus, mut events) = BusConnection::start(client, link, config(port, "test/lamp").link_options());
        bus.subscribe("test/lamp/set/#").unwrap();

        assert!(next_connected(&mut events).await);
        assert!(bus.is_connected());
        assert_eq!(bus.subscriptions(), vec!["test/lamp/set/#".to_string()]);
    }

    #[tokio::test]
    async fn publish_after_connect_is_accepted() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let config = config(port, "test/plug");
        let (client, link) = connect_mqtt(&config);
        let (bus, _events) = BusConnection::start(client, link, config.link_options());

        assert!(wait_connected(bus.watch_state()).await);
        assert!(
            bus.publish("test/plug/status/power", b"\"on\"".to_vec(), true)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn unreachable_broker_keeps_retrying() {
        let port = get_test_port();

        let config = config(port, "test/ghost");
        let (client, link) = connect_mqtt(&config);
        let (bus, mut events) = BusConnection::start(client, link, config.link_options());

        let mut failures = 0;
        while failures < 2 {
            match timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(BusEvent::Disconnected { .. })) => failures += 1,
                Ok(Some(other)) => panic!("unexpected event: {other:?}"),
                Ok(None) | Err(_) => panic!("no disconnect reported"),
            }
        }

        assert!(!bus.is_connected());
        // Dropped, not an error
        assert!(
            bus.publish("test/ghost/status/power", b"1".to_vec(), true)
                .await
                .is_ok()
        );
    }
}

// ============================================================================
// Device Tests
// ============================================================================

mod device_mqtt {
    use super::*;

    #[tokio::test]
    async fn device_subscribes_and_publishes_status() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let device = Device::builder(config(port, "test/thermostat"), Echo)
            .host_name("integration")
            .connect()
            .unwrap();

        assert!(wait_connected(device.bus().watch_state()).await);
        assert_eq!(
            device.bus().subscriptions(),
            vec![
                "test/thermostat/set/#".to_string(),
                "test/reset/#".to_string()
            ]
        );

        device.context().set_state([("temperature", json!(72))]);
        assert_eq!(device.store().get().get("temperature"), Some(&json!(72)));
    }

    #[tokio::test]
    async fn wide_assignment_publishes_every_field() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let device = Device::builder(config(port, "test/rack"), Echo)
            .host_name("integration")
            .connect()
            .unwrap();
        assert!(wait_connected(device.bus().watch_state()).await);

        let fields: Vec<(String, serde_json::Value)> =
            (0..100).map(|i| (format!("sensor{i}"), json!(i))).collect();
        device.context().set_state(fields);

        let status = device.context().status();
        assert!(timeout(Duration::from_secs(10), status.flush()).await.unwrap());
        assert_eq!(
            status.stats(),
            PublishReport {
                published: 100,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn exit_flushes_final_alert() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let device = Device::builder(config(port, "test/receiver"), Echo)
            .connect()
            .unwrap();
        assert!(wait_connected(device.bus().watch_state()).await);

        device.shutdown_handle().exit("maintenance");
        let termination = mqtt_shadow::supervise(device).await;

        assert_eq!(termination.reason, TerminationReason::Exit);
        assert_eq!(termination.message, "maintenance");
        assert!(termination.flushed);
        assert_eq!(termination.exit_code(), 0);
    }
}
