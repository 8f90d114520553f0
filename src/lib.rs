// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `mqtt_shadow` - device shadows kept in sync over MQTT.
//!
//! A shadow is the authoritative in-process state of one physical or
//! logical device. Controllers send commands on the device's command
//! namespace; the device executes them and republishes only the state
//! fields that actually changed on its status namespace.
//!
//! # Topics
//!
//! For a topic root `R`:
//!
//! | Direction | Topic | Payload |
//! |---|---|---|
//! | in | `R/set/<command>` | command argument as text |
//! | in | `<first segment of R>/reset/#` | forwarded to the reset hook |
//! | out | `R/status/<field>` | JSON value, retained |
//! | out | `alert` | JSON alert packet, not retained |
//!
//! The payload `__RESTART__` on any command topic stops the device with a
//! restart termination instead of reaching the handler.
//!
//! # Features
//!
//! - **State diffing**: every assignment publishes exactly the changed fields
//! - **Self-healing link**: unbounded reconnects at a fixed interval, with
//!   subscriptions re-issued after each connect
//! - **Alerts**: errors become alert packets drained by a single background loop
//! - **Orderly shutdown**: a final alert is flushed, with a bounded wait,
//!   before the run loop returns
//! - **Mirrors**: [`ShadowMirror`] follows a device's status namespace from
//!   the controller side and sends it commands
//!
//! # Quick Start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use mqtt_shadow::{CommandHandler, Device, DeviceContext, DeviceError, Error, ShadowConfig};
//! use serde_json::json;
//!
//! struct Thermostat;
//!
//! #[async_trait]
//! impl CommandHandler for Thermostat {
//!     async fn handle(&self, ctx: &DeviceContext, command: &str, payload: &str) -> Result<(), Error> {
//!         match command {
//!             "setpoint" => {
//!                 let value: f64 = payload
//!                     .parse()
//!                     .map_err(|_| DeviceError::CommandRejected(payload.to_string()))?;
//!                 ctx.set_state([("setpoint", json!(value))]);
//!                 Ok(())
//!             }
//!             other => Err(DeviceError::UnknownCommand(other.to_string()).into()),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> mqtt_shadow::Result<()> {
//!     let config = ShadowConfig::builder()
//!         .host("192.168.1.50")
//!         .topic("hvac/upstairs")
//!         .build()?;
//!
//!     let device = Device::builder(config, Thermostat).connect()?;
//!     let termination = mqtt_shadow::supervise(device).await;
//!     std::process::exit(termination.exit_code());
//! }
//! ```

pub mod alert;
pub mod bus;
mod config;
mod device;
pub mod error;
mod mirror;
mod router;
pub mod settings;
pub mod state;
mod status;
mod topics;

pub use alert::{AlertKind, AlertPacket, Alerts, DrainOrder, EXCEPTION_TAG};
pub use bus::{BusConnection, BusEvent, ConnectionState, Publish};
pub use config::{ShadowConfig, ShadowConfigBuilder};
pub use device::{
    Device, DeviceBuilder, DeviceContext, ShutdownHandle, Termination, TerminationReason, supervise,
};
pub use error::{DeviceError, Error, ParseError, ProtocolError, Result, SettingsError};
pub use mirror::{MirrorBuilder, ShadowMirror};
pub use router::{CommandHandler, RESTART_SENTINEL, Route, Routed, TopicRouter};
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use state::{Fields, Snapshot, StateChange, StateStore};
pub use status::{PersistenceSink, PublishReport, StatusPublisher, status_record};
pub use topics::{ALERT_TOPIC, Topics};
