// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated thermostat shadow.
//!
//! ```text
//! SHADOW_BROKER=mqtt://localhost:1883 SHADOW_TOPIC=hvac/upstairs \
//!     cargo run --example thermostat
//! ```
//!
//! Then drive it with any MQTT client:
//!
//! ```text
//! mosquitto_pub -t hvac/upstairs/set/setpoint -m 70
//! mosquitto_pub -t hvac/upstairs/set/mode -m cool
//! mosquitto_pub -t hvac/upstairs/set/anything -m __RESTART__
//! mosquitto_sub -t 'hvac/upstairs/status/#' -t alert -v
//! ```
//!
//! Set `SHADOW_SETTINGS` to a JSON file path to read the `"config"`
//! document (e.g. `{"config": {"start_temperature": 68}}`).

use std::time::Duration;

use async_trait::async_trait;
use mqtt_shadow::{
    CommandHandler, Device, DeviceContext, DeviceError, Error, JsonFileSettings, ShadowConfig,
    supervise,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const MODES: [&str; 4] = ["off", "heat", "cool", "auto"];

struct Thermostat;

#[async_trait]
impl CommandHandler for Thermostat {
    async fn handle(&self, ctx: &DeviceContext, command: &str, payload: &str) -> Result<(), Error> {
        match command {
            "setpoint" => {
                let setpoint: f64 = payload
                    .trim()
                    .parse()
                    .map_err(|_| DeviceError::CommandRejected(format!("setpoint {payload}")))?;
                ctx.set_state([("setpoint", json!(setpoint))]);
                Ok(())
            }
            "mode" if MODES.contains(&payload) => {
                ctx.set_state([("mode", json!(payload))]);
                Ok(())
            }
            "mode" => Err(DeviceError::CommandRejected(format!("mode {payload}")).into()),
            "shutdown" => {
                ctx.exit(format!("shutdown requested: {payload}"));
                Ok(())
            }
            other => Err(DeviceError::UnknownCommand(other.to_string()).into()),
        }
    }
}

/// Moves the temperature one degree towards the setpoint.
fn step(ctx: &DeviceContext) {
    let state = ctx.state();
    let temperature = state.get("temperature").and_then(serde_json::Value::as_f64).unwrap_or(70.0);
    let setpoint = state.get("setpoint").and_then(serde_json::Value::as_f64).unwrap_or(temperature);
    let mode = state.get("mode").and_then(serde_json::Value::as_str).unwrap_or("off");

    let next = match mode {
        "heat" | "auto" if temperature < setpoint => temperature + 1.0,
        "cool" | "auto" if temperature > setpoint => temperature - 1.0,
        _ => temperature,
    };
    ctx.set_state([("temperature", json!(next))]);
}

#[tokio::main]
async fn main() -> mqtt_shadow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ShadowConfig::from_env()?;
    tracing::info!(host = %config.host(), topic = %config.topic(), "Starting thermostat");

    let mut builder = Device::builder(config, Thermostat);
    if let Ok(path) = std::env::var("SHADOW_SETTINGS") {
        builder = builder.settings(JsonFileSettings::new(path));
    }
    let device = builder.connect()?;

    let ctx = device.context().clone();
    let start = ctx
        .config()
        .get("start_temperature")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(70.0);
    ctx.set_state([
        ("temperature", json!(start)),
        ("setpoint", json!(start)),
        ("mode", json!("off")),
    ]);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            step(&ctx);
        }
    });

    let termination = supervise(device).await;
    tracing::info!(reason = ?termination.reason, flushed = termination.flushed, "Thermostat stopped");
    std::process::exit(termination.exit_code());
}
