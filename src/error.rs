// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the shadow runtime.
//!
//! Every failure the runtime can recover from ends up as one of these values
//! and, from there, as an alert on the bus. Only explicit shutdown requests
//! terminate a device.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while talking to the message bus.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while decoding or encoding a payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error occurred in the settings store.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Error raised by device logic.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// A state change listener failed.
    #[error("state listener failed: {0}")]
    Listener(String),

    /// A task panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// The runtime configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors related to the message bus connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed or was lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connect attempt timed out.
    #[error("connect timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors related to payload encoding.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON encoding or decoding failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload did not have the expected shape.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// Errors related to the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading or writing the backing file failed.
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing document is not valid JSON.
    #[error("settings JSON invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing document is not a JSON object.
    #[error("settings file {0} does not contain a JSON object")]
    NotAnObject(String),
}

/// Errors raised by device-specific logic.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The command name is not known to the device.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command was understood but could not be carried out.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// Device configuration is invalid.
    #[error("invalid device configuration: {0}")]
    InvalidConfiguration(String),

    /// The persistence sink refused a record.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::Timeout(3000);
        assert_eq!(err.to_string(), "connect timed out after 3000 ms");
    }

    #[test]
    fn error_from_device_error() {
        let err: Error = DeviceError::UnknownCommand("warp".to_string()).into();
        assert!(matches!(err, Error::Device(DeviceError::UnknownCommand(_))));
        assert_eq!(err.to_string(), "device error: unknown command: warp");
    }

    #[test]
    fn parse_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = ParseError::from(json_err).into();
        assert!(matches!(err, Error::Parse(ParseError::Json(_))));
    }

    #[test]
    fn panic_message_from_str_and_string() {
        let from_str: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(from_str.as_ref()), "boom");

        let from_string: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(from_string.as_ref()), "bang");

        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }

    #[test]
    fn settings_error_display() {
        let err = SettingsError::NotAnObject("/tmp/settings.json".to_string());
        assert_eq!(
            err.to_string(),
            "settings file /tmp/settings.json does not contain a JSON object"
        );
    }
}
