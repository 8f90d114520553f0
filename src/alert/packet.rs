// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Alert packets and the factory that stamps them with device identity.

use serde::Serialize;

use crate::error::ParseError;
use crate::topics::Topics;

/// Title of alerts raised for caught errors.
///
/// Inbound command payloads containing this text are discarded so that an
/// exception report can never be routed back in as a command.
pub const EXCEPTION_TAG: &str = "EXCEPTION";

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Something went wrong.
    Alert,
    /// Informational lifecycle notice.
    Warn,
}

/// An out-of-band notification published on the `alert` topic.
///
/// Serializes as
/// `{"type", "host", "topic", "setRoot", "statusRoot", "title", "message"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPacket {
    /// Severity.
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// Host name of the machine running the device.
    pub host: String,
    /// Topic root of the device.
    pub topic: String,
    /// Command namespace of the device.
    pub set_root: String,
    /// Status namespace of the device.
    pub status_root: String,
    /// Short title.
    pub title: String,
    /// Message lines.
    pub message: Vec<String>,
}

impl AlertPacket {
    /// Encodes the packet as a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>, ParseError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Builds [`AlertPacket`]s for one device.
#[derive(Debug, Clone)]
pub struct AlertFactory {
    host: String,
    topics: Topics,
}

impl AlertFactory {
    /// Creates a factory using the local host name.
    #[must_use]
    pub fn new(topics: Topics) -> Self {
        let host = hostname::get().map_or_else(
            |e| {
                tracing::warn!(error = %e, "Could not read host name");
                "unknown".to_string()
            },
            |name| name.to_string_lossy().into_owned(),
        );
        Self::with_host(host, topics)
    }

    /// Creates a factory with an explicit host name.
    #[must_use]
    pub fn with_host(host: impl Into<String>, topics: Topics) -> Self {
        Self {
            host: host.into(),
            topics,
        }
    }

    /// Returns the host name stamped on packets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Builds a packet.
    #[must_use]
    pub fn packet(&self, kind: AlertKind, title: impl Into<String>, message: Vec<String>) -> AlertPacket {
        AlertPacket {
            kind,
            host: self.host.clone(),
            topic: self.topics.root().to_string(),
            set_root: self.topics.set_root().to_string(),
            status_root: self.topics.status_root().to_string(),
            title: title.into(),
            message,
        }
    }

    /// Builds an exception alert from an error and its source chain.
    ///
    /// The first line is `context`, the second the error itself, followed
    /// by one `caused by:` line per source.
    #[must_use]
    pub fn exception(&self, context: &str, error: &dyn std::error::Error) -> AlertPacket {
        let mut message = vec![context.to_string(), error.to_string()];
        let mut source = error.source();
        while let Some(cause) = source {
            message.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        self.packet(AlertKind::Alert, EXCEPTION_TAG, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ProtocolError};
    use serde_json::json;

    fn factory() -> AlertFactory {
        AlertFactory::with_host("robodomo", Topics::new("denon/zone1"))
    }

    #[test]
    fn packet_serializes_with_wire_names() {
        let packet = factory().packet(AlertKind::Warn, "EXIT", vec!["bye".to_string()]);
        let value: serde_json::Value = serde_json::from_slice(&packet.to_payload().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "warn",
                "host": "robodomo",
                "topic": "denon/zone1",
                "setRoot": "denon/zone1/set/",
                "statusRoot": "denon/zone1/status/",
                "title": "EXIT",
                "message": ["bye"],
            })
        );
    }

    #[test]
    fn exception_lists_source_chain() {
        let err: Error = ProtocolError::Timeout(3000).into();
        let packet = factory().exception("publish status/power", &err);

        assert_eq!(packet.kind, AlertKind::Alert);
        assert_eq!(packet.title, EXCEPTION_TAG);
        assert_eq!(
            packet.message,
            vec![
                "publish status/power".to_string(),
                "protocol error: connect timed out after 3000 ms".to_string(),
                "caused by: connect timed out after 3000 ms".to_string(),
            ]
        );
    }

    #[test]
    fn local_host_name_is_not_empty() {
        let factory = AlertFactory::new(Topics::new("denon"));
        assert!(!factory.host().is_empty());
    }
}
