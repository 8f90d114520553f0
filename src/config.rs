// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime configuration for a shadow device.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use mqtt_shadow::ShadowConfig;
//!
//! let config = ShadowConfig::builder()
//!     .host("192.168.1.50")
//!     .topic("hvac/upstairs")
//!     .credentials("user", "password")
//!     .shutdown_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.port(), 1883);
//! assert_eq!(config.topics().set_root(), "hvac/upstairs/set/");
//! ```

use std::time::Duration;

use crate::alert::DrainOrder;
use crate::bus::LinkOptions;
use crate::error::Error;
use crate::topics::Topics;

/// Configuration of one shadow device.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    keep_alive: Duration,
    topic: String,
    retry_interval: Duration,
    connect_timeout: Duration,
    drain_interval: Duration,
    drain_order: DrainOrder,
    shutdown_timeout: Duration,
    event_capacity: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            topic: String::new(),
            retry_interval: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(3),
            drain_interval: Duration::from_millis(100),
            drain_order: DrainOrder::Lifo,
            shutdown_timeout: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

impl ShadowConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ShadowConfigBuilder {
        ShadowConfigBuilder::default()
    }

    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SHADOW_BROKER`: broker URL (`mqtt://host:port`, `tcp://...` or `host[:port]`)
    /// - `SHADOW_TOPIC`: topic root of the device
    /// - `SHADOW_USERNAME` / `SHADOW_PASSWORD`: broker credentials
    /// - `SHADOW_CLIENT_ID`: MQTT client id
    /// - `SHADOW_SHUTDOWN_TIMEOUT_MS`: maximum wait for the final alert flush
    ///
    /// # Errors
    ///
    /// Returns error if a variable is malformed or the result does not validate.
    pub fn from_env() -> Result<Self, Error> {
        let mut builder = Self::builder();

        if let Ok(broker) = std::env::var("SHADOW_BROKER") {
            builder = builder.broker_url(&broker)?;
        }

        if let Ok(topic) = std::env::var("SHADOW_TOPIC") {
            builder = builder.topic(topic);
        }

        if let (Ok(username), Ok(password)) = (
            std::env::var("SHADOW_USERNAME"),
            std::env::var("SHADOW_PASSWORD"),
        ) {
            builder = builder.credentials(username, password);
        }

        if let Ok(client_id) = std::env::var("SHADOW_CLIENT_ID") {
            builder = builder.client_id(client_id);
        }

        if let Ok(timeout) = std::env::var("SHADOW_SHUTDOWN_TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|_| {
                Error::Config(format!("SHADOW_SHUTDOWN_TIMEOUT_MS is not a number: {timeout}"))
            })?;
            builder = builder.shutdown_timeout(Duration::from_millis(millis));
        }

        builder.build()
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the credentials if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Returns the client id if one was set explicitly.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the MQTT keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the device's topic root.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the topic namespace derived from the topic root.
    #[must_use]
    pub fn topics(&self) -> Topics {
        Topics::new(self.topic.as_str())
    }

    /// Returns the alert drain tick interval.
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        self.drain_interval
    }

    /// Returns the alert drain order.
    #[must_use]
    pub fn drain_order(&self) -> DrainOrder {
        self.drain_order
    }

    /// Returns the maximum wait for pending alerts at shutdown.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the timing used by the connection task.
    #[must_use]
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            retry_interval: self.retry_interval,
            connect_timeout: self.connect_timeout,
            event_capacity: self.event_capacity,
        }
    }
}

/// Builder for [`ShadowConfig`].
#[derive(Debug, Default)]
pub struct ShadowConfigBuilder {
    config: ShadowConfig,
}

impl ShadowConfigBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets host and port from a broker URL.
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot be parsed.
    pub fn broker_url(mut self, url: &str) -> Result<Self, Error> {
        let (host, port) = parse_broker_url(url)?;
        self.config.host = host;
        self.config.port = port;
        Ok(self)
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets a fixed client id.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = Some(id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the device's topic root.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    /// Sets the wait between reconnect attempts (default: 2 seconds).
    #[must_use]
    pub fn retry_interval(mut self, duration: Duration) -> Self {
        self.config.retry_interval = duration;
        self
    }

    /// Sets the connect attempt timeout (default: 3 seconds).
    #[must_use]
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Sets the alert drain tick interval (default: 100 ms).
    #[must_use]
    pub fn drain_interval(mut self, duration: Duration) -> Self {
        self.config.drain_interval = duration;
        self
    }

    /// Sets the alert drain order (default: [`DrainOrder::Lifo`]).
    #[must_use]
    pub fn drain_order(mut self, order: DrainOrder) -> Self {
        self.config.drain_order = order;
        self
    }

    /// Sets the maximum wait for pending alerts at shutdown (default: 10 seconds).
    #[must_use]
    pub fn shutdown_timeout(mut self, duration: Duration) -> Self {
        self.config.shutdown_timeout = duration;
        self
    }

    /// Sets the capacity of the bus event channel (default: 64).
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Topic root is not set
    /// - An interval is zero
    pub fn build(self) -> Result<ShadowConfig, Error> {
        let config = self.config;

        if config.host.is_empty() {
            return Err(Error::Config("broker host is required".to_string()));
        }
        if config.topic.trim_matches('/').is_empty() {
            return Err(Error::Config("topic root is required".to_string()));
        }
        if config.retry_interval.is_zero()
            || config.connect_timeout.is_zero()
            || config.drain_interval.is_zero()
        {
            return Err(Error::Config("intervals must be non-zero".to_string()));
        }

        Ok(config)
    }
}

#[cfg(feature = "mqtt")]
fn parse_broker_url(url: &str) -> Result<(String, u16), Error> {
    Ok(crate::bus::parse_mqtt_url(url)?)
}

#[cfg(not(feature = "mqtt"))]
fn parse_broker_url(url: &str) -> Result<(String, u16), Error> {
    let url = url.split_once("://").map_or(url, |(_, rest)| rest);
    match url.rsplit_once(':') {
        Some((host, port)) => port
            .parse()
            .map(|port| (host.to_string(), port))
            .map_err(|_| Error::Config(format!("Invalid port: {port}"))),
        None => Ok((url.to_string(), 1883)),
    }
}
