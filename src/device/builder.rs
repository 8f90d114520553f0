// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builder for shadow devices.

use std::sync::Arc;

use serde_json::Value;

use crate::alert::{AlertFactory, AlertQueue, Alerts};
use crate::bus::{BusClient, BusConnection, BusEvents, Publish};
use crate::config::ShadowConfig;
use crate::error::Error;
use crate::router::{CommandHandler, TopicRouter};
use crate::settings::{CONFIG_SETTING, SettingsStore};
use crate::state::StateStore;
use crate::status::{PersistenceSink, StatusPublisher};

use super::{Device, DeviceContext, ShutdownHandle};

/// Builder for a [`Device`].
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use mqtt_shadow::{CommandHandler, Device, DeviceContext, Error, ShadowConfig, supervise};
///
/// struct Lamp;
///
/// #[async_trait]
/// impl CommandHandler for Lamp {
///     async fn handle(&self, ctx: &DeviceContext, command: &str, payload: &str) -> Result<(), Error> {
///         ctx.set_state([(command, serde_json::json!(payload))]);
///         Ok(())
///     }
/// }
///
/// # async fn example() -> mqtt_shadow::Result<()> {
/// let config = ShadowConfig::builder()
///     .host("192.168.1.50")
///     .topic("lights/porch")
///     .build()?;
///
/// let device = Device::builder(config, Lamp).connect()?;
/// let termination = supervise(device).await;
/// std::process::exit(termination.exit_code());
/// # }
/// ```
pub struct DeviceBuilder {
    config: ShadowConfig,
    handler: Arc<dyn CommandHandler>,
    settings: Option<Arc<dyn SettingsStore>>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    host_name: Option<String>,
}

impl DeviceBuilder {
    pub(crate) fn new(config: ShadowConfig, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            config,
            handler,
            settings: None,
            persistence: None,
            host_name: None,
        }
    }

    /// Sets the store the `"config"` document is read from.
    #[must_use]
    pub fn settings(mut self, settings: impl SettingsStore + 'static) -> Self {
        self.settings = Some(Arc::new(settings));
        self
    }

    /// Sets the sink receiving status records after each publish cycle.
    #[must_use]
    pub fn persistence(mut self, sink: impl PersistenceSink) -> Self {
        self.persistence = Some(Arc::new(sink));
        self
    }

    /// Overrides the host name stamped on alerts.
    #[must_use]
    pub fn host_name(mut self, host: impl Into<String>) -> Self {
        self.host_name = Some(host.into());
        self
    }

    /// Builds the device on an MQTT link to the configured broker.
    ///
    /// # Errors
    ///
    /// Returns error if the settings store cannot be read.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[cfg(feature = "mqtt")]
    pub fn connect(self) -> Result<Device, Error> {
        let (client, events) = crate::bus::connect_mqtt(&self.config);
        self.with_link(client, events)
    }

    /// Builds the device on the given transport.
    ///
    /// Subscribes to the command and reset namespaces; the subscriptions are
    /// issued once the link comes up.
    ///
    /// # Errors
    ///
    /// Returns error if the settings store cannot be read.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_link<C, E>(self, client: C, events: E) -> Result<Device, Error>
    where
        C: BusClient,
        E: BusEvents,
    {
        let settings_document = match &self.settings {
            Some(settings) => settings.get_setting(CONFIG_SETTING)?.unwrap_or(Value::Null),
            None => Value::Null,
        };

        let topics = self.config.topics();
        let (bus, events) = BusConnection::start(client, events, self.config.link_options());
        let publisher: Arc<dyn Publish> = Arc::new(bus.clone());

        let factory = match self.host_name {
            Some(host) => AlertFactory::with_host(host, topics.clone()),
            None => AlertFactory::new(topics.clone()),
        };
        let queue = AlertQueue::new(
            Arc::clone(&publisher),
            self.config.drain_interval(),
            self.config.drain_order(),
        );
        let alerts = Alerts::new(factory, queue);

        let store = Arc::new(StateStore::new());
        let listener_alerts = alerts.clone();
        store.on_listener_error(move |e| listener_alerts.exception("state listener", &e));
        let status = StatusPublisher::start(
            Arc::clone(&publisher),
            topics.clone(),
            alerts.clone(),
            self.persistence,
        );
        status.attach(&store);

        bus.subscribe(topics.set_filter())?;
        bus.subscribe(topics.reset_filter())?;

        let (shutdown, shutdown_rx) = ShutdownHandle::new();
        let ctx = DeviceContext::new(
            store,
            alerts.clone(),
            status,
            shutdown,
            topics.clone(),
            publisher,
            settings_document,
        );
        let router = TopicRouter::new(topics.clone(), self.handler, alerts);

        tracing::info!(
            topic = %topics.root(),
            set = %topics.set_root(),
            status = %topics.status_root(),
            "Device created"
        );

        Ok(Device {
            ctx,
            router,
            bus,
            events,
            shutdown_rx,
            shutdown_timeout: self.config.shutdown_timeout(),
        })
    }
}

impl std::fmt::Debug for DeviceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuilder")
            .field("config", &self.config)
            .field("settings", &self.settings.is_some())
            .field("persistence", &self.persistence.is_some())
            .field("host_name", &self.host_name)
            .finish_non_exhaustive()
    }
}
