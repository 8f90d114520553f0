// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The shadow device.
//!
//! A [`Device`] composes the runtime's parts around one topic root:
//!
//! ```text
//! bus message ─▶ BusConnection ─▶ TopicRouter ─▶ CommandHandler
//!                                                     │ set_state
//!                                                     ▼
//!      alert ◀── AlertQueue ◀── errors ◀──────── StateStore
//!                                                     │ change
//!                                                     ▼
//!                              <root>/status/* ◀── StatusPublisher
//! ```
//!
//! Inbound messages are handled strictly one after another: the state
//! changes and status publishes caused by one command complete before the
//! next message is routed.
//!
//! Each time the link comes up the full current snapshot is republished, so
//! state assigned before the first connect, or while the link was down,
//! reaches the broker.

mod builder;
mod context;
mod lifecycle;
mod supervisor;

pub use builder::DeviceBuilder;
pub use context::DeviceContext;
pub use lifecycle::{ShutdownHandle, Termination, TerminationReason};
pub use supervisor::supervise;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::alert::Alerts;
use crate::bus::{BusConnection, BusEvent};
use crate::config::ShadowConfig;
use crate::error::{Error, ProtocolError};
use crate::router::{CommandHandler, Routed, TopicRouter};
use crate::state::StateStore;
use crate::topics::Topics;

use lifecycle::{ShutdownRequest, finish};

/// One running shadow device.
pub struct Device {
    ctx: DeviceContext,
    router: TopicRouter,
    bus: BusConnection,
    events: mpsc::Receiver<BusEvent>,
    shutdown_rx: mpsc::UnboundedReceiver<ShutdownRequest>,
    shutdown_timeout: Duration,
}

impl Device {
    /// Creates a builder for a device driven by `handler`.
    #[must_use]
    pub fn builder(config: ShadowConfig, handler: impl CommandHandler) -> DeviceBuilder {
        DeviceBuilder::new(config, Arc::new(handler))
    }

    /// Returns the handler context.
    #[must_use]
    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        self.ctx.store()
    }

    /// Returns the alert handle.
    #[must_use]
    pub fn alerts(&self) -> &Alerts {
        self.ctx.alerts()
    }

    /// Returns the topic namespace.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        self.ctx.topics()
    }

    /// Returns the bus connection.
    #[must_use]
    pub fn bus(&self) -> &BusConnection {
        &self.bus
    }

    /// Returns the maximum wait for the final alert flush.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns a handle that can request shutdown from anywhere.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.ctx.shutdown_handle()
    }

    /// Processes bus traffic until a shutdown.
    ///
    /// Shutdown requests are served before the next inbound message.
    ///
    /// # Errors
    ///
    /// Returns error if the bus event stream ends.
    pub async fn run(self) -> Result<Termination, Error> {
        let Self {
            ctx,
            router,
            bus: _bus,
            mut events,
            mut shutdown_rx,
            shutdown_timeout,
        } = self;

        tracing::info!(topic = %ctx.topics().root(), "Device running");

        loop {
            tokio::select! {
                biased;

                Some(request) = shutdown_rx.recv() => {
                    return Ok(finish(ctx.alerts(), ctx.status(), request.reason, request.message, shutdown_timeout).await);
                }

                event = events.recv() => match event {
                    Some(BusEvent::Message { topic, payload }) => {
                        if router.route(&ctx, &topic, &payload).await == Routed::Restart {
                            let message = format!("restart requested on {topic}");
                            return Ok(finish(ctx.alerts(), ctx.status(), TerminationReason::Restart, message, shutdown_timeout).await);
                        }
                        if !ctx.status().flush().await {
                            return Err(ProtocolError::ChannelClosed("status worker stopped".to_string()).into());
                        }
                    }
                    Some(BusEvent::Connected) => {
                        let snapshot = ctx.state();
                        tracing::info!(topic = %ctx.topics().root(), fields = snapshot.len(), "Bus connected, republishing state");
                        ctx.status().republish(snapshot);
                    }
                    Some(BusEvent::Disconnected { reason }) => {
                        tracing::warn!(topic = %ctx.topics().root(), reason = %reason, "Bus disconnected");
                    }
                    None => {
                        return Err(ProtocolError::ChannelClosed("bus event stream ended".to_string()).into());
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("topic", &self.ctx.topics().root())
            .field("bus", &self.bus)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}
