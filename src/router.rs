// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound command routing.
//!
//! ```text
//! hvac/upstairs/set/mode → "cool"
//!            ↓
//!   TopicRouter.route()
//!            ↓
//!   strip "hvac/upstairs/set/" → command "mode"
//!            ↓
//!   CommandHandler::handle(ctx, "mode", "cool")
//! ```
//!
//! Two payloads never reach the handler: the restart sentinel
//! [`RESTART_SENTINEL`], which asks the device to shut down, and anything
//! containing [`EXCEPTION_TAG`], which is discarded.
//!
//! [`EXCEPTION_TAG`]: crate::alert::EXCEPTION_TAG

use std::sync::Arc;

use async_trait::async_trait;

use crate::alert::{Alerts, EXCEPTION_TAG};
use crate::device::DeviceContext;
use crate::error::{Error, panic_message};
use crate::topics::Topics;

/// Command payload that requests an orderly restart.
pub const RESTART_SENTINEL: &str = "__RESTART__";

/// Device-specific command interpretation.
///
/// Commands are delivered one at a time: the next inbound message is not
/// routed until `handle` has returned. Errors and panics are turned into
/// exception alerts.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use mqtt_shadow::{CommandHandler, DeviceContext, DeviceError, Error};
/// use serde_json::json;
///
/// struct Receiver;
///
/// #[async_trait]
/// impl CommandHandler for Receiver {
///     async fn handle(&self, ctx: &DeviceContext, command: &str, payload: &str) -> Result<(), Error> {
///         match command {
///             "power" => {
///                 ctx.set_state([("power", json!(payload))]);
///                 Ok(())
///             }
///             other => Err(DeviceError::UnknownCommand(other.to_string()).into()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Executes one command received on `<root>/set/<command>`.
    ///
    /// # Errors
    ///
    /// Any error is reported as an exception alert.
    async fn handle(&self, ctx: &DeviceContext, command: &str, payload: &str) -> Result<(), Error>;

    /// Receives a message from the reset namespace with its full topic.
    ///
    /// Ignores the message by default.
    ///
    /// # Errors
    ///
    /// Any error is reported as an exception alert.
    async fn reset(&self, ctx: &DeviceContext, topic: &str, payload: &str) -> Result<(), Error> {
        let _ = (ctx, payload);
        tracing::debug!(topic = %topic, "Ignoring reset message");
        Ok(())
    }
}

/// Classification of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// A command for the handler.
    Command(&'a str),
    /// The restart sentinel on a command topic.
    Restart(&'a str),
    /// Traffic in the reset namespace.
    Reset,
    /// Payload tagged as exception traffic.
    Discarded,
    /// Not addressed to this device.
    Ignored,
}

/// Result of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// The handler ran successfully.
    Handled,
    /// The handler failed; an exception alert was raised.
    Failed,
    /// The device must shut down for a restart.
    Restart,
    /// The message was forwarded to the reset hook.
    Reset,
    /// The message was dropped.
    Discarded,
    /// The message was not addressed to this device.
    Ignored,
}

/// Dispatches inbound messages to a [`CommandHandler`].
pub struct TopicRouter {
    topics: Topics,
    handler: Arc<dyn CommandHandler>,
    alerts: Alerts,
}

impl TopicRouter {
    /// Creates a router for the given namespace.
    #[must_use]
    pub fn new(topics: Topics, handler: Arc<dyn CommandHandler>, alerts: Alerts) -> Self {
        Self {
            topics,
            handler,
            alerts,
        }
    }

    /// Returns the namespace the router serves.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Classifies a message without executing anything.
    ///
    /// The restart sentinel is matched case-sensitively against the whole
    /// payload and takes precedence over the command name.
    #[must_use]
    pub fn classify<'a>(&self, topic: &'a str, payload: &str) -> Route<'a> {
        if let Some(command) = self.topics.command_name(topic) {
            if payload == RESTART_SENTINEL {
                Route::Restart(command)
            } else if payload.contains(EXCEPTION_TAG) {
                Route::Discarded
            } else {
                Route::Command(command)
            }
        } else if self.topics.is_reset(topic) {
            if payload.contains(EXCEPTION_TAG) {
                Route::Discarded
            } else {
                Route::Reset
            }
        } else {
            Route::Ignored
        }
    }

    /// Routes one message.
    ///
    /// The handler runs on its own task and is awaited, so a panic inside it
    /// becomes an exception alert instead of unwinding into the caller.
    pub async fn route(&self, ctx: &DeviceContext, topic: &str, payload: &str) -> Routed {
        match self.classify(topic, payload) {
            Route::Command(command) => {
                tracing::debug!(command = %command, payload = %payload, "Dispatching command");
                let handler = Arc::clone(&self.handler);
                let ctx = ctx.clone();
                let owned = (command.to_string(), payload.to_string());
                let task = tokio::spawn(async move {
                    let (command, payload) = owned;
                    handler.handle(&ctx, &command, &payload).await
                });
                self.settle(task.await, &format!("command {command}"))
            }
            Route::Restart(command) => {
                tracing::info!(command = %command, "Restart requested");
                Routed::Restart
            }
            Route::Reset => {
                tracing::debug!(topic = %topic, "Forwarding reset message");
                let handler = Arc::clone(&self.handler);
                let ctx = ctx.clone();
                let owned = (topic.to_string(), payload.to_string());
                let task = tokio::spawn(async move {
                    let (topic, payload) = owned;
                    handler.reset(&ctx, &topic, &payload).await
                });
                match self.settle(task.await, &format!("reset {topic}")) {
                    Routed::Handled => Routed::Reset,
                    other => other,
                }
            }
            Route::Discarded => {
                tracing::debug!(topic = %topic, "Discarding exception traffic");
                Routed::Discarded
            }
            Route::Ignored => {
                tracing::trace!(topic = %topic, "Ignoring message outside device namespace");
                Routed::Ignored
            }
        }
    }

    fn settle(
        &self,
        outcome: Result<Result<(), Error>, tokio::task::JoinError>,
        context: &str,
    ) -> Routed {
        let error = match outcome {
            Ok(Ok(())) => return Routed::Handled,
            Ok(Err(e)) => e,
            Err(join) if join.is_panic() => Error::Panicked(panic_message(join.into_panic().as_ref())),
            Err(join) => Error::Panicked(join.to_string()),
        };
        self.alerts.exception(context, &error);
        Routed::Failed
    }
}

impl std::fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRouter")
            .field("set_root", &self.topics.set_root())
            .field("reset_root", &self.topics.reset_root())
            .finish_non_exhaustive()
    }
}
