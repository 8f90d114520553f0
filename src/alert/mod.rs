// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Out-of-band alerts.
//!
//! Every recoverable failure of a device ends up here: it is turned into an
//! [`AlertPacket`] and pushed onto the [`AlertQueue`], which publishes it on
//! the `alert` topic from a single background drain loop.

mod packet;
mod queue;

pub use packet::{AlertFactory, AlertKind, AlertPacket, EXCEPTION_TAG};
pub use queue::{AlertQueue, DrainOrder};

/// Handle for raising alerts on behalf of one device.
///
/// Cheap to clone; all clones feed the same queue.
#[derive(Debug, Clone)]
pub struct Alerts {
    factory: AlertFactory,
    queue: AlertQueue,
}

impl Alerts {
    /// Creates a handle from a factory and the queue it feeds.
    #[must_use]
    pub fn new(factory: AlertFactory, queue: AlertQueue) -> Self {
        Self { factory, queue }
    }

    /// Raises an alert.
    pub fn alert(&self, title: impl Into<String>, message: Vec<String>) {
        self.queue
            .enqueue(self.factory.packet(AlertKind::Alert, title, message));
    }

    /// Raises a warning.
    pub fn warn(&self, title: impl Into<String>, message: Vec<String>) {
        self.queue
            .enqueue(self.factory.packet(AlertKind::Warn, title, message));
    }

    /// Raises an exception alert for a caught error.
    pub fn exception(&self, context: &str, error: &dyn std::error::Error) {
        tracing::error!(context = %context, error = %error, "Exception");
        self.queue.enqueue(self.factory.exception(context, error));
    }

    /// Returns the underlying queue.
    #[must_use]
    pub fn queue(&self) -> &AlertQueue {
        &self.queue
    }

    /// Returns the packet factory.
    #[must_use]
    pub fn factory(&self) -> &AlertFactory {
        &self.factory
    }
}
