// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Best-effort alert delivery with a single drain loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bus::Publish;
use crate::topics::ALERT_TOPIC;

use super::AlertPacket;

/// Order in which a drain tick removes pending packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainOrder {
    /// Newest first. Under a backlog the most recent alert goes out first.
    #[default]
    Lifo,
    /// Oldest first.
    Fifo,
}

/// Queue of pending alerts.
///
/// # Drain loop
///
/// ```text
/// idle ──enqueue──▶ draining ──tick finds queue empty──▶ idle
/// ```
///
/// The first [`enqueue`](Self::enqueue) while idle spawns the drain loop.
/// Every `interval` the loop removes all pending packets in [`DrainOrder`]
/// and publishes each on the `alert` topic. Packets enqueued while draining
/// are picked up by the running loop; a second loop is never started. The
/// loop stops itself on the first tick that finds nothing to publish.
///
/// A failed publish is logged and the packet is discarded.
#[derive(Clone)]
pub struct AlertQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    publisher: Arc<dyn Publish>,
    interval: Duration,
    order: DrainOrder,
    pending: Mutex<Pending>,
    idle_tx: watch::Sender<bool>,
    active_loops: AtomicUsize,
    ticks: AtomicU64,
}

struct Pending {
    packets: VecDeque<AlertPacket>,
    draining: bool,
}

impl AlertQueue {
    /// Creates an idle queue publishing through `publisher`.
    #[must_use]
    pub fn new(publisher: Arc<dyn Publish>, interval: Duration, order: DrainOrder) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(QueueInner {
                publisher,
                interval,
                order,
                pending: Mutex::new(Pending {
                    packets: VecDeque::new(),
                    draining: false,
                }),
                idle_tx,
                active_loops: AtomicUsize::new(0),
                ticks: AtomicU64::new(0),
            }),
        }
    }

    /// Appends a packet and starts the drain loop if idle.
    ///
    /// Outside of a Tokio runtime the packet stays queued until the next
    /// `enqueue` made from within one.
    pub fn enqueue(&self, packet: AlertPacket) {
        let start = {
            let mut pending = self.inner.pending.lock();
            pending.packets.push_back(packet);
            if pending.draining {
                false
            } else {
                pending.draining = true;
                self.inner.idle_tx.send_replace(false);
                true
            }
        };

        if !start {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.inner.active_loops.fetch_add(1, Ordering::SeqCst);
                handle.spawn(drain_loop(Arc::clone(&self.inner)));
            }
            Err(e) => {
                tracing::warn!(error = %e, "No runtime to drain alerts");
                self.inner.pending.lock().draining = false;
                self.inner.idle_tx.send_replace(true);
            }
        }
    }

    /// Returns the number of packets waiting to be published.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pending.lock().packets.len()
    }

    /// Returns true if no packet is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true while a drain loop is running.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.pending.lock().draining
    }

    /// Returns the number of drain loops currently running (0 or 1).
    #[must_use]
    pub fn active_loops(&self) -> usize {
        self.inner.active_loops.load(Ordering::SeqCst)
    }

    /// Returns the number of drain ticks executed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::SeqCst)
    }

    /// Returns the configured drain order.
    #[must_use]
    pub fn order(&self) -> DrainOrder {
        self.inner.order
    }

    /// Waits until the queue is idle, for at most `max_wait`.
    ///
    /// Returns `true` if the queue went idle in time.
    pub async fn wait_idle(&self, max_wait: Duration) -> bool {
        let mut idle = self.inner.idle_tx.subscribe();
        let result = tokio::time::timeout(max_wait, idle.wait_for(|idle| *idle)).await;
        result.is_ok_and(|changed| changed.is_ok())
    }
}

impl std::fmt::Debug for AlertQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.inner.pending.lock();
        f.debug_struct("AlertQueue")
            .field("pending", &pending.packets.len())
            .field("draining", &pending.draining)
            .field("order", &self.inner.order)
            .finish_non_exhaustive()
    }
}

async fn drain_loop(inner: Arc<QueueInner>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + inner.interval, inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        inner.ticks.fetch_add(1, Ordering::SeqCst);

        let batch: Vec<AlertPacket> = {
            let mut pending = inner.pending.lock();
            if pending.packets.is_empty() {
                pending.draining = false;
                inner.active_loops.fetch_sub(1, Ordering::SeqCst);
                inner.idle_tx.send_replace(true);
                tracing::debug!("Alert queue idle");
                return;
            }
            match inner.order {
                DrainOrder::Lifo => pending.packets.drain(..).rev().collect(),
                DrainOrder::Fifo => pending.packets.drain(..).collect(),
            }
        };

        tracing::debug!(count = batch.len(), "Draining alerts");
        for packet in batch {
            publish_packet(inner.publisher.as_ref(), &packet).await;
        }
    }
}

async fn publish_packet(publisher: &dyn Publish, packet: &AlertPacket) {
    let payload = match packet.to_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(title = %packet.title, error = %e, "Failed to encode alert");
            return;
        }
    };

    if let Err(e) = publisher.publish(ALERT_TOPIC, payload, false).await {
        tracing::warn!(title = %packet.title, error = %e, "Failed to publish alert");
    }
}
