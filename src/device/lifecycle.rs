// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orderly shutdown.
//!
//! A shutdown first lets queued status publishes complete, then raises one
//! final alert and waits for the alert queue to go idle. Both waits share
//! one deadline, the configured maximum wait, before the run loop returns
//! its [`Termination`]. The process is never exited from here.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::alert::Alerts;
use crate::status::StatusPublisher;

/// Why a device stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit requested by the device.
    Exit,
    /// Error exit requested by the device or the supervisor.
    Abort,
    /// Restart requested over the bus.
    Restart,
}

impl TerminationReason {
    /// Title of the final alert.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Exit => "EXIT",
            Self::Abort => "ABORT",
            Self::Restart => "RESTARTING",
        }
    }
}

/// Final outcome of a device run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Why the device stopped.
    pub reason: TerminationReason,
    /// Message carried by the final alert.
    pub message: String,
    /// Whether pending status and alerts went out before the maximum wait
    /// elapsed.
    pub flushed: bool,
}

impl Termination {
    /// Process exit code for this termination.
    ///
    /// A restart exits successfully so that a process supervisor starts the
    /// device again.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.reason {
            TerminationReason::Exit | TerminationReason::Restart => 0,
            TerminationReason::Abort => 1,
        }
    }
}

/// A pending shutdown request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShutdownRequest {
    pub(crate) reason: TerminationReason,
    pub(crate) message: String,
}

/// Requests shutdown of the device it was handed out by.
///
/// Requests are processed by the run loop before the next inbound message.
/// The first request wins.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<ShutdownRequest>,
}

impl ShutdownHandle {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ShutdownRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Requests a normal exit.
    pub fn exit(&self, message: impl Into<String>) {
        self.request(TerminationReason::Exit, message.into());
    }

    /// Requests an error exit.
    pub fn abort(&self, message: impl Into<String>) {
        self.request(TerminationReason::Abort, message.into());
    }

    fn request(&self, reason: TerminationReason, message: String) {
        tracing::info!(?reason, message = %message, "Shutdown requested");
        if self.tx.send(ShutdownRequest { reason, message }).is_err() {
            tracing::warn!(?reason, "Device already stopped");
        }
    }
}

/// Flushes pending status, raises the final alert and waits for the alert
/// queue to drain.
pub(crate) async fn finish(
    alerts: &Alerts,
    status: &StatusPublisher,
    reason: TerminationReason,
    message: String,
    max_wait: Duration,
) -> Termination {
    let deadline = Instant::now() + max_wait;
    let status_flushed = tokio::time::timeout_at(deadline, status.flush())
        .await
        .unwrap_or(false);
    if !status_flushed {
        tracing::warn!(?reason, "Status not flushed before shutdown");
    }

    let lines = vec![message.clone()];
    match reason {
        TerminationReason::Abort => alerts.alert(reason.title(), lines),
        TerminationReason::Exit | TerminationReason::Restart => alerts.warn(reason.title(), lines),
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let flushed = alerts.queue().wait_idle(remaining).await && status_flushed;
    if flushed {
        tracing::info!(?reason, "Alerts flushed, stopping");
    } else {
        tracing::warn!(
            ?reason,
            pending = alerts.queue().len(),
            max_wait_ms = u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX),
            "Alerts not flushed in time, stopping anyway"
        );
    }

    Termination {
        reason,
        message,
        flushed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertFactory, AlertQueue, DrainOrder};
    use crate::bus::Publish;
    use crate::error::ProtocolError;
    use crate::topics::Topics;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingPublisher {
        payloads: Mutex<Vec<serde_json::Value>>,
        topics: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Publish for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>, _retain: bool) -> Result<(), ProtocolError> {
            self.topics.lock().push(topic.to_string());
            self.payloads
                .lock()
                .push(serde_json::from_slice(&payload).unwrap());
            Ok(())
        }
    }

    fn parts(publisher: &Arc<RecordingPublisher>) -> (Alerts, StatusPublisher) {
        let shared = Arc::clone(publisher) as Arc<dyn Publish>;
        let topics = Topics::new("denon");
        let queue = AlertQueue::new(Arc::clone(&shared), Duration::from_millis(100), DrainOrder::Lifo);
        let alerts = Alerts::new(AlertFactory::with_host("test", topics.clone()), queue);
        let status = StatusPublisher::start(shared, topics, alerts.clone(), None);
        (alerts, status)
    }

    #[test]
    fn exit_codes() {
        let termination = |reason| Termination {
            reason,
            message: String::new(),
            flushed: true,
        };
        assert_eq!(termination(TerminationReason::Exit).exit_code(), 0);
        assert_eq!(termination(TerminationReason::Restart).exit_code(), 0);
        assert_eq!(termination(TerminationReason::Abort).exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_publishes_alert_before_returning() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (alerts, status) = parts(&publisher);

        let termination = finish(
            &alerts,
            &status,
            TerminationReason::Abort,
            "lost receiver".to_string(),
            Duration::from_secs(10),
        )
        .await;

        assert!(termination.flushed);
        let payloads = publisher.payloads.lock();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["type"], "alert");
        assert_eq!(payloads[0]["title"], "ABORT");
        assert_eq!(payloads[0]["message"][0], "lost receiver");
    }

    #[tokio::test(start_paused = true)]
    async fn restart_is_a_warning() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (alerts, status) = parts(&publisher);

        finish(
            &alerts,
            &status,
            TerminationReason::Restart,
            "restart requested".to_string(),
            Duration::from_secs(10),
        )
        .await;

        let payloads = publisher.payloads.lock();
        assert_eq!(payloads[0]["type"], "warn");
        assert_eq!(payloads[0]["title"], "RESTARTING");
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_gives_up() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (alerts, status) = parts(&publisher);

        let start = tokio::time::Instant::now();
        let termination = finish(
            &alerts,
            &status,
            TerminationReason::Exit,
            "bye".to_string(),
            Duration::from_millis(50),
        )
        .await;

        assert!(!termination.flushed);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_status_goes_out_before_final_alert() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (alerts, status) = parts(&publisher);
        let store = crate::state::StateStore::new();
        status.attach(&store);

        store.assign([("volume", serde_json::json!(-30))]);
        let termination = finish(
            &alerts,
            &status,
            TerminationReason::Exit,
            "bye".to_string(),
            Duration::from_secs(10),
        )
        .await;

        assert!(termination.flushed);
        assert_eq!(
            *publisher.topics.lock(),
            vec!["denon/status/volume".to_string(), "alert".to_string()]
        );
    }

    #[tokio::test]
    async fn handle_reports_first_request() {
        let (handle, mut requests) = ShutdownHandle::new();
        handle.exit("done");
        handle.abort("late");

        let first = requests.recv().await.unwrap();
        assert_eq!(first.reason, TerminationReason::Exit);
        assert_eq!(first.message, "done");
    }
}
