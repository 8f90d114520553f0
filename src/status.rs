// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Republishes changed state fields under the status namespace.
//!
//! The [`StatusPublisher`] is a [`StateStore`] listener. For every
//! assignment it publishes each field whose value changed, one retained
//! message per field on `<root>/status/<field>`, in the field order of the
//! new snapshot. The reserved `_id` field is never published.
//!
//! Listeners run synchronously inside `assign`, so the listener only queues
//! the change. A single worker task publishes queued changes in order and
//! awaits every publish, so a burst larger than the transport's request
//! queue waits for room instead of losing fields. [`StatusPublisher::flush`]
//! resolves once everything queued before it has been published.
//!
//! After a cycle that published at least one field without any failure,
//! the full status record is handed to the optional [`PersistenceSink`] on
//! a background task.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::alert::Alerts;
use crate::bus::Publish;
use crate::error::{Error, ParseError};
use crate::state::{Fields, ListenerId, RESERVED_ID_FIELD, Snapshot, StateChange, StateStore};
use crate::topics::Topics;

/// Receives a timestamped copy of the status record after each publish cycle.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use mqtt_shadow::{Error, Fields, PersistenceSink};
///
/// struct LogSink;
///
/// #[async_trait]
/// impl PersistenceSink for LogSink {
///     async fn create(&self, record: Fields) -> Result<(), Error> {
///         println!("{}", serde_json::Value::Object(record));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PersistenceSink: Send + Sync + 'static {
    /// Stores one record.
    ///
    /// # Errors
    ///
    /// Failures are logged by the caller and never retried.
    async fn create(&self, record: Fields) -> Result<(), Error>;
}

/// Outcome of one or more publish cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Fields published successfully.
    pub published: usize,
    /// Fields whose publish failed.
    pub failed: usize,
}

enum StatusJob {
    Change(StateChange),
    Republish(Snapshot),
    Flush(oneshot::Sender<()>),
}

/// Publishes state deltas to the status namespace.
///
/// Cheap to clone; every clone feeds the same worker task.
#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<StatusInner>,
    jobs: mpsc::UnboundedSender<StatusJob>,
}

struct StatusInner {
    publisher: Arc<dyn Publish>,
    topics: Topics,
    alerts: Alerts,
    sink: Option<Arc<dyn PersistenceSink>>,
    totals: Mutex<PublishReport>,
}

impl StatusPublisher {
    /// Creates a publisher and spawns its worker task.
    ///
    /// The worker stops once every clone and every attached listener is
    /// gone.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn start(
        publisher: Arc<dyn Publish>,
        topics: Topics,
        alerts: Alerts,
        sink: Option<Arc<dyn PersistenceSink>>,
    ) -> Self {
        let inner = Arc::new(StatusInner {
            publisher,
            topics,
            alerts,
            sink,
            totals: Mutex::new(PublishReport::default()),
        });
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(Arc::clone(&inner), rx));
        Self { inner, jobs }
    }

    /// Registers the publisher as a listener on `store`.
    pub fn attach(&self, store: &StateStore) -> ListenerId {
        let jobs = self.jobs.clone();
        store.on_change(move |change| {
            if jobs.send(StatusJob::Change(change.clone())).is_err() {
                tracing::warn!("Status worker stopped, change not published");
            }
            Ok(())
        })
    }

    /// Queues every field of `snapshot` for publishing, changed or not.
    ///
    /// Used after a (re)connect: status published while the link was down
    /// was dropped.
    pub fn republish(&self, snapshot: Snapshot) {
        if self.jobs.send(StatusJob::Republish(snapshot)).is_err() {
            tracing::warn!("Status worker stopped, snapshot not republished");
        }
    }

    /// Waits until everything queued before this call has been published.
    ///
    /// Returns `false` if the worker is gone.
    pub async fn flush(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.jobs.send(StatusJob::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.await.is_ok()
    }

    /// Returns the totals over every cycle published so far.
    #[must_use]
    pub fn stats(&self) -> PublishReport {
        *self.inner.totals.lock()
    }

    /// Publishes the fields changed by one assignment.
    ///
    /// A failed field raises an exception alert and does not stop the
    /// remaining fields.
    pub async fn publish_change(&self, change: &StateChange) -> PublishReport {
        self.inner.publish_change(change).await
    }
}

impl StatusInner {
    async fn publish_change(&self, change: &StateChange) -> PublishReport {
        let report = self.publish_fields(change.changed_fields()).await;
        if report.published > 0 && report.failed == 0 {
            self.persist(change.new_snapshot());
        }
        report
    }

    async fn publish_fields<'a>(&self, fields: Vec<(&'a str, &'a Value)>) -> PublishReport {
        let mut report = PublishReport::default();

        for (field, value) in fields {
            let topic = self.topics.status_topic(field);
            match self.publish_field(&topic, value).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    self.alerts.exception(&format!("publish {topic}"), &e);
                }
            }
        }

        if report.published > 0 || report.failed > 0 {
            tracing::debug!(
                topic = %self.topics.root(),
                published = report.published,
                failed = report.failed,
                "Published status"
            );
            let mut totals = self.totals.lock();
            totals.published += report.published;
            totals.failed += report.failed;
        }

        report
    }

    async fn publish_field(&self, topic: &str, value: &Value) -> Result<(), Error> {
        let payload = serde_json::to_vec(value).map_err(ParseError::from)?;
        self.publisher.publish(topic, payload, true).await?;
        Ok(())
    }

    fn persist(&self, snapshot: &Snapshot) {
        let Some(sink) = &self.sink else {
            return;
        };

        let record = status_record(self.topics.root(), snapshot);
        let sink = Arc::clone(sink);
        let name = self.topics.root().to_string();

        tokio::spawn(async move {
            if let Err(e) = sink.create(record).await {
                tracing::warn!(topic = %name, error = %e, "Failed to persist status");
            }
        });
    }
}

async fn run_worker(inner: Arc<StatusInner>, mut jobs: mpsc::UnboundedReceiver<StatusJob>) {
    while let Some(job) = jobs.recv().await {
        match job {
            StatusJob::Change(change) => {
                inner.publish_change(&change).await;
            }
            StatusJob::Republish(snapshot) => {
                let fields = snapshot
                    .iter()
                    .filter(|(field, _)| field.as_str() != RESERVED_ID_FIELD)
                    .map(|(field, value)| (field.as_str(), value))
                    .collect();
                let report = inner.publish_fields(fields).await;
                tracing::info!(
                    topic = %inner.topics.root(),
                    published = report.published,
                    "Republished status"
                );
            }
            StatusJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!(topic = %inner.topics.root(), "Status worker stopped");
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("status_root", &self.inner.topics.status_root())
            .field("persistence", &self.inner.sink.is_some())
            .field("totals", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Builds the persisted form of a snapshot.
///
/// The record starts with `timestamp` (RFC 3339, UTC) and `name`, followed by
/// every state field except `_id`. A state field with the same name as one of
/// the leading keys overrides its value.
#[must_use]
pub fn status_record(name: &str, snapshot: &Snapshot) -> Fields {
    let mut record = Fields::new();
    record.insert(
        "timestamp".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    record.insert("name".to_string(), Value::String(name.to_string()));

    for (field, value) in snapshot.iter() {
        if field != RESERVED_ID_FIELD {
            record.insert(field.clone(), value.clone());
        }
    }
    record
}
