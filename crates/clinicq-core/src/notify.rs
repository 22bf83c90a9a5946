//! Notification fan-out.
//!
//! Every state transition is turned into a patient-facing [`Notification`]
//! and written to the patient's mailbox. Delivery is best effort: a failing
//! sink is logged and never propagated to the transition that triggered it,
//! and a sink that does not answer within the delivery timeout is abandoned.

use crate::directory::Directory;
use crate::table::Table;
use async_trait::async_trait;
use chrono::Utc;
use clinicq_store::{Collection, DocumentStore, Query, QueryWindow, SortOrder, StoreError};
use clinicq_types::{Notification, NotificationKind, PatientId, TransitionEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Notification delivery failure.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mailbox write failed: {0}")]
    Mailbox(#[from] StoreError),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Destination for patient notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, uid: &PatientId, notification: &Notification) -> Result<(), NotifyError>;
}

/// Stored mailbox row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailboxEntry {
    uid: PatientId,
    seq: u64,
    #[serde(flatten)]
    notification: Notification,
}

/// Append-only, time-ordered per-patient mailbox in the document store.
pub struct MailboxSink {
    entries: Table<MailboxEntry>,
    seq: AtomicU64,
}

impl MailboxSink {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            entries: Table::new(store, Collection::Notifications),
            seq: AtomicU64::new(0),
        }
    }

    /// A patient's notifications, oldest first.
    pub async fn mailbox(
        &self,
        uid: &PatientId,
        window: QueryWindow,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut query = Query::new()
            .filter("uid", uid.as_str())
            .order_by("timestamp", SortOrder::Ascending);
        query.window = window;
        Ok(self
            .entries
            .records(&query)
            .await?
            .into_iter()
            .map(|entry| entry.notification)
            .collect())
    }
}

#[async_trait]
impl NotificationSink for MailboxSink {
    async fn deliver(&self, uid: &PatientId, notification: &Notification) -> Result<(), NotifyError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = mailbox_key(uid, notification.timestamp.timestamp_millis(), seq);
        let entry = MailboxEntry {
            uid: uid.clone(),
            seq,
            notification: notification.clone(),
        };
        self.entries.insert(&key, &entry).await?;
        Ok(())
    }
}

/// Keys sort by time, then by emission order within a millisecond.
/// Both fields are padded to the full width of their type.
fn mailbox_key(uid: &PatientId, timestamp_ms: i64, seq: u64) -> String {
    format!("{}/{:020}-{:020}", uid, timestamp_ms.max(0), seq)
}

/// A delivered notification together with its addressee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    pub uid: PatientId,
    pub notification: Notification,
}

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Observer turning transitions into notifications.
pub struct NotificationFanout {
    sink: Arc<dyn NotificationSink>,
    directory: Directory,
    event_tx: broadcast::Sender<NotificationEnvelope>,
    delivery_timeout: Duration,
}

impl NotificationFanout {
    pub fn new(sink: Arc<dyn NotificationSink>, directory: Directory, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sink,
            directory,
            event_tx,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// Bound on a single sink delivery.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Subscribe to every notification emitted in this process.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.event_tx.subscribe()
    }

    /// Emit a notification for a transition. Never fails.
    pub async fn emit(&self, event: TransitionEvent) {
        let (est_name, counter_name) = self
            .directory
            .display_names(&event.est_id, &event.counter_id)
            .await;
        let notification = Notification {
            est_id: event.est_id,
            est_name,
            counter_id: event.counter_id,
            counter_name,
            kind: NotificationKind::ArrivalUpdate,
            status: event.status,
            message: event.message,
            chain_order: event.chain_order,
            timestamp: Utc::now(),
        };

        let delivery = self.sink.deliver(&event.uid, &notification);
        match tokio::time::timeout(self.delivery_timeout, delivery).await {
            Ok(Ok(())) => {
                debug!(uid = %event.uid, status = %notification.status, "Notification delivered");
            }
            Ok(Err(err)) => {
                warn!(
                    uid = %event.uid,
                    status = %notification.status,
                    error = %err,
                    "Notification delivery failed"
                );
            }
            Err(_) => {
                warn!(
                    uid = %event.uid,
                    status = %notification.status,
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "Notification delivery timed out"
                );
            }
        }

        let _ = self.event_tx.send(NotificationEnvelope {
            uid: event.uid,
            notification,
        });
    }
}
