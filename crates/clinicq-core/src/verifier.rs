//! Arrival Verifier - turns a physical arrival into a queue admission.
//!
//! A scan consumes the patient's authorization. When the scan came from the
//! right counter, the consumed entry is parked in an in-process slot until the
//! patient proves their identity with a PIN, and held by the planner so the
//! step still counts as open. Slots are never persisted: an
//! attempt window that lapses puts the entry back into the arrival index, so
//! an abandoned check-in does not strand the patient.
//!
//! The admission itself is two writes keyed by the awaiting key (arrival
//! record, then queue entry). Both are insert-if-absent, so replaying the
//! admission after a partial failure converges on the same documents.

use crate::directory::Directory;
use crate::error::{FlowError, FlowResult};
use crate::notify::NotificationFanout;
use crate::planner::ChainPlanner;
use crate::retry::RetryPolicy;
use crate::table::Table;
use chrono::{DateTime, Utc};
use clinicq_store::{Collection, DocumentStore, Query, SortOrder, StoreError};
use clinicq_types::{
    ActiveQueueEntry, ArrivalIndexEntry, ArrivalMethod, ArrivalRecord, CounterId,
    NotificationStatus, PatientId, TransitionEvent,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

/// Ticket handed to the device after a valid scan; the patient has until
/// `expires_at` to enter their PIN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerification {
    pub uid: PatientId,
    pub counter_id: CounterId,
    pub chain_order: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingArrival {
    entry: ArrivalIndexEntry,
    method: ArrivalMethod,
    deadline: Instant,
}

impl PendingArrival {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    fn ticket(&self) -> PendingVerification {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let remaining = chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        PendingVerification {
            uid: self.entry.uid.clone(),
            counter_id: self.entry.counter_id.clone(),
            chain_order: self.entry.chain_order,
            expires_at: Utc::now() + remaining,
        }
    }
}

pub struct ArrivalVerifier {
    planner: Arc<ChainPlanner>,
    directory: Directory,
    records: Table<ArrivalRecord>,
    queue: Table<ActiveQueueEntry>,
    notifier: Arc<NotificationFanout>,
    slots: DashMap<PatientId, PendingArrival>,
    pin_timeout: Duration,
    write_retry: RetryPolicy,
}

impl ArrivalVerifier {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        planner: Arc<ChainPlanner>,
        directory: Directory,
        notifier: Arc<NotificationFanout>,
        pin_timeout: Duration,
        write_retry: RetryPolicy,
    ) -> Self {
        Self {
            planner,
            directory,
            records: Table::new(Arc::clone(&store), Collection::ArrivalRecords),
            queue: Table::new(store, Collection::ActiveQueue),
            notifier,
            slots: DashMap::new(),
            pin_timeout,
            write_retry,
        }
    }

    /// Handle a scan (or manual uid entry) at `device_counter`.
    ///
    /// A scan at the wrong counter consumes the authorization for good and
    /// fails with [`FlowError::WrongCounter`]; staff have to re-issue it.
    /// Repeated scans while a PIN is pending return the same ticket.
    #[instrument(skip(self), fields(uid = %uid, counter_id = %device_counter, method = %method))]
    pub async fn verify_arrival(
        &self,
        uid: &PatientId,
        device_counter: &CounterId,
        method: ArrivalMethod,
    ) -> FlowResult<PendingVerification> {
        self.expire(uid).await;
        if let Some(ticket) = self.live_ticket(uid, device_counter)? {
            return Ok(ticket);
        }

        let _chain = self.planner.lock_chain(uid).await;
        let entry = match self.planner.consume_on_arrival(uid).await {
            Ok(entry) => entry,
            Err(FlowError::NoAuthorization { .. }) => {
                // A concurrent duplicate scan may have consumed it first.
                if let Some(ticket) = self.live_ticket(uid, device_counter)? {
                    return Ok(ticket);
                }
                info!("Scan without authorization");
                return Err(FlowError::NoAuthorization { uid: uid.clone() });
            }
            Err(err) => return Err(err),
        };

        if &entry.counter_id != device_counter {
            warn!(
                expected = %entry.counter_id,
                awaiting_key = %entry.awaiting_key,
                "Scan at wrong counter consumed authorization"
            );
            self.notifier
                .emit(TransitionEvent {
                    uid: uid.clone(),
                    est_id: entry.est_id.clone(),
                    counter_id: entry.counter_id.clone(),
                    status: NotificationStatus::Cancelled,
                    chain_order: entry.chain_order,
                    message: format!(
                        "Checked in at the wrong counter, expected {}. Please ask staff to re-issue your check-in",
                        entry.counter_id
                    ),
                })
                .await;
            return Err(FlowError::WrongCounter {
                uid: uid.clone(),
                expected: entry.counter_id,
                actual: device_counter.clone(),
            });
        }

        let pending = PendingArrival {
            entry,
            method,
            deadline: Instant::now() + self.pin_timeout,
        };
        let ticket = pending.ticket();
        self.planner.hold(&pending.entry);
        self.slots.insert(uid.clone(), pending);
        info!(chain_order = ticket.chain_order, "Arrival pending PIN verification");
        Ok(ticket)
    }

    /// Check the PIN for a pending arrival and, on success, admit the patient
    /// to the counter's queue.
    #[instrument(skip(self, pin), fields(uid = %uid))]
    pub async fn submit_pin(&self, uid: &PatientId, pin: &str) -> FlowResult<ActiveQueueEntry> {
        let awaiting_key = match self.slots.get(uid) {
            None => return Err(FlowError::NoAuthorization { uid: uid.clone() }),
            Some(slot) if slot.is_expired(Instant::now()) => None,
            Some(slot) => Some(slot.entry.awaiting_key),
        };
        let Some(awaiting_key) = awaiting_key else {
            self.expire(uid).await;
            return Err(FlowError::VerificationExpired { uid: uid.clone() });
        };

        let patient = self.directory.patient(uid).await?;
        if !patient.verify_pin(pin) {
            if let Some(mut slot) = self.slots.get_mut(uid) {
                slot.deadline = Instant::now() + self.pin_timeout;
            }
            info!("PIN rejected");
            return Err(FlowError::VerificationFailed { uid: uid.clone() });
        }

        let Some((_, pending)) = self
            .slots
            .remove_if(uid, |_, slot| slot.entry.awaiting_key == awaiting_key)
        else {
            // Claimed by a concurrent submission or swept in between.
            return Err(FlowError::NoAuthorization { uid: uid.clone() });
        };

        match self.complete(&pending.entry, pending.method).await {
            Ok(queued) => {
                self.planner.release(uid, &pending.entry.awaiting_key);
                Ok(queued)
            }
            Err(err) => {
                error!(error = %err, "Admission failed, arrival kept pending");
                self.slots.insert(
                    uid.clone(),
                    PendingArrival {
                        deadline: Instant::now() + self.pin_timeout,
                        ..pending
                    },
                );
                Err(err)
            }
        }
    }

    /// Cancel a pending arrival from the device and restore the authorization.
    #[instrument(skip(self), fields(uid = %uid))]
    pub async fn abandon(&self, uid: &PatientId) -> FlowResult<ArrivalIndexEntry> {
        let (_, pending) = self
            .slots
            .remove(uid)
            .ok_or_else(|| FlowError::NoAuthorization { uid: uid.clone() })?;
        let restored = self.planner.restore(&pending.entry).await;
        self.planner.release(uid, &pending.entry.awaiting_key);
        restored?;
        info!("Pending arrival abandoned");
        Ok(pending.entry)
    }

    /// Restore every pending arrival whose attempt window has lapsed.
    /// Returns how many were restored.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PatientId> = self
            .slots
            .iter()
            .filter(|slot| slot.is_expired(now))
            .map(|slot| slot.key().clone())
            .collect();

        let mut restored = 0;
        for uid in expired {
            if self.expire(&uid).await {
                restored += 1;
            }
        }
        restored
    }

    /// The pending verification for a patient, if one is open.
    pub fn pending(&self, uid: &PatientId) -> Option<PendingVerification> {
        self.slots
            .get(uid)
            .filter(|slot| !slot.is_expired(Instant::now()))
            .map(|slot| slot.ticket())
    }

    /// Number of arrivals currently waiting for a PIN.
    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    /// Every arrival a patient has made, oldest first.
    pub async fn arrivals_for(&self, uid: &PatientId) -> FlowResult<Vec<ArrivalRecord>> {
        Ok(self
            .records
            .records(
                &Query::new()
                    .filter("uid", uid.as_str())
                    .order_by("timestamp", SortOrder::Ascending),
            )
            .await?)
    }

    fn live_ticket(
        &self,
        uid: &PatientId,
        device_counter: &CounterId,
    ) -> FlowResult<Option<PendingVerification>> {
        let Some(slot) = self.slots.get(uid) else {
            return Ok(None);
        };
        if slot.is_expired(Instant::now()) {
            return Ok(None);
        }
        if &slot.entry.counter_id != device_counter {
            return Err(FlowError::WrongCounter {
                uid: uid.clone(),
                expected: slot.entry.counter_id.clone(),
                actual: device_counter.clone(),
            });
        }
        Ok(Some(slot.ticket()))
    }

    /// Drop an expired slot and put its entry back into the arrival index.
    async fn expire(&self, uid: &PatientId) -> bool {
        let now = Instant::now();
        let Some((_, pending)) = self.slots.remove_if(uid, |_, slot| slot.is_expired(now)) else {
            return false;
        };

        let restored = self.planner.restore(&pending.entry).await;
        self.planner.release(uid, &pending.entry.awaiting_key);
        if let Err(err) = restored {
            error!(uid = %uid, error = %err, "Failed to restore authorization after PIN timeout");
            return false;
        }
        info!(uid = %uid, counter_id = %pending.entry.counter_id, "PIN window lapsed, authorization restored");
        self.notifier
            .emit(TransitionEvent {
                uid: uid.clone(),
                est_id: pending.entry.est_id.clone(),
                counter_id: pending.entry.counter_id.clone(),
                status: NotificationStatus::AwaitingArrival,
                chain_order: pending.entry.chain_order,
                message: format!(
                    "Check-in timed out. Please scan again at counter {}",
                    pending.entry.counter_id
                ),
            })
            .await;
        true
    }

    /// Append the arrival record and admit the patient to the queue.
    async fn complete(&self, entry: &ArrivalIndexEntry, method: ArrivalMethod) -> FlowResult<ActiveQueueEntry> {
        let record = ArrivalRecord::for_entry(entry, method);
        let record_key = entry.awaiting_key.storage_key();
        let arrived_at = match self.records.insert(&record_key, &record).await {
            Ok(_) => record.timestamp,
            Err(StoreError::PreconditionFailed(_)) => self
                .records
                .record(&record_key)
                .await?
                .map_or(record.timestamp, |existing| existing.timestamp),
            Err(err) => return Err(err.into()),
        };

        let waiting = ActiveQueueEntry::waiting(entry, arrived_at);
        let (queued, created) = self
            .write_retry
            .retry_if(
                "queue admission",
                |_| self.admit_once(&waiting),
                FlowError::is_transient,
            )
            .await?;

        if created {
            info!(
                uid = %queued.uid,
                queue_key = %queued.queue_key,
                counter_id = %queued.counter_id,
                "Patient admitted to queue"
            );
            self.notifier
                .emit(TransitionEvent {
                    uid: queued.uid.clone(),
                    est_id: queued.est_id.clone(),
                    counter_id: queued.counter_id.clone(),
                    status: NotificationStatus::Waiting,
                    chain_order: queued.chain_order,
                    message: format!("You are in the queue at counter {}", queued.counter_id),
                })
                .await;
        }
        Ok(queued)
    }

    /// Insert the waiting entry, or return the one a previous attempt wrote.
    async fn admit_once(&self, waiting: &ActiveQueueEntry) -> FlowResult<(ActiveQueueEntry, bool)> {
        let key = waiting.queue_key.storage_key();
        match self.queue.insert(&key, waiting).await {
            Ok(_) => Ok((waiting.clone(), true)),
            Err(StoreError::PreconditionFailed(_)) => {
                let existing = self
                    .queue
                    .record(&key)
                    .await?
                    .ok_or_else(|| FlowError::NotFound(format!("queue entry {}", waiting.queue_key)))?;
                Ok((existing, false))
            }
            Err(err) => Err(err.into()),
        }
    }
}
