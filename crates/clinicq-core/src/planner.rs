//! Chain Planner - sole owner of the arrival index.
//!
//! The arrival index holds at most one entry per patient, stored under the
//! patient's uid. Every write to it goes through a conditional store
//! operation:
//! - creation is insert-if-absent and never overwrites
//! - consumption is an atomic read-and-delete
//! - revocation and reassignment compare against the version they read
//!
//! Moving a patient to the next counter is a consume followed by a fresh
//! insert, never an in-place update, so a reader can never observe an entry
//! pointing at a stale counter.
//!
//! Decisions that read a patient's chain and then write to it (acceptance,
//! re-issue, revocation, arrival, chain advance) run under a per-patient
//! chain lock, so two of them never plan from the same snapshot. An entry
//! consumed by a scan and waiting for its PIN is held here until it is
//! admitted or restored, and counts as part of the open chain meanwhile.

use crate::directory::Directory;
use crate::error::{FlowError, FlowResult};
use crate::notify::NotificationFanout;
use crate::table::Table;
use clinicq_store::{Collection, DocumentStore, Query, SortOrder, StoreError};
use clinicq_types::{
    ActiveQueueEntry, ArrivalIndexEntry, AwaitingKey, CounterId, EstablishmentId,
    NotificationStatus, PatientId, QueueState, RequestKey, RequestState, ServiceRequest,
    TransitionEvent,
};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument};

/// One step of a patient's chain that is ready to be authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStep {
    pub counter_id: CounterId,
    pub est_id: EstablishmentId,
    pub request_key: RequestKey,
    pub chain_order: u32,
}

impl ChainStep {
    pub fn for_request(request: &ServiceRequest, chain_order: u32) -> Self {
        Self {
            counter_id: request.counter_id.clone(),
            est_id: request.est_id.clone(),
            request_key: request.request_key,
            chain_order,
        }
    }
}

/// Everything the store knows about one patient's chains.
#[derive(Debug, Clone, Default)]
pub struct ChainSnapshot {
    pub authorization: Option<ArrivalIndexEntry>,
    /// Entry consumed by a scan whose PIN has not been verified yet.
    pub pending: Option<ArrivalIndexEntry>,
    pub queue: Vec<ActiveQueueEntry>,
    pub accepted: Vec<ServiceRequest>,
}

impl ChainSnapshot {
    /// Whether an accepted request has been turned into an authorization or
    /// a queue entry.
    pub fn is_materialized(&self, request_key: &RequestKey) -> bool {
        self.authorization
            .iter()
            .chain(self.pending.iter())
            .any(|entry| &entry.request_key == request_key)
            || self.queue.iter().any(|q| &q.request_key == request_key)
    }

    /// Accepted requests whose step has not been materialized yet.
    pub fn planned(&self) -> impl Iterator<Item = &ServiceRequest> {
        self.accepted
            .iter()
            .filter(|r| r.chain_order.is_some() && !self.is_materialized(&r.request_key))
    }

    /// Chain orders of the patient's open chain: the live or held
    /// authorization, queue entries not yet completed, and planned steps.
    pub fn open_orders(&self) -> Vec<u32> {
        let mut orders = Vec::new();
        if let Some(entry) = &self.authorization {
            orders.push(entry.chain_order);
        }
        if let Some(entry) = &self.pending {
            orders.push(entry.chain_order);
        }
        orders.extend(self.queue.iter().filter(|q| q.is_open()).map(|q| q.chain_order));
        orders.extend(self.planned().filter_map(|r| r.chain_order));
        orders
    }

    /// Chain order the next accepted request receives: 0 when no chain is
    /// open, otherwise one past the highest open order.
    pub fn next_chain_order(&self) -> u32 {
        self.open_orders().into_iter().max().map_or(0, |max| max + 1)
    }

    /// The most recently completed queue entry.
    pub fn last_completed(&self) -> Option<&ActiveQueueEntry> {
        self.queue
            .iter()
            .filter(|q| q.state == QueueState::Completed)
            .max_by_key(|q| (q.completed_at, q.chain_order))
    }

    /// The planned step following `completed_order`, if any.
    pub fn step_after(&self, completed_order: u32) -> Option<ChainStep> {
        let next_order = completed_order + 1;
        self.planned()
            .find(|r| r.chain_order == Some(next_order))
            .map(|r| ChainStep::for_request(r, next_order))
    }

    /// Whether the patient has a step in progress: an authorization, an
    /// arrival awaiting its PIN, or a queue entry not yet completed.
    pub fn has_active_step(&self) -> bool {
        self.authorization.is_some()
            || self.pending.is_some()
            || self.queue.iter().any(|q| q.is_open())
    }
}

/// Outcome of a staff revocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revocation {
    /// The revoked request, now `cancelled`.
    pub request: ServiceRequest,
    /// The authorization that was deleted, if the step had one.
    pub authorization: Option<ArrivalIndexEntry>,
    /// The following step, authorized in place of the revoked chain head.
    pub promoted: Option<ArrivalIndexEntry>,
}

/// Exclusive hold on one patient's chain. Released on drop.
pub(crate) struct ChainGuard<'a> {
    uid: PatientId,
    locks: &'a DashMap<PatientId, Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.uid, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Owner of the "zero or one arrival index entry per uid" invariant.
pub struct ChainPlanner {
    index: Table<ArrivalIndexEntry>,
    requests: Table<ServiceRequest>,
    queue: Table<ActiveQueueEntry>,
    directory: Directory,
    notifier: Arc<NotificationFanout>,
    cas_max_attempts: u32,
    locks: DashMap<PatientId, Arc<Mutex<()>>>,
    held: DashMap<PatientId, ArrivalIndexEntry>,
}

impl ChainPlanner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        directory: Directory,
        notifier: Arc<NotificationFanout>,
        cas_max_attempts: u32,
    ) -> Self {
        Self {
            index: Table::new(Arc::clone(&store), Collection::ArrivalIndex),
            requests: Table::new(Arc::clone(&store), Collection::Requests),
            queue: Table::new(store, Collection::ActiveQueue),
            directory,
            notifier,
            cas_max_attempts: cas_max_attempts.max(1),
            locks: DashMap::new(),
            held: DashMap::new(),
        }
    }

    /// Serialize chain decisions for one patient.
    pub(crate) async fn lock_chain(&self, uid: &PatientId) -> ChainGuard<'_> {
        let lock = Arc::clone(self.locks.entry(uid.clone()).or_default().value());
        let guard = lock.lock_owned().await;
        ChainGuard {
            uid: uid.clone(),
            locks: &self.locks,
            guard: Some(guard),
        }
    }

    /// Keep a consumed entry visible to chain planning while its arrival is
    /// being verified.
    pub(crate) fn hold(&self, entry: &ArrivalIndexEntry) {
        self.held.insert(entry.uid.clone(), entry.clone());
    }

    /// Drop the held entry once it is admitted or back in the index.
    pub(crate) fn release(&self, uid: &PatientId, awaiting_key: &AwaitingKey) {
        self.held
            .remove_if(uid, |_, entry| &entry.awaiting_key == awaiting_key);
    }

    /// Create the arrival index entry for a chain step.
    ///
    /// Fails with [`FlowError::ConflictingEntry`] if the patient already
    /// holds an entry. Re-running the call for the step that is already
    /// authorized (same request key and chain order) returns the existing
    /// entry, which makes the call safe to retry.
    #[instrument(skip(self, est_id), fields(uid = %uid, counter_id = %counter_id))]
    pub async fn advance(
        &self,
        uid: &PatientId,
        counter_id: &CounterId,
        est_id: &EstablishmentId,
        request_key: RequestKey,
        chain_order: u32,
    ) -> FlowResult<ArrivalIndexEntry> {
        let entry = ArrivalIndexEntry::new(
            uid.clone(),
            counter_id.clone(),
            est_id.clone(),
            request_key,
            chain_order,
        );

        match self.index.insert(uid.as_str(), &entry).await {
            Ok(_) => {
                info!(awaiting_key = %entry.awaiting_key, "Arrival authorized");
                Ok(entry)
            }
            Err(StoreError::PreconditionFailed(_)) => {
                let existing = self.index.record(uid.as_str()).await?;
                match existing {
                    Some(existing)
                        if existing.request_key == request_key
                            && existing.chain_order == chain_order =>
                    {
                        Ok(existing)
                    }
                    Some(existing) => {
                        error!(
                            existing_counter = %existing.counter_id,
                            existing_request = %existing.request_key,
                            "Refusing to overwrite arrival authorization"
                        );
                        Err(FlowError::ConflictingEntry {
                            uid: uid.clone(),
                            existing_counter: existing.counter_id,
                        })
                    }
                    // Consumed between our insert and the read; the insert
                    // still lost, so report the conflict rather than retry
                    // blindly.
                    None => Err(FlowError::ConflictingEntry {
                        uid: uid.clone(),
                        existing_counter: counter_id.clone(),
                    }),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// [`advance`](Self::advance) for a planned step.
    pub async fn advance_step(&self, uid: &PatientId, step: &ChainStep) -> FlowResult<ArrivalIndexEntry> {
        self.advance(
            uid,
            &step.counter_id,
            &step.est_id,
            step.request_key,
            step.chain_order,
        )
        .await
    }

    /// Atomically read and delete the patient's entry.
    #[instrument(skip(self), fields(uid = %uid))]
    pub async fn consume_on_arrival(&self, uid: &PatientId) -> FlowResult<ArrivalIndexEntry> {
        self.index
            .take(uid.as_str())
            .await?
            .ok_or_else(|| FlowError::NoAuthorization { uid: uid.clone() })
    }

    /// Non-destructive lookup used by arrival devices.
    pub async fn lookup_authorization(&self, uid: &PatientId) -> FlowResult<Option<ArrivalIndexEntry>> {
        Ok(self.index.record(uid.as_str()).await?)
    }

    /// Put back an entry that was consumed but never admitted.
    ///
    /// Insert-if-absent: if the patient was re-authorized meanwhile the newer
    /// entry wins and the restore is reported as a conflict.
    pub(crate) async fn restore(&self, entry: &ArrivalIndexEntry) -> FlowResult<()> {
        match self.index.insert(entry.uid.as_str(), entry).await {
            Ok(_) => {
                info!(uid = %entry.uid, counter_id = %entry.counter_id, "Arrival authorization restored");
                Ok(())
            }
            Err(StoreError::PreconditionFailed(_)) => {
                let existing = self.index.record(entry.uid.as_str()).await?;
                error!(uid = %entry.uid, "Authorization re-issued while verification was pending");
                Err(FlowError::ConflictingEntry {
                    uid: entry.uid.clone(),
                    existing_counter: existing.map_or_else(|| entry.counter_id.clone(), |e| e.counter_id),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Staff cancellation of one step of a patient's chain.
    ///
    /// The step is named by its request, which must be accepted and not yet
    /// admitted. A live authorization for it is deleted at the version read.
    /// The request ends `cancelled`, later planned steps move up one order,
    /// and when nothing precedes the revoked step the following step is
    /// authorized in its place.
    #[instrument(skip(self), fields(uid = %uid, request_key = %expected_request))]
    pub async fn revoke(
        &self,
        uid: &PatientId,
        expected_request: &RequestKey,
    ) -> FlowResult<Revocation> {
        let _chain = self.lock_chain(uid).await;

        let request = self
            .requests
            .record(&expected_request.storage_key())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("request {}", expected_request)))?;
        if &request.uid != uid {
            return Err(FlowError::InvalidState(format!(
                "request {} belongs to {}",
                expected_request, request.uid
            )));
        }
        let order = match (request.state, request.chain_order) {
            (RequestState::Accepted, Some(order)) => order,
            _ => {
                return Err(FlowError::InvalidState(format!(
                    "request {} is {}, only accepted steps can be revoked",
                    expected_request, request.state
                )))
            }
        };

        let snapshot = self.snapshot(uid).await?;
        if snapshot
            .pending
            .as_ref()
            .is_some_and(|entry| &entry.request_key == expected_request)
        {
            return Err(FlowError::InvalidState(format!(
                "{} is checking in for request {}",
                uid, expected_request
            )));
        }
        if snapshot.queue.iter().any(|q| &q.request_key == expected_request) {
            return Err(FlowError::InvalidState(format!(
                "request {} was already admitted",
                expected_request
            )));
        }

        let authorization = match &snapshot.authorization {
            Some(entry) if &entry.request_key == expected_request => {
                Some(self.remove_authorization(uid, expected_request).await?)
            }
            _ => None,
        };
        let cancelled = self
            .update_request(expected_request, |r| {
                r.state = RequestState::Cancelled;
                r.resolved_at = Some(Utc::now());
            })
            .await?;

        let mut later: Vec<&ServiceRequest> = snapshot
            .planned()
            .filter(|r| r.chain_order.is_some_and(|o| o > order))
            .collect();
        later.sort_by_key(|r| r.chain_order);
        for step in &later {
            let moved = step.chain_order.map(|o| o - 1);
            self.update_request(&step.request_key, |r| r.chain_order = moved)
                .await?;
        }
        info!(chain_order = order, shifted = later.len(), "Chain step revoked");

        let source = authorization.as_ref();
        self.notifier
            .emit(TransitionEvent {
                uid: uid.clone(),
                est_id: source.map_or_else(|| cancelled.est_id.clone(), |e| e.est_id.clone()),
                counter_id: source.map_or_else(|| cancelled.counter_id.clone(), |e| e.counter_id.clone()),
                status: NotificationStatus::Cancelled,
                chain_order: order,
                message: "Your check-in authorization was cancelled by staff".to_string(),
            })
            .await;

        let head = authorization.is_some()
            || (!snapshot.has_active_step()
                && !snapshot
                    .planned()
                    .any(|r| r.chain_order.is_some_and(|o| o < order)));
        let promoted = match later.first() {
            Some(next) if head && next.chain_order == Some(order + 1) => {
                let step = ChainStep::for_request(next, order);
                let entry = self.advance_step(uid, &step).await?;
                self.notifier
                    .emit(TransitionEvent {
                        uid: uid.clone(),
                        est_id: entry.est_id.clone(),
                        counter_id: entry.counter_id.clone(),
                        status: NotificationStatus::AwaitingArrival,
                        chain_order: entry.chain_order,
                        message: format!("Please proceed to counter {} and check in", entry.counter_id),
                    })
                    .await;
                Some(entry)
            }
            _ => None,
        };

        Ok(Revocation {
            request: cancelled,
            authorization,
            promoted,
        })
    }

    /// Delete the patient's authorization if it still belongs to `request_key`.
    async fn remove_authorization(
        &self,
        uid: &PatientId,
        request_key: &RequestKey,
    ) -> FlowResult<ArrivalIndexEntry> {
        for _ in 0..self.cas_max_attempts {
            let current = self
                .index
                .get(uid.as_str())
                .await?
                .ok_or_else(|| FlowError::NoAuthorization { uid: uid.clone() })?;
            if &current.record.request_key != request_key {
                return Err(FlowError::InvalidState(format!(
                    "authorization of {} belongs to request {}",
                    uid, current.record.request_key
                )));
            }
            match self.index.remove_at(uid.as_str(), current.version).await {
                Ok(()) => {
                    info!(counter_id = %current.record.counter_id, "Arrival authorization revoked");
                    return Ok(current.record);
                }
                Err(StoreError::PreconditionFailed(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Contention(format!("revoke of {}", uid)).into())
    }

    /// Compare-and-set an accepted request.
    async fn update_request<F>(&self, request_key: &RequestKey, apply: F) -> FlowResult<ServiceRequest>
    where
        F: Fn(&mut ServiceRequest),
    {
        let key = request_key.storage_key();
        for _ in 0..self.cas_max_attempts {
            let current = self
                .requests
                .get(&key)
                .await?
                .ok_or_else(|| FlowError::NotFound(format!("request {}", request_key)))?;
            if !current.record.is_accepted() {
                return Err(FlowError::AlreadyResolved {
                    request_key: *request_key,
                    state: current.record.state,
                });
            }
            let mut next = current.record;
            apply(&mut next);
            match self.requests.replace(&key, current.version, &next).await {
                Ok(_) => return Ok(next),
                Err(StoreError::PreconditionFailed(_)) => {
                    debug!(request_key = %request_key, "Request changed concurrently");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Contention(format!("update of request {}", request_key)).into())
    }

    /// Staff reassignment of an unconsumed authorization to another counter.
    ///
    /// Replaces the entry identified by `expected_awaiting` with a new one
    /// (new awaiting key) for the same request and chain order.
    #[instrument(skip(self), fields(uid = %uid, counter_id = %new_counter))]
    pub async fn reassign(
        &self,
        uid: &PatientId,
        expected_awaiting: &AwaitingKey,
        new_counter: &CounterId,
    ) -> FlowResult<ArrivalIndexEntry> {
        let counter = self.directory.counter(new_counter).await?;
        let current = self
            .index
            .get(uid.as_str())
            .await?
            .ok_or_else(|| FlowError::NoAuthorization { uid: uid.clone() })?;
        if &current.record.awaiting_key != expected_awaiting {
            return Err(FlowError::InvalidState(format!(
                "authorization of {} changed: now {}",
                uid, current.record.awaiting_key
            )));
        }

        let replacement = ArrivalIndexEntry::new(
            uid.clone(),
            counter.counter_id,
            counter.est_id,
            current.record.request_key,
            current.record.chain_order,
        );

        match self
            .index
            .replace(uid.as_str(), current.version, &replacement)
            .await
        {
            Ok(_) => {}
            Err(StoreError::PreconditionFailed(_)) => {
                return Err(FlowError::InvalidState(format!(
                    "authorization of {} changed concurrently",
                    uid
                )))
            }
            Err(err) => return Err(err.into()),
        }

        info!(from = %current.record.counter_id, "Arrival authorization reassigned");
        self.notifier
            .emit(TransitionEvent {
                uid: uid.clone(),
                est_id: replacement.est_id.clone(),
                counter_id: replacement.counter_id.clone(),
                status: NotificationStatus::AwaitingArrival,
                chain_order: replacement.chain_order,
                message: format!("Please check in at counter {}", replacement.counter_id),
            })
            .await;
        Ok(replacement)
    }

    /// Current authorizations for a counter, oldest first.
    pub async fn awaiting_at(&self, counter_id: &CounterId) -> FlowResult<Vec<ArrivalIndexEntry>> {
        Ok(self
            .index
            .records(
                &Query::new()
                    .filter("counterId", counter_id.as_str())
                    .order_by("createdAt", SortOrder::Ascending),
            )
            .await?)
    }

    /// Read the patient's authorization, queue history and accepted requests.
    ///
    /// The held entry is read before the store: it is only released after
    /// the queue entry or restored authorization that replaces it is written.
    pub async fn snapshot(&self, uid: &PatientId) -> FlowResult<ChainSnapshot> {
        let pending = self.held.get(uid).map(|entry| entry.value().clone());
        let authorization = self.index.record(uid.as_str()).await?;
        let queue = self
            .queue
            .records(
                &Query::new()
                    .filter("uid", uid.as_str())
                    .order_by("arrivedAt", SortOrder::Ascending),
            )
            .await?;
        let accepted = self
            .requests
            .records(
                &Query::new()
                    .filter("uid", uid.as_str())
                    .filter("state", RequestState::Accepted.as_str())
                    .order_by("chainOrder", SortOrder::Ascending),
            )
            .await?;
        Ok(ChainSnapshot {
            authorization,
            pending,
            queue,
            accepted,
        })
    }

    /// Chain order the patient's next accepted request receives.
    pub async fn next_chain_order(&self, uid: &PatientId) -> FlowResult<u32> {
        Ok(self.snapshot(uid).await?.next_chain_order())
    }

    /// Whether more chain steps remain after the patient's most recently
    /// completed step. `None` means the chain terminates.
    pub async fn plan_next_step(&self, uid: &PatientId) -> FlowResult<Option<ChainStep>> {
        let snapshot = self.snapshot(uid).await?;
        Ok(snapshot
            .last_completed()
            .and_then(|done| snapshot.step_after(done.chain_order)))
    }

    /// Planned step following `completed_order`.
    pub(crate) async fn plan_step_after(
        &self,
        uid: &PatientId,
        completed_order: u32,
    ) -> FlowResult<Option<ChainStep>> {
        Ok(self.snapshot(uid).await?.step_after(completed_order))
    }

    /// Chain orders the patient has been admitted with, in arrival order.
    pub async fn chain_history(&self, uid: &PatientId) -> FlowResult<Vec<u32>> {
        let snapshot = self.snapshot(uid).await?;
        Ok(snapshot.queue.iter().map(|q| q.chain_order).collect())
    }
}
