//! Active Queue Manager - per-counter FIFO of arrived patients.
//!
//! Each counter's queue is the set of its `waiting` entries ordered by arrival
//! time. There is no in-memory queue object: admission selects from the store
//! and claims the entry with a compare-and-set, so any number of staff
//! terminals can call the next patient concurrently.

use crate::error::{FlowError, FlowResult};
use crate::notify::NotificationFanout;
use crate::planner::{ChainPlanner, ChainStep};
use crate::retry::RetryPolicy;
use crate::table::Table;
use chrono::Utc;
use clinicq_store::{transact, Collection, DocumentStore, Query, SortOrder, StoreError, TxDecision};
use clinicq_types::{
    ActiveQueueEntry, ArrivalIndexEntry, CounterId, NotificationStatus, PatientId, QueueKey,
    QueueState, TransitionEvent,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What `end_service` did.
#[derive(Debug, Clone, PartialEq)]
pub enum EndServiceOutcome {
    /// The patient has no further steps.
    ChainCompleted(ActiveQueueEntry),
    /// The patient was authorized at the next counter of the chain.
    Advanced {
        completed: ActiveQueueEntry,
        next: ArrivalIndexEntry,
    },
    /// The entry had been completed by an earlier call; nothing was done.
    AlreadyCompleted(ActiveQueueEntry),
}

impl EndServiceOutcome {
    pub fn entry(&self) -> &ActiveQueueEntry {
        match self {
            EndServiceOutcome::ChainCompleted(entry)
            | EndServiceOutcome::AlreadyCompleted(entry)
            | EndServiceOutcome::Advanced {
                completed: entry, ..
            } => entry,
        }
    }
}

pub struct ActiveQueueManager {
    queue: Table<ActiveQueueEntry>,
    planner: Arc<ChainPlanner>,
    notifier: Arc<NotificationFanout>,
    write_retry: RetryPolicy,
    cas_max_attempts: u32,
}

impl ActiveQueueManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        planner: Arc<ChainPlanner>,
        notifier: Arc<NotificationFanout>,
        write_retry: RetryPolicy,
        cas_max_attempts: u32,
    ) -> Self {
        Self {
            queue: Table::new(store, Collection::ActiveQueue),
            planner,
            notifier,
            write_retry,
            cas_max_attempts: cas_max_attempts.max(1),
        }
    }

    /// Move the earliest-arrived waiting patient at `counter_id` into service.
    #[instrument(skip(self), fields(counter_id = %counter_id))]
    pub async fn admit_next(&self, counter_id: &CounterId) -> FlowResult<ActiveQueueEntry> {
        for round in 0..self.cas_max_attempts {
            let candidates = self.queue.query(&waiting_at(counter_id)).await?;
            let mut contended = false;

            for candidate in candidates {
                let mut admitted = candidate.record;
                admitted.state = QueueState::InService;
                admitted.admitted_at = Some(Utc::now());

                match self
                    .queue
                    .replace(&admitted.queue_key.storage_key(), candidate.version, &admitted)
                    .await
                {
                    Ok(_) => {
                        info!(uid = %admitted.uid, queue_key = %admitted.queue_key, "Patient admitted");
                        self.notifier
                            .emit(TransitionEvent {
                                uid: admitted.uid.clone(),
                                est_id: admitted.est_id.clone(),
                                counter_id: admitted.counter_id.clone(),
                                status: NotificationStatus::InService,
                                chain_order: admitted.chain_order,
                                message: format!("Please come to counter {}", admitted.counter_id),
                            })
                            .await;
                        return Ok(admitted);
                    }
                    Err(StoreError::PreconditionFailed(_)) => {
                        debug!(queue_key = %admitted.queue_key, round, "Candidate taken concurrently");
                        contended = true;
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            // Every candidate went to a concurrent caller; arrivals that
            // landed meanwhile are only visible to a fresh query.
            if !contended {
                break;
            }
        }
        Err(FlowError::QueueEmpty {
            counter_id: counter_id.clone(),
        })
    }

    /// Finish serving a patient and move them along their chain.
    ///
    /// Keyed by `queue_key`: a repeated call for an entry that is already
    /// completed returns [`EndServiceOutcome::AlreadyCompleted`] without any
    /// side effect. The one exception is an earlier call that completed the
    /// entry but failed to authorize the next step: the repeat finishes that
    /// advance.
    #[instrument(skip(self), fields(queue_key = %queue_key))]
    pub async fn end_service(&self, queue_key: &QueueKey) -> FlowResult<EndServiceOutcome> {
        let mut already_completed = false;
        let stored = transact(
            self.queue.store(),
            self.queue.collection(),
            &queue_key.storage_key(),
            self.cas_max_attempts,
            |current| -> FlowResult<TxDecision> {
                let doc = current.ok_or_else(|| FlowError::NotFound(format!("queue entry {}", queue_key)))?;
                let mut entry: ActiveQueueEntry = doc.decode()?;
                match entry.state {
                    QueueState::Completed => {
                        already_completed = true;
                        Ok(TxDecision::Keep)
                    }
                    QueueState::Waiting => Err(FlowError::InvalidState(format!(
                        "{} has not been admitted yet",
                        queue_key
                    ))),
                    QueueState::InService => {
                        already_completed = false;
                        entry.state = QueueState::Completed;
                        entry.completed_at = Some(Utc::now());
                        let body = serde_json::to_value(&entry).map_err(StoreError::from)?;
                        Ok(TxDecision::Write(body))
                    }
                }
            },
        )
        .await?;

        let entry: ActiveQueueEntry = stored
            .ok_or_else(|| FlowError::NotFound(format!("queue entry {}", queue_key)))?
            .decode()?;

        let _chain = self.planner.lock_chain(&entry.uid).await;
        if already_completed {
            return self.resume_advance(entry).await;
        }
        info!(uid = %entry.uid, chain_order = entry.chain_order, "Service completed");

        let Some(step) = self
            .planner
            .plan_step_after(&entry.uid, entry.chain_order)
            .await?
        else {
            self.notifier
                .emit(TransitionEvent {
                    uid: entry.uid.clone(),
                    est_id: entry.est_id.clone(),
                    counter_id: entry.counter_id.clone(),
                    status: NotificationStatus::Completed,
                    chain_order: entry.chain_order,
                    message: "Your visit is complete".to_string(),
                })
                .await;
            return Ok(EndServiceOutcome::ChainCompleted(entry));
        };

        let next = self.advance_to(&entry, &step).await?;
        Ok(EndServiceOutcome::Advanced {
            completed: entry,
            next,
        })
    }

    /// Authorize the step following an entry completed by an earlier call,
    /// if that call never got to it.
    async fn resume_advance(&self, entry: ActiveQueueEntry) -> FlowResult<EndServiceOutcome> {
        let snapshot = self.planner.snapshot(&entry.uid).await?;
        let latest = snapshot
            .last_completed()
            .is_some_and(|done| done.queue_key == entry.queue_key);
        let stranded = if latest && !snapshot.has_active_step() {
            snapshot.step_after(entry.chain_order)
        } else {
            None
        };
        let Some(step) = stranded else {
            debug!("Service already ended");
            return Ok(EndServiceOutcome::AlreadyCompleted(entry));
        };

        warn!(uid = %entry.uid, chain_order = step.chain_order, "Resuming unfinished chain advance");
        let next = self.advance_to(&entry, &step).await?;
        Ok(EndServiceOutcome::Advanced {
            completed: entry,
            next,
        })
    }

    async fn advance_to(&self, entry: &ActiveQueueEntry, step: &ChainStep) -> FlowResult<ArrivalIndexEntry> {
        let next = self
            .write_retry
            .retry_if(
                "chain advance",
                |_| self.planner.advance_step(&entry.uid, step),
                FlowError::is_transient,
            )
            .await
            .map_err(|err| {
                error!(uid = %entry.uid, next_counter = %step.counter_id, error = %err, "Chain advance failed");
                err
            })?;

        info!(uid = %entry.uid, next_counter = %next.counter_id, "Chain advanced");
        self.notifier
            .emit(TransitionEvent {
                uid: entry.uid.clone(),
                est_id: next.est_id.clone(),
                counter_id: next.counter_id.clone(),
                status: NotificationStatus::Waiting,
                chain_order: next.chain_order,
                message: format!("Please proceed to counter {} and check in", next.counter_id),
            })
            .await;
        Ok(next)
    }

    pub async fn get(&self, queue_key: &QueueKey) -> FlowResult<ActiveQueueEntry> {
        self.queue
            .record(&queue_key.storage_key())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("queue entry {}", queue_key)))
    }

    /// Waiting patients at a counter in admission order.
    pub async fn waiting(&self, counter_id: &CounterId) -> FlowResult<Vec<ActiveQueueEntry>> {
        Ok(self.queue.records(&waiting_at(counter_id)).await?)
    }

    /// Patients currently being served at a counter.
    pub async fn in_service(&self, counter_id: &CounterId) -> FlowResult<Vec<ActiveQueueEntry>> {
        Ok(self
            .queue
            .records(
                &Query::new()
                    .filter("counterId", counter_id.as_str())
                    .filter("state", QueueState::InService.as_str())
                    .order_by("admittedAt", SortOrder::Ascending),
            )
            .await?)
    }

    /// Every queue entry a patient has had, oldest first.
    pub async fn history_for(&self, uid: &PatientId) -> FlowResult<Vec<ActiveQueueEntry>> {
        Ok(self
            .queue
            .records(
                &Query::new()
                    .filter("uid", uid.as_str())
                    .order_by("arrivedAt", SortOrder::Ascending),
            )
            .await?)
    }
}

fn waiting_at(counter_id: &CounterId) -> Query {
    Query::new()
        .filter("counterId", counter_id.as_str())
        .filter("state", QueueState::Waiting.as_str())
        .order_by("arrivedAt", SortOrder::Ascending)
}
