//! Request Ledger - lifecycle of service requests.
//!
//! A request is created pending and resolved exactly once by staff. Both
//! resolutions are compare-and-set transitions out of `pending`, so two staff
//! members resolving the same request race on the store and the loser gets
//! [`FlowError::AlreadyResolved`]. Accepted requests stay in the ledger as the
//! audit trail the chain plan is reconstructed from.

use crate::directory::Directory;
use crate::error::{FlowError, FlowResult};
use crate::notify::NotificationFanout;
use crate::planner::ChainPlanner;
use crate::table::{Table, Versioned};
use chrono::Utc;
use clinicq_store::{Collection, DocumentStore, Query, SortOrder, StoreError};
use clinicq_types::{
    ArrivalIndexEntry, CounterId, NotificationStatus, PatientId, RequestKey, RequestState,
    ServiceRequest, TransitionEvent,
};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Result of accepting a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    pub request: ServiceRequest,
    /// The authorization created for the request. `None` when the request was
    /// queued behind the patient's open chain as a planned step.
    pub authorization: Option<ArrivalIndexEntry>,
}

impl Acceptance {
    pub fn chain_order(&self) -> u32 {
        self.request.chain_order.unwrap_or_default()
    }
}

pub struct RequestLedger {
    requests: Table<ServiceRequest>,
    directory: Directory,
    planner: Arc<ChainPlanner>,
    notifier: Arc<NotificationFanout>,
    cas_max_attempts: u32,
}

impl RequestLedger {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        directory: Directory,
        planner: Arc<ChainPlanner>,
        notifier: Arc<NotificationFanout>,
        cas_max_attempts: u32,
    ) -> Self {
        Self {
            requests: Table::new(store, Collection::Requests),
            directory,
            planner,
            notifier,
            cas_max_attempts: cas_max_attempts.max(1),
        }
    }

    /// Record a patient's request for service at a counter.
    #[instrument(skip(self), fields(uid = %uid, counter_id = %counter_id))]
    pub async fn submit(&self, uid: &PatientId, counter_id: &CounterId) -> FlowResult<ServiceRequest> {
        self.directory.patient(uid).await?;
        let counter = self.directory.counter(counter_id).await?;

        let request = ServiceRequest::new(uid.clone(), counter.counter_id, counter.est_id);
        self.requests
            .insert(&request.request_key.storage_key(), &request)
            .await?;
        info!(request_key = %request.request_key, "Service request submitted");
        Ok(request)
    }

    pub async fn get(&self, request_key: &RequestKey) -> FlowResult<ServiceRequest> {
        Ok(self.load(request_key).await?.record)
    }

    /// A patient's requests, oldest first.
    pub async fn list_for_patient(&self, uid: &PatientId) -> FlowResult<Vec<ServiceRequest>> {
        Ok(self
            .requests
            .records(
                &Query::new()
                    .filter("uid", uid.as_str())
                    .order_by("createdAt", SortOrder::Ascending),
            )
            .await?)
    }

    /// Requests at a counter still waiting for a staff decision, oldest first.
    pub async fn pending_for_counter(&self, counter_id: &CounterId) -> FlowResult<Vec<ServiceRequest>> {
        Ok(self
            .requests
            .records(
                &Query::new()
                    .filter("counterId", counter_id.as_str())
                    .filter("state", RequestState::Pending.as_str())
                    .order_by("createdAt", SortOrder::Ascending),
            )
            .await?)
    }

    /// Accept a pending request and place it in the patient's chain.
    ///
    /// With no open chain the request becomes step 0 and is authorized at
    /// once. Otherwise it is appended after the highest open step and
    /// authorized when the preceding step completes.
    #[instrument(skip(self), fields(request_key = %request_key))]
    pub async fn accept(&self, request_key: &RequestKey) -> FlowResult<Acceptance> {
        let uid = self.load(request_key).await?.record.uid;
        let _chain = self.planner.lock_chain(&uid).await;

        let (pending, accepted) = self
            .resolve(request_key, true, |request, next_order| {
                request.state = RequestState::Accepted;
                request.chain_order = Some(next_order);
            })
            .await?;
        let chain_order = accepted.record.chain_order.unwrap_or_default();
        let request = accepted.record.clone();

        if chain_order > 0 {
            info!(uid = %request.uid, chain_order, "Request accepted as planned chain step");
            self.notifier
                .emit(TransitionEvent {
                    uid: request.uid.clone(),
                    est_id: request.est_id.clone(),
                    counter_id: request.counter_id.clone(),
                    status: NotificationStatus::Waiting,
                    chain_order,
                    message: format!(
                        "Request accepted. Counter {} is step {} of your visit",
                        request.counter_id,
                        chain_order + 1
                    ),
                })
                .await;
            return Ok(Acceptance {
                request,
                authorization: None,
            });
        }

        let entry = match self
            .planner
            .advance(
                &request.uid,
                &request.counter_id,
                &request.est_id,
                request.request_key,
                0,
            )
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                self.revert(request_key, accepted.version, &pending).await;
                return Err(err);
            }
        };

        info!(uid = %request.uid, awaiting_key = %entry.awaiting_key, "Request accepted");
        self.notifier
            .emit(TransitionEvent {
                uid: request.uid.clone(),
                est_id: request.est_id.clone(),
                counter_id: request.counter_id.clone(),
                status: NotificationStatus::AwaitingArrival,
                chain_order: 0,
                message: format!("Please proceed to counter {} and check in", request.counter_id),
            })
            .await;
        Ok(Acceptance {
            request,
            authorization: Some(entry),
        })
    }

    /// Reject a pending request. No authorization or queue side effects.
    #[instrument(skip(self, reason), fields(request_key = %request_key))]
    pub async fn reject(&self, request_key: &RequestKey, reason: &str) -> FlowResult<ServiceRequest> {
        let reason = reason.trim().to_string();
        let (_, rejected) = self
            .resolve(request_key, false, |request, _| {
                request.state = RequestState::Rejected;
                request.reason = (!reason.is_empty()).then(|| reason.clone());
            })
            .await?;
        let request = rejected.record;

        info!(uid = %request.uid, "Request rejected");
        let message = match &request.reason {
            Some(reason) => format!("Your request at counter {} was declined: {}", request.counter_id, reason),
            None => format!("Your request at counter {} was declined", request.counter_id),
        };
        self.notifier
            .emit(TransitionEvent {
                uid: request.uid.clone(),
                est_id: request.est_id.clone(),
                counter_id: request.counter_id.clone(),
                status: NotificationStatus::Rejected,
                chain_order: 0,
                message,
            })
            .await;
        Ok(request)
    }

    /// Re-issue the authorization of an accepted request whose step was lost,
    /// e.g. after a scan at the wrong counter consumed it.
    #[instrument(skip(self), fields(request_key = %request_key))]
    pub async fn reissue(&self, request_key: &RequestKey) -> FlowResult<ArrivalIndexEntry> {
        let uid = self.load(request_key).await?.record.uid;
        let _chain = self.planner.lock_chain(&uid).await;

        let request = self.get(request_key).await?;
        let chain_order = match (request.state, request.chain_order) {
            (RequestState::Accepted, Some(order)) => order,
            _ => {
                return Err(FlowError::InvalidState(format!(
                    "request {} is {}, only accepted requests can be re-issued",
                    request_key, request.state
                )))
            }
        };

        let snapshot = self.planner.snapshot(&request.uid).await?;
        if snapshot.is_materialized(request_key) {
            return Err(FlowError::InvalidState(format!(
                "request {} is already authorized or admitted",
                request_key
            )));
        }
        if snapshot.has_active_step() {
            return Err(FlowError::InvalidState(format!(
                "{} is still authorized or queued for an earlier step",
                request.uid
            )));
        }
        if snapshot
            .planned()
            .any(|r| r.chain_order.is_some_and(|order| order < chain_order))
        {
            return Err(FlowError::InvalidState(format!(
                "an earlier step of {}'s chain is still planned",
                request.uid
            )));
        }

        let entry = self
            .planner
            .advance(
                &request.uid,
                &request.counter_id,
                &request.est_id,
                request.request_key,
                chain_order,
            )
            .await?;

        info!(uid = %request.uid, chain_order, "Authorization re-issued");
        self.notifier
            .emit(TransitionEvent {
                uid: request.uid.clone(),
                est_id: request.est_id.clone(),
                counter_id: request.counter_id.clone(),
                status: NotificationStatus::AwaitingArrival,
                chain_order,
                message: format!("Please proceed to counter {} and check in", request.counter_id),
            })
            .await;
        Ok(entry)
    }

    async fn load(&self, request_key: &RequestKey) -> FlowResult<Versioned<ServiceRequest>> {
        self.requests
            .get(&request_key.storage_key())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("request {}", request_key)))
    }

    /// Compare-and-set a pending request into its resolved state.
    ///
    /// With `plan` set, `apply` receives the chain order the patient's next
    /// step would get. Returns the request as read and as written.
    async fn resolve<F>(
        &self,
        request_key: &RequestKey,
        plan: bool,
        mut apply: F,
    ) -> FlowResult<(ServiceRequest, Versioned<ServiceRequest>)>
    where
        F: FnMut(&mut ServiceRequest, u32),
    {
        let key = request_key.storage_key();
        for _ in 0..self.cas_max_attempts {
            let current = self.load(request_key).await?;
            if !current.record.is_pending() {
                return Err(FlowError::AlreadyResolved {
                    request_key: *request_key,
                    state: current.record.state,
                });
            }

            let next_order = if plan {
                self.planner.next_chain_order(&current.record.uid).await?
            } else {
                0
            };
            let mut next = current.record.clone();
            apply(&mut next, next_order);
            next.resolved_at = Some(Utc::now());

            match self.requests.replace(&key, current.version, &next).await {
                Ok(version) => {
                    return Ok((
                        current.record,
                        Versioned {
                            version,
                            record: next,
                        },
                    ))
                }
                Err(StoreError::PreconditionFailed(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Contention(format!("resolution of request {}", request_key)).into())
    }

    /// Put an accepted request back to pending after its authorization could
    /// not be created.
    async fn revert(&self, request_key: &RequestKey, version: u64, pending: &ServiceRequest) {
        match self
            .requests
            .replace(&request_key.storage_key(), version, pending)
            .await
        {
            Ok(_) => info!(request_key = %request_key, "Acceptance rolled back"),
            Err(err) => error!(
                request_key = %request_key,
                error = %err,
                "Failed to roll back acceptance; request needs re-issue"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MailboxSink;
    use clinicq_store::memory::InMemoryDocumentStore;
    use clinicq_types::EstablishmentId;

    struct Fixture {
        ledger: RequestLedger,
        planner: Arc<ChainPlanner>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let directory = Directory::new(Arc::clone(&store));
        directory
            .register_establishment(EstablishmentId::new("E1"), "North")
            .await
            .unwrap();
        for (id, name) in [("C1", "Triage"), ("C2", "Lab")] {
            directory
                .register_counter(CounterId::new(id), EstablishmentId::new("E1"), name)
                .await
                .unwrap();
        }
        directory
            .register_patient(PatientId::new("P1"), "Ada", "1234")
            .await
            .unwrap();

        let notifier = Arc::new(NotificationFanout::new(
            Arc::new(MailboxSink::new(Arc::clone(&store))),
            directory.clone(),
            16,
        ));
        let planner = Arc::new(ChainPlanner::new(
            Arc::clone(&store),
            directory.clone(),
            Arc::clone(&notifier),
            8,
        ));
        let ledger = RequestLedger::new(store, directory, Arc::clone(&planner), notifier, 8);
        Fixture { ledger, planner }
    }

    #[tokio::test]
    async fn submit_resolves_establishment() {
        let fx = fixture().await;
        let request = fx
            .ledger
            .submit(&PatientId::new("P1"), &CounterId::new("C1"))
            .await
            .unwrap();
        assert!(request.is_pending());
        assert_eq!(request.est_id.as_str(), "E1");
        assert_eq!(
            fx.ledger.pending_for_counter(&CounterId::new("C1")).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn submit_unknown_counter_is_not_found() {
        let fx = fixture().await;
        let result = fx
            .ledger
            .submit(&PatientId::new("P1"), &CounterId::new("C9"))
            .await;
        assert!(matches!(result, Err(FlowError::NotFound(_))));
    }

    #[tokio::test]
    async fn first_accept_authorizes_second_is_planned() {
        let fx = fixture().await;
        let uid = PatientId::new("P1");
        let first = fx.ledger.submit(&uid, &CounterId::new("C1")).await.unwrap();
        let second = fx.ledger.submit(&uid, &CounterId::new("C2")).await.unwrap();

        let a = fx.ledger.accept(&first.request_key).await.unwrap();
        assert_eq!(a.chain_order(), 0);
        assert!(a.authorization.is_some());

        let b = fx.ledger.accept(&second.request_key).await.unwrap();
        assert_eq!(b.chain_order(), 1);
        assert!(b.authorization.is_none());

        let entry = fx.planner.lookup_authorization(&uid).await.unwrap().unwrap();
        assert_eq!(entry.counter_id.as_str(), "C1");
    }

    #[tokio::test]
    async fn reject_then_accept_is_already_resolved() {
        let fx = fixture().await;
        let request = fx
            .ledger
            .submit(&PatientId::new("P1"), &CounterId::new("C1"))
            .await
            .unwrap();
        let rejected = fx.ledger.reject(&request.request_key, "closed").await.unwrap();
        assert_eq!(rejected.reason.as_deref(), Some("closed"));

        let again = fx.ledger.accept(&request.request_key).await;
        assert!(matches!(
            again,
            Err(FlowError::AlreadyResolved { state: RequestState::Rejected, .. })
        ));
        assert!(fx
            .planner
            .lookup_authorization(&PatientId::new("P1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reissue_after_lost_authorization() {
        let fx = fixture().await;
        let uid = PatientId::new("P1");
        let request = fx.ledger.submit(&uid, &CounterId::new("C1")).await.unwrap();
        fx.ledger.accept(&request.request_key).await.unwrap();

        let already = fx.ledger.reissue(&request.request_key).await;
        assert!(matches!(already, Err(FlowError::InvalidState(_))));

        fx.planner.consume_on_arrival(&uid).await.unwrap();
        let entry = fx.ledger.reissue(&request.request_key).await.unwrap();
        assert_eq!(entry.chain_order, 0);
        assert_eq!(entry.counter_id.as_str(), "C1");
    }
}
