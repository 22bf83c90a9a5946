//! `ClinicFlow` - wires the components over one store.

use crate::config::FlowConfig;
use crate::directory::Directory;
use crate::ledger::RequestLedger;
use crate::notify::{MailboxSink, NotificationEnvelope, NotificationFanout};
use crate::planner::ChainPlanner;
use crate::queue::ActiveQueueManager;
use crate::verifier::ArrivalVerifier;
use clinicq_store::memory::InMemoryDocumentStore;
use clinicq_store::{Collection, DocumentStore, FieldFilter, Watch};
use clinicq_types::CounterId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// The patient-flow core.
///
/// Components hold `Arc`s to each other and to the store; a `ClinicFlow` is
/// cheap to share behind an `Arc` across request handlers.
pub struct ClinicFlow {
    store: Arc<dyn DocumentStore>,
    config: FlowConfig,
    directory: Directory,
    mailbox: Arc<MailboxSink>,
    notifier: Arc<NotificationFanout>,
    planner: Arc<ChainPlanner>,
    ledger: RequestLedger,
    verifier: ArrivalVerifier,
    queue: ActiveQueueManager,
}

impl ClinicFlow {
    pub fn new(store: Arc<dyn DocumentStore>, config: FlowConfig) -> Self {
        let directory = Directory::new(Arc::clone(&store));
        let mailbox = Arc::new(MailboxSink::new(Arc::clone(&store)));
        let notifier = Arc::new(NotificationFanout::new(
            Arc::clone(&mailbox) as _,
            directory.clone(),
            config.event_channel_capacity,
        )
        .with_delivery_timeout(config.notify_delivery_timeout()));
        let planner = Arc::new(ChainPlanner::new(
            Arc::clone(&store),
            directory.clone(),
            Arc::clone(&notifier),
            config.cas_max_attempts,
        ));
        let ledger = RequestLedger::new(
            Arc::clone(&store),
            directory.clone(),
            Arc::clone(&planner),
            Arc::clone(&notifier),
            config.cas_max_attempts,
        );
        let verifier = ArrivalVerifier::new(
            Arc::clone(&store),
            Arc::clone(&planner),
            directory.clone(),
            Arc::clone(&notifier),
            config.pin_attempt_timeout(),
            config.queue_write_retry.clone(),
        );
        let queue = ActiveQueueManager::new(
            Arc::clone(&store),
            Arc::clone(&planner),
            Arc::clone(&notifier),
            config.queue_write_retry.clone(),
            config.cas_max_attempts,
        );

        info!(
            pin_attempt_timeout_secs = config.pin_attempt_timeout_secs,
            cas_max_attempts = config.cas_max_attempts,
            "Clinic flow initialized"
        );

        Self {
            store,
            config,
            directory,
            mailbox,
            notifier,
            planner,
            ledger,
            verifier,
            queue,
        }
    }

    /// A flow over a fresh in-memory store.
    pub fn in_memory(config: FlowConfig) -> Self {
        Self::new(Arc::new(InMemoryDocumentStore::new()), config)
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    pub fn planner(&self) -> &ChainPlanner {
        &self.planner
    }

    pub fn verifier(&self) -> &ArrivalVerifier {
        &self.verifier
    }

    pub fn queue(&self) -> &ActiveQueueManager {
        &self.queue
    }

    pub fn mailbox(&self) -> &MailboxSink {
        &self.mailbox
    }

    /// Every notification emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.notifier.subscribe()
    }

    /// Changes to the authorizations of one counter.
    pub fn watch_awaiting(&self, counter_id: &CounterId) -> Watch {
        self.store.watch(
            Collection::ArrivalIndex,
            Some(FieldFilter::new("counterId", counter_id.as_str())),
        )
    }

    /// Changes to the queue of one counter.
    pub fn watch_queue(&self, counter_id: &CounterId) -> Watch {
        self.store.watch(
            Collection::ActiveQueue,
            Some(FieldFilter::new("counterId", counter_id.as_str())),
        )
    }
}
