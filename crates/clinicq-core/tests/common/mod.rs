#![allow(dead_code)]

use clinicq_core::{ClinicFlow, FlowConfig, RetryPolicy};
use clinicq_store::memory::InMemoryDocumentStore;
use clinicq_store::{DocumentStore, QueryWindow};
use clinicq_types::{
    ActiveQueueEntry, ArrivalMethod, CounterId, EstablishmentId, Notification,
    NotificationStatus, PatientId, RequestKey,
};
use std::sync::Arc;

pub const COUNTERS: [(&str, &str); 3] = [("C1", "Triage"), ("C2", "Lab"), ("C3", "Pharmacy")];

pub fn pin_of(uid: &PatientId) -> String {
    format!("{:0>4}", uid.as_str().trim_start_matches('P'))
}

pub fn test_config() -> FlowConfig {
    FlowConfig {
        queue_write_retry: RetryPolicy::new(5, 1, 5, 0.0),
        ..FlowConfig::default()
    }
}

/// A flow with establishment E1, counters C1-C3 and patients P1..=P{patients}.
/// Patient `Pn` has PIN `n` zero-padded to four digits.
pub async fn flow_over(store: Arc<dyn DocumentStore>, patients: usize) -> ClinicFlow {
    let flow = ClinicFlow::new(store, test_config());
    let dir = flow.directory();
    dir.register_establishment(EstablishmentId::new("E1"), "North Clinic")
        .await
        .unwrap();
    for (id, name) in COUNTERS {
        dir.register_counter(CounterId::new(id), EstablishmentId::new("E1"), name)
            .await
            .unwrap();
    }
    for n in 1..=patients {
        let uid = PatientId::new(format!("P{}", n));
        let pin = pin_of(&uid);
        dir.register_patient(uid, format!("Patient {}", n), &pin)
            .await
            .unwrap();
    }
    flow
}

pub async fn flow(patients: usize) -> ClinicFlow {
    flow_over(Arc::new(InMemoryDocumentStore::new()), patients).await
}

/// Submit and accept a request; returns its key.
pub async fn accepted(flow: &ClinicFlow, uid: &PatientId, counter: &str) -> RequestKey {
    let request = flow
        .ledger()
        .submit(uid, &CounterId::new(counter))
        .await
        .unwrap();
    flow.ledger().accept(&request.request_key).await.unwrap();
    request.request_key
}

/// Scan at `counter` and enter the right PIN.
pub async fn check_in(flow: &ClinicFlow, uid: &PatientId, counter: &str) -> ActiveQueueEntry {
    flow.verifier()
        .verify_arrival(uid, &CounterId::new(counter), ArrivalMethod::Rfid)
        .await
        .unwrap();
    flow.verifier().submit_pin(uid, &pin_of(uid)).await.unwrap()
}

pub async fn mailbox(flow: &ClinicFlow, uid: &PatientId) -> Vec<Notification> {
    flow.mailbox()
        .mailbox(uid, QueryWindow::default())
        .await
        .unwrap()
}

pub async fn count_status(flow: &ClinicFlow, uid: &PatientId, status: NotificationStatus) -> usize {
    mailbox(flow, uid)
        .await
        .iter()
        .filter(|n| n.status == status)
        .count()
}
