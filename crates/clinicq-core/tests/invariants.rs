mod common;

use clinicq_core::{ClinicFlow, FlowError};
use clinicq_store::{Collection, Query};
use clinicq_types::{ArrivalMethod, CounterId, PatientId, QueueKey, QueueState};
use common::{flow, pin_of, COUNTERS};
use proptest::prelude::*;
use std::collections::HashMap;

const PATIENTS: usize = 3;

#[derive(Debug, Clone)]
enum FlowOp {
    Submit { patient: usize, counter: usize },
    Accept(usize),
    Reject(usize),
    Scan { patient: usize, counter: usize },
    Admit(usize),
    End(usize),
    Revoke(usize),
}

fn op_strategy() -> impl Strategy<Value = Vec<FlowOp>> {
    proptest::collection::vec(
        prop_oneof![
            3 => (0..PATIENTS, 0..COUNTERS.len())
                .prop_map(|(patient, counter)| FlowOp::Submit { patient, counter }),
            3 => any::<usize>().prop_map(FlowOp::Accept),
            1 => any::<usize>().prop_map(FlowOp::Reject),
            3 => (0..PATIENTS, 0..COUNTERS.len())
                .prop_map(|(patient, counter)| FlowOp::Scan { patient, counter }),
            2 => (0..COUNTERS.len()).prop_map(FlowOp::Admit),
            2 => (0..COUNTERS.len()).prop_map(FlowOp::End),
            1 => any::<usize>().prop_map(FlowOp::Revoke),
        ],
        0..40,
    )
}

fn patient(n: usize) -> PatientId {
    PatientId::new(format!("P{}", n + 1))
}

fn counter(n: usize) -> CounterId {
    CounterId::new(COUNTERS[n].0)
}

/// Errors the flow may legitimately return for an arbitrary operation.
fn assert_expected(result: Result<(), FlowError>) {
    match result {
        Ok(())
        | Err(FlowError::NoAuthorization { .. })
        | Err(FlowError::WrongCounter { .. })
        | Err(FlowError::AlreadyResolved { .. })
        | Err(FlowError::QueueEmpty { .. }) => {}
        Err(other) => panic!("unexpected error: {}", other),
    }
}

async fn apply(flow: &ClinicFlow, op: FlowOp) -> Result<(), FlowError> {
    match op {
        FlowOp::Submit { patient: p, counter: c } => {
            flow.ledger().submit(&patient(p), &counter(c)).await?;
        }
        FlowOp::Accept(i) | FlowOp::Reject(i) => {
            let mut pending = Vec::new();
            for c in 0..COUNTERS.len() {
                pending.extend(flow.ledger().pending_for_counter(&counter(c)).await?);
            }
            if pending.is_empty() {
                return Ok(());
            }
            let request_key = pending[i % pending.len()].request_key;
            if matches!(op, FlowOp::Accept(_)) {
                flow.ledger().accept(&request_key).await?;
            } else {
                flow.ledger().reject(&request_key, "").await?;
            }
        }
        FlowOp::Scan { patient: p, counter: c } => {
            let uid = patient(p);
            flow.verifier()
                .verify_arrival(&uid, &counter(c), ArrivalMethod::Rfid)
                .await?;
            flow.verifier().submit_pin(&uid, &pin_of(&uid)).await?;
        }
        FlowOp::Admit(c) => {
            flow.queue().admit_next(&counter(c)).await?;
        }
        FlowOp::End(c) => {
            if let Some(entry) = flow.queue().in_service(&counter(c)).await?.first() {
                flow.queue().end_service(&entry.queue_key).await?;
            }
        }
        FlowOp::Revoke(i) => {
            // Accepted steps that were never admitted.
            let mut revocable = Vec::new();
            for p in 0..PATIENTS {
                let uid = patient(p);
                let admitted: Vec<_> = flow
                    .queue()
                    .history_for(&uid)
                    .await?
                    .into_iter()
                    .map(|q| q.request_key)
                    .collect();
                revocable.extend(
                    flow.ledger()
                        .list_for_patient(&uid)
                        .await?
                        .into_iter()
                        .filter(|r| r.is_accepted() && !admitted.contains(&r.request_key)),
                );
            }
            if revocable.is_empty() {
                return Ok(());
            }
            let request = &revocable[i % revocable.len()];
            flow.planner().revoke(&request.uid, &request.request_key).await?;
        }
    }
    Ok(())
}

/// Queue entries per patient in the order the test observed their creation.
/// Every operation admits at most one patient, so observation order is
/// creation order even when arrival timestamps collide.
type Admissions = HashMap<PatientId, Vec<(QueueKey, u32)>>;

async fn check_invariants(flow: &ClinicFlow, admissions: &mut Admissions) {
    let store = flow.store();
    for p in 0..PATIENTS {
        let uid = patient(p);

        let entries = store
            .query(Collection::ArrivalIndex, &Query::new().filter("uid", uid.as_str()))
            .await
            .unwrap();
        assert!(entries.len() <= 1, "{} holds {} authorizations", uid, entries.len());

        let history = flow.queue().history_for(&uid).await.unwrap();
        let open = history.iter().filter(|q| q.state != QueueState::Completed).count();
        assert!(open <= 1, "{} is queued {} times", uid, open);
        assert!(
            entries.is_empty() || open == 0,
            "{} is authorized while still queued",
            uid
        );

        let mut orders = flow.planner().snapshot(&uid).await.unwrap().open_orders();
        orders.sort_unstable();
        let total = orders.len();
        orders.dedup();
        assert_eq!(orders.len(), total, "{} has duplicate open chain orders", uid);

        let seen = admissions.entry(uid.clone()).or_default();
        let new: Vec<_> = history
            .iter()
            .filter(|q| !seen.iter().any(|(key, _)| key == &q.queue_key))
            .collect();
        assert!(new.len() <= 1, "{} admitted {} times in one step", uid, new.len());
        seen.extend(new.into_iter().map(|q| (q.queue_key, q.chain_order)));

        // Each chain starts at 0 and increases by one.
        let mut previous: Option<u32> = None;
        for (_, order) in seen.iter() {
            match previous {
                Some(prev) if *order == prev + 1 => {}
                _ => assert_eq!(*order, 0, "{} chain orders {:?}", uid, seen),
            }
            previous = Some(*order);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn property_single_authorization_and_ordered_chains(ops in op_strategy()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        rt.block_on(async move {
            let flow = flow(PATIENTS).await;
            let mut admissions = Admissions::new();
            for op in ops {
                assert_expected(apply(&flow, op).await);
                check_invariants(&flow, &mut admissions).await;
            }
        });
    }
}
