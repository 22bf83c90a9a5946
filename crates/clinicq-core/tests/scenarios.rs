mod common;

use clinicq_core::{EndServiceOutcome, FlowError};
use clinicq_types::{
    ArrivalMethod, CounterId, EstablishmentId, NotificationStatus, PatientId, QueueState,
    RequestKey, RequestState,
};
use common::{accepted, check_in, count_status, flow, mailbox, pin_of};
use std::time::Duration;

#[tokio::test]
async fn no_entry_means_no_authorization() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");

    let consumed = flow.planner().consume_on_arrival(&uid).await;
    assert!(matches!(consumed, Err(FlowError::NoAuthorization { .. })));

    let scanned = flow
        .verifier()
        .verify_arrival(&uid, &CounterId::new("C1"), ArrivalMethod::Rfid)
        .await;
    assert!(matches!(scanned, Err(FlowError::NoAuthorization { .. })));
}

#[tokio::test]
async fn scan_at_wrong_counter_creates_no_queue_entry() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    flow.planner()
        .advance(
            &uid,
            &CounterId::new("C1"),
            &EstablishmentId::new("E1"),
            RequestKey::generate(),
            0,
        )
        .await
        .unwrap();

    let result = flow
        .verifier()
        .verify_arrival(&uid, &CounterId::new("C2"), ArrivalMethod::Rfid)
        .await;
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "wrong counter, expected C1");

    assert!(flow.queue().history_for(&uid).await.unwrap().is_empty());
    assert!(flow.verifier().arrivals_for(&uid).await.unwrap().is_empty());
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());
}

#[tokio::test]
async fn verified_arrival_is_recorded_and_queued_once() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    let authorization = flow
        .planner()
        .advance(
            &uid,
            &CounterId::new("C1"),
            &EstablishmentId::new("E1"),
            RequestKey::generate(),
            0,
        )
        .await
        .unwrap();

    let queued = check_in(&flow, &uid, "C1").await;
    assert_eq!(queued.state, QueueState::Waiting);
    assert_eq!(queued.chain_order, 0);

    let records = flow.verifier().arrivals_for(&uid).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].awaiting_key, authorization.awaiting_key);
    assert_eq!(records[0].method, ArrivalMethod::Rfid);

    let history = flow.queue().history_for(&uid).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(count_status(&flow, &uid, NotificationStatus::Waiting).await, 1);
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());
}

#[tokio::test]
async fn two_step_chain_advances_then_completes() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    accepted(&flow, &uid, "C1").await;
    accepted(&flow, &uid, "C2").await;

    let first = check_in(&flow, &uid, "C1").await;
    flow.queue().admit_next(&CounterId::new("C1")).await.unwrap();
    let outcome = flow.queue().end_service(&first.queue_key).await.unwrap();
    let next = match outcome {
        EndServiceOutcome::Advanced { next, .. } => next,
        other => panic!("expected chain advance, got {:?}", other),
    };
    assert_eq!(next.counter_id.as_str(), "C2");
    assert_eq!(next.chain_order, 1);

    let current = flow.planner().lookup_authorization(&uid).await.unwrap().unwrap();
    assert_eq!(current.awaiting_key, next.awaiting_key);

    let second = check_in(&flow, &uid, "C2").await;
    assert_eq!(second.chain_order, 1);
    flow.queue().admit_next(&CounterId::new("C2")).await.unwrap();
    let outcome = flow.queue().end_service(&second.queue_key).await.unwrap();
    assert!(matches!(outcome, EndServiceOutcome::ChainCompleted(_)));

    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());
    assert_eq!(flow.planner().chain_history(&uid).await.unwrap(), vec![0, 1]);

    let last = mailbox(&flow, &uid).await.pop().unwrap();
    assert_eq!(last.status, NotificationStatus::Completed);
    assert_eq!(last.counter_name, "Lab");
    assert_eq!(last.est_name, "North Clinic");
}

#[tokio::test]
async fn accepting_twice_is_already_resolved() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    let request_key = accepted(&flow, &uid, "C1").await;
    let before = flow.planner().lookup_authorization(&uid).await.unwrap().unwrap();

    let again = flow.ledger().accept(&request_key).await;
    assert!(matches!(
        again,
        Err(FlowError::AlreadyResolved {
            state: RequestState::Accepted,
            ..
        })
    ));

    let after = flow.planner().lookup_authorization(&uid).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(
        flow.planner()
            .awaiting_at(&CounterId::new("C1"))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn end_service_twice_advances_once() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    accepted(&flow, &uid, "C1").await;
    accepted(&flow, &uid, "C2").await;
    let entry = check_in(&flow, &uid, "C1").await;
    flow.queue().admit_next(&CounterId::new("C1")).await.unwrap();

    let first = flow.queue().end_service(&entry.queue_key).await.unwrap();
    let notifications = mailbox(&flow, &uid).await.len();
    let second = flow.queue().end_service(&entry.queue_key).await.unwrap();

    let next = match first {
        EndServiceOutcome::Advanced { next, .. } => next,
        other => panic!("expected chain advance, got {:?}", other),
    };
    assert!(matches!(second, EndServiceOutcome::AlreadyCompleted(_)));
    assert_eq!(mailbox(&flow, &uid).await.len(), notifications);

    let current = flow.planner().lookup_authorization(&uid).await.unwrap().unwrap();
    assert_eq!(current.awaiting_key, next.awaiting_key);
}

#[tokio::test]
async fn reissue_recovers_from_wrong_counter() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    let request_key = accepted(&flow, &uid, "C1").await;

    let wrong = flow
        .verifier()
        .verify_arrival(&uid, &CounterId::new("C3"), ArrivalMethod::Rfid)
        .await;
    assert!(matches!(wrong, Err(FlowError::WrongCounter { .. })));
    assert_eq!(count_status(&flow, &uid, NotificationStatus::Cancelled).await, 1);

    let reissued = flow.ledger().reissue(&request_key).await.unwrap();
    assert_eq!(reissued.counter_id.as_str(), "C1");

    let queued = check_in(&flow, &uid, "C1").await;
    assert_eq!(queued.request_key, request_key);
}

#[tokio::test]
async fn revoke_cancels_unconsumed_authorization() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    let request_key = accepted(&flow, &uid, "C1").await;

    let revoked = flow.planner().revoke(&uid, &request_key).await.unwrap();
    assert_eq!(revoked.request.state, RequestState::Cancelled);
    assert!(revoked.promoted.is_none());
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());
    assert_eq!(count_status(&flow, &uid, NotificationStatus::Cancelled).await, 1);

    let scan = flow
        .verifier()
        .verify_arrival(&uid, &CounterId::new("C1"), ArrivalMethod::Rfid)
        .await;
    assert!(matches!(scan, Err(FlowError::NoAuthorization { .. })));
}

#[tokio::test]
async fn rejection_notifies_without_side_effects() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    let request = flow
        .ledger()
        .submit(&uid, &CounterId::new("C2"))
        .await
        .unwrap();
    flow.ledger()
        .reject(&request.request_key, "lab closed")
        .await
        .unwrap();

    let notes = mailbox(&flow, &uid).await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].status, NotificationStatus::Rejected);
    assert!(notes[0].message.contains("lab closed"));
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn pin_window_lapses_and_authorization_returns() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    accepted(&flow, &uid, "C1").await;

    flow.verifier()
        .verify_arrival(&uid, &CounterId::new("C1"), ArrivalMethod::ManualPin)
        .await
        .unwrap();

    // A failed attempt reopens the window.
    tokio::time::advance(Duration::from_secs(10)).await;
    let wrong = flow.verifier().submit_pin(&uid, "9999").await;
    assert!(matches!(wrong, Err(FlowError::VerificationFailed { .. })));
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(flow.verifier().pending(&uid).is_some());

    tokio::time::advance(Duration::from_secs(10)).await;
    let late = flow.verifier().submit_pin(&uid, &pin_of(&uid)).await;
    assert!(matches!(late, Err(FlowError::VerificationExpired { .. })));
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_some());

    let queued = check_in(&flow, &uid, "C1").await;
    assert_eq!(queued.state, QueueState::Waiting);
}

#[tokio::test]
async fn notifications_are_broadcast() {
    let flow = flow(1).await;
    let mut events = flow.subscribe();
    let uid = PatientId::new("P1");
    accepted(&flow, &uid, "C1").await;

    let envelope = events.recv().await.unwrap();
    assert_eq!(envelope.uid, uid);
    assert_eq!(envelope.notification.status, NotificationStatus::AwaitingArrival);
    assert_eq!(envelope.notification.counter_name, "Triage");
}

#[tokio::test]
async fn counter_views_follow_the_store() {
    let flow = flow(2).await;
    let counter = CounterId::new("C1");
    let mut awaiting = flow.watch_awaiting(&counter);
    let mut queue = flow.watch_queue(&counter);

    let uid = PatientId::new("P2");
    accepted(&flow, &uid, "C1").await;
    let inserted = awaiting.recv().await.unwrap();
    assert_eq!(inserted.key, "P2");

    check_in(&flow, &uid, "C1").await;
    // The authorization leaves the awaiting view when consumed.
    let removed = awaiting.recv().await.unwrap();
    assert!(removed.document.is_none());

    let queued = queue.recv().await.unwrap();
    assert!(queued.document.is_some());
    assert_eq!(flow.queue().waiting(&counter).await.unwrap().len(), 1);
}

#[tokio::test]
async fn accept_after_revoke_starts_a_new_chain() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    let revoked_key = accepted(&flow, &uid, "C1").await;
    flow.planner().revoke(&uid, &revoked_key).await.unwrap();
    assert_eq!(flow.planner().next_chain_order(&uid).await.unwrap(), 0);

    let request = flow
        .ledger()
        .submit(&uid, &CounterId::new("C2"))
        .await
        .unwrap();
    let acceptance = flow.ledger().accept(&request.request_key).await.unwrap();
    assert_eq!(acceptance.chain_order(), 0);
    let authorization = acceptance.authorization.unwrap();
    assert_eq!(authorization.counter_id.as_str(), "C2");

    let queued = check_in(&flow, &uid, "C2").await;
    assert_eq!(queued.chain_order, 0);
}

#[tokio::test]
async fn revoking_a_planned_step_keeps_the_chain_contiguous() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    accepted(&flow, &uid, "C1").await;
    let dropped = accepted(&flow, &uid, "C2").await;

    let revoked = flow.planner().revoke(&uid, &dropped).await.unwrap();
    assert!(revoked.authorization.is_none());
    assert!(revoked.promoted.is_none());

    let request = flow
        .ledger()
        .submit(&uid, &CounterId::new("C3"))
        .await
        .unwrap();
    let acceptance = flow.ledger().accept(&request.request_key).await.unwrap();
    assert_eq!(acceptance.chain_order(), 1);

    let first = check_in(&flow, &uid, "C1").await;
    flow.queue().admit_next(&CounterId::new("C1")).await.unwrap();
    let next = match flow.queue().end_service(&first.queue_key).await.unwrap() {
        EndServiceOutcome::Advanced { next, .. } => next,
        other => panic!("expected chain advance, got {:?}", other),
    };
    assert_eq!(next.counter_id.as_str(), "C3");
    assert_eq!(next.chain_order, 1);
}

#[tokio::test]
async fn revoking_the_live_step_moves_the_patient_on() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    let head = accepted(&flow, &uid, "C1").await;
    let second = accepted(&flow, &uid, "C2").await;

    let revoked = flow.planner().revoke(&uid, &head).await.unwrap();
    let promoted = revoked.promoted.unwrap();
    assert_eq!(promoted.request_key, second);
    assert_eq!(promoted.chain_order, 0);
    assert_eq!(
        flow.ledger().get(&second).await.unwrap().chain_order,
        Some(0)
    );

    let queued = check_in(&flow, &uid, "C2").await;
    assert_eq!(queued.chain_order, 0);
    flow.queue().admit_next(&CounterId::new("C2")).await.unwrap();
    let outcome = flow.queue().end_service(&queued.queue_key).await.unwrap();
    assert!(matches!(outcome, EndServiceOutcome::ChainCompleted(_)));
}

#[tokio::test]
async fn revoke_refuses_admitted_and_foreign_steps() {
    let flow = flow(2).await;
    let uid = PatientId::new("P1");
    let request_key = accepted(&flow, &uid, "C1").await;

    let foreign = flow.planner().revoke(&PatientId::new("P2"), &request_key).await;
    assert!(matches!(foreign, Err(FlowError::InvalidState(_))));

    flow.verifier()
        .verify_arrival(&uid, &CounterId::new("C1"), ArrivalMethod::Rfid)
        .await
        .unwrap();
    let checking_in = flow.planner().revoke(&uid, &request_key).await;
    assert!(matches!(checking_in, Err(FlowError::InvalidState(_))));

    flow.verifier().submit_pin(&uid, &pin_of(&uid)).await.unwrap();
    let admitted = flow.planner().revoke(&uid, &request_key).await;
    assert!(matches!(admitted, Err(FlowError::InvalidState(_))));
    assert_eq!(
        flow.ledger().get(&request_key).await.unwrap().state,
        RequestState::Accepted
    );
}

#[tokio::test]
async fn accept_during_pin_window_waits_behind_the_arrival() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    accepted(&flow, &uid, "C1").await;
    flow.verifier()
        .verify_arrival(&uid, &CounterId::new("C1"), ArrivalMethod::Rfid)
        .await
        .unwrap();
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());

    let request = flow
        .ledger()
        .submit(&uid, &CounterId::new("C2"))
        .await
        .unwrap();
    let acceptance = flow.ledger().accept(&request.request_key).await.unwrap();
    assert_eq!(acceptance.chain_order(), 1);
    assert!(acceptance.authorization.is_none());
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());

    let first = flow.verifier().submit_pin(&uid, &pin_of(&uid)).await.unwrap();
    flow.queue().admit_next(&CounterId::new("C1")).await.unwrap();
    let next = match flow.queue().end_service(&first.queue_key).await.unwrap() {
        EndServiceOutcome::Advanced { next, .. } => next,
        other => panic!("expected chain advance, got {:?}", other),
    };
    assert_eq!(next.counter_id.as_str(), "C2");
    assert_eq!(next.chain_order, 1);
}

#[tokio::test]
async fn reissue_waits_for_a_pending_arrival() {
    let flow = flow(1).await;
    let uid = PatientId::new("P1");
    accepted(&flow, &uid, "C1").await;
    let lost = accepted(&flow, &uid, "C2").await;
    flow.verifier()
        .verify_arrival(&uid, &CounterId::new("C1"), ArrivalMethod::Rfid)
        .await
        .unwrap();

    let early = flow.ledger().reissue(&lost).await;
    assert!(matches!(early, Err(FlowError::InvalidState(_))));
    assert!(flow.planner().lookup_authorization(&uid).await.unwrap().is_none());
}
