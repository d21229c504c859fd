// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use super::*;
use crate::test_support::MockDriver;
use crate::transaction::TransactionRegistry;

fn msg(message_id: MessageId, session_id: SessionId, retries_left: u32) -> HostQueuedSend {
    HostQueuedSend {
        message_id,
        session_id,
        client_id: 1,
        requestor_id: 22,
        pub_sub_id: 15,
        dest_mac: [6, 7, 8, 9, 10, 11],
        payload: b"hi".to_vec(),
        retries_left,
    }
}

fn sent_tids(driver: &MockDriver) -> Vec<TransactionId> {
    driver
        .send_message_calls()
        .into_iter()
        .map(|c| match c {
            crate::test_support::DriverCall::SendMessage { tid, .. } => tid,
            _ => unreachable!(),
        })
        .collect()
}

#[test]
fn enqueue_dispatches_immediately_when_capacity_available() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(2, 256);

    let outcomes = queue.enqueue(msg(1, 7, 0), &mut registry, &driver);
    assert!(outcomes.is_empty());
    assert_eq!(queue.firmware_len(), 1);
    assert_eq!(queue.host_len(), 0);
    assert_eq!(driver.send_message_calls().len(), 1);
}

// With max-queue-depth = Q, submitting Q+k messages leaves at most Q in
// flight and the remainder parked in the host queue.
#[test]
fn queue_depth_boundary_is_respected() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(2, 256);

    for i in 0..5 {
        queue.enqueue(msg(i, 7, 0), &mut registry, &driver);
    }

    assert_eq!(queue.firmware_len(), 2);
    assert_eq!(queue.host_len(), 3);
    assert_eq!(driver.send_message_calls().len(), 2);
}

#[test]
fn scenario_s3_message_retry_success() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(2, 256);

    queue.enqueue(msg(6948, 7, 3), &mut registry, &driver);
    let tid0 = sent_tids(&driver)[0];
    assert!(queue.on_queued_success(tid0));

    let mut last_outcomes = Vec::new();
    let mut current_tid = tid0;
    for _ in 0..3 {
        last_outcomes = queue.on_tx_fail(current_tid, ReasonCode::TxFail, &mut registry, &driver);
        assert!(last_outcomes.is_empty(), "retry in progress, no terminal callback yet");
        current_tid = *sent_tids(&driver).last().unwrap();
    }

    let final_outcomes = queue.on_tx_success(current_tid, &mut registry, &driver);

    assert_eq!(driver.send_message_calls().len(), 4);
    assert_eq!(final_outcomes, vec![QueueOutcome::Success { session_id: 7, message_id: 6948 }]);
    assert!(queue.is_empty());
    assert!(!queue.is_timer_armed());
}

#[test]
fn scenario_s4_message_retry_exhaustion() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(2, 256);

    queue.enqueue(msg(6948, 7, 3), &mut registry, &driver);
    let mut current_tid = sent_tids(&driver)[0];
    assert!(queue.on_queued_success(current_tid));

    for _ in 0..3 {
        let outcomes = queue.on_tx_fail(current_tid, ReasonCode::TxFail, &mut registry, &driver);
        assert!(outcomes.is_empty());
        current_tid = *sent_tids(&driver).last().unwrap();
    }
    let final_outcomes = queue.on_tx_fail(current_tid, ReasonCode::TxFail, &mut registry, &driver);

    assert_eq!(driver.send_message_calls().len(), 4);
    assert_eq!(
        final_outcomes,
        vec![QueueOutcome::Fail { session_id: 7, message_id: 6948, reason: ReasonCode::TxFail }]
    );
    assert!(queue.is_empty());
}

#[test]
fn queued_fail_reports_failure_and_drains_next_message() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(1, 256);

    queue.enqueue(msg(1, 7, 0), &mut registry, &driver);
    queue.enqueue(msg(2, 7, 0), &mut registry, &driver); // parked, capacity 1
    assert_eq!(queue.host_len(), 1);

    let tid0 = sent_tids(&driver)[0];
    let outcomes = queue.on_queued_fail(tid0, ReasonCode::NoResources, &mut registry, &driver);

    assert_eq!(outcomes, vec![QueueOutcome::Fail { session_id: 7, message_id: 1, reason: ReasonCode::NoResources }]);
    // The freed slot immediately drains the parked message.
    assert_eq!(queue.host_len(), 0);
    assert_eq!(queue.firmware_len(), 1);
    assert_eq!(driver.send_message_calls().len(), 2);
}

#[test]
fn send_timeout_fails_whole_batch_and_disarms() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(4, 256);

    queue.enqueue(msg(1, 7, 0), &mut registry, &driver);
    queue.enqueue(msg(2, 7, 0), &mut registry, &driver);
    let tid0 = sent_tids(&driver)[0];
    queue.on_queued_success(tid0);
    assert!(queue.is_timer_armed());

    let outcomes = queue.on_send_timeout(&mut registry, &driver);
    let mut reasons: Vec<_> = outcomes
        .into_iter()
        .map(|o| match o {
            QueueOutcome::Fail { message_id, reason, .. } => (message_id, reason),
            QueueOutcome::Success { message_id, .. } => panic!("unexpected success for {message_id}"),
        })
        .collect();
    reasons.sort_by_key(|(id, _)| *id);
    assert_eq!(reasons, vec![(1, ReasonCode::TxFail), (2, ReasonCode::TxFail)]);
    assert!(queue.is_empty());
    assert!(!queue.is_timer_armed());
}

#[test]
fn stale_callback_after_timeout_is_discarded() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(1, 256);

    queue.enqueue(msg(1, 7, 0), &mut registry, &driver);
    let tid0 = sent_tids(&driver)[0];
    queue.on_send_timeout(&mut registry, &driver);

    // A late txSuccess for the now-cleared transaction produces nothing.
    let outcomes = queue.on_tx_success(tid0, &mut registry, &driver);
    assert!(outcomes.is_empty());
}

#[test]
fn teardown_session_drops_entries_without_callbacks_and_frees_capacity() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(1, 256);

    queue.enqueue(msg(1, 7, 0), &mut registry, &driver); // in flight, session 7
    queue.enqueue(msg(2, 8, 0), &mut registry, &driver); // parked, session 8

    let outcomes = queue.teardown_session(7, &mut registry, &driver);
    // No callback for the torn-down session's own message; draining the
    // freed slot dispatches session 8's parked message instead.
    assert!(outcomes.is_empty());
    assert_eq!(queue.firmware_len(), 1);
    assert_eq!(driver.send_message_calls().len(), 2);
}

#[test]
fn host_queue_rejects_beyond_configured_depth() {
    let mut registry = TransactionRegistry::new();
    let driver = MockDriver::new();
    let mut queue = SendMessageQueue::new(0, 1);

    queue.enqueue(msg(1, 7, 0), &mut registry, &driver);
    let outcomes = queue.enqueue(msg(2, 7, 0), &mut registry, &driver);

    assert_eq!(outcomes, vec![QueueOutcome::Fail { session_id: 7, message_id: 2, reason: ReasonCode::NoResources }]);
    assert!(driver.send_message_calls().is_empty());
}
