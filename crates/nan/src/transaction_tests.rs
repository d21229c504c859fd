// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn ctx(kind: TransactionKind) -> TransactionContext {
    TransactionContext {
        kind,
        client_id: Some(1),
        session_id: None,
    }
}

#[tokio::test]
async fn allocate_is_nonzero_and_unique() {
    let mut reg = TransactionRegistry::new();
    let now = Instant::now();
    let a = reg.allocate(ctx(TransactionKind::GetCapabilities), now + Duration::from_secs(1));
    let b = reg.allocate(ctx(TransactionKind::Publish), now + Duration::from_secs(1));
    assert_ne!(a, 0);
    assert_ne!(b, 0);
    assert_ne!(a, b);
}

#[tokio::test]
async fn claim_removes_entry_exactly_once() {
    let mut reg = TransactionRegistry::new();
    let now = Instant::now();
    let tid = reg.allocate(ctx(TransactionKind::Publish), now + Duration::from_secs(1));

    assert!(reg.claim(tid).is_ok());
    assert_eq!(reg.claim(tid), Err(ClaimError::UnknownTransaction));
}

#[tokio::test]
async fn claim_unknown_transaction_is_an_error_not_a_panic() {
    let mut reg = TransactionRegistry::new();
    assert_eq!(reg.claim(999), Err(ClaimError::UnknownTransaction));
}

#[tokio::test(start_paused = true)]
async fn expire_returns_only_past_deadline_entries() {
    let mut reg = TransactionRegistry::new();
    let now = Instant::now();
    let soon = reg.allocate(ctx(TransactionKind::GetCapabilities), now + Duration::from_millis(10));
    let later = reg.allocate(ctx(TransactionKind::Publish), now + Duration::from_secs(10));

    tokio::time::advance(Duration::from_millis(20)).await;

    let expired = reg.expire(Instant::now());
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].0, soon);
    assert_eq!(reg.len(), 1);
    assert!(reg.claim(later).is_ok());
}

#[tokio::test]
async fn clear_drops_everything_silently() {
    let mut reg = TransactionRegistry::new();
    let now = Instant::now();
    reg.allocate(ctx(TransactionKind::Publish), now + Duration::from_secs(1));
    reg.allocate(ctx(TransactionKind::Subscribe), now + Duration::from_secs(1));
    reg.clear();
    assert!(reg.is_empty());
}

#[tokio::test]
async fn next_deadline_is_the_minimum() {
    let mut reg = TransactionRegistry::new();
    let now = Instant::now();
    reg.allocate(ctx(TransactionKind::Publish), now + Duration::from_secs(5));
    reg.allocate(ctx(TransactionKind::Subscribe), now + Duration::from_secs(1));
    assert_eq!(reg.next_deadline(), Some(now + Duration::from_secs(1)));
}
