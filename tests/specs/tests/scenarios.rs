// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! The literal end-to-end scenarios: each test drives the real [`Engine`]
//! through exactly the sequence of calls and driver notifications named by
//! its scenario, against the in-memory driver double.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nan_core::test_support::{DriverCall, RecordedEvent, RecordedSessionEvent, RecordingEventCallback, RecordingSessionCallback};
use nan_core::{ConfigRequest, DriverEvent, PublishConfig, ReasonCode, SessionId, TerminateReason};
use nan_specs::{wait_for, Harness};

/// Polls [`Harness::session_ids_for`] until it yields exactly one id.
async fn wait_for_session_id(h: &Harness, client_id: u32) -> anyhow::Result<SessionId> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let ids = h.session_ids_for(client_id).await?;
            if let [s] = ids[..] {
                return Ok(s);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("session never started")?
}

async fn wait_until(mut pred: impl FnMut() -> bool) -> anyhow::Result<()> {
    wait_for(|| pred().then_some(())).await
}

#[tokio::test]
async fn s1_happy_publish() -> anyhow::Result<()> {
    let h = Harness::start();
    h.enable_usage().await?;

    let event_cb = Arc::new(RecordingEventCallback::new());
    h.connect(12341, 1000, event_cb.clone(), ConfigRequest::default()).await?;

    wait_until(|| !h.broadcast.transitions().is_empty()).await?;
    assert_eq!(h.broadcast.transitions(), vec![true]);
    wait_until(|| !event_cb.events().is_empty()).await?;
    assert_eq!(event_cb.events(), vec![RecordedEvent::ConnectSuccess]);

    let session_cb = Arc::new(RecordingSessionCallback::new());
    h.publish(12341, PublishConfig::default(), session_cb.clone(), 15).await?;

    let s = wait_for_session_id(&h, 12341).await?;
    assert!(s >= 1);
    wait_until(|| !session_cb.events().is_empty()).await?;
    assert_eq!(session_cb.events(), vec![RecordedSessionEvent::Started(s)]);
    Ok(())
}

#[tokio::test]
async fn s2_publish_then_terminate_then_noop_updates() -> anyhow::Result<()> {
    let h = Harness::start();
    h.enable_usage().await?;
    let event_cb = Arc::new(RecordingEventCallback::new());
    h.connect(12341, 1000, event_cb, ConfigRequest::default()).await?;

    let session_cb = Arc::new(RecordingSessionCallback::new());
    h.publish(12341, PublishConfig::default(), session_cb.clone(), 15).await?;
    let s = wait_for_session_id(&h, 12341).await?;

    h.sink
        .post(DriverEvent::SessionTerminated { pub_sub_id: 15, is_publish: true, reason: TerminateReason::Done })
        .await;
    wait_until(|| session_cb.events().iter().any(|e| matches!(e, RecordedSessionEvent::Terminated(_)))).await?;

    h.engine.update_publish(12341, s, PublishConfig::default()).await?;
    h.engine.terminate_session(12341, s).await?;
    h.engine.update_publish(12341, s, PublishConfig::default()).await?;

    // Give the no-op commands a moment to be applied, then assert nothing
    // further was recorded.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        session_cb.events(),
        vec![RecordedSessionEvent::Started(s), RecordedSessionEvent::Terminated(TerminateReason::Done)]
    );
    assert!(h.session_ids_for(12341).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn s3_message_retry_success() -> anyhow::Result<()> {
    let h = Harness::start();
    h.enable_usage().await?;
    let event_cb = Arc::new(RecordingEventCallback::new());
    h.connect(12341, 1000, event_cb, ConfigRequest::default()).await?;

    let session_cb = Arc::new(RecordingSessionCallback::new());
    h.publish(12341, PublishConfig::default(), session_cb.clone(), 15).await?;
    let s = wait_for_session_id(&h, 12341).await?;

    let requestor_id = 22u32;
    let peer_mac: [u8; 6] = [0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B];
    h.sink
        .post(DriverEvent::Match { pub_sub_id: 15, requestor_id, mac: peer_mac, peer_ssi: vec![], match_filter: vec![] })
        .await;
    wait_until(|| session_cb.events().iter().any(|e| matches!(e, RecordedSessionEvent::Match { .. }))).await?;

    h.engine.send_message(12341, s, requestor_id, b"hi".to_vec(), 6948, 3).await?;

    let tid1 = h
        .wait_for_call(|c| match c {
            DriverCall::SendMessage { tid, message_id: 6948, .. } => Some(*tid),
            _ => None,
        })
        .await?;
    h.sink.post(DriverEvent::MessageQueuedSuccess { tid: tid1 }).await;

    for _ in 0..3 {
        let calls_before = h.driver.send_message_calls().len();
        let tid = h
            .wait_for_call(|c| match c {
                DriverCall::SendMessage { tid, message_id: 6948, .. } => Some(*tid),
                _ => None,
            })
            .await?;
        h.sink.post(DriverEvent::MessageTxFail { tid, reason: ReasonCode::TxFail }).await;
        wait_until(|| h.driver.send_message_calls().len() > calls_before).await?;
    }

    let final_tid = h
        .wait_for_call(|c| match c {
            DriverCall::SendMessage { tid, message_id: 6948, .. } => Some(*tid),
            _ => None,
        })
        .await?;
    h.sink.post(DriverEvent::MessageTxSuccess { tid: final_tid }).await;

    wait_until(|| session_cb.events().iter().any(|e| matches!(e, RecordedSessionEvent::MessageSendSuccess(6948)))).await?;
    assert_eq!(h.driver.send_message_calls().len(), 4);
    assert_eq!(
        session_cb.events().iter().filter(|e| matches!(e, RecordedSessionEvent::MessageSendSuccess(6948))).count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn s4_message_retry_exhaustion() -> anyhow::Result<()> {
    let h = Harness::start();
    h.enable_usage().await?;
    let event_cb = Arc::new(RecordingEventCallback::new());
    h.connect(12341, 1000, event_cb, ConfigRequest::default()).await?;

    let session_cb = Arc::new(RecordingSessionCallback::new());
    h.publish(12341, PublishConfig::default(), session_cb.clone(), 15).await?;
    let s = wait_for_session_id(&h, 12341).await?;

    let requestor_id = 22u32;
    let peer_mac: [u8; 6] = [0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B];
    h.sink
        .post(DriverEvent::Match { pub_sub_id: 15, requestor_id, mac: peer_mac, peer_ssi: vec![], match_filter: vec![] })
        .await;
    wait_until(|| session_cb.events().iter().any(|e| matches!(e, RecordedSessionEvent::Match { .. }))).await?;

    h.engine.send_message(12341, s, requestor_id, b"hi".to_vec(), 6948, 3).await?;

    let tid1 = h
        .wait_for_call(|c| match c {
            DriverCall::SendMessage { tid, message_id: 6948, .. } => Some(*tid),
            _ => None,
        })
        .await?;
    h.sink.post(DriverEvent::MessageQueuedSuccess { tid: tid1 }).await;

    for i in 0..4 {
        let calls_before = h.driver.send_message_calls().len();
        let tid = h
            .wait_for_call(|c| match c {
                DriverCall::SendMessage { tid, message_id: 6948, .. } => Some(*tid),
                _ => None,
            })
            .await?;
        h.sink.post(DriverEvent::MessageTxFail { tid, reason: ReasonCode::TxFail }).await;
        if i < 3 {
            wait_until(|| h.driver.send_message_calls().len() > calls_before).await?;
        }
    }

    wait_until(|| {
        session_cb
            .events()
            .iter()
            .any(|e| matches!(e, RecordedSessionEvent::MessageSendFail(6948, ReasonCode::TxFail)))
    })
    .await?;
    assert_eq!(h.driver.send_message_calls().len(), 4);
    assert_eq!(
        session_cb
            .events()
            .iter()
            .filter(|e| matches!(e, RecordedSessionEvent::MessageSendFail(6948, ReasonCode::TxFail)))
            .count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn s5_disconnect_while_publish_pending() -> anyhow::Result<()> {
    let h = Harness::start();
    h.enable_usage().await?;
    let event_cb = Arc::new(RecordingEventCallback::new());
    h.connect(12341, 1000, event_cb, ConfigRequest::default()).await?;

    let session_cb = Arc::new(RecordingSessionCallback::new());
    h.engine.publish(12341, PublishConfig::default(), session_cb.clone()).await?;
    let tid = h
        .wait_for_call(|c| match c {
            DriverCall::Publish { tid, .. } => Some(*tid),
            _ => None,
        })
        .await?;

    h.engine.disconnect(12341).await?;
    // `disconnect` and `is_usage_enabled` share the same command channel, so
    // this round trip is a barrier: it only completes once the disconnect
    // ahead of it in the queue has been applied, guaranteeing the deferred
    // teardown is armed before the late driver response below arrives.
    let _ = h.engine.is_usage_enabled().await?;
    h.sink.post(DriverEvent::SessionConfigSuccess { tid, is_publish: true, pub_sub_id: 15 }).await;

    wait_until(|| h.driver.calls().iter().any(|c| matches!(c, DriverCall::Disable { .. }))).await?;

    assert!(session_cb.events().is_empty(), "onSessionStarted must be suppressed");
    assert!(h.client_ids().await?.is_empty());
    assert!(h.driver.calls().iter().any(|c| matches!(c, DriverCall::StopPublish { pub_id: 15, .. })));
    assert!(h.driver.calls().iter().any(|c| matches!(c, DriverCall::Disable { .. })));
    Ok(())
}

#[tokio::test]
async fn s6_incompatible_second_client_rejected() -> anyhow::Result<()> {
    let h = Harness::start();
    h.enable_usage().await?;

    let a_cb = Arc::new(RecordingEventCallback::new());
    h.connect(
        1,
        1000,
        a_cb.clone(),
        ConfigRequest { cluster_low: 5, cluster_high: 100, master_preference: 111, ..Default::default() },
    )
    .await?;
    wait_until(|| !a_cb.events().is_empty()).await?;
    assert_eq!(a_cb.events(), vec![RecordedEvent::ConnectSuccess]);

    let enable_configure_before = h
        .driver
        .calls()
        .iter()
        .filter(|c| matches!(c, DriverCall::EnableAndConfigure { .. }))
        .count();

    let b_cb = Arc::new(RecordingEventCallback::new());
    h.engine
        .connect(
            2,
            2000,
            b_cb.clone(),
            ConfigRequest { support_5g: true, cluster_low: 7, cluster_high: 155, master_preference: 0, ..Default::default() },
        )
        .await?;

    wait_until(|| !b_cb.events().is_empty()).await?;
    assert_eq!(b_cb.events(), vec![RecordedEvent::ConnectFail(ReasonCode::AlreadyConnectedIncompatConfig)]);

    let enable_configure_after = h
        .driver
        .calls()
        .iter()
        .filter(|c| matches!(c, DriverCall::EnableAndConfigure { .. }))
        .count();
    assert_eq!(enable_configure_before, enable_configure_after, "no second enableAndConfigure issued");
    assert_eq!(h.client_ids().await?, vec![1]);
    Ok(())
}

#[tokio::test]
async fn boundary_send_message_to_unknown_peer_is_no_match_session() -> anyhow::Result<()> {
    let h = Harness::start();
    h.enable_usage().await?;
    let event_cb = Arc::new(RecordingEventCallback::new());
    h.connect(12341, 1000, event_cb, ConfigRequest::default()).await?;

    let session_cb = Arc::new(RecordingSessionCallback::new());
    h.publish(12341, PublishConfig::default(), session_cb.clone(), 15).await?;
    let s = wait_for_session_id(&h, 12341).await?;

    let calls_before = h.driver.calls().len();
    h.engine.send_message(12341, s, 999, b"hi".to_vec(), 42, 0).await?;

    wait_until(|| {
        session_cb
            .events()
            .iter()
            .any(|e| matches!(e, RecordedSessionEvent::MessageSendFail(42, ReasonCode::NoMatchSession)))
    })
    .await?;
    assert_eq!(h.driver.calls().len(), calls_before, "driver must never be called for an unresolved peer");
    Ok(())
}
