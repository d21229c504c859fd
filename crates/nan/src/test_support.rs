// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Test doubles shared by the crate's own unit tests and the `tests/specs`
//! integration crate. Replaces the original's reflection-based assertions
//! (Design Notes §9) with plain recorded call logs and read-only snapshot
//! methods gated behind `test-support`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Mutex;

use crate::callback::{EventCallback, SessionCallback, UsageBroadcast};
use crate::driver::{DataPathManager, NativeDriver, RttManager};
use crate::error::ReasonCode;
use crate::types::{Capabilities, ConfigRequest, Mac, MessageId, PeerId, PublishConfig, SubscribeConfig, TransactionId};

/// One recorded outbound call to a [`MockDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    GetCapabilities { tid: TransactionId },
    EnableAndConfigure { tid: TransactionId, config: ConfigRequest, notify_identity_change: bool },
    Disable { tid: TransactionId },
    DeinitNan,
    Publish { tid: TransactionId, pub_id: Option<u32> },
    Subscribe { tid: TransactionId, sub_id: Option<u32> },
    StopPublish { tid: TransactionId, pub_id: u32 },
    StopSubscribe { tid: TransactionId, sub_id: u32 },
    SendMessage { tid: TransactionId, pub_sub_id: u32, requestor_id: PeerId, dest_mac: Mac, payload: Vec<u8>, message_id: MessageId },
}

/// Records every call made to it; always accepts (`true`) unless primed to
/// refuse the next call via [`MockDriver::refuse_next`].
#[derive(Default)]
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    refuse_next: Mutex<bool>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().expect("mock lock").clone()
    }

    pub fn send_message_calls(&self) -> Vec<DriverCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, DriverCall::SendMessage { .. }))
            .collect()
    }

    /// The next accepted-for-dispatch call will instead be synchronously
    /// refused (return `false`), simulating a full driver queue.
    pub fn refuse_next(&self) {
        *self.refuse_next.lock().expect("mock lock") = true;
    }

    fn accept(&self) -> bool {
        let mut refuse = self.refuse_next.lock().expect("mock lock");
        if *refuse {
            *refuse = false;
            false
        } else {
            true
        }
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().expect("mock lock").push(call);
    }
}

impl NativeDriver for MockDriver {
    fn get_capabilities(&self, tid: TransactionId) -> bool {
        self.record(DriverCall::GetCapabilities { tid });
        self.accept()
    }

    fn enable_and_configure(&self, tid: TransactionId, config: ConfigRequest, notify_identity_change: bool) -> bool {
        self.record(DriverCall::EnableAndConfigure { tid, config, notify_identity_change });
        self.accept()
    }

    fn disable(&self, tid: TransactionId) -> bool {
        self.record(DriverCall::Disable { tid });
        self.accept()
    }

    fn deinit_nan(&self) {
        self.record(DriverCall::DeinitNan);
    }

    fn publish(&self, tid: TransactionId, pub_id: Option<u32>, _config: PublishConfig) -> bool {
        self.record(DriverCall::Publish { tid, pub_id });
        self.accept()
    }

    fn subscribe(&self, tid: TransactionId, sub_id: Option<u32>, _config: SubscribeConfig) -> bool {
        self.record(DriverCall::Subscribe { tid, sub_id });
        self.accept()
    }

    fn stop_publish(&self, tid: TransactionId, pub_id: u32) -> bool {
        self.record(DriverCall::StopPublish { tid, pub_id });
        self.accept()
    }

    fn stop_subscribe(&self, tid: TransactionId, sub_id: u32) -> bool {
        self.record(DriverCall::StopSubscribe { tid, sub_id });
        self.accept()
    }

    fn send_message(
        &self,
        tid: TransactionId,
        pub_sub_id: u32,
        requestor_id: PeerId,
        dest_mac: Mac,
        payload: &[u8],
        message_id: MessageId,
    ) -> bool {
        self.record(DriverCall::SendMessage {
            tid,
            pub_sub_id,
            requestor_id,
            dest_mac,
            payload: payload.to_vec(),
            message_id,
        });
        self.accept()
    }
}

/// No-op data-path manager that records invocation counts.
#[derive(Default)]
pub struct MockDataPathManager {
    pub create_all_count: Mutex<u32>,
    pub delete_all_count: Mutex<u32>,
    pub cleanup_count: Mutex<u32>,
}

impl MockDataPathManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataPathManager for MockDataPathManager {
    fn create_all_interfaces(&self) {
        *self.create_all_count.lock().expect("mock lock") += 1;
    }

    fn delete_all_interfaces(&self) {
        *self.delete_all_count.lock().expect("mock lock") += 1;
    }

    fn on_nan_down_cleanup_data_paths(&self) {
        *self.cleanup_count.lock().expect("mock lock") += 1;
    }
}

/// No-op RTT manager that records every ranging request.
#[derive(Default)]
pub struct MockRttManager {
    pub requests: Mutex<Vec<(u32, Vec<(PeerId, Mac)>)>>,
}

impl MockRttManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RttManager for MockRttManager {
    fn start_ranging(&self, ranging_id: u32, peers: Vec<(PeerId, Mac)>) {
        self.requests.lock().expect("mock lock").push((ranging_id, peers));
    }
}

/// One recorded event delivered to a [`RecordingEventCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    ConnectSuccess,
    ConnectFail(ReasonCode),
    IdentityChanged,
    NanDown(ReasonCode),
}

#[derive(Default)]
pub struct RecordingEventCallback {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("mock lock").clone()
    }
}

impl EventCallback for RecordingEventCallback {
    fn on_connect_success(&self) {
        self.events.lock().expect("mock lock").push(RecordedEvent::ConnectSuccess);
    }

    fn on_connect_fail(&self, reason: ReasonCode) {
        self.events.lock().expect("mock lock").push(RecordedEvent::ConnectFail(reason));
    }

    fn on_identity_changed(&self) {
        self.events.lock().expect("mock lock").push(RecordedEvent::IdentityChanged);
    }

    fn on_nan_down(&self, reason: ReasonCode) {
        self.events.lock().expect("mock lock").push(RecordedEvent::NanDown(reason));
    }
}

/// One recorded event delivered to a [`RecordingSessionCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedSessionEvent {
    Started(crate::types::SessionId),
    ConfigSuccess,
    ConfigFail(ReasonCode),
    Terminated(crate::error::TerminateReason),
    Match { peer_id: PeerId, peer_ssi: Vec<u8>, match_filter: Vec<u8> },
    MessageReceived { peer_id: PeerId, message: Vec<u8> },
    MessageSendSuccess(MessageId),
    MessageSendFail(MessageId, ReasonCode),
}

#[derive(Default)]
pub struct RecordingSessionCallback {
    pub events: Mutex<Vec<RecordedSessionEvent>>,
}

impl RecordingSessionCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedSessionEvent> {
        self.events.lock().expect("mock lock").clone()
    }
}

impl SessionCallback for RecordingSessionCallback {
    fn on_session_started(&self, session_id: crate::types::SessionId) {
        self.events.lock().expect("mock lock").push(RecordedSessionEvent::Started(session_id));
    }

    fn on_session_config_success(&self) {
        self.events.lock().expect("mock lock").push(RecordedSessionEvent::ConfigSuccess);
    }

    fn on_session_config_fail(&self, reason: ReasonCode) {
        self.events.lock().expect("mock lock").push(RecordedSessionEvent::ConfigFail(reason));
    }

    fn on_session_terminated(&self, reason: crate::error::TerminateReason) {
        self.events.lock().expect("mock lock").push(RecordedSessionEvent::Terminated(reason));
    }

    fn on_match(&self, peer_id: PeerId, peer_ssi: &[u8], match_filter: &[u8]) {
        self.events.lock().expect("mock lock").push(RecordedSessionEvent::Match {
            peer_id,
            peer_ssi: peer_ssi.to_vec(),
            match_filter: match_filter.to_vec(),
        });
    }

    fn on_message_received(&self, peer_id: PeerId, message: &[u8]) {
        self.events
            .lock()
            .expect("mock lock")
            .push(RecordedSessionEvent::MessageReceived { peer_id, message: message.to_vec() });
    }

    fn on_message_send_success(&self, message_id: MessageId) {
        self.events.lock().expect("mock lock").push(RecordedSessionEvent::MessageSendSuccess(message_id));
    }

    fn on_message_send_fail(&self, message_id: MessageId, reason: ReasonCode) {
        self.events
            .lock()
            .expect("mock lock")
            .push(RecordedSessionEvent::MessageSendFail(message_id, reason));
    }
}

#[derive(Default)]
pub struct RecordingUsageBroadcast {
    pub transitions: Mutex<Vec<bool>>,
}

impl RecordingUsageBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<bool> {
        self.transitions.lock().expect("mock lock").clone()
    }
}

impl UsageBroadcast for RecordingUsageBroadcast {
    fn on_state_changed(&self, enabled: bool) {
        self.transitions.lock().expect("mock lock").push(enabled);
    }
}

pub fn default_capabilities() -> Capabilities {
    Capabilities {
        max_queue_depth: 2,
        max_service_name_len: 255,
        max_concurrent_publishes: 8,
        max_concurrent_subscribes: 8,
    }
}
