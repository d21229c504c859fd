// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! The single-threaded dispatcher: accepts app commands and driver
//! notifications, enforces "at most one outstanding driver transaction,"
//! drives the global lifecycle, and owns the send-message queue.
//!
//! This is a plain, synchronous, `Send` struct with no `async fn` — every
//! method runs to completion and returns, posting no suspension points of
//! its own. [`crate::engine::Engine`] is the thin async wrapper that feeds
//! it from a channel and a timer. Deadlines are computed from an explicit
//! `now: Instant` parameter the caller supplies rather than a call to
//! `Instant::now()` buried in here, so the whole component has no hidden
//! wall-clock dependency a test can't pause.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::callback::{EventCallback, SessionCallback, UsageBroadcast};
use crate::client::ClientState;
use crate::config::EngineConfig;
use crate::config_merge;
use crate::driver::{DataPathManager, DriverEvent, NativeDriver, RttManager};
use crate::error::{ReasonCode, TerminateReason};
use crate::queue::{HostQueuedSend, QueueOutcome, SendMessageQueue};
use crate::session::SessionState;
use crate::transaction::{TransactionContext, TransactionKind, TransactionRegistry};
use crate::types::{
    Capabilities, ClientId, ConfigRequest, GlobalConfig, Mac, MessageId, PeerId, PublishConfig,
    RttParams, SessionConfig, SessionId, SessionKind, SubscribeConfig, TransactionId,
};

/// State of the global NAN layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NanLifecycle {
    UsageDisabled,
    WaitForResponse,
    Idle,
}

/// What the single outstanding driver transaction (if any) is for, and who
/// is waiting on it.
enum PendingKind {
    GetCapabilities,
    Configure { merged: GlobalConfig, connecting_client: Option<ClientId> },
    Publish { session_id: SessionId, client_id: ClientId },
    Subscribe { session_id: SessionId, client_id: ClientId },
}

struct PendingOp {
    tid: TransactionId,
    kind: PendingKind,
}

impl PendingOp {
    fn owning_client(&self) -> Option<ClientId> {
        match &self.kind {
            PendingKind::GetCapabilities => None,
            PendingKind::Configure { connecting_client, .. } => *connecting_client,
            PendingKind::Publish { client_id, .. } | PendingKind::Subscribe { client_id, .. } => Some(*client_id),
        }
    }
}

/// An app command that arrived while a driver transaction of a governed
/// kind was outstanding. Parked at the tail of the FIFO and replayed, in
/// order, once the current transaction resolves.
pub enum Command {
    EnableUsage,
    Connect { client_id: ClientId, uid: u32, callback: Arc<dyn EventCallback>, config: ConfigRequest },
    Publish { client_id: ClientId, config: PublishConfig, callback: Arc<dyn SessionCallback> },
    Subscribe { client_id: ClientId, config: SubscribeConfig, callback: Arc<dyn SessionCallback> },
    UpdatePublish { client_id: ClientId, session_id: SessionId, config: PublishConfig },
    UpdateSubscribe { client_id: ClientId, session_id: SessionId, config: SubscribeConfig },
}

pub struct StateMachine {
    lifecycle: NanLifecycle,
    clients: HashMap<ClientId, ClientState>,
    session_owner: HashMap<SessionId, ClientId>,
    /// `pub_sub_id -> (is_publish, client_id, session_id)`, populated once a
    /// session's first driver success names its pub/sub id.
    pub_sub_index: HashMap<u32, (bool, ClientId, SessionId)>,
    next_session_id: SessionId,
    registry: TransactionRegistry,
    queue: SendMessageQueue,
    queue_capacity: usize,
    send_timeout_deadline: Option<Instant>,
    capabilities: Option<Capabilities>,
    programmed_config: Option<GlobalConfig>,
    pending: Option<PendingOp>,
    parked: VecDeque<Command>,
    deferred_disconnects: HashSet<ClientId>,
    driver: Arc<dyn NativeDriver>,
    data_path: Arc<dyn DataPathManager>,
    rtt: Arc<dyn RttManager>,
    broadcast: Arc<dyn UsageBroadcast>,
    config: EngineConfig,
}

impl StateMachine {
    pub fn new(
        driver: Arc<dyn NativeDriver>,
        data_path: Arc<dyn DataPathManager>,
        rtt: Arc<dyn RttManager>,
        broadcast: Arc<dyn UsageBroadcast>,
        config: EngineConfig,
    ) -> Self {
        let queue_capacity = Capabilities::default().max_queue_depth;
        Self {
            lifecycle: NanLifecycle::UsageDisabled,
            clients: HashMap::new(),
            session_owner: HashMap::new(),
            pub_sub_index: HashMap::new(),
            next_session_id: 1,
            registry: TransactionRegistry::new(),
            queue: SendMessageQueue::new(queue_capacity, config.max_host_queue_depth),
            queue_capacity,
            send_timeout_deadline: None,
            capabilities: None,
            programmed_config: None,
            pending: None,
            parked: VecDeque::new(),
            deferred_disconnects: HashSet::new(),
            driver,
            data_path,
            rtt,
            broadcast,
            config,
        }
    }

    pub fn is_usage_enabled(&self) -> bool {
        !matches!(self.lifecycle, NanLifecycle::UsageDisabled)
    }

    /// Earliest instant this state machine needs to be woken for a timeout,
    /// combining the per-transaction `HAL_COMMAND_TIMEOUT` deadline and the
    /// batch-level `HAL_SEND_MESSAGE_TIMEOUT` deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.registry.next_deadline(), self.send_timeout_deadline].into_iter().flatten().min()
    }

    /// Fire whichever deadlines have passed as of `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.send_timeout_deadline.is_some_and(|d| d <= now) {
            self.send_timeout_deadline = None;
            let outcomes = self.queue.on_send_timeout(&mut self.registry, self.driver.as_ref());
            self.apply_queue_outcomes(outcomes);
            self.sync_send_timer(now);
        }
        let expired = self.registry.expire(now);
        for (tid, _ctx) in expired {
            if self.pending.as_ref().map(|p| p.tid) == Some(tid) {
                self.on_transaction_timeout(now);
            }
        }
    }

    // ---- app-facing commands -------------------------------------------

    pub fn enable_usage(&mut self, now: Instant) {
        if !matches!(self.lifecycle, NanLifecycle::UsageDisabled) {
            debug!("enableUsage while already enabled, ignored");
            return;
        }
        info!("usage enabled");
        self.broadcast.on_state_changed(true);
        let tid = self.registry.allocate(
            TransactionContext { kind: TransactionKind::GetCapabilities, client_id: None, session_id: None },
            now + self.config.command_timeout,
        );
        if !self.driver.get_capabilities(tid) {
            let _ = self.registry.claim(tid);
            warn!("driver refused getCapabilities");
            return;
        }
        self.pending = Some(PendingOp { tid, kind: PendingKind::GetCapabilities });
        self.lifecycle = NanLifecycle::WaitForResponse;
    }

    pub fn disable_usage(&mut self) {
        if matches!(self.lifecycle, NanLifecycle::UsageDisabled) {
            debug!("disableUsage while already disabled, no-op");
            return;
        }
        info!("usage disabled");
        self.driver.disable(0);
        self.driver.deinit_nan();
        self.data_path.on_nan_down_cleanup_data_paths();
        self.broadcast.on_state_changed(false);
        self.data_path.delete_all_interfaces();
        self.reset_to_disabled();
    }

    fn reset_to_disabled(&mut self) {
        self.clients.clear();
        self.session_owner.clear();
        self.pub_sub_index.clear();
        self.registry.clear();
        self.queue = SendMessageQueue::new(self.queue_capacity, self.config.max_host_queue_depth);
        self.send_timeout_deadline = None;
        self.parked.clear();
        self.deferred_disconnects.clear();
        self.pending = None;
        self.programmed_config = None;
        self.capabilities = None;
        self.lifecycle = NanLifecycle::UsageDisabled;
    }

    pub fn connect(&mut self, client_id: ClientId, uid: u32, callback: Arc<dyn EventCallback>, config: ConfigRequest, now: Instant) {
        match self.lifecycle {
            NanLifecycle::UsageDisabled => debug!(client_id, "connect while usage disabled, dropped silently"),
            NanLifecycle::WaitForResponse => self.parked.push_back(Command::Connect { client_id, uid, callback, config }),
            NanLifecycle::Idle => self.do_connect(client_id, uid, callback, config, now),
        }
    }

    fn do_connect(&mut self, client_id: ClientId, uid: u32, callback: Arc<dyn EventCallback>, config: ConfigRequest, now: Instant) {
        let existing: Vec<ConfigRequest> = self.clients.values().map(|c| c.config).collect();
        if !config_merge::is_compatible(&existing, &config) {
            callback.on_connect_fail(ReasonCode::AlreadyConnectedIncompatConfig);
            return;
        }

        self.clients.insert(client_id, ClientState::new(client_id, uid, callback.clone(), config));
        let merged = config_merge::merge(self.clients.values().map(|c| &c.config)).unwrap_or(config);

        let needs = match self.programmed_config {
            None => true,
            Some(programmed) => config_merge::needs_reconfigure(&merged, &programmed),
        };
        if !needs {
            callback.on_connect_success();
            return;
        }

        let notify_identity_change = self.programmed_config.is_none();
        let tid = self.registry.allocate(
            TransactionContext { kind: TransactionKind::EnableConfigure, client_id: Some(client_id), session_id: None },
            now + self.config.command_timeout,
        );
        if !self.driver.enable_and_configure(tid, merged, notify_identity_change) {
            let _ = self.registry.claim(tid);
            self.clients.remove(&client_id);
            callback.on_connect_fail(ReasonCode::Other);
            return;
        }
        self.pending = Some(PendingOp { tid, kind: PendingKind::Configure { merged, connecting_client: Some(client_id) } });
        self.lifecycle = NanLifecycle::WaitForResponse;
    }

    pub fn disconnect(&mut self, client_id: ClientId, now: Instant) {
        if self.pending.as_ref().and_then(PendingOp::owning_client) == Some(client_id) {
            debug!(client_id, "disconnect deferred: client has an outstanding driver command");
            self.deferred_disconnects.insert(client_id);
            return;
        }
        self.teardown_client(client_id, now);
    }

    fn teardown_client(&mut self, client_id: ClientId, now: Instant) {
        let Some(mut client) = self.clients.remove(&client_id) else { return };
        let sessions = client.take_sessions();
        for session in &sessions {
            self.stop_session_on_driver(session);
            let outcomes = self.queue.teardown_session(session.session_id, &mut self.registry, self.driver.as_ref());
            debug_assert!(outcomes.is_empty(), "teardown never reports queue outcomes");
            self.session_owner.remove(&session.session_id);
        }
        self.pub_sub_index.retain(|_, (_, cid, _)| *cid != client_id);
        self.sync_send_timer(now);
        self.remerge_after_disconnect(now);
    }

    fn remerge_after_disconnect(&mut self, now: Instant) {
        if self.clients.is_empty() {
            if self.programmed_config.is_some() {
                self.driver.disable(0);
                self.driver.deinit_nan();
                self.programmed_config = None;
            }
            return;
        }

        let Some(merged) = config_merge::merge(self.clients.values().map(|c| &c.config)) else { return };
        let needs = match self.programmed_config {
            None => true,
            Some(programmed) => config_merge::needs_reconfigure(&merged, &programmed),
        };
        if !needs || self.pending.is_some() {
            return;
        }

        let tid = self.registry.allocate(
            TransactionContext { kind: TransactionKind::EnableConfigure, client_id: None, session_id: None },
            now + self.config.command_timeout,
        );
        if !self.driver.enable_and_configure(tid, merged, false) {
            let _ = self.registry.claim(tid);
            warn!("driver refused post-disconnect reconfigure");
            return;
        }
        self.pending = Some(PendingOp { tid, kind: PendingKind::Configure { merged, connecting_client: None } });
        self.lifecycle = NanLifecycle::WaitForResponse;
    }

    pub fn publish(&mut self, client_id: ClientId, config: PublishConfig, callback: Arc<dyn SessionCallback>, now: Instant) {
        match self.lifecycle {
            NanLifecycle::UsageDisabled => debug!(client_id, "publish while usage disabled, dropped"),
            NanLifecycle::WaitForResponse => self.parked.push_back(Command::Publish { client_id, config, callback }),
            NanLifecycle::Idle => self.do_publish(client_id, config, callback, now),
        }
    }

    fn do_publish(&mut self, client_id: ClientId, config: PublishConfig, callback: Arc<dyn SessionCallback>, now: Instant) {
        if !self.clients.contains_key(&client_id) {
            warn!(client_id, "publish for unknown client");
            callback.on_session_config_fail(ReasonCode::Other);
            return;
        }
        let session_id = self.allocate_session_id();
        let tid = self.registry.allocate(
            TransactionContext { kind: TransactionKind::Publish, client_id: Some(client_id), session_id: Some(session_id) },
            now + self.config.command_timeout,
        );
        if !self.driver.publish(tid, None, config) {
            let _ = self.registry.claim(tid);
            callback.on_session_config_fail(ReasonCode::Other);
            return;
        }
        let session = SessionState::new(session_id, client_id, SessionKind::Publish, callback);
        self.session_owner.insert(session_id, client_id);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.insert_session(session);
        }
        self.pending = Some(PendingOp { tid, kind: PendingKind::Publish { session_id, client_id } });
        self.lifecycle = NanLifecycle::WaitForResponse;
    }

    pub fn subscribe(&mut self, client_id: ClientId, config: SubscribeConfig, callback: Arc<dyn SessionCallback>, now: Instant) {
        match self.lifecycle {
            NanLifecycle::UsageDisabled => debug!(client_id, "subscribe while usage disabled, dropped"),
            NanLifecycle::WaitForResponse => self.parked.push_back(Command::Subscribe { client_id, config, callback }),
            NanLifecycle::Idle => self.do_subscribe(client_id, config, callback, now),
        }
    }

    fn do_subscribe(&mut self, client_id: ClientId, config: SubscribeConfig, callback: Arc<dyn SessionCallback>, now: Instant) {
        if !self.clients.contains_key(&client_id) {
            warn!(client_id, "subscribe for unknown client");
            callback.on_session_config_fail(ReasonCode::Other);
            return;
        }
        let session_id = self.allocate_session_id();
        let tid = self.registry.allocate(
            TransactionContext { kind: TransactionKind::Subscribe, client_id: Some(client_id), session_id: Some(session_id) },
            now + self.config.command_timeout,
        );
        if !self.driver.subscribe(tid, None, config) {
            let _ = self.registry.claim(tid);
            callback.on_session_config_fail(ReasonCode::Other);
            return;
        }
        let session = SessionState::new(session_id, client_id, SessionKind::Subscribe, callback);
        self.session_owner.insert(session_id, client_id);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.insert_session(session);
        }
        self.pending = Some(PendingOp { tid, kind: PendingKind::Subscribe { session_id, client_id } });
        self.lifecycle = NanLifecycle::WaitForResponse;
    }

    pub fn update_publish(&mut self, client_id: ClientId, session_id: SessionId, config: PublishConfig, now: Instant) {
        match self.lifecycle {
            NanLifecycle::UsageDisabled => debug!(client_id, session_id, "updatePublish while usage disabled, dropped"),
            NanLifecycle::WaitForResponse => self.parked.push_back(Command::UpdatePublish { client_id, session_id, config }),
            NanLifecycle::Idle => self.do_update(client_id, session_id, SessionConfig::Publish(config), now),
        }
    }

    pub fn update_subscribe(&mut self, client_id: ClientId, session_id: SessionId, config: SubscribeConfig, now: Instant) {
        match self.lifecycle {
            NanLifecycle::UsageDisabled => debug!(client_id, session_id, "updateSubscribe while usage disabled, dropped"),
            NanLifecycle::WaitForResponse => self.parked.push_back(Command::UpdateSubscribe { client_id, session_id, config }),
            NanLifecycle::Idle => self.do_update(client_id, session_id, SessionConfig::Subscribe(config), now),
        }
    }

    /// Session missing, or gone, is a silent no-op: the app already tore
    /// its local handle down (scenario S2). No callback to route through.
    fn do_update(&mut self, client_id: ClientId, session_id: SessionId, cfg: SessionConfig, now: Instant) {
        let Some(session) = self.session_mut(session_id) else { return };
        if session.client_id != client_id {
            return;
        }
        if !session.accepts_config(&cfg) {
            return; // kind mismatch: session already reported ConfigFail(Other)
        }
        let pub_sub_id = session.pub_sub_id;
        let kind = session.kind;

        let tid = self.registry.allocate(
            TransactionContext {
                kind: if kind == SessionKind::Publish { TransactionKind::Publish } else { TransactionKind::Subscribe },
                client_id: Some(client_id),
                session_id: Some(session_id),
            },
            now + self.config.command_timeout,
        );
        let accepted = match cfg {
            SessionConfig::Publish(c) => self.driver.publish(tid, pub_sub_id, c),
            SessionConfig::Subscribe(c) => self.driver.subscribe(tid, pub_sub_id, c),
        };
        if !accepted {
            let _ = self.registry.claim(tid);
            if let Some(session) = self.session_mut(session_id) {
                session.report_config_fail(ReasonCode::Other);
            }
            return;
        }
        let pending_kind = if kind == SessionKind::Publish {
            PendingKind::Publish { session_id, client_id }
        } else {
            PendingKind::Subscribe { session_id, client_id }
        };
        self.pending = Some(PendingOp { tid, kind: pending_kind });
        self.lifecycle = NanLifecycle::WaitForResponse;
    }

    /// Issues the fire-and-forget stop, removes the session locally, and
    /// reports nothing back to the app — the app already knows, since it
    /// is the one calling `terminateSession`.
    pub fn terminate_session(&mut self, client_id: ClientId, session_id: SessionId, now: Instant) {
        let Some(owner) = self.session_owner.get(&session_id).copied() else { return };
        if owner != client_id {
            return;
        }
        let Some(client) = self.clients.get_mut(&client_id) else { return };
        let Some(session) = client.remove_session(session_id) else { return };
        self.stop_session_on_driver(&session);
        let outcomes = self.queue.teardown_session(session_id, &mut self.registry, self.driver.as_ref());
        debug_assert!(outcomes.is_empty());
        self.session_owner.remove(&session_id);
        self.pub_sub_index.retain(|_, (_, _, sid)| *sid != session_id);
        self.sync_send_timer(now);
    }

    fn stop_session_on_driver(&self, session: &SessionState) {
        let Some(pub_sub_id) = session.pub_sub_id else { return };
        match session.kind {
            SessionKind::Publish => {
                self.driver.stop_publish(0, pub_sub_id);
            }
            SessionKind::Subscribe => {
                self.driver.stop_subscribe(0, pub_sub_id);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_message(
        &mut self,
        client_id: ClientId,
        session_id: SessionId,
        peer_id: PeerId,
        payload: Vec<u8>,
        message_id: MessageId,
        retry_count: u32,
        now: Instant,
    ) {
        let Some(owner) = self.session_owner.get(&session_id).copied() else { return };
        if owner != client_id {
            return;
        }
        let Some(session) = self.session_mut(session_id) else { return };

        let Some(pub_sub_id) = session.pub_sub_id else {
            session.report_message_send_fail(message_id, ReasonCode::Other);
            return;
        };
        let Some(mac) = session.resolve_peer(peer_id) else {
            session.report_message_send_fail(message_id, ReasonCode::NoMatchSession);
            return;
        };

        let host_msg = HostQueuedSend {
            message_id,
            session_id,
            client_id,
            requestor_id: peer_id,
            pub_sub_id,
            dest_mac: mac,
            payload,
            retries_left: retry_count,
        };
        let outcomes = self.queue.enqueue(host_msg, &mut self.registry, self.driver.as_ref());
        self.apply_queue_outcomes(outcomes);
        self.sync_send_timer(now);
    }

    pub fn start_ranging(&mut self, client_id: ClientId, session_id: SessionId, params: Vec<RttParams>, ranging_id: u32) {
        let Some(owner) = self.session_owner.get(&session_id).copied() else { return };
        if owner != client_id {
            return;
        }
        let Some(session) = self.session(session_id) else { return };
        let resolved: Vec<(PeerId, Mac)> = params.iter().filter_map(|p| session.resolve_peer(p.peer_id).map(|mac| (p.peer_id, mac))).collect();
        self.rtt.start_ranging(ranging_id, resolved);
    }

    // ---- driver-originated events ---------------------------------------

    pub fn handle_driver_event(&mut self, event: DriverEvent, now: Instant) {
        match event {
            DriverEvent::CapabilitiesResponse { tid, capabilities } => self.on_capabilities_response(tid, capabilities, now),
            DriverEvent::ConfigSuccess { tid } => self.on_config_success(tid, now),
            DriverEvent::ConfigFail { tid, reason } => self.on_config_fail(tid, reason, now),
            DriverEvent::SessionConfigSuccess { tid, pub_sub_id, .. } => self.on_session_config_success(tid, pub_sub_id, now),
            DriverEvent::SessionConfigFail { tid, reason, .. } => self.on_session_config_fail(tid, reason, now),
            DriverEvent::SessionTerminated { pub_sub_id, is_publish, reason } => self.on_session_terminated(pub_sub_id, is_publish, reason, now),
            DriverEvent::Match { pub_sub_id, requestor_id, mac, peer_ssi, match_filter } => {
                self.on_match(pub_sub_id, requestor_id, mac, &peer_ssi, &match_filter);
            }
            DriverEvent::MessageReceived { pub_sub_id, requestor_id, mac, payload } => {
                self.on_message_received(pub_sub_id, requestor_id, mac, &payload);
            }
            DriverEvent::MessageQueuedSuccess { tid } => {
                self.queue.on_queued_success(tid);
                self.sync_send_timer(now);
            }
            DriverEvent::MessageQueuedFail { tid, reason } => {
                let outcomes = self.queue.on_queued_fail(tid, reason, &mut self.registry, self.driver.as_ref());
                self.apply_queue_outcomes(outcomes);
                self.sync_send_timer(now);
            }
            DriverEvent::MessageTxSuccess { tid } => {
                let outcomes = self.queue.on_tx_success(tid, &mut self.registry, self.driver.as_ref());
                self.apply_queue_outcomes(outcomes);
                self.sync_send_timer(now);
            }
            DriverEvent::MessageTxFail { tid, reason } => {
                let outcomes = self.queue.on_tx_fail(tid, reason, &mut self.registry, self.driver.as_ref());
                self.apply_queue_outcomes(outcomes);
                self.sync_send_timer(now);
            }
            DriverEvent::ClusterChange | DriverEvent::InterfaceAddressChange => self.fan_out_identity_change(),
            DriverEvent::NanDown { reason } => self.on_nan_down(reason),
        }
    }

    fn take_matching_pending(&mut self, tid: TransactionId) -> Option<PendingOp> {
        match &self.pending {
            Some(p) if p.tid == tid => self.pending.take(),
            _ => {
                debug!(tid, "stale or unknown driver response, discarded");
                None
            }
        }
    }

    fn on_capabilities_response(&mut self, tid: TransactionId, capabilities: Capabilities, now: Instant) {
        let Some(pending) = self.take_matching_pending(tid) else { return };
        let _ = self.registry.claim(tid);
        if !matches!(pending.kind, PendingKind::GetCapabilities) {
            warn!(tid, "capabilities response for a non-getCapabilities transaction");
        }
        self.capabilities = Some(capabilities);
        self.queue_capacity = capabilities.max_queue_depth;
        self.queue = SendMessageQueue::new(capabilities.max_queue_depth, self.config.max_host_queue_depth);
        self.data_path.create_all_interfaces();
        self.lifecycle = NanLifecycle::Idle;
        self.resolve_deferred_and_parked(None, now);
    }

    fn on_config_success(&mut self, tid: TransactionId, now: Instant) {
        let Some(pending) = self.take_matching_pending(tid) else { return };
        let _ = self.registry.claim(tid);
        let PendingKind::Configure { merged, connecting_client } = pending.kind else {
            warn!(tid, "configSuccess for a non-configure transaction");
            self.lifecycle = NanLifecycle::Idle;
            self.resolve_deferred_and_parked(None, now);
            return;
        };
        self.programmed_config = Some(merged);
        if let Some(client_id) = connecting_client {
            if let Some(client) = self.clients.get(&client_id) {
                client.callback.on_connect_success();
            }
        }
        self.lifecycle = NanLifecycle::Idle;
        self.resolve_deferred_and_parked(connecting_client, now);
    }

    fn on_config_fail(&mut self, tid: TransactionId, reason: ReasonCode, now: Instant) {
        let Some(pending) = self.take_matching_pending(tid) else { return };
        let _ = self.registry.claim(tid);
        let PendingKind::Configure { connecting_client, .. } = pending.kind else {
            warn!(tid, "configFail for a non-configure transaction");
            self.lifecycle = NanLifecycle::Idle;
            self.resolve_deferred_and_parked(None, now);
            return;
        };
        if let Some(client_id) = connecting_client {
            if let Some(client) = self.clients.remove(&client_id) {
                client.callback.on_connect_fail(reason);
            }
        } else {
            warn!(%reason, "post-disconnect reconfigure failed");
        }
        self.lifecycle = NanLifecycle::Idle;
        self.resolve_deferred_and_parked(connecting_client, now);
    }

    fn on_session_config_success(&mut self, tid: TransactionId, pub_sub_id: u32, now: Instant) {
        let Some(pending) = self.take_matching_pending(tid) else { return };
        let _ = self.registry.claim(tid);
        let (session_id, client_id, is_publish) = match pending.kind {
            PendingKind::Publish { session_id, client_id } => (session_id, client_id, true),
            PendingKind::Subscribe { session_id, client_id } => (session_id, client_id, false),
            _ => {
                warn!(tid, "sessionConfigSuccess for a non-session transaction");
                self.lifecycle = NanLifecycle::Idle;
                self.resolve_deferred_and_parked(None, now);
                return;
            }
        };
        // A client already flagged for deferred disconnect gets no further
        // callbacks at all (scenario S5): record the pub/sub id so the
        // driver can still be told to stop it, but suppress
        // `onSessionStarted`.
        let deferred = self.deferred_disconnects.contains(&client_id);
        if let Some(session) = self.session_mut(session_id) {
            if deferred {
                session.pub_sub_id = Some(pub_sub_id);
            } else if session.is_started() {
                session.report_config_success();
            } else {
                session.mark_started(pub_sub_id);
                self.pub_sub_index.insert(pub_sub_id, (is_publish, client_id, session_id));
            }
        }
        self.lifecycle = NanLifecycle::Idle;
        self.resolve_deferred_and_parked(Some(client_id), now);
    }

    fn on_session_config_fail(&mut self, tid: TransactionId, reason: ReasonCode, now: Instant) {
        let Some(pending) = self.take_matching_pending(tid) else { return };
        let _ = self.registry.claim(tid);
        let (session_id, client_id) = match pending.kind {
            PendingKind::Publish { session_id, client_id } | PendingKind::Subscribe { session_id, client_id } => (session_id, client_id),
            _ => {
                warn!(tid, "sessionConfigFail for a non-session transaction");
                self.lifecycle = NanLifecycle::Idle;
                self.resolve_deferred_and_parked(None, now);
                return;
            }
        };
        let mut remove = false;
        if let Some(session) = self.session_mut(session_id) {
            session.report_config_fail(reason);
            remove = !session.is_started();
        }
        if remove {
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.remove_session(session_id);
            }
            self.session_owner.remove(&session_id);
        }
        self.lifecycle = NanLifecycle::Idle;
        self.resolve_deferred_and_parked(Some(client_id), now);
    }

    fn on_session_terminated(&mut self, pub_sub_id: u32, is_publish: bool, reason: TerminateReason, now: Instant) {
        let Some((indexed_is_publish, client_id, session_id)) = self.pub_sub_index.remove(&pub_sub_id) else {
            debug!(pub_sub_id, "sessionTerminated for an unknown pub/sub id, discarded");
            return;
        };
        if indexed_is_publish != is_publish {
            warn!(pub_sub_id, "sessionTerminated kind mismatch, treated as stale");
            return;
        }
        let Some(client) = self.clients.get_mut(&client_id) else { return };
        let Some(mut session) = client.remove_session(session_id) else { return };
        self.session_owner.remove(&session_id);
        let outcomes = self.queue.teardown_session(session_id, &mut self.registry, self.driver.as_ref());
        self.apply_queue_outcomes(outcomes);
        self.sync_send_timer(now);
        session.mark_terminated(reason);
    }

    fn on_match(&mut self, pub_sub_id: u32, requestor_id: PeerId, mac: Mac, peer_ssi: &[u8], match_filter: &[u8]) {
        let Some(&(_, _, session_id)) = self.pub_sub_index.get(&pub_sub_id) else {
            debug!(pub_sub_id, "match for an unknown pub/sub id, discarded");
            return;
        };
        if let Some(session) = self.session_mut(session_id) {
            session.on_match(requestor_id, mac, peer_ssi, match_filter);
        }
    }

    fn on_message_received(&mut self, pub_sub_id: u32, requestor_id: PeerId, mac: Mac, payload: &[u8]) {
        let Some(&(_, _, session_id)) = self.pub_sub_index.get(&pub_sub_id) else {
            debug!(pub_sub_id, "messageReceived for an unknown pub/sub id, discarded");
            return;
        };
        if let Some(session) = self.session_mut(session_id) {
            session.on_message_received(requestor_id, mac, payload);
        }
    }

    /// A `nanDown` notification is a radio event, not a policy event: it
    /// tears everything down and returns to `UsageDisabled` without
    /// re-emitting the usage-changed broadcast.
    fn on_nan_down(&mut self, reason: ReasonCode) {
        warn!(%reason, "nanDown");
        self.fan_out_identity_change();
        for client in self.clients.values() {
            client.callback.on_nan_down(reason);
        }
        self.data_path.on_nan_down_cleanup_data_paths();
        self.reset_to_disabled();
    }

    fn fan_out_identity_change(&self) {
        for client in self.clients.values() {
            if client.config.enable_identity_change_callback {
                client.callback.on_identity_changed();
            }
        }
    }

    fn on_transaction_timeout(&mut self, now: Instant) {
        let Some(pending) = self.pending.take() else { return };
        warn!(tid = pending.tid, "command timeout");
        let _ = self.registry.claim(pending.tid);
        let owning_client = pending.owning_client();

        match pending.kind {
            PendingKind::GetCapabilities => {
                self.lifecycle = NanLifecycle::UsageDisabled;
            }
            PendingKind::Configure { connecting_client, .. } => {
                if let Some(client_id) = connecting_client {
                    if let Some(client) = self.clients.remove(&client_id) {
                        client.callback.on_connect_fail(ReasonCode::Other);
                    }
                }
                self.lifecycle = NanLifecycle::Idle;
            }
            PendingKind::Publish { session_id, client_id } | PendingKind::Subscribe { session_id, client_id } => {
                let mut remove = false;
                if let Some(session) = self.session_mut(session_id) {
                    session.report_config_fail(ReasonCode::Other);
                    remove = !session.is_started();
                }
                if remove {
                    if let Some(client) = self.clients.get_mut(&client_id) {
                        client.remove_session(session_id);
                    }
                    self.session_owner.remove(&session_id);
                }
                self.lifecycle = NanLifecycle::Idle;
            }
        }
        self.resolve_deferred_and_parked(owning_client, now);
    }

    fn resolve_deferred_and_parked(&mut self, completed_client: Option<ClientId>, now: Instant) {
        if let Some(cid) = completed_client {
            if self.deferred_disconnects.remove(&cid) {
                self.teardown_client(cid, now);
            }
        }
        if let Some(cmd) = self.parked.pop_front() {
            self.replay(cmd, now);
        }
    }

    fn replay(&mut self, cmd: Command, now: Instant) {
        match cmd {
            Command::EnableUsage => self.enable_usage(now),
            Command::Connect { client_id, uid, callback, config } => self.connect(client_id, uid, callback, config, now),
            Command::Publish { client_id, config, callback } => self.publish(client_id, config, callback, now),
            Command::Subscribe { client_id, config, callback } => self.subscribe(client_id, config, callback, now),
            Command::UpdatePublish { client_id, session_id, config } => self.update_publish(client_id, session_id, config, now),
            Command::UpdateSubscribe { client_id, session_id, config } => self.update_subscribe(client_id, session_id, config, now),
        }
    }

    fn apply_queue_outcomes(&mut self, outcomes: Vec<QueueOutcome>) {
        for outcome in outcomes {
            match outcome {
                QueueOutcome::Success { session_id, message_id } => {
                    if let Some(session) = self.session_mut(session_id) {
                        session.report_message_send_success(message_id);
                    }
                }
                QueueOutcome::Fail { session_id, message_id, reason } => {
                    if let Some(session) = self.session_mut(session_id) {
                        session.report_message_send_fail(message_id, reason);
                    }
                }
            }
        }
    }

    fn sync_send_timer(&mut self, now: Instant) {
        if self.queue.is_timer_armed() {
            if self.send_timeout_deadline.is_none() {
                self.send_timeout_deadline = Some(now + self.config.send_message_timeout);
            }
        } else {
            self.send_timeout_deadline = None;
        }
    }

    fn allocate_session_id(&mut self) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    fn session(&self, session_id: SessionId) -> Option<&SessionState> {
        let client_id = *self.session_owner.get(&session_id)?;
        self.clients.get(&client_id)?.session(session_id)
    }

    fn session_mut(&mut self, session_id: SessionId) -> Option<&mut SessionState> {
        let client_id = *self.session_owner.get(&session_id)?;
        self.clients.get_mut(&client_id)?.session_mut(session_id)
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn lifecycle(&self) -> NanLifecycle {
        self.lifecycle
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn session_ids_for(&self, client_id: ClientId) -> Vec<SessionId> {
        self.clients.get(&client_id).map(|c| c.session_ids()).unwrap_or_default()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn has_pending_transaction(&self) -> bool {
        self.pending.is_some()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn host_queue_len(&self) -> usize {
        self.queue.host_len()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn firmware_queue_len(&self) -> usize {
        self.queue.firmware_len()
    }
}

#[cfg(test)]
#[path = "state_machine_tests.rs"]
mod tests;
