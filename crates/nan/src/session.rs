// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! One [`SessionState`] per active publish or subscribe.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::callback::SessionCallback;
use crate::error::{ReasonCode, TerminateReason};
use crate::types::{Mac, PeerId, SessionConfig, SessionId, SessionKind};

/// State for one active publish or subscribe session.
///
/// A session has no driver-assigned pub/sub id until the first successful
/// driver response — no callback ever exposes that id to the app; the app
/// only ever sees the core-assigned [`SessionId`].
pub struct SessionState {
    pub session_id: SessionId,
    pub client_id: crate::types::ClientId,
    pub kind: SessionKind,
    pub callback: Arc<dyn SessionCallback>,
    /// `None` until the driver confirms creation.
    pub pub_sub_id: Option<u32>,
    /// Set once terminated; suppresses all further app callbacks for this
    /// session even if stray driver events still reference it.
    terminated: bool,
    peers: HashMap<PeerId, Mac>,
}

impl SessionState {
    pub fn new(
        session_id: SessionId,
        client_id: crate::types::ClientId,
        kind: SessionKind,
        callback: Arc<dyn SessionCallback>,
    ) -> Self {
        Self {
            session_id,
            client_id,
            kind,
            callback,
            pub_sub_id: None,
            terminated: false,
            peers: HashMap::new(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_started(&self) -> bool {
        self.pub_sub_id.is_some()
    }

    /// Record the driver-confirmed pub/sub id and emit `onSessionStarted`.
    /// A no-op if already terminated (a stale success for a session the
    /// app already tore down locally).
    pub fn mark_started(&mut self, pub_sub_id: u32) {
        if self.terminated {
            return;
        }
        self.pub_sub_id = Some(pub_sub_id);
        debug!(session_id = self.session_id, pub_sub_id, "session started");
        self.callback.on_session_started(self.session_id);
    }

    /// Validate a `new_cfg`'s kind against this session before the caller
    /// issues the driver update. Returns `false` (and reports
    /// `onSessionConfigFail(OTHER)` itself) on a kind mismatch, without
    /// touching the driver.
    pub fn accepts_config(&self, new_cfg: &SessionConfig) -> bool {
        if self.terminated {
            return false;
        }
        if new_cfg.kind() != self.kind {
            self.callback.on_session_config_fail(ReasonCode::Other);
            return false;
        }
        true
    }

    pub fn report_config_success(&self) {
        if self.terminated {
            return;
        }
        self.callback.on_session_config_success();
    }

    pub fn report_config_fail(&self, reason: ReasonCode) {
        if self.terminated {
            return;
        }
        self.callback.on_session_config_fail(reason);
    }

    /// Mark this session terminated and emit exactly one
    /// `onSessionTerminated`. Idempotent: a second call (e.g. a driver
    /// notification racing an app-initiated `terminate`) is a silent no-op.
    pub fn mark_terminated(&mut self, reason: TerminateReason) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        debug!(session_id = self.session_id, %reason, "session terminated");
        self.callback.on_session_terminated(reason);
    }

    /// Upsert the `(requestor_id -> mac)` mapping and report `onMatch`.
    pub fn on_match(&mut self, requestor_id: PeerId, mac: Mac, peer_ssi: &[u8], match_filter: &[u8]) {
        if self.terminated {
            return;
        }
        self.peers.insert(requestor_id, mac);
        self.callback.on_match(requestor_id, peer_ssi, match_filter);
    }

    /// Upsert the `(requestor_id -> mac)` mapping and report
    /// `onMessageReceived`.
    pub fn on_message_received(&mut self, requestor_id: PeerId, mac: Mac, message: &[u8]) {
        if self.terminated {
            return;
        }
        self.peers.insert(requestor_id, mac);
        self.callback.on_message_received(requestor_id, message);
    }

    /// Resolve a peer id to its current MAC, for an outbound `sendMessage`.
    pub fn resolve_peer(&self, peer_id: PeerId) -> Option<Mac> {
        self.peers.get(&peer_id).copied()
    }

    pub fn report_message_send_success(&self, message_id: crate::types::MessageId) {
        if self.terminated {
            return;
        }
        self.callback.on_message_send_success(message_id);
    }

    pub fn report_message_send_fail(&self, message_id: crate::types::MessageId, reason: ReasonCode) {
        if self.terminated {
            return;
        }
        self.callback.on_message_send_fail(message_id, reason);
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
