// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! One [`ClientState`] per connected application.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::callback::EventCallback;
use crate::session::SessionState;
use crate::types::{ClientId, ConfigRequest, SessionId};

/// State owned by one connected application. Owns its sessions; deleting a
/// `ClientState` deletes all of them (data model invariant).
pub struct ClientState {
    pub client_id: ClientId,
    pub uid: u32,
    pub callback: Arc<dyn EventCallback>,
    pub config: ConfigRequest,
    /// `BTreeMap` so iteration order matches session-id allocation order,
    /// which is also app-callback emission order (§5 ordering guarantee).
    sessions: BTreeMap<SessionId, SessionState>,
}

impl ClientState {
    pub fn new(client_id: ClientId, uid: u32, callback: Arc<dyn EventCallback>, config: ConfigRequest) -> Self {
        Self {
            client_id,
            uid,
            callback,
            config,
            sessions: BTreeMap::new(),
        }
    }

    pub fn insert_session(&mut self, session: SessionState) {
        self.sessions.insert(session.session_id, session);
    }

    pub fn session(&self, session_id: SessionId) -> Option<&SessionState> {
        self.sessions.get(&session_id)
    }

    pub fn session_mut(&mut self, session_id: SessionId) -> Option<&mut SessionState> {
        self.sessions.get_mut(&session_id)
    }

    pub fn remove_session(&mut self, session_id: SessionId) -> Option<SessionState> {
        self.sessions.remove(&session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionState> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut SessionState> {
        self.sessions.values_mut()
    }

    /// Drain every session owned by this client, for teardown.
    pub fn take_sessions(&mut self) -> Vec<SessionState> {
        std::mem::take(&mut self.sessions).into_values().collect()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
