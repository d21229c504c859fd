// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! App-facing callback traits. Object safe so each [`crate::client::ClientState`]
//! and [`crate::session::SessionState`] can hold a `Arc<dyn ...>` without a
//! generic parameter threading through the whole engine.

use crate::error::{ReasonCode, TerminateReason};
use crate::types::{MessageId, PeerId, SessionId};

/// Per-client event callback, registered on `connect` and invoked for the
/// lifetime of the client.
pub trait EventCallback: Send + Sync + 'static {
    fn on_connect_success(&self);
    fn on_connect_fail(&self, reason: ReasonCode);
    fn on_identity_changed(&self);
    fn on_nan_down(&self, reason: ReasonCode);
}

/// Per-session callback, registered on `publish`/`subscribe` and invoked
/// for the lifetime of that session.
///
/// `onSessionStarted` always precedes any `onMatch`, `onMessageReceived`,
/// or `onMessageSend*` for the same session (data model invariant); no
/// callback fires after `onSessionTerminated`.
pub trait SessionCallback: Send + Sync + 'static {
    fn on_session_started(&self, session_id: SessionId);
    fn on_session_config_success(&self);
    fn on_session_config_fail(&self, reason: ReasonCode);
    fn on_session_terminated(&self, reason: TerminateReason);
    fn on_match(&self, peer_id: PeerId, peer_ssi: &[u8], match_filter: &[u8]);
    fn on_message_received(&self, peer_id: PeerId, message: &[u8]);
    fn on_message_send_success(&self, message_id: MessageId);
    fn on_message_send_fail(&self, message_id: MessageId, reason: ReasonCode);
}

/// System-wide listener for the "state changed" broadcast emitted on every
/// usage transition (§6), delivered to every user, not just connected
/// clients.
pub trait UsageBroadcast: Send + Sync + 'static {
    fn on_state_changed(&self, enabled: bool);
}
