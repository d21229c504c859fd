// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Shared identifiers and value types threaded through every component.
//!
//! These are arena-style integer handles rather than pointers: a
//! [`SessionId`] or [`ClientId`] is a lookup key into a map owned by the
//! [`crate::state_machine::StateMachine`], never a back-reference embedded
//! in the thing it names. This sidesteps the Client-holds-Session,
//! Session-needs-Client cycle entirely.

use std::fmt;

/// App-chosen identifier for a connected client. Unique among connected
/// clients; the app is responsible for not reusing one still in use.
pub type ClientId = u32;

/// Core-assigned identifier for a publish or subscribe session. Strictly
/// monotonically increasing for the life of the process (data model
/// invariant); never reused even after the session is torn down.
pub type SessionId = u64;

/// Driver-assigned small integer identifying a discovered peer within one
/// session. Stable for the life of that peer's presence in the session.
pub type PeerId = u32;

/// 6-byte hardware address.
pub type Mac = [u8; 6];

/// 16-bit correlator between an outbound driver command and its
/// asynchronous response. Always nonzero; wraps around on overflow.
pub type TransactionId = u16;

/// App-chosen identifier for an outbound message, echoed back on the
/// terminal send callback.
pub type MessageId = u32;

/// Kind of a discovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Publish,
    Subscribe,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => f.write_str("publish"),
            Self::Subscribe => f.write_str("subscribe"),
        }
    }
}

/// Per-client configuration request, merged across all connected clients by
/// [`crate::config_merge::ConfigMerger`] into the single active
/// [`GlobalConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRequest {
    pub master_preference: u8,
    pub cluster_low: u16,
    pub cluster_high: u16,
    pub support_5g: bool,
    pub enable_identity_change_callback: bool,
}

impl Default for ConfigRequest {
    fn default() -> Self {
        Self {
            master_preference: 0,
            cluster_low: 0,
            cluster_high: 0xffff,
            support_5g: false,
            enable_identity_change_callback: false,
        }
    }
}

/// The merged configuration currently (or about to be) programmed into the
/// driver.
pub type GlobalConfig = ConfigRequest;

/// Capabilities fetched exactly once after enable and treated as immutable
/// thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub max_queue_depth: usize,
    pub max_service_name_len: usize,
    pub max_concurrent_publishes: usize,
    pub max_concurrent_subscribes: usize,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_queue_depth: 2,
            max_service_name_len: 255,
            max_concurrent_publishes: 8,
            max_concurrent_subscribes: 8,
        }
    }
}

/// App-level configuration for a `publish` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishConfig {
    pub service_name: String,
    pub service_specific_info: Vec<u8>,
    pub match_filter: Vec<u8>,
}

/// App-level configuration for a `subscribe` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeConfig {
    pub service_name: String,
    pub service_specific_info: Vec<u8>,
    pub match_filter: Vec<u8>,
}

/// Either side of a publish/subscribe config update, carrying its
/// [`SessionKind`] so [`crate::session::SessionState::update_config`] can
/// reject a kind mismatch without touching the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionConfig {
    Publish(PublishConfig),
    Subscribe(SubscribeConfig),
}

impl SessionConfig {
    pub fn kind(&self) -> SessionKind {
        match self {
            Self::Publish(_) => SessionKind::Publish,
            Self::Subscribe(_) => SessionKind::Subscribe,
        }
    }
}

/// Minimal ranging request handed to the (out of scope) RTT subsystem once
/// peer ids are resolved to MAC addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttParams {
    pub peer_id: PeerId,
}
