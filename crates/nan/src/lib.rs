// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Core state-management engine for a Wi-Fi NAN (Neighbor Awareness
//! Networking) service: tracks connected clients, publish/subscribe
//! sessions, and the single outstanding driver transaction slot, and
//! drives them from one cooperative task.

pub mod callback;
pub mod client;
pub mod config;
pub mod config_merge;
pub mod driver;
pub mod engine;
pub mod error;
pub mod queue;
pub mod session;
pub mod state_machine;
pub mod transaction;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use callback::{EventCallback, SessionCallback, UsageBroadcast};
pub use config::EngineConfig;
pub use driver::{DataPathManager, DriverEvent, NativeDriver, RttManager};
pub use engine::{DriverEventSink, Engine};
pub use error::{EngineError, ReasonCode, TerminateReason};
pub use types::{
    Capabilities, ClientId, ConfigRequest, GlobalConfig, Mac, MessageId, PeerId, PublishConfig, RttParams, SessionConfig, SessionId,
    SessionKind, SubscribeConfig, TransactionId,
};
