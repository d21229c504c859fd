// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! The native (out of scope) collaborators: the NAN driver binding itself,
//! the data-path interface manager, and the RTT (ranging) subsystem. All
//! three are pure command sinks from the engine's point of view — object
//! safe traits so the engine can hold `Arc<dyn ...>` without knowing the
//! concrete binding.

use crate::error::ReasonCode;
use crate::types::{Capabilities, ConfigRequest, Mac, MessageId, PeerId, PublishConfig, SubscribeConfig, TransactionId};

/// Outbound command sink toward the native NAN driver binding.
///
/// Every method returns whether the command was *accepted for dispatch*,
/// not whether the operation ultimately succeeded — that result arrives
/// later as a [`DriverEvent`] posted back to the engine. A `false` return
/// is treated the same as an immediate [`ReasonCode::Other`] failure of the
/// enclosing operation: no transaction was actually issued, so no response
/// is awaited for it.
pub trait NativeDriver: Send + Sync + 'static {
    fn get_capabilities(&self, tid: TransactionId) -> bool;

    /// `notify_identity_change` is `true` on first enable, `false` on any
    /// subsequent re-configure so the driver knows whether to (re-)arm the
    /// identity-change notification path.
    fn enable_and_configure(
        &self,
        tid: TransactionId,
        config: ConfigRequest,
        notify_identity_change: bool,
    ) -> bool;

    /// Fire-and-forget: no response is awaited.
    fn disable(&self, tid: TransactionId) -> bool;

    /// Fire-and-forget: no response is awaited.
    fn deinit_nan(&self);

    fn publish(&self, tid: TransactionId, pub_id: Option<u32>, config: PublishConfig) -> bool;

    fn subscribe(&self, tid: TransactionId, sub_id: Option<u32>, config: SubscribeConfig) -> bool;

    /// Fire-and-forget: no response is awaited.
    fn stop_publish(&self, tid: TransactionId, pub_id: u32) -> bool;

    /// Fire-and-forget: no response is awaited.
    fn stop_subscribe(&self, tid: TransactionId, sub_id: u32) -> bool;

    #[allow(clippy::too_many_arguments)]
    fn send_message(
        &self,
        tid: TransactionId,
        pub_sub_id: u32,
        requestor_id: PeerId,
        dest_mac: Mac,
        payload: &[u8],
        message_id: MessageId,
    ) -> bool;
}

/// Lifecycle hooks the data-path interface manager exposes. The engine
/// calls these in response to global enable/disable/nanDown transitions;
/// it never inspects or owns data-path state itself.
pub trait DataPathManager: Send + Sync + 'static {
    fn create_all_interfaces(&self);
    fn delete_all_interfaces(&self);
    fn on_nan_down_cleanup_data_paths(&self);
}

/// The RTT (ranging) subsystem. Receives already-resolved peer MAC
/// addresses; never sees a [`PeerId`] the engine could not resolve.
pub trait RttManager: Send + Sync + 'static {
    fn start_ranging(&self, ranging_id: u32, peers: Vec<(PeerId, Mac)>);
}

/// Asynchronous responses and notifications arriving from the native
/// driver, posted onto the engine's single command loop. Unlike
/// [`NativeDriver`], this is data, not a trait: the driver binding and the
/// engine communicate through whatever posts these (a channel, an FFI
/// callback trampoline) — modeling it as an enum keeps the engine's
/// dispatch logic a single exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    CapabilitiesResponse {
        tid: TransactionId,
        capabilities: Capabilities,
    },
    ConfigSuccess {
        tid: TransactionId,
    },
    ConfigFail {
        tid: TransactionId,
        reason: ReasonCode,
    },
    SessionConfigSuccess {
        tid: TransactionId,
        is_publish: bool,
        pub_sub_id: u32,
    },
    SessionConfigFail {
        tid: TransactionId,
        is_publish: bool,
        reason: ReasonCode,
    },
    SessionTerminated {
        pub_sub_id: u32,
        is_publish: bool,
        reason: crate::error::TerminateReason,
    },
    Match {
        pub_sub_id: u32,
        requestor_id: PeerId,
        mac: Mac,
        peer_ssi: Vec<u8>,
        match_filter: Vec<u8>,
    },
    MessageReceived {
        pub_sub_id: u32,
        requestor_id: PeerId,
        mac: Mac,
        payload: Vec<u8>,
    },
    MessageQueuedSuccess {
        tid: TransactionId,
    },
    MessageQueuedFail {
        tid: TransactionId,
        reason: ReasonCode,
    },
    MessageTxSuccess {
        tid: TransactionId,
    },
    MessageTxFail {
        tid: TransactionId,
        reason: ReasonCode,
    },
    ClusterChange,
    InterfaceAddressChange,
    NanDown {
        reason: ReasonCode,
    },
}
