// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! The bounded send-message queue: a host-side FIFO plus a firmware-side
//! in-flight set, with retry-with-same-`messageId` semantics and a single
//! shared timeout for the whole in-flight batch.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::driver::NativeDriver;
use crate::error::ReasonCode;
use crate::transaction::{TransactionContext, TransactionKind, TransactionRegistry};
use crate::types::{ClientId, Mac, MessageId, PeerId, SessionId, TransactionId};

/// A message waiting for a firmware in-flight slot.
#[derive(Debug, Clone)]
pub struct HostQueuedSend {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub requestor_id: PeerId,
    pub pub_sub_id: u32,
    pub dest_mac: Mac,
    pub payload: Vec<u8>,
    /// Retries requested by the app at `sendMessage` time. Immutable once
    /// queued; [`FwQueuedSend::retries_left`] is the mutable counter.
    pub retries_left: u32,
}

/// A message submitted to the driver and awaiting a terminal outcome.
struct FwQueuedSend {
    original: HostQueuedSend,
    retries_left: u32,
}

/// Outcome the caller (the [`crate::state_machine::StateMachine`]) must
/// deliver to the owning session's callback. The queue never touches
/// [`crate::session::SessionState`] directly — it only knows session and
/// message ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    Success { session_id: SessionId, message_id: MessageId },
    Fail { session_id: SessionId, message_id: MessageId, reason: ReasonCode },
}

/// Bounded host queue plus firmware in-flight set, per §4.2.
pub struct SendMessageQueue {
    host: VecDeque<HostQueuedSend>,
    firmware: HashMap<TransactionId, FwQueuedSend>,
    /// Capacity of `firmware`, equal to `Capabilities::max_queue_depth`.
    capacity: usize,
    /// Upper bound on `host`'s length, independent of `capacity`.
    max_host_depth: usize,
    timer_armed: bool,
}

impl SendMessageQueue {
    pub fn new(capacity: usize, max_host_depth: usize) -> Self {
        Self {
            host: VecDeque::new(),
            firmware: HashMap::new(),
            capacity,
            max_host_depth,
            timer_armed: false,
        }
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty() && self.firmware.is_empty()
    }

    /// Append `msg` to the host queue and attempt to drain. Rejects
    /// immediately with `NoResources` if the host queue is already at its
    /// configured depth, without ever touching the driver.
    pub fn enqueue(
        &mut self,
        msg: HostQueuedSend,
        registry: &mut TransactionRegistry,
        driver: &dyn NativeDriver,
    ) -> Vec<QueueOutcome> {
        if self.host.len() >= self.max_host_depth {
            warn!(message_id = msg.message_id, "host send queue full, rejecting");
            return vec![QueueOutcome::Fail {
                session_id: msg.session_id,
                message_id: msg.message_id,
                reason: ReasonCode::NoResources,
            }];
        }
        self.host.push_back(msg);
        self.drain(registry, driver)
    }

    /// While the firmware set has capacity and the host queue is
    /// non-empty, pop the head, allocate a transaction id, and call the
    /// driver. A synchronous refusal is reported as `TX_FAIL` without
    /// consuming a firmware slot.
    fn drain(&mut self, registry: &mut TransactionRegistry, driver: &dyn NativeDriver) -> Vec<QueueOutcome> {
        let mut outcomes = Vec::new();
        while self.firmware.len() < self.capacity {
            let Some(msg) = self.host.pop_front() else {
                break;
            };
            let session_id = msg.session_id;
            let message_id = msg.message_id;
            let tid = registry.allocate_untracked(TransactionContext {
                kind: TransactionKind::SendMessage,
                client_id: Some(msg.client_id),
                session_id: Some(session_id),
            });
            let accepted = driver.send_message(tid, msg.pub_sub_id, msg.requestor_id, msg.dest_mac, &msg.payload, message_id);
            if accepted {
                debug!(tid, message_id, "sendMessage dispatched");
                let retries_left = msg.retries_left;
                self.firmware.insert(tid, FwQueuedSend { original: msg, retries_left });
            } else {
                let _ = registry.claim(tid);
                warn!(tid, message_id, "driver synchronously refused sendMessage");
                outcomes.push(QueueOutcome::Fail { session_id, message_id, reason: ReasonCode::TxFail });
            }
        }
        outcomes
    }

    fn retire(&mut self, tid: TransactionId, registry: &mut TransactionRegistry) -> Option<FwQueuedSend> {
        let entry = self.firmware.remove(&tid)?;
        let _ = registry.claim(tid);
        Some(entry)
    }

    fn disarm_if_empty(&mut self) {
        if self.firmware.is_empty() {
            self.timer_armed = false;
        }
    }

    /// Driver confirmed the message is queued in firmware. Returns `true`
    /// exactly when the send-message timer must now be (re-)armed — the
    /// transition from an idle batch to one in-flight entry.
    pub fn on_queued_success(&mut self, tid: TransactionId) -> bool {
        if !self.firmware.contains_key(&tid) {
            debug!(tid, "queuedSuccess for unknown transaction, discarded");
            return false;
        }
        if self.timer_armed {
            false
        } else {
            self.timer_armed = true;
            true
        }
    }

    /// Driver rejected the message after accepting it for dispatch. Removes
    /// it, drains the freed slot, and reports a terminal failure.
    pub fn on_queued_fail(
        &mut self,
        tid: TransactionId,
        reason: ReasonCode,
        registry: &mut TransactionRegistry,
        driver: &dyn NativeDriver,
    ) -> Vec<QueueOutcome> {
        let Some(entry) = self.retire(tid, registry) else {
            debug!(tid, "queuedFail for unknown transaction, discarded");
            return Vec::new();
        };
        self.disarm_if_empty();
        let mut outcomes = vec![QueueOutcome::Fail {
            session_id: entry.original.session_id,
            message_id: entry.original.message_id,
            reason,
        }];
        outcomes.extend(self.drain(registry, driver));
        outcomes
    }

    /// Message landed on the air successfully.
    pub fn on_tx_success(&mut self, tid: TransactionId, registry: &mut TransactionRegistry, driver: &dyn NativeDriver) -> Vec<QueueOutcome> {
        let Some(entry) = self.retire(tid, registry) else {
            debug!(tid, "txSuccess for unknown transaction, discarded");
            return Vec::new();
        };
        self.disarm_if_empty();
        let mut outcomes = vec![QueueOutcome::Success {
            session_id: entry.original.session_id,
            message_id: entry.original.message_id,
        }];
        outcomes.extend(self.drain(registry, driver));
        outcomes
    }

    /// On-air send failed. Retries under the same `messageId` with a fresh
    /// transaction id, without consuming another host-queue slot, until
    /// retries are exhausted.
    pub fn on_tx_fail(
        &mut self,
        tid: TransactionId,
        reason: ReasonCode,
        registry: &mut TransactionRegistry,
        driver: &dyn NativeDriver,
    ) -> Vec<QueueOutcome> {
        let Some(mut entry) = self.retire(tid, registry) else {
            debug!(tid, "txFail for unknown transaction, discarded");
            return Vec::new();
        };

        if entry.retries_left == 0 {
            self.disarm_if_empty();
            return vec![QueueOutcome::Fail {
                session_id: entry.original.session_id,
                message_id: entry.original.message_id,
                reason,
            }];
        }

        entry.retries_left -= 1;
        let message_id = entry.original.message_id;
        let new_tid = registry.allocate_untracked(TransactionContext {
            kind: TransactionKind::SendMessage,
            client_id: Some(entry.original.client_id),
            session_id: Some(entry.original.session_id),
        });
        let accepted = driver.send_message(
            new_tid,
            entry.original.pub_sub_id,
            entry.original.requestor_id,
            entry.original.dest_mac,
            &entry.original.payload,
            message_id,
        );
        if accepted {
            debug!(tid = new_tid, message_id, retries_left = entry.retries_left, "sendMessage retried");
            let retries_left = entry.retries_left;
            self.firmware.insert(new_tid, FwQueuedSend { original: entry.original, retries_left });
            Vec::new()
        } else {
            let _ = registry.claim(new_tid);
            self.disarm_if_empty();
            vec![QueueOutcome::Fail { session_id: entry.original.session_id, message_id, reason: ReasonCode::TxFail }]
        }
    }

    /// `HAL_SEND_MESSAGE_TIMEOUT` expired: fail every currently in-flight
    /// message and clear the set. Any driver callback that later arrives
    /// for one of these transaction ids finds nothing in `firmware` and is
    /// silently discarded.
    pub fn on_send_timeout(&mut self, registry: &mut TransactionRegistry, driver: &dyn NativeDriver) -> Vec<QueueOutcome> {
        let expired: Vec<(TransactionId, FwQueuedSend)> = self.firmware.drain().collect();
        for (tid, _) in &expired {
            let _ = registry.claim(*tid);
        }
        self.timer_armed = false;
        warn!(count = expired.len(), "send-message timeout, failing in-flight batch");
        let mut outcomes: Vec<QueueOutcome> = expired
            .into_iter()
            .map(|(_, entry)| QueueOutcome::Fail {
                session_id: entry.original.session_id,
                message_id: entry.original.message_id,
                reason: ReasonCode::TxFail,
            })
            .collect();
        outcomes.extend(self.drain(registry, driver));
        outcomes
    }

    /// Remove every host- and firmware-queued entry belonging to
    /// `session_id`, releasing their transaction ids, without reporting any
    /// callback (session teardown suppresses them per §4.2's edge case).
    pub fn teardown_session(&mut self, session_id: SessionId, registry: &mut TransactionRegistry, driver: &dyn NativeDriver) -> Vec<QueueOutcome> {
        self.host.retain(|m| m.session_id != session_id);

        let dead_tids: Vec<TransactionId> = self
            .firmware
            .iter()
            .filter(|(_, e)| e.original.session_id == session_id)
            .map(|(tid, _)| *tid)
            .collect();
        for tid in dead_tids {
            self.firmware.remove(&tid);
            let _ = registry.claim(tid);
        }
        self.disarm_if_empty();
        self.drain(registry, driver)
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn host_len(&self) -> usize {
        self.host.len()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn firmware_len(&self) -> usize {
        self.firmware.len()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
