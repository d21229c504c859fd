// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Allocates transaction ids for outbound driver commands and maps driver
//! responses back to the operation that issued them.
//!
//! The registry itself places no bound on how many transactions can be
//! outstanding at once — that's the [`crate::state_machine::StateMachine`]'s
//! job (it only ever inserts one at a time, per the "at most one
//! outstanding driver transaction" invariant). The registry's only
//! contract is: allocate a nonzero id, remember what it's for, and hand
//! that context back exactly once when the id is claimed or it expires.

use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{ClientId, SessionId, TransactionId};

/// What an outstanding transaction is for. Mirrors the driver commands in
/// §6 that carry a transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    GetCapabilities,
    EnableConfigure,
    Publish,
    Subscribe,
    SendMessage,
}

/// Arbitrary small context recorded alongside an allocation, enough to
/// resume the originating operation when the response (or timeout) lands.
#[derive(Debug, Clone, Copy)]
pub struct TransactionContext {
    pub kind: TransactionKind,
    /// `None` for transactions with no single owning client (e.g. the
    /// initial `getCapabilities` fetch, or a reconfigure triggered by a
    /// remerge after a disconnect rather than by any one client's request).
    pub client_id: Option<ClientId>,
    pub session_id: Option<SessionId>,
}

struct PendingEntry {
    context: TransactionContext,
    /// `None` for transactions the registry only tracks for id uniqueness
    /// (the send-message queue manages its own in-flight bookkeeping and
    /// batch-level timeout; see [`TransactionRegistry::allocate_untracked`]).
    deadline: Option<Instant>,
}

/// Error returned by [`TransactionRegistry::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
    /// No such transaction id is outstanding — a stale or forged response.
    /// Per the error taxonomy this is always silently discarded by the
    /// caller; logged here at `debug!` since it is routine under
    /// cancellation.
    UnknownTransaction,
}

/// Allocates 16-bit, wrap-around, always-nonzero transaction ids.
pub struct TransactionRegistry {
    next_id: u16,
    pending: HashMap<TransactionId, PendingEntry>,
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate a new transaction id for `context`, recording `deadline` as
    /// its [`HAL_COMMAND_TIMEOUT`](crate::config::EngineConfig::command_timeout)
    /// expiry. Guaranteed nonzero; wraps past `u16::MAX` back to 1, skipping
    /// any id still in use (the in-flight set is always far smaller than
    /// 65535 entries in practice, so this always terminates).
    pub fn allocate(&mut self, context: TransactionContext, deadline: Instant) -> TransactionId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                self.next_id = 1;
            }
            if id != 0 && !self.pending.contains_key(&id) {
                self.pending.insert(id, PendingEntry { context, deadline: Some(deadline) });
                debug!(tid = id, kind = ?context.kind, "transaction allocated");
                return id;
            }
        }
    }

    /// Allocate a transaction id for `context` with no command-timeout
    /// deadline — used by [`crate::queue::SendMessageQueue`], whose
    /// in-flight entries are bounded by `HAL_SEND_MESSAGE_TIMEOUT` as a
    /// single shared batch timer rather than a per-transaction deadline.
    /// Still shares this registry's id space so a `sendMessage` transaction
    /// id can never collide with a lifecycle command's.
    pub fn allocate_untracked(&mut self, context: TransactionContext) -> TransactionId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                self.next_id = 1;
            }
            if id != 0 && !self.pending.contains_key(&id) {
                self.pending.insert(id, PendingEntry { context, deadline: None });
                debug!(tid = id, kind = ?context.kind, "transaction allocated (untracked)");
                return id;
            }
        }
    }

    /// Claim the context for `tid`, removing it from the registry. Returns
    /// [`ClaimError::UnknownTransaction`] for a response whose id was never
    /// allocated or was already claimed/expired.
    pub fn claim(&mut self, tid: TransactionId) -> Result<TransactionContext, ClaimError> {
        match self.pending.remove(&tid) {
            Some(entry) => Ok(entry.context),
            None => {
                debug!(tid, "unknown transaction, response discarded");
                Err(ClaimError::UnknownTransaction)
            }
        }
    }

    /// Remove and return every transaction whose deadline is at or before
    /// `now`, for the caller to synthesize a timeout failure for each.
    pub fn expire(&mut self, now: Instant) -> Vec<(TransactionId, TransactionContext)> {
        let expired: Vec<TransactionId> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline.is_some_and(|d| d <= now))
            .map(|(tid, _)| *tid)
            .collect();

        expired
            .into_iter()
            .filter_map(|tid| {
                self.pending.remove(&tid).map(|entry| {
                    warn!(tid, kind = ?entry.context.kind, "transaction timed out");
                    (tid, entry.context)
                })
            })
            .collect()
    }

    /// Drop every outstanding transaction without reporting anything
    /// (used on global reset / `nanDown`, where responses for torn-down
    /// state are expected to arrive and be discarded anyway).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Earliest deadline among all outstanding transactions, if any — the
    /// engine's timer loop sleeps until this instant.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|e| e.deadline).min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
