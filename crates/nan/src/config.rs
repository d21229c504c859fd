// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use std::time::Duration;

/// Tunable parameters for a running [`crate::engine::Engine`].
///
/// Everything here has a nominal default matching the constants named in
/// the design (`HAL_COMMAND_TIMEOUT`, `HAL_SEND_MESSAGE_TIMEOUT`); embedders
/// only need to override these for tests that want tighter deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on every individual driver transaction (`getCapabilities`,
    /// `enableAndConfigure`, `publish`, `subscribe`, `stopPublish`,
    /// `stopSubscribe`, `sendMessage`). Expiry synthesizes a failure of the
    /// enclosing operation.
    pub command_timeout: Duration,
    /// Bound shared by the entire firmware send-message in-flight set (one
    /// timer for the whole batch, not per-message).
    pub send_message_timeout: Duration,
    /// Maximum number of host-queued sends per client kept waiting for a
    /// firmware slot, independent of `Capabilities::max_queue_depth`.
    pub max_host_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            send_message_timeout: Duration::from_secs(5),
            max_host_queue_depth: 256,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
