// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use std::fmt;

/// Closed, wire-stable set of reason codes a driver or the core can attach
/// to a failed operation. This set is never extended without a protocol
/// version bump — callers may match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    Other,
    NoResources,
    InvalidArgs,
    TxFail,
    NoMatchSession,
    AlreadyConnectedIncompatConfig,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Other => "REASON_OTHER",
            Self::NoResources => "REASON_NO_RESOURCES",
            Self::InvalidArgs => "REASON_INVALID_ARGS",
            Self::TxFail => "REASON_TX_FAIL",
            Self::NoMatchSession => "REASON_NO_MATCH_SESSION",
            Self::AlreadyConnectedIncompatConfig => "REASON_ALREADY_CONNECTED_INCOMPAT_CONFIG",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a session was torn down, reported on `onSessionTerminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    Done,
    Fail,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "TERMINATE_REASON_DONE",
            Self::Fail => "TERMINATE_REASON_FAIL",
        }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned synchronously by the app-facing API, distinct from the
/// [`ReasonCode`] failures delivered asynchronously over a callback. These
/// only occur when a call cannot even be admitted onto the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The engine's command loop has shut down; no further calls are
    /// admitted.
    ShuttingDown,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShuttingDown => f.write_str("engine is shutting down"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
