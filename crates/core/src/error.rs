// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-visible error taxonomy.
//!
//! Every failure a caller can observe collapses into one of these kinds;
//! the kind string travels in the `error` field of error responses and
//! drives retry behavior on both sides.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request or invalid input. Never retried.
    Validation,
    /// Unknown application id. No state change.
    NotFound,
    /// Lifecycle state-machine violation.
    InvalidTransition,
    /// Idempotent success variant of start.
    AlreadyRunning,
    /// Idempotent success variant of stop.
    AlreadyStopped,
    /// A configured limit would be exceeded.
    ResourceDenied,
    /// Sandbox runtime failure.
    DriverError,
    /// Signal gateway failure; surfaced as a warning, never fails the
    /// lifecycle operation.
    BrokerError,
    /// Request timed out; best-effort rollback attempted.
    DeadlineExceeded,
    /// Store corruption or invariant violation. Fatal to the operation.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::AlreadyStopped => "already_stopped",
            ErrorKind::ResourceDenied => "resource_denied",
            ErrorKind::DriverError => "driver_error",
            ErrorKind::BrokerError => "broker_error",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
