// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle state machine and the durable runtime-state record.
//!
//! The transition table is the single authority on what lifecycle
//! operations are legal; the lifecycle core consults it before touching
//! the sandbox driver, and any other attempt is an `invalid_transition`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AppId, ExecutionId};

/// Lifecycle state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// Installed but never started (or not auto-started).
    Installed,
    Running,
    Paused,
    Stopped,
    /// Observed crash or failed start; cleared by the next start.
    Error,
    /// Terminal. The record is gone once reconciliation completes.
    Removed,
}

impl AppState {
    /// Live states hold a sandbox and a live handle (invariant: a live
    /// handle exists iff the runtime state is running or paused).
    pub fn is_live(&self) -> bool {
        matches!(self, AppState::Running | AppState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppState::Removed)
    }

    /// Whether the transition `self -> to` is allowed.
    ///
    /// Remove is reachable from every state; the lifecycle core stops a
    /// live sandbox first, so by the time the state flips to `removed`
    /// nothing is running.
    pub fn can_transition_to(&self, to: AppState) -> bool {
        use AppState::*;
        match (self, to) {
            (_, Removed) => !self.is_terminal(),
            (Installed, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Stopped) | (Paused, Stopped) => true,
            (Running, Error) | (Paused, Error) => true,
            (Stopped, Running) => true,
            (Error, Running) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AppState {
    /// Renders the state exactly as it appears on the wire.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppState::Installed => "installed",
            AppState::Running => "running",
            AppState::Paused => "paused",
            AppState::Stopped => "stopped",
            AppState::Error => "error",
            AppState::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

/// The durable observed-state row; at most one per application,
/// replaced atomically on each start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStateRecord {
    pub app_id: AppId,
    pub execution_id: ExecutionId,
    pub current_state: AppState,
    /// Opaque sandbox-driver handle (container id or name).
    pub container_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub last_heartbeat: DateTime<Utc>,
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
