// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable application records (the desired-state table rows).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::id::AppId;
use crate::signal::SignalSpec;

/// How an application artifact is materialized inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    /// Interpreted source text, run under the configured script image.
    Script,
    /// A native executable, bind-mounted into the base image.
    Binary,
    /// A container image reference, run directly.
    Container,
}

impl std::fmt::Display for AppKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppKind::Script => write!(f, "script"),
            AppKind::Binary => write!(f, "binary"),
            AppKind::Container => write!(f, "container"),
        }
    }
}

/// The state the caller wants the application to be in. The reconciler
/// drives observed state toward this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Running,
    Stopped,
    Removed,
}

/// Static sandbox resource limits. The supervisor sets these once at
/// create time; it does not schedule CPU across applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_share: u32,
    pub memory_bytes: u64,
}

/// One durable desired-state row.
///
/// Created by install/deploy, mutated only by the lifecycle core,
/// destroyed only by remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub app_id: AppId,
    pub name: String,
    pub kind: AppKind,
    #[serde(default)]
    pub version: String,
    /// Opaque artifact: inline source for scripts, an encoded executable
    /// for binaries, an image reference for containers. The sandbox
    /// driver decides how to materialize it.
    pub artifact: String,
    #[serde(default)]
    pub declared_dependencies: IndexSet<String>,
    #[serde(default)]
    pub declared_signals: Vec<SignalSpec>,
    pub resource_limits: ResourceLimits,
    pub desired_state: DesiredState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start_at: Option<DateTime<Utc>>,
    /// Sandbox-visible working directory for this application.
    pub data_path: PathBuf,
}

impl ApplicationRecord {
    /// Declared write access for `path`?
    pub fn may_write(&self, path: &str) -> bool {
        self.declared_signals
            .iter()
            .any(|s| s.path == path && s.access == crate::signal::SignalAccess::Write)
    }

    /// Declared read or subscribe access for `path`?
    pub fn may_read(&self, path: &str) -> bool {
        self.declared_signals.iter().any(|s| {
            s.path == path
                && matches!(
                    s.access,
                    crate::signal::SignalAccess::Read | crate::signal::SignalAccess::Subscribe
                )
        })
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
