// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound control messages.
//!
//! Variant names map 1:1 onto the wire `type` tags; every request
//! carries a caller-chosen `id` echoed by its response.

use serde::{Deserialize, Serialize};

use vea_core::{AppKind, SignalSpec};

use crate::lifecycle::DeploySpec;

fn default_true() -> bool {
    true
}

fn default_kind() -> AppKind {
    AppKind::Script
}

/// Shared body of `deploy_request` and `smart_deploy`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployBody {
    #[serde(default)]
    pub id: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: AppKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub artifact: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<SignalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_share: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl DeployBody {
    pub fn into_spec(self) -> (String, DeploySpec) {
        (
            self.id,
            DeploySpec {
                app_id: self.app_id,
                name: self.name,
                kind: self.kind,
                version: self.version,
                artifact: self.artifact,
                dependencies: self.dependencies,
                signals: self.signals,
                cpu_share: self.cpu_share,
                memory_bytes: self.memory_bytes,
                auto_start: self.auto_start,
            },
        )
    }
}

/// Action selector for `manage_app`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManageAction {
    Start,
    Stop,
    Pause,
    Resume,
    Restart,
}

/// Request from a control-channel client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Liveness probe.
    Ping {
        #[serde(default)]
        id: String,
    },

    /// Install (and by default start) an application.
    DeployRequest(DeployBody),

    /// Deploy with dependency auto-detection folded in first.
    SmartDeploy(DeployBody),

    RunApp {
        #[serde(default)]
        id: String,
        app_id: String,
    },

    StopApp {
        #[serde(default)]
        id: String,
        app_id: String,
        /// Graceful-stop deadline override, milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        grace_ms: Option<u64>,
    },

    PauseApp {
        #[serde(default)]
        id: String,
        app_id: String,
    },

    ResumeApp {
        #[serde(default)]
        id: String,
        app_id: String,
    },

    UninstallApp {
        #[serde(default)]
        id: String,
        app_id: String,
    },

    ManageApp {
        #[serde(default)]
        id: String,
        app_id: String,
        action: ManageAction,
    },

    ListDeployedApps {
        #[serde(default)]
        id: String,
    },

    GetAppStatus {
        #[serde(default)]
        id: String,
        app_id: String,
    },

    GetDeploymentStatus {
        #[serde(default)]
        id: String,
        app_id: String,
    },

    /// Report dependencies from an inline artifact or an installed app.
    DetectDependencies {
        #[serde(default)]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
        #[serde(default = "default_kind")]
        kind: AppKind,
    },

    ValidateSignals {
        #[serde(default)]
        id: String,
        signals: Vec<SignalSpec>,
    },

    /// Attach to an execution's console stream; `console_output`
    /// frames follow until the connection closes or the execution ends.
    ConsoleSubscribe {
        #[serde(default)]
        id: String,
        execution_id: String,
    },
}

impl Request {
    /// The caller-chosen correlation id.
    pub fn id(&self) -> &str {
        match self {
            Request::Ping { id }
            | Request::RunApp { id, .. }
            | Request::StopApp { id, .. }
            | Request::PauseApp { id, .. }
            | Request::ResumeApp { id, .. }
            | Request::UninstallApp { id, .. }
            | Request::ManageApp { id, .. }
            | Request::ListDeployedApps { id }
            | Request::GetAppStatus { id, .. }
            | Request::GetDeploymentStatus { id, .. }
            | Request::DetectDependencies { id, .. }
            | Request::ValidateSignals { id, .. }
            | Request::ConsoleSubscribe { id, .. } => id,
            Request::DeployRequest(body) | Request::SmartDeploy(body) => &body.id,
        }
    }

    /// The app this request serializes on, when it names one.
    pub fn app_id(&self) -> Option<&str> {
        match self {
            Request::RunApp { app_id, .. }
            | Request::StopApp { app_id, .. }
            | Request::PauseApp { app_id, .. }
            | Request::ResumeApp { app_id, .. }
            | Request::UninstallApp { app_id, .. }
            | Request::ManageApp { app_id, .. }
            | Request::GetAppStatus { app_id, .. }
            | Request::GetDeploymentStatus { app_id, .. } => Some(app_id),
            Request::DeployRequest(body) | Request::SmartDeploy(body) => Some(&body.app_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
