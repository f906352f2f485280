// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound control messages.
//!
//! Every `*-response` pairs with its request type and carries the
//! response contract fields: `type`, `id`, `status`, `result`, `state`,
//! `timestamp`. Unsolicited frames (`deployment_progress`,
//! `console_output`) share the same tagged envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vea_core::{AppKind, AppState, DesiredState, ErrorKind, ValidationReport};
use vea_store::{LogRecord, LogStream};

use crate::lifecycle::{
    DetectionReport, LifecycleError, OpOutcome, OpStatus, ProgressEvent, StatusView,
};

/// Response status variants, including the idempotent successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Error,
    AlreadyRunning,
    AlreadyStopped,
}

impl From<OpStatus> for ReplyStatus {
    fn from(status: OpStatus) -> Self {
        match status {
            OpStatus::Success => ReplyStatus::Success,
            OpStatus::AlreadyRunning => ReplyStatus::AlreadyRunning,
            OpStatus::AlreadyStopped => ReplyStatus::AlreadyStopped,
        }
    }
}

/// The shared body of lifecycle responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpReply {
    #[serde(default)]
    pub id: String,
    pub status: ReplyStatus,
    /// Human summary of what happened.
    pub result: String,
    /// Current lifecycle state after the operation.
    pub state: AppState,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub timestamp: u64,
}

impl OpReply {
    pub fn from_outcome(id: &str, outcome: OpOutcome, timestamp: u64) -> Self {
        Self {
            id: id.to_string(),
            status: outcome.status.into(),
            result: outcome.result,
            state: outcome.state,
            app_id: outcome.app_id.as_str().to_string(),
            execution_id: outcome.execution_id.map(|e| e.as_str().to_string()),
            warnings: outcome.warnings,
            timestamp,
        }
    }
}

/// One application as reported by list/status responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppStatusEntry {
    pub app_id: String,
    pub name: String,
    pub kind: AppKind,
    #[serde(default)]
    pub version: String,
    pub state: AppState,
    pub desired_state: DesiredState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start_at: Option<DateTime<Utc>>,
}

impl From<StatusView> for AppStatusEntry {
    fn from(view: StatusView) -> Self {
        Self {
            app_id: view.app_id.as_str().to_string(),
            name: view.name,
            kind: view.kind,
            version: view.version,
            state: view.state,
            desired_state: view.desired_state,
            execution_id: view.execution_id.map(|e| e.as_str().to_string()),
            exit_code: view.exit_code,
            created_at: view.created_at,
            last_start_at: view.last_start_at,
        }
    }
}

/// Response or unsolicited frame to a control-channel client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "deploy_request-response")]
    DeployRequest(OpReply),

    #[serde(rename = "smart_deploy-response")]
    SmartDeploy {
        #[serde(flatten)]
        reply: OpReply,
        detection: DetectionReport,
        validation: ValidationReport,
    },

    #[serde(rename = "run_app-response")]
    RunApp(OpReply),

    #[serde(rename = "stop_app-response")]
    StopApp(OpReply),

    #[serde(rename = "app_paused")]
    AppPaused(OpReply),

    #[serde(rename = "app_resumed")]
    AppResumed(OpReply),

    #[serde(rename = "app_uninstalled")]
    AppUninstalled(OpReply),

    #[serde(rename = "manage_app-response")]
    ManageApp(OpReply),

    #[serde(rename = "list_deployed_apps-response")]
    ListDeployedApps { id: String, apps: Vec<AppStatusEntry>, timestamp: u64 },

    #[serde(rename = "get_app_status-response")]
    GetAppStatus {
        id: String,
        app: AppStatusEntry,
        /// Recent console tail for quick inspection without a
        /// subscription.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        logs: Vec<LogRecord>,
        timestamp: u64,
    },

    #[serde(rename = "deployment_status")]
    DeploymentStatus {
        id: String,
        app_id: String,
        state: AppState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
        timestamp: u64,
    },

    #[serde(rename = "dependencies_detected")]
    DependenciesDetected { id: String, dependencies: DetectionReport, timestamp: u64 },

    #[serde(rename = "signals_validated")]
    SignalsValidated { id: String, validation: ValidationReport, timestamp: u64 },

    /// Unsolicited staged progress on the requesting connection.
    #[serde(rename = "deployment_progress")]
    DeploymentProgress {
        id: String,
        app_id: String,
        #[serde(flatten)]
        event: ProgressEvent,
        timestamp: u64,
    },

    /// Unsolicited console frame for a subscribed execution.
    #[serde(rename = "console_output")]
    ConsoleOutput {
        execution_id: String,
        app_id: String,
        stream: LogStream,
        line: String,
        offset: u64,
        timestamp: u64,
    },

    #[serde(rename = "pong")]
    Pong { id: String, timestamp: u64 },

    #[serde(rename = "error")]
    Error {
        id: String,
        /// Human-readable failure description.
        error: String,
        /// Short machine kind from the error taxonomy.
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
        timestamp: u64,
    },
}

impl Response {
    /// The standard error frame for a failed lifecycle operation.
    pub fn from_error(id: &str, error: &LifecycleError, timestamp: u64) -> Self {
        Response::Error {
            id: id.to_string(),
            error: error.to_string(),
            kind: error.kind(),
            suggestions: error.suggestions(),
            timestamp,
        }
    }

    pub fn console_frame(record: LogRecord) -> Self {
        Response::ConsoleOutput {
            execution_id: record.execution_id,
            app_id: record.app_id,
            stream: record.stream,
            line: record.line,
            offset: record.offset,
            timestamp: record.ts.timestamp_millis().max(0) as u64,
        }
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
