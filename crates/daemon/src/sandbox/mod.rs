// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox driver: the narrow capability surface over the container
//! engine.
//!
//! The three artifact kinds (script, binary, container) share one
//! lifecycle surface and differ only in how [`DockerDriver`] materializes
//! the artifact at create time. The lifecycle core and the reconciler
//! only ever see opaque handles and the operations below.

pub(crate) mod docker;

pub use docker::DockerDriver;

#[cfg(test)]
mod fake;
#[cfg(test)]
pub use fake::{DriverCall, FakeSandbox};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vea_core::{AppId, AppKind, ExecutionId, ResourceLimits};
use vea_store::LogStream;

/// Errors from sandbox operations, mirroring the driver contract.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("artifact unusable: {0}")]
    ArtifactUnusable(String),

    #[error("resource denied: {0}")]
    ResourceDenied(String),

    #[error("sandbox already started")]
    AlreadyStarted,

    #[error("sandbox not running")]
    NotRunning,

    #[error("sandbox not paused")]
    NotPaused,

    #[error("operation unsupported for kind {0}")]
    UnsupportedForKind(AppKind),

    #[error("sandbox in use: {0}")]
    InUse(String),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("container engine unavailable: {0}")]
    Unavailable(String),
}

/// Observed sandbox state, as reported by `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Created,
    Running,
    Paused,
    Exited,
    /// The engine has no trace of the handle.
    Missing,
}

/// Point-in-time inspection result.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub status: SandboxStatus,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Inspection {
    pub fn missing() -> Self {
        Self { status: SandboxStatus::Missing, exit_code: None, started_at: None }
    }
}

/// Everything the driver needs to materialize a sandbox.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub app_id: AppId,
    pub execution_id: ExecutionId,
    pub kind: AppKind,
    /// Opaque artifact: source text, executable payload, or image ref.
    pub artifact: String,
    pub limits: ResourceLimits,
    pub env: Vec<(String, String)>,
    /// Dependencies to install inside the sandbox before the entrypoint.
    pub dependencies: Vec<String>,
    /// Host-side working directory bind-mounted into the sandbox.
    pub data_path: PathBuf,
}

/// One console line pumped out of `attach_logs`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleLine {
    pub stream: LogStream,
    pub line: String,
}

/// Capability surface over the container engine.
#[async_trait]
pub trait SandboxDriver: Send + Sync + 'static {
    /// Materialize the artifact; the sandbox exists but is not running.
    /// Returns the opaque handle used by every other operation.
    async fn create(&self, spec: &CreateSpec) -> Result<String, SandboxError>;

    async fn start(&self, handle: &str) -> Result<(), SandboxError>;

    async fn pause(&self, handle: &str) -> Result<(), SandboxError>;

    async fn resume(&self, handle: &str) -> Result<(), SandboxError>;

    /// Graceful stop; force-kill once `grace` expires. Returns the exit
    /// code when the engine reports one.
    async fn stop(&self, handle: &str, grace: Duration) -> Result<Option<i64>, SandboxError>;

    /// Remove a stopped sandbox. Fails with `InUse` while running.
    async fn remove(&self, handle: &str) -> Result<(), SandboxError>;

    async fn inspect(&self, handle: &str) -> Result<Inspection, SandboxError>;

    /// Follow console output from the current tail. Lines flow into
    /// `tx` until `cancel` fires or the sandbox goes away; the pump
    /// task owns reconnection to a restarted stream.
    async fn attach_logs(
        &self,
        handle: &str,
        tx: mpsc::Sender<ConsoleLine>,
        cancel: CancellationToken,
    ) -> Result<(), SandboxError>;

    /// Idempotent best-effort stop-then-remove, used by the reconciler
    /// and by rollback paths. Never fails; strays are retried on the
    /// next cycle.
    async fn reap(&self, handle: &str);

    /// Inspect, folding an unknown handle into `Missing`. The
    /// reconciler treats "the engine has never heard of it" as an
    /// observation, not a failure.
    async fn observe(&self, handle: &str) -> Result<Inspection, SandboxError> {
        match self.inspect(handle).await {
            Ok(inspection) => Ok(inspection),
            Err(SandboxError::NotFound(_)) => Ok(Inspection::missing()),
            Err(e) => Err(e),
        }
    }
}
