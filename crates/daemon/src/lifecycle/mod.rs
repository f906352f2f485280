// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle core: the state machine, the live map, and the per-app
//! serial lanes.
//!
//! Every public operation resolves its id through the identity rules,
//! then runs under that application's mutex: one serial lane per app,
//! distinct apps in parallel. Nested lanes are never taken, so there is
//! no deadlock graph. Persisted state commits only after the sandbox
//! side effects succeed; anything half-done is the reconciler's job to
//! converge.

mod deploy;
mod live;
mod reconcile;

pub use deploy::{
    detect_dependencies, DeploySpec, DetectedDependency, DetectionReport, ProgressEvent,
    ProgressSink,
};
pub use live::{LiveHandle, LiveMap};
pub use reconcile::ReconcileSummary;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vea_core::{
    AppId, AppKind, AppState, ApplicationRecord, Clock, DesiredState, ErrorKind, ExecutionId,
    RuntimeStateRecord, SystemClock,
};
use vea_store::{AppFilter, LogRecord, Store, StoreError};

use crate::config::Config;
use crate::console::ConsoleHub;
use crate::identity::Identity;
use crate::sandbox::{CreateSpec, SandboxDriver, SandboxError};
use crate::signals::SignalGateway;

/// Attempts for a failing sandbox stop before giving up on this request
/// and leaving the rest to the reconciler.
const STOP_RETRIES: u32 = 3;
const STOP_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),

    #[error("Application not found: {0}")]
    NotFound(String),

    #[error("invalid transition: cannot {action} while {from}")]
    InvalidTransition { from: AppState, action: &'static str },

    #[error("live application limit reached ({limit})")]
    ResourceDenied { limit: usize },

    #[error(transparent)]
    Driver(#[from] SandboxError),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// The wire error kind for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Validation(_) => ErrorKind::Validation,
            LifecycleError::NotFound(_) => ErrorKind::NotFound,
            LifecycleError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            LifecycleError::ResourceDenied { .. } => ErrorKind::ResourceDenied,
            LifecycleError::Driver(SandboxError::ResourceDenied(_)) => ErrorKind::ResourceDenied,
            LifecycleError::Driver(_) => ErrorKind::DriverError,
            LifecycleError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            LifecycleError::Store(_) | LifecycleError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Remediation hints surfaced alongside validation and driver
    /// failures.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            LifecycleError::Validation(_) => {
                vec!["check the request fields against the control schema".to_string()]
            }
            LifecycleError::NotFound(_) => {
                vec!["run list_deployed_apps to see installed applications".to_string()]
            }
            LifecycleError::ResourceDenied { limit } => vec![
                format!("at most {limit} applications may be live; stop one first"),
                "raise max_live_apps if this node has headroom".to_string(),
            ],
            LifecycleError::Driver(SandboxError::ArtifactUnusable(_)) => vec![
                "verify the artifact source or image reference".to_string(),
                "for container apps, pull the image onto this node first".to_string(),
            ],
            LifecycleError::Driver(SandboxError::Unavailable(_)) => vec![
                "check that the container engine is running".to_string(),
                "verify the sandbox_socket path".to_string(),
            ],
            _ => Vec::new(),
        }
    }
}

/// Status variant of a successful (or idempotently successful) op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Success,
    AlreadyRunning,
    AlreadyStopped,
}

/// What a lifecycle operation reports back to the control plane.
#[derive(Debug, Clone)]
pub struct OpOutcome {
    pub app_id: AppId,
    pub status: OpStatus,
    pub state: AppState,
    pub execution_id: Option<ExecutionId>,
    pub result: String,
    pub warnings: Vec<String>,
}

impl OpOutcome {
    fn success(app_id: AppId, state: AppState, result: impl Into<String>) -> Self {
        Self {
            app_id,
            status: OpStatus::Success,
            state,
            execution_id: None,
            result: result.into(),
            warnings: Vec::new(),
        }
    }
}

/// Point-in-time status of one application.
#[derive(Debug, Clone)]
pub struct StatusView {
    pub app_id: AppId,
    pub name: String,
    pub kind: AppKind,
    pub version: String,
    pub state: AppState,
    pub desired_state: DesiredState,
    pub execution_id: Option<ExecutionId>,
    pub exit_code: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_start_at: Option<DateTime<Utc>>,
}

/// The lifecycle core. One per supervisor process; owns all mutable
/// lifecycle state explicitly (nothing package-global).
pub struct LifecycleCore<C: Clock = SystemClock> {
    config: Config,
    store: Arc<Store>,
    driver: Arc<dyn SandboxDriver>,
    gateway: Arc<dyn SignalGateway>,
    console: Arc<ConsoleHub<C>>,
    identity: Identity,
    live: LiveMap,
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    clock: C,
}

impl<C: Clock> LifecycleCore<C> {
    pub fn new(
        config: Config,
        store: Arc<Store>,
        driver: Arc<dyn SandboxDriver>,
        gateway: Arc<dyn SignalGateway>,
        console: Arc<ConsoleHub<C>>,
        clock: C,
    ) -> Self {
        let identity = Identity::new(config.app_id_prefix.clone());
        Self {
            config,
            store,
            driver,
            gateway,
            console,
            identity,
            live: LiveMap::new(),
            lanes: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn gateway(&self) -> &dyn SignalGateway {
        self.gateway.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn console(&self) -> Arc<ConsoleHub<C>> {
        Arc::clone(&self.console)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Resolve caller input (canonical id, bare id, or execution id) to
    /// the canonical app id of an existing record.
    pub fn resolve(&self, input: &str) -> Result<AppId, LifecycleError> {
        if ExecutionId::looks_like(input) {
            return self
                .live
                .app_for_exec(input)
                .ok_or_else(|| LifecycleError::NotFound(input.to_string()));
        }
        let app_id = self
            .identity
            .canonicalize(input)
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;
        if self.store.get_application(&app_id).is_none() {
            return Err(LifecycleError::NotFound(input.to_string()));
        }
        Ok(app_id)
    }

    /// The serial lane for one application.
    fn lane(&self, app_id: &AppId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.lanes
                .lock()
                .entry(app_id.as_str().to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Effective state as the ops see it: live map first, then the
    /// persisted runtime row, else `installed`.
    fn effective_state(&self, app_id: &AppId, rt: Option<&RuntimeStateRecord>) -> AppState {
        if let Some(handle) = self.live.get_by_app(app_id.as_str()) {
            return handle.status;
        }
        rt.map(|r| r.current_state).unwrap_or(AppState::Installed)
    }

    // ── start ───────────────────────────────────────────────────────────

    pub async fn start(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, LifecycleError> {
        let app_id = self.resolve(input)?;
        let lane = self.lane(&app_id);
        let _guard = lane.lock().await;
        self.start_locked(&app_id, cancel).await
    }

    /// Start under an already-held lane.
    pub(crate) async fn start_locked(
        &self,
        app_id: &AppId,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, LifecycleError> {
        let record = self
            .store
            .get_application(app_id)
            .ok_or_else(|| LifecycleError::NotFound(app_id.to_string()))?;
        let rt = self.store.get_runtime_state(app_id);
        let current = self.effective_state(app_id, rt.as_ref());

        if current == AppState::Running {
            let execution_id = rt.map(|r| r.execution_id);
            return Ok(OpOutcome {
                app_id: app_id.clone(),
                status: OpStatus::AlreadyRunning,
                state: AppState::Running,
                execution_id,
                result: format!("{} is already running", self.identity.strip(app_id)),
                warnings: Vec::new(),
            });
        }
        if !current.can_transition_to(AppState::Running) {
            return Err(LifecycleError::InvalidTransition { from: current, action: "start" });
        }
        if self.live.len() >= self.config.max_live_apps {
            return Err(LifecycleError::ResourceDenied { limit: self.config.max_live_apps });
        }

        // Mint and persist the execution before any sandbox side
        // effect; a crash here is observed as running/missing and
        // reconciled to stopped.
        let execution_id = self.identity.mint_execution_id();
        let now = self.clock.now_utc();
        self.store.upsert_runtime_state(RuntimeStateRecord {
            app_id: app_id.clone(),
            execution_id: execution_id.clone(),
            current_state: AppState::Running,
            container_handle: String::new(),
            exit_code: None,
            last_heartbeat: now,
        })?;

        let spec = CreateSpec {
            app_id: app_id.clone(),
            execution_id: execution_id.clone(),
            kind: record.kind,
            artifact: record.artifact.clone(),
            limits: record.resource_limits,
            env: vec![
                ("VEA_APP_ID".to_string(), app_id.to_string()),
                ("VEA_EXECUTION_ID".to_string(), execution_id.to_string()),
            ],
            dependencies: record.declared_dependencies.iter().cloned().collect(),
            data_path: record.data_path.clone(),
        };

        let handle = match self.driver.create(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                self.mark_error(app_id, &execution_id, String::new(), None)?;
                return Err(e.into());
            }
        };

        if cancel.is_cancelled() {
            return self.rollback_start(app_id, &execution_id, &handle).await;
        }

        self.store.upsert_runtime_state(RuntimeStateRecord {
            app_id: app_id.clone(),
            execution_id: execution_id.clone(),
            current_state: AppState::Running,
            container_handle: handle.clone(),
            exit_code: None,
            last_heartbeat: self.clock.now_utc(),
        })?;

        if let Err(e) = self.driver.start(&handle).await {
            self.mark_error(app_id, &execution_id, handle.clone(), None)?;
            return Err(e.into());
        }

        if cancel.is_cancelled() {
            return self.rollback_start(app_id, &execution_id, &handle).await;
        }

        let mut warnings = Vec::new();

        // Broker trouble never fails a start.
        if let Err(e) = self.gateway.open_session(&record).await {
            warn!(app_id = %app_id, error = %e, "signal session failed to open");
            warnings.push(format!("signal session unavailable: {e}"));
        }

        // Console trouble never fails a start either.
        if let Err(e) = self.console.attach(app_id, &execution_id, &handle).await {
            warn!(app_id = %app_id, error = %e, "console stream failed to attach");
            warnings.push(format!("console stream unavailable: {e}"));
        }

        self.live.insert(LiveHandle {
            execution_id: execution_id.clone(),
            app_id: app_id.clone(),
            name: record.name.clone(),
            kind: record.kind,
            container_handle: handle,
            status: AppState::Running,
            started_at: now,
            data_path: record.data_path.clone(),
        });

        self.store.upsert_application(ApplicationRecord {
            desired_state: DesiredState::Running,
            last_start_at: Some(now),
            ..record
        })?;

        info!(app_id = %app_id, execution_id = %execution_id, "application started");
        Ok(OpOutcome {
            app_id: app_id.clone(),
            status: OpStatus::Success,
            state: AppState::Running,
            execution_id: Some(execution_id),
            result: format!("{} started", self.identity.strip(app_id)),
            warnings,
        })
    }

    /// Deadline hit mid-start: tear the fresh sandbox down and leave
    /// the app stopped so the next start can retry.
    async fn rollback_start(
        &self,
        app_id: &AppId,
        execution_id: &ExecutionId,
        handle: &str,
    ) -> Result<OpOutcome, LifecycleError> {
        warn!(app_id = %app_id, execution_id = %execution_id, "start cancelled, reaping fresh sandbox");
        self.driver.reap(handle).await;
        self.store.upsert_runtime_state(RuntimeStateRecord {
            app_id: app_id.clone(),
            execution_id: execution_id.clone(),
            current_state: AppState::Stopped,
            container_handle: String::new(),
            exit_code: None,
            last_heartbeat: self.clock.now_utc(),
        })?;
        Err(LifecycleError::DeadlineExceeded)
    }

    fn mark_error(
        &self,
        app_id: &AppId,
        execution_id: &ExecutionId,
        container_handle: String,
        exit_code: Option<i64>,
    ) -> Result<(), LifecycleError> {
        self.store.upsert_runtime_state(RuntimeStateRecord {
            app_id: app_id.clone(),
            execution_id: execution_id.clone(),
            current_state: AppState::Error,
            container_handle,
            exit_code,
            last_heartbeat: self.clock.now_utc(),
        })?;
        Ok(())
    }

    // ── stop ────────────────────────────────────────────────────────────

    pub async fn stop(
        &self,
        input: &str,
        grace: Option<Duration>,
    ) -> Result<OpOutcome, LifecycleError> {
        let app_id = self.resolve(input)?;
        let lane = self.lane(&app_id);
        let _guard = lane.lock().await;
        self.stop_locked(&app_id, grace.unwrap_or_else(|| self.config.stop_grace())).await
    }

    pub(crate) async fn stop_locked(
        &self,
        app_id: &AppId,
        grace: Duration,
    ) -> Result<OpOutcome, LifecycleError> {
        let record = self
            .store
            .get_application(app_id)
            .ok_or_else(|| LifecycleError::NotFound(app_id.to_string()))?;
        let rt = self.store.get_runtime_state(app_id);
        let current = self.effective_state(app_id, rt.as_ref());

        if !current.is_live() {
            return Ok(OpOutcome {
                app_id: app_id.clone(),
                status: OpStatus::AlreadyStopped,
                state: current,
                execution_id: rt.map(|r| r.execution_id),
                result: format!("{} is already stopped", self.identity.strip(app_id)),
                warnings: Vec::new(),
            });
        }

        let Some(rt) = rt else {
            // Live state without a runtime row violates the data model.
            return Err(LifecycleError::Store(StoreError::Corrupt(format!(
                "live handle for {app_id} without runtime state"
            ))));
        };

        let exit_code = match self.stop_with_retries(&rt.container_handle, grace).await {
            Ok(code) => code,
            Err(e) => {
                // Give up on this request; mark the row errored and let
                // the reconciler keep reaping on its cadence.
                self.mark_error(
                    app_id,
                    &rt.execution_id,
                    rt.container_handle.clone(),
                    rt.exit_code,
                )?;
                return Err(e.into());
            }
        };

        self.gateway.close_session(app_id).await;
        self.console.detach(rt.execution_id.as_str());
        self.live.remove_by_app(app_id.as_str());

        self.store.upsert_runtime_state(RuntimeStateRecord {
            app_id: app_id.clone(),
            execution_id: rt.execution_id.clone(),
            current_state: AppState::Stopped,
            container_handle: rt.container_handle.clone(),
            exit_code,
            last_heartbeat: self.clock.now_utc(),
        })?;
        self.store.upsert_application(ApplicationRecord {
            desired_state: DesiredState::Stopped,
            ..record
        })?;

        info!(app_id = %app_id, execution_id = %rt.execution_id, "application stopped");
        Ok(OpOutcome {
            app_id: app_id.clone(),
            status: OpStatus::Success,
            state: AppState::Stopped,
            execution_id: Some(rt.execution_id),
            result: format!("{} stopped", self.identity.strip(app_id)),
            warnings: Vec::new(),
        })
    }

    /// Bounded retries with linear backoff around a failing engine stop.
    async fn stop_with_retries(
        &self,
        handle: &str,
        grace: Duration,
    ) -> Result<Option<i64>, SandboxError> {
        let mut last = None;
        for attempt in 1..=STOP_RETRIES {
            match self.driver.stop(handle, grace).await {
                Ok(code) => return Ok(code),
                // Already gone: as stopped as it gets.
                Err(SandboxError::NotFound(_)) => return Ok(None),
                Err(e) => {
                    warn!(container = handle, attempt, error = %e, "sandbox stop failed");
                    last = Some(e);
                    if attempt < STOP_RETRIES {
                        tokio::time::sleep(STOP_RETRY_BACKOFF * attempt).await;
                    }
                }
            }
        }
        Err(last.unwrap_or(SandboxError::Unavailable("stop failed".to_string())))
    }

    // ── pause / resume ──────────────────────────────────────────────────

    pub async fn pause(&self, input: &str) -> Result<OpOutcome, LifecycleError> {
        let app_id = self.resolve(input)?;
        let lane = self.lane(&app_id);
        let _guard = lane.lock().await;

        let rt = self.store.get_runtime_state(&app_id);
        let current = self.effective_state(&app_id, rt.as_ref());
        if current != AppState::Running {
            return Err(LifecycleError::InvalidTransition { from: current, action: "pause" });
        }
        let rt = rt.ok_or_else(|| {
            LifecycleError::Store(StoreError::Corrupt(format!(
                "running {app_id} without runtime state"
            )))
        })?;

        self.driver.pause(&rt.container_handle).await?;
        self.store
            .upsert_runtime_state(RuntimeStateRecord { current_state: AppState::Paused, ..rt.clone() })?;
        self.live.set_status(app_id.as_str(), AppState::Paused);
        // The signal session stays open across pause; it closes on stop
        // or remove.

        info!(app_id = %app_id, "application paused");
        Ok(OpOutcome {
            execution_id: Some(rt.execution_id),
            ..OpOutcome::success(
                app_id.clone(),
                AppState::Paused,
                format!("{} paused", self.identity.strip(&app_id)),
            )
        })
    }

    pub async fn resume(&self, input: &str) -> Result<OpOutcome, LifecycleError> {
        let app_id = self.resolve(input)?;
        let lane = self.lane(&app_id);
        let _guard = lane.lock().await;

        let rt = self.store.get_runtime_state(&app_id);
        let current = self.effective_state(&app_id, rt.as_ref());
        if current != AppState::Paused {
            return Err(LifecycleError::InvalidTransition { from: current, action: "resume" });
        }
        let rt = rt.ok_or_else(|| {
            LifecycleError::Store(StoreError::Corrupt(format!(
                "paused {app_id} without runtime state"
            )))
        })?;

        self.driver.resume(&rt.container_handle).await?;
        self.store
            .upsert_runtime_state(RuntimeStateRecord { current_state: AppState::Running, ..rt.clone() })?;
        self.live.set_status(app_id.as_str(), AppState::Running);

        info!(app_id = %app_id, "application resumed");
        Ok(OpOutcome {
            execution_id: Some(rt.execution_id),
            ..OpOutcome::success(
                app_id.clone(),
                AppState::Running,
                format!("{} resumed", self.identity.strip(&app_id)),
            )
        })
    }

    // ── remove ──────────────────────────────────────────────────────────

    pub async fn remove(&self, input: &str) -> Result<OpOutcome, LifecycleError> {
        let app_id = self.resolve(input)?;
        let lane = self.lane(&app_id);
        let _guard = lane.lock().await;

        let record = self
            .store
            .get_application(&app_id)
            .ok_or_else(|| LifecycleError::NotFound(input.to_string()))?;
        let rt = self.store.get_runtime_state(&app_id);
        let current = self.effective_state(&app_id, rt.as_ref());

        // Implicit stop first; failures degrade to a best-effort reap.
        if current.is_live() {
            if let Err(e) = self.stop_locked(&app_id, self.config.stop_grace()).await {
                warn!(app_id = %app_id, error = %e, "implicit stop before remove failed; reaping");
            }
        }

        if let Some(rt) = self.store.get_runtime_state(&app_id) {
            if !rt.container_handle.is_empty() {
                self.driver.reap(&rt.container_handle).await;
            }
            self.console.detach(rt.execution_id.as_str());
        }
        self.gateway.close_session(&app_id).await;
        self.live.remove_by_app(app_id.as_str());

        // Mark the desire first so a crash mid-delete converges to
        // removal on the next reconcile pass.
        self.store.upsert_application(ApplicationRecord {
            desired_state: DesiredState::Removed,
            ..record
        })?;
        self.store.delete_application(&app_id)?;
        self.lanes.lock().remove(app_id.as_str());

        info!(app_id = %app_id, "application removed");
        Ok(OpOutcome::success(
            app_id.clone(),
            AppState::Removed,
            format!("{} uninstalled", self.identity.strip(&app_id)),
        ))
    }

    // ── restart ─────────────────────────────────────────────────────────

    pub async fn restart(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<OpOutcome, LifecycleError> {
        let app_id = self.resolve(input)?;
        let lane = self.lane(&app_id);
        let _guard = lane.lock().await;

        let current =
            self.effective_state(&app_id, self.store.get_runtime_state(&app_id).as_ref());
        if current.is_live() {
            self.stop_locked(&app_id, self.config.stop_grace()).await?;
        }
        self.start_locked(&app_id, cancel).await
    }

    // ── status / list ───────────────────────────────────────────────────

    pub fn get_status(&self, input: &str) -> Result<StatusView, LifecycleError> {
        let app_id = self.resolve(input)?;
        let record = self
            .store
            .get_application(&app_id)
            .ok_or_else(|| LifecycleError::NotFound(input.to_string()))?;
        Ok(self.view(record))
    }

    pub fn list(&self, filter: AppFilter) -> Vec<StatusView> {
        self.store.list_applications(filter).into_iter().map(|r| self.view(r)).collect()
    }

    fn view(&self, record: ApplicationRecord) -> StatusView {
        let rt = self.store.get_runtime_state(&record.app_id);
        let state = self.effective_state(&record.app_id, rt.as_ref());
        StatusView {
            app_id: record.app_id,
            name: record.name,
            kind: record.kind,
            version: record.version,
            state,
            desired_state: record.desired_state,
            execution_id: rt.as_ref().map(|r| r.execution_id.clone()),
            exit_code: rt.and_then(|r| r.exit_code),
            created_at: record.created_at,
            last_start_at: record.last_start_at,
        }
    }

    pub fn tail_logs(&self, input: &str, n: usize) -> Result<Vec<LogRecord>, LifecycleError> {
        let app_id = self.resolve(input)?;
        Ok(self.store.tail_logs(&app_id, n))
    }

    /// The stored artifact and kind of an installed application, for
    /// detection over already-deployed apps.
    pub fn artifact_of(&self, input: &str) -> Result<(String, AppKind), LifecycleError> {
        let app_id = self.resolve(input)?;
        let record = self
            .store
            .get_application(&app_id)
            .ok_or_else(|| LifecycleError::NotFound(input.to_string()))?;
        Ok((record.artifact, record.kind))
    }
}

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
