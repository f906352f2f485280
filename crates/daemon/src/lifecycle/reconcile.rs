// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desired/observed reconciliation.
//!
//! Runs once at startup and on an interval. For every application row,
//! the persisted desired state and the engine's observed state are
//! paired and driven toward agreement: crashed sandboxes become
//! `error`, vanished ones become `stopped`, surviving ones get their
//! live handle rebuilt (log stream + signal session reopened) so
//! pause/resume/stop keep working after a supervisor restart. Observed
//! wins for crashes and exits; desired wins for scale-up.

use tracing::{info, warn};

use vea_core::{AppState, ApplicationRecord, Clock, DesiredState, RuntimeStateRecord};
use vea_store::AppFilter;

use super::{LifecycleCore, LiveHandle};
use crate::sandbox::{Inspection, SandboxStatus};

/// What one reconcile pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Application rows examined.
    pub apps: usize,
    /// Live handles rebuilt from persisted state.
    pub rebuilt: usize,
    /// Crashes observed and recorded.
    pub errored: usize,
    /// Sandboxes stopped or rows downgraded to stopped.
    pub stopped: usize,
    /// Runtime rows cleared.
    pub cleared: usize,
    /// Applications fully removed.
    pub removed: usize,
    /// Apps skipped because the engine was unreachable.
    pub skipped: usize,
}

impl<C: Clock> LifecycleCore<C> {
    /// One full reconcile pass over every application row.
    pub async fn reconcile_once(&self) -> ReconcileSummary {
        let records = self.store.list_applications(AppFilter::default());
        let mut summary = ReconcileSummary { apps: records.len(), ..Default::default() };

        for record in records {
            let lane = self.lane(&record.app_id);
            let _guard = lane.lock().await;
            if let Err(e) = self.reconcile_app(&record, &mut summary).await {
                warn!(app_id = %record.app_id, error = %e, "reconcile pass failed for app");
            }
        }

        let changed = summary.rebuilt
            + summary.errored
            + summary.stopped
            + summary.cleared
            + summary.removed
            > 0;
        if changed {
            info!(
                apps = summary.apps,
                rebuilt = summary.rebuilt,
                errored = summary.errored,
                stopped = summary.stopped,
                cleared = summary.cleared,
                removed = summary.removed,
                "reconcile pass applied changes"
            );
        }
        summary
    }

    async fn reconcile_app(
        &self,
        record: &ApplicationRecord,
        summary: &mut ReconcileSummary,
    ) -> Result<(), super::LifecycleError> {
        let rt = self.store.get_runtime_state(&record.app_id);

        let observation = match &rt {
            Some(rt) if !rt.container_handle.is_empty() => {
                match self.driver.observe(&rt.container_handle).await {
                    Ok(inspection) => inspection,
                    Err(e) => {
                        // Engine unreachable: observe nothing this
                        // cycle rather than acting on a guess.
                        warn!(app_id = %record.app_id, error = %e, "engine unreachable, skipping");
                        summary.skipped += 1;
                        return Ok(());
                    }
                }
            }
            _ => Inspection::missing(),
        };

        match record.desired_state {
            DesiredState::Running => {
                self.reconcile_desired_running(record, rt, observation, summary).await
            }
            DesiredState::Stopped => {
                self.reconcile_desired_stopped(record, rt, observation, summary).await
            }
            DesiredState::Removed => self.reconcile_desired_removed(record, rt, summary).await,
        }
    }

    async fn reconcile_desired_running(
        &self,
        record: &ApplicationRecord,
        rt: Option<RuntimeStateRecord>,
        observation: Inspection,
        summary: &mut ReconcileSummary,
    ) -> Result<(), super::LifecycleError> {
        // No committed start yet: installs with auto-start perform the
        // start themselves; the reconciler does not initiate first runs.
        let Some(rt) = rt else {
            return Ok(());
        };

        match observation.status {
            SandboxStatus::Running | SandboxStatus::Paused => {
                let observed_state = if observation.status == SandboxStatus::Running {
                    AppState::Running
                } else {
                    // An explicitly paused app stays paused.
                    AppState::Paused
                };

                if self.live.get_by_app(record.app_id.as_str()).is_none() {
                    self.rebuild_live_handle(record, &rt, observed_state).await;
                    summary.rebuilt += 1;
                }

                if rt.current_state != observed_state {
                    self.store.upsert_runtime_state(RuntimeStateRecord {
                        current_state: observed_state,
                        ..rt
                    })?;
                }
            }
            SandboxStatus::Exited => {
                // Observed wins: the app crashed or exited on its own.
                info!(
                    app_id = %record.app_id,
                    exit_code = ?observation.exit_code,
                    "observed exit, marking error"
                );
                self.teardown_live(&record.app_id, &rt).await;
                self.store.upsert_runtime_state(RuntimeStateRecord {
                    current_state: AppState::Error,
                    exit_code: observation.exit_code,
                    last_heartbeat: self.clock.now_utc(),
                    ..rt
                })?;
                summary.errored += 1;
            }
            SandboxStatus::Created => {
                // Crash landed between create and start: reap the husk
                // and let the next start retry cleanly.
                self.driver.reap(&rt.container_handle).await;
                self.teardown_live(&record.app_id, &rt).await;
                self.store.upsert_runtime_state(RuntimeStateRecord {
                    current_state: AppState::Stopped,
                    container_handle: String::new(),
                    last_heartbeat: self.clock.now_utc(),
                    ..rt
                })?;
                summary.stopped += 1;
            }
            SandboxStatus::Missing => {
                if rt.current_state != AppState::Stopped {
                    info!(app_id = %record.app_id, "sandbox missing, downgrading to stopped");
                    self.teardown_live(&record.app_id, &rt).await;
                    self.store.upsert_runtime_state(RuntimeStateRecord {
                        current_state: AppState::Stopped,
                        container_handle: String::new(),
                        last_heartbeat: self.clock.now_utc(),
                        ..rt
                    })?;
                    summary.stopped += 1;
                }
            }
        }
        Ok(())
    }

    async fn reconcile_desired_stopped(
        &self,
        record: &ApplicationRecord,
        rt: Option<RuntimeStateRecord>,
        observation: Inspection,
        summary: &mut ReconcileSummary,
    ) -> Result<(), super::LifecycleError> {
        let Some(rt) = rt else {
            return Ok(());
        };

        match observation.status {
            SandboxStatus::Running | SandboxStatus::Paused | SandboxStatus::Created => {
                info!(app_id = %record.app_id, "desired stopped, stopping stray sandbox");
                if let Err(e) = self.driver.stop(&rt.container_handle, self.config.stop_grace()).await
                {
                    warn!(app_id = %record.app_id, error = %e, "stray stop failed, will retry");
                    return Ok(());
                }
                self.driver.reap(&rt.container_handle).await;
                self.teardown_live(&record.app_id, &rt).await;
                self.store.clear_runtime_state(&record.app_id)?;
                summary.stopped += 1;
            }
            SandboxStatus::Exited => {
                self.driver.reap(&rt.container_handle).await;
                self.teardown_live(&record.app_id, &rt).await;
                self.store.clear_runtime_state(&record.app_id)?;
                summary.cleared += 1;
            }
            SandboxStatus::Missing => {
                self.teardown_live(&record.app_id, &rt).await;
                self.store.clear_runtime_state(&record.app_id)?;
                summary.cleared += 1;
            }
        }
        Ok(())
    }

    async fn reconcile_desired_removed(
        &self,
        record: &ApplicationRecord,
        rt: Option<RuntimeStateRecord>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), super::LifecycleError> {
        info!(app_id = %record.app_id, "completing removal");
        if let Some(rt) = &rt {
            if !rt.container_handle.is_empty() {
                self.driver.reap(&rt.container_handle).await;
            }
            self.teardown_live(&record.app_id, rt).await;
        }
        self.gateway.close_session(&record.app_id).await;
        self.live.remove_by_app(record.app_id.as_str());
        self.store.delete_application(&record.app_id)?;
        summary.removed += 1;
        Ok(())
    }

    /// Rebuild the hot state for a surviving sandbox: live handle,
    /// console reader, signal session. The single most important
    /// recovery property: pause/resume/stop must work right after a
    /// supervisor restart.
    async fn rebuild_live_handle(
        &self,
        record: &ApplicationRecord,
        rt: &RuntimeStateRecord,
        status: AppState,
    ) {
        info!(app_id = %record.app_id, execution_id = %rt.execution_id, "rebuilding live handle");

        if let Err(e) = self.console.attach(&record.app_id, &rt.execution_id, &rt.container_handle).await
        {
            warn!(app_id = %record.app_id, error = %e, "console reattach failed");
        }
        if let Err(e) = self.gateway.open_session(record).await {
            warn!(app_id = %record.app_id, error = %e, "signal session reopen failed");
        }

        self.live.insert(LiveHandle {
            execution_id: rt.execution_id.clone(),
            app_id: record.app_id.clone(),
            name: record.name.clone(),
            kind: record.kind,
            container_handle: rt.container_handle.clone(),
            status,
            started_at: record.last_start_at.unwrap_or(rt.last_heartbeat),
            data_path: record.data_path.clone(),
        });
    }

    /// Drop the hot state for an execution that is no longer live.
    async fn teardown_live(&self, app_id: &vea_core::AppId, rt: &RuntimeStateRecord) {
        self.console.detach(rt.execution_id.as_str());
        self.gateway.close_session(app_id).await;
        self.live.remove_by_app(app_id.as_str());
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
