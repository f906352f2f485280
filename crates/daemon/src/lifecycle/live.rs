// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory map of live executions.
//!
//! Primary key is the execution id; a secondary `app_id → execution_id`
//! index is maintained under the same lock, so resolution by either
//! form is a lookup, not a scan. At most one live handle exists per
//! application.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use vea_core::{AppId, AppKind, AppState, ExecutionId};

/// Hot cache entry for one live (running or paused) execution.
#[derive(Debug, Clone)]
pub struct LiveHandle {
    pub execution_id: ExecutionId,
    pub app_id: AppId,
    pub name: String,
    pub kind: AppKind,
    pub container_handle: String,
    pub status: AppState,
    pub started_at: DateTime<Utc>,
    pub data_path: PathBuf,
}

#[derive(Default)]
struct Maps {
    by_exec: HashMap<String, LiveHandle>,
    by_app: HashMap<String, String>,
}

/// The live-handle map. Reads never block lifecycle mutation for long;
/// both indexes mutate together under one writer lock.
#[derive(Default)]
pub struct LiveMap {
    inner: RwLock<Maps>,
}

impl LiveMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handle, replacing any previous execution of the same
    /// application.
    pub fn insert(&self, handle: LiveHandle) {
        let mut maps = self.inner.write();
        if let Some(old_exec) = maps.by_app.remove(handle.app_id.as_str()) {
            maps.by_exec.remove(&old_exec);
        }
        maps.by_app
            .insert(handle.app_id.as_str().to_string(), handle.execution_id.as_str().to_string());
        maps.by_exec.insert(handle.execution_id.as_str().to_string(), handle);
    }

    pub fn get_by_exec(&self, execution_id: &str) -> Option<LiveHandle> {
        self.inner.read().by_exec.get(execution_id).cloned()
    }

    pub fn get_by_app(&self, app_id: &str) -> Option<LiveHandle> {
        let maps = self.inner.read();
        maps.by_app.get(app_id).and_then(|exec| maps.by_exec.get(exec)).cloned()
    }

    /// Resolve an execution id to its owning application.
    pub fn app_for_exec(&self, execution_id: &str) -> Option<AppId> {
        self.inner.read().by_exec.get(execution_id).map(|h| h.app_id.clone())
    }

    pub fn remove_by_app(&self, app_id: &str) -> Option<LiveHandle> {
        let mut maps = self.inner.write();
        let exec = maps.by_app.remove(app_id)?;
        maps.by_exec.remove(&exec)
    }

    /// Update the cached status; false when the app has no live handle.
    pub fn set_status(&self, app_id: &str, status: AppState) -> bool {
        let mut maps = self.inner.write();
        let Some(exec) = maps.by_app.get(app_id).cloned() else {
            return false;
        };
        match maps.by_exec.get_mut(&exec) {
            Some(handle) => {
                handle.status = status;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_exec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<LiveHandle> {
        let mut handles: Vec<LiveHandle> = self.inner.read().by_exec.values().cloned().collect();
        handles.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        handles
    }
}

#[cfg(test)]
#[path = "live_tests.rs"]
mod tests;
