// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Record builders shared by store and daemon tests.

use chrono::{TimeZone, Utc};
use indexmap::IndexSet;

use crate::app::{AppKind, ApplicationRecord, DesiredState, ResourceLimits};
use crate::id::{AppId, ExecutionId};
use crate::signal::{SignalAccess, SignalSpec};
use crate::state::{AppState, RuntimeStateRecord};

/// Builder for [`ApplicationRecord`] fixtures.
pub struct AppRecordBuilder {
    record: ApplicationRecord,
}

impl AppRecordBuilder {
    /// A script app with sane defaults, id canonicalized under `VEA-`.
    pub fn new(id: &str) -> Self {
        let app_id = AppId::canonical(id, crate::id::DEFAULT_APP_ID_PREFIX)
            .unwrap_or_else(|_| AppId::from_canonical("VEA-fixture"));
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now);
        Self {
            record: ApplicationRecord {
                data_path: std::env::temp_dir().join("vea").join(app_id.as_str()),
                app_id,
                name: id.to_string(),
                kind: AppKind::Script,
                version: "0.1.0".to_string(),
                artifact: "print('hello')".to_string(),
                declared_dependencies: IndexSet::new(),
                declared_signals: Vec::new(),
                resource_limits: ResourceLimits { cpu_share: 512, memory_bytes: 256 * 1024 * 1024 },
                desired_state: DesiredState::Stopped,
                created_at,
                last_start_at: None,
            },
        }
    }

    pub fn kind(mut self, kind: AppKind) -> Self {
        self.record.kind = kind;
        self
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.record.artifact = artifact.into();
        self
    }

    pub fn desired(mut self, desired: DesiredState) -> Self {
        self.record.desired_state = desired;
        self
    }

    pub fn dependency(mut self, name: &str) -> Self {
        self.record.declared_dependencies.insert(name.to_string());
        self
    }

    pub fn signal(mut self, path: &str, access: SignalAccess) -> Self {
        self.record.declared_signals.push(SignalSpec::new(path, access));
        self
    }

    pub fn build(self) -> ApplicationRecord {
        self.record
    }
}

/// A runtime-state row matching `record`, in the given state.
pub fn runtime_state(record: &ApplicationRecord, state: AppState) -> RuntimeStateRecord {
    RuntimeStateRecord {
        app_id: record.app_id.clone(),
        execution_id: ExecutionId::mint(),
        current_state: state,
        container_handle: format!("vea-{}", record.app_id.stripped("VEA-")),
        exit_code: None,
        last_heartbeat: record.created_at,
    }
}
