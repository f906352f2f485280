// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deploy flows: install, staged progress, and dependency detection.
//!
//! Smart deploy runs detection first and folds the findings into the
//! declared dependency set; plain deploy trusts the declarations. Both
//! emit staged progress events on the per-request lane before the
//! terminal response.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vea_core::{
    AppKind, ApplicationRecord, Clock, DesiredState, ResourceLimits, SignalSpec, ValidationReport,
};

use super::{LifecycleCore, LifecycleError, OpOutcome, OpStatus};

/// Caller-supplied deploy parameters, before canonicalization.
#[derive(Debug, Clone)]
pub struct DeploySpec {
    pub app_id: String,
    pub name: Option<String>,
    pub kind: AppKind,
    pub version: Option<String>,
    pub artifact: String,
    pub dependencies: Vec<String>,
    pub signals: Vec<SignalSpec>,
    pub cpu_share: Option<u32>,
    pub memory_bytes: Option<u64>,
    pub auto_start: bool,
}

/// Staged progress for long-running deploys, published on the
/// per-request channel ahead of the terminal response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProgressEvent {
    Preparing,
    InstallingDependencies { current: u32, total: u32 },
    InstallingDependency { name: String, current: u32, total: u32 },
    StartingApplication,
}

pub type ProgressSink = mpsc::Sender<ProgressEvent>;

/// One dependency surfaced by detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedDependency {
    pub name: String,
    /// The syntactic form it was found in ("import" or "require").
    pub source: String,
}

/// Detection output for `detect_dependencies` / smart deploy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub dependencies: Vec<DetectedDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub total: usize,
}

async fn emit(progress: Option<&ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = progress {
        let _ = sink.send(event).await;
    }
}

impl<C: Clock> LifecycleCore<C> {
    /// Install (and optionally start) an application from a deploy
    /// request. Progress events precede the returned outcome.
    pub async fn deploy(
        &self,
        spec: DeploySpec,
        progress: Option<&ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(OpOutcome, ValidationReport), LifecycleError> {
        emit(progress, ProgressEvent::Preparing).await;

        let app_id = self
            .identity
            .canonicalize(&spec.app_id)
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;
        if spec.artifact.trim().is_empty() {
            return Err(LifecycleError::Validation("artifact must not be empty".to_string()));
        }

        let report = self.gateway.validate(&spec.signals);
        let mut warnings: Vec<String> = report
            .invalid
            .iter()
            .map(|path| format!("declared signal {path} is not in the catalog"))
            .collect();
        warnings.extend(report.warnings.iter().cloned());

        let dependencies: IndexSet<String> = spec.dependencies.iter().cloned().collect();
        let total = dependencies.len() as u32;
        emit(progress, ProgressEvent::InstallingDependencies { current: 0, total }).await;
        for (i, name) in dependencies.iter().enumerate() {
            emit(
                progress,
                ProgressEvent::InstallingDependency {
                    name: name.clone(),
                    current: i as u32 + 1,
                    total,
                },
            )
            .await;
        }

        let lane = self.lane(&app_id);
        let _guard = lane.lock().await;

        let now = self.clock.now_utc();
        let existing = self.store.get_application(&app_id);
        let record = ApplicationRecord {
            app_id: app_id.clone(),
            name: spec.name.unwrap_or_else(|| self.identity.strip(&app_id).to_string()),
            kind: spec.kind,
            version: spec.version.unwrap_or_default(),
            artifact: spec.artifact,
            declared_dependencies: dependencies,
            declared_signals: spec.signals,
            resource_limits: ResourceLimits {
                cpu_share: spec.cpu_share.unwrap_or(self.config.default_cpu_share),
                memory_bytes: spec.memory_bytes.unwrap_or(self.config.default_memory_bytes),
            },
            desired_state: if spec.auto_start { DesiredState::Running } else { DesiredState::Stopped },
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            last_start_at: existing.as_ref().and_then(|r| r.last_start_at),
            data_path: self.config.app_data_path(app_id.as_str()),
        };
        self.store.upsert_application(record)?;
        info!(app_id = %app_id, auto_start = spec.auto_start, "application installed");

        let mut outcome = if spec.auto_start {
            emit(progress, ProgressEvent::StartingApplication).await;
            self.start_locked(&app_id, cancel).await?
        } else {
            OpOutcome {
                app_id: app_id.clone(),
                status: OpStatus::Success,
                state: vea_core::AppState::Installed,
                execution_id: None,
                result: format!("{} installed", self.identity.strip(&app_id)),
                warnings: Vec::new(),
            }
        };
        warnings.extend(outcome.warnings);
        outcome.warnings = warnings;

        Ok((outcome, report))
    }

    /// Smart deploy: detect dependencies from the artifact, merge them
    /// into the declared set, then deploy.
    pub async fn smart_deploy(
        &self,
        mut spec: DeploySpec,
        progress: Option<&ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(OpOutcome, DetectionReport, ValidationReport), LifecycleError> {
        let detection = detect_dependencies(&spec.artifact, spec.kind);
        let mut merged: IndexSet<String> = spec.dependencies.drain(..).collect();
        for dep in &detection.dependencies {
            merged.insert(dep.name.clone());
        }
        spec.dependencies = merged.into_iter().collect();

        let (outcome, report) = self.deploy(spec, progress, cancel).await?;
        Ok((outcome, detection, report))
    }
}

/// Python standard-library modules that never need installing.
const PYTHON_STDLIB: &[&str] = &[
    "argparse", "asyncio", "base64", "collections", "csv", "datetime", "enum", "functools",
    "hashlib", "io", "itertools", "json", "logging", "math", "os", "pathlib", "queue", "random",
    "re", "signal", "socket", "sqlite3", "struct", "subprocess", "sys", "threading", "time",
    "typing", "urllib", "uuid",
];

/// Node builtins, with or without the `node:` prefix.
const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "crypto", "dns", "events", "fs", "http", "https", "net",
    "os", "path", "process", "stream", "timers", "tls", "url", "util", "zlib",
];

/// Best-effort dependency detection over script artifacts.
///
/// Line-oriented scanning for python and javascript import forms minus
/// the respective stdlib; other artifact kinds yield an empty report.
pub fn detect_dependencies(artifact: &str, kind: AppKind) -> DetectionReport {
    if kind != AppKind::Script {
        return DetectionReport::default();
    }

    let mut found: IndexSet<DetectedDependency> = IndexSet::new();
    let mut saw_python = false;
    let mut saw_js = false;

    for line in artifact.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        if let Some(rest) = line.strip_prefix("import ") {
            if let Some(module) = rest.split(&[' ', '.', ',', ';'][..]).next() {
                if module.starts_with('{') || rest.contains(" from ") {
                    // javascript `import x from 'y'` form
                    if let Some(name) = js_module_in(line) {
                        saw_js = true;
                        push_external(&mut found, name, "import", NODE_BUILTINS);
                    }
                } else if !module.is_empty() {
                    saw_python = true;
                    push_external(&mut found, module.to_string(), "import", PYTHON_STDLIB);
                }
            }
        } else if let Some(rest) = line.strip_prefix("from ") {
            if let Some(module) = rest.split(&[' ', '.'][..]).next() {
                if !module.is_empty() {
                    saw_python = true;
                    push_external(&mut found, module.to_string(), "import", PYTHON_STDLIB);
                }
            }
        } else if line.contains("require(") {
            if let Some(name) = between(line, "require(", ")") {
                let name = name.trim_matches(&['\'', '"', '`'][..]).to_string();
                saw_js = true;
                push_external(&mut found, name, "require", NODE_BUILTINS);
            }
        }
    }

    let language = match (saw_python, saw_js) {
        (true, false) => Some("python".to_string()),
        (false, true) => Some("javascript".to_string()),
        _ => None,
    };
    let dependencies: Vec<DetectedDependency> = found.into_iter().collect();
    DetectionReport { total: dependencies.len(), dependencies, language }
}

fn push_external(
    found: &mut IndexSet<DetectedDependency>,
    name: String,
    source: &str,
    stdlib: &[&str],
) {
    let base = name.trim_start_matches("node:");
    // Only the package root matters for installation.
    let base = base.split('/').next().unwrap_or(base).to_string();
    if base.is_empty() || stdlib.contains(&base.as_str()) {
        return;
    }
    found.insert(DetectedDependency { name: base, source: source.to_string() });
}

fn js_module_in(line: &str) -> Option<String> {
    let from_idx = line.find(" from ")?;
    let rest = line[from_idx + 6..].trim();
    let quoted = rest.trim_start_matches(&['\'', '"', '`'][..]);
    let end = quoted.find(&['\'', '"', '`'][..])?;
    Some(quoted[..end].to_string())
}

fn between<'a>(s: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = s.find(open)? + open.len();
    let end = s[start..].find(close)? + start;
    Some(&s[start..end])
}

impl std::hash::Hash for DetectedDependency {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Eq for DetectedDependency {}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
