// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-memory sandbox driver for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vea_store::LogStream;

use super::{ConsoleLine, CreateSpec, Inspection, SandboxDriver, SandboxError, SandboxStatus};

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Create(String),
    Start(String),
    Pause(String),
    Resume(String),
    Stop(String),
    Remove(String),
    Inspect(String),
    AttachLogs(String),
    Reap(String),
}

#[derive(Default)]
struct FakeState {
    sandboxes: HashMap<String, (SandboxStatus, Option<i64>)>,
    calls: Vec<DriverCall>,
    failures: HashMap<&'static str, VecDeque<SandboxError>>,
    log_txs: HashMap<String, mpsc::Sender<ConsoleLine>>,
    counter: u64,
}

/// In-memory sandbox driver. Clones share state.
#[derive(Clone, Default)]
pub struct FakeSandbox {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next invocation of `op` to fail with `error`.
    pub fn fail_next(&self, op: &'static str, error: SandboxError) {
        self.state.lock().failures.entry(op).or_default().push_back(error);
    }

    fn take_failure(&self, op: &'static str) -> Option<SandboxError> {
        self.state.lock().failures.get_mut(op).and_then(VecDeque::pop_front)
    }

    fn record(&self, call: DriverCall) {
        self.state.lock().calls.push(call);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.state.lock().sandboxes.keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Simulate a crash observed by the engine.
    pub fn set_exited(&self, handle: &str, exit_code: i64) {
        if let Some(entry) = self.state.lock().sandboxes.get_mut(handle) {
            *entry = (SandboxStatus::Exited, Some(exit_code));
        }
    }

    /// Simulate the engine losing all trace of the sandbox.
    pub fn vanish(&self, handle: &str) {
        self.state.lock().sandboxes.remove(handle);
    }

    /// Feed a console line through an attached log stream.
    pub async fn push_line(&self, handle: &str, stream: LogStream, line: &str) {
        let tx = self.state.lock().log_txs.get(handle).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(ConsoleLine { stream, line: line.to_string() }).await;
        }
    }

    pub fn status_of(&self, handle: &str) -> Option<SandboxStatus> {
        self.state.lock().sandboxes.get(handle).map(|(s, _)| *s)
    }
}

#[async_trait]
impl SandboxDriver for FakeSandbox {
    async fn create(&self, spec: &CreateSpec) -> Result<String, SandboxError> {
        if let Some(e) = self.take_failure("create") {
            return Err(e);
        }
        let handle = {
            let mut state = self.state.lock();
            state.counter += 1;
            let handle = format!("fake-{}-{}", spec.app_id, state.counter);
            state.sandboxes.insert(handle.clone(), (SandboxStatus::Created, None));
            handle
        };
        self.record(DriverCall::Create(handle.clone()));
        Ok(handle)
    }

    async fn start(&self, handle: &str) -> Result<(), SandboxError> {
        self.record(DriverCall::Start(handle.to_string()));
        if let Some(e) = self.take_failure("start") {
            return Err(e);
        }
        let mut state = self.state.lock();
        match state.sandboxes.get_mut(handle) {
            Some(entry) => {
                *entry = (SandboxStatus::Running, None);
                Ok(())
            }
            None => Err(SandboxError::NotFound(handle.to_string())),
        }
    }

    async fn pause(&self, handle: &str) -> Result<(), SandboxError> {
        self.record(DriverCall::Pause(handle.to_string()));
        if let Some(e) = self.take_failure("pause") {
            return Err(e);
        }
        let mut state = self.state.lock();
        match state.sandboxes.get_mut(handle) {
            Some(entry) if entry.0 == SandboxStatus::Running => {
                entry.0 = SandboxStatus::Paused;
                Ok(())
            }
            Some(_) => Err(SandboxError::NotRunning),
            None => Err(SandboxError::NotFound(handle.to_string())),
        }
    }

    async fn resume(&self, handle: &str) -> Result<(), SandboxError> {
        self.record(DriverCall::Resume(handle.to_string()));
        if let Some(e) = self.take_failure("resume") {
            return Err(e);
        }
        let mut state = self.state.lock();
        match state.sandboxes.get_mut(handle) {
            Some(entry) if entry.0 == SandboxStatus::Paused => {
                entry.0 = SandboxStatus::Running;
                Ok(())
            }
            Some(_) => Err(SandboxError::NotPaused),
            None => Err(SandboxError::NotFound(handle.to_string())),
        }
    }

    async fn stop(&self, handle: &str, _grace: Duration) -> Result<Option<i64>, SandboxError> {
        self.record(DriverCall::Stop(handle.to_string()));
        if let Some(e) = self.take_failure("stop") {
            return Err(e);
        }
        let mut state = self.state.lock();
        match state.sandboxes.get_mut(handle) {
            Some(entry) => {
                let code = entry.1.unwrap_or(0);
                *entry = (SandboxStatus::Exited, Some(code));
                Ok(Some(code))
            }
            None => Err(SandboxError::NotFound(handle.to_string())),
        }
    }

    async fn remove(&self, handle: &str) -> Result<(), SandboxError> {
        self.record(DriverCall::Remove(handle.to_string()));
        if let Some(e) = self.take_failure("remove") {
            return Err(e);
        }
        let mut state = self.state.lock();
        match state.sandboxes.get(handle) {
            Some((SandboxStatus::Running | SandboxStatus::Paused, _)) => {
                Err(SandboxError::InUse(handle.to_string()))
            }
            Some(_) => {
                state.sandboxes.remove(handle);
                state.log_txs.remove(handle);
                Ok(())
            }
            None => Err(SandboxError::NotFound(handle.to_string())),
        }
    }

    async fn inspect(&self, handle: &str) -> Result<Inspection, SandboxError> {
        self.record(DriverCall::Inspect(handle.to_string()));
        if let Some(e) = self.take_failure("inspect") {
            return Err(e);
        }
        let state = self.state.lock();
        match state.sandboxes.get(handle) {
            Some((status, exit_code)) => Ok(Inspection {
                status: *status,
                exit_code: *exit_code,
                started_at: None,
            }),
            None => Err(SandboxError::NotFound(handle.to_string())),
        }
    }

    async fn attach_logs(
        &self,
        handle: &str,
        tx: mpsc::Sender<ConsoleLine>,
        _cancel: CancellationToken,
    ) -> Result<(), SandboxError> {
        self.record(DriverCall::AttachLogs(handle.to_string()));
        if let Some(e) = self.take_failure("attach_logs") {
            return Err(e);
        }
        self.state.lock().log_txs.insert(handle.to_string(), tx);
        Ok(())
    }

    async fn reap(&self, handle: &str) {
        self.record(DriverCall::Reap(handle.to_string()));
        let mut state = self.state.lock();
        state.sandboxes.remove(handle);
        state.log_txs.remove(handle);
    }
}
