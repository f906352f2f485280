// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Console fan-out: one sandbox log reader per execution.
//!
//! The driver's log stream is read exactly once per execution. Every
//! line is persisted to the store's ring files and broadcast to
//! whatever subscribers are attached at that moment. Subscribers that
//! lag behind the bounded channel lose frames (and are dropped by the
//! listener), they never block the source.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vea_core::{AppId, Clock, ExecutionId, SystemClock};
use vea_store::{LogRecord, Store};

use crate::sandbox::{SandboxDriver, SandboxError};

const FAN_OUT_CAPACITY: usize = 256;
const READER_BUFFER: usize = 256;

struct Fan {
    tx: broadcast::Sender<LogRecord>,
    cancel: CancellationToken,
}

/// Owns the per-execution console readers and their broadcast lanes.
pub struct ConsoleHub<C: Clock = SystemClock> {
    driver: Arc<dyn SandboxDriver>,
    store: Arc<Store>,
    clock: C,
    fans: Mutex<HashMap<String, Fan>>,
}

impl<C: Clock> ConsoleHub<C> {
    pub fn new(driver: Arc<dyn SandboxDriver>, store: Arc<Store>, clock: C) -> Self {
        Self { driver, store, clock, fans: Mutex::new(HashMap::new()) }
    }

    /// Start the reader for an execution. Idempotent: re-attaching an
    /// already-followed execution is a no-op, which is what lets the
    /// reconciler call this blindly when rebuilding live handles.
    pub async fn attach(
        &self,
        app_id: &AppId,
        execution_id: &ExecutionId,
        container_handle: &str,
    ) -> Result<(), SandboxError> {
        if self.fans.lock().contains_key(execution_id.as_str()) {
            return Ok(());
        }

        let (line_tx, mut line_rx) = mpsc::channel(READER_BUFFER);
        let cancel = CancellationToken::new();
        self.driver.attach_logs(container_handle, line_tx, cancel.clone()).await?;

        let (tx, _) = broadcast::channel(FAN_OUT_CAPACITY);
        self.fans.lock().insert(
            execution_id.as_str().to_string(),
            Fan { tx: tx.clone(), cancel },
        );

        let store = Arc::clone(&self.store);
        let clock = self.clock.clone();
        let app_id = app_id.clone();
        let execution_id = execution_id.clone();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                match store.append_log(&app_id, execution_id.as_str(), line.stream, &line.line) {
                    Ok(record) => {
                        // No receivers is normal; frames are dropped.
                        let _ = tx.send(record);
                    }
                    Err(e) => {
                        // Persistence trouble must not stall the stream;
                        // subscribers still get the line.
                        warn!(app_id = %app_id, error = %e, "console append failed");
                        let _ = tx.send(LogRecord {
                            app_id: app_id.as_str().to_string(),
                            execution_id: execution_id.as_str().to_string(),
                            stream: line.stream,
                            offset: 0,
                            ts: clock.now_utc(),
                            line: line.line,
                        });
                    }
                }
            }
            debug!(execution_id = %execution_id, "console reader finished");
        });

        Ok(())
    }

    /// Attach a subscriber to an execution's frame lane.
    pub fn subscribe(&self, execution_id: &str) -> Option<broadcast::Receiver<LogRecord>> {
        self.fans.lock().get(execution_id).map(|fan| fan.tx.subscribe())
    }

    /// Stop the reader and drop all subscribers for an execution.
    pub fn detach(&self, execution_id: &str) {
        if let Some(fan) = self.fans.lock().remove(execution_id) {
            fan.cancel.cancel();
        }
        self.store.forget_execution(execution_id);
    }

    /// Number of executions currently being followed.
    pub fn active(&self) -> usize {
        self.fans.lock().len()
    }
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
