// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket client gateway against the vehicle signal broker.
//!
//! One connection per application session; sessions are isolated. The
//! connection task owns the socket, correlates request/reply frames by
//! id, fans subscription updates out to subscribers, and reconnects
//! with linear backoff, re-issuing known subscriptions after each
//! reconnect. Subscribers that cannot keep up are dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vea_core::{AppId, ApplicationRecord, SignalSpec, SignalValue, ValidationReport};

use super::{
    session_fingerprint, Catalog, SessionToken, SignalError, SignalGateway, SignalUpdate,
};

const REPLY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);
const MAX_BACKOFF_STEPS: u64 = 10;

enum Command {
    Subscribe { path: String, rate_hz: Option<f64>, tx: mpsc::Sender<SignalUpdate> },
    Get { paths: Vec<String>, reply: oneshot::Sender<Result<Vec<SignalUpdate>, SignalError>> },
    Set { path: String, value: SignalValue, reply: oneshot::Sender<Result<(), SignalError>> },
}

struct BrokerSession {
    fingerprint: String,
    declared: Vec<SignalSpec>,
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

/// Gateway backed by a live broker connection per session.
pub struct BrokerGateway {
    endpoint: String,
    catalog: Catalog,
    sessions: Mutex<HashMap<String, BrokerSession>>,
}

impl BrokerGateway {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), catalog: Catalog::builtin(), sessions: Mutex::new(HashMap::new()) }
    }

    fn session_cmd_tx(
        &self,
        token: &SessionToken,
    ) -> Result<(mpsc::Sender<Command>, Vec<SignalSpec>), SignalError> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(token.app_id.as_str())
            .ok_or_else(|| SignalError::NoSession(token.app_id.to_string()))?;
        if session.fingerprint != token.fingerprint {
            // A stale token from before the declarations changed.
            return Err(SignalError::NoSession(token.app_id.to_string()));
        }
        Ok((session.cmd_tx.clone(), session.declared.clone()))
    }
}

#[async_trait]
impl SignalGateway for BrokerGateway {
    fn validate(&self, signals: &[SignalSpec]) -> ValidationReport {
        self.catalog.validate(signals)
    }

    async fn open_session(&self, record: &ApplicationRecord) -> Result<SessionToken, SignalError> {
        self.close_session(&record.app_id).await;

        let fingerprint = session_fingerprint(record);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        tokio::spawn(connection_task(
            self.endpoint.clone(),
            record.app_id.clone(),
            cmd_rx,
            cancel.clone(),
        ));

        info!(app_id = %record.app_id, fingerprint = %&fingerprint[..12], "opened signal session");
        self.sessions.lock().insert(
            record.app_id.as_str().to_string(),
            BrokerSession {
                fingerprint: fingerprint.clone(),
                declared: record.declared_signals.clone(),
                cmd_tx,
                cancel,
            },
        );

        Ok(SessionToken { app_id: record.app_id.clone(), fingerprint })
    }

    async fn subscribe(
        &self,
        session: &SessionToken,
        spec: &SignalSpec,
        tx: mpsc::Sender<SignalUpdate>,
    ) -> Result<(), SignalError> {
        if self.catalog.lookup(&spec.path).is_none() {
            return Err(SignalError::PathUnknown { path: spec.path.clone() });
        }
        let (cmd_tx, _) = self.session_cmd_tx(session)?;
        cmd_tx
            .send(Command::Subscribe { path: spec.path.clone(), rate_hz: spec.rate_hz, tx })
            .await
            .map_err(|_| SignalError::Broker("session closed".to_string()))
    }

    async fn read(
        &self,
        session: &SessionToken,
        paths: &[String],
    ) -> Result<Vec<SignalUpdate>, SignalError> {
        for path in paths {
            if self.catalog.lookup(path).is_none() {
                return Err(SignalError::PathUnknown { path: path.clone() });
            }
        }
        let (cmd_tx, _) = self.session_cmd_tx(session)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Command::Get { paths: paths.to_vec(), reply: reply_tx })
            .await
            .map_err(|_| SignalError::Broker("session closed".to_string()))?;
        tokio::time::timeout(REPLY_TIMEOUT, reply_rx)
            .await
            .map_err(|_| SignalError::Broker("broker read timed out".to_string()))?
            .map_err(|_| SignalError::Broker("connection lost".to_string()))?
    }

    async fn write(
        &self,
        session: &SessionToken,
        path: &str,
        value: SignalValue,
    ) -> Result<(), SignalError> {
        let (cmd_tx, declared) = self.session_cmd_tx(session)?;

        let entry = self
            .catalog
            .lookup(path)
            .ok_or_else(|| SignalError::PathUnknown { path: path.to_string() })?;
        let declared_write = declared
            .iter()
            .any(|s| s.path == path && s.access == vea_core::SignalAccess::Write);
        if !declared_write {
            warn!(app_id = %session.app_id, path, "write to undeclared path denied");
            return Err(SignalError::AccessDenied { path: path.to_string() });
        }
        if !value.matches_type(entry.type_name) {
            return Err(SignalError::TypeMismatch {
                path: path.to_string(),
                expected: entry.type_name.to_string(),
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Command::Set { path: path.to_string(), value, reply: reply_tx })
            .await
            .map_err(|_| SignalError::Broker("session closed".to_string()))?;
        tokio::time::timeout(REPLY_TIMEOUT, reply_rx)
            .await
            .map_err(|_| SignalError::Broker("broker write timed out".to_string()))?
            .map_err(|_| SignalError::Broker("connection lost".to_string()))?
    }

    async fn close_session(&self, app_id: &AppId) {
        let session = self.sessions.lock().remove(app_id.as_str());
        if let Some(session) = session {
            debug!(%app_id, "closing signal session");
            session.cancel.cancel();
        }
    }
}

enum Pending {
    Get(oneshot::Sender<Result<Vec<SignalUpdate>, SignalError>>),
    Set(oneshot::Sender<Result<(), SignalError>>),
}

impl Pending {
    fn fail(self, message: &str) {
        match self {
            Pending::Get(tx) => {
                let _ = tx.send(Err(SignalError::Broker(message.to_string())));
            }
            Pending::Set(tx) => {
                let _ = tx.send(Err(SignalError::Broker(message.to_string())));
            }
        }
    }
}

type Subscriptions = HashMap<String, (Option<f64>, Vec<mpsc::Sender<SignalUpdate>>)>;

/// Owns the socket for one session: connect, pump, reconnect.
async fn connection_task(
    endpoint: String,
    app_id: AppId,
    mut cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    let url = format!("ws://{endpoint}/signals");
    let mut subscriptions: Subscriptions = HashMap::new();
    let mut backoff_step: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let connected = tokio::select! {
            result = connect_async(&url) => result,
            _ = cancel.cancelled() => return,
        };
        let mut ws = match connected {
            Ok((ws, _)) => {
                debug!(%app_id, %url, "broker connected");
                backoff_step = 0;
                ws
            }
            Err(e) => {
                backoff_step = (backoff_step + 1).min(MAX_BACKOFF_STEPS);
                warn!(%app_id, error = %e, "broker connect failed, backing off");
                let delay = std::time::Duration::from_millis(500 * backoff_step);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = cancel.cancelled() => return,
                }
            }
        };

        // Re-issue subscriptions after (re)connect.
        for (path, (rate_hz, _)) in &subscriptions {
            let frame = json!({
                "id": uuid::Uuid::new_v4().to_string(),
                "action": "subscribe",
                "path": path,
                "rate_hz": rate_hz,
            });
            if ws.send(Message::Text(frame.to_string().into())).await.is_err() {
                break;
            }
        }

        let mut pending: HashMap<String, Pending> = HashMap::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None => {
                        let _ = ws.close(None).await;
                        return;
                    }
                    Some(Command::Subscribe { path, rate_hz, tx }) => {
                        subscriptions.entry(path.clone()).or_insert((rate_hz, Vec::new())).1.push(tx);
                        let frame = json!({
                            "id": uuid::Uuid::new_v4().to_string(),
                            "action": "subscribe",
                            "path": path,
                            "rate_hz": rate_hz,
                        });
                        if ws.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::Get { paths, reply }) => {
                        let id = uuid::Uuid::new_v4().to_string();
                        let frame = json!({ "id": id, "action": "get", "paths": paths });
                        if ws.send(Message::Text(frame.to_string().into())).await.is_err() {
                            let _ = reply.send(Err(SignalError::Broker("send failed".to_string())));
                            break;
                        }
                        pending.insert(id, Pending::Get(reply));
                    }
                    Some(Command::Set { path, value, reply }) => {
                        let id = uuid::Uuid::new_v4().to_string();
                        let frame = json!({ "id": id, "action": "set", "path": path, "value": value });
                        if ws.send(Message::Text(frame.to_string().into())).await.is_err() {
                            let _ = reply.send(Err(SignalError::Broker("send failed".to_string())));
                            break;
                        }
                        pending.insert(id, Pending::Set(reply));
                    }
                },
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(text.as_str(), &mut pending, &mut subscriptions);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%app_id, "broker closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%app_id, error = %e, "broker stream error");
                        break;
                    }
                    _ => {}
                },
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }

        for (_, p) in pending.drain() {
            p.fail("connection lost");
        }
    }
}

/// Route one inbound broker frame.
fn handle_frame(text: &str, pending: &mut HashMap<String, Pending>, subscriptions: &mut Subscriptions) {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        warn!("unparseable broker frame: {text}");
        return;
    };
    let action = frame.get("action").and_then(|v| v.as_str()).unwrap_or("");

    if action == "update" {
        let Some(path) = frame.get("path").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(value) = frame.get("value").cloned() else {
            return;
        };
        let Ok(value) = serde_json::from_value::<SignalValue>(value) else {
            return;
        };
        if let Some((_, subscribers)) = subscriptions.get_mut(path) {
            // try_send: a slow subscriber loses updates instead of
            // stalling the pump; a closed one is pruned.
            subscribers.retain(|tx| {
                !matches!(
                    tx.try_send(SignalUpdate { path: path.to_string(), value: value.clone() }),
                    Err(mpsc::error::TrySendError::Closed(_))
                )
            });
        }
        return;
    }

    let Some(id) = frame.get("id").and_then(|v| v.as_str()) else {
        return;
    };
    let Some(entry) = pending.remove(id) else {
        return;
    };

    match (action, entry) {
        ("values", Pending::Get(reply)) => {
            let values = frame
                .get("values")
                .and_then(|v| v.as_object())
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(path, value)| {
                            serde_json::from_value::<SignalValue>(value.clone())
                                .ok()
                                .map(|value| SignalUpdate { path: path.clone(), value })
                        })
                        .collect()
                })
                .unwrap_or_default();
            let _ = reply.send(Ok(values));
        }
        ("ack", Pending::Set(reply)) => {
            let _ = reply.send(Ok(()));
        }
        ("error", entry) => {
            let kind = frame.get("error").and_then(|v| v.as_str()).unwrap_or("");
            let path =
                frame.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let error = match kind {
                "access_denied" => SignalError::AccessDenied { path },
                "path_unknown" => SignalError::PathUnknown { path },
                "type_mismatch" => SignalError::TypeMismatch {
                    path,
                    expected: frame
                        .get("expected")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string(),
                },
                other => SignalError::Broker(other.to_string()),
            };
            match entry {
                Pending::Get(reply) => {
                    let _ = reply.send(Err(error));
                }
                Pending::Set(reply) => {
                    let _ = reply.send(Err(error));
                }
            }
        }
        (_, entry) => entry.fail("unexpected broker reply"),
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
