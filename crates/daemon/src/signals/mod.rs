// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal gateway: mediated access to the vehicle signal broker.
//!
//! Applications declare the signals they touch; the gateway validates
//! declarations against the catalog, opens one broker session per
//! application, and enforces declared access on every call. Gateway
//! failures are warnings at the lifecycle layer; an application is
//! never killed because the broker hiccuped.

pub(crate) mod broker;
pub(crate) mod catalog;

pub use broker::BrokerGateway;
pub use catalog::Catalog;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use vea_core::{AppId, ApplicationRecord, SignalSpec, SignalValue, ValidationReport};

/// Errors from gateway operations.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("access denied for {path}")]
    AccessDenied { path: String },

    #[error("unknown signal path: {path}")]
    PathUnknown { path: String },

    #[error("type mismatch for {path}: expected {expected}")]
    TypeMismatch { path: String, expected: String },

    #[error("no open session for {0}")]
    NoSession(String),

    #[error("broker error: {0}")]
    Broker(String),
}

/// Handle to an open per-application broker session.
///
/// The fingerprint pins the session to the declaration set it was
/// opened with; re-opening after a declaration change yields a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub app_id: AppId,
    pub fingerprint: String,
}

/// One typed update delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalUpdate {
    pub path: String,
    pub value: SignalValue,
}

/// The subscribe/read/write surface over the signal broker.
#[async_trait]
pub trait SignalGateway: Send + Sync + 'static {
    /// Partition declared signals into valid / invalid / warnings
    /// against the catalog.
    fn validate(&self, signals: &[SignalSpec]) -> ValidationReport;

    /// Open a session for the application, tearing down any previous
    /// session for the same app first.
    async fn open_session(&self, record: &ApplicationRecord) -> Result<SessionToken, SignalError>;

    /// Stream typed updates for a declared subscription into `tx`.
    async fn subscribe(
        &self,
        session: &SessionToken,
        spec: &SignalSpec,
        tx: mpsc::Sender<SignalUpdate>,
    ) -> Result<(), SignalError>;

    /// Current values for the given paths.
    async fn read(
        &self,
        session: &SessionToken,
        paths: &[String],
    ) -> Result<Vec<SignalUpdate>, SignalError>;

    /// Write one value. Fails with `AccessDenied` unless the path was
    /// declared with write access; the failure is logged and surfaced,
    /// never fatal to the application.
    async fn write(
        &self,
        session: &SessionToken,
        path: &str,
        value: SignalValue,
    ) -> Result<(), SignalError>;

    async fn close_session(&self, app_id: &AppId);
}

/// Session fingerprint: sha256 over the app id and its sorted signal
/// declarations.
pub(crate) fn session_fingerprint(record: &ApplicationRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.app_id.as_str().as_bytes());
    let mut decls: Vec<String> =
        record.declared_signals.iter().map(|s| format!("{}:{}", s.path, s.access)).collect();
    decls.sort();
    for decl in decls {
        hasher.update(decl.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Gateway used when `broker_enabled = false`: every operation is a
/// logged no-op so lifecycle flows run unchanged on nodes without a
/// broker.
pub struct DisabledGateway {
    catalog: Catalog,
}

impl DisabledGateway {
    pub fn new() -> Self {
        Self { catalog: Catalog::builtin() }
    }
}

impl Default for DisabledGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalGateway for DisabledGateway {
    fn validate(&self, signals: &[SignalSpec]) -> ValidationReport {
        self.catalog.validate(signals)
    }

    async fn open_session(&self, record: &ApplicationRecord) -> Result<SessionToken, SignalError> {
        debug!(app_id = %record.app_id, "signal gateway disabled; session is a no-op");
        Ok(SessionToken {
            app_id: record.app_id.clone(),
            fingerprint: session_fingerprint(record),
        })
    }

    async fn subscribe(
        &self,
        session: &SessionToken,
        spec: &SignalSpec,
        _tx: mpsc::Sender<SignalUpdate>,
    ) -> Result<(), SignalError> {
        debug!(app_id = %session.app_id, path = %spec.path, "disabled gateway: subscribe ignored");
        Ok(())
    }

    async fn read(
        &self,
        _session: &SessionToken,
        _paths: &[String],
    ) -> Result<Vec<SignalUpdate>, SignalError> {
        Ok(Vec::new())
    }

    async fn write(
        &self,
        session: &SessionToken,
        path: &str,
        _value: SignalValue,
    ) -> Result<(), SignalError> {
        debug!(app_id = %session.app_id, path, "disabled gateway: write ignored");
        Ok(())
    }

    async fn close_session(&self, _app_id: &AppId) {}
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
