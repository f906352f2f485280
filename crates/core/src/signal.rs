// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vehicle signal declarations.
//!
//! An application declares up front which broker signals it touches and
//! how. The gateway validates declarations against the catalog and
//! enforces them at runtime.

use serde::{Deserialize, Serialize};

/// How an application intends to use a signal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAccess {
    Read,
    Write,
    Subscribe,
}

impl std::fmt::Display for SignalAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAccess::Read => write!(f, "read"),
            SignalAccess::Write => write!(f, "write"),
            SignalAccess::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// A single declared signal: hierarchical path, access mode, and an
/// optional requested update rate for subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSpec {
    pub path: String,
    pub access: SignalAccess,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_hz: Option<f64>,
}

impl SignalSpec {
    pub fn new(path: impl Into<String>, access: SignalAccess) -> Self {
        Self { path: path.into(), access, rate_hz: None }
    }
}

/// A typed signal value as carried by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SignalValue {
    /// Loose type-compatibility check against a catalog type name.
    pub fn matches_type(&self, type_name: &str) -> bool {
        matches!(
            (self, type_name),
            (SignalValue::Bool(_), "boolean")
                | (SignalValue::Int(_), "int")
                | (SignalValue::Int(_), "float")
                | (SignalValue::Float(_), "float")
                | (SignalValue::Text(_), "string")
        )
    }
}

/// Outcome of validating a set of declared signals against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub total: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
