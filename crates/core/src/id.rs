// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical identifier scheme.
//!
//! Every application is indexed internally by its canonical id: the
//! caller-supplied name with the deployment prefix applied. Callers may
//! pass either form over the control channel; the daemon canonicalizes
//! at every entry point and never compares raw input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix applied to application ids when the configuration does not
/// override it.
pub const DEFAULT_APP_ID_PREFIX: &str = "VEA-";

/// Errors from identifier construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("application id must not be empty")]
    Empty,

    #[error("application id contains whitespace: {0:?}")]
    Whitespace(String),
}

/// Canonical application identity (prefix always applied).
///
/// Construct via [`AppId::canonical`]; the unchecked [`AppId::from_canonical`]
/// exists for deserializing values we previously persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// Canonicalize caller input: trim, validate, apply `prefix` if absent.
    pub fn canonical(input: &str, prefix: &str) -> Result<Self, IdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(IdError::Whitespace(trimmed.to_string()));
        }
        if trimmed.starts_with(prefix) {
            Ok(Self(trimmed.to_string()))
        } else {
            Ok(Self(format!("{prefix}{trimmed}")))
        }
    }

    /// Wrap a string that is already canonical (persisted records).
    pub fn from_canonical(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The canonical form with the prefix removed.
    pub fn stripped<'a>(&'a self, prefix: &str) -> &'a str {
        self.0.strip_prefix(prefix).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for AppId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for AppId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AppId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// One start-to-termination run of an application.
///
/// Minted fresh on every start and never reused; persisted in the
/// runtime state record so a restarted supervisor can re-adopt the
/// execution it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Mint a globally unique execution id.
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a persisted execution id.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Heuristic used by the resolver: execution ids are uuids, which
    /// always contain `-` separated hex groups and never the app prefix.
    pub fn looks_like(input: &str) -> bool {
        uuid::Uuid::parse_str(input).is_ok()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ExecutionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ExecutionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
