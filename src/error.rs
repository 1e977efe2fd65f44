//! Error taxonomy for resolution runs.
//!
//! Only `InvalidQuery` and `NoSourcesAvailable` ever abort a run. Attempt-level
//! failures are recorded as data (`ErrorKind::AttemptTimeout` /
//! `ErrorKind::AttemptError`) and registry write failures are logged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure kind the resolver can report, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidQuery,
    NoSourcesAvailable,
    AttemptTimeout,
    AttemptError,
    RegistryUpdateFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidQuery => "InvalidQuery",
            ErrorKind::NoSourcesAvailable => "NoSourcesAvailable",
            ErrorKind::AttemptTimeout => "AttemptTimeout",
            ErrorKind::AttemptError => "AttemptError",
            ErrorKind::RegistryUpdateFailure => "RegistryUpdateFailure",
        }
    }
}

/// Top-level failures that short-circuit a resolution.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no sources available: {0}")]
    NoSourcesAvailable(String),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            ResolveError::NoSourcesAvailable(_) => ErrorKind::NoSourcesAvailable,
        }
    }
}

/// Failures raised by a `SourceRegistry` implementation.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("source '{0}' not found")]
    NotFound(String),

    #[error("registry lock poisoned")]
    Poisoned,

    #[error("registry storage error: {0}")]
    Storage(String),
}
