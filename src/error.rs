//! Unified error type for all control-surface command handlers.
//!
//! `AppError` is the single error type returned by every handler in
//! `commands`. It serializes as `{ "kind": "...", "message": "..." }` so a
//! front end can tell a permission problem (suggest re-running elevated) from
//! a precondition warning or a plain failure.

use serde::ser::SerializeStruct;

use crate::capture::{CaptureError, FilterError};
use crate::core::bridge::BridgeError;
use crate::history::HistoryError;

/// Application-level error returned by all command handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Capture pipeline or bridge failures.
    #[error("{0}")]
    Capture(String),

    /// An elevated command was rejected by the OS.
    #[error("{0}")]
    Permission(String),

    /// A start was refused (no device, bridge declined, interface bridged).
    #[error("{0}")]
    Precondition(String),

    /// Filesystem and OS-level errors.
    #[error("{0}")]
    Io(String),

    /// Invalid or missing user input.
    #[error("{0}")]
    InvalidInput(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Capture(_) => "Capture",
            AppError::Permission(_) => "Permission",
            AppError::Precondition(_) => "Precondition",
            AppError::Io(_) => "Io",
            AppError::InvalidInput(_) => "InvalidInput",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        if err.is_permission_denied() {
            return AppError::Permission(err.to_string());
        }
        match err {
            CaptureError::Precondition(p) => AppError::Precondition(p.to_string()),
            CaptureError::InvalidFilter(f) => AppError::InvalidInput(f.to_string()),
            e @ CaptureError::OutputIsBackup(_) => AppError::InvalidInput(e.to_string()),
            other => AppError::Capture(other.to_string()),
        }
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        if err.is_permission_denied() {
            AppError::Permission(err.to_string())
        } else {
            AppError::Capture(err.to_string())
        }
    }
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<HistoryError> for AppError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::InvalidName(_) => AppError::InvalidInput(err.to_string()),
            _ if err.is_permission_denied() => AppError::Permission(err.to_string()),
            _ => AppError::Io(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Io(format!("{err:#}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => AppError::Permission(err.to_string()),
            _ => AppError::Io(err.to_string()),
        }
    }
}
