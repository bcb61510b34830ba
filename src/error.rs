//! Error types for the NFS provisioner
//!
//! Provides structured error types for every provisioning stage: request
//! validation, directory allocation, export bookkeeping, server address
//! resolution and supplemental group selection.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Volume request validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Volume Allocation Errors
    // =========================================================================
    #[error("Insufficient capacity: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    #[error("Filesystem operation failed on {path}: {reason}")]
    Filesystem { path: String, reason: String },

    // =========================================================================
    // Export Errors
    // =========================================================================
    #[error("Export backend operation failed: {backend} - {operation}: {reason}")]
    ExportBackend {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("Export configuration file error: {path}: {reason}")]
    ExportConfig { path: String, reason: String },

    // =========================================================================
    // Resolution Errors
    // =========================================================================
    #[error("Server address resolution failed: {0}")]
    ServerResolution(String),

    #[error("Supplemental group selection failed: {0}")]
    GidRange(String),

    // =========================================================================
    // External Command Errors
    // =========================================================================
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Action the reconcile loop should take after a failed provision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Build a filesystem error for a path
    pub fn filesystem(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Error::Filesystem {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build an export configuration file error for a path
    pub fn export_config(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Error::ExportConfig {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::ExportBackend { .. }
            | Error::ServerResolution(_)
            | Error::Command { .. } => ErrorAction::RequeueWithBackoff,

            // Space may be freed by deletions
            Error::InsufficientCapacity { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Requests and setup that will never succeed as-is
            Error::Configuration(_) | Error::Validation(_) | Error::GidRange(_) => {
                ErrorAction::NoRequeue
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::ExportBackend { .. }
                | Error::ServerResolution(_)
                | Error::Command { .. }
        )
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
