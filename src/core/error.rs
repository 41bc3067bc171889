use crate::core::graph::PlanValidationError;
use crate::core::repository::{RepoError, RepoErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskhiveError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error(transparent)]
    PlanError(#[from] PlanValidationError),
    #[error("Timed out after {waited_ms}ms waiting for lock {}", lock_path.display())]
    LockTimeout { lock_path: PathBuf, waited_ms: u64 },
    #[error(transparent)]
    GatewayError(#[from] GatewayError),
    #[error(transparent)]
    RepoError(#[from] RepoError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl TaskhiveError {
    /// Lock timeouts are the only failure a caller should simply retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskhiveError::LockTimeout { .. } => true,
            TaskhiveError::RepoError(err) => err.kind == RepoErrorKind::LockTimeout,
            _ => false,
        }
    }
}

/// Stable machine-readable codes for ledger failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    NotFound,
    NotInitialized,
    CommandError,
    ParseError,
    InvalidPriority,
    Timeout,
    ExecutableMissing,
}

impl GatewayErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayErrorCode::NotFound => "not_found",
            GatewayErrorCode::NotInitialized => "not_initialized",
            GatewayErrorCode::CommandError => "command_error",
            GatewayErrorCode::ParseError => "parse_error",
            GatewayErrorCode::InvalidPriority => "invalid_priority",
            GatewayErrorCode::Timeout => "timeout",
            GatewayErrorCode::ExecutableMissing => "executable_missing",
        }
    }
}

impl fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sanitized ledger failure. Never carries raw subprocess output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("ledger {operation} failed [{code}]")]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub operation: String,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, operation: impl Into<String>) -> Self {
        Self {
            code,
            operation: operation.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskhiveError>;
