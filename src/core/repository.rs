//! Ledger-side repository: error normalization, feature→record resolution and
//! the import/flush sync policy wrapped around every gateway call.

use crate::core::codec::{Artifact, Carrier};
use crate::core::config::LedgerConfig;
use crate::core::error::{GatewayError, GatewayErrorCode, TaskhiveError};
use crate::core::gateway::{LedgerGateway, LedgerRecord, NewRecord};
use crate::core::lock::{self, LockOptions};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Import the ledger's durable export before reads.
    pub auto_import: bool,
    /// Flush after every write.
    pub auto_flush: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            auto_import: false,
            auto_flush: true,
        }
    }
}

impl From<&LedgerConfig> for SyncPolicy {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            auto_import: config.auto_import,
            auto_flush: config.auto_flush,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoErrorKind {
    NotFound,
    AlreadyExists,
    NotInitialized,
    CommandError,
    ParseError,
    InvalidPriority,
    Timeout,
    ExecutableMissing,
    Validation,
    LockTimeout,
    Io,
}

impl RepoErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoErrorKind::NotFound => "not_found",
            RepoErrorKind::AlreadyExists => "already_exists",
            RepoErrorKind::NotInitialized => "not_initialized",
            RepoErrorKind::CommandError => "command_error",
            RepoErrorKind::ParseError => "parse_error",
            RepoErrorKind::InvalidPriority => "invalid_priority",
            RepoErrorKind::Timeout => "timeout",
            RepoErrorKind::ExecutableMissing => "executable_missing",
            RepoErrorKind::Validation => "validation",
            RepoErrorKind::LockTimeout => "lock_timeout",
            RepoErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for RepoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} [{kind}]")]
pub struct RepoError {
    pub kind: RepoErrorKind,
    pub message: String,
}

impl RepoError {
    pub fn new(kind: RepoErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RepoErrorKind::NotFound
    }
}

impl From<GatewayError> for RepoError {
    fn from(err: GatewayError) -> Self {
        let kind = match err.code {
            GatewayErrorCode::NotFound => RepoErrorKind::NotFound,
            GatewayErrorCode::NotInitialized => RepoErrorKind::NotInitialized,
            GatewayErrorCode::CommandError => RepoErrorKind::CommandError,
            GatewayErrorCode::ParseError => RepoErrorKind::ParseError,
            GatewayErrorCode::InvalidPriority => RepoErrorKind::InvalidPriority,
            GatewayErrorCode::Timeout => RepoErrorKind::Timeout,
            GatewayErrorCode::ExecutableMissing => RepoErrorKind::ExecutableMissing,
        };
        RepoError::new(kind, format!("ledger {}", err.operation))
    }
}

impl From<TaskhiveError> for RepoError {
    fn from(err: TaskhiveError) -> Self {
        match err {
            TaskhiveError::RepoError(inner) => inner,
            TaskhiveError::GatewayError(inner) => inner.into(),
            TaskhiveError::NotFound(msg) => RepoError::new(RepoErrorKind::NotFound, msg),
            TaskhiveError::AlreadyExists(msg) => RepoError::new(RepoErrorKind::AlreadyExists, msg),
            TaskhiveError::LockTimeout { .. } => {
                RepoError::new(RepoErrorKind::LockTimeout, err.to_string())
            }
            TaskhiveError::IoError(_) => RepoError::new(RepoErrorKind::Io, err.to_string()),
            TaskhiveError::JsonError(_) => RepoError::new(RepoErrorKind::ParseError, err.to_string()),
            TaskhiveError::ValidationError(_)
            | TaskhiveError::PlanError(_)
            | TaskhiveError::ConfigError(_)
            | TaskhiveError::InvalidTransition { .. } => {
                RepoError::new(RepoErrorKind::Validation, err.to_string())
            }
        }
    }
}

pub type RepoResult<T> = std::result::Result<T, RepoError>;

/// Tagged result as exposed to callers that serialize it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(RepoError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> RepoResult<T> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(err) => Err(err),
        }
    }
}

impl<T, E: Into<RepoError>> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err.into()),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Outcome", 2)?;
        match self {
            Outcome::Success(value) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("value", value)?;
            }
            Outcome::Failure(err) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", err)?;
            }
        }
        state.end()
    }
}

pub struct Repository {
    gateway: LedgerGateway,
    policy: SyncPolicy,
    lock: LockOptions,
    locks_dir: PathBuf,
}

impl Repository {
    pub fn new(gateway: LedgerGateway, policy: SyncPolicy, lock: LockOptions) -> Self {
        let locks_dir = gateway.workdir().join(".taskhive").join("locks");
        Self {
            gateway,
            policy,
            lock,
            locks_dir,
        }
    }

    pub fn gateway(&self) -> &LedgerGateway {
        &self.gateway
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    fn before_read(&self) {
        if !self.policy.auto_import {
            return;
        }
        if let Err(err) = self.gateway.import() {
            warn!(%err, "ledger import before read failed; continuing with local ledger state");
        }
    }

    fn after_write(&self) {
        if !self.policy.auto_flush {
            return;
        }
        if let Err(err) = self.gateway.flush() {
            warn!(%err, "ledger flush after write failed");
        }
    }

    /// Finds the epic whose title is `name`. In strict mode a missing feature is a
    /// `not_found` error rather than `None`.
    pub fn resolve_feature_record(&self, name: &str, strict: bool) -> RepoResult<Option<String>> {
        let found = self
            .list_epics()?
            .into_iter()
            .find(|r| r.title == name)
            .map(|r| r.id);
        match found {
            None if strict => Err(RepoError::new(
                RepoErrorKind::NotFound,
                format!("feature '{name}' has no ledger record"),
            )),
            other => Ok(other),
        }
    }

    pub fn show(&self, id: &str) -> RepoResult<LedgerRecord> {
        self.before_read();
        Ok(self.gateway.show(id)?)
    }

    /// Like [`Repository::show`] but a missing record is `None`.
    pub fn find(&self, id: &str) -> RepoResult<Option<LedgerRecord>> {
        match self.show(id) {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn list_epics(&self) -> RepoResult<Vec<LedgerRecord>> {
        self.before_read();
        Ok(self.gateway.list_epics()?)
    }

    pub fn list_children(&self, parent: &str) -> RepoResult<Vec<LedgerRecord>> {
        self.before_read();
        Ok(self.gateway.list_children(parent)?)
    }

    pub fn create(&self, record: &NewRecord) -> RepoResult<String> {
        let id = self.gateway.create(record)?;
        debug!(id = %id, title = %record.title, "created ledger record");
        self.after_write();
        Ok(id)
    }

    pub fn set_status(&self, id: &str, status: &str) -> RepoResult<()> {
        self.gateway.update_status(id, status)?;
        self.after_write();
        Ok(())
    }

    pub fn close(&self, id: &str, reason: &str) -> RepoResult<()> {
        self.gateway.close(id, reason)?;
        self.after_write();
        Ok(())
    }

    pub fn delete(&self, id: &str) -> RepoResult<()> {
        self.gateway.delete(id)?;
        self.after_write();
        Ok(())
    }

    pub fn add_dependency(&self, id: &str, depends_on: &str) -> RepoResult<()> {
        self.gateway.add_dependency(id, depends_on)?;
        self.after_write();
        Ok(())
    }

    pub fn read_carrier(&self, id: &str) -> RepoResult<Carrier> {
        let record = self.show(id)?;
        Ok(Carrier::parse(&record.description)?)
    }

    pub fn read_artifact<A: Artifact>(&self, id: &str) -> RepoResult<Option<A>> {
        Ok(self.read_carrier(id)?.get::<A>()?)
    }

    /// Read-modify-write of a record's carrier under the per-record lock.
    /// The description is only rewritten when the rendered text changed.
    pub fn update_carrier<F>(&self, id: &str, update: F) -> RepoResult<Carrier>
    where
        F: FnOnce(&mut Carrier) -> crate::core::error::Result<()>,
    {
        self.before_read();
        let target = self.locks_dir.join(id.replace(['/', '\\'], "_"));
        let (carrier, changed) = lock::with_lock(&target, &self.lock, || {
            let record = self.gateway.show(id)?;
            let mut carrier = Carrier::parse(&record.description)?;
            update(&mut carrier)?;
            let rendered = carrier.render();
            let changed = rendered != record.description;
            if changed {
                self.gateway.update_description(id, &rendered)?;
            }
            Ok((carrier, changed))
        })?;
        if changed {
            self.after_write();
        }
        Ok(carrier)
    }

    /// Runs `f` under a lock keyed by a logical name rather than a record id,
    /// so a lookup followed by a create cannot race another process.
    pub fn with_name_lock<T>(
        &self,
        scope: &[&str],
        f: impl FnOnce() -> crate::core::error::Result<T>,
    ) -> crate::core::error::Result<T> {
        let target = scope
            .iter()
            .fold(self.locks_dir.join("names"), |path, part| {
                path.join(part.replace(['/', '\\'], "_"))
            });
        lock::with_lock(&target, &self.lock, f)
    }

    pub fn upsert_artifact<A: Artifact>(&self, id: &str, artifact: &A) -> RepoResult<()> {
        self.update_carrier(id, |carrier| carrier.put(artifact))
            .map(|_| ())
    }
}
