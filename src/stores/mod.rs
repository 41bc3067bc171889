//! Dual-backend storage for features, tasks and plans.
//!
//! Each entity has one trait and two implementations: [`local`] keeps
//! canonical JSON and markdown under a per-feature directory, [`ledger`]
//! keeps the same state in ledger records through the repository. The
//! implementation is chosen once, in [`Backends::open`].

pub mod ledger;
pub mod local;

use crate::core::codec::{PlanApproval, PlanComment};
use crate::core::config::{BackendMode, EngineConfig};
use crate::core::error::Result;
use crate::core::gateway::{CommandRunner, LedgerGateway, ProcessRunner};
use crate::core::model::{BackgroundPatch, Feature, NewFeature, NewTask, TaskRecord, TaskUpdate};
use crate::core::patch;
use crate::core::repository::{Repository, SyncPolicy};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub trait FeatureStore {
    /// Fails with `AlreadyExists` when the name is taken.
    fn create(&self, feature: &NewFeature) -> Result<Feature>;
    fn get(&self, name: &str) -> Result<Option<Feature>>;
    fn list(&self) -> Result<Vec<Feature>>;
    /// Replaces the stored feature. Fails with `NotFound` when it does not exist.
    fn save(&self, feature: &Feature) -> Result<()>;
    /// Removes every piece of persisted state for the feature.
    fn delete(&self, name: &str) -> Result<()>;
}

pub trait TaskStore {
    fn get(&self, feature: &str, folder: &str) -> Result<Option<TaskRecord>>;
    /// All tasks of a feature, ordered by folder.
    fn list(&self, feature: &str) -> Result<Vec<TaskRecord>>;
    fn create(&self, feature: &str, task: &NewTask) -> Result<TaskRecord>;
    /// Applies completion-owned fields.
    fn update(&self, feature: &str, folder: &str, update: &TaskUpdate) -> Result<TaskRecord>;
    /// Applies background-owned fields without touching completion-owned ones.
    fn patch_background(&self, feature: &str, folder: &str, patch: &BackgroundPatch) -> Result<TaskRecord>;
    fn delete(&self, feature: &str, folder: &str) -> Result<()>;

    fn read_spec(&self, feature: &str, folder: &str) -> Result<Option<String>>;
    fn write_spec(&self, feature: &str, folder: &str, content: &str) -> Result<()>;
    fn read_report(&self, feature: &str, folder: &str) -> Result<Option<String>>;
    fn write_report(&self, feature: &str, folder: &str, content: &str) -> Result<()>;
    fn read_worker_prompt(&self, feature: &str, folder: &str) -> Result<Option<String>>;
    fn write_worker_prompt(&self, feature: &str, folder: &str, content: &str) -> Result<()>;

    /// Mirrors `task.depends_on` into the backend's own dependency model, if it has one.
    fn record_dependencies(&self, _feature: &str, _task: &TaskRecord) -> Result<()> {
        Ok(())
    }
}

pub trait PlanStore {
    fn read_plan(&self, feature: &str) -> Result<Option<String>>;
    fn write_plan(&self, feature: &str, content: &str) -> Result<()>;
    fn approve(&self, feature: &str, approval: &PlanApproval) -> Result<()>;
    fn approval(&self, feature: &str) -> Result<Option<PlanApproval>>;
    /// Drops the recorded approval; a no-op when there is none.
    fn revoke_approval(&self, feature: &str) -> Result<()>;
    fn add_comment(&self, feature: &str, comment: &PlanComment) -> Result<()>;
    fn comments(&self, feature: &str) -> Result<Vec<PlanComment>>;
    fn clear_comments(&self, feature: &str) -> Result<()>;

    /// True only while the recorded approval hash matches the current plan text.
    fn is_approved(&self, feature: &str) -> Result<bool> {
        let (Some(plan), Some(approval)) = (self.read_plan(feature)?, self.approval(feature)?) else {
            return Ok(false);
        };
        Ok(approval.plan_hash == plan_hash(&plan))
    }
}

/// Hex SHA-256 of the plan text. Trailing whitespace is ignored, since the
/// ledger does not keep it.
pub fn plan_hash(plan: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plan.trim_end().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Merges a typed patch into a task record through its JSON form.
pub(crate) fn apply_to_record<P: Serialize>(record: &TaskRecord, patch: &P) -> Result<TaskRecord> {
    let mut value = serde_json::to_value(record)?;
    patch::merge(&mut value, &patch::to_patch(patch)?);
    Ok(serde_json::from_value(value)?)
}

/// The three stores for one backend, selected once from the configured mode.
pub struct Backends {
    pub mode: BackendMode,
    pub features: Box<dyn FeatureStore>,
    pub tasks: Box<dyn TaskStore>,
    pub plans: Box<dyn PlanStore>,
}

impl Backends {
    pub fn open(config: &EngineConfig) -> Result<Self> {
        Self::open_with_runner(config, Arc::new(ProcessRunner))
    }

    /// Like [`Backends::open`] with an explicit process runner for the ledger.
    pub fn open_with_runner(config: &EngineConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        match config.mode {
            BackendMode::Local => Ok(Self::local(config)),
            BackendMode::Ledger => {
                let gateway = LedgerGateway::with_runner(runner, &config.ledger, &config.project_root);
                let repo = Arc::new(Repository::new(
                    gateway,
                    SyncPolicy::from(&config.ledger),
                    config.lock,
                ));
                Ok(Self {
                    mode: BackendMode::Ledger,
                    features: Box::new(ledger::LedgerFeatureStore::new(repo.clone())),
                    tasks: Box::new(ledger::LedgerTaskStore::new(repo.clone())),
                    plans: Box::new(ledger::LedgerPlanStore::new(repo)),
                })
            }
        }
    }

    pub fn local(config: &EngineConfig) -> Self {
        let layout = Arc::new(local::Layout::new(config.features_root(), config.lock));
        Self {
            mode: BackendMode::Local,
            features: Box::new(local::LocalFeatureStore::new(layout.clone())),
            tasks: Box::new(local::LocalTaskStore::new(layout.clone())),
            plans: Box::new(local::LocalPlanStore::new(layout)),
        }
    }
}
