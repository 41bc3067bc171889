//! Ledger backend.
//!
//! A feature is an epic whose description carries the plan as its prefix
//! and the `feature_state`, `plan_approval` and `plan_comments` artifacts.
//! A task is a child record of that epic; its description carries the spec
//! as prefix and the `task_state`, `report` and `worker_prompt` artifacts.
//! Records created by other tools (no artifacts) are still listed, with
//! state derived from the record's own status and title.

use super::{FeatureStore, PlanStore, TaskStore, apply_to_record};
use crate::core::codec::{
    Carrier, PlanApproval, PlanComment, PlanComments, Report, WorkerPrompt,
};
use crate::core::error::{Result, TaskhiveError};
use crate::core::gateway::{LedgerRecord, NewRecord, Priority, RecordKind};
use crate::core::graph;
use crate::core::model::{
    self, BackgroundPatch, Feature, FeatureStatus, NewFeature, NewTask, TaskOrigin, TaskRecord,
    TaskStatus, TaskUpdate,
};
use crate::core::repository::Repository;
use crate::core::time;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn ledger_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "open",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Done | TaskStatus::Cancelled => "closed",
        TaskStatus::Blocked | TaskStatus::Failed | TaskStatus::Partial => "blocked",
    }
}

/// Reverse mapping, used only when a record has no `task_state`.
pub fn task_status_from_ledger(status: &str) -> TaskStatus {
    match status {
        "in_progress" => TaskStatus::InProgress,
        "closed" => TaskStatus::Done,
        "blocked" => TaskStatus::Blocked,
        _ => TaskStatus::Pending,
    }
}

pub fn feature_ledger_status(status: FeatureStatus) -> &'static str {
    match status {
        FeatureStatus::Planning | FeatureStatus::Approved => "open",
        FeatureStatus::Executing => "in_progress",
        FeatureStatus::Completed => "closed",
    }
}

fn feature_id(repo: &Repository, feature: &str) -> Result<String> {
    model::validate_feature_name(feature)?;
    match repo.resolve_feature_record(feature, true)? {
        Some(id) => Ok(id),
        None => Err(TaskhiveError::NotFound(format!("feature '{feature}'"))),
    }
}

/// Moves the record to `target` unless it is already there.
fn sync_record_status(repo: &Repository, record: &LedgerRecord, target: &str, reason: &str) -> Result<()> {
    if record.status == target {
        return Ok(());
    }
    if target == "closed" {
        repo.close(&record.id, reason)?;
    } else {
        repo.set_status(&record.id, target)?;
    }
    Ok(())
}

fn derive_feature(record: &LedgerRecord) -> Feature {
    Feature {
        name: record.title.clone(),
        external_id: record.id.clone(),
        status: if record.status == "closed" {
            FeatureStatus::Completed
        } else {
            FeatureStatus::Planning
        },
        ticket: None,
        session_id: None,
        created_at: record.created_at.clone().unwrap_or_else(time::now_iso),
        approved_at: None,
        completed_at: None,
        workflow_path: None,
    }
}

fn decode_feature(record: &LedgerRecord) -> Result<Feature> {
    let carrier = Carrier::parse(&record.description)?;
    Ok(match carrier.get::<Feature>()? {
        Some(mut feature) => {
            feature.external_id = record.id.clone();
            feature
        }
        None => derive_feature(record),
    })
}

pub struct LedgerFeatureStore {
    repo: Arc<Repository>,
}

impl LedgerFeatureStore {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

impl FeatureStore for LedgerFeatureStore {
    fn create(&self, new: &NewFeature) -> Result<Feature> {
        model::validate_feature_name(&new.name)?;
        let id = self.repo.with_name_lock(&["features", new.name.as_str()], || {
            if self.repo.resolve_feature_record(&new.name, false)?.is_some() {
                return Err(TaskhiveError::AlreadyExists(format!("feature '{}'", new.name)));
            }
            Ok(self.repo.create(&NewRecord {
                title: new.name.clone(),
                kind: RecordKind::Epic,
                priority: Priority::default(),
                parent: None,
                description: String::new(),
            })?)
        })?;
        let feature = Feature {
            name: new.name.clone(),
            external_id: id.clone(),
            status: FeatureStatus::Planning,
            ticket: new.ticket.clone(),
            session_id: new.session_id.clone(),
            created_at: time::now_iso(),
            approved_at: None,
            completed_at: None,
            workflow_path: new.workflow_path.clone(),
        };
        self.repo.upsert_artifact(&id, &feature)?;
        Ok(feature)
    }

    fn get(&self, name: &str) -> Result<Option<Feature>> {
        model::validate_feature_name(name)?;
        let Some(id) = self.repo.resolve_feature_record(name, false)? else {
            return Ok(None);
        };
        let record = self.repo.show(&id)?;
        decode_feature(&record).map(Some)
    }

    fn list(&self) -> Result<Vec<Feature>> {
        let mut features = Vec::new();
        for record in self.repo.list_epics()? {
            match decode_feature(&record) {
                Ok(feature) => features.push(feature),
                Err(err) => warn!(id = %record.id, %err, "skipping epic with unreadable state"),
            }
        }
        features.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(features)
    }

    fn save(&self, feature: &Feature) -> Result<()> {
        let id = feature_id(&self.repo, &feature.name)?;
        let record = self.repo.show(&id)?;
        let mut stored = feature.clone();
        stored.external_id = id.clone();
        self.repo.upsert_artifact(&id, &stored)?;
        sync_record_status(
            &self.repo,
            &record,
            feature_ledger_status(feature.status),
            "feature completed",
        )
    }

    fn delete(&self, name: &str) -> Result<()> {
        model::validate_feature_name(name)?;
        let Some(id) = self.repo.resolve_feature_record(name, false)? else {
            return Ok(());
        };
        for child in self.repo.list_children(&id)? {
            self.repo.delete(&child.id)?;
        }
        self.repo.delete(&id)?;
        Ok(())
    }
}

/// A task record paired with the ledger record carrying it.
struct Located {
    record: LedgerRecord,
    task: TaskRecord,
}

pub struct LedgerTaskStore {
    repo: Arc<Repository>,
}

impl LedgerTaskStore {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Decodes every child of the feature's epic. Children without state get
    /// a derived folder, which is written back so it never changes again.
    fn load(&self, feature: &str) -> Result<Vec<Located>> {
        let epic = feature_id(&self.repo, feature)?;
        let children = self.repo.list_children(&epic)?;

        let mut located = Vec::with_capacity(children.len());
        let mut missing = Vec::new();
        for record in children {
            let decoded = Carrier::parse(&record.description).and_then(|c| c.get::<TaskRecord>());
            match decoded {
                Ok(Some(mut task)) if !task.folder.is_empty() => {
                    task.external_id = Some(record.id.clone());
                    located.push(Located { record, task });
                }
                Ok(_) => missing.push(record),
                Err(err) => {
                    warn!(id = %record.id, %err, "task state unreadable; deriving from record");
                    missing.push(record);
                }
            }
        }

        let mut taken: BTreeSet<String> = located.iter().map(|l| l.task.folder.clone()).collect();
        let mut next = located
            .iter()
            .filter_map(|l| l.task.order())
            .max()
            .unwrap_or(0);
        for record in missing {
            let mut folder;
            loop {
                next += 1;
                folder = graph::folder_for(next, &record.title);
                if taken.insert(folder.clone()) {
                    break;
                }
            }
            let mut task = TaskRecord::pending(&folder, &record.title, TaskOrigin::Manual, vec![]);
            task.status = task_status_from_ledger(&record.status);
            task.external_id = Some(record.id.clone());
            let persisted = self.repo.update_carrier(&record.id, |carrier| {
                // A concurrent reader may have persisted a folder first.
                if carrier.get::<TaskRecord>().ok().flatten().is_some_and(|t| !t.folder.is_empty()) {
                    return Ok(());
                }
                if !carrier.has_block() && !carrier.prefix().trim().is_empty() {
                    let legacy_spec = carrier.prefix().to_string();
                    carrier.put_spec(&legacy_spec)?;
                }
                carrier.put(&task)
            })?;
            if let Ok(Some(stored)) = persisted.get::<TaskRecord>() {
                if !stored.folder.is_empty() {
                    task = stored;
                    task.external_id = Some(record.id.clone());
                }
            }
            debug!(id = %record.id, folder = %task.folder, "derived task folder from ledger record");
            located.push(Located { record, task });
        }

        located.sort_by(|a, b| a.task.folder.cmp(&b.task.folder));
        Ok(located)
    }

    fn locate(&self, feature: &str, folder: &str) -> Result<Located> {
        self.load(feature)?
            .into_iter()
            .find(|l| l.task.folder == folder)
            .ok_or_else(|| TaskhiveError::NotFound(format!("task '{folder}' in feature '{feature}'")))
    }

    fn patch_state<P: Serialize>(&self, feature: &str, folder: &str, patch: &P) -> Result<(Located, TaskRecord)> {
        let located = self.locate(feature, folder)?;
        let base = located.task.clone();
        let mut updated = None;
        self.repo.update_carrier(&located.record.id, |carrier| {
            let current = carrier.get::<TaskRecord>()?.unwrap_or(base);
            let mut next = apply_to_record(&current, patch)?;
            next.external_id = Some(located.record.id.clone());
            carrier.put(&next)?;
            updated = Some(next);
            Ok(())
        })?;
        let updated = updated.ok_or_else(|| {
            TaskhiveError::ValidationError(format!("task '{folder}' state was not written"))
        })?;
        Ok((located, updated))
    }

    fn read_carrier(&self, feature: &str, folder: &str) -> Result<Carrier> {
        let located = self.locate(feature, folder)?;
        Ok(self.repo.read_carrier(&located.record.id)?)
    }

    fn update_carrier(
        &self,
        feature: &str,
        folder: &str,
        update: impl FnOnce(&mut Carrier) -> Result<()>,
    ) -> Result<()> {
        let located = self.locate(feature, folder)?;
        self.repo.update_carrier(&located.record.id, update)?;
        Ok(())
    }
}

impl TaskStore for LedgerTaskStore {
    fn get(&self, feature: &str, folder: &str) -> Result<Option<TaskRecord>> {
        Ok(self
            .load(feature)?
            .into_iter()
            .find(|l| l.task.folder == folder)
            .map(|l| l.task))
    }

    fn list(&self, feature: &str) -> Result<Vec<TaskRecord>> {
        Ok(self.load(feature)?.into_iter().map(|l| l.task).collect())
    }

    fn create(&self, feature: &str, task: &NewTask) -> Result<TaskRecord> {
        let epic = feature_id(&self.repo, feature)?;
        // The folder only becomes visible once task_state is written, so the
        // artifact is stored before the lock is released.
        self.repo.with_name_lock(&[epic.as_str(), task.folder.as_str()], || {
            if self.load(feature)?.iter().any(|l| l.task.folder == task.folder) {
                return Err(TaskhiveError::AlreadyExists(format!(
                    "task '{}' in feature '{feature}'",
                    task.folder
                )));
            }
            let id = self.repo.create(&NewRecord {
                title: task.name.clone(),
                kind: RecordKind::Task,
                priority: Priority::default(),
                parent: Some(epic.clone()),
                description: String::new(),
            })?;
            let mut record =
                TaskRecord::pending(&task.folder, &task.name, task.origin, task.depends_on.clone());
            record.external_id = Some(id.clone());
            self.repo.upsert_artifact(&id, &record)?;
            Ok(record)
        })
    }

    fn update(&self, feature: &str, folder: &str, update: &TaskUpdate) -> Result<TaskRecord> {
        let (located, updated) = self.patch_state(feature, folder, update)?;
        let reason = updated
            .summary
            .clone()
            .unwrap_or_else(|| updated.status.as_str().to_string());
        sync_record_status(&self.repo, &located.record, ledger_status(updated.status), &reason)?;
        Ok(updated)
    }

    fn patch_background(&self, feature: &str, folder: &str, patch: &BackgroundPatch) -> Result<TaskRecord> {
        Ok(self.patch_state(feature, folder, patch)?.1)
    }

    fn delete(&self, feature: &str, folder: &str) -> Result<()> {
        let located = self.locate(feature, folder)?;
        self.repo.delete(&located.record.id)?;
        Ok(())
    }

    fn read_spec(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        Ok(self.read_carrier(feature, folder)?.spec())
    }

    fn write_spec(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        self.update_carrier(feature, folder, |carrier| carrier.put_spec(content))
    }

    fn read_report(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        Ok(self
            .read_carrier(feature, folder)?
            .get::<Report>()?
            .map(|r| r.content))
    }

    fn write_report(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        let report = Report {
            content: content.to_string(),
            updated_at: time::now_iso(),
        };
        self.update_carrier(feature, folder, |carrier| carrier.put(&report))
    }

    fn read_worker_prompt(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        Ok(self
            .read_carrier(feature, folder)?
            .get::<WorkerPrompt>()?
            .map(|p| p.content))
    }

    fn write_worker_prompt(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        let prompt = WorkerPrompt {
            content: content.to_string(),
            updated_at: time::now_iso(),
        };
        self.update_carrier(feature, folder, |carrier| carrier.put(&prompt))
    }

    fn record_dependencies(&self, feature: &str, task: &TaskRecord) -> Result<()> {
        if task.depends_on.is_empty() {
            return Ok(());
        }
        let located = self.load(feature)?;
        let Some(this) = located.iter().find(|l| l.task.folder == task.folder) else {
            return Err(TaskhiveError::NotFound(format!(
                "task '{}' in feature '{feature}'",
                task.folder
            )));
        };
        for dep in &task.depends_on {
            match located.iter().find(|l| &l.task.folder == dep) {
                Some(target) => self.repo.add_dependency(&this.record.id, &target.record.id)?,
                None => warn!(task = %task.folder, dependency = %dep, "dependency has no ledger record"),
            }
        }
        Ok(())
    }
}

pub struct LedgerPlanStore {
    repo: Arc<Repository>,
}

impl LedgerPlanStore {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    fn carrier(&self, feature: &str) -> Result<Carrier> {
        let id = feature_id(&self.repo, feature)?;
        Ok(self.repo.read_carrier(&id)?)
    }

    fn update(&self, feature: &str, update: impl FnOnce(&mut Carrier) -> Result<()>) -> Result<()> {
        let id = feature_id(&self.repo, feature)?;
        self.repo.update_carrier(&id, update)?;
        Ok(())
    }
}

impl PlanStore for LedgerPlanStore {
    fn read_plan(&self, feature: &str) -> Result<Option<String>> {
        let carrier = self.carrier(feature)?;
        let plan = carrier.prefix();
        Ok((!plan.trim().is_empty()).then(|| plan.to_string()))
    }

    fn write_plan(&self, feature: &str, content: &str) -> Result<()> {
        self.update(feature, |carrier| {
            carrier.set_prefix(content);
            Ok(())
        })
    }

    fn approve(&self, feature: &str, approval: &PlanApproval) -> Result<()> {
        self.update(feature, |carrier| carrier.put(approval))
    }

    fn approval(&self, feature: &str) -> Result<Option<PlanApproval>> {
        self.carrier(feature)?.get::<PlanApproval>()
    }

    fn revoke_approval(&self, feature: &str) -> Result<()> {
        self.update(feature, |carrier| {
            carrier.remove(crate::core::codec::ArtifactKind::PlanApproval);
            Ok(())
        })
    }

    fn add_comment(&self, feature: &str, comment: &PlanComment) -> Result<()> {
        self.update(feature, |carrier| {
            let mut doc = carrier.get::<PlanComments>()?.unwrap_or_default();
            doc.comments.push(comment.clone());
            carrier.put(&doc)
        })
    }

    fn comments(&self, feature: &str) -> Result<Vec<PlanComment>> {
        Ok(self
            .carrier(feature)?
            .get::<PlanComments>()?
            .map(|doc| doc.comments)
            .unwrap_or_default())
    }

    fn clear_comments(&self, feature: &str) -> Result<()> {
        self.update(feature, |carrier| {
            carrier.remove(crate::core::codec::ArtifactKind::PlanComments);
            Ok(())
        })
    }
}
