//! Local file backend.
//!
//! ```text
//! <root>/<feature>/feature.json
//! <root>/<feature>/plan.md
//! <root>/<feature>/plan-approval.json
//! <root>/<feature>/comments.json
//! <root>/<feature>/tasks/<folder>/status.json
//! <root>/<feature>/tasks/<folder>/{spec,report,worker-prompt}.md
//! ```
//!
//! Shared JSON documents are only mutated under their lock and replaced
//! atomically, so readers never need the lock.

use super::{FeatureStore, PlanStore, TaskStore};
use crate::core::codec::{PlanApproval, PlanComment, PlanComments};
use crate::core::error::{Result, TaskhiveError};
use crate::core::fs_atomic::{self, atomic_write, read_json, read_text, write_json};
use crate::core::lock::{self, LockOptions};
use crate::core::model::{
    self, BackgroundPatch, Feature, FeatureStatus, NewFeature, NewTask, TaskRecord, TaskUpdate,
};
use crate::core::patch;
use crate::core::time;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const FEATURE_FILE: &str = "feature.json";
pub const PLAN_FILE: &str = "plan.md";
pub const APPROVAL_FILE: &str = "plan-approval.json";
pub const COMMENTS_FILE: &str = "comments.json";
pub const TASKS_DIR: &str = "tasks";
pub const STATUS_FILE: &str = "status.json";
pub const SPEC_FILE: &str = "spec.md";
pub const REPORT_FILE: &str = "report.md";
pub const WORKER_PROMPT_FILE: &str = "worker-prompt.md";

/// Path arithmetic for one features root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    lock: LockOptions,
}

impl Layout {
    pub fn new(root: PathBuf, lock: LockOptions) -> Self {
        Self { root, lock }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn feature_dir(&self, feature: &str) -> PathBuf {
        self.root.join(feature)
    }

    pub fn feature_file(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join(FEATURE_FILE)
    }

    pub fn plan_file(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join(PLAN_FILE)
    }

    pub fn tasks_dir(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join(TASKS_DIR)
    }

    pub fn task_dir(&self, feature: &str, folder: &str) -> PathBuf {
        self.tasks_dir(feature).join(folder)
    }

    pub fn status_file(&self, feature: &str, folder: &str) -> PathBuf {
        self.task_dir(feature, folder).join(STATUS_FILE)
    }

    fn require_feature(&self, feature: &str) -> Result<()> {
        model::validate_feature_name(feature)?;
        if self.feature_file(feature).is_file() {
            Ok(())
        } else {
            Err(TaskhiveError::NotFound(format!("feature '{feature}'")))
        }
    }

    fn require_task(&self, feature: &str, folder: &str) -> Result<PathBuf> {
        validate_folder(folder)?;
        let path = self.status_file(feature, folder);
        if path.is_file() {
            Ok(path)
        } else {
            Err(TaskhiveError::NotFound(format!("task '{folder}' in feature '{feature}'")))
        }
    }
}

fn validate_folder(folder: &str) -> Result<()> {
    if folder.is_empty() || folder.starts_with('.') || folder.contains(['/', '\\']) {
        return Err(TaskhiveError::ValidationError(format!(
            "invalid task folder '{}'",
            folder.escape_debug()
        )));
    }
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TaskhiveError::IoError(err)),
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TaskhiveError::IoError(err)),
    }
}

pub struct LocalFeatureStore {
    layout: Arc<Layout>,
}

impl LocalFeatureStore {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }
}

impl FeatureStore for LocalFeatureStore {
    fn create(&self, new: &NewFeature) -> Result<Feature> {
        model::validate_feature_name(&new.name)?;
        let path = self.layout.feature_file(&new.name);
        lock::with_lock(&path, &self.layout.lock, || {
            if path.exists() {
                return Err(TaskhiveError::AlreadyExists(format!("feature '{}'", new.name)));
            }
            let feature = Feature {
                name: new.name.clone(),
                external_id: format!("local-{}", time::new_id()),
                status: FeatureStatus::Planning,
                ticket: new.ticket.clone(),
                session_id: new.session_id.clone(),
                created_at: time::now_iso(),
                approved_at: None,
                completed_at: None,
                workflow_path: new.workflow_path.clone(),
            };
            write_json(&path, &feature)?;
            debug!(feature = %feature.name, "created local feature");
            Ok(feature)
        })
    }

    fn get(&self, name: &str) -> Result<Option<Feature>> {
        model::validate_feature_name(name)?;
        read_json(&self.layout.feature_file(name))
    }

    fn list(&self) -> Result<Vec<Feature>> {
        let entries = match fs::read_dir(self.layout.root()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(TaskhiveError::IoError(err)),
        };
        let mut features = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(feature) = read_json::<Feature>(&entry.path().join(FEATURE_FILE))? {
                features.push(feature);
            }
        }
        features.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(features)
    }

    fn save(&self, feature: &Feature) -> Result<()> {
        self.layout.require_feature(&feature.name)?;
        let path = self.layout.feature_file(&feature.name);
        lock::with_lock(&path, &self.layout.lock, || write_json(&path, feature))
    }

    fn delete(&self, name: &str) -> Result<()> {
        model::validate_feature_name(name)?;
        remove_dir_if_exists(&self.layout.feature_dir(name))
    }
}

pub struct LocalTaskStore {
    layout: Arc<Layout>,
}

impl LocalTaskStore {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    fn mutate(&self, feature: &str, folder: &str, patch: patch::Patch) -> Result<TaskRecord> {
        let path = self.layout.require_task(feature, folder)?;
        let value = fs_atomic::locked_update(&path, &self.layout.lock, |current| {
            if current.as_object().is_none_or(|m| m.is_empty()) {
                return Err(TaskhiveError::NotFound(format!(
                    "task '{folder}' in feature '{feature}'"
                )));
            }
            patch::merge(current, &patch);
            Ok(())
        })?;
        decode_status(value, folder)
    }

    fn read_doc(&self, feature: &str, folder: &str, file: &str) -> Result<Option<String>> {
        self.layout.require_task(feature, folder)?;
        read_text(&self.layout.task_dir(feature, folder).join(file))
    }

    fn write_doc(&self, feature: &str, folder: &str, file: &str, content: &str) -> Result<()> {
        self.layout.require_task(feature, folder)?;
        atomic_write(&self.layout.task_dir(feature, folder).join(file), content.as_bytes())
    }
}

/// `folder` is optional in status.json; the directory name is authoritative.
fn decode_status(value: Value, folder: &str) -> Result<TaskRecord> {
    let mut record: TaskRecord = serde_json::from_value(value)?;
    if record.folder.is_empty() {
        record.folder = folder.to_string();
    }
    Ok(record)
}

impl TaskStore for LocalTaskStore {
    fn get(&self, feature: &str, folder: &str) -> Result<Option<TaskRecord>> {
        self.layout.require_feature(feature)?;
        validate_folder(folder)?;
        read_json::<Value>(&self.layout.status_file(feature, folder))?
            .map(|v| decode_status(v, folder))
            .transpose()
    }

    fn list(&self, feature: &str) -> Result<Vec<TaskRecord>> {
        self.layout.require_feature(feature)?;
        let entries = match fs::read_dir(self.layout.tasks_dir(feature)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(TaskhiveError::IoError(err)),
        };
        let mut tasks = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().to_string();
            if let Some(value) = read_json::<Value>(&entry.path().join(STATUS_FILE))? {
                tasks.push(decode_status(value, &folder)?);
            }
        }
        tasks.sort_by(|a, b| a.folder.cmp(&b.folder));
        Ok(tasks)
    }

    fn create(&self, feature: &str, task: &NewTask) -> Result<TaskRecord> {
        self.layout.require_feature(feature)?;
        validate_folder(&task.folder)?;
        let path = self.layout.status_file(feature, &task.folder);
        lock::with_lock(&path, &self.layout.lock, || {
            if path.exists() {
                return Err(TaskhiveError::AlreadyExists(format!(
                    "task '{}' in feature '{feature}'",
                    task.folder
                )));
            }
            let record = TaskRecord::pending(
                &task.folder,
                &task.name,
                task.origin,
                task.depends_on.clone(),
            );
            write_json(&path, &record)?;
            Ok(record)
        })
    }

    fn update(&self, feature: &str, folder: &str, update: &TaskUpdate) -> Result<TaskRecord> {
        self.mutate(feature, folder, patch::to_patch(update)?)
    }

    fn patch_background(&self, feature: &str, folder: &str, patch: &BackgroundPatch) -> Result<TaskRecord> {
        self.mutate(feature, folder, patch::to_patch(patch)?)
    }

    fn delete(&self, feature: &str, folder: &str) -> Result<()> {
        model::validate_feature_name(feature)?;
        validate_folder(folder)?;
        remove_dir_if_exists(&self.layout.task_dir(feature, folder))
    }

    fn read_spec(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        self.read_doc(feature, folder, SPEC_FILE)
    }

    fn write_spec(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        self.write_doc(feature, folder, SPEC_FILE, content)
    }

    fn read_report(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        self.read_doc(feature, folder, REPORT_FILE)
    }

    fn write_report(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        self.write_doc(feature, folder, REPORT_FILE, content)
    }

    fn read_worker_prompt(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        self.read_doc(feature, folder, WORKER_PROMPT_FILE)
    }

    fn write_worker_prompt(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        self.write_doc(feature, folder, WORKER_PROMPT_FILE, content)
    }
}

pub struct LocalPlanStore {
    layout: Arc<Layout>,
}

impl LocalPlanStore {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    fn path(&self, feature: &str, file: &str) -> PathBuf {
        self.layout.feature_dir(feature).join(file)
    }
}

impl PlanStore for LocalPlanStore {
    fn read_plan(&self, feature: &str) -> Result<Option<String>> {
        self.layout.require_feature(feature)?;
        read_text(&self.layout.plan_file(feature))
    }

    fn write_plan(&self, feature: &str, content: &str) -> Result<()> {
        self.layout.require_feature(feature)?;
        atomic_write(&self.layout.plan_file(feature), content.as_bytes())
    }

    fn approve(&self, feature: &str, approval: &PlanApproval) -> Result<()> {
        self.layout.require_feature(feature)?;
        write_json(&self.path(feature, APPROVAL_FILE), approval)
    }

    fn approval(&self, feature: &str) -> Result<Option<PlanApproval>> {
        self.layout.require_feature(feature)?;
        read_json(&self.path(feature, APPROVAL_FILE))
    }

    fn revoke_approval(&self, feature: &str) -> Result<()> {
        self.layout.require_feature(feature)?;
        let path = self.path(feature, APPROVAL_FILE);
        lock::with_lock(&path, &self.layout.lock, || remove_file_if_exists(&path))
    }

    fn add_comment(&self, feature: &str, comment: &PlanComment) -> Result<()> {
        self.layout.require_feature(feature)?;
        let path = self.path(feature, COMMENTS_FILE);
        fs_atomic::locked_update(&path, &self.layout.lock, |current| {
            let mut doc: PlanComments = serde_json::from_value(current.take())?;
            doc.comments.push(comment.clone());
            *current = serde_json::to_value(&doc)?;
            Ok(())
        })?;
        Ok(())
    }

    fn comments(&self, feature: &str) -> Result<Vec<PlanComment>> {
        self.layout.require_feature(feature)?;
        Ok(read_json::<PlanComments>(&self.path(feature, COMMENTS_FILE))?
            .map(|doc| doc.comments)
            .unwrap_or_default())
    }

    fn clear_comments(&self, feature: &str) -> Result<()> {
        self.layout.require_feature(feature)?;
        let path = self.path(feature, COMMENTS_FILE);
        lock::with_lock(&path, &self.layout.lock, || remove_file_if_exists(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{TaskOrigin, TaskStatus};
    use tempfile::{TempDir, tempdir};

    fn layout() -> (TempDir, Arc<Layout>) {
        let tmp = tempdir().unwrap();
        let layout = Arc::new(Layout::new(tmp.path().join("features"), LockOptions::default()));
        (tmp, layout)
    }

    fn new_feature(name: &str) -> NewFeature {
        NewFeature {
            name: name.to_string(),
            ..NewFeature::default()
        }
    }

    #[test]
    fn feature_lifecycle_on_disk() {
        let (_tmp, layout) = layout();
        let store = LocalFeatureStore::new(layout.clone());
        let created = store.create(&new_feature("auth")).unwrap();
        assert!(created.external_id.starts_with("local-"));
        assert!(layout.feature_file("auth").is_file());
        assert!(matches!(
            store.create(&new_feature("auth")),
            Err(TaskhiveError::AlreadyExists(_))
        ));
        assert!(store.get("missing").unwrap().is_none());
        assert!(matches!(
            store.create(&new_feature("../escape")),
            Err(TaskhiveError::ValidationError(_))
        ));

        store.delete("auth").unwrap();
        assert!(!layout.feature_dir("auth").exists());
        store.delete("auth").unwrap();
    }

    #[test]
    fn task_delete_stays_inside_features_root() {
        let (tmp, layout) = layout();
        let outside = tmp.path().join("outside/tasks/01-x");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("keep.txt"), "keep").unwrap();

        let tasks = LocalTaskStore::new(layout);
        assert!(matches!(
            tasks.delete("../outside", "01-x"),
            Err(TaskhiveError::ValidationError(_))
        ));
        assert!(outside.join("keep.txt").is_file());
    }

    #[test]
    fn status_json_without_folder_uses_directory_name() {
        let (_tmp, layout) = layout();
        LocalFeatureStore::new(layout.clone())
            .create(&new_feature("auth"))
            .unwrap();
        let path = layout.status_file("auth", "03-legacy");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"status":"done","planTitle":"Legacy"}"#).unwrap();

        let tasks = LocalTaskStore::new(layout).list("auth").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].folder, "03-legacy");
        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert_eq!(tasks[0].schema_version, 1);
        assert_eq!(tasks[0].origin, TaskOrigin::Plan);
    }

    #[test]
    fn update_preserves_unknown_fields() {
        let (_tmp, layout) = layout();
        LocalFeatureStore::new(layout.clone())
            .create(&new_feature("auth"))
            .unwrap();
        let tasks = LocalTaskStore::new(layout.clone());
        tasks
            .create(
                "auth",
                &NewTask {
                    folder: "01-base".into(),
                    name: "Base".into(),
                    origin: TaskOrigin::Plan,
                    depends_on: vec![],
                },
            )
            .unwrap();
        let path = layout.status_file("auth", "01-base");
        let mut raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        raw["reviewer"] = Value::String("sam".into());
        fs::write(&path, raw.to_string()).unwrap();

        tasks
            .update(
                "auth",
                "01-base",
                &TaskUpdate {
                    status: Some(TaskStatus::InProgress),
                    ..TaskUpdate::default()
                },
            )
            .unwrap();
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["reviewer"], "sam");
        assert_eq!(raw["status"], "in_progress");
    }

    #[test]
    fn comments_append_and_clear() {
        let (_tmp, layout) = layout();
        LocalFeatureStore::new(layout.clone())
            .create(&new_feature("auth"))
            .unwrap();
        let plans = LocalPlanStore::new(layout);
        for body in ["first", "second"] {
            plans
                .add_comment(
                    "auth",
                    &PlanComment {
                        id: time::new_id(),
                        line: Some(3),
                        body: body.to_string(),
                        author: None,
                        created_at: time::now_iso(),
                    },
                )
                .unwrap();
        }
        let bodies: Vec<String> = plans.comments("auth").unwrap().into_iter().map(|c| c.body).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        plans.clear_comments("auth").unwrap();
        assert!(plans.comments("auth").unwrap().is_empty());
    }
}
