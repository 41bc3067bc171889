//! Workflow operations over the configured backend.
//!
//! [`Engine`] owns the selected [`Backends`] and implements everything that
//! spans more than one store: plan approval, plan-to-task sync, feature
//! status transitions, manual tasks, completion and worker heartbeats.

use crate::core::codec::{PlanApproval, PlanComment};
use crate::core::config::{BackendMode, EngineConfig};
use crate::core::error::{Result, TaskhiveError};
use crate::core::gateway::CommandRunner;
use crate::core::graph::{self, Partition};
use crate::core::model::{
    BackgroundPatch, Blocker, Feature, FeatureStatus, NewFeature, NewTask, TaskOrigin, TaskRecord,
    TaskStatus, TaskUpdate, WorkerSessionPatch,
};
use crate::core::time;
use crate::stores::{Backends, plan_hash};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// What a plan sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub kept: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub plan: Option<String>,
    pub approved: bool,
    pub approval: Option<PlanApproval>,
    pub comments: Vec<PlanComment>,
}

/// Completion-owned fields reported by whoever finished (or gave up on) a task.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub status: Option<TaskStatus>,
    pub summary: Option<String>,
    pub base_commit: Option<String>,
    pub blocker: Option<Blocker>,
}

#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    pub session_id: Option<String>,
    pub attempt: Option<u32>,
    pub message_count: Option<u32>,
    pub mode: Option<String>,
    pub idempotency_key: Option<String>,
}

pub struct Engine {
    config: EngineConfig,
    backends: Backends,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        let backends = Backends::open(&config)?;
        Ok(Self { config, backends })
    }

    pub fn open_with_runner(config: EngineConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let backends = Backends::open_with_runner(&config, runner)?;
        Ok(Self { config, backends })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mode(&self) -> BackendMode {
        self.backends.mode
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    // ---- features ----

    pub fn create_feature(&self, new: &NewFeature) -> Result<Feature> {
        let feature = self.backends.features.create(new)?;
        info!(feature = %feature.name, id = %feature.external_id, "feature created");
        Ok(feature)
    }

    pub fn feature(&self, name: &str) -> Result<Feature> {
        self.backends
            .features
            .get(name)?
            .ok_or_else(|| TaskhiveError::NotFound(format!("feature '{name}'")))
    }

    pub fn list_features(&self) -> Result<Vec<Feature>> {
        self.backends.features.list()
    }

    pub fn set_feature_status(&self, name: &str, next: FeatureStatus) -> Result<Feature> {
        let mut feature = self.feature(name)?;
        if feature.status == next {
            return Ok(feature);
        }
        let has_tasks = !self.backends.tasks.list(name)?.is_empty();
        if !feature.status.can_transition_to(next, has_tasks) {
            return Err(TaskhiveError::InvalidTransition {
                from: feature.status.to_string(),
                to: next.to_string(),
            });
        }
        match next {
            FeatureStatus::Planning => feature.approved_at = None,
            FeatureStatus::Approved => {
                feature.approved_at.get_or_insert_with(time::now_iso);
            }
            FeatureStatus::Executing => {}
            FeatureStatus::Completed => feature.completed_at = Some(time::now_iso()),
        }
        info!(feature = %name, from = %feature.status, to = %next, "feature status changed");
        feature.status = next;
        self.backends.features.save(&feature)?;
        if next == FeatureStatus::Planning {
            // Back in planning, the plan needs a fresh approval before sync.
            self.backends.plans.revoke_approval(name)?;
        }
        Ok(feature)
    }

    fn require_open(&self, name: &str) -> Result<Feature> {
        let feature = self.feature(name)?;
        if feature.status == FeatureStatus::Completed {
            return Err(TaskhiveError::ValidationError(format!(
                "feature '{name}' is completed"
            )));
        }
        Ok(feature)
    }

    // ---- plans ----

    pub fn write_plan(&self, feature: &str, content: &str) -> Result<()> {
        self.require_open(feature)?;
        let was_approved = self.backends.plans.is_approved(feature)?;
        self.backends.plans.write_plan(feature, content)?;
        if was_approved && !self.backends.plans.is_approved(feature)? {
            warn!(feature = %feature, "plan changed after approval; approval no longer applies");
        }
        Ok(())
    }

    pub fn plan(&self, feature: &str) -> Result<PlanView> {
        self.feature(feature)?;
        Ok(PlanView {
            plan: self.backends.plans.read_plan(feature)?,
            approved: self.backends.plans.is_approved(feature)?,
            approval: self.backends.plans.approval(feature)?,
            comments: self.backends.plans.comments(feature)?,
        })
    }

    fn plan_source(&self, feature: &Feature) -> String {
        match self.backends.mode {
            BackendMode::Local => self
                .config
                .features_root()
                .join(&feature.name)
                .join(crate::stores::local::PLAN_FILE)
                .display()
                .to_string(),
            BackendMode::Ledger => format!("plan of ledger epic {}", feature.external_id),
        }
    }

    fn stored_plan(&self, feature: &Feature) -> Result<String> {
        self.backends
            .plans
            .read_plan(&feature.name)?
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                TaskhiveError::ValidationError(format!("feature '{}' has no plan", feature.name))
            })
    }

    /// Approves the current plan text. The plan must parse and validate first.
    pub fn approve_plan(&self, name: &str, approved_by: Option<String>) -> Result<PlanApproval> {
        let feature = self.require_open(name)?;
        let plan = self.stored_plan(&feature)?;
        let source = self.plan_source(&feature);
        graph::validate(&graph::parse_plan(&plan, &source)?, &source)?;

        let approval = PlanApproval {
            approved_at: time::now_iso(),
            plan_hash: plan_hash(&plan),
            approved_by,
        };
        self.backends.plans.approve(name, &approval)?;
        if feature.status == FeatureStatus::Planning {
            self.set_feature_status(name, FeatureStatus::Approved)?;
        }
        info!(feature = %name, hash = %approval.plan_hash, "plan approved");
        Ok(approval)
    }

    pub fn add_plan_comment(
        &self,
        feature: &str,
        body: &str,
        line: Option<u32>,
        author: Option<String>,
    ) -> Result<PlanComment> {
        self.feature(feature)?;
        if body.trim().is_empty() {
            return Err(TaskhiveError::ValidationError("comment body is empty".to_string()));
        }
        let comment = PlanComment {
            id: time::new_id(),
            line,
            body: body.to_string(),
            author,
            created_at: time::now_iso(),
        };
        self.backends.plans.add_comment(feature, &comment)?;
        Ok(comment)
    }

    pub fn clear_plan_comments(&self, feature: &str) -> Result<()> {
        self.feature(feature)?;
        self.backends.plans.clear_comments(feature)
    }

    // ---- tasks ----

    pub fn tasks(&self, feature: &str) -> Result<Vec<TaskRecord>> {
        self.backends.tasks.list(feature)
    }

    pub fn task(&self, feature: &str, folder: &str) -> Result<TaskRecord> {
        self.backends
            .tasks
            .get(feature, folder)?
            .ok_or_else(|| TaskhiveError::NotFound(format!("task '{folder}' in feature '{feature}'")))
    }

    pub fn runnable(&self, feature: &str) -> Result<Partition> {
        Ok(graph::partition(&self.tasks(feature)?))
    }

    /// Brings the task set in line with the approved plan.
    ///
    /// The plan is parsed and validated before anything is written, so an
    /// invalid plan leaves the task set untouched. Existing plan tasks are
    /// matched by title and keep their folder and dependencies; tasks that
    /// left the plan are removed unless work on them started or finished.
    pub fn sync_tasks(&self, name: &str) -> Result<SyncReport> {
        let feature = self.require_open(name)?;
        if !self.backends.plans.is_approved(name)? {
            return Err(TaskhiveError::ValidationError(format!(
                "plan for feature '{name}' is not approved or changed since approval"
            )));
        }
        let plan = self.stored_plan(&feature)?;
        let source = self.plan_source(&feature);
        let planned = graph::parse_plan(&plan, &source)?;
        let numbers = graph::validate(&planned, &source)?;

        let existing = self.backends.tasks.list(name)?;
        let mut taken: BTreeSet<String> = existing.iter().map(|t| t.folder.clone()).collect();
        let mut matched: BTreeSet<String> = BTreeSet::new();
        let mut folders: BTreeMap<u32, String> = BTreeMap::new();
        let mut to_create: Vec<(u32, String, String)> = Vec::new();

        let mut ordered = planned.clone();
        ordered.sort_by_key(|t| t.number);
        for task in &ordered {
            let reuse = existing.iter().find(|t| {
                t.origin == TaskOrigin::Plan && t.name == task.name && !matched.contains(&t.folder)
            });
            match reuse {
                Some(t) => {
                    matched.insert(t.folder.clone());
                    folders.insert(task.number, t.folder.clone());
                }
                None => {
                    let folder = unique_folder(graph::folder_for(task.number, &task.name), &taken);
                    taken.insert(folder.clone());
                    folders.insert(task.number, folder.clone());
                    to_create.push((task.number, task.name.clone(), folder));
                }
            }
        }

        let resolved = graph::resolve(&numbers, &folders);
        let mut report = SyncReport::default();
        let mut created = Vec::with_capacity(to_create.len());
        for (number, task_name, folder) in to_create {
            let depends_on = resolved.get(&number).cloned().unwrap_or_default();
            let record = self.backends.tasks.create(
                name,
                &NewTask {
                    folder: folder.clone(),
                    name: task_name,
                    origin: TaskOrigin::Plan,
                    depends_on,
                },
            )?;
            report.created.push(folder);
            created.push(record);
        }
        for record in &created {
            self.backends.tasks.record_dependencies(name, record)?;
        }

        for task in &existing {
            if matched.contains(&task.folder) {
                report.kept.push(task.folder.clone());
                continue;
            }
            let superseded = task.origin == TaskOrigin::Plan
                && !matches!(task.status, TaskStatus::Done | TaskStatus::InProgress);
            if superseded {
                self.backends.tasks.delete(name, &task.folder)?;
                report.removed.push(task.folder.clone());
            } else {
                report.kept.push(task.folder.clone());
            }
        }

        info!(
            feature = %name,
            created = report.created.len(),
            removed = report.removed.len(),
            kept = report.kept.len(),
            "synced tasks from plan"
        );
        Ok(report)
    }

    /// Adds a task outside the plan, numbered after the highest existing task.
    pub fn create_manual_task(&self, feature: &str, name: &str, depends_on: Vec<String>) -> Result<TaskRecord> {
        self.require_open(feature)?;
        if name.trim().is_empty() {
            return Err(TaskhiveError::ValidationError("task name is empty".to_string()));
        }
        let existing = self.tasks(feature)?;
        let known: BTreeSet<&str> = existing.iter().map(|t| t.folder.as_str()).collect();
        let unknown: Vec<&String> = depends_on.iter().filter(|d| !known.contains(d.as_str())).collect();
        if !unknown.is_empty() {
            return Err(TaskhiveError::ValidationError(format!(
                "task '{name}' depends on unknown task(s): {}",
                unknown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }

        let number = existing.iter().filter_map(|t| t.order()).max().unwrap_or(0) + 1;
        let taken: BTreeSet<String> = existing.iter().map(|t| t.folder.clone()).collect();
        let folder = unique_folder(graph::folder_for(number, name), &taken);

        let mut edges: BTreeMap<String, Vec<String>> = existing
            .iter()
            .map(|t| (t.folder.clone(), t.depends_on.clone()))
            .collect();
        edges.insert(folder.clone(), depends_on.clone());
        if let Some(cycle) = graph::find_cycle(&edges) {
            return Err(TaskhiveError::ValidationError(format!(
                "adding task '{folder}' would create a dependency cycle: {}",
                cycle.join(" -> ")
            )));
        }

        let record = self.backends.tasks.create(
            feature,
            &NewTask {
                folder,
                name: name.to_string(),
                origin: TaskOrigin::Manual,
                depends_on,
            },
        )?;
        self.backends.tasks.record_dependencies(feature, &record)?;
        info!(feature = %feature, folder = %record.folder, "manual task created");
        Ok(record)
    }

    /// Records a status change with its completion-owned details.
    pub fn complete_task(&self, feature: &str, folder: &str, completion: Completion) -> Result<TaskRecord> {
        let current = self.task(feature, folder)?;
        let status = completion.status.unwrap_or(current.status);
        let now = time::now_iso();

        let mut update = TaskUpdate {
            status: Some(status),
            ..TaskUpdate::default()
        };
        if let Some(summary) = completion.summary {
            update.summary = Some(Some(summary));
        }
        if let Some(commit) = completion.base_commit {
            update.base_commit = Some(Some(commit));
        }
        match (status, completion.blocker) {
            (_, Some(blocker)) => update.blocker = Some(Some(blocker)),
            (TaskStatus::Blocked, None) => {}
            (_, None) if current.blocker.is_some() => update.blocker = Some(None),
            _ => {}
        }
        match status {
            TaskStatus::InProgress => {
                if current.started_at.is_none() {
                    update.started_at = Some(now);
                }
                update.completed_at = Some(None);
            }
            TaskStatus::Pending => update.completed_at = Some(None),
            TaskStatus::Blocked => {}
            TaskStatus::Done | TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Partial => {
                update.completed_at = Some(Some(now));
            }
        }

        let record = self.backends.tasks.update(feature, folder, &update)?;
        info!(feature = %feature, folder = %folder, status = %record.status, "task updated");

        if status == TaskStatus::InProgress {
            let owner = self.feature(feature)?;
            if owner.status == FeatureStatus::Approved {
                self.set_feature_status(feature, FeatureStatus::Executing)?;
            }
        }
        Ok(record)
    }

    /// Background-owned liveness update; never touches status or summary.
    pub fn record_heartbeat(&self, feature: &str, folder: &str, beat: Heartbeat) -> Result<TaskRecord> {
        let patch = BackgroundPatch {
            idempotency_key: beat.idempotency_key.map(Some),
            worker_session: Some(Some(WorkerSessionPatch {
                session_id: beat.session_id,
                attempt: beat.attempt,
                message_count: beat.message_count,
                last_heartbeat_at: Some(time::now_iso()),
                mode: beat.mode,
            })),
        };
        self.backends.tasks.patch_background(feature, folder, &patch)
    }

    /// Removes a task outright. Tasks that depend on it stay blocked.
    pub fn delete_task(&self, feature: &str, folder: &str) -> Result<()> {
        let tasks = self.tasks(feature)?;
        if !tasks.iter().any(|t| t.folder == folder) {
            return Err(TaskhiveError::NotFound(format!("task '{folder}' in feature '{feature}'")));
        }
        let dependents: Vec<&str> = tasks
            .iter()
            .filter(|t| t.depends_on.iter().any(|d| d == folder))
            .map(|t| t.folder.as_str())
            .collect();
        if !dependents.is_empty() {
            warn!(
                feature = %feature,
                folder = %folder,
                dependents = ?dependents,
                "deleting a task other tasks depend on; they will stay blocked"
            );
        }
        self.backends.tasks.delete(feature, folder)
    }

    pub fn task_spec(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        self.backends.tasks.read_spec(feature, folder)
    }

    pub fn write_task_spec(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        self.backends.tasks.write_spec(feature, folder, content)
    }

    pub fn task_report(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        self.backends.tasks.read_report(feature, folder)
    }

    pub fn write_task_report(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        self.backends.tasks.write_report(feature, folder, content)
    }

    pub fn worker_prompt(&self, feature: &str, folder: &str) -> Result<Option<String>> {
        self.backends.tasks.read_worker_prompt(feature, folder)
    }

    pub fn write_worker_prompt(&self, feature: &str, folder: &str, content: &str) -> Result<()> {
        self.backends.tasks.write_worker_prompt(feature, folder, content)
    }
}

/// `base`, or `base-2`, `base-3`, ... when taken.
fn unique_folder(base: String, taken: &BTreeSet<String>) -> String {
    if !taken.contains(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    const PLAN: &str = "# Auth\n\n### 1. Base\nDepends on: none\n\n### 2. Core\n\n### 3. UI\nDepends on: 1\n";

    fn engine() -> (TempDir, Engine) {
        let tmp = tempdir().unwrap();
        let engine = Engine::open(EngineConfig::local(tmp.path())).unwrap();
        engine
            .create_feature(&NewFeature {
                name: "auth".into(),
                ..NewFeature::default()
            })
            .unwrap();
        (tmp, engine)
    }

    fn approved(plan: &str) -> (TempDir, Engine) {
        let (tmp, engine) = engine();
        engine.write_plan("auth", plan).unwrap();
        engine.approve_plan("auth", None).unwrap();
        (tmp, engine)
    }

    #[test]
    fn unique_folder_appends_suffix() {
        let taken: BTreeSet<String> = ["01-a".to_string(), "01-a-2".to_string()].into();
        assert_eq!(unique_folder("01-a".into(), &taken), "01-a-3");
        assert_eq!(unique_folder("02-b".into(), &taken), "02-b");
    }

    #[test]
    fn approval_moves_feature_and_tracks_plan_hash() {
        let (_tmp, engine) = approved(PLAN);
        assert_eq!(engine.feature("auth").unwrap().status, FeatureStatus::Approved);
        assert!(engine.plan("auth").unwrap().approved);

        engine.write_plan("auth", &format!("{PLAN}\n### 4. Docs\n")).unwrap();
        assert!(!engine.plan("auth").unwrap().approved);
        assert!(engine.sync_tasks("auth").is_err());
    }

    #[test]
    fn returning_to_planning_drops_the_approval() {
        let (_tmp, engine) = approved(PLAN);
        engine
            .set_feature_status("auth", FeatureStatus::Planning)
            .unwrap();

        let view = engine.plan("auth").unwrap();
        assert!(!view.approved);
        assert!(view.approval.is_none());
        assert!(matches!(
            engine.sync_tasks("auth"),
            Err(TaskhiveError::ValidationError(_))
        ));
        assert!(engine.tasks("auth").unwrap().is_empty());

        engine.approve_plan("auth", None).unwrap();
        assert_eq!(engine.sync_tasks("auth").unwrap().created.len(), 3);
    }

    #[test]
    fn approving_an_invalid_plan_fails() {
        let (_tmp, engine) = engine();
        engine
            .write_plan("auth", "### 1. A\nDepends on: 2\n### 2. B\nDepends on: 1\n")
            .unwrap();
        let err = engine.approve_plan("auth", None).unwrap_err();
        assert!(matches!(err, TaskhiveError::PlanError(_)));
        assert_eq!(engine.feature("auth").unwrap().status, FeatureStatus::Planning);
    }

    #[test]
    fn sync_creates_resolved_tasks() {
        let (_tmp, engine) = approved(PLAN);
        let report = engine.sync_tasks("auth").unwrap();
        assert_eq!(report.created, vec!["01-base", "02-core", "03-ui"]);

        let tasks = engine.tasks("auth").unwrap();
        let deps: Vec<Vec<String>> = tasks.iter().map(|t| t.depends_on.clone()).collect();
        assert_eq!(
            deps,
            vec![vec![], vec!["01-base".to_string()], vec!["01-base".to_string()]]
        );
        assert_eq!(engine.runnable("auth").unwrap().runnable, vec!["01-base"]);
    }

    #[test]
    fn transitions_are_validated() {
        let (_tmp, engine) = approved(PLAN);
        engine.sync_tasks("auth").unwrap();
        let err = engine
            .set_feature_status("auth", FeatureStatus::Planning)
            .unwrap_err();
        assert!(matches!(err, TaskhiveError::InvalidTransition { .. }));

        engine
            .complete_task(
                "auth",
                "01-base",
                Completion {
                    status: Some(TaskStatus::InProgress),
                    ..Completion::default()
                },
            )
            .unwrap();
        assert_eq!(engine.feature("auth").unwrap().status, FeatureStatus::Executing);

        let done = engine.set_feature_status("auth", FeatureStatus::Completed).unwrap();
        assert!(done.completed_at.is_some());
        assert!(engine.write_plan("auth", PLAN).is_err());
    }

    #[test]
    fn completion_stamps_and_clears_blocker() {
        let (_tmp, engine) = approved(PLAN);
        engine.sync_tasks("auth").unwrap();
        let blocked = engine
            .complete_task(
                "auth",
                "01-base",
                Completion {
                    status: Some(TaskStatus::Blocked),
                    blocker: Some(Blocker {
                        reason: "needs credentials".into(),
                        detail: None,
                    }),
                    ..Completion::default()
                },
            )
            .unwrap();
        assert!(blocked.blocker.is_some());

        let done = engine
            .complete_task(
                "auth",
                "01-base",
                Completion {
                    status: Some(TaskStatus::Done),
                    summary: Some("base in place".into()),
                    base_commit: Some("abc123".into()),
                    ..Completion::default()
                },
            )
            .unwrap();
        assert!(done.blocker.is_none());
        assert!(done.completed_at.is_some());
        assert_eq!(done.base_commit.as_deref(), Some("abc123"));

        let partition = engine.runnable("auth").unwrap();
        assert_eq!(partition.runnable, vec!["02-core", "03-ui"]);
        assert_eq!(partition.completed, vec!["01-base"]);
    }

    #[test]
    fn heartbeat_does_not_touch_completion_fields() {
        let (_tmp, engine) = approved(PLAN);
        engine.sync_tasks("auth").unwrap();
        engine
            .complete_task(
                "auth",
                "01-base",
                Completion {
                    status: Some(TaskStatus::InProgress),
                    summary: Some("working".into()),
                    ..Completion::default()
                },
            )
            .unwrap();
        let beat = engine
            .record_heartbeat(
                "auth",
                "01-base",
                Heartbeat {
                    session_id: Some("s-1".into()),
                    message_count: Some(7),
                    idempotency_key: Some("run-1".into()),
                    ..Heartbeat::default()
                },
            )
            .unwrap();
        assert_eq!(beat.status, TaskStatus::InProgress);
        assert_eq!(beat.summary.as_deref(), Some("working"));
        assert_eq!(beat.idempotency_key.as_deref(), Some("run-1"));
        let session = beat.worker_session.unwrap();
        assert_eq!(session.session_id, "s-1");
        assert_eq!(session.message_count, 7);
        assert!(!session.last_heartbeat_at.is_empty());

        let again = engine
            .record_heartbeat(
                "auth",
                "01-base",
                Heartbeat {
                    message_count: Some(8),
                    ..Heartbeat::default()
                },
            )
            .unwrap();
        let session = again.worker_session.unwrap();
        assert_eq!(session.session_id, "s-1");
        assert_eq!(session.message_count, 8);
        assert_eq!(again.idempotency_key.as_deref(), Some("run-1"));
    }

    #[test]
    fn manual_tasks_number_after_existing_and_validate_refs() {
        let (_tmp, engine) = approved(PLAN);
        engine.sync_tasks("auth").unwrap();
        let manual = engine
            .create_manual_task("auth", "Hotfix login", vec!["03-ui".into()])
            .unwrap();
        assert_eq!(manual.folder, "04-hotfix-login");
        assert_eq!(manual.origin, TaskOrigin::Manual);

        let err = engine
            .create_manual_task("auth", "Ghost", vec!["09-missing".into()])
            .unwrap_err();
        assert!(err.to_string().contains("09-missing"));
    }

    #[test]
    fn comments_round_trip_through_plan_view() {
        let (_tmp, engine) = engine();
        engine.write_plan("auth", PLAN).unwrap();
        let c = engine
            .add_plan_comment("auth", "split task 2", Some(7), Some("rev".into()))
            .unwrap();
        let view = engine.plan("auth").unwrap();
        assert_eq!(view.comments, vec![c]);
        assert!(engine.add_plan_comment("auth", "  ", None, None).is_err());
        engine.clear_plan_comments("auth").unwrap();
        assert!(engine.plan("auth").unwrap().comments.is_empty());
    }
}
