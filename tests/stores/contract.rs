//! Behaviour every backend must share. Each store test binary runs these
//! against its own [`Backends`].

use taskhive::core::codec::{PlanApproval, PlanComment};
use taskhive::core::error::TaskhiveError;
use taskhive::core::model::{
    BackgroundPatch, Blocker, FeatureStatus, NewFeature, NewTask, TaskOrigin, TaskStatus,
    TaskUpdate, WorkerSessionPatch,
};
use taskhive::stores::{Backends, plan_hash};

pub fn new_feature(name: &str) -> NewFeature {
    NewFeature {
        name: name.to_string(),
        ticket: Some("HIVE-12".to_string()),
        ..NewFeature::default()
    }
}

pub fn new_task(folder: &str, name: &str, depends_on: &[&str]) -> NewTask {
    NewTask {
        folder: folder.to_string(),
        name: name.to_string(),
        origin: TaskOrigin::Plan,
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
    }
}

pub fn is_not_found(err: &TaskhiveError) -> bool {
    match err {
        TaskhiveError::NotFound(_) => true,
        TaskhiveError::RepoError(inner) => inner.is_not_found(),
        _ => false,
    }
}

pub fn feature_lifecycle(b: &Backends) {
    assert!(b.features.get("auth").unwrap().is_none());
    assert!(b.features.list().unwrap().is_empty());

    let created = b.features.create(&new_feature("auth")).unwrap();
    assert_eq!(created.status, FeatureStatus::Planning);
    assert_eq!(created.ticket.as_deref(), Some("HIVE-12"));
    assert!(!created.external_id.is_empty());

    let dup = b.features.create(&new_feature("auth")).unwrap_err();
    assert!(matches!(dup, TaskhiveError::AlreadyExists(_)));

    let mut approved = b.features.get("auth").unwrap().unwrap();
    assert_eq!(approved, created);
    approved.status = FeatureStatus::Approved;
    approved.approved_at = Some("2026-01-01T00:00:00.000Z".to_string());
    b.features.save(&approved).unwrap();
    assert_eq!(
        b.features.get("auth").unwrap().unwrap().status,
        FeatureStatus::Approved
    );

    let mut ghost = approved.clone();
    ghost.name = "ghost".to_string();
    assert!(is_not_found(&b.features.save(&ghost).unwrap_err()));

    b.features.create(&new_feature("billing")).unwrap();
    let names: Vec<String> = b.features.list().unwrap().into_iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["auth", "billing"]);

    assert!(b.features.create(&new_feature("../escape")).is_err());
}

pub fn task_lifecycle(b: &Backends) {
    b.features.create(&new_feature("auth")).unwrap();
    assert!(b.tasks.get("auth", "01-base").unwrap().is_none());

    b.tasks.create("auth", &new_task("02-core", "Core", &["01-base"])).unwrap();
    b.tasks.create("auth", &new_task("01-base", "Base", &[])).unwrap();
    let dup = b.tasks.create("auth", &new_task("01-base", "Base", &[])).unwrap_err();
    assert!(matches!(dup, TaskhiveError::AlreadyExists(_)));

    let folders: Vec<String> = b.tasks.list("auth").unwrap().into_iter().map(|t| t.folder).collect();
    assert_eq!(folders, vec!["01-base", "02-core"]);

    let updated = b
        .tasks
        .update(
            "auth",
            "01-base",
            &TaskUpdate {
                status: Some(TaskStatus::Blocked),
                blocker: Some(Some(Blocker {
                    reason: "waiting on credentials".to_string(),
                    detail: None,
                })),
                ..TaskUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Blocked);

    let beat = b
        .tasks
        .patch_background(
            "auth",
            "01-base",
            &BackgroundPatch {
                idempotency_key: Some(Some("run-7".to_string())),
                worker_session: Some(Some(WorkerSessionPatch {
                    session_id: Some("s-1".to_string()),
                    message_count: Some(3),
                    ..WorkerSessionPatch::default()
                })),
            },
        )
        .unwrap();
    assert_eq!(beat.status, TaskStatus::Blocked);
    assert!(beat.blocker.is_some());
    assert_eq!(beat.worker_session.unwrap().message_count, 3);

    let cleared = b
        .tasks
        .update(
            "auth",
            "01-base",
            &TaskUpdate {
                status: Some(TaskStatus::Done),
                blocker: Some(None),
                summary: Some(Some("done".to_string())),
                ..TaskUpdate::default()
            },
        )
        .unwrap();
    assert!(cleared.blocker.is_none());
    assert_eq!(cleared.idempotency_key.as_deref(), Some("run-7"));

    let stored = b.tasks.get("auth", "01-base").unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
    assert_eq!(stored.summary.as_deref(), Some("done"));

    let missing = b.tasks.update("auth", "09-none", &TaskUpdate::default()).unwrap_err();
    assert!(is_not_found(&missing));

    b.tasks.delete("auth", "02-core").unwrap();
    assert!(b.tasks.get("auth", "02-core").unwrap().is_none());
    assert_eq!(b.tasks.list("auth").unwrap().len(), 1);
}

pub fn task_documents(b: &Backends) {
    b.features.create(&new_feature("auth")).unwrap();
    b.tasks.create("auth", &new_task("01-base", "Base", &[])).unwrap();

    assert_eq!(b.tasks.read_spec("auth", "01-base").unwrap(), None);
    assert_eq!(b.tasks.read_report("auth", "01-base").unwrap(), None);
    assert_eq!(b.tasks.read_worker_prompt("auth", "01-base").unwrap(), None);

    b.tasks.write_spec("auth", "01-base", "# Base\n\nSet up the schema.\n").unwrap();
    b.tasks.write_report("auth", "01-base", "Schema created.").unwrap();
    b.tasks.write_worker_prompt("auth", "01-base", "You are building the base.").unwrap();

    assert_eq!(
        b.tasks.read_spec("auth", "01-base").unwrap().unwrap().trim_end(),
        "# Base\n\nSet up the schema."
    );
    assert_eq!(
        b.tasks.read_report("auth", "01-base").unwrap().as_deref(),
        Some("Schema created.")
    );
    assert_eq!(
        b.tasks.read_worker_prompt("auth", "01-base").unwrap().as_deref(),
        Some("You are building the base.")
    );
    // Documents never disturb the task state.
    assert_eq!(
        b.tasks.get("auth", "01-base").unwrap().unwrap().status,
        TaskStatus::Pending
    );
}

pub fn plan_approval(b: &Backends) {
    b.features.create(&new_feature("auth")).unwrap();
    assert_eq!(b.plans.read_plan("auth").unwrap(), None);
    assert!(!b.plans.is_approved("auth").unwrap());

    let plan = "# Auth\n\n### 1. Base\n";
    b.plans.write_plan("auth", plan).unwrap();
    assert_eq!(b.plans.read_plan("auth").unwrap().unwrap().trim_end(), plan.trim_end());

    let approval = PlanApproval {
        approved_at: "2026-01-01T00:00:00.000Z".to_string(),
        plan_hash: plan_hash(plan),
        approved_by: Some("lead".to_string()),
    };
    b.plans.approve("auth", &approval).unwrap();
    assert_eq!(b.plans.approval("auth").unwrap(), Some(approval.clone()));
    assert!(b.plans.is_approved("auth").unwrap());

    b.plans.revoke_approval("auth").unwrap();
    assert_eq!(b.plans.approval("auth").unwrap(), None);
    assert!(!b.plans.is_approved("auth").unwrap());
    b.plans.revoke_approval("auth").unwrap();
    b.plans.approve("auth", &approval).unwrap();
    assert!(b.plans.is_approved("auth").unwrap());

    b.plans.write_plan("auth", "# Auth\n\n### 1. Base\n### 2. More\n").unwrap();
    assert!(!b.plans.is_approved("auth").unwrap());

    let comment = PlanComment {
        id: "c1".to_string(),
        line: Some(3),
        body: "split this".to_string(),
        author: None,
        created_at: "2026-01-01T00:00:00.000Z".to_string(),
    };
    b.plans.add_comment("auth", &comment).unwrap();
    b.plans
        .add_comment(
            "auth",
            &PlanComment {
                id: "c2".to_string(),
                ..comment.clone()
            },
        )
        .unwrap();
    let ids: Vec<String> = b.plans.comments("auth").unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    b.plans.clear_comments("auth").unwrap();
    assert!(b.plans.comments("auth").unwrap().is_empty());
    assert_eq!(
        b.plans.read_plan("auth").unwrap().unwrap().trim_end(),
        "# Auth\n\n### 1. Base\n### 2. More"
    );
}

pub fn delete_removes_everything(b: &Backends) {
    b.features.create(&new_feature("auth")).unwrap();
    b.plans.write_plan("auth", "### 1. Base\n").unwrap();
    b.tasks.create("auth", &new_task("01-base", "Base", &[])).unwrap();
    b.tasks.write_spec("auth", "01-base", "spec").unwrap();

    b.features.delete("auth").unwrap();
    assert!(b.features.get("auth").unwrap().is_none());
    assert!(b.features.list().unwrap().is_empty());
    assert!(is_not_found(&b.tasks.list("auth").unwrap_err()));

    // Deleting twice is fine, and the name is free again.
    b.features.delete("auth").unwrap();
    let again = b.features.create(&new_feature("auth")).unwrap();
    assert_eq!(again.status, FeatureStatus::Planning);
    assert!(b.tasks.list("auth").unwrap().is_empty());
}
