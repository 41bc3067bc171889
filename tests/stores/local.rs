mod contract;

use std::fs;
use taskhive::core::config::EngineConfig;
use taskhive::core::model::TaskStatus;
use taskhive::stores::Backends;
use tempfile::{TempDir, tempdir};

fn backends() -> (TempDir, Backends) {
    let tmp = tempdir().unwrap();
    let b = Backends::local(&EngineConfig::local(tmp.path()));
    (tmp, b)
}

#[test]
fn local_feature_lifecycle() {
    let (_tmp, b) = backends();
    contract::feature_lifecycle(&b);
}

#[test]
fn local_task_lifecycle() {
    let (_tmp, b) = backends();
    contract::task_lifecycle(&b);
}

#[test]
fn local_task_documents() {
    let (_tmp, b) = backends();
    contract::task_documents(&b);
}

#[test]
fn local_plan_approval() {
    let (_tmp, b) = backends();
    contract::plan_approval(&b);
}

#[test]
fn local_delete_removes_everything() {
    let (tmp, b) = backends();
    contract::delete_removes_everything(&b);
    let feature_dir = tmp.path().join(".taskhive/features/auth");
    assert!(!feature_dir.join("plan.md").exists());
    assert!(!feature_dir.join("tasks").exists());
}

#[test]
fn on_disk_layout_matches_documented_paths() {
    let (tmp, b) = backends();
    b.features.create(&contract::new_feature("auth")).unwrap();
    b.plans.write_plan("auth", "### 1. Base\n").unwrap();
    b.tasks
        .create("auth", &contract::new_task("01-base", "Base", &[]))
        .unwrap();
    b.tasks.write_spec("auth", "01-base", "spec").unwrap();

    let root = tmp.path().join(".taskhive/features/auth");
    assert!(root.join("feature.json").is_file());
    assert_eq!(fs::read_to_string(root.join("plan.md")).unwrap(), "### 1. Base\n");
    let status: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(root.join("tasks/01-base/status.json")).unwrap())
            .unwrap();
    assert_eq!(status["status"], "pending");
    assert_eq!(status["planTitle"], "Base");
    assert_eq!(
        fs::read_to_string(root.join("tasks/01-base/spec.md")).unwrap(),
        "spec"
    );
}

#[test]
fn hand_edited_status_is_read_back() {
    let (tmp, b) = backends();
    b.features.create(&contract::new_feature("auth")).unwrap();
    let dir = tmp.path().join(".taskhive/features/auth/tasks/03-manual");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("status.json"),
        r#"{"status":"in_progress","planTitle":"Manual","dependsOn":[]}"#,
    )
    .unwrap();

    let task = b.tasks.get("auth", "03-manual").unwrap().unwrap();
    assert_eq!(task.folder, "03-manual");
    assert_eq!(task.status, TaskStatus::InProgress);
}
