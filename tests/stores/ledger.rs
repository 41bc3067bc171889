mod contract;

use std::sync::Arc;
use taskhive::core::config::EngineConfig;
use taskhive::core::gateway::LedgerRecord;
use taskhive::core::gateway::testing::FakeLedger;
use taskhive::core::model::TaskStatus;
use taskhive::stores::Backends;
use tempfile::{TempDir, tempdir};

fn backends() -> (TempDir, Arc<FakeLedger>, Backends) {
    let tmp = tempdir().unwrap();
    let fake = Arc::new(FakeLedger::new());
    let config = EngineConfig {
        project_root: tmp.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let b = Backends::open_with_runner(&config, fake.clone()).unwrap();
    (tmp, fake, b)
}

#[test]
fn ledger_feature_lifecycle() {
    let (_tmp, _fake, b) = backends();
    contract::feature_lifecycle(&b);
}

#[test]
fn ledger_task_lifecycle() {
    let (_tmp, _fake, b) = backends();
    contract::task_lifecycle(&b);
}

#[test]
fn ledger_task_documents() {
    let (_tmp, _fake, b) = backends();
    contract::task_documents(&b);
}

#[test]
fn ledger_plan_approval() {
    let (_tmp, _fake, b) = backends();
    contract::plan_approval(&b);
}

#[test]
fn ledger_delete_removes_everything() {
    let (_tmp, fake, b) = backends();
    contract::delete_removes_everything(&b);
    // Only the recreated epic remains.
    assert_eq!(fake.records().len(), 1);
}

#[test]
fn features_are_epics_and_tasks_are_children() {
    let (_tmp, fake, b) = backends();
    let feature = b.features.create(&contract::new_feature("auth")).unwrap();
    let epic = fake.record(&feature.external_id).unwrap();
    assert_eq!(epic.issue_type.as_deref(), Some("epic"));
    assert_eq!(epic.title, "auth");

    let task = b
        .tasks
        .create("auth", &contract::new_task("01-base", "Base", &[]))
        .unwrap();
    let child = fake.record(task.external_id.as_deref().unwrap()).unwrap();
    assert_eq!(child.parent.as_deref(), Some(feature.external_id.as_str()));
    assert_eq!(child.title, "Base");
    assert!(child.description.contains("taskhive:artifacts:begin"));
}

#[test]
fn plan_lives_in_the_epic_description() {
    let (_tmp, fake, b) = backends();
    let feature = b.features.create(&contract::new_feature("auth")).unwrap();
    b.plans.write_plan("auth", "### 1. Base\n").unwrap();
    let epic = fake.record(&feature.external_id).unwrap();
    assert!(epic.description.starts_with("### 1. Base\n"));

    // The feature artifact survives plan rewrites.
    b.plans.write_plan("auth", "### 1. Other\n").unwrap();
    assert_eq!(b.features.get("auth").unwrap().unwrap().external_id, feature.external_id);
}

#[test]
fn writes_flush_and_reads_do_not_import_by_default() {
    let (_tmp, fake, b) = backends();
    b.features.create(&contract::new_feature("auth")).unwrap();
    assert!(fake.count_sync("--flush-only") >= 1);
    b.features.list().unwrap();
    assert_eq!(fake.count_sync("--import-only"), 0);
}

#[test]
fn records_created_outside_taskhive_appear_as_manual_tasks() {
    let (_tmp, fake, b) = backends();
    let feature = b.features.create(&contract::new_feature("auth")).unwrap();
    fake.insert(LedgerRecord {
        id: "bd-500".into(),
        title: "Fix flaky login".into(),
        status: "closed".into(),
        description: "Repro steps in the ticket.".into(),
        parent: Some(feature.external_id.clone()),
        issue_type: Some("task".into()),
        ..LedgerRecord::default()
    });

    let tasks = b.tasks.list("auth").unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].folder, "01-fix-flaky-login");
    assert_eq!(tasks[0].status, TaskStatus::Done);
    assert_eq!(
        b.tasks.read_spec("auth", "01-fix-flaky-login").unwrap().as_deref(),
        Some("Repro steps in the ticket.")
    );
}

#[test]
fn ledger_failures_do_not_leak_raw_output() {
    let (_tmp, fake, b) = backends();
    fake.fail_next("create", 1);
    let err = b.features.create(&contract::new_feature("auth")).unwrap_err();
    assert!(!err.to_string().contains(FakeLedger::INTERNAL_FAILURE_TEXT));
}
