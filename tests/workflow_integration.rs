use std::fs;
use std::path::Path;

use tempfile::tempdir;

use shark::config::SharkConfig;
use shark::db::Database;
use shark::error::SharkError;
use shark::store::epics::NewEpic;
use shark::store::features::NewFeature;
use shark::store::tasks::NewTask;
use shark::store::{StatusChange, Store};

const CUSTOM_CONFIG: &str = r#"{
  "status_flow": {
    "backlog": ["in_development", "blocked"],
    "in_development": ["ready_for_code_review", "blocked", "backlog"],
    "blocked": ["backlog"],
    "ready_for_code_review": ["in_qa", "in_development"],
    "in_qa": ["ready_for_approval", "in_development", "blocked"],
    "ready_for_approval": ["shipped"],
    "shipped": []
  },
  "special_statuses": {
    "_start_": ["backlog"],
    "_complete_": ["shipped"]
  },
  "status_verbs": {
    "start": "in_development",
    "complete": "ready_for_code_review",
    "approve": "shipped",
    "reopen": "backlog",
    "block": "blocked",
    "unblock": "backlog"
  }
}"#;

#[test]
fn editing_the_config_redefines_the_pipeline() {
    // Scenario C: a task moves through a custom workflow with no code
    // change beyond the config file.
    let dir = tempdir().unwrap();
    fs::write(SharkConfig::path(dir.path()), CUSTOM_CONFIG).unwrap();
    let config = SharkConfig::load(dir.path()).unwrap();
    let wf = config.workflow().unwrap();

    let db = Database::open_memory().unwrap();
    let store = Store::new(&db, dir.path());
    store
        .create_epic(
            &wf,
            NewEpic {
                title: "Platform".into(),
                ..Default::default()
            },
        )
        .unwrap();
    store
        .create_feature(
            &wf,
            "E01",
            NewFeature {
                title: "Pipeline".into(),
                ..Default::default()
            },
        )
        .unwrap();
    let task = store
        .create_task(
            &wf,
            "E01-F01",
            NewTask {
                title: "Wire it up".into(),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(task.status, "backlog");

    // force into the middle of the custom pipeline
    store
        .update_status(
            &wf,
            &task.key,
            StatusChange {
                new_status: "in_development",
                forced: true,
                ..Default::default()
            },
        )
        .unwrap();

    // `complete` maps to ready_for_code_review in this config
    let target = wf.verb_target("complete").unwrap();
    assert_eq!(target, "ready_for_code_review");
    let task = store
        .update_status(
            &wf,
            &task.key,
            StatusChange {
                new_status: target,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(task.status, "ready_for_code_review");
    assert!(task.completed_at.is_none(), "not a terminal status here");
}

#[test]
fn custom_graph_rejects_out_of_graph_jumps_without_force() {
    let dir = tempdir().unwrap();
    fs::write(SharkConfig::path(dir.path()), CUSTOM_CONFIG).unwrap();
    let config = SharkConfig::load(dir.path()).unwrap();
    let wf = config.workflow().unwrap();

    let db = Database::open_memory().unwrap();
    let store = Store::new(&db, dir.path());
    store
        .create_epic(
            &wf,
            NewEpic {
                title: "Platform".into(),
                ..Default::default()
            },
        )
        .unwrap();
    store
        .create_feature(
            &wf,
            "E01",
            NewFeature {
                title: "Pipeline".into(),
                ..Default::default()
            },
        )
        .unwrap();
    let task = store
        .create_task(
            &wf,
            "E01-F01",
            NewTask {
                title: "Wire it up".into(),
                ..Default::default()
            },
        )
        .unwrap();

    let err = store
        .update_status(
            &wf,
            &task.key,
            StatusChange {
                new_status: "shipped",
                ..Default::default()
            },
        )
        .unwrap_err();
    match err {
        SharkError::InvalidTransition { from, allowed, .. } => {
            assert_eq!(from, "backlog");
            assert!(allowed.contains("in_development"));
        }
        other => panic!("unexpected error {other:?}"),
    }

    // forced override succeeds and tags the row
    let task = store
        .update_status(
            &wf,
            &task.key,
            StatusChange {
                new_status: "shipped",
                forced: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(task.status, "shipped");
    assert!(task.completed_at.is_some());
    let history = store.list_history(task.id).unwrap();
    assert!(history.last().unwrap().forced);
}

#[test]
fn every_allowed_pair_in_a_custom_graph_is_accepted() {
    // Workflow totality at the store level: each graph edge succeeds from a
    // forced starting point; each non-edge fails and changes nothing.
    let dir = tempdir().unwrap();
    fs::write(SharkConfig::path(dir.path()), CUSTOM_CONFIG).unwrap();
    let config = SharkConfig::load(dir.path()).unwrap();
    let wf = config.workflow().unwrap();

    let db = Database::open_memory().unwrap();
    let store = Store::new(&db, Path::new("/project"));
    store
        .create_epic(
            &wf,
            NewEpic {
                title: "Platform".into(),
                ..Default::default()
            },
        )
        .unwrap();
    store
        .create_feature(
            &wf,
            "E01",
            NewFeature {
                title: "Pipeline".into(),
                ..Default::default()
            },
        )
        .unwrap();
    let task = store
        .create_task(
            &wf,
            "E01-F01",
            NewTask {
                title: "Probe".into(),
                ..Default::default()
            },
        )
        .unwrap();

    for from in wf.all_statuses() {
        for to in wf.all_statuses() {
            store
                .update_status(
                    &wf,
                    &task.key,
                    StatusChange {
                        new_status: from,
                        forced: true,
                        ..Default::default()
                    },
                )
                .unwrap();
            let result = store.update_status(
                &wf,
                &task.key,
                StatusChange {
                    new_status: to,
                    ..Default::default()
                },
            );
            if wf.can_transition(from, to) {
                assert!(result.is_ok(), "{from} -> {to} should be accepted");
            } else {
                assert!(result.is_err(), "{from} -> {to} should be rejected");
                assert_eq!(store.get_task_by_key(&task.key).unwrap().status, from);
            }
        }
    }
}
