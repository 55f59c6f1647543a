use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;

use shark::config::SharkConfig;
use shark::db::Database;
use shark::store::tasks::TaskPatch;
use shark::store::{StatusChange, Store};
use shark::sync::{self, SyncOptions, SyncStrategy};
use shark::workflow::Workflow;

fn touch(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn seeded_project(root: &Path) -> (Database, SharkConfig) {
    touch(
        root,
        "docs/plan/E01/epic.md",
        "---\nkey: E01\ntitle: Identity\n---\n# Identity\n",
    );
    touch(
        root,
        "docs/plan/E01/E01-F01/feature.md",
        "---\nkey: E01-F01\ntitle: OAuth\n---\n# OAuth\n",
    );
    touch(
        root,
        "docs/plan/E01/E01-F01/tasks/T-E01-F01-001-login.md",
        "---\nkey: T-E01-F01-001\ntitle: old\n---\n# Login\n",
    );
    (Database::open_memory().unwrap(), SharkConfig::default())
}

fn import(db: &Database, root: &Path, config: &mut SharkConfig) {
    let store = Store::new(db, root);
    let wf = Workflow::default();
    let options = SyncOptions {
        create_missing: true,
        ..Default::default()
    };
    let report = sync::sync(&store, &wf, config, &options).unwrap();
    assert_eq!(report.created.len(), 3);
}

#[test]
fn conflict_under_file_wins_takes_file_title_and_keeps_status() {
    // Scenario E, end to end: both sides diverge after the watermark.
    let dir = tempdir().unwrap();
    let (db, mut config) = seeded_project(dir.path());
    import(&db, dir.path(), &mut config);
    let store = Store::new(&db, dir.path());
    let wf = Workflow::default();

    // move the task into flight so status has something to lose
    store
        .update_status(
            &wf,
            "T-E01-F01-001",
            StatusChange {
                new_status: "in_progress",
                ..Default::default()
            },
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    store
        .update_task(
            "T-E01-F01-001",
            TaskPatch {
                title: Some("old".into()),
                ..Default::default()
            },
        )
        .unwrap();
    touch(
        dir.path(),
        "docs/plan/E01/E01-F01/tasks/T-E01-F01-001-login.md",
        "---\nkey: T-E01-F01-001\ntitle: new\nstatus: completed\n---\n# Login\n",
    );

    let before_mark = config.last_sync_time.unwrap();
    let options = SyncOptions {
        strategy: SyncStrategy::FileWins,
        create_missing: true,
        ..Default::default()
    };
    let report = sync::sync(&store, &wf, &mut config, &options).unwrap();

    assert_eq!(report.updated_db, vec!["T-E01-F01-001"]);
    assert_eq!(report.change_count(), 1);
    let task = store.get_task_by_key("T-E01-F01-001").unwrap();
    assert_eq!(task.title, "new");
    assert_eq!(task.status, "in_progress", "status never flows file -> db");
    assert!(config.last_sync_time.unwrap() > before_mark);

    // immediate rerun is a no-op
    std::thread::sleep(Duration::from_millis(20));
    let rerun = sync::sync(&store, &wf, &mut config, &options).unwrap();
    assert!(rerun.is_noop(), "rerun should change nothing: {rerun:?}");
}

#[test]
fn status_survives_every_strategy() {
    for strategy in [
        SyncStrategy::FileWins,
        SyncStrategy::DatabaseWins,
        SyncStrategy::NewerWins,
        SyncStrategy::Manual,
    ] {
        let dir = tempdir().unwrap();
        let (db, mut config) = seeded_project(dir.path());
        import(&db, dir.path(), &mut config);
        let store = Store::new(&db, dir.path());
        let wf = Workflow::default();
        store
            .update_status(
                &wf,
                "T-E01-F01-001",
                StatusChange {
                    new_status: "in_progress",
                    ..Default::default()
                },
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        touch(
            dir.path(),
            "docs/plan/E01/E01-F01/tasks/T-E01-F01-001-login.md",
            "---\nkey: T-E01-F01-001\ntitle: edited\nstatus: completed\n---\n",
        );

        let options = SyncOptions {
            strategy,
            create_missing: true,
            ..Default::default()
        };
        sync::sync(&store, &wf, &mut config, &options).unwrap();
        let task = store.get_task_by_key("T-E01-F01-001").unwrap();
        assert_eq!(
            task.status, "in_progress",
            "{strategy:?} must not move status"
        );
    }
}

#[test]
fn newer_wins_follows_the_younger_side() {
    let dir = tempdir().unwrap();
    let (db, mut config) = seeded_project(dir.path());
    import(&db, dir.path(), &mut config);
    let store = Store::new(&db, dir.path());
    let wf = Workflow::default();

    // file first, then the database write: db is younger
    std::thread::sleep(Duration::from_millis(20));
    touch(
        dir.path(),
        "docs/plan/E01/E01-F01/tasks/T-E01-F01-001-login.md",
        "---\nkey: T-E01-F01-001\ntitle: file side\n---\nbody\n",
    );
    std::thread::sleep(Duration::from_millis(1100));
    store
        .update_task(
            "T-E01-F01-001",
            TaskPatch {
                title: Some("db side".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let options = SyncOptions {
        strategy: SyncStrategy::NewerWins,
        create_missing: true,
        ..Default::default()
    };
    let report = sync::sync(&store, &wf, &mut config, &options).unwrap();
    assert_eq!(report.updated_files, vec!["T-E01-F01-001"]);
    let text = fs::read_to_string(
        dir.path()
            .join("docs/plan/E01/E01-F01/tasks/T-E01-F01-001-login.md"),
    )
    .unwrap();
    assert!(text.contains("title: db side"));
    assert!(text.contains("body"));
}

#[test]
fn round_trip_of_an_untouched_file_is_byte_identical() {
    // The writer only rewrites files it changes; an untouched entity file
    // must survive a database-wins sync byte for byte.
    let dir = tempdir().unwrap();
    let (db, mut config) = seeded_project(dir.path());
    import(&db, dir.path(), &mut config);
    let store = Store::new(&db, dir.path());
    let wf = Workflow::default();

    let path = dir.path().join("docs/plan/E01/E01-F01/feature.md");
    let before = fs::read_to_string(&path).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    let options = SyncOptions {
        strategy: SyncStrategy::DatabaseWins,
        create_missing: true,
        ..Default::default()
    };
    let report = sync::sync(&store, &wf, &mut config, &options).unwrap();
    assert!(report.is_noop());
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn progress_is_refreshed_for_features_touched_by_cleanup() {
    let dir = tempdir().unwrap();
    let (db, mut config) = seeded_project(dir.path());
    import(&db, dir.path(), &mut config);
    let store = Store::new(&db, dir.path());
    let wf = Workflow::default();

    // second task, completed, so the feature sits at 50%
    touch(
        dir.path(),
        "docs/plan/E01/E01-F01/tasks/T-E01-F01-002-extra.md",
        "---\nkey: T-E01-F01-002\ntitle: extra\n---\n",
    );
    std::thread::sleep(Duration::from_millis(20));
    let options = SyncOptions {
        create_missing: true,
        ..Default::default()
    };
    sync::sync(&store, &wf, &mut config, &options).unwrap();
    store
        .update_status(
            &wf,
            "T-E01-F01-002",
            StatusChange {
                new_status: "completed",
                forced: true,
                ..Default::default()
            },
        )
        .unwrap();
    store
        .recompute_feature_progress(&wf, store.get_feature_by_key("E01-F01").unwrap().id)
        .unwrap();
    assert_eq!(
        store.get_feature_by_key("E01-F01").unwrap().progress_pct,
        50.0
    );

    // deleting the completed task's file and cleaning up leaves 1 open task
    fs::remove_file(
        dir.path()
            .join("docs/plan/E01/E01-F01/tasks/T-E01-F01-002-extra.md"),
    )
    .unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let options = SyncOptions {
        create_missing: true,
        cleanup: true,
        ..Default::default()
    };
    let report = sync::sync(&store, &wf, &mut config, &options).unwrap();
    assert_eq!(report.deleted, vec!["T-E01-F01-002"]);
    assert_eq!(
        store.get_feature_by_key("E01-F01").unwrap().progress_pct,
        0.0
    );
}
