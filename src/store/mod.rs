pub mod aux;
pub mod epics;
pub mod features;
pub mod history;
pub mod relationships;
pub mod tasks;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use crate::db::Database;
use crate::model::{Epic, Feature, Task};

pub use tasks::{BulkCompleteReport, CompleteScope, ProblemTask, StatusChange, TaskFilter};

/// Repository layer over the shared connection. One `Store` per command;
/// every multi-row write runs inside a single transaction on the
/// underlying connection.
pub struct Store<'a> {
    conn: &'a Connection,
    root: PathBuf,
}

impl<'a> Store<'a> {
    pub fn new(db: &'a Database, project_root: &Path) -> Self {
        Self {
            conn: db.conn(),
            root: project_root.to_path_buf(),
        }
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_dt_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_dt(&v))
}

pub(crate) fn epic_from_row(row: &Row<'_>) -> rusqlite::Result<Epic> {
    Ok(Epic {
        id: row.get("id")?,
        key: row.get("key")?,
        slug: row.get("slug")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        priority: row.get("priority")?,
        archived: row.get("archived")?,
        custom_folder_path: row.get("custom_folder_path")?,
        file_path: row.get("file_path")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?),
        updated_at: parse_dt(&row.get::<_, String>("updated_at")?),
    })
}

pub(crate) fn feature_from_row(row: &Row<'_>) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get("id")?,
        epic_id: row.get("epic_id")?,
        key: row.get("key")?,
        slug: row.get("slug")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        priority: row.get("priority")?,
        progress_pct: row.get("progress_pct")?,
        execution_order: row.get("execution_order")?,
        archived: row.get("archived")?,
        custom_folder_path: row.get("custom_folder_path")?,
        file_path: row.get("file_path")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?),
        updated_at: parse_dt(&row.get::<_, String>("updated_at")?),
    })
}

pub(crate) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        feature_id: row.get("feature_id")?,
        key: row.get("key")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        priority: row.get("priority")?,
        agent_type: row.get("agent_type")?,
        assigned_agent: row.get("assigned_agent")?,
        execution_order: row.get("execution_order")?,
        rejection_count: row.get("rejection_count")?,
        blocked_reason: row.get("blocked_reason")?,
        completed_at: parse_dt_opt(row.get("completed_at")?),
        archived: row.get("archived")?,
        file_path: row.get("file_path")?,
        context_data: row.get("context_data")?,
        files_changed: row.get("files_changed")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?),
        updated_at: parse_dt(&row.get::<_, String>("updated_at")?),
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::db::Database;
    use crate::workflow::Workflow;

    pub fn memory_db() -> Database {
        Database::open_memory().expect("in-memory database")
    }

    pub fn store(db: &Database) -> Store<'_> {
        Store::new(db, Path::new("/project"))
    }

    pub fn workflow() -> Workflow {
        Workflow::default()
    }

    /// Epic -> feature -> n tasks scaffold used across store tests.
    pub fn seed_feature_with_tasks(store: &Store<'_>, n: usize) -> (Epic, Feature, Vec<Task>) {
        let wf = workflow();
        let epic = store
            .create_epic(
                &wf,
                epics::NewEpic {
                    title: "Identity".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let feature = store
            .create_feature(
                &wf,
                &epic.key,
                features::NewFeature {
                    title: "OAuth".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut tasks = Vec::new();
        for i in 0..n {
            tasks.push(
                store
                    .create_task(
                        &wf,
                        &feature.key,
                        tasks::NewTask {
                            title: format!("task-{i}"),
                            ..Default::default()
                        },
                    )
                    .unwrap(),
            );
        }
        (epic, feature, tasks)
    }
}
