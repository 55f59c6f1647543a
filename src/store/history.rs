use rusqlite::params;

use crate::error::Result;
use crate::model::TaskHistoryEntry;
use crate::store::{Store, parse_dt};

impl Store<'_> {
    /// Audit trail for one task, oldest first. Rows are totally ordered by
    /// timestamp then id.
    pub fn list_history(&self, task_id: i64) -> Result<Vec<TaskHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, old_status, new_status, agent, notes, rejection_reason,
                    forced, timestamp
             FROM task_history WHERE task_id = ?1
             ORDER BY timestamp, id",
        )?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(TaskHistoryEntry {
                    id: row.get("id")?,
                    task_id: row.get("task_id")?,
                    old_status: row.get("old_status")?,
                    new_status: row.get("new_status")?,
                    agent: row.get("agent")?,
                    notes: row.get("notes")?,
                    rejection_reason: row.get("rejection_reason")?,
                    forced: row.get("forced")?,
                    timestamp: parse_dt(&row.get::<_, String>("timestamp")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_history(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM task_history", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::StatusChange;
    use crate::store::testutil::{memory_db, seed_feature_with_tasks, store, workflow};

    #[test]
    fn history_is_ordered_and_complete() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let key = &tasks[0].key;
        for status in ["in_progress", "ready_for_review", "completed"] {
            store
                .update_status(
                    &wf,
                    key,
                    StatusChange {
                        new_status: status,
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        let history = store.list_history(tasks[0].id).unwrap();
        let transitions: Vec<(Option<&str>, &str)> = history
            .iter()
            .map(|h| (h.old_status.as_deref(), h.new_status.as_str()))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (None, "todo"),
                (Some("todo"), "in_progress"),
                (Some("in_progress"), "ready_for_review"),
                (Some("ready_for_review"), "completed"),
            ]
        );
        for pair in history.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
            assert!(pair[0].id < pair[1].id);
        }
    }

    #[test]
    fn cascade_delete_removes_history() {
        let db = memory_db();
        let store = store(&db);
        let (epic, _f, _tasks) = seed_feature_with_tasks(&store, 3);
        assert_eq!(store.count_history().unwrap(), 3);
        store.delete_epic(&epic.key).unwrap();
        assert_eq!(store.count_history().unwrap(), 0);
    }
}
