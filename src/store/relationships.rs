use std::collections::HashSet;

use chrono::Utc;
use rusqlite::params;

use crate::error::{Result, SharkError};
use crate::model::{RelationKind, TaskRelationship};
use crate::store::{Store, parse_dt};

/// Upper bound for the cycle-check walk; dependency chains deeper than this
/// indicate corrupted data.
const MAX_DEPTH: usize = 1024;

impl Store<'_> {
    /// Create a directed relationship edge. `depends_on` edges are rejected
    /// when they would close a cycle, checked with a bounded depth-first
    /// search at insert time.
    pub fn add_relationship(
        &self,
        from_key: &str,
        to_key: &str,
        kind: RelationKind,
    ) -> Result<TaskRelationship> {
        let tx = self.conn.unchecked_transaction()?;
        let from = self.get_task_by_key(from_key)?;
        let to = self.get_task_by_key(to_key)?;
        if from.id == to.id {
            return Err(SharkError::CycleDetected(from.key));
        }
        if kind == RelationKind::DependsOn && self.depends_on_reaches(to.id, from.id)? {
            return Err(SharkError::CycleDetected(from.key));
        }

        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO task_relationships (from_task_id, to_task_id, kind, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![from.id, to.id, kind.to_string(), now.to_rfc3339()],
        )?;
        let rel = TaskRelationship {
            id: self.conn.last_insert_rowid(),
            from_task_id: from.id,
            to_task_id: to.id,
            kind,
            created_at: now,
        };
        tx.commit()?;
        Ok(rel)
    }

    /// DFS over depends_on edges: is `target` reachable from `start`?
    fn depends_on_reaches(&self, start: i64, target: i64) -> Result<bool> {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        let mut visited = 0usize;
        while let Some(current) = stack.pop() {
            if current == target {
                return Ok(true);
            }
            if !seen.insert(current) {
                continue;
            }
            visited += 1;
            if visited > MAX_DEPTH {
                return Err(SharkError::Integrity(
                    "dependency graph exceeds the traversal bound".into(),
                ));
            }
            let mut stmt = self.conn.prepare(
                "SELECT to_task_id FROM task_relationships
                 WHERE from_task_id = ?1 AND kind = 'depends_on'",
            )?;
            let nexts = stmt
                .query_map(params![current], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            stack.extend(nexts);
        }
        Ok(false)
    }

    pub fn remove_relationship(
        &self,
        from_key: &str,
        to_key: &str,
        kind: RelationKind,
    ) -> Result<()> {
        let from = self.get_task_by_key(from_key)?;
        let to = self.get_task_by_key(to_key)?;
        self.conn.execute(
            "DELETE FROM task_relationships
             WHERE from_task_id = ?1 AND to_task_id = ?2 AND kind = ?3",
            params![from.id, to.id, kind.to_string()],
        )?;
        Ok(())
    }

    /// Edges touching a task, outgoing first.
    pub fn list_relationships(&self, task_id: i64) -> Result<Vec<TaskRelationship>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_task_id, to_task_id, kind, created_at FROM task_relationships
             WHERE from_task_id = ?1 OR to_task_id = ?1
             ORDER BY from_task_id = ?1 DESC, id",
        )?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok((
                    row.get::<_, i64>("id")?,
                    row.get::<_, i64>("from_task_id")?,
                    row.get::<_, i64>("to_task_id")?,
                    row.get::<_, String>("kind")?,
                    row.get::<_, String>("created_at")?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, from_task_id, to_task_id, kind, created_at)| {
                Ok(TaskRelationship {
                    id,
                    from_task_id,
                    to_task_id,
                    kind: RelationKind::parse(&kind)?,
                    created_at: parse_dt(&created_at),
                })
            })
            .collect()
    }

    /// Keys of unfinished tasks this task depends on.
    pub fn unmet_dependencies(
        &self,
        workflow: &crate::workflow::Workflow,
        task_id: i64,
    ) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.key, t.status FROM task_relationships r
             JOIN tasks t ON r.to_task_id = t.id
             WHERE r.from_task_id = ?1 AND r.kind = 'depends_on'
             ORDER BY t.key",
        )?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter(|(_, status)| !workflow.is_complete(status))
            .map(|(key, _)| key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::{memory_db, seed_feature_with_tasks, store, workflow};

    #[test]
    fn add_and_list_relationships() {
        let db = memory_db();
        let store = store(&db);
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 3);
        store
            .add_relationship(&tasks[1].key, &tasks[0].key, RelationKind::DependsOn)
            .unwrap();
        store
            .add_relationship(&tasks[1].key, &tasks[2].key, RelationKind::Related)
            .unwrap();
        let rels = store.list_relationships(tasks[1].id).unwrap();
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].kind, RelationKind::DependsOn);
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let db = memory_db();
        let store = store(&db);
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 2);
        store
            .add_relationship(&tasks[0].key, &tasks[1].key, RelationKind::DependsOn)
            .unwrap();
        let err = store
            .add_relationship(&tasks[1].key, &tasks[0].key, RelationKind::DependsOn)
            .unwrap_err();
        assert!(matches!(err, SharkError::CycleDetected(_)));
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let db = memory_db();
        let store = store(&db);
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 3);
        store
            .add_relationship(&tasks[0].key, &tasks[1].key, RelationKind::DependsOn)
            .unwrap();
        store
            .add_relationship(&tasks[1].key, &tasks[2].key, RelationKind::DependsOn)
            .unwrap();
        let err = store
            .add_relationship(&tasks[2].key, &tasks[0].key, RelationKind::DependsOn)
            .unwrap_err();
        assert!(matches!(err, SharkError::CycleDetected(_)));
    }

    #[test]
    fn self_edge_is_rejected() {
        let db = memory_db();
        let store = store(&db);
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let err = store
            .add_relationship(&tasks[0].key, &tasks[0].key, RelationKind::Blocks)
            .unwrap_err();
        assert!(matches!(err, SharkError::CycleDetected(_)));
    }

    #[test]
    fn blocks_edges_do_not_trip_the_cycle_check() {
        let db = memory_db();
        let store = store(&db);
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 2);
        store
            .add_relationship(&tasks[0].key, &tasks[1].key, RelationKind::Blocks)
            .unwrap();
        store
            .add_relationship(&tasks[1].key, &tasks[0].key, RelationKind::Blocks)
            .unwrap();
    }

    #[test]
    fn unmet_dependencies_track_workflow_terminal_set() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 2);
        store
            .add_relationship(&tasks[1].key, &tasks[0].key, RelationKind::DependsOn)
            .unwrap();
        assert_eq!(
            store.unmet_dependencies(&wf, tasks[1].id).unwrap(),
            vec![tasks[0].key.clone()]
        );
        store
            .update_status(
                &wf,
                &tasks[0].key,
                crate::store::StatusChange {
                    new_status: "completed",
                    forced: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(store.unmet_dependencies(&wf, tasks[1].id).unwrap().is_empty());
    }
}
