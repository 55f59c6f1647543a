use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Result, SharkError};
use crate::keys;
use crate::model::{self, Task};
use crate::paths;
use crate::store::{Store, task_from_row};
use crate::workflow::Workflow;

#[derive(Debug, Default, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub agent_type: Option<String>,
    pub execution_order: Option<i64>,
    pub explicit_filename: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<i64>,
    pub agent_type: Option<Option<String>>,
    pub assigned_agent: Option<Option<String>>,
    pub execution_order: Option<Option<i64>>,
    pub context_data: Option<Option<String>>,
    pub files_changed: Option<Option<String>>,
    pub archived: Option<bool>,
    pub file_path: Option<String>,
}

/// One status write. The repository consults the workflow engine unless
/// `forced` is set; either way the history row lands in the same
/// transaction as the status update.
#[derive(Debug, Default, Clone)]
pub struct StatusChange<'a> {
    pub new_status: &'a str,
    pub agent: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub rejection_reason: Option<&'a str>,
    pub blocked_reason: Option<&'a str>,
    /// Also record this agent as the task owner.
    pub assign_agent: Option<&'a str>,
    pub forced: bool,
}

#[derive(Debug, Clone)]
pub enum CompleteScope {
    Epic(String),
    Feature(String),
}

impl CompleteScope {
    pub fn key(&self) -> &str {
        match self {
            Self::Epic(k) | Self::Feature(k) => k,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProblemTask {
    pub key: String,
    pub title: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureBreakdown {
    pub feature_key: String,
    pub breakdown: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCompleteReport {
    pub scope: String,
    pub total: usize,
    pub breakdown: BTreeMap<String, usize>,
    pub per_feature: Vec<FeatureBreakdown>,
    /// Offending tasks, blocked first, capped at 15.
    pub most_problematic: Vec<ProblemTask>,
    pub affected: Vec<String>,
    pub force_completed: bool,
    pub completed: bool,
}

const MOST_PROBLEMATIC_CAP: usize = 15;

impl Store<'_> {
    pub fn create_task(
        &self,
        workflow: &Workflow,
        feature_key: &str,
        new: NewTask,
    ) -> Result<Task> {
        model::validate_title(&new.title)?;
        if let Some(p) = new.priority {
            model::validate_priority(p)?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let feature = self.get_feature_by_key(feature_key)?;
        let epic = self.get_epic_by_id(feature.epic_id)?;
        let task = self.create_task_in_tx(workflow, &epic, &feature, new)?;
        tx.commit()?;
        Ok(task)
    }

    /// Insert a task plus its creation history row. The caller owns the
    /// transaction; used by `create_task` and by idea promotion.
    pub(crate) fn create_task_in_tx(
        &self,
        workflow: &Workflow,
        epic: &crate::model::Epic,
        feature: &crate::model::Feature,
        new: NewTask,
    ) -> Result<Task> {
        let existing = self.all_task_keys()?;
        let key = keys::next_task_key(&feature.key, existing.iter().map(String::as_str));
        let now = Utc::now();

        let mut task = Task {
            id: 0,
            feature_id: feature.id,
            key,
            title: new.title,
            description: new.description,
            status: workflow.initial_status().to_string(),
            priority: new.priority.unwrap_or(5),
            agent_type: new.agent_type,
            assigned_agent: None,
            execution_order: new.execution_order,
            rejection_count: 0,
            blocked_reason: None,
            completed_at: None,
            archived: false,
            file_path: None,
            context_data: None,
            files_changed: None,
            created_at: now,
            updated_at: now,
        };
        let file_path = paths::task_file_path(
            &self.root,
            epic,
            feature,
            &task.key,
            &task.title,
            new.explicit_filename.as_deref(),
        )?;
        task.file_path = Some(file_path.to_string_lossy().into_owned());

        self.conn.execute(
            "INSERT INTO tasks (feature_id, key, title, description, status, priority,
                                agent_type, assigned_agent, execution_order, rejection_count,
                                archived, file_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, 0, 0, ?9, ?10, ?10)",
            params![
                task.feature_id,
                task.key,
                task.title,
                task.description,
                task.status,
                task.priority,
                task.agent_type,
                task.execution_order,
                task.file_path,
                now.to_rfc3339(),
            ],
        )?;
        task.id = self.conn.last_insert_rowid();
        self.insert_history_row(
            task.id,
            None,
            &task.status,
            new.agent.as_deref(),
            None,
            None,
            false,
            now,
        )?;
        Ok(task)
    }

    pub(crate) fn insert_task_from_file(&self, task: &Task) -> Result<i64> {
        keys::parse_task_key(&task.key)?;
        if self.find_task_by_key(&task.key)?.is_some() {
            return Err(SharkError::KeyConflict(task.key.clone()));
        }
        self.conn.execute(
            "INSERT INTO tasks (feature_id, key, title, description, status, priority,
                                agent_type, assigned_agent, execution_order, rejection_count,
                                blocked_reason, completed_at, archived, file_path,
                                context_data, files_changed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                task.feature_id,
                task.key,
                task.title,
                task.description,
                task.status,
                task.priority,
                task.agent_type,
                task.assigned_agent,
                task.execution_order,
                task.rejection_count,
                task.blocked_reason,
                task.completed_at.map(|t| t.to_rfc3339()),
                task.archived,
                task.file_path,
                task.context_data,
                task.files_changed,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.insert_history_row(
            id,
            None,
            &task.status,
            None,
            Some("created from file"),
            None,
            false,
            task.created_at,
        )?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_history_row(
        &self,
        task_id: i64,
        old_status: Option<&str>,
        new_status: &str,
        agent: Option<&str>,
        notes: Option<&str>,
        rejection_reason: Option<&str>,
        forced: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO task_history (task_id, old_status, new_status, agent, notes,
                                       rejection_reason, forced, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task_id,
                old_status,
                new_status,
                agent,
                notes,
                rejection_reason,
                forced,
                timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn all_task_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM tasks")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    pub fn find_task_by_key(&self, key: &str) -> Result<Option<Task>> {
        self.conn
            .query_row(
                "SELECT * FROM tasks WHERE key = ?1",
                params![key],
                task_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_task_by_key(&self, key: &str) -> Result<Task> {
        self.find_task_by_key(key)?
            .ok_or_else(|| SharkError::TaskNotFound(key.to_string()))
    }

    pub fn get_task_by_id(&self, id: i64) -> Result<Task> {
        self.conn
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1",
                params![id],
                task_from_row,
            )
            .optional()?
            .ok_or_else(|| SharkError::TaskNotFound(id.to_string()))
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = String::from(
            "SELECT t.* FROM tasks t
             JOIN features f ON t.feature_id = f.id
             JOIN epics e ON f.epic_id = e.id
             WHERE (? OR t.archived = 0)",
        );
        let mut values: Vec<rusqlite::types::Value> = vec![filter.include_archived.into()];
        if let Some(status) = &filter.status {
            sql.push_str(" AND t.status = ?");
            values.push(status.clone().into());
        }
        if let Some(epic) = &filter.epic_key {
            sql.push_str(" AND e.key = ?");
            values.push(epic.clone().into());
        }
        if let Some(feature) = &filter.feature_key {
            sql.push_str(" AND f.key = ?");
            values.push(feature.clone().into());
        }
        if let Some(agent_type) = &filter.agent_type {
            sql.push_str(" AND t.agent_type = ?");
            values.push(agent_type.clone().into());
        }
        if let Some(agent) = &filter.assigned_agent {
            sql.push_str(" AND t.assigned_agent = ?");
            values.push(agent.clone().into());
        }
        if let Some(min) = filter.execution_order_min {
            sql.push_str(" AND t.execution_order >= ?");
            values.push(min.into());
        }
        if let Some(max) = filter.execution_order_max {
            sql.push_str(" AND t.execution_order <= ?");
            values.push(max.into());
        }
        if let Some(after) = filter.completed_after {
            sql.push_str(" AND t.completed_at >= ?");
            values.push(after.to_rfc3339().into());
        }
        if let Some(before) = filter.completed_before {
            sql.push_str(" AND t.completed_at <= ?");
            values.push(before.to_rfc3339().into());
        }
        sql.push_str(" ORDER BY f.key, t.execution_order IS NULL, t.execution_order, t.key");

        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(rusqlite::params_from_iter(values), task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    pub fn update_task(&self, key: &str, patch: TaskPatch) -> Result<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let mut task = self.get_task_by_key(key)?;

        if let Some(title) = patch.title {
            model::validate_title(&title)?;
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            model::validate_priority(priority)?;
            task.priority = priority;
        }
        if let Some(agent_type) = patch.agent_type {
            task.agent_type = agent_type;
        }
        if let Some(assigned) = patch.assigned_agent {
            task.assigned_agent = assigned;
        }
        if let Some(order) = patch.execution_order {
            task.execution_order = order;
        }
        if let Some(context) = patch.context_data {
            if let Some(payload) = &context {
                model::validate_json_payload("context_data", payload)?;
            }
            task.context_data = context;
        }
        if let Some(files) = patch.files_changed {
            if let Some(payload) = &files {
                model::validate_json_payload("files_changed", payload)?;
            }
            task.files_changed = files;
        }
        if let Some(archived) = patch.archived {
            task.archived = archived;
        }
        if let Some(file_path) = patch.file_path {
            task.file_path = Some(file_path);
        }
        task.updated_at = Utc::now();

        tx.execute(
            "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, agent_type = ?4,
                              assigned_agent = ?5, execution_order = ?6, context_data = ?7,
                              files_changed = ?8, archived = ?9, file_path = ?10,
                              updated_at = ?11
             WHERE id = ?12",
            params![
                task.title,
                task.description,
                task.priority,
                task.agent_type,
                task.assigned_agent,
                task.execution_order,
                task.context_data,
                task.files_changed,
                task.archived,
                task.file_path,
                task.updated_at.to_rfc3339(),
                task.id,
            ],
        )?;
        tx.commit()?;
        Ok(task)
    }

    pub fn delete_task(&self, key: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let task = self.get_task_by_key(key)?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![task.id])?;
        tx.commit()?;
        Ok(())
    }

    /// Atomic status write: read current status, consult the workflow
    /// (skipped when forced), update the row and append the history row in
    /// one transaction. Open work sessions are closed on entering a
    /// terminal status.
    pub fn update_status(
        &self,
        workflow: &Workflow,
        key: &str,
        change: StatusChange<'_>,
    ) -> Result<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let mut task = self.get_task_by_key(key)?;
        let old_status = task.status.clone();

        if change.forced {
            workflow.validate_status(change.new_status)?;
        } else {
            workflow.validate_transition(&old_status, change.new_status)?;
        }

        let now = Utc::now();
        task.status = change.new_status.to_string();
        task.updated_at = now;
        task.completed_at = workflow.is_complete(change.new_status).then_some(now);
        task.blocked_reason = change.blocked_reason.map(str::to_string);
        if let Some(agent) = change.assign_agent {
            task.assigned_agent = Some(agent.to_string());
        }
        if change.rejection_reason.is_some() {
            task.rejection_count += 1;
        }

        tx.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2, completed_at = ?3,
                              blocked_reason = ?4, assigned_agent = ?5, rejection_count = ?6
             WHERE id = ?7",
            params![
                task.status,
                task.updated_at.to_rfc3339(),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.blocked_reason,
                task.assigned_agent,
                task.rejection_count,
                task.id,
            ],
        )?;
        self.insert_history_row(
            task.id,
            Some(&old_status),
            &task.status,
            change.agent,
            change.notes,
            change.rejection_reason,
            change.forced,
            now,
        )?;
        if workflow.is_complete(&task.status) {
            tx.execute(
                "UPDATE work_sessions SET ended_at = ?1 WHERE task_id = ?2 AND ended_at IS NULL",
                params![now.to_rfc3339(), task.id],
            )?;
        }
        tx.commit()?;
        debug!(key, from = %old_status, to = %task.status, forced = change.forced, "status updated");
        Ok(task)
    }

    /// Complete every non-terminal task in the scope.
    ///
    /// Without `force` the operation refuses when any task cannot reach a
    /// terminal status in one legal step; the returned report carries the
    /// breakdowns and the offending tasks either way. With `force`,
    /// out-of-graph jumps are recorded as forced history rows.
    pub fn bulk_complete(
        &self,
        workflow: &Workflow,
        scope: CompleteScope,
        agent: Option<&str>,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<BulkCompleteReport> {
        let filter = match &scope {
            CompleteScope::Epic(key) => {
                self.get_epic_by_key(key)?;
                TaskFilter {
                    epic_key: Some(key.clone()),
                    ..Default::default()
                }
            }
            CompleteScope::Feature(key) => {
                self.get_feature_by_key(key)?;
                TaskFilter {
                    feature_key: Some(key.clone()),
                    ..Default::default()
                }
            }
        };
        let tasks = self.list_tasks(&filter)?;

        let mut breakdown: BTreeMap<String, usize> = BTreeMap::new();
        let mut per_feature_map: BTreeMap<i64, BTreeMap<String, usize>> = BTreeMap::new();
        for task in &tasks {
            *breakdown.entry(task.status.clone()).or_default() += 1;
            *per_feature_map
                .entry(task.feature_id)
                .or_default()
                .entry(task.status.clone())
                .or_default() += 1;
        }
        let mut per_feature = Vec::new();
        for (feature_id, counts) in &per_feature_map {
            per_feature.push(FeatureBreakdown {
                feature_key: self.get_feature_by_id(*feature_id)?.key,
                breakdown: counts.clone(),
            });
        }

        let non_terminal: Vec<&Task> = tasks
            .iter()
            .filter(|t| !workflow.is_complete(&t.status))
            .collect();
        let mut problematic: Vec<&Task> = non_terminal
            .iter()
            .copied()
            .filter(|t| !workflow.directly_completable(&t.status))
            .collect();
        // Blocked tasks first, then work in flight, then untouched tasks.
        problematic.sort_by_key(|t| {
            let rank = if t.blocked_reason.is_some() {
                0
            } else if !workflow.is_start(&t.status) {
                1
            } else {
                2
            };
            (rank, t.key.clone())
        });
        let most_problematic: Vec<ProblemTask> = problematic
            .iter()
            .take(MOST_PROBLEMATIC_CAP)
            .map(|t| ProblemTask {
                key: t.key.clone(),
                title: t.title.clone(),
                status: t.status.clone(),
                blocked_reason: t.blocked_reason.clone(),
            })
            .collect();

        let mut report = BulkCompleteReport {
            scope: scope.key().to_string(),
            total: tasks.len(),
            breakdown,
            per_feature,
            most_problematic,
            affected: Vec::new(),
            force_completed: force,
            completed: false,
        };

        if !force && !problematic.is_empty() {
            return Ok(report);
        }

        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now();
        for task in &non_terminal {
            cancel.checkpoint("bulk complete")?;
            // Tasks one legal step from a terminal status finish through
            // the graph; only the rest need a forced jump to the primary
            // terminal status.
            let (target, forced_row) = match workflow.first_reachable_complete(&task.status) {
                Some(reachable) => (reachable.to_string(), false),
                None => (workflow.primary_complete_status().to_string(), true),
            };
            tx.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2, completed_at = ?2,
                                  blocked_reason = NULL
                 WHERE id = ?3",
                params![target, now.to_rfc3339(), task.id],
            )?;
            self.insert_history_row(
                task.id,
                Some(&task.status),
                &target,
                agent,
                None,
                None,
                forced_row,
                now,
            )?;
            tx.execute(
                "UPDATE work_sessions SET ended_at = ?1 WHERE task_id = ?2 AND ended_at IS NULL",
                params![now.to_rfc3339(), task.id],
            )?;
            report.affected.push(task.key.clone());
        }
        for feature_id in per_feature_map.keys() {
            self.recompute_feature_progress(workflow, *feature_id)?;
        }
        tx.commit()?;
        report.completed = true;
        Ok(report)
    }

    /// Store the terminal-task ratio on the feature row. Runs inside the
    /// caller's transaction when one is open.
    pub fn recompute_feature_progress(&self, workflow: &Workflow, feature_id: i64) -> Result<f64> {
        let breakdown = self.get_status_breakdown(feature_id)?;
        let total: i64 = breakdown.values().sum();
        let done: i64 = breakdown
            .iter()
            .filter(|(status, _)| workflow.is_complete(status))
            .map(|(_, count)| *count)
            .sum();
        let pct = if total == 0 {
            0.0
        } else {
            100.0 * done as f64 / total as f64
        };
        self.set_feature_progress(feature_id, pct)?;
        Ok(pct)
    }
}

#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub epic_key: Option<String>,
    pub feature_key: Option<String>,
    pub agent_type: Option<String>,
    pub assigned_agent: Option<String>,
    pub execution_order_min: Option<i64>,
    pub execution_order_max: Option<i64>,
    pub include_archived: bool,
    pub completed_after: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::{memory_db, seed_feature_with_tasks, store, workflow};

    fn change(new_status: &str) -> StatusChange<'_> {
        StatusChange {
            new_status,
            ..Default::default()
        }
    }

    #[test]
    fn create_allocates_keys_and_history() {
        let db = memory_db();
        let store = store(&db);
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 2);
        assert_eq!(tasks[0].key, "T-E01-F01-001");
        assert_eq!(tasks[1].key, "T-E01-F01-002");
        assert_eq!(tasks[0].status, "todo");
        let history = store.list_history(tasks[0].id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, None);
        assert_eq!(history[0].new_status, "todo");
    }

    #[test]
    fn key_gaps_are_preserved() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, feature, tasks) = seed_feature_with_tasks(&store, 2);
        store.delete_task(&tasks[0].key).unwrap();
        let t3 = store
            .create_task(
                &wf,
                &feature.key,
                NewTask {
                    title: "third".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(t3.key, "T-E01-F01-003");
    }

    #[test]
    fn update_status_writes_history_atomically() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let key = &tasks[0].key;

        let task = store
            .update_status(
                &wf,
                key,
                StatusChange {
                    new_status: "in_progress",
                    agent: Some("agent-1"),
                    assign_agent: Some("agent-1"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(task.status, "in_progress");
        assert_eq!(task.assigned_agent.as_deref(), Some("agent-1"));

        let history = store.list_history(task.id).unwrap();
        assert_eq!(history.len(), 2);
        let last = history.last().unwrap();
        assert_eq!(last.old_status.as_deref(), Some("todo"));
        assert_eq!(last.new_status, "in_progress");
        assert_eq!(last.agent.as_deref(), Some("agent-1"));
        assert!(!last.forced);
        assert!(last.timestamp >= task.created_at);
    }

    #[test]
    fn illegal_transition_leaves_task_and_history_untouched() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let key = &tasks[0].key;

        let err = store.update_status(&wf, key, change("completed")).unwrap_err();
        assert!(matches!(err, SharkError::InvalidTransition { .. }));

        let task = store.get_task_by_key(key).unwrap();
        assert_eq!(task.status, "todo");
        assert_eq!(store.list_history(task.id).unwrap().len(), 1);
    }

    #[test]
    fn forced_transition_succeeds_and_is_tagged() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let key = &tasks[0].key;

        let task = store
            .update_status(
                &wf,
                key,
                StatusChange {
                    new_status: "completed",
                    forced: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(task.status, "completed");
        assert!(task.completed_at.is_some());
        let history = store.list_history(task.id).unwrap();
        assert!(history.last().unwrap().forced);
    }

    #[test]
    fn forced_transition_still_requires_known_status() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let err = store
            .update_status(
                &wf,
                &tasks[0].key,
                StatusChange {
                    new_status: "no_such_status",
                    forced: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SharkError::InvalidStatus { .. }));
    }

    #[test]
    fn blocked_reason_is_set_and_cleared() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let key = &tasks[0].key;

        let task = store
            .update_status(
                &wf,
                key,
                StatusChange {
                    new_status: "blocked",
                    blocked_reason: Some("waiting for API spec"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(task.blocked_reason.as_deref(), Some("waiting for API spec"));

        let task = store.update_status(&wf, key, change("todo")).unwrap();
        assert_eq!(task.blocked_reason, None);
    }

    #[test]
    fn list_tasks_filters_compose() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, feature, tasks) = seed_feature_with_tasks(&store, 3);
        store
            .update_task(
                &tasks[0].key,
                TaskPatch {
                    agent_type: Some(Some("backend".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update_status(
                &wf,
                &tasks[1].key,
                StatusChange {
                    new_status: "in_progress",
                    assign_agent: Some("agent-2"),
                    ..Default::default()
                },
            )
            .unwrap();

        let by_status = store
            .list_tasks(&TaskFilter {
                status: Some("in_progress".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].key, tasks[1].key);

        let by_agent_type = store
            .list_tasks(&TaskFilter {
                feature_key: Some(feature.key.clone()),
                agent_type: Some("backend".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_agent_type.len(), 1);

        let by_assignee = store
            .list_tasks(&TaskFilter {
                assigned_agent: Some("agent-2".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_assignee.len(), 1);
    }

    #[test]
    fn completion_window_filter() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 2);
        store
            .update_status(
                &wf,
                &tasks[0].key,
                StatusChange {
                    new_status: "completed",
                    forced: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let recent = store
            .list_tasks(&TaskFilter {
                completed_after: Some(Utc::now() - chrono::Duration::minutes(5)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
        let none = store
            .list_tasks(&TaskFilter {
                completed_after: Some(Utc::now() + chrono::Duration::minutes(5)),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn invalid_json_payload_is_rejected() {
        let db = memory_db();
        let store = store(&db);
        let (_e, _f, tasks) = seed_feature_with_tasks(&store, 1);
        let err = store
            .update_task(
                &tasks[0].key,
                TaskPatch {
                    context_data: Some(Some("{broken".into())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SharkError::InvalidJson(_, _)));
    }

    #[test]
    fn bulk_complete_refuses_problematic_tasks_without_force() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (epic, _f, tasks) = seed_feature_with_tasks(&store, 4);
        // one in progress, one blocked with a reason, one ready for review
        store
            .update_status(&wf, &tasks[0].key, change("in_progress"))
            .unwrap();
        store
            .update_status(
                &wf,
                &tasks[1].key,
                StatusChange {
                    new_status: "blocked",
                    blocked_reason: Some("waiting for API spec"),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update_status(&wf, &tasks[2].key, change("in_progress"))
            .unwrap();
        store
            .update_status(&wf, &tasks[2].key, change("ready_for_review"))
            .unwrap();

        let report = store
            .bulk_complete(
                &wf,
                CompleteScope::Epic(epic.key.clone()),
                Some("agent-1"),
                false,
                &CancelToken::none(),
            )
            .unwrap();
        assert!(!report.completed);
        assert_eq!(report.total, 4);
        assert_eq!(report.breakdown.get("todo"), Some(&1));
        assert_eq!(report.breakdown.get("blocked"), Some(&1));
        // blocked first, then in-progress, then todo
        assert_eq!(report.most_problematic[0].key, tasks[1].key);
        assert_eq!(
            report.most_problematic[0].blocked_reason.as_deref(),
            Some("waiting for API spec")
        );
        assert_eq!(report.most_problematic[1].status, "in_progress");
        assert_eq!(report.most_problematic[2].status, "todo");

        // nothing changed
        assert_eq!(store.get_task_by_key(&tasks[1].key).unwrap().status, "blocked");
    }

    #[test]
    fn bulk_complete_with_force_completes_everything() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (epic, feature, tasks) = seed_feature_with_tasks(&store, 3);
        store
            .update_status(&wf, &tasks[0].key, change("in_progress"))
            .unwrap();

        let report = store
            .bulk_complete(
                &wf,
                CompleteScope::Epic(epic.key.clone()),
                Some("agent-1"),
                true,
                &CancelToken::none(),
            )
            .unwrap();
        assert!(report.completed);
        assert!(report.force_completed);
        assert_eq!(report.affected.len(), 3);

        for task in store
            .list_tasks(&TaskFilter {
                epic_key: Some(epic.key.clone()),
                ..Default::default()
            })
            .unwrap()
        {
            assert_eq!(task.status, "completed");
            let history = store.list_history(task.id).unwrap();
            assert_eq!(history.last().unwrap().new_status, "completed");
        }
        let f = store.get_feature_by_key(&feature.key).unwrap();
        assert_eq!(f.progress_pct, 100.0);
    }

    #[test]
    fn bulk_complete_without_force_advances_review_ready_tasks() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, feature, tasks) = seed_feature_with_tasks(&store, 1);
        store
            .update_status(&wf, &tasks[0].key, change("in_progress"))
            .unwrap();
        store
            .update_status(&wf, &tasks[0].key, change("ready_for_review"))
            .unwrap();

        let report = store
            .bulk_complete(
                &wf,
                CompleteScope::Feature(feature.key.clone()),
                None,
                false,
                &CancelToken::none(),
            )
            .unwrap();
        assert!(report.completed);
        assert!(!report.force_completed);
        assert_eq!(report.affected, vec![tasks[0].key.clone()]);
        let history = store.list_history(tasks[0].id).unwrap();
        assert!(!history.last().unwrap().forced);
    }

    fn multi_complete_workflow() -> Workflow {
        let mut graph = BTreeMap::new();
        graph.insert("todo".to_string(), vec!["in_progress".to_string()]);
        graph.insert("in_progress".to_string(), vec!["done".to_string()]);
        graph.insert("sunsetting".to_string(), vec!["retired".to_string()]);
        graph.insert("done".to_string(), vec![]);
        graph.insert("retired".to_string(), vec![]);
        Workflow::new(
            graph,
            crate::workflow::SpecialStatuses {
                start: vec!["todo".into()],
                complete: vec!["done".into(), "retired".into()],
            },
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn bulk_complete_finishes_through_non_primary_terminal_statuses() {
        let db = memory_db();
        let store = store(&db);
        let (_e, feature, tasks) = seed_feature_with_tasks(&store, 2);
        let wf = multi_complete_workflow();
        // one task a step from the non-primary terminal status, one a step
        // from the primary
        store
            .update_status(
                &wf,
                &tasks[0].key,
                StatusChange {
                    new_status: "sunsetting",
                    forced: true,
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update_status(&wf, &tasks[1].key, change("in_progress"))
            .unwrap();

        let report = store
            .bulk_complete(
                &wf,
                CompleteScope::Feature(feature.key.clone()),
                None,
                false,
                &CancelToken::none(),
            )
            .unwrap();
        assert!(report.completed, "both tasks finish legally: {report:?}");
        assert!(!report.force_completed);
        assert!(report.most_problematic.is_empty());
        assert_eq!(report.affected.len(), 2);

        assert_eq!(store.get_task_by_key(&tasks[0].key).unwrap().status, "retired");
        assert_eq!(store.get_task_by_key(&tasks[1].key).unwrap().status, "done");
        for task in &tasks {
            let last = store.list_history(task.id).unwrap().pop().unwrap();
            assert!(!last.forced, "legal completions are never tagged forced");
        }
    }

    #[test]
    fn bulk_complete_forces_only_tasks_with_no_terminal_step() {
        let db = memory_db();
        let store = store(&db);
        let (_e, feature, tasks) = seed_feature_with_tasks(&store, 2);
        let wf = multi_complete_workflow();
        store
            .update_status(
                &wf,
                &tasks[0].key,
                StatusChange {
                    new_status: "sunsetting",
                    forced: true,
                    ..Default::default()
                },
            )
            .unwrap();
        // tasks[1] stays in todo, which has no one-step terminal transition

        let refused = store
            .bulk_complete(
                &wf,
                CompleteScope::Feature(feature.key.clone()),
                None,
                false,
                &CancelToken::none(),
            )
            .unwrap();
        assert!(!refused.completed);
        assert_eq!(refused.most_problematic.len(), 1);
        assert_eq!(refused.most_problematic[0].key, tasks[1].key);
        assert_eq!(store.get_task_by_key(&tasks[0].key).unwrap().status, "sunsetting");

        let forced = store
            .bulk_complete(
                &wf,
                CompleteScope::Feature(feature.key.clone()),
                None,
                true,
                &CancelToken::none(),
            )
            .unwrap();
        assert!(forced.completed);
        assert_eq!(store.get_task_by_key(&tasks[0].key).unwrap().status, "retired");
        assert_eq!(store.get_task_by_key(&tasks[1].key).unwrap().status, "done");
        let sunset_row = store.list_history(tasks[0].id).unwrap().pop().unwrap();
        assert!(!sunset_row.forced, "reachable terminal step stays unforced");
        let todo_row = store.list_history(tasks[1].id).unwrap().pop().unwrap();
        assert!(todo_row.forced, "out-of-graph jump is tagged forced");
    }

    #[test]
    fn progress_tracks_terminal_ratio() {
        let db = memory_db();
        let store = store(&db);
        let wf = workflow();
        let (_e, feature, tasks) = seed_feature_with_tasks(&store, 4);
        store
            .update_status(
                &wf,
                &tasks[0].key,
                StatusChange {
                    new_status: "completed",
                    forced: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let pct = store.recompute_feature_progress(&wf, feature.id).unwrap();
        assert_eq!(pct, 25.0);
    }
}
