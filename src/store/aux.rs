use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::error::{Result, SharkError};
use crate::model::{self, Document, Idea, Task, TaskCriterion, TaskNote, WorkSession};
use crate::store::tasks::NewTask;
use crate::store::{Store, parse_dt, parse_dt_opt};
use crate::workflow::Workflow;

/// Entity kind a document can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocOwner {
    Epic,
    Feature,
    Task,
}

impl DocOwner {
    fn join_table(self) -> (&'static str, &'static str) {
        match self {
            Self::Epic => ("epic_documents", "epic_id"),
            Self::Feature => ("feature_documents", "feature_id"),
            Self::Task => ("task_documents", "task_id"),
        }
    }
}

impl Store<'_> {
    // -----------------------------------------------------------------------
    // Task notes
    // -----------------------------------------------------------------------

    pub fn add_note(&self, task_key: &str, author: Option<&str>, body: &str) -> Result<TaskNote> {
        model::validate_text("note", body)?;
        let task = self.get_task_by_key(task_key)?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO task_notes (task_id, author, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task.id, author, body, now.to_rfc3339()],
        )?;
        Ok(TaskNote {
            id: self.conn.last_insert_rowid(),
            task_id: task.id,
            author: author.map(str::to_string),
            body: body.to_string(),
            created_at: now,
        })
    }

    pub fn list_notes(&self, task_key: &str) -> Result<Vec<TaskNote>> {
        let task = self.get_task_by_key(task_key)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, author, body, created_at FROM task_notes
             WHERE task_id = ?1 ORDER BY created_at, id",
        )?;
        let notes = stmt
            .query_map(params![task.id], |row| {
                Ok(TaskNote {
                    id: row.get("id")?,
                    task_id: row.get("task_id")?,
                    author: row.get("author")?,
                    body: row.get("body")?,
                    created_at: parse_dt(&row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    // -----------------------------------------------------------------------
    // Acceptance criteria
    // -----------------------------------------------------------------------

    pub fn add_criterion(&self, task_key: &str, description: &str) -> Result<TaskCriterion> {
        model::validate_text("criterion", description)?;
        let task = self.get_task_by_key(task_key)?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO task_criteria (task_id, description, met, created_at)
             VALUES (?1, ?2, 0, ?3)",
            params![task.id, description, now.to_rfc3339()],
        )?;
        Ok(TaskCriterion {
            id: self.conn.last_insert_rowid(),
            task_id: task.id,
            description: description.to_string(),
            met: false,
            created_at: now,
        })
    }

    pub fn list_criteria(&self, task_key: &str) -> Result<Vec<TaskCriterion>> {
        let task = self.get_task_by_key(task_key)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, description, met, created_at FROM task_criteria
             WHERE task_id = ?1 ORDER BY id",
        )?;
        let criteria = stmt
            .query_map(params![task.id], |row| {
                Ok(TaskCriterion {
                    id: row.get("id")?,
                    task_id: row.get("task_id")?,
                    description: row.get("description")?,
                    met: row.get("met")?,
                    created_at: parse_dt(&row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(criteria)
    }

    pub fn set_criterion_met(&self, criterion_id: i64, met: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE task_criteria SET met = ?1 WHERE id = ?2",
            params![met, criterion_id],
        )?;
        if changed == 0 {
            return Err(SharkError::Integrity(format!(
                "criterion {criterion_id} does not exist"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Work sessions
    // -----------------------------------------------------------------------

    /// Open a session for an agent taking a task. Terminal status writes
    /// close open sessions in the same transaction as the status change.
    pub fn open_work_session(&self, task_key: &str, agent: Option<&str>) -> Result<WorkSession> {
        let task = self.get_task_by_key(task_key)?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO work_sessions (id, task_id, agent, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, task.id, agent, now.to_rfc3339()],
        )?;
        Ok(WorkSession {
            id,
            task_id: task.id,
            agent: agent.map(str::to_string),
            started_at: now,
            ended_at: None,
        })
    }

    pub fn list_work_sessions(&self, task_key: &str) -> Result<Vec<WorkSession>> {
        let task = self.get_task_by_key(task_key)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, agent, started_at, ended_at FROM work_sessions
             WHERE task_id = ?1 ORDER BY started_at",
        )?;
        let sessions = stmt
            .query_map(params![task.id], |row| {
                Ok(WorkSession {
                    id: row.get("id")?,
                    task_id: row.get("task_id")?,
                    agent: row.get("agent")?,
                    started_at: parse_dt(&row.get::<_, String>("started_at")?),
                    ended_at: parse_dt_opt(row.get("ended_at")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    pub fn create_document(
        &self,
        title: &str,
        file_path: &str,
        doc_type: Option<&str>,
    ) -> Result<Document> {
        model::validate_title(title)?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO documents (title, file_path, doc_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![title, file_path, doc_type, now.to_rfc3339()],
        )?;
        Ok(Document {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            file_path: file_path.to_string(),
            doc_type: doc_type.map(str::to_string),
            created_at: now,
        })
    }

    pub fn link_document(&self, owner: DocOwner, owner_key: &str, document_id: i64) -> Result<()> {
        let owner_id = match owner {
            DocOwner::Epic => self.get_epic_by_key(owner_key)?.id,
            DocOwner::Feature => self.get_feature_by_key(owner_key)?.id,
            DocOwner::Task => self.get_task_by_key(owner_key)?.id,
        };
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM documents WHERE id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(SharkError::DocumentNotFound(document_id));
        }
        let (table, column) = owner.join_table();
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {table} ({column}, document_id) VALUES (?1, ?2)"
            ),
            params![owner_id, document_id],
        )?;
        Ok(())
    }

    pub fn list_documents(&self, owner: DocOwner, owner_key: &str) -> Result<Vec<Document>> {
        let owner_id = match owner {
            DocOwner::Epic => self.get_epic_by_key(owner_key)?.id,
            DocOwner::Feature => self.get_feature_by_key(owner_key)?.id,
            DocOwner::Task => self.get_task_by_key(owner_key)?.id,
        };
        let (table, column) = owner.join_table();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT d.id, d.title, d.file_path, d.doc_type, d.created_at
             FROM documents d JOIN {table} j ON j.document_id = d.id
             WHERE j.{column} = ?1 ORDER BY d.id"
        ))?;
        let docs = stmt
            .query_map(params![owner_id], |row| {
                Ok(Document {
                    id: row.get("id")?,
                    title: row.get("title")?,
                    file_path: row.get("file_path")?,
                    doc_type: row.get("doc_type")?,
                    created_at: parse_dt(&row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    // -----------------------------------------------------------------------
    // Ideas backlog
    // -----------------------------------------------------------------------

    pub fn add_idea(&self, title: &str, description: Option<&str>) -> Result<Idea> {
        model::validate_title(title)?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO ideas (title, description, created_at) VALUES (?1, ?2, ?3)",
            params![title, description, now.to_rfc3339()],
        )?;
        Ok(Idea {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.map(str::to_string),
            created_at: now,
        })
    }

    pub fn list_ideas(&self) -> Result<Vec<Idea>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, description, created_at FROM ideas ORDER BY id")?;
        let ideas = stmt
            .query_map([], |row| {
                Ok(Idea {
                    id: row.get("id")?,
                    title: row.get("title")?,
                    description: row.get("description")?,
                    created_at: parse_dt(&row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ideas)
    }

    pub fn get_idea(&self, id: i64) -> Result<Idea> {
        self.conn
            .query_row(
                "SELECT id, title, description, created_at FROM ideas WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Idea {
                        id: row.get("id")?,
                        title: row.get("title")?,
                        description: row.get("description")?,
                        created_at: parse_dt(&row.get::<_, String>("created_at")?),
                    })
                },
            )
            .optional()?
            .ok_or(SharkError::IdeaNotFound(id))
    }

    /// Turn an idea into a task under the given feature; the task insert
    /// and the idea delete share one transaction.
    pub fn promote_idea(
        &self,
        workflow: &Workflow,
        idea_id: i64,
        feature_key: &str,
        agent: Option<&str>,
    ) -> Result<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let idea = self.get_idea(idea_id)?;
        let feature = self.get_feature_by_key(feature_key)?;
        let epic = self.get_epic_by_id(feature.epic_id)?;
        let task = self.create_task_in_tx(
            workflow,
            &epic,
            &feature,
            NewTask {
                title: idea.title,
                description: idea.description,
                agent: agent.map(str::to_string),
                ..Default::default()
            },
        )?;
        self.conn
            .execute("DELETE FROM ideas WHERE id = ?1", params![idea_id])?;
        tx.commit()?;
        Ok(task)
    }
}
