use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::error::{Result, SharkError};
use crate::keys;
use crate::model::{self, Epic};
use crate::paths;
use crate::store::{Store, epic_from_row};
use crate::workflow::Workflow;

#[derive(Debug, Default, Clone)]
pub struct NewEpic {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub custom_folder_path: Option<String>,
    /// Explicit filename override; wins over all resolution rules.
    pub explicit_filename: Option<String>,
}

/// Field updates for an epic. `None` leaves a field untouched; the inner
/// `Option` distinguishes set from clear.
#[derive(Debug, Default, Clone)]
pub struct EpicPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<i64>,
    pub custom_folder_path: Option<Option<String>>,
    pub archived: Option<bool>,
    pub file_path: Option<String>,
}

impl Store<'_> {
    pub fn create_epic(&self, workflow: &Workflow, new: NewEpic) -> Result<Epic> {
        model::validate_title(&new.title)?;
        if let Some(p) = new.priority {
            model::validate_priority(p)?;
        }
        if let Some(custom) = &new.custom_folder_path {
            paths::validate_custom_folder_path(&self.root, custom)?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let existing = self.all_epic_keys()?;
        let key = keys::next_epic_key(existing.iter().map(String::as_str));
        let slug = keys::slugify(&new.title);
        let now = Utc::now();

        let mut epic = Epic {
            id: 0,
            key,
            slug,
            title: new.title,
            description: new.description,
            status: workflow.initial_status().to_string(),
            priority: new.priority.unwrap_or(5),
            archived: false,
            custom_folder_path: new.custom_folder_path,
            file_path: None,
            created_at: now,
            updated_at: now,
        };
        let file_path =
            paths::epic_file_path(&self.root, &epic, new.explicit_filename.as_deref())?;
        epic.file_path = Some(file_path.to_string_lossy().into_owned());

        tx.execute(
            "INSERT INTO epics (key, slug, title, description, status, priority, archived,
                                custom_folder_path, file_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)",
            params![
                epic.key,
                epic.slug,
                epic.title,
                epic.description,
                epic.status,
                epic.priority,
                epic.custom_folder_path,
                epic.file_path,
                now.to_rfc3339(),
            ],
        )?;
        epic.id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(epic)
    }

    /// Insert an epic discovered on disk, keeping the key the file carries.
    pub(crate) fn insert_epic_from_file(&self, epic: &Epic) -> Result<i64> {
        keys::parse_epic_key(&epic.key)?;
        if self.find_epic_by_key(&epic.key)?.is_some() {
            return Err(SharkError::KeyConflict(epic.key.clone()));
        }
        self.conn.execute(
            "INSERT INTO epics (key, slug, title, description, status, priority, archived,
                                custom_folder_path, file_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                epic.key,
                epic.slug,
                epic.title,
                epic.description,
                epic.status,
                epic.priority,
                epic.archived,
                epic.custom_folder_path,
                epic.file_path,
                epic.created_at.to_rfc3339(),
                epic.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn all_epic_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM epics")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    pub fn find_epic_by_key(&self, key: &str) -> Result<Option<Epic>> {
        self.conn
            .query_row("SELECT * FROM epics WHERE key = ?1", params![key], |row| {
                epic_from_row(row)
            })
            .optional()
            .map_err(Into::into)
    }

    pub fn get_epic_by_key(&self, key: &str) -> Result<Epic> {
        self.find_epic_by_key(key)?
            .ok_or_else(|| SharkError::EpicNotFound(key.to_string()))
    }

    pub fn get_epic_by_id(&self, id: i64) -> Result<Epic> {
        self.conn
            .query_row("SELECT * FROM epics WHERE id = ?1", params![id], |row| {
                epic_from_row(row)
            })
            .optional()?
            .ok_or_else(|| SharkError::EpicNotFound(id.to_string()))
    }

    pub fn list_epics(&self, include_archived: bool) -> Result<Vec<Epic>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM epics WHERE (?1 OR archived = 0) ORDER BY key",
        )?;
        let epics = stmt
            .query_map(params![include_archived], epic_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(epics)
    }

    pub fn update_epic(&self, workflow: &Workflow, key: &str, patch: EpicPatch) -> Result<Epic> {
        let tx = self.conn.unchecked_transaction()?;
        let mut epic = self.get_epic_by_key(key)?;

        if let Some(title) = patch.title {
            model::validate_title(&title)?;
            epic.title = title;
            epic.slug = keys::slugify(&epic.title);
        }
        if let Some(description) = patch.description {
            epic.description = description;
        }
        if let Some(status) = patch.status {
            let status = model::resolve_status(workflow, &status)?;
            epic.status = status;
        }
        if let Some(priority) = patch.priority {
            model::validate_priority(priority)?;
            epic.priority = priority;
        }
        if let Some(custom) = patch.custom_folder_path {
            if let Some(path) = &custom {
                paths::validate_custom_folder_path(&self.root, path)?;
            }
            epic.custom_folder_path = custom;
        }
        if let Some(archived) = patch.archived {
            epic.archived = archived;
        }
        if let Some(file_path) = patch.file_path {
            epic.file_path = Some(file_path);
        }
        epic.updated_at = Utc::now();

        tx.execute(
            "UPDATE epics SET slug = ?1, title = ?2, description = ?3, status = ?4,
                              priority = ?5, archived = ?6, custom_folder_path = ?7,
                              file_path = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                epic.slug,
                epic.title,
                epic.description,
                epic.status,
                epic.priority,
                epic.archived,
                epic.custom_folder_path,
                epic.file_path,
                epic.updated_at.to_rfc3339(),
                epic.id,
            ],
        )?;
        tx.commit()?;
        Ok(epic)
    }

    /// Cascade delete: features, tasks, history, notes, criteria, sessions
    /// and document links all go in one transaction via the ownership FKs.
    pub fn delete_epic(&self, key: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let epic = self.get_epic_by_key(key)?;
        tx.execute("DELETE FROM epics WHERE id = ?1", params![epic.id])?;
        tx.commit()?;
        Ok(())
    }
}
