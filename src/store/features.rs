use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::error::{Result, SharkError};
use crate::keys;
use crate::model::{self, Feature};
use crate::paths;
use crate::store::{Store, feature_from_row};
use crate::workflow::Workflow;

#[derive(Debug, Default, Clone)]
pub struct NewFeature {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub execution_order: Option<i64>,
    pub custom_folder_path: Option<String>,
    pub explicit_filename: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct FeaturePatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<i64>,
    pub execution_order: Option<Option<i64>>,
    pub custom_folder_path: Option<Option<String>>,
    pub archived: Option<bool>,
    pub file_path: Option<String>,
}

impl Store<'_> {
    pub fn create_feature(
        &self,
        workflow: &Workflow,
        epic_key: &str,
        new: NewFeature,
    ) -> Result<Feature> {
        model::validate_title(&new.title)?;
        if let Some(p) = new.priority {
            model::validate_priority(p)?;
        }
        if let Some(custom) = &new.custom_folder_path {
            paths::validate_custom_folder_path(&self.root, custom)?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let epic = self.get_epic_by_key(epic_key)?;
        let existing = self.all_feature_keys()?;
        let key = keys::next_feature_key(&epic.key, existing.iter().map(String::as_str));
        let now = Utc::now();

        let mut feature = Feature {
            id: 0,
            epic_id: epic.id,
            slug: keys::slugify(&new.title),
            key,
            title: new.title,
            description: new.description,
            status: workflow.initial_status().to_string(),
            priority: new.priority.unwrap_or(5),
            progress_pct: 0.0,
            execution_order: new.execution_order,
            archived: false,
            custom_folder_path: new.custom_folder_path,
            file_path: None,
            created_at: now,
            updated_at: now,
        };
        let file_path = paths::feature_file_path(
            &self.root,
            &epic,
            &feature,
            new.explicit_filename.as_deref(),
        )?;
        feature.file_path = Some(file_path.to_string_lossy().into_owned());

        tx.execute(
            "INSERT INTO features (epic_id, key, slug, title, description, status, priority,
                                   progress_pct, execution_order, archived, custom_folder_path,
                                   file_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, 0, ?9, ?10, ?11, ?11)",
            params![
                feature.epic_id,
                feature.key,
                feature.slug,
                feature.title,
                feature.description,
                feature.status,
                feature.priority,
                feature.execution_order,
                feature.custom_folder_path,
                feature.file_path,
                now.to_rfc3339(),
            ],
        )?;
        feature.id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(feature)
    }

    pub(crate) fn insert_feature_from_file(&self, feature: &Feature) -> Result<i64> {
        keys::parse_feature_key(&feature.key)?;
        if self.find_feature_by_key(&feature.key)?.is_some() {
            return Err(SharkError::KeyConflict(feature.key.clone()));
        }
        self.conn.execute(
            "INSERT INTO features (epic_id, key, slug, title, description, status, priority,
                                   progress_pct, execution_order, archived, custom_folder_path,
                                   file_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                feature.epic_id,
                feature.key,
                feature.slug,
                feature.title,
                feature.description,
                feature.status,
                feature.priority,
                feature.progress_pct,
                feature.execution_order,
                feature.archived,
                feature.custom_folder_path,
                feature.file_path,
                feature.created_at.to_rfc3339(),
                feature.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn all_feature_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM features")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    pub fn find_feature_by_key(&self, key: &str) -> Result<Option<Feature>> {
        self.conn
            .query_row(
                "SELECT * FROM features WHERE key = ?1",
                params![key],
                feature_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_feature_by_key(&self, key: &str) -> Result<Feature> {
        self.find_feature_by_key(key)?
            .ok_or_else(|| SharkError::FeatureNotFound(key.to_string()))
    }

    pub fn get_feature_by_id(&self, id: i64) -> Result<Feature> {
        self.conn
            .query_row(
                "SELECT * FROM features WHERE id = ?1",
                params![id],
                feature_from_row,
            )
            .optional()?
            .ok_or_else(|| SharkError::FeatureNotFound(id.to_string()))
    }

    pub fn list_features(&self, epic_key: Option<&str>, include_archived: bool) -> Result<Vec<Feature>> {
        let mut sql = String::from(
            "SELECT f.* FROM features f JOIN epics e ON f.epic_id = e.id WHERE (?1 OR f.archived = 0)",
        );
        let mut values: Vec<rusqlite::types::Value> = vec![include_archived.into()];
        if let Some(key) = epic_key {
            sql.push_str(" AND e.key = ?2");
            values.push(key.to_string().into());
        }
        sql.push_str(" ORDER BY f.execution_order IS NULL, f.execution_order, f.key");
        let mut stmt = self.conn.prepare(&sql)?;
        let features = stmt
            .query_map(rusqlite::params_from_iter(values), feature_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(features)
    }

    pub fn update_feature(
        &self,
        workflow: &Workflow,
        key: &str,
        patch: FeaturePatch,
    ) -> Result<Feature> {
        let tx = self.conn.unchecked_transaction()?;
        let mut feature = self.get_feature_by_key(key)?;

        if let Some(title) = patch.title {
            model::validate_title(&title)?;
            feature.title = title;
            feature.slug = keys::slugify(&feature.title);
        }
        if let Some(description) = patch.description {
            feature.description = description;
        }
        if let Some(status) = patch.status {
            feature.status = model::resolve_status(workflow, &status)?;
        }
        if let Some(priority) = patch.priority {
            model::validate_priority(priority)?;
            feature.priority = priority;
        }
        if let Some(order) = patch.execution_order {
            feature.execution_order = order;
        }
        if let Some(custom) = patch.custom_folder_path {
            if let Some(path) = &custom {
                paths::validate_custom_folder_path(&self.root, path)?;
            }
            feature.custom_folder_path = custom;
        }
        if let Some(archived) = patch.archived {
            feature.archived = archived;
        }
        if let Some(file_path) = patch.file_path {
            feature.file_path = Some(file_path);
        }
        feature.updated_at = Utc::now();

        tx.execute(
            "UPDATE features SET slug = ?1, title = ?2, description = ?3, status = ?4,
                                 priority = ?5, execution_order = ?6, archived = ?7,
                                 custom_folder_path = ?8, file_path = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                feature.slug,
                feature.title,
                feature.description,
                feature.status,
                feature.priority,
                feature.execution_order,
                feature.archived,
                feature.custom_folder_path,
                feature.file_path,
                feature.updated_at.to_rfc3339(),
                feature.id,
            ],
        )?;
        tx.commit()?;
        Ok(feature)
    }

    pub fn delete_feature(&self, key: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let feature = self.get_feature_by_key(key)?;
        tx.execute("DELETE FROM features WHERE id = ?1", params![feature.id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_task_count_for_feature(&self, feature_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE feature_id = ?1 AND archived = 0",
                params![feature_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Status -> task count for one feature.
    pub fn get_status_breakdown(&self, feature_id: i64) -> Result<BTreeMap<String, i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM tasks
             WHERE feature_id = ?1 AND archived = 0
             GROUP BY status",
        )?;
        let rows = stmt.query_map(params![feature_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut breakdown = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            breakdown.insert(status, count);
        }
        Ok(breakdown)
    }

    pub(crate) fn set_feature_progress(&self, feature_id: i64, pct: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE features SET progress_pct = ?1 WHERE id = ?2",
            params![pct, feature_id],
        )?;
        Ok(())
    }
}
