pub mod discover;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use fs2::FileExt;
use regex::Regex;
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::SharkConfig;
use crate::error::{Result, SharkError};
use crate::frontmatter::{EntityFile, Frontmatter};
use crate::keys;
use crate::model::{Epic, Feature, Task};
use crate::paths;
use crate::store::Store;
use crate::workflow::Workflow;

pub use discover::{DiscoveryMode, Validation, Walker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum SyncStrategy {
    FileWins,
    DatabaseWins,
    #[default]
    NewerWins,
    /// Interactive resolution; in batch mode conflicting items are left
    /// untouched and reported, with a non-zero exit.
    Manual,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    pub dry_run: bool,
    pub create_missing: bool,
    pub cleanup: bool,
    pub force_full_scan: bool,
    pub validation: Validation,
    pub mode: DiscoveryMode,
    pub cancel: CancelToken,
}

/// Outcome of one sync run: the affected keys per category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated_db: Vec<String>,
    pub updated_files: Vec<String>,
    pub deleted: Vec<String>,
    pub conflicts: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
    pub dry_run: bool,
    pub timed_out: bool,
}

impl SyncReport {
    pub fn change_count(&self) -> usize {
        self.created.len() + self.updated_db.len() + self.updated_files.len() + self.deleted.len()
    }

    pub fn is_noop(&self) -> bool {
        self.change_count() == 0 && self.conflicts.is_empty()
    }
}

/// One project-wide sync at a time.
struct SyncLock {
    _file: File,
}

impl SyncLock {
    fn acquire(project_root: &Path) -> Result<Self> {
        let dir = project_root.join(".shark");
        fs::create_dir_all(&dir)?;
        let path = dir.join("sync.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| SharkError::Locked(path.display().to_string()))?;
        Ok(Self { _file: file })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Epic,
    Feature,
    Task,
}

fn kind_of_key(key: &str) -> Option<EntityKind> {
    if keys::parse_task_key(key).is_ok() {
        Some(EntityKind::Task)
    } else if keys::parse_feature_key(key).is_ok() {
        Some(EntityKind::Feature)
    } else if keys::parse_epic_key(key).is_ok() {
        Some(EntityKind::Epic)
    } else {
        None
    }
}

fn task_key_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(T-E\d{2,}-F\d{2,}-\d{3,})").unwrap())
}

fn dir_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(E\d{2,}(?:-F\d{2,})?)").unwrap())
}

/// Key of a discovered file: the frontmatter wins; otherwise the filename
/// (task files) or the containing directory name (epic/feature files, which
/// may carry a slug suffix).
fn derive_key(file: &discover::DiscoveredFile, front: &Frontmatter) -> Option<String> {
    if let Some(key) = &front.key {
        return Some(key.clone());
    }
    let stem = file.rel.file_stem()?.to_string_lossy();
    if let Some(caps) = task_key_prefix_re().captures(&stem) {
        return Some(caps[1].to_string());
    }
    let dir = file.rel.parent()?.file_name()?.to_string_lossy();
    dir_key_re()
        .captures(&dir)
        .map(|caps| caps[1].to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToDb,
    ToFile,
    Conflict,
    Noop,
}

fn classify(
    file_changed: bool,
    db_changed: bool,
    strategy: SyncStrategy,
    file_modified: DateTime<Utc>,
    row_updated: DateTime<Utc>,
) -> Direction {
    match (file_changed, db_changed) {
        (false, false) => Direction::Noop,
        (true, false) => Direction::ToDb,
        (false, true) => Direction::ToFile,
        (true, true) => match strategy {
            SyncStrategy::FileWins => Direction::ToDb,
            SyncStrategy::DatabaseWins => Direction::ToFile,
            SyncStrategy::NewerWins => {
                if file_modified > row_updated {
                    Direction::ToDb
                } else {
                    Direction::ToFile
                }
            }
            SyncStrategy::Manual => Direction::Conflict,
        },
    }
}

struct FileItem {
    key: String,
    file: EntityFile,
    rel: PathBuf,
    path: PathBuf,
    modified: DateTime<Utc>,
    changed: bool,
}

struct Run<'a, 'b> {
    store: &'a Store<'b>,
    workflow: &'a Workflow,
    options: &'a SyncOptions,
    root: PathBuf,
    watermark: Option<DateTime<Utc>>,
    report: SyncReport,
    /// File writes deferred until after the kind's transaction commits.
    pending_writes: Vec<(PathBuf, EntityFile)>,
}

/// Reconcile the filesystem tree against the database.
///
/// Batches run creates -> updates -> deletes within one transaction per
/// entity kind, kinds ordered epics -> features -> tasks so foreign keys
/// resolve. On success (no conflicts, no timeout, not a dry run) the sync
/// watermark advances.
pub fn sync(
    store: &Store<'_>,
    workflow: &Workflow,
    config: &mut SharkConfig,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let root = store.project_root().to_path_buf();
    let _lock = SyncLock::acquire(&root)?;
    let watermark = if options.force_full_scan {
        None
    } else {
        config.last_sync_time
    };

    let walker = Walker::new(&root, &config.patterns())?
        .watermark(watermark)
        .mode(options.mode);
    let discovered = walker.walk()?;

    let mut run = Run {
        store,
        workflow,
        options,
        root: root.clone(),
        watermark,
        report: SyncReport {
            dry_run: options.dry_run,
            ..Default::default()
        },
        pending_writes: Vec::new(),
    };

    let mut epics: BTreeMap<String, FileItem> = BTreeMap::new();
    let mut features: BTreeMap<String, FileItem> = BTreeMap::new();
    let mut tasks: BTreeMap<String, FileItem> = BTreeMap::new();

    for found in discovered {
        if run.interrupted("sync discovery") {
            return Ok(run.report);
        }
        let item = match run.parse_item(&found) {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(e) => return Err(e),
        };
        let map = match kind_of_key(&item.key) {
            Some(EntityKind::Epic) => &mut epics,
            Some(EntityKind::Feature) => &mut features,
            Some(EntityKind::Task) => &mut tasks,
            None => {
                run.reject(
                    &found.rel,
                    SharkError::InvalidKey(item.key.clone(), "a known key shape".into()),
                )?;
                continue;
            }
        };
        if map.contains_key(&item.key) {
            run.reject(&found.rel, SharkError::KeyConflict(item.key.clone()))?;
            continue;
        }
        map.insert(item.key.clone(), item);
    }

    run.sync_epics(epics)?;
    run.sync_features(features)?;
    run.sync_tasks(tasks)?;

    let applied = !options.dry_run && !run.report.timed_out;
    if applied && run.report.conflicts.is_empty() {
        config.last_sync_time = Some(Utc::now());
        config.save(&root)?;
    }
    Ok(run.report)
}

impl Run<'_, '_> {
    /// Cancellation checkpoint: on timeout or cancel, record the partial
    /// classification and stop.
    fn interrupted(&mut self, what: &str) -> bool {
        match self.options.cancel.checkpoint(what) {
            Ok(()) => false,
            Err(e) => {
                self.report.timed_out = true;
                self.report.errors.push(e.to_string());
                true
            }
        }
    }

    fn apply(&self) -> bool {
        !self.options.dry_run
    }

    /// Handle an ill-formed file per the validation level. Strict aborts
    /// the run; balanced keeps the error in the report; permissive logs.
    fn reject(&mut self, rel: &Path, err: SharkError) -> Result<()> {
        match self.options.validation {
            Validation::Strict => Err(err),
            Validation::Balanced => {
                self.report
                    .errors
                    .push(format!("{}: {err}", rel.display()));
                self.report.skipped.push(rel.display().to_string());
                Ok(())
            }
            Validation::Permissive => {
                warn!(rel = %rel.display(), error = %err, "skipping ill-formed file");
                self.report.skipped.push(rel.display().to_string());
                Ok(())
            }
        }
    }

    fn parse_item(&mut self, found: &discover::DiscoveredFile) -> Result<Option<FileItem>> {
        let file = match EntityFile::read(&found.path) {
            Ok(file) => file,
            Err(e) => {
                self.reject(&found.rel, e)?;
                return Ok(None);
            }
        };
        let Some(key) = derive_key(found, &file.front) else {
            self.reject(
                &found.rel,
                SharkError::InvalidKey(found.rel.display().to_string(), "a derivable key".into()),
            )?;
            return Ok(None);
        };
        Ok(Some(FileItem {
            key,
            file,
            rel: found.rel.clone(),
            path: found.path.clone(),
            modified: found.modified,
            changed: found.changed,
        }))
    }

    fn row_changed(&self, updated_at: DateTime<Utc>) -> bool {
        self.watermark.is_some_and(|mark| updated_at > mark)
    }

    fn flush_writes(&mut self) -> Result<()> {
        for (path, file) in self.pending_writes.drain(..) {
            file.write(&path)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Epics
    // -----------------------------------------------------------------------

    fn sync_epics(&mut self, items: BTreeMap<String, FileItem>) -> Result<()> {
        if self.report.timed_out {
            return Ok(());
        }
        let db_rows: BTreeMap<String, Epic> = self
            .store
            .list_epics(true)?
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();

        let conn = self.store.conn();
        let tx = if self.apply() {
            Some(conn.unchecked_transaction()?)
        } else {
            None
        };

        for (key, item) in &items {
            if self.interrupted("sync epics") {
                return Ok(());
            }
            match db_rows.get(key) {
                None => {
                    if !self.options.create_missing {
                        self.report.skipped.push(key.clone());
                        continue;
                    }
                    if let Err(e) = self.create_epic_from_item(item) {
                        self.reject(&item.rel, e)?;
                        continue;
                    }
                    self.report.created.push(key.clone());
                }
                Some(row) => self.reconcile_epic(row, item)?,
            }
        }
        for (key, row) in &db_rows {
            if items.contains_key(key) {
                continue;
            }
            if !self.options.cleanup {
                self.report.skipped.push(key.clone());
                continue;
            }
            if self.apply() {
                self.store
                    .conn()
                    .execute("DELETE FROM epics WHERE id = ?1", params![row.id])?;
            }
            self.report.deleted.push(key.clone());
        }

        if let Some(tx) = tx {
            tx.commit()?;
        }
        self.flush_writes()
    }

    fn create_epic_from_item(&self, item: &FileItem) -> Result<()> {
        let front = &item.file.front;
        let title = front.title.clone().unwrap_or_else(|| item.key.clone());
        if let Some(custom) = &front.custom_folder_path {
            paths::validate_custom_folder_path(&self.root, custom)?;
        }
        let now = Utc::now();
        // The database owns status: a status field in the file never
        // dictates the stored one, even at creation.
        let epic = Epic {
            id: 0,
            key: item.key.clone(),
            slug: keys::slugify(&title),
            title,
            description: None,
            status: self.workflow.initial_status().to_string(),
            priority: front.priority_value()?.unwrap_or(5),
            archived: false,
            custom_folder_path: front.custom_folder_path.clone(),
            file_path: Some(item.rel.to_string_lossy().into_owned()),
            created_at: now,
            updated_at: now,
        };
        if self.apply() {
            self.store.insert_epic_from_file(&epic)?;
        }
        Ok(())
    }

    fn reconcile_epic(&mut self, row: &Epic, item: &FileItem) -> Result<()> {
        match classify(
            item.changed,
            self.row_changed(row.updated_at),
            self.options.strategy,
            item.modified,
            row.updated_at,
        ) {
            Direction::Noop => {}
            Direction::Conflict => self.report.conflicts.push(row.key.clone()),
            Direction::ToDb => {
                let front = &item.file.front;
                if let Some(custom) = &front.custom_folder_path
                    && let Err(e) = paths::validate_custom_folder_path(&self.root, custom)
                {
                    self.reject(&item.rel, e)?;
                    return Ok(());
                }
                let title = front.title.clone().unwrap_or_else(|| row.title.clone());
                let priority = front.priority_value()?.unwrap_or(row.priority);
                if self.apply() {
                    self.store.conn().execute(
                        "UPDATE epics SET title = ?1, slug = ?2, priority = ?3,
                                          custom_folder_path = ?4, file_path = ?5, updated_at = ?6
                         WHERE id = ?7",
                        params![
                            title,
                            keys::slugify(&title),
                            priority,
                            front.custom_folder_path,
                            item.rel.to_string_lossy(),
                            Utc::now().to_rfc3339(),
                            row.id,
                        ],
                    )?;
                }
                self.report.updated_db.push(row.key.clone());
            }
            Direction::ToFile => {
                let mut file = item.file.clone();
                let mut front = file.front.clone();
                front.key = Some(row.key.clone());
                front.title = Some(row.title.clone());
                front.priority = Some(serde_yaml::Value::from(row.priority));
                front.custom_folder_path = row.custom_folder_path.clone();
                file.set_front(front);
                if self.apply() {
                    self.pending_writes.push((item.path.clone(), file));
                }
                self.report.updated_files.push(row.key.clone());
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Features
    // -----------------------------------------------------------------------

    fn sync_features(&mut self, items: BTreeMap<String, FileItem>) -> Result<()> {
        if self.report.timed_out {
            return Ok(());
        }
        let db_rows: BTreeMap<String, Feature> = self
            .store
            .list_features(None, true)?
            .into_iter()
            .map(|f| (f.key.clone(), f))
            .collect();

        let conn = self.store.conn();
        let tx = if self.apply() {
            Some(conn.unchecked_transaction()?)
        } else {
            None
        };

        for (key, item) in &items {
            if self.interrupted("sync features") {
                return Ok(());
            }
            match db_rows.get(key) {
                None => {
                    if !self.options.create_missing {
                        self.report.skipped.push(key.clone());
                        continue;
                    }
                    if let Err(e) = self.create_feature_from_item(item) {
                        self.reject(&item.rel, e)?;
                        continue;
                    }
                    self.report.created.push(key.clone());
                }
                Some(row) => self.reconcile_feature(row, item)?,
            }
        }
        for (key, row) in &db_rows {
            if items.contains_key(key) {
                continue;
            }
            if !self.options.cleanup {
                self.report.skipped.push(key.clone());
                continue;
            }
            if self.apply() {
                self.store
                    .conn()
                    .execute("DELETE FROM features WHERE id = ?1", params![row.id])?;
            }
            self.report.deleted.push(key.clone());
        }

        if let Some(tx) = tx {
            tx.commit()?;
        }
        self.flush_writes()
    }

    fn create_feature_from_item(&self, item: &FileItem) -> Result<()> {
        let (epic_key, _) = keys::parse_feature_key(&item.key)?;
        let epic = self.store.get_epic_by_key(&epic_key)?;
        let front = &item.file.front;
        let title = front.title.clone().unwrap_or_else(|| item.key.clone());
        if let Some(custom) = &front.custom_folder_path {
            paths::validate_custom_folder_path(&self.root, custom)?;
        }
        let now = Utc::now();
        let feature = Feature {
            id: 0,
            epic_id: epic.id,
            key: item.key.clone(),
            slug: keys::slugify(&title),
            title,
            description: None,
            status: self.workflow.initial_status().to_string(),
            priority: front.priority_value()?.unwrap_or(5),
            progress_pct: 0.0,
            execution_order: front.execution_order,
            archived: false,
            custom_folder_path: front.custom_folder_path.clone(),
            file_path: Some(item.rel.to_string_lossy().into_owned()),
            created_at: now,
            updated_at: now,
        };
        if self.apply() {
            self.store.insert_feature_from_file(&feature)?;
        }
        Ok(())
    }

    fn reconcile_feature(&mut self, row: &Feature, item: &FileItem) -> Result<()> {
        match classify(
            item.changed,
            self.row_changed(row.updated_at),
            self.options.strategy,
            item.modified,
            row.updated_at,
        ) {
            Direction::Noop => {}
            Direction::Conflict => self.report.conflicts.push(row.key.clone()),
            Direction::ToDb => {
                let front = &item.file.front;
                if let Some(custom) = &front.custom_folder_path
                    && let Err(e) = paths::validate_custom_folder_path(&self.root, custom)
                {
                    self.reject(&item.rel, e)?;
                    return Ok(());
                }
                let title = front.title.clone().unwrap_or_else(|| row.title.clone());
                let priority = front.priority_value()?.unwrap_or(row.priority);
                let execution_order = front.execution_order.or(row.execution_order);
                if self.apply() {
                    self.store.conn().execute(
                        "UPDATE features SET title = ?1, slug = ?2, priority = ?3,
                                             execution_order = ?4, custom_folder_path = ?5,
                                             file_path = ?6, updated_at = ?7
                         WHERE id = ?8",
                        params![
                            title,
                            keys::slugify(&title),
                            priority,
                            execution_order,
                            front.custom_folder_path,
                            item.rel.to_string_lossy(),
                            Utc::now().to_rfc3339(),
                            row.id,
                        ],
                    )?;
                }
                self.report.updated_db.push(row.key.clone());
            }
            Direction::ToFile => {
                let mut file = item.file.clone();
                let mut front = file.front.clone();
                front.key = Some(row.key.clone());
                front.title = Some(row.title.clone());
                front.priority = Some(serde_yaml::Value::from(row.priority));
                front.execution_order = row.execution_order;
                front.custom_folder_path = row.custom_folder_path.clone();
                file.set_front(front);
                if self.apply() {
                    self.pending_writes.push((item.path.clone(), file));
                }
                self.report.updated_files.push(row.key.clone());
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    fn sync_tasks(&mut self, items: BTreeMap<String, FileItem>) -> Result<()> {
        if self.report.timed_out {
            return Ok(());
        }
        let db_rows: BTreeMap<String, Task> = self
            .store
            .list_tasks(&crate::store::TaskFilter {
                include_archived: true,
                ..Default::default()
            })?
            .into_iter()
            .map(|t| (t.key.clone(), t))
            .collect();

        let conn = self.store.conn();
        let tx = if self.apply() {
            Some(conn.unchecked_transaction()?)
        } else {
            None
        };
        let mut touched_features: Vec<i64> = Vec::new();

        for (key, item) in &items {
            if self.interrupted("sync tasks") {
                return Ok(());
            }
            match db_rows.get(key) {
                None => {
                    if !self.options.create_missing {
                        self.report.skipped.push(key.clone());
                        continue;
                    }
                    match self.create_task_from_item(item) {
                        Ok(feature_id) => {
                            if let Some(id) = feature_id {
                                touched_features.push(id);
                            }
                            self.report.created.push(key.clone());
                        }
                        Err(e) => self.reject(&item.rel, e)?,
                    }
                }
                Some(row) => self.reconcile_task(row, item)?,
            }
        }
        for (key, row) in &db_rows {
            if items.contains_key(key) {
                continue;
            }
            if !self.options.cleanup {
                self.report.skipped.push(key.clone());
                continue;
            }
            if self.apply() {
                self.store
                    .conn()
                    .execute("DELETE FROM tasks WHERE id = ?1", params![row.id])?;
                touched_features.push(row.feature_id);
            }
            self.report.deleted.push(key.clone());
        }

        if self.apply() {
            touched_features.sort_unstable();
            touched_features.dedup();
            for feature_id in touched_features {
                self.store
                    .recompute_feature_progress(self.workflow, feature_id)?;
            }
        }
        if let Some(tx) = tx {
            tx.commit()?;
        }
        self.flush_writes()
    }

    fn create_task_from_item(&self, item: &FileItem) -> Result<Option<i64>> {
        let (feature_key, _) = keys::parse_task_key(&item.key)?;
        let feature = self.store.get_feature_by_key(&feature_key)?;
        let front = &item.file.front;
        let title = front.title.clone().unwrap_or_else(|| item.key.clone());
        let now = Utc::now();
        let task = Task {
            id: 0,
            feature_id: feature.id,
            key: item.key.clone(),
            title,
            description: None,
            status: self.workflow.initial_status().to_string(),
            priority: front.priority_value()?.unwrap_or(5),
            agent_type: front.agent_type.clone(),
            assigned_agent: None,
            execution_order: front.execution_order,
            rejection_count: 0,
            blocked_reason: None,
            completed_at: None,
            archived: false,
            file_path: Some(item.rel.to_string_lossy().into_owned()),
            context_data: None,
            files_changed: None,
            created_at: now,
            updated_at: now,
        };
        if !self.apply() {
            return Ok(None);
        }
        self.store.insert_task_from_file(&task)?;
        Ok(Some(feature.id))
    }

    fn reconcile_task(&mut self, row: &Task, item: &FileItem) -> Result<()> {
        match classify(
            item.changed,
            self.row_changed(row.updated_at),
            self.options.strategy,
            item.modified,
            row.updated_at,
        ) {
            Direction::Noop => {}
            Direction::Conflict => self.report.conflicts.push(row.key.clone()),
            Direction::ToDb => {
                // Status is exempt from file -> database propagation under
                // every strategy.
                if let Some(status) = &item.file.front.status
                    && status != &row.status
                {
                    debug!(key = %row.key, file_status = %status, "ignoring status from file");
                }
                let front = &item.file.front;
                let title = front.title.clone().unwrap_or_else(|| row.title.clone());
                let priority = front.priority_value()?.unwrap_or(row.priority);
                let agent_type = front.agent_type.clone().or_else(|| row.agent_type.clone());
                let execution_order = front.execution_order.or(row.execution_order);
                if self.apply() {
                    self.store.conn().execute(
                        "UPDATE tasks SET title = ?1, priority = ?2, agent_type = ?3,
                                          execution_order = ?4, file_path = ?5, updated_at = ?6
                         WHERE id = ?7",
                        params![
                            title,
                            priority,
                            agent_type,
                            execution_order,
                            item.rel.to_string_lossy(),
                            Utc::now().to_rfc3339(),
                            row.id,
                        ],
                    )?;
                }
                self.report.updated_db.push(row.key.clone());
            }
            Direction::ToFile => {
                let mut file = item.file.clone();
                let mut front = file.front.clone();
                front.key = Some(row.key.clone());
                front.title = Some(row.title.clone());
                front.priority = Some(serde_yaml::Value::from(row.priority));
                front.agent_type = row.agent_type.clone();
                front.execution_order = row.execution_order;
                file.set_front(front);
                if self.apply() {
                    self.pending_writes.push((item.path.clone(), file));
                }
                self.report.updated_files.push(row.key.clone());
            }
        }
        Ok(())
    }
}
