use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::config::{DEFAULT_DB_FILE, ENV_AUTH_TOKEN, SharkConfig};
use crate::error::{Result, SharkError};

const REMOTE_PREFIXES: [&str; 2] = ["libsql://", "https://"];

/// Resolved backend selection. Priority among sources: CLI flag, then
/// environment URL, then config file, then the default file under the
/// project root.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Single embedded file under the project root.
    Local(PathBuf),
    /// No persistence; unit tests only.
    Memory,
    /// Remote-replicated store. The replication transport is an external
    /// collaborator: the handle this build opens is the embedded local
    /// replica, with url and token carried for the transport layer.
    Remote {
        url: String,
        auth_token: String,
        replica: PathBuf,
    },
}

pub fn select_backend(
    project_root: &Path,
    config: &SharkConfig,
    cli_url: Option<&str>,
) -> Result<Backend> {
    let url = cli_url
        .map(str::to_string)
        .or_else(|| config.database.url.clone());

    let forced_local = config.database.backend.as_deref() == Some("local");
    match url {
        Some(u) if u == ":memory:" => Ok(Backend::Memory),
        Some(u) if !forced_local && REMOTE_PREFIXES.iter().any(|p| u.starts_with(p)) => {
            if !config.database.embedded_replica {
                return Err(SharkError::Backend(
                    "remote backend requires database.embedded_replica".into(),
                ));
            }
            let auth_token = load_auth_token(project_root, config)?;
            let replica = project_root.join(".shark").join("replica.db");
            debug!(url = %u, replica = %replica.display(), "selected remote backend");
            Ok(Backend::Remote {
                url: u,
                auth_token,
                replica,
            })
        }
        Some(u) => Ok(Backend::Local(project_root.join(u))),
        None => Ok(Backend::Local(project_root.join(DEFAULT_DB_FILE))),
    }
}

/// Auth tokens come from the environment or an owner-readable token file,
/// never from the config file itself.
fn load_auth_token(project_root: &Path, config: &SharkConfig) -> Result<String> {
    if let Ok(token) = env::var(ENV_AUTH_TOKEN)
        && !token.is_empty()
    {
        return Ok(token);
    }
    let Some(file) = &config.database.auth_token_file else {
        return Err(SharkError::Backend(format!(
            "no auth token: set {ENV_AUTH_TOKEN} or database.auth_token_file"
        )));
    };
    let path = project_root.join(file);
    restrict_token_file(&path)?;
    let token = fs::read_to_string(&path)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(SharkError::Backend(format!(
            "auth token file {} is empty",
            path.display()
        )));
    }
    Ok(token.to_string())
}

#[cfg(unix)]
pub fn restrict_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path)?;
    let mode = metadata.permissions().mode();
    if mode & 0o077 != 0 {
        debug!(path = %path.display(), mode = format!("{:o}", mode & 0o777), "tightening token file to owner-only");
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn restrict_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

pub struct Database {
    conn: Connection,
    backend: Backend,
}

impl Database {
    pub fn open(backend: Backend) -> Result<Self> {
        let conn = match &backend {
            Backend::Local(path) | Backend::Remote { replica: path, .. } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path)?;
                conn.execute_batch(
                    "PRAGMA journal_mode=WAL;\
                     PRAGMA foreign_keys=ON;\
                     PRAGMA busy_timeout=5000;",
                )?;
                conn
            }
            Backend::Memory => {
                let conn = Connection::open_in_memory()?;
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON;\
                     PRAGMA busy_timeout=5000;",
                )?;
                conn
            }
        };
        let db = Self { conn, backend };
        db.create_schema()?;
        Ok(db)
    }

    /// In-memory database for unit tests.
    pub fn open_memory() -> Result<Self> {
        Self::open(Backend::Memory)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS epics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                slug TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                archived INTEGER NOT NULL DEFAULT 0,
                custom_folder_path TEXT,
                file_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_epics_key ON epics(key);
            CREATE INDEX IF NOT EXISTS idx_epics_status ON epics(status);

            CREATE TABLE IF NOT EXISTS features (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                epic_id INTEGER NOT NULL REFERENCES epics(id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                slug TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                progress_pct REAL NOT NULL DEFAULT 0,
                execution_order INTEGER,
                archived INTEGER NOT NULL DEFAULT 0,
                custom_folder_path TEXT,
                file_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_features_key ON features(key);
            CREATE INDEX IF NOT EXISTS idx_features_status ON features(status);
            CREATE INDEX IF NOT EXISTS idx_features_epic ON features(epic_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feature_id INTEGER NOT NULL REFERENCES features(id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                agent_type TEXT,
                assigned_agent TEXT,
                execution_order INTEGER,
                rejection_count INTEGER NOT NULL DEFAULT 0,
                blocked_reason TEXT,
                completed_at TEXT,
                archived INTEGER NOT NULL DEFAULT 0,
                file_path TEXT,
                context_data TEXT,
                files_changed TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_key ON tasks(key);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_feature ON tasks(feature_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_completed ON tasks(completed_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_agent_type ON tasks(agent_type);

            CREATE TABLE IF NOT EXISTS task_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                old_status TEXT,
                new_status TEXT NOT NULL,
                agent TEXT,
                notes TEXT,
                rejection_reason TEXT,
                forced INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_history_task ON task_history(task_id);

            CREATE TABLE IF NOT EXISTS task_relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                to_task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (from_task_id, to_task_id, kind)
            );
            CREATE INDEX IF NOT EXISTS idx_task_relationships_from
                ON task_relationships(from_task_id);

            CREATE TABLE IF NOT EXISTS task_notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                author TEXT,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_notes_task ON task_notes(task_id);

            CREATE TABLE IF NOT EXISTS task_criteria (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                description TEXT NOT NULL,
                met INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_criteria_task ON task_criteria(task_id);

            CREATE TABLE IF NOT EXISTS work_sessions (
                id TEXT PRIMARY KEY,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                agent TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_work_sessions_task ON work_sessions(task_id);

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                file_path TEXT NOT NULL,
                doc_type TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS epic_documents (
                epic_id INTEGER NOT NULL REFERENCES epics(id) ON DELETE CASCADE,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                PRIMARY KEY (epic_id, document_id)
            );

            CREATE TABLE IF NOT EXISTS feature_documents (
                feature_id INTEGER NOT NULL REFERENCES features(id) ON DELETE CASCADE,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                PRIMARY KEY (feature_id, document_id)
            );

            CREATE TABLE IF NOT EXISTS task_documents (
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                PRIMARY KEY (task_id, document_id)
            );

            CREATE TABLE IF NOT EXISTS ideas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Process-wide handle
// ---------------------------------------------------------------------------

static HANDLE: Mutex<Option<Database>> = Mutex::new(None);

/// Run `f` against the process-wide handle, opening it on first use.
/// Commands take the handle from here rather than opening their own.
pub fn with_handle<T>(backend: Backend, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
    let mut guard = HANDLE.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_none() {
        *guard = Some(Database::open(backend)?);
    }
    f(guard.as_ref().expect("handle initialized above"))
}

/// Exit cleanup hook: drop the handle (closing the connection) regardless of
/// command success.
pub fn close_handle() {
    let mut guard = HANDLE.lock().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}

/// Test entry point; never rely on test order.
pub fn reset_handle() {
    close_handle();
}
