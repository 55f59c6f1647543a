use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharkError {
    #[error("not a shark project (run `shark init` first)")]
    NotInitialized,

    #[error("shark already initialized in this project")]
    AlreadyInitialized,

    #[error("epic '{0}' not found")]
    EpicNotFound(String),

    #[error("feature '{0}' not found")]
    FeatureNotFound(String),

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("document {0} not found")]
    DocumentNotFound(i64),

    #[error("idea {0} not found")]
    IdeaNotFound(i64),

    #[error("invalid key '{0}': expected {1}")]
    InvalidKey(String, String),

    #[error("unknown status '{status}'; known statuses: [{known}]")]
    InvalidStatus { status: String, known: String },

    #[error("invalid priority '{0}': expected 1-10 or low/medium/high")]
    InvalidPriority(String),

    #[error("invalid JSON in field '{0}': {1}")]
    InvalidJson(String, String),

    #[error("invalid folder path '{path}': {reason}")]
    InvalidFolderPath { path: String, reason: String },

    #[error("field '{0}' exceeds the {1}-character limit")]
    FieldTooLong(&'static str, usize),

    #[error("invalid transition: {from} -> {to}; allowed from '{from}': [{allowed}]")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("unknown workflow verb '{0}'")]
    UnknownVerb(String),

    #[error("key '{0}' already exists")]
    KeyConflict(String),

    #[error("relationship cycle: task '{0}' would depend on itself (directly or transitively)")]
    CycleDetected(String),

    #[error("{0} tasks are not ready for completion; rerun with --force or resolve them first")]
    CompletionBlocked(usize),

    #[error("sync found {0} conflicting items; resolve them or rerun with a non-manual strategy")]
    SyncConflicts(usize),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl SharkError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::AlreadyInitialized => "already_initialized",
            Self::EpicNotFound(_) => "epic_not_found",
            Self::FeatureNotFound(_) => "feature_not_found",
            Self::TaskNotFound(_) => "task_not_found",
            Self::DocumentNotFound(_) => "document_not_found",
            Self::IdeaNotFound(_) => "idea_not_found",
            Self::InvalidKey(_, _) => "invalid_key",
            Self::InvalidStatus { .. } => "invalid_status",
            Self::InvalidPriority(_) => "invalid_priority",
            Self::InvalidJson(_, _) => "invalid_json",
            Self::InvalidFolderPath { .. } => "invalid_folder_path",
            Self::FieldTooLong(_, _) => "field_too_long",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownVerb(_) => "unknown_verb",
            Self::KeyConflict(_) => "key_conflict",
            Self::CycleDetected(_) => "cycle_detected",
            Self::CompletionBlocked(_) => "completion_blocked",
            Self::SyncConflicts(_) => "sync_conflicts",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::Integrity(_) => "integrity_violation",
            Self::Locked(_) => "locked",
            Self::Backend(_) => "backend_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Db(_) => "db_error",
        }
    }

    /// Stable exit-code contract: 0 success, 1 not found, 2 database/IO
    /// failure, 3 invalid state or validation failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EpicNotFound(_)
            | Self::FeatureNotFound(_)
            | Self::TaskNotFound(_)
            | Self::DocumentNotFound(_)
            | Self::IdeaNotFound(_) => 1,
            Self::Io(_)
            | Self::Db(_)
            | Self::Backend(_)
            | Self::Integrity(_)
            | Self::Locked(_)
            | Self::Timeout(_)
            | Self::Cancelled => 2,
            _ => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, SharkError>;
