use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SharkError};
use crate::workflow::Workflow;

pub const MAX_TITLE_LEN: usize = 500;
pub const MAX_TEXT_LEN: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Epic {
    pub id: i64,
    pub key: String,
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    pub priority: i64,
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    pub id: i64,
    pub epic_id: i64,
    pub key: String,
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    pub priority: i64,
    /// Recomputed from task statuses; never user-editable.
    pub progress_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<i64>,
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub feature_id: i64,
    pub key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<i64>,
    pub rejection_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// JSON scratch payloads owned by agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row; one per observed status transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskHistoryEntry {
    pub id: i64,
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<String>,
    pub new_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum RelationKind {
    DependsOn,
    Blocks,
    Related,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependsOn => write!(f, "depends_on"),
            Self::Blocks => write!(f, "blocks"),
            Self::Related => write!(f, "related"),
        }
    }
}

impl RelationKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "depends_on" => Ok(Self::DependsOn),
            "blocks" => Ok(Self::Blocks),
            "related" => Ok(Self::Related),
            other => Err(SharkError::ConfigInvalid(format!(
                "unknown relationship kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRelationship {
    pub id: i64,
    pub from_task_id: i64,
    pub to_task_id: i64,
    pub kind: RelationKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskNote {
    pub id: i64,
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCriterion {
    pub id: i64,
    pub task_id: i64,
    pub description: String,
    pub met: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkSession {
    pub id: String,
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Idea {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// Parse a priority argument: an integer 1..=10, or a categorical name.
pub fn parse_priority(input: &str) -> Result<i64> {
    match input {
        "low" => return Ok(2),
        "medium" => return Ok(5),
        "high" => return Ok(8),
        _ => {}
    }
    let n: i64 = input
        .parse()
        .map_err(|_| SharkError::InvalidPriority(input.to_string()))?;
    validate_priority(n)?;
    Ok(n)
}

pub fn validate_priority(priority: i64) -> Result<()> {
    if (1..=10).contains(&priority) {
        Ok(())
    } else {
        Err(SharkError::InvalidPriority(priority.to_string()))
    }
}

pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(SharkError::FieldTooLong("title", 0));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(SharkError::FieldTooLong("title", MAX_TITLE_LEN));
    }
    Ok(())
}

pub fn validate_text(field: &'static str, text: &str) -> Result<()> {
    if text.len() > MAX_TEXT_LEN {
        return Err(SharkError::FieldTooLong(field, MAX_TEXT_LEN));
    }
    Ok(())
}

/// Validate a JSON payload field (context_data, files_changed).
pub fn validate_json_payload(field: &str, payload: &str) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(payload)
        .map(|_| ())
        .map_err(|e| SharkError::InvalidJson(field.to_string(), e.to_string()))
}

/// Resolve deprecated status names to their current equivalents, warning on
/// use. Aliases only apply when the alias itself is not a declared status of
/// the active workflow.
pub fn resolve_status(workflow: &Workflow, status: &str) -> Result<String> {
    if workflow.validate_status(status).is_ok() {
        return Ok(status.to_string());
    }
    let alias = match status {
        "pending" => Some("todo"),
        "done" => Some("completed"),
        "in_review" => Some("ready_for_review"),
        _ => None,
    };
    if let Some(canonical) = alias
        && workflow.validate_status(canonical).is_ok()
    {
        warn!(status, canonical, "deprecated status name; use the canonical form");
        return Ok(canonical.to_string());
    }
    workflow.validate_status(status)?;
    unreachable!("validate_status errors on unknown status");
}
