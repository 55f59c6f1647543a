use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SharkError};
use crate::workflow::{SpecialStatuses, Workflow};

pub const CONFIG_FILE: &str = ".sharkconfig.json";
pub const DEFAULT_DB_FILE: &str = "shark-tasks.db";
pub const DEFAULT_PLAN_ROOT: &str = "docs/plan";

pub const ENV_DB_URL: &str = "SHARK_DB_URL";
pub const ENV_AUTH_TOKEN: &str = "SHARK_AUTH_TOKEN";
pub const ENV_PROJECT_ROOT: &str = "SHARK_PROJECT_ROOT";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// "local" or "turso".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// File path, `:memory:`, or a `libsql://`/`https://` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Owner-readable file holding the auth token. Tokens never live in the
    /// config file itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_file: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub embedded_replica: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-status display metadata. Advisory only; transitions never consult it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_types: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharkConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_flow: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_statuses: Option<SpecialStatuses>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_verbs: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status_metadata: BTreeMap<String, StatusMetadata>,
    /// Pattern tag -> filename regex, consumed by the discovery walker.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_patterns: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_enabled: Option<bool>,
    /// Watermark advanced by the sync engine after each successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Unknown keys survive read -> write untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for SharkConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            status_flow: None,
            special_statuses: None,
            status_verbs: None,
            status_metadata: BTreeMap::new(),
            file_patterns: BTreeMap::new(),
            default_agent: None,
            color_enabled: None,
            last_sync_time: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl SharkConfig {
    pub fn path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_FILE)
    }

    /// Load the config file, falling back to defaults when absent, then
    /// apply environment overrides (defaults < file < environment; CLI flags
    /// override later at the call site).
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = Self::path(project_root);
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| SharkError::ConfigInvalid(format!("{}: {e}", path.display())))?
        } else {
            debug!(path = %path.display(), "no config file; using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var(ENV_DB_URL)
            && !url.is_empty()
        {
            self.database.url = Some(url);
        }
        if env::var_os("NO_COLOR").is_some() {
            self.color_enabled = Some(false);
        }
    }

    /// Write the config back, preserving unknown keys. Output is pretty
    /// JSON with a trailing newline so files stay diff-friendly.
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let mut rendered = serde_json::to_string_pretty(self)?;
        rendered.push('\n');
        fs::write(Self::path(project_root), rendered)?;
        Ok(())
    }

    /// Build the workflow engine from this config, defaulting any missing
    /// section. The engine is immutable for the lifetime of a command.
    pub fn workflow(&self) -> Result<Workflow> {
        let graph = self
            .status_flow
            .clone()
            .unwrap_or_else(Workflow::default_graph);
        let special = self
            .special_statuses
            .clone()
            .unwrap_or_else(Workflow::default_special);
        let verbs = self
            .status_verbs
            .clone()
            .unwrap_or_else(Workflow::default_verbs);
        Workflow::new(graph, special, verbs)
    }

    /// Effective file patterns: defaults overlaid with user additions.
    pub fn patterns(&self) -> BTreeMap<String, String> {
        let mut patterns = default_file_patterns();
        for (tag, pattern) in &self.file_patterns {
            patterns.insert(tag.clone(), pattern.clone());
        }
        patterns
    }

    pub fn agent_or_default<'a>(&'a self, agent: Option<&'a str>) -> Option<&'a str> {
        agent.or(self.default_agent.as_deref())
    }

    pub fn color_enabled(&self) -> bool {
        self.color_enabled.unwrap_or(true)
    }
}

pub fn default_file_patterns() -> BTreeMap<String, String> {
    let mut patterns = BTreeMap::new();
    patterns.insert("epic".into(), r"^epic\.md$".into());
    patterns.insert("feature".into(), r"^feature\.md$".into());
    patterns.insert("task".into(), r"^T-E\d+-F\d+-\d+.*\.md$".into());
    patterns.insert("prp".into(), r"^.*-prp\.md$".into());
    patterns
}

/// Locate the project root: pinned by environment, else the nearest ancestor
/// of the working directory holding a config file, else the working
/// directory itself.
pub fn project_root() -> Result<PathBuf> {
    if let Ok(pinned) = env::var(ENV_PROJECT_ROOT)
        && !pinned.is_empty()
    {
        return Ok(PathBuf::from(pinned));
    }
    let cwd = env::current_dir()?;
    let mut dir = cwd.as_path();
    loop {
        if dir.join(CONFIG_FILE).exists() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Ok(cwd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = SharkConfig::load(dir.path()).unwrap();
        assert!(config.status_flow.is_none());
        assert!(config.database.url.is_none());
        config.workflow().unwrap();
    }

    #[test]
    fn round_trip_preserves_unknown_keys() {
        let dir = tempdir().unwrap();
        fs::write(
            SharkConfig::path(dir.path()),
            r#"{
  "default_agent": "claude",
  "future_option": {"nested": true}
}"#,
        )
        .unwrap();
        let config = SharkConfig::load(dir.path()).unwrap();
        assert_eq!(config.default_agent.as_deref(), Some("claude"));
        config.save(dir.path()).unwrap();
        let raw = fs::read_to_string(SharkConfig::path(dir.path())).unwrap();
        assert!(raw.contains("future_option"));
        assert!(raw.contains("nested"));
    }

    #[test]
    fn custom_workflow_section_is_used() {
        let dir = tempdir().unwrap();
        fs::write(
            SharkConfig::path(dir.path()),
            r#"{
  "status_flow": {
    "backlog": ["in_development"],
    "in_development": ["ready_for_code_review"],
    "ready_for_code_review": ["shipped"],
    "shipped": []
  },
  "special_statuses": {
    "_start_": ["backlog"],
    "_complete_": ["shipped"]
  },
  "status_verbs": {
    "start": "in_development",
    "complete": "ready_for_code_review",
    "approve": "shipped"
  }
}"#,
        )
        .unwrap();
        let config = SharkConfig::load(dir.path()).unwrap();
        let wf = config.workflow().unwrap();
        assert!(wf.can_transition("in_development", "ready_for_code_review"));
        assert_eq!(wf.verb_target("complete").unwrap(), "ready_for_code_review");
        assert_eq!(wf.initial_status(), "backlog");
    }

    #[test]
    fn invalid_workflow_section_is_a_config_error() {
        let dir = tempdir().unwrap();
        fs::write(
            SharkConfig::path(dir.path()),
            r#"{"status_flow": {"todo": ["nowhere"]}}"#,
        )
        .unwrap();
        let config = SharkConfig::load(dir.path()).unwrap();
        assert!(matches!(
            config.workflow(),
            Err(SharkError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn user_patterns_overlay_defaults() {
        let config = SharkConfig {
            file_patterns: BTreeMap::from([("design".to_string(), r"^.*-design\.md$".to_string())]),
            ..Default::default()
        };
        let patterns = config.patterns();
        assert!(patterns.contains_key("task"));
        assert!(patterns.contains_key("prp"));
        assert_eq!(patterns.get("design").unwrap(), r"^.*-design\.md$");
    }

    #[test]
    fn last_sync_time_round_trips() {
        let dir = tempdir().unwrap();
        let mut config = SharkConfig::default();
        let stamp: DateTime<Utc> = "2025-06-01T12:00:00Z".parse().unwrap();
        config.last_sync_time = Some(stamp);
        config.save(dir.path()).unwrap();
        let loaded = SharkConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.last_sync_time, Some(stamp));
    }
}
