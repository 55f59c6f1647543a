use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::DEFAULT_PLAN_ROOT;
use crate::error::{Result, SharkError};

/// How strictly ill-formed files are treated during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum Validation {
    /// First error aborts the run.
    Strict,
    /// Skip bad files, keep their errors in the report.
    #[default]
    Balanced,
    /// Accept what parses, warn about the rest.
    Permissive,
}

/// Source selection for discovery: the folder walk, the index file at the
/// plan root, or both merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum DiscoveryMode {
    #[default]
    Folder,
    Index,
    Merged,
}

pub const INDEX_FILE: &str = "index.md";

#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Absolute path for I/O.
    pub path: PathBuf,
    /// Project-root-relative path, as stored in `file_path` columns.
    pub rel: PathBuf,
    pub tag: String,
    pub modified: DateTime<Utc>,
    /// Newer than the sync watermark (always true on a full scan). Files
    /// are still reported when unchanged so orphan detection sees the full
    /// set; the engine skips unchanged pairs cheaply.
    pub changed: bool,
}

pub struct Walker {
    project_root: PathBuf,
    patterns: Vec<(String, Regex)>,
    watermark: Option<DateTime<Utc>>,
    mode: DiscoveryMode,
}

impl Walker {
    /// Compile the configured pattern set. Pattern tags are ordered; the
    /// first matching pattern names the tag of a discovered file.
    pub fn new(project_root: &Path, patterns: &BTreeMap<String, String>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for (tag, pattern) in patterns {
            let re = Regex::new(pattern).map_err(|e| {
                SharkError::ConfigInvalid(format!("file_patterns.{tag}: {e}"))
            })?;
            compiled.push((tag.clone(), re));
        }
        Ok(Self {
            project_root: project_root.to_path_buf(),
            patterns: compiled,
            watermark: None,
            mode: DiscoveryMode::default(),
        })
    }

    pub fn watermark(mut self, watermark: Option<DateTime<Utc>>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn mode(mut self, mode: DiscoveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Produce the discovered set, sorted by relative path.
    pub fn walk(&self) -> Result<Vec<DiscoveredFile>> {
        let mut found = Vec::new();
        match self.mode {
            DiscoveryMode::Folder => self.walk_dir(&self.project_root, &mut found)?,
            DiscoveryMode::Index => self.read_index(&mut found)?,
            DiscoveryMode::Merged => {
                self.walk_dir(&self.project_root, &mut found)?;
                self.read_index(&mut found)?;
            }
        }
        found.sort_by(|a, b| a.rel.cmp(&b.rel));
        found.dedup_by(|a, b| a.rel == b.rel);
        Ok(found)
    }

    fn walk_dir(&self, dir: &Path, found: &mut Vec<DiscoveredFile>) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() {
                // Dot directories and build trees are never plan content.
                if name.starts_with('.') || name == "node_modules" || name == "target" {
                    continue;
                }
                self.walk_dir(&path, found)?;
            } else if let Some(file) = self.classify(&path, &name)? {
                found.push(file);
            }
        }
        Ok(())
    }

    fn classify(&self, path: &Path, name: &str) -> Result<Option<DiscoveredFile>> {
        let Some((tag, _)) = self.patterns.iter().find(|(_, re)| re.is_match(name)) else {
            return Ok(None);
        };
        let metadata = fs::metadata(path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        let changed = self.watermark.is_none_or(|mark| modified > mark);
        let rel = path
            .strip_prefix(&self.project_root)
            .unwrap_or(path)
            .to_path_buf();
        debug!(rel = %rel.display(), tag, changed, "discovered");
        Ok(Some(DiscoveredFile {
            path: path.to_path_buf(),
            rel,
            tag: tag.clone(),
            modified,
            changed,
        }))
    }

    /// Parse the plan-root index file: one path per line, markdown bullets
    /// tolerated, `#` lines ignored. Entries are project-root relative.
    fn read_index(&self, found: &mut Vec<DiscoveredFile>) -> Result<()> {
        let index_path = self.project_root.join(DEFAULT_PLAN_ROOT).join(INDEX_FILE);
        if !index_path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(&index_path)?;
        for line in raw.lines() {
            let line = line.trim();
            let line = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .unwrap_or(line);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let path = self.project_root.join(line);
            if !path.is_file() {
                warn!(entry = line, "index entry does not exist; skipping");
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(file) = self.classify(&path, &name)? {
                found.push(file);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_file_patterns;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn scaffold(root: &Path) {
        touch(root, "docs/plan/E01/epic.md", "---\nkey: E01\n---\n");
        touch(
            root,
            "docs/plan/E01/E01-F01/feature.md",
            "---\nkey: E01-F01\n---\n",
        );
        touch(
            root,
            "docs/plan/E01/E01-F01/tasks/T-E01-F01-001-login.md",
            "---\nkey: T-E01-F01-001\n---\n",
        );
        touch(root, "docs/plan/E01/notes.md", "not an entity file\n");
        touch(root, "README.md", "# readme\n");
    }

    #[test]
    fn walk_matches_patterns_and_skips_noise() {
        let dir = tempdir().unwrap();
        scaffold(dir.path());
        let walker = Walker::new(dir.path(), &default_file_patterns()).unwrap();
        let files = walker.walk().unwrap();
        let tags: Vec<(String, String)> = files
            .iter()
            .map(|f| (f.rel.display().to_string(), f.tag.clone()))
            .collect();
        assert_eq!(
            tags,
            vec![
                ("docs/plan/E01/E01-F01/feature.md".into(), "feature".into()),
                (
                    "docs/plan/E01/E01-F01/tasks/T-E01-F01-001-login.md".into(),
                    "task".into()
                ),
                ("docs/plan/E01/epic.md".into(), "epic".into()),
            ]
        );
    }

    #[test]
    fn watermark_marks_old_files_unchanged() {
        let dir = tempdir().unwrap();
        scaffold(dir.path());
        let future = Utc::now() + chrono::Duration::hours(1);
        let walker = Walker::new(dir.path(), &default_file_patterns())
            .unwrap()
            .watermark(Some(future));
        let files = walker.walk().unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| !f.changed));

        let past = Utc::now() - chrono::Duration::hours(1);
        let walker = Walker::new(dir.path(), &default_file_patterns())
            .unwrap()
            .watermark(Some(past));
        assert!(walker.walk().unwrap().iter().all(|f| f.changed));
    }

    #[test]
    fn files_outside_plan_root_are_found_for_custom_folders() {
        let dir = tempdir().unwrap();
        touch(
            dir.path(),
            "docs/roadmap/2025-q1/E02/epic.md",
            "---\nkey: E02\n---\n",
        );
        let walker = Walker::new(dir.path(), &default_file_patterns()).unwrap();
        let files = walker.walk().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].tag, "epic");
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let dir = tempdir().unwrap();
        let mut patterns = default_file_patterns();
        patterns.insert("broken".into(), "([".into());
        assert!(matches!(
            Walker::new(dir.path(), &patterns),
            Err(SharkError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn index_mode_reads_listed_entries_only() {
        let dir = tempdir().unwrap();
        scaffold(dir.path());
        touch(
            dir.path(),
            "docs/plan/index.md",
            "# plan index\n- docs/plan/E01/epic.md\n- docs/plan/missing/epic.md\n",
        );
        let walker = Walker::new(dir.path(), &default_file_patterns())
            .unwrap()
            .mode(DiscoveryMode::Index);
        let files = walker.walk().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel, PathBuf::from("docs/plan/E01/epic.md"));
    }

    #[test]
    fn merged_mode_dedups_by_path() {
        let dir = tempdir().unwrap();
        scaffold(dir.path());
        touch(
            dir.path(),
            "docs/plan/index.md",
            "- docs/plan/E01/epic.md\n",
        );
        let walker = Walker::new(dir.path(), &default_file_patterns())
            .unwrap()
            .mode(DiscoveryMode::Merged);
        let files = walker.walk().unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn user_pattern_tags_match_first() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "docs/plan/E01/auth-prp.md", "prp\n");
        let walker = Walker::new(dir.path(), &default_file_patterns()).unwrap();
        let files = walker.walk().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].tag, "prp");
    }
}
