use std::path::{Component, Path, PathBuf};

use crate::config::DEFAULT_PLAN_ROOT;
use crate::error::{Result, SharkError};
use crate::keys;
use crate::model::{Epic, Feature};

pub const EPIC_FILE: &str = "epic.md";
pub const FEATURE_FILE: &str = "feature.md";
pub const TASKS_DIR: &str = "tasks";

fn reject(path: &str, reason: &str) -> SharkError {
    SharkError::InvalidFolderPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Lexically fold `.` components; `..` never survives to this point.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Validate a user-supplied custom folder path. Rejects empty input,
/// absolute paths, `..` components, and anything that would normalize to a
/// location outside the project root.
pub fn validate_custom_folder_path(project_root: &Path, raw: &str) -> Result<PathBuf> {
    if raw.trim().is_empty() {
        return Err(reject(raw, "must not be empty"));
    }
    let path = Path::new(raw);
    if path.is_absolute() || raw.starts_with('/') {
        return Err(reject(raw, "must be relative to the project root"));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(reject(raw, "must not contain '..'"));
    }
    let resolved = normalize(&project_root.join(path));
    if !resolved.starts_with(normalize(project_root)) {
        return Err(reject(raw, "outside project"));
    }
    Ok(normalize(path))
}

/// Directory holding an epic's file, relative to the project root.
///
/// A custom folder path on the epic relocates the subtree; the epic key is
/// appended as the canonical subfolder either way.
pub fn epic_dir(project_root: &Path, epic: &Epic) -> Result<PathBuf> {
    let base = match &epic.custom_folder_path {
        Some(custom) => validate_custom_folder_path(project_root, custom)?,
        None => PathBuf::from(DEFAULT_PLAN_ROOT),
    };
    Ok(base.join(&epic.key))
}

/// Canonical epic file location (project-root relative). An explicit
/// filename override wins verbatim.
pub fn epic_file_path(
    project_root: &Path,
    epic: &Epic,
    explicit: Option<&str>,
) -> Result<PathBuf> {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return Ok(PathBuf::from(name));
    }
    Ok(epic_dir(project_root, epic)?.join(EPIC_FILE))
}

/// Directory holding a feature's file.
///
/// Precedence: the feature's own custom folder path, then the epic's stored
/// file location (so slug-decorated directories on disk keep winning over
/// key reconstruction), then the epic's custom folder path, then the
/// default layout.
pub fn feature_dir(project_root: &Path, epic: &Epic, feature: &Feature) -> Result<PathBuf> {
    if let Some(custom) = &feature.custom_folder_path {
        let base = validate_custom_folder_path(project_root, custom)?;
        return Ok(base.join(&feature.key));
    }
    if let Some(stored) = &epic.file_path {
        let epic_file = PathBuf::from(stored);
        if let Some(parent) = epic_file.parent() {
            return Ok(parent.join(&feature.key));
        }
    }
    Ok(epic_dir(project_root, epic)?.join(&feature.key))
}

pub fn feature_file_path(
    project_root: &Path,
    epic: &Epic,
    feature: &Feature,
    explicit: Option<&str>,
) -> Result<PathBuf> {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return Ok(PathBuf::from(name));
    }
    Ok(feature_dir(project_root, epic, feature)?.join(FEATURE_FILE))
}

/// Directory holding a feature's task files. Derived from the feature's
/// stored file location when present, never reconstructed from keys alone.
pub fn task_dir(project_root: &Path, epic: &Epic, feature: &Feature) -> Result<PathBuf> {
    if let Some(stored) = &feature.file_path {
        let feature_file = PathBuf::from(stored);
        if let Some(parent) = feature_file.parent() {
            return Ok(parent.join(TASKS_DIR));
        }
    }
    Ok(feature_dir(project_root, epic, feature)?.join(TASKS_DIR))
}

pub fn task_file_path(
    project_root: &Path,
    epic: &Epic,
    feature: &Feature,
    task_key: &str,
    title: &str,
    explicit: Option<&str>,
) -> Result<PathBuf> {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return Ok(PathBuf::from(name));
    }
    Ok(task_dir(project_root, epic, feature)?.join(keys::filename_for(task_key, title)))
}

/// Absolute location for filesystem I/O.
pub fn absolute(project_root: &Path, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        relative.to_path_buf()
    } else {
        project_root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn epic(key: &str, custom: Option<&str>, file_path: Option<&str>) -> Epic {
        let now = Utc::now();
        Epic {
            id: 1,
            key: key.into(),
            slug: "epic".into(),
            title: "Epic".into(),
            description: None,
            status: "todo".into(),
            priority: 5,
            archived: false,
            custom_folder_path: custom.map(Into::into),
            file_path: file_path.map(Into::into),
            created_at: now,
            updated_at: now,
        }
    }

    fn feature(key: &str, custom: Option<&str>, file_path: Option<&str>) -> Feature {
        let now = Utc::now();
        Feature {
            id: 1,
            epic_id: 1,
            key: key.into(),
            slug: "feature".into(),
            title: "Feature".into(),
            description: None,
            status: "todo".into(),
            priority: 5,
            progress_pct: 0.0,
            execution_order: None,
            archived: false,
            custom_folder_path: custom.map(Into::into),
            file_path: file_path.map(Into::into),
            created_at: now,
            updated_at: now,
        }
    }

    fn root() -> PathBuf {
        PathBuf::from("/project")
    }

    #[test]
    fn custom_path_rejections() {
        let root = root();
        assert!(validate_custom_folder_path(&root, "").is_err());
        assert!(validate_custom_folder_path(&root, "   ").is_err());
        assert!(validate_custom_folder_path(&root, "/etc/docs").is_err());
        assert!(validate_custom_folder_path(&root, "../outside").is_err());
        assert!(validate_custom_folder_path(&root, "docs/../../up").is_err());
        assert!(validate_custom_folder_path(&root, "docs/roadmap").is_ok());
        assert!(validate_custom_folder_path(&root, "./docs/roadmap").is_ok());
    }

    #[test]
    fn default_layout() {
        let root = root();
        let e = epic("E01", None, None);
        assert_eq!(
            epic_file_path(&root, &e, None).unwrap(),
            PathBuf::from("docs/plan/E01/epic.md")
        );
        let f = feature("E01-F01", None, None);
        assert_eq!(
            feature_file_path(&root, &e, &f, None).unwrap(),
            PathBuf::from("docs/plan/E01/E01-F01/feature.md")
        );
        assert_eq!(
            task_file_path(&root, &e, &f, "T-E01-F01-001", "Build login form", None).unwrap(),
            PathBuf::from("docs/plan/E01/E01-F01/tasks/T-E01-F01-001-build-login-form.md")
        );
    }

    #[test]
    fn epic_custom_folder_relocates_descendants() {
        let root = root();
        let e = epic("E02", Some("docs/roadmap/2025-q1"), None);
        let f = feature("E02-F01", None, None);
        assert_eq!(
            feature_file_path(&root, &e, &f, None).unwrap(),
            PathBuf::from("docs/roadmap/2025-q1/E02/E02-F01/feature.md")
        );
        assert_eq!(
            task_file_path(&root, &e, &f, "T-E02-F01-001", "", None).unwrap(),
            PathBuf::from("docs/roadmap/2025-q1/E02/E02-F01/tasks/T-E02-F01-001.md")
        );
    }

    #[test]
    fn feature_custom_folder_beats_epic_custom() {
        let root = root();
        let e = epic("E02", Some("docs/roadmap"), None);
        let f = feature("E02-F01", Some("docs/special"), None);
        assert_eq!(
            feature_file_path(&root, &e, &f, None).unwrap(),
            PathBuf::from("docs/special/E02-F01/feature.md")
        );
    }

    #[test]
    fn stored_parent_file_path_wins_over_key_reconstruction() {
        let root = root();
        // Feature lives under a slug-decorated epic directory on disk while
        // custom_folder_path is null; the stored file_path must drive
        // descendant resolution.
        let e = epic(
            "E10",
            None,
            Some("docs/plan/E10-advanced-analytics/epic.md"),
        );
        let f = feature(
            "E10-F01",
            None,
            Some("docs/plan/E10-advanced-analytics/E10-F01/feature.md"),
        );
        assert_eq!(
            feature_dir(&root, &e, &f).unwrap(),
            PathBuf::from("docs/plan/E10-advanced-analytics/E10-F01")
        );
        assert_eq!(
            task_file_path(&root, &e, &f, "T-E10-F01-001", "", None).unwrap(),
            PathBuf::from("docs/plan/E10-advanced-analytics/E10-F01/tasks/T-E10-F01-001.md")
        );
    }

    #[test]
    fn explicit_filename_wins_verbatim() {
        let root = root();
        let e = epic("E01", None, None);
        let f = feature("E01-F01", None, None);
        assert_eq!(
            task_file_path(
                &root,
                &e,
                &f,
                "T-E01-F01-001",
                "whatever",
                Some("notes/custom-task.md")
            )
            .unwrap(),
            PathBuf::from("notes/custom-task.md")
        );
    }

    #[test]
    fn resolved_paths_stay_inside_project_root() {
        let root = root();
        let e = epic("E03", Some("docs/nested/deep"), None);
        let f = feature("E03-F01", None, None);
        let rel = task_file_path(&root, &e, &f, "T-E03-F01-001", "x", None).unwrap();
        let abs = absolute(&root, &rel);
        assert!(abs.starts_with(&root));
    }
}
