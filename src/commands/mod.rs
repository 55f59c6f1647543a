pub mod cloud;
pub mod config_cmd;
pub mod doc;
pub mod epic;
pub mod feature;
pub mod idea;
pub mod init;
pub mod sync_cmd;
pub mod task;

use std::path::Path;

use crate::config::SharkConfig;
use crate::db;
use crate::error::Result;
use crate::frontmatter::{EntityFile, Frontmatter};
use crate::paths;
use crate::store::Store;

/// Open the process-wide handle for the selected backend and run `f`
/// against a repository bound to it.
pub(crate) fn with_store<T>(
    project_root: &Path,
    config: &SharkConfig,
    db_flag: Option<&str>,
    f: impl FnOnce(&Store<'_>) -> Result<T>,
) -> Result<T> {
    let backend = db::select_backend(project_root, config, db_flag)?;
    db::with_handle(backend, |db| {
        let store = Store::new(db, project_root);
        f(&store)
    })
}

/// Scaffold the Markdown side of a freshly created entity. The body is a
/// title heading; the prose belongs to humans from here on.
pub(crate) fn write_entity_file(
    project_root: &Path,
    file_path: &str,
    front: Frontmatter,
    title: &str,
) -> Result<()> {
    let absolute = paths::absolute(project_root, Path::new(file_path));
    if absolute.exists() {
        return Ok(());
    }
    let file = EntityFile::new(front, format!("\n# {title}\n"));
    file.write(&absolute)
}
