use std::fs;
use std::path::Path;

use crate::config::{DEFAULT_PLAN_ROOT, SharkConfig, default_file_patterns};
use crate::error::{Result, SharkError};
use crate::output::Format;
use crate::workflow::Workflow;

/// Scaffold `.sharkconfig.json`, the plan root, and the database schema.
pub fn run(project_root: &Path, format: Format) -> Result<()> {
    if SharkConfig::path(project_root).exists() {
        return Err(SharkError::AlreadyInitialized);
    }

    let config = SharkConfig {
        status_flow: Some(Workflow::default_graph()),
        special_statuses: Some(Workflow::default_special()),
        status_verbs: Some(Workflow::default_verbs()),
        file_patterns: default_file_patterns(),
        ..Default::default()
    };
    config.workflow()?;
    config.save(project_root)?;
    fs::create_dir_all(project_root.join(DEFAULT_PLAN_ROOT))?;

    // Opening the handle creates the database file and schema.
    super::with_store(project_root, &config, None, |_store| Ok(()))?;

    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({"initialized": true, "root": project_root.display().to_string()})
        ),
        _ => println!("initialized shark project at {}", project_root.display()),
    }
    Ok(())
}
