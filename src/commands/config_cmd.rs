use std::path::Path;

use crate::config::SharkConfig;
use crate::error::Result;
use crate::output::{self, Format};
use crate::sync::Walker;

/// Render the merged configuration (defaults < file < environment).
pub fn show(config: &SharkConfig, format: Format) -> Result<()> {
    match format {
        Format::Json => output::print_json(config),
        _ => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        }
    }
}

/// Sanity-check the workflow graph, verb mapping, and file patterns.
pub fn validate(project_root: &Path, config: &SharkConfig, format: Format) -> Result<()> {
    let workflow = config.workflow()?;
    Walker::new(project_root, &config.patterns())?;

    let mut warnings: Vec<String> = workflow
        .unreachable_statuses()
        .iter()
        .map(|s| format!("status '{s}' is unreachable from any transition"))
        .collect();
    warnings.extend(
        workflow
            .all_statuses()
            .into_iter()
            .filter(|s| !workflow.is_complete(s) && workflow.allowed_transitions(s).is_empty())
            .map(|s| format!("non-terminal status '{s}' has no outgoing transitions")),
    );

    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({
                "valid": true,
                "statuses": workflow.all_statuses(),
                "start": workflow.start_statuses(),
                "complete": workflow.complete_statuses(),
                "warnings": warnings,
            })
        ),
        _ => {
            println!("configuration is valid");
            for warning in &warnings {
                println!("warning: {warning}");
            }
        }
    }
    Ok(())
}
