use std::path::Path;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::SharkConfig;
use crate::db;
use crate::error::{Result, SharkError};
use crate::output::{self, Format};
use crate::store::Store;
use crate::sync::{self, DiscoveryMode, SyncOptions, SyncStrategy, Validation};

#[allow(clippy::too_many_arguments)]
pub fn run(
    project_root: &Path,
    config: &mut SharkConfig,
    db_flag: Option<&str>,
    format: Format,
    strategy: SyncStrategy,
    dry_run: bool,
    create_missing: bool,
    cleanup: bool,
    force_full_scan: bool,
    validation: Validation,
    mode: DiscoveryMode,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let workflow = config.workflow()?;
    let cancel = match timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::none(),
    };
    let options = SyncOptions {
        strategy,
        dry_run,
        create_missing,
        cleanup,
        force_full_scan,
        validation,
        mode,
        cancel,
    };

    let backend = db::select_backend(project_root, config, db_flag)?;
    let report = db::with_handle(backend, |db| {
        let store = Store::new(db, project_root);
        sync::sync(&store, &workflow, config, &options)
    })?;

    output::print_sync_report(&report, format)?;
    if report.timed_out {
        return Err(SharkError::Timeout("sync".into()));
    }
    if !report.conflicts.is_empty() && strategy == SyncStrategy::Manual {
        return Err(SharkError::SyncConflicts(report.conflicts.len()));
    }
    Ok(())
}
