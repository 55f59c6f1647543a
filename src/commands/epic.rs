use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::SharkConfig;
use crate::error::{Result, SharkError};
use crate::frontmatter::Frontmatter;
use crate::model;
use crate::output::{self, Format};
use crate::progress;
use crate::store::epics::{EpicPatch, NewEpic};
use crate::store::{CompleteScope, Store};

pub struct Ctx<'a> {
    pub root: &'a Path,
    pub config: &'a SharkConfig,
    pub db_flag: Option<&'a str>,
    pub format: Format,
}

impl Ctx<'_> {
    pub(crate) fn with_store<T>(&self, f: impl FnOnce(&Store<'_>) -> Result<T>) -> Result<T> {
        super::with_store(self.root, self.config, self.db_flag, f)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn create(
    ctx: &Ctx<'_>,
    title: &str,
    description: Option<&str>,
    priority: Option<&str>,
    custom_folder_path: Option<&str>,
    filename: Option<&str>,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let priority = priority.map(model::parse_priority).transpose()?;
    let epic = ctx.with_store(|store| {
        store.create_epic(
            &workflow,
            NewEpic {
                title: title.to_string(),
                description: description.map(str::to_string),
                priority,
                custom_folder_path: custom_folder_path.map(str::to_string),
                explicit_filename: filename.map(str::to_string),
            },
        )
    })?;
    if let Some(file_path) = &epic.file_path {
        super::write_entity_file(ctx.root, file_path, Frontmatter::for_epic(&epic), &epic.title)?;
    }
    output::print_epic(&epic, &workflow, ctx.format)
}

pub fn get(ctx: &Ctx<'_>, key: &str, summary: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    ctx.with_store(|store| {
        if summary {
            let summary = progress::epic_summary(store, &workflow, key)?;
            output::print_epic_summary(&summary, ctx.format)
        } else {
            let epic = store.get_epic_by_key(key)?;
            output::print_epic(&epic, &workflow, ctx.format)
        }
    })
}

pub fn list(ctx: &Ctx<'_>, all: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    ctx.with_store(|store| {
        let epics = store.list_epics(all)?;
        output::print_epics(&epics, &workflow, ctx.format)
    })
}

#[allow(clippy::too_many_arguments)]
pub fn update(
    ctx: &Ctx<'_>,
    key: &str,
    title: Option<&str>,
    description: Option<&str>,
    status: Option<&str>,
    priority: Option<&str>,
    custom_folder_path: Option<&str>,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let priority = priority.map(model::parse_priority).transpose()?;
    let epic = ctx.with_store(|store| {
        store.update_epic(
            &workflow,
            key,
            EpicPatch {
                title: title.map(str::to_string),
                description: description.map(|d| Some(d.to_string())),
                status: status.map(str::to_string),
                priority,
                custom_folder_path: custom_folder_path.map(|p| Some(p.to_string())),
                ..Default::default()
            },
        )
    })?;
    output::print_epic(&epic, &workflow, ctx.format)
}

pub fn delete(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    ctx.with_store(|store| store.delete_epic(key))?;
    match ctx.format {
        Format::Json => println!("{}", serde_json::json!({"deleted": key})),
        _ => println!("deleted {key}"),
    }
    Ok(())
}

/// Complete every task under the epic, reporting the blockers when `force`
/// is off and any task cannot legally finish.
pub fn complete(ctx: &Ctx<'_>, key: &str, agent: Option<&str>, force: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let agent = ctx.config.agent_or_default(agent);
    let report = ctx.with_store(|store| {
        store.bulk_complete(
            &workflow,
            CompleteScope::Epic(key.to_string()),
            agent,
            force,
            &CancelToken::none(),
        )
    })?;
    output::print_bulk_report(&report, ctx.format)?;
    if !report.completed {
        return Err(SharkError::CompletionBlocked(report.most_problematic.len()));
    }
    Ok(())
}

pub fn archive(ctx: &Ctx<'_>, key: &str, unarchive: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let epic = ctx.with_store(|store| {
        store.update_epic(
            &workflow,
            key,
            EpicPatch {
                archived: Some(!unarchive),
                ..Default::default()
            },
        )
    })?;
    output::print_epic(&epic, &workflow, ctx.format)
}
