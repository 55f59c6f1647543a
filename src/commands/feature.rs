use crate::cancel::CancelToken;
use crate::error::{Result, SharkError};
use crate::frontmatter::Frontmatter;
use crate::model;
use crate::output::{self, Format};
use crate::progress;
use crate::store::CompleteScope;
use crate::store::features::{FeaturePatch, NewFeature};

use super::epic::Ctx;

#[allow(clippy::too_many_arguments)]
pub fn create(
    ctx: &Ctx<'_>,
    epic_key: &str,
    title: &str,
    description: Option<&str>,
    priority: Option<&str>,
    execution_order: Option<i64>,
    custom_folder_path: Option<&str>,
    filename: Option<&str>,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let priority = priority.map(model::parse_priority).transpose()?;
    let feature = ctx.with_store(|store| {
        store.create_feature(
            &workflow,
            epic_key,
            NewFeature {
                title: title.to_string(),
                description: description.map(str::to_string),
                priority,
                execution_order,
                custom_folder_path: custom_folder_path.map(str::to_string),
                explicit_filename: filename.map(str::to_string),
            },
        )
    })?;
    if let Some(file_path) = &feature.file_path {
        super::write_entity_file(
            ctx.root,
            file_path,
            Frontmatter::for_feature(&feature),
            &feature.title,
        )?;
    }
    output::print_feature(&feature, &workflow, ctx.format)
}

pub fn get(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    ctx.with_store(|store| {
        let feature = store.get_feature_by_key(key)?;
        output::print_feature(&feature, &workflow, ctx.format)
    })
}

pub fn list(ctx: &Ctx<'_>, epic_key: Option<&str>, all: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    ctx.with_store(|store| {
        let features = store.list_features(epic_key, all)?;
        output::print_features(&features, &workflow, ctx.format)
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
    execution_order: Option<i64>,
    custom_folder_path: Option<&str>,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let priority = priority.map(model::parse_priority).transpose()?;
    let feature = ctx.with_store(|store| {
        store.update_feature(
            &workflow,
            key,
            FeaturePatch {
                title: title.map(str::to_string),
                description: description.map(|d| Some(d.to_string())),
                status: status.map(str::to_string),
                priority,
                execution_order: execution_order.map(Some),
                custom_folder_path: custom_folder_path.map(|p| Some(p.to_string())),
                ..Default::default()
            },
        )
    })?;
    output::print_feature(&feature, &workflow, ctx.format)
}

pub fn delete(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    ctx.with_store(|store| store.delete_feature(key))?;
    match ctx.format {
        Format::Json => println!("{}", serde_json::json!({"deleted": key})),
        _ => println!("deleted {key}"),
    }
    Ok(())
}

pub fn complete(ctx: &Ctx<'_>, key: &str, agent: Option<&str>, force: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let agent = ctx.config.agent_or_default(agent);
    let report = ctx.with_store(|store| {
        store.bulk_complete(
            &workflow,
            CompleteScope::Feature(key.to_string()),
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
    let feature = ctx.with_store(|store| {
        store.update_feature(
            &workflow,
            key,
            FeaturePatch {
                archived: Some(!unarchive),
                ..Default::default()
            },
        )
    })?;
    output::print_feature(&feature, &workflow, ctx.format)
}

/// Recompute and print the stored progress figure for one feature.
pub fn refresh_progress(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let pct = ctx.with_store(|store| progress::recompute_feature_progress(store, &workflow, key))?;
    match ctx.format {
        Format::Json => println!("{}", serde_json::json!({"feature": key, "progress_pct": pct})),
        _ => println!("{key}: {pct:.0}%"),
    }
    Ok(())
}
