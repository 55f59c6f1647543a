use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::frontmatter::Frontmatter;
use crate::model::{self, RelationKind};
use crate::output::{self, Format};
use crate::store::tasks::{NewTask, TaskPatch};
use crate::store::{StatusChange, TaskFilter};

use super::epic::Ctx;

#[allow(clippy::too_many_arguments)]
pub fn create(
    ctx: &Ctx<'_>,
    feature_key: &str,
    title: &str,
    description: Option<&str>,
    priority: Option<&str>,
    agent_type: Option<&str>,
    execution_order: Option<i64>,
    filename: Option<&str>,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let priority = priority.map(model::parse_priority).transpose()?;
    let task = ctx.with_store(|store| {
        store.create_task(
            &workflow,
            feature_key,
            NewTask {
                title: title.to_string(),
                description: description.map(str::to_string),
                priority,
                agent_type: agent_type.map(str::to_string),
                execution_order,
                explicit_filename: filename.map(str::to_string),
                agent: ctx.config.default_agent.clone(),
            },
        )
    })?;
    if let Some(file_path) = &task.file_path {
        super::write_entity_file(
            ctx.root,
            file_path,
            Frontmatter::for_task(&task, vec![]),
            &task.title,
        )?;
    }
    output::print_task(&task, &workflow, ctx.format)
}

pub fn get(ctx: &Ctx<'_>, key: &str, history: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    ctx.with_store(|store| {
        let task = store.get_task_by_key(key)?;
        output::print_task(&task, &workflow, ctx.format)?;
        if history {
            let entries = store.list_history(task.id)?;
            output::print_history(&entries, ctx.format)?;
        }
        Ok(())
    })
}

#[allow(clippy::too_many_arguments)]
pub fn list(
    ctx: &Ctx<'_>,
    status: Option<&str>,
    epic: Option<&str>,
    feature: Option<&str>,
    agent_type: Option<&str>,
    assigned_agent: Option<&str>,
    order_min: Option<i64>,
    order_max: Option<i64>,
    completed_after: Option<DateTime<Utc>>,
    completed_before: Option<DateTime<Utc>>,
    all: bool,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let status = status
        .map(|s| model::resolve_status(&workflow, s))
        .transpose()?;
    let filter = TaskFilter {
        status,
        epic_key: epic.map(str::to_string),
        feature_key: feature.map(str::to_string),
        agent_type: agent_type.map(str::to_string),
        assigned_agent: assigned_agent.map(str::to_string),
        execution_order_min: order_min,
        execution_order_max: order_max,
        include_archived: all,
        completed_after,
        completed_before,
    };
    ctx.with_store(|store| {
        let tasks = store.list_tasks(&filter)?;
        output::print_tasks(&tasks, &workflow, ctx.format)
    })
}

#[allow(clippy::too_many_arguments)]
pub fn update(
    ctx: &Ctx<'_>,
    key: &str,
    title: Option<&str>,
    description: Option<&str>,
    priority: Option<&str>,
    agent_type: Option<&str>,
    assigned_agent: Option<&str>,
    execution_order: Option<i64>,
    context_data: Option<&str>,
    files_changed: Option<&str>,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let priority = priority.map(model::parse_priority).transpose()?;
    let task = ctx.with_store(|store| {
        store.update_task(
            key,
            TaskPatch {
                title: title.map(str::to_string),
                description: description.map(|d| Some(d.to_string())),
                priority,
                agent_type: agent_type.map(|a| Some(a.to_string())),
                assigned_agent: assigned_agent.map(|a| Some(a.to_string())),
                execution_order: execution_order.map(Some),
                context_data: context_data.map(|c| Some(c.to_string())),
                files_changed: files_changed.map(|f| Some(f.to_string())),
                ..Default::default()
            },
        )
    })?;
    output::print_task(&task, &workflow, ctx.format)
}

pub fn delete(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    ctx.with_store(|store| store.delete_task(key))?;
    match ctx.format {
        Format::Json => println!("{}", serde_json::json!({"deleted": key})),
        _ => println!("deleted {key}"),
    }
    Ok(())
}

pub fn archive(ctx: &Ctx<'_>, key: &str, unarchive: bool) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let task = ctx.with_store(|store| {
        store.update_task(
            key,
            TaskPatch {
                archived: Some(!unarchive),
                ..Default::default()
            },
        )
    })?;
    output::print_task(&task, &workflow, ctx.format)
}

/// Options shared by the task-state verbs.
#[derive(Debug, Default, Clone)]
pub struct VerbArgs<'a> {
    pub agent: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub force: bool,
}

/// Run a workflow verb: the target status comes from the `status_verbs`
/// config mapping, never from code.
pub fn verb(ctx: &Ctx<'_>, verb: &str, key: &str, args: VerbArgs<'_>) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let target = workflow.verb_target(verb)?.to_string();
    let agent = ctx.config.agent_or_default(args.agent);
    let starting = verb == "start";
    let reopening = verb == "reopen";
    let blocking = verb == "block";

    let task = ctx.with_store(|store| {
        let task = store.update_status(
            &workflow,
            key,
            StatusChange {
                new_status: &target,
                agent,
                notes: args.notes,
                rejection_reason: reopening.then_some(args.reason).flatten(),
                blocked_reason: blocking.then_some(args.reason).flatten(),
                assign_agent: starting.then_some(agent).flatten(),
                forced: args.force,
            },
        )?;
        if starting {
            store.open_work_session(key, agent)?;
        }
        store.recompute_feature_progress(&workflow, task.feature_id)?;
        Ok(task)
    })?;
    output::print_task(&task, &workflow, ctx.format)
}

/// Direct status write for statuses no verb maps to (custom workflows,
/// migrations). Honors the same workflow checks and history contract.
pub fn set_status(
    ctx: &Ctx<'_>,
    key: &str,
    status: &str,
    args: VerbArgs<'_>,
) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let status = model::resolve_status(&workflow, status)?;
    let agent = ctx.config.agent_or_default(args.agent);
    let task = ctx.with_store(|store| {
        let task = store.update_status(
            &workflow,
            key,
            StatusChange {
                new_status: &status,
                agent,
                notes: args.notes,
                rejection_reason: None,
                blocked_reason: args.reason,
                assign_agent: None,
                forced: args.force,
            },
        )?;
        store.recompute_feature_progress(&workflow, task.feature_id)?;
        Ok(task)
    })?;
    output::print_task(&task, &workflow, ctx.format)
}

// ---------------------------------------------------------------------------
// Notes, criteria, relationships, sessions
// ---------------------------------------------------------------------------

pub fn note_add(ctx: &Ctx<'_>, key: &str, body: &str, author: Option<&str>) -> Result<()> {
    let author = ctx.config.agent_or_default(author);
    let note = ctx.with_store(|store| store.add_note(key, author, body))?;
    match ctx.format {
        Format::Json => output::print_json(&note),
        _ => {
            println!("note {} added to {key}", note.id);
            Ok(())
        }
    }
}

pub fn note_list(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    let notes = ctx.with_store(|store| store.list_notes(key))?;
    match ctx.format {
        Format::Json => output::print_json(&notes),
        _ => {
            for note in notes {
                let author = note.author.as_deref().unwrap_or("-");
                println!("[{}] {}: {}", note.created_at.to_rfc3339(), author, note.body);
            }
            Ok(())
        }
    }
}

pub fn criterion_add(ctx: &Ctx<'_>, key: &str, description: &str) -> Result<()> {
    let criterion = ctx.with_store(|store| store.add_criterion(key, description))?;
    match ctx.format {
        Format::Json => output::print_json(&criterion),
        _ => {
            println!("criterion {} added to {key}", criterion.id);
            Ok(())
        }
    }
}

pub fn criterion_list(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    let criteria = ctx.with_store(|store| store.list_criteria(key))?;
    match ctx.format {
        Format::Json => output::print_json(&criteria),
        _ => {
            for criterion in criteria {
                let mark = if criterion.met { "x" } else { " " };
                println!("[{mark}] {} {}", criterion.id, criterion.description);
            }
            Ok(())
        }
    }
}

pub fn criterion_check(ctx: &Ctx<'_>, id: i64, unmet: bool) -> Result<()> {
    ctx.with_store(|store| store.set_criterion_met(id, !unmet))?;
    match ctx.format {
        Format::Json => println!("{}", serde_json::json!({"criterion": id, "met": !unmet})),
        _ => println!("criterion {id} {}", if unmet { "unchecked" } else { "checked" }),
    }
    Ok(())
}

pub fn link(ctx: &Ctx<'_>, from: &str, to: &str, kind: RelationKind) -> Result<()> {
    let rel = ctx.with_store(|store| store.add_relationship(from, to, kind))?;
    match ctx.format {
        Format::Json => output::print_json(&rel),
        _ => {
            println!("{from} {kind} {to}");
            Ok(())
        }
    }
}

pub fn unlink(ctx: &Ctx<'_>, from: &str, to: &str, kind: RelationKind) -> Result<()> {
    ctx.with_store(|store| store.remove_relationship(from, to, kind))?;
    match ctx.format {
        Format::Json => println!("{}", serde_json::json!({"unlinked": [from, to]})),
        _ => println!("unlinked {from} {kind} {to}"),
    }
    Ok(())
}

pub fn links(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    let (rels, unmet) = ctx.with_store(|store| {
        let workflow = ctx.config.workflow()?;
        let task = store.get_task_by_key(key)?;
        Ok((
            store.list_relationships(task.id)?,
            store.unmet_dependencies(&workflow, task.id)?,
        ))
    })?;
    match ctx.format {
        Format::Json => {
            println!(
                "{}",
                serde_json::json!({"relationships": rels, "unmet_dependencies": unmet})
            );
            Ok(())
        }
        _ => {
            for rel in rels {
                println!("{} -> {} ({})", rel.from_task_id, rel.to_task_id, rel.kind);
            }
            if !unmet.is_empty() {
                println!("unmet dependencies: {}", unmet.join(", "));
            }
            Ok(())
        }
    }
}

pub fn sessions(ctx: &Ctx<'_>, key: &str) -> Result<()> {
    let sessions = ctx.with_store(|store| store.list_work_sessions(key))?;
    match ctx.format {
        Format::Json => output::print_json(&sessions),
        _ => {
            for s in sessions {
                let agent = s.agent.as_deref().unwrap_or("-");
                let ended = s
                    .ended_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "open".into());
                println!("{} {agent} {} -> {ended}", s.id, s.started_at.to_rfc3339());
            }
            Ok(())
        }
    }
}
