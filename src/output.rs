use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use crate::error::Result;
use crate::model::{Epic, Feature, Task, TaskHistoryEntry};
use crate::progress::EpicSummary;
use crate::store::BulkCompleteReport;
use crate::sync::SyncReport;
use crate::workflow::Workflow;

const TITLE_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

/// Apply the merged color setting process-wide (NO_COLOR already folded in
/// by the config loader).
pub fn set_color(enabled: bool) {
    if !enabled {
        colored::control::set_override(false);
    }
}

/// Colorize a status by its workflow role: start statuses yellow, terminal
/// green, everything in between blue. Status names themselves carry no
/// meaning here.
pub fn style_status(status: &str, workflow: &Workflow) -> String {
    if workflow.is_complete(status) {
        status.green().to_string()
    } else if workflow.is_start(status) {
        status.yellow().to_string()
    } else {
        status.blue().to_string()
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn kv(label: &str, value: &str) {
    println!("  {:<18} {}", label.dimmed(), value);
}

pub fn print_epic(epic: &Epic, workflow: &Workflow, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(epic)?,
        Format::Pretty => {
            println!("{} {}", epic.key.bold(), epic.title);
            kv("status", &style_status(&epic.status, workflow));
            kv("priority", &epic.priority.to_string());
            if let Some(d) = &epic.description {
                kv("description", d);
            }
            if let Some(p) = &epic.custom_folder_path {
                kv("folder", p);
            }
            if let Some(p) = &epic.file_path {
                kv("file", p);
            }
            if epic.archived {
                kv("archived", "yes");
            }
        }
        Format::Minimal => println!(
            "{:<14} {:<width$} {}",
            epic.key,
            truncate(&epic.title, TITLE_WIDTH),
            epic.status,
            width = TITLE_WIDTH
        ),
    }
    Ok(())
}

pub fn print_feature(feature: &Feature, workflow: &Workflow, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(feature)?,
        Format::Pretty => {
            println!("{} {}", feature.key.bold(), feature.title);
            kv("status", &style_status(&feature.status, workflow));
            kv("priority", &feature.priority.to_string());
            kv("progress", &format!("{:.0}%", feature.progress_pct));
            if let Some(order) = feature.execution_order {
                kv("order", &order.to_string());
            }
            if let Some(p) = &feature.file_path {
                kv("file", p);
            }
        }
        Format::Minimal => println!(
            "{:<14} {:<width$} {} {:.0}%",
            feature.key,
            truncate(&feature.title, TITLE_WIDTH),
            feature.status,
            feature.progress_pct,
            width = TITLE_WIDTH
        ),
    }
    Ok(())
}

pub fn print_task(task: &Task, workflow: &Workflow, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(task)?,
        Format::Pretty => {
            println!("{} {}", task.key.bold(), task.title);
            kv("status", &style_status(&task.status, workflow));
            kv("priority", &task.priority.to_string());
            if let Some(t) = &task.agent_type {
                kv("agent type", t);
            }
            if let Some(a) = &task.assigned_agent {
                kv("assigned", &a.cyan().to_string());
            }
            if let Some(r) = &task.blocked_reason {
                kv("blocked", &r.red().to_string());
            }
            if task.rejection_count > 0 {
                kv("rejections", &task.rejection_count.to_string());
            }
            if let Some(done) = task.completed_at {
                kv("completed", &done.to_rfc3339());
            }
            if let Some(p) = &task.file_path {
                kv("file", p);
            }
        }
        Format::Minimal => {
            let agent = task.assigned_agent.as_deref().unwrap_or("-");
            println!(
                "{:<18} {:<width$} {:<16} {}",
                task.key,
                truncate(&task.title, TITLE_WIDTH),
                task.status,
                agent,
                width = TITLE_WIDTH
            );
        }
    }
    Ok(())
}

pub fn print_epics(epics: &[Epic], workflow: &Workflow, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&epics)?,
        _ => {
            for epic in epics {
                print_epic(epic, workflow, Format::Minimal)?;
            }
        }
    }
    Ok(())
}

pub fn print_features(features: &[Feature], workflow: &Workflow, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&features)?,
        _ => {
            for feature in features {
                print_feature(feature, workflow, Format::Minimal)?;
            }
        }
    }
    Ok(())
}

pub fn print_tasks(tasks: &[Task], workflow: &Workflow, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&tasks)?,
        _ => {
            for task in tasks {
                print_task(task, workflow, Format::Minimal)?;
            }
        }
    }
    Ok(())
}

pub fn print_history(entries: &[TaskHistoryEntry], format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(&entries)?,
        _ => {
            for entry in entries {
                let old = entry.old_status.as_deref().unwrap_or("-");
                let forced = if entry.forced { " (forced)" } else { "" };
                let agent = entry.agent.as_deref().unwrap_or("-");
                println!(
                    "{}  {} -> {}{}  {}",
                    entry.timestamp.to_rfc3339(),
                    old,
                    entry.new_status,
                    forced,
                    agent
                );
            }
        }
    }
    Ok(())
}

pub fn print_epic_summary(summary: &EpicSummary, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(summary)?,
        _ => {
            println!(
                "{} {} — {:.0}% ({} tasks)",
                summary.epic_key.bold(),
                summary.title,
                summary.overall_pct,
                summary.total_tasks
            );
            for (status, count) in &summary.status_histogram {
                println!("  {status:<20} {count}");
            }
            for row in &summary.features {
                println!(
                    "  {:<14} {:<width$} {:>3.0}% ({}/{})",
                    row.feature_key,
                    truncate(&row.title, TITLE_WIDTH),
                    row.progress_pct,
                    row.terminal_tasks,
                    row.total_tasks,
                    width = TITLE_WIDTH
                );
            }
        }
    }
    Ok(())
}

pub fn print_bulk_report(report: &BulkCompleteReport, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(report)?,
        _ => {
            println!(
                "{} — {} tasks, completed: {}",
                report.scope.bold(),
                report.total,
                report.completed
            );
            for (status, count) in &report.breakdown {
                println!("  {status:<20} {count}");
            }
            if !report.most_problematic.is_empty() {
                println!("{}", "most problematic:".red());
                for t in &report.most_problematic {
                    match &t.blocked_reason {
                        Some(reason) => println!("  {} [{}] {}", t.key, t.status, reason),
                        None => println!("  {} [{}]", t.key, t.status),
                    }
                }
            }
            if !report.affected.is_empty() {
                println!("completed: {}", report.affected.join(", "));
            }
        }
    }
    Ok(())
}

pub fn print_sync_report(report: &SyncReport, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(report)?,
        _ => {
            let label = if report.dry_run { "sync (dry run)" } else { "sync" };
            println!(
                "{label}: {} created, {} db updates, {} file updates, {} deleted, {} conflicts, {} skipped",
                report.created.len(),
                report.updated_db.len(),
                report.updated_files.len(),
                report.deleted.len(),
                report.conflicts.len(),
                report.skipped.len(),
            );
            for (category, keys) in [
                ("created", &report.created),
                ("updated (db)", &report.updated_db),
                ("updated (files)", &report.updated_files),
                ("deleted", &report.deleted),
                ("conflicts", &report.conflicts),
            ] {
                if !keys.is_empty() {
                    println!("  {category}: {}", keys.join(", "));
                }
            }
            for error in &report.errors {
                println!("  {} {error}", "error:".red());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_width() {
        assert_eq!(truncate("short", 10), "short");
        let long = truncate("a very long title that keeps going", 10);
        assert!(long.chars().count() <= 10);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn style_status_follows_workflow_roles() {
        colored::control::set_override(false);
        let wf = Workflow::default();
        assert_eq!(style_status("todo", &wf), "todo");
        assert_eq!(style_status("completed", &wf), "completed");
        colored::control::unset_override();
    }
}
