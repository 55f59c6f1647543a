use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::store::Store;
use crate::workflow::Workflow;

#[derive(Debug, Clone, Serialize)]
pub struct FeatureProgressRow {
    pub feature_key: String,
    pub title: String,
    pub total_tasks: i64,
    pub terminal_tasks: i64,
    pub progress_pct: f64,
    pub breakdown: BTreeMap<String, i64>,
}

/// Live epic aggregate; never stored on the epic row.
#[derive(Debug, Clone, Serialize)]
pub struct EpicSummary {
    pub epic_key: String,
    pub title: String,
    pub total_tasks: i64,
    pub status_histogram: BTreeMap<String, i64>,
    pub features: Vec<FeatureProgressRow>,
    pub overall_pct: f64,
}

/// Terminal-task ratio of a feature, in [0, 100]; 0 with no tasks.
pub fn feature_progress(store: &Store<'_>, workflow: &Workflow, feature_key: &str) -> Result<f64> {
    let feature = store.get_feature_by_key(feature_key)?;
    let breakdown = store.get_status_breakdown(feature.id)?;
    Ok(ratio(workflow, &breakdown))
}

/// Recompute and persist `progress_pct` for one feature.
pub fn recompute_feature_progress(
    store: &Store<'_>,
    workflow: &Workflow,
    feature_key: &str,
) -> Result<f64> {
    let feature = store.get_feature_by_key(feature_key)?;
    store.recompute_feature_progress(workflow, feature.id)
}

/// Aggregate an epic: per-feature rows, a task-status histogram, and the
/// overall percentage as the task-count-weighted mean across features.
pub fn epic_summary(store: &Store<'_>, workflow: &Workflow, epic_key: &str) -> Result<EpicSummary> {
    let epic = store.get_epic_by_key(epic_key)?;
    let features = store.list_features(Some(&epic.key), false)?;

    let mut rows = Vec::new();
    let mut histogram: BTreeMap<String, i64> = BTreeMap::new();
    let mut total_tasks = 0i64;
    let mut terminal_tasks = 0i64;
    for feature in features {
        let breakdown = store.get_status_breakdown(feature.id)?;
        let total: i64 = breakdown.values().sum();
        let done: i64 = breakdown
            .iter()
            .filter(|(status, _)| workflow.is_complete(status))
            .map(|(_, n)| *n)
            .sum();
        for (status, n) in &breakdown {
            *histogram.entry(status.clone()).or_default() += n;
        }
        total_tasks += total;
        terminal_tasks += done;
        rows.push(FeatureProgressRow {
            feature_key: feature.key,
            title: feature.title,
            total_tasks: total,
            terminal_tasks: done,
            progress_pct: pct(done, total),
            breakdown,
        });
    }

    Ok(EpicSummary {
        epic_key: epic.key,
        title: epic.title,
        total_tasks,
        status_histogram: histogram,
        overall_pct: pct(terminal_tasks, total_tasks),
        features: rows,
    })
}

fn ratio(workflow: &Workflow, breakdown: &BTreeMap<String, i64>) -> f64 {
    let total: i64 = breakdown.values().sum();
    let done: i64 = breakdown
        .iter()
        .filter(|(status, _)| workflow.is_complete(status))
        .map(|(_, n)| *n)
        .sum();
    pct(done, total)
}

fn pct(done: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * done as f64 / total as f64
    }
}
