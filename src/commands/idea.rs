use crate::error::Result;
use crate::output::{self, Format};

use super::epic::Ctx;

pub fn add(ctx: &Ctx<'_>, title: &str, description: Option<&str>) -> Result<()> {
    let idea = ctx.with_store(|store| store.add_idea(title, description))?;
    match ctx.format {
        Format::Json => output::print_json(&idea),
        _ => {
            println!("idea {} recorded", idea.id);
            Ok(())
        }
    }
}

pub fn list(ctx: &Ctx<'_>) -> Result<()> {
    let ideas = ctx.with_store(|store| store.list_ideas())?;
    match ctx.format {
        Format::Json => output::print_json(&ideas),
        _ => {
            for idea in ideas {
                println!("{:>4}  {}", idea.id, idea.title);
            }
            Ok(())
        }
    }
}

/// Turn a backlog idea into a real task under a feature.
pub fn promote(ctx: &Ctx<'_>, id: i64, feature_key: &str, agent: Option<&str>) -> Result<()> {
    let workflow = ctx.config.workflow()?;
    let agent = ctx.config.agent_or_default(agent);
    let task = ctx.with_store(|store| store.promote_idea(&workflow, id, feature_key, agent))?;
    output::print_task(&task, &workflow, ctx.format)
}
