//! Iteration command handlers

use anyhow::{Context, Result};
use uuid::Uuid;

use wit_core::catalog::{Iteration, Space};

use super::Session;

pub fn create(
    session: &mut Session<'_>,
    space: Uuid,
    name: String,
    parent: Option<Uuid>,
) -> Result<()> {
    let iteration = session
        .db
        .write(|tx| {
            Space::load(tx, space)?;
            let parent = parent.map(|id| Iteration::load(tx, id)).transpose()?;
            let iteration = Iteration::new(space, name, parent.as_ref());
            iteration.insert(tx)?;
            Ok(iteration)
        })
        .context("Failed to create iteration")?;

    session.output.created("iteration", iteration.id());
    Ok(())
}

/// List the iterations of a space with their rollup counts
pub fn list(session: &mut Session<'_>, space: Uuid) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);
    let rows = session
        .db
        .read(|tx| {
            let mut counts = repo.counts_per_iteration(ctx, tx, space)?;
            let rows = Iteration::list_for_space(tx, space)?
                .into_iter()
                .filter_map(|iteration| {
                    let counts = counts.remove(&iteration.id())?;
                    Some((iteration, counts))
                })
                .collect::<Vec<_>>();
            Ok(rows)
        })
        .context("Failed to count work items per iteration")?;

    session.output.print_iteration_counts(&rows);
    Ok(())
}

/// Show the counts of one iteration
pub fn counts(session: &mut Session<'_>, iteration_id: Uuid) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);
    let rows = session
        .db
        .read(|tx| {
            let iteration = Iteration::load(tx, iteration_id)?;
            let counts = repo.counts_for_iteration(ctx, tx, iteration_id)?;
            Ok(counts
                .get(&iteration_id)
                .map(|counts| vec![(iteration, *counts)])
                .unwrap_or_default())
        })
        .context("Failed to count work items for iteration")?;

    session.output.print_iteration_counts(&rows);
    Ok(())
}
