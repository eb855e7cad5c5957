//! Work item command handlers

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use wit_core::catalog::link_parent;
use wit_core::{Expression, ListOptions, ReorderDirection, WorkItem};

use super::{parse_assignments, Session};

/// Target position of `item move`, by item number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Above(i64),
    Below(i64),
    Top,
    Bottom,
}

/// Build a filter from `name=value` conditions and a JSON expression
///
/// All parts must match. Returns `None` when no filter was given.
pub fn parse_filter(conditions: &[String], json: Option<&str>) -> Result<Option<Expression>> {
    let mut parts: Vec<Expression> = parse_assignments(conditions)?
        .into_iter()
        .map(|(name, value)| Expression::field_equals(name, value))
        .collect();

    if let Some(json) = json {
        let expression: Expression =
            serde_json::from_str(json).context("Invalid filter expression")?;
        parts.push(expression);
    }

    Ok(Expression::all(parts))
}

pub fn create(
    session: &mut Session<'_>,
    space: Uuid,
    type_id: Uuid,
    user: Uuid,
    assignments: &[String],
) -> Result<()> {
    let fields = parse_assignments(assignments)?;
    let (repo, ctx) = (session.repo, session.ctx);

    let item = session
        .db
        .write(|tx| repo.create(ctx, tx, space, type_id, fields, user))
        .context("Failed to create work item")?;

    session.output.created("work item", format!("#{}", item.number));
    session.output.print_item(&item);
    Ok(())
}

pub fn show(session: &mut Session<'_>, space: Uuid, number: i64) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);
    let item = session
        .db
        .read(|tx| repo.load(ctx, tx, space, number))
        .with_context(|| format!("Work item #{} not found", number))?;

    session.output.print_item(&item);
    Ok(())
}

/// Update fields and optionally the type of an item
///
/// Fields not mentioned keep their current values.
pub fn set(
    session: &mut Session<'_>,
    space: Uuid,
    number: i64,
    user: Uuid,
    type_id: Option<Uuid>,
    assignments: &[String],
) -> Result<()> {
    let changes = parse_assignments(assignments)?;
    if changes.is_empty() && type_id.is_none() {
        bail!("Nothing to change. Pass --field NAME=VALUE or --type.");
    }
    let (repo, ctx) = (session.repo, session.ctx);

    let item = session
        .db
        .write(|tx| {
            let mut item = repo.load(ctx, tx, space, number)?;
            item.fields.extend(changes);
            if let Some(type_id) = type_id {
                item.type_id = type_id;
            }
            repo.save(ctx, tx, space, &item, user)
        })
        .with_context(|| format!("Failed to update work item #{}", number))?;

    session
        .output
        .success(&format!("Updated work item #{} (version {})", item.number, item.version));
    session.output.print_item(&item);
    Ok(())
}

pub fn list(
    session: &mut Session<'_>,
    space: Uuid,
    criteria: Option<&Expression>,
    options: &ListOptions,
) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);
    let (items, total) = session
        .db
        .read(|tx| repo.list(ctx, tx, space, criteria, options))
        .context("Failed to list work items")?;

    session.output.print_items(&items, total);
    Ok(())
}

pub fn count(session: &mut Session<'_>, space: Uuid, criteria: Option<&Expression>) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);
    let count = session
        .db
        .read(|tx| repo.count(ctx, tx, space, criteria))
        .context("Failed to count work items")?;

    session.output.print_count(count);
    Ok(())
}

pub fn reorder(
    session: &mut Session<'_>,
    space: Uuid,
    number: i64,
    user: Uuid,
    position: Position,
) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);

    let item = session
        .db
        .write(|tx| {
            let item = repo.load(ctx, tx, space, number)?;
            let direction = match position {
                Position::Above(target) => {
                    ReorderDirection::Above(repo.load(ctx, tx, space, target)?.id)
                }
                Position::Below(target) => {
                    ReorderDirection::Below(repo.load(ctx, tx, space, target)?.id)
                }
                Position::Top => ReorderDirection::Top,
                Position::Bottom => ReorderDirection::Bottom,
            };
            repo.reorder(ctx, tx, space, direction, &item, user)
        })
        .with_context(|| format!("Failed to move work item #{}", number))?;

    session.output.success(&format!(
        "Moved work item #{} to order {}",
        item.number,
        item.execution_order().unwrap_or_default()
    ));
    Ok(())
}

pub fn delete(
    session: &mut Session<'_>,
    space: Uuid,
    number: i64,
    user: Uuid,
    version: Option<i64>,
) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);

    session
        .db
        .write(|tx| {
            let item = repo.load(ctx, tx, space, number)?;
            repo.delete(ctx, tx, item.id, version, user)
        })
        .with_context(|| format!("Failed to delete work item #{}", number))?;

    session.output.success(&format!("Deleted work item #{}", number));
    Ok(())
}

pub fn history(session: &mut Session<'_>, space: Uuid, number: i64) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);
    let revisions = session
        .db
        .read(|tx| {
            let item = repo.load(ctx, tx, space, number)?;
            repo.revisions().list(ctx, tx, item.id)
        })
        .with_context(|| format!("Failed to load history of work item #{}", number))?;

    session.output.print_revisions(&revisions);
    Ok(())
}

pub fn link(session: &mut Session<'_>, space: Uuid, parent: i64, child: i64) -> Result<()> {
    if parent == child {
        bail!("A work item cannot be its own parent");
    }
    let (repo, ctx) = (session.repo, session.ctx);

    let (parent, child): (WorkItem, WorkItem) = session
        .db
        .write(|tx| {
            let parent = repo.load(ctx, tx, space, parent)?;
            let child = repo.load(ctx, tx, space, child)?;
            link_parent(tx, parent.id, child.id)?;
            Ok((parent, child))
        })
        .context("Failed to link work items")?;

    session.output.success(&format!(
        "#{} is now the parent of #{}",
        parent.number, child.number
    ));
    Ok(())
}
