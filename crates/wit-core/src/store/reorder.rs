//! Execution order changes
//!
//! Items are placed between their neighbours by taking the midpoint of the
//! two orders, so moving one item never rewrites the others.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::hooks::Mutation;
use super::repository::{highest_order, WorkItemRepository, ORDER_STEP};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::WorkItem;

/// Where to move an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "position", content = "target")]
pub enum ReorderDirection {
    /// Directly before the target in ascending order
    Above(Uuid),
    /// Directly after the target in ascending order
    Below(Uuid),
    Top,
    Bottom,
}

/// A live item's id and order
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    id: Uuid,
    order: f64,
}

impl WorkItemRepository {
    /// Move `item` relative to the other items of its space
    ///
    /// Only the execution order changes; the version is bumped and an update
    /// revision recorded like any other write.
    pub fn reorder(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        space_id: Uuid,
        direction: ReorderDirection,
        item: &WorkItem,
        modifier_id: Uuid,
    ) -> Result<WorkItem> {
        let mut row = self.load_storage(ctx, conn, item.id, Some(space_id))?;
        if row.version != item.version {
            info!(
                wi_id = %item.id,
                current_version = row.version,
                input_version = item.version,
                "version conflict while reordering work item"
            );
            return Err(Error::version_conflict("work item", item.id, item.version));
        }

        let new_order = match direction {
            ReorderDirection::Above(target_id) | ReorderDirection::Below(target_id) => {
                if target_id == item.id {
                    return Err(Error::bad_parameter(
                        "target",
                        "an item cannot be moved relative to itself",
                    ));
                }
                let target = self.load_storage(ctx, conn, target_id, Some(space_id))?;
                let neighbour = match direction {
                    ReorderDirection::Above(_) => below(ctx, conn, space_id, target.execution_order)?,
                    _ => above(ctx, conn, space_id, target.execution_order)?,
                };
                match (direction, neighbour) {
                    (_, Some(n)) if n.id == row.id => row.execution_order,
                    (_, Some(n)) => (target.execution_order + n.order) / 2.0,
                    // the target is the lowest item
                    (ReorderDirection::Above(_), None) => target.execution_order / 2.0,
                    // the target is the highest item
                    (_, None) => target.execution_order + ORDER_STEP,
                }
            }
            ReorderDirection::Top => match edge(ctx, conn, space_id, true)? {
                Some(top) if top.id == row.id => row.execution_order,
                _ => highest_order(ctx, conn, space_id)?.unwrap_or(0.0) + ORDER_STEP,
            },
            ReorderDirection::Bottom => match edge(ctx, conn, space_id, false)? {
                Some(bottom) if bottom.id == row.id => row.execution_order,
                Some(bottom) => bottom.order / 2.0,
                None => row.execution_order,
            },
        };

        debug!(
            wi_id = %item.id,
            from = row.execution_order,
            to = new_order,
            "reordering work item"
        );

        row.execution_order = new_order;
        row.version = item.version + 1;
        row.updated_at = Utc::now();
        self.write_update(ctx, conn, Mutation::Reorder, &row, item.version, modifier_id)?;

        self.to_model(ctx, conn, &row)
    }
}

/// The live item with the highest order strictly below `order`
fn below(ctx: &CancelToken, conn: &Connection, space_id: Uuid, order: f64) -> Result<Option<Placement>> {
    neighbour(
        ctx,
        conn,
        "SELECT id, execution_order FROM work_items
         WHERE space_id = ?1 AND deleted_at IS NULL AND execution_order < ?2
         ORDER BY execution_order DESC, number DESC LIMIT 1",
        space_id,
        order,
    )
}

/// The live item with the lowest order strictly above `order`
fn above(ctx: &CancelToken, conn: &Connection, space_id: Uuid, order: f64) -> Result<Option<Placement>> {
    neighbour(
        ctx,
        conn,
        "SELECT id, execution_order FROM work_items
         WHERE space_id = ?1 AND deleted_at IS NULL AND execution_order > ?2
         ORDER BY execution_order ASC, number ASC LIMIT 1",
        space_id,
        order,
    )
}

fn neighbour(
    ctx: &CancelToken,
    conn: &Connection,
    sql: &str,
    space_id: Uuid,
    order: f64,
) -> Result<Option<Placement>> {
    ctx.check()?;
    let placement = conn
        .query_row(sql, params![space_id.to_string(), order], hydrate_placement)
        .optional()?;
    Ok(placement)
}

/// The live item with the highest (`top`) or lowest order in the space
fn edge(ctx: &CancelToken, conn: &Connection, space_id: Uuid, top: bool) -> Result<Option<Placement>> {
    ctx.check()?;
    let sql = if top {
        "SELECT id, execution_order FROM work_items
         WHERE space_id = ?1 AND deleted_at IS NULL
         ORDER BY execution_order DESC, number DESC LIMIT 1"
    } else {
        "SELECT id, execution_order FROM work_items
         WHERE space_id = ?1 AND deleted_at IS NULL
         ORDER BY execution_order ASC, number ASC LIMIT 1"
    };
    let placement = conn
        .query_row(sql, [space_id.to_string()], hydrate_placement)
        .optional()?;
    Ok(placement)
}

fn hydrate_placement(row: &rusqlite::Row<'_>) -> rusqlite::Result<Placement> {
    Ok(Placement {
        id: crate::storage::sql::uuid_at(row, 0)?,
        order: row.get(1)?,
    })
}
