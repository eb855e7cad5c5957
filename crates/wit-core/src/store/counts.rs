//! Per-iteration rollups
//!
//! Totals of an iteration include the items of all its descendant
//! iterations. An item counts as closed when its state is one of the
//! configured closed states, compared case-insensitively.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use super::repository::WorkItemRepository;
use crate::cancel::CancelToken;
use crate::catalog::Iteration;
use crate::error::{Error, Result};
use crate::field::system;
use crate::storage::sql::{escape_like, json_extract, uuid_at, FOLD_CASE, WORK_ITEMS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationCounts {
    pub iteration_id: Uuid,
    pub total: i64,
    pub closed: i64,
}

impl IterationCounts {
    fn empty(iteration_id: Uuid) -> Self {
        Self {
            iteration_id,
            total: 0,
            closed: 0,
        }
    }
}

impl WorkItemRepository {
    /// Counts of every iteration in a space, descendants included
    pub fn counts_per_iteration(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        space_id: Uuid,
    ) -> Result<BTreeMap<Uuid, IterationCounts>> {
        ctx.check()?;
        let iterations = Iteration::list_for_space(conn, space_id)?;

        let (closed, mut parameters) = self.closed_sum();
        parameters.push(SqlValue::Text(space_id.to_string()));
        let iteration = json_extract(WORK_ITEMS, system::ITERATION);
        let sql = format!(
            "SELECT {iteration}, count(*), {closed} FROM \"work_items\"
             WHERE \"work_items\".\"space_id\" = ? AND \"work_items\".\"deleted_at\" IS NULL
               AND {iteration} IS NOT NULL
             GROUP BY {iteration}",
        );

        ctx.check()?;
        let mut stmt = conn.prepare(&sql)?;
        let direct: BTreeMap<Uuid, IterationCounts> = stmt
            .query_map(params_from_iter(parameters.iter()), |row| {
                let iteration_id = uuid_at(row, 0)?;
                Ok((
                    iteration_id,
                    IterationCounts {
                        iteration_id,
                        total: row.get(1)?,
                        closed: row.get(2)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| {
                error!(space_id = %space_id, error = %e, "unable to count work items per iteration");
                Error::from(e)
            })?;

        let mut counts = BTreeMap::new();
        for iteration in &iterations {
            let prefix = format!("{}/", iteration.node.path);
            let mut rollup = IterationCounts::empty(iteration.id());
            for other in &iterations {
                if other.node.path != iteration.node.path && !other.node.path.starts_with(&prefix) {
                    continue;
                }
                if let Some(own) = direct.get(&other.id()) {
                    rollup.total += own.total;
                    rollup.closed += own.closed;
                }
            }
            counts.insert(iteration.id(), rollup);
        }

        debug!(space_id = %space_id, iterations = counts.len(), "counted work items per iteration");
        Ok(counts)
    }

    /// Counts of a single iteration, descendants included
    pub fn counts_for_iteration(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        iteration_id: Uuid,
    ) -> Result<BTreeMap<Uuid, IterationCounts>> {
        ctx.check()?;
        let iteration = Iteration::load(conn, iteration_id)?;

        let (closed, mut parameters) = self.closed_sum();
        parameters.push(SqlValue::Text(iteration.node.space_id.to_string()));
        parameters.push(SqlValue::Text(iteration.node.path.clone()));
        parameters.push(SqlValue::Text(format!(
            "{}/%",
            escape_like(&iteration.node.path)
        )));
        let sql = format!(
            "SELECT count(*), {closed} FROM \"work_items\"
             WHERE {iteration} IN (
                 SELECT id FROM iterations
                 WHERE space_id = ? AND deleted_at IS NULL
                   AND (path = ? OR path LIKE ? ESCAPE '\\'))
               AND \"work_items\".\"deleted_at\" IS NULL",
            iteration = json_extract(WORK_ITEMS, system::ITERATION),
        );

        ctx.check()?;
        let (total, closed): (i64, Option<i64>) = conn
            .query_row(&sql, params_from_iter(parameters.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| {
                error!(iteration_id = %iteration_id, error = %e, "unable to count work items for iteration");
                Error::from(e)
            })?;

        let counts = IterationCounts {
            iteration_id,
            total,
            closed: closed.unwrap_or(0),
        };
        Ok(BTreeMap::from([(iteration_id, counts)]))
    }

    /// SQL summing closed items, with its parameters
    fn closed_sum(&self) -> (String, Vec<SqlValue>) {
        if self.closed_states.is_empty() {
            return ("0".to_string(), Vec::new());
        }
        let placeholders = vec!["?"; self.closed_states.len()].join(", ");
        let sql = format!(
            "coalesce(sum(CASE WHEN {}({}) IN ({}) THEN 1 ELSE 0 END), 0)",
            FOLD_CASE,
            json_extract(WORK_ITEMS, system::STATE),
            placeholders
        );
        let parameters = self
            .closed_states
            .iter()
            .map(|state| SqlValue::Text(state.to_lowercase()))
            .collect();
        (sql, parameters)
    }
}
