//! Work item type persistence

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::catalog::{Space, SpaceTemplate};
use crate::error::{Error, Result};
use crate::field::{FieldDefinition, WorkItemType};
use crate::storage::sql::{opt_uuid_at, to_millis, uuid_at};

const TYPE_COLUMNS: &str =
    "id, space_template_id, name, description, can_construct, extended_type_id, fields";

/// Reads and writes work item types
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkItemTypeRepository;

impl WorkItemTypeRepository {
    pub fn new() -> Self {
        Self
    }

    /// Store a new work item type
    ///
    /// Only the type's own fields are stored. Inherited fields are merged on
    /// every load so a change to the parent reaches its subtypes.
    pub fn create(&self, ctx: &CancelToken, conn: &Connection, wit: &WorkItemType) -> Result<()> {
        ctx.check()?;
        wit.validate()?;
        SpaceTemplate::load(conn, wit.space_template_id)?;

        if let Some(parent_id) = wit.extended_type_id {
            let parent = self.load(ctx, conn, parent_id)?;
            if parent.space_template_id != wit.space_template_id {
                return Err(Error::bad_parameter(
                    "extended_type_id",
                    format!(
                        "type '{}' belongs to a different space template",
                        parent.name
                    ),
                ));
            }
            // surface redefinition conflicts before storing
            wit.clone().inherit_from(&parent)?;
        }

        let now = to_millis(Utc::now());
        ctx.check()?;
        conn.execute(
            "INSERT INTO work_item_types
                (id, space_template_id, name, description, can_construct,
                 extended_type_id, fields, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                wit.id.to_string(),
                wit.space_template_id.to_string(),
                wit.name,
                wit.description,
                wit.can_construct,
                wit.extended_type_id.map(|id| id.to_string()),
                serde_json::to_string(&wit.fields)?,
                now,
            ],
        )?;

        debug!(wit_id = %wit.id, name = %wit.name, "created work item type");
        Ok(())
    }

    /// Load a work item type with every inherited field resolved
    pub fn load(&self, ctx: &CancelToken, conn: &Connection, id: Uuid) -> Result<WorkItemType> {
        ctx.check()?;
        let mut wit = load_own(conn, id)?;

        let mut seen = BTreeSet::from([wit.id]);
        let mut next = wit.extended_type_id;
        while let Some(parent_id) = next {
            if !seen.insert(parent_id) {
                warn!(wit_id = %id, "cycle in work item type hierarchy");
                return Err(Error::Internal(format!(
                    "work item type '{}' extends itself",
                    id
                )));
            }
            ctx.check()?;
            let parent = load_own(conn, parent_id)?;
            wit.inherit_from(&parent)?;
            next = parent.extended_type_id;
        }

        Ok(wit)
    }

    /// List the types of a space template, ordered by name
    pub fn list_for_template(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        space_template_id: Uuid,
    ) -> Result<Vec<WorkItemType>> {
        ctx.check()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM work_item_types
             WHERE space_template_id = ?1 AND deleted_at IS NULL
             ORDER BY name",
        )?;
        let ids = stmt
            .query_map([space_template_id.to_string()], |row| uuid_at(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ids.into_iter().map(|id| self.load(ctx, conn, id)).collect()
    }

    /// Check whether `wit` may be used for items of `space_id`
    pub fn shares_template_with_space(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        wit: &WorkItemType,
        space_id: Uuid,
    ) -> Result<bool> {
        ctx.check()?;
        let space = Space::load(conn, space_id)?;
        Ok(space.space_template_id == wit.space_template_id)
    }
}

fn load_own(conn: &Connection, id: Uuid) -> Result<WorkItemType> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM work_item_types WHERE id = ?1 AND deleted_at IS NULL",
                TYPE_COLUMNS
            ),
            [id.to_string()],
            hydrate_type_row,
        )
        .optional()?;

    match row {
        Some(row) => row.into_type(),
        None => {
            debug!(wit_id = %id, "work item type not found");
            Err(Error::not_found("work item type", id))
        }
    }
}

/// Raw `work_item_types` row before the field JSON is parsed
struct WorkItemTypeRow {
    id: Uuid,
    space_template_id: Uuid,
    name: String,
    description: Option<String>,
    can_construct: bool,
    extended_type_id: Option<Uuid>,
    fields: String,
}

impl WorkItemTypeRow {
    fn into_type(self) -> Result<WorkItemType> {
        let fields: BTreeMap<String, FieldDefinition> = serde_json::from_str(&self.fields)?;
        Ok(WorkItemType {
            id: self.id,
            space_template_id: self.space_template_id,
            name: self.name,
            description: self.description,
            can_construct: self.can_construct,
            extended_type_id: self.extended_type_id,
            fields,
        })
    }
}

fn hydrate_type_row(row: &Row<'_>) -> rusqlite::Result<WorkItemTypeRow> {
    Ok(WorkItemTypeRow {
        id: uuid_at(row, 0)?,
        space_template_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        can_construct: row.get(4)?,
        extended_type_id: opt_uuid_at(row, 5)?,
        fields: row.get(6)?,
    })
}
