//! Work item revisions
//!
//! One append-only row per successful mutation, carrying the full field
//! snapshot at the time of the change. The schema rejects updates and
//! deletes of revision rows.

use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::{Fields, WorkItemStorage};
use crate::storage::sql::{from_millis, to_millis, uuid_at};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionType {
    Create,
    Update,
    Delete,
}

impl RevisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionType::Create => "create",
            RevisionType::Update => "update",
            RevisionType::Delete => "delete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(RevisionType::Create),
            "update" => Some(RevisionType::Update),
            "delete" => Some(RevisionType::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for RevisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub revision_type: RevisionType,
    pub modifier_id: Uuid,
    pub work_item_id: Uuid,
    pub work_item_type_id: Uuid,
    pub work_item_version: i64,
    pub work_item_fields: Fields,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionRepository;

impl RevisionRepository {
    pub fn new() -> Self {
        Self
    }

    /// Append a revision for the state of `item` after a mutation
    pub fn create(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        modifier_id: Uuid,
        revision_type: RevisionType,
        item: &WorkItemStorage,
    ) -> Result<()> {
        ctx.check()?;
        conn.execute(
            "INSERT INTO work_item_revisions
                (revision_time, revision_type, modifier_id, work_item_id,
                 work_item_type_id, work_item_version, work_item_fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_millis(Utc::now()),
                revision_type.as_str(),
                modifier_id.to_string(),
                item.id.to_string(),
                item.type_id.to_string(),
                item.version,
                serde_json::to_string(&item.fields)?,
            ],
        )?;
        Ok(())
    }

    /// Revisions of a work item, oldest first
    pub fn list(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        work_item_id: Uuid,
    ) -> Result<Vec<Revision>> {
        ctx.check()?;
        let mut stmt = conn.prepare(
            "SELECT id, revision_time, revision_type, modifier_id, work_item_id,
                    work_item_type_id, work_item_version, work_item_fields
             FROM work_item_revisions
             WHERE work_item_id = ?1
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map([work_item_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    uuid_at(row, 3)?,
                    uuid_at(row, 4)?,
                    uuid_at(row, 5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, time, kind, modifier_id, work_item_id, type_id, version, fields)| {
                    let revision_type = RevisionType::parse(&kind).ok_or_else(|| {
                        Error::Internal(format!("unknown revision type '{}'", kind))
                    })?;
                    let work_item_fields = match fields {
                        Some(json) => serde_json::from_str(&json)?,
                        None => Fields::new(),
                    };
                    Ok(Revision {
                        id,
                        time: from_millis(time),
                        revision_type,
                        modifier_id,
                        work_item_id,
                        work_item_type_id: type_id,
                        work_item_version: version,
                        work_item_fields,
                    })
                },
            )
            .collect()
    }
}
