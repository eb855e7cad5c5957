//! Work item models
//!
//! `WorkItemStorage` mirrors a row of the `work_items` table. `WorkItem` is
//! what callers read and write: its `fields` hold external representations
//! keyed by field name, including the column-backed system fields the type
//! declares.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::field::{system, WorkItemType};

/// Field values keyed by field name
pub type Fields = BTreeMap<String, Value>;

/// A row of the `work_items` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemStorage {
    pub id: Uuid,
    pub space_id: Uuid,
    pub type_id: Uuid,
    /// Per-space sequential number
    pub number: i64,
    pub version: i64,
    pub execution_order: f64,
    /// Stored representations of the type specific attributes
    pub fields: Fields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A work item as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub space_id: Uuid,
    pub type_id: Uuid,
    pub number: i64,
    /// Version the item was read at; writes must carry it back unchanged
    pub version: i64,
    pub fields: Fields,
}

impl WorkItem {
    /// Build the caller view of a stored row
    pub fn from_storage(wit: &WorkItemType, row: &WorkItemStorage) -> Result<Self> {
        let mut fields = Fields::new();

        for (name, definition) in &wit.fields {
            let value = match name.as_str() {
                system::CREATED_AT => Some(json!(format_instant(row.created_at))),
                system::UPDATED_AT => Some(json!(format_instant(row.updated_at))),
                system::ORDER => Some(json!(row.execution_order)),
                system::NUMBER => Some(json!(row.number)),
                _ => match row.fields.get(name) {
                    Some(stored) => definition.field_type.convert_from_model(stored)?,
                    None => None,
                },
            };
            if let Some(value) = value {
                fields.insert(name.clone(), value);
            }
        }

        Ok(Self {
            id: row.id,
            space_id: row.space_id,
            type_id: row.type_id,
            number: row.number,
            version: row.version,
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn title(&self) -> Option<&str> {
        self.field(system::TITLE).and_then(Value::as_str)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Execution order as reported through `system.order`
    pub fn execution_order(&self) -> Option<f64> {
        self.field(system::ORDER).and_then(Value::as_f64)
    }
}

fn format_instant(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDefinition, FieldType, Kind};

    #[test]
    fn test_from_storage_fills_column_backed_fields() {
        let wit = WorkItemType::new(Uuid::new_v4(), "task")
            .with_field(system::TITLE, FieldDefinition::new("Title", FieldType::simple(Kind::String)))
            .with_field(system::ORDER, FieldDefinition::new("Order", FieldType::simple(Kind::Float)).read_only())
            .with_field(system::NUMBER, FieldDefinition::new("Number", FieldType::simple(Kind::Integer)).read_only());

        let now = Utc::now();
        let mut stored = Fields::new();
        stored.insert(system::TITLE.to_string(), json!("hello"));
        stored.insert("undeclared".to_string(), json!(1));

        let row = WorkItemStorage {
            id: Uuid::new_v4(),
            space_id: Uuid::new_v4(),
            type_id: wit.id,
            number: 4,
            version: 2,
            execution_order: 1500.0,
            fields: stored,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let item = WorkItem::from_storage(&wit, &row).unwrap();
        assert_eq!(item.title(), Some("hello"));
        assert_eq!(item.execution_order(), Some(1500.0));
        assert_eq!(item.field(system::NUMBER), Some(&json!(4)));
        assert!(item.field("undeclared").is_none());
        assert_eq!(item.version, 2);
    }
}
