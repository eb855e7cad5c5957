//! Work item type changes
//!
//! Moving an item to another type keeps every value the new type can hold.
//! Values that cannot be carried over are removed from the item and written
//! into its description so nothing is silently lost.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use super::repository::WorkItemRepository;
use crate::cancel::CancelToken;
use crate::catalog::render_relational;
use crate::error::{Error, Result};
use crate::field::{
    markup_content, markup_value, system, FieldDefinition, FieldType, Kind, WorkItemType,
    MARKUP_MARKDOWN,
};
use crate::model::WorkItemStorage;

impl WorkItemRepository {
    /// Migrate the stored fields of `row` from `old` to `new`
    ///
    /// The caller persists the row afterwards.
    pub fn change_type(
        &self,
        ctx: &CancelToken,
        conn: &Connection,
        row: &mut WorkItemStorage,
        old: &WorkItemType,
        new: &WorkItemType,
    ) -> Result<()> {
        self.check_type_usable(ctx, conn, new, row.space_id)?;

        // label -> rendered value of every field that could not be kept
        let mut missing: BTreeMap<String, String> = BTreeMap::new();

        for (name, definition) in &old.fields {
            if skipped(name, definition) {
                continue;
            }
            let Some(stored) = row.fields.get(name).cloned() else {
                continue;
            };

            let carried = match new.field(name) {
                Some(target) => definition
                    .field_type
                    .convert_to_type(&target.field_type, &stored)
                    .ok(),
                None => None,
            };
            match carried {
                Some(Some(value)) => {
                    row.fields.insert(name.clone(), value);
                }
                Some(None) => {
                    row.fields.remove(name);
                }
                None => {
                    ctx.check()?;
                    let rendered = render(conn, &definition.field_type, &stored)?;
                    missing.insert(definition.label.clone(), rendered);
                    row.fields.remove(name);
                }
            }
        }

        if !missing.is_empty() {
            let original = row
                .fields
                .get(system::DESCRIPTION)
                .map(markup_content)
                .unwrap_or_default();
            let mut text = format!("```\nMissing fields in workitem type: {}\n", new.name);
            for (label, value) in &missing {
                text.push_str(&format!("\n{} : {}", label, value));
            }
            text.push_str(&format!("\n```\n{}\n", original));
            row.fields.insert(
                system::DESCRIPTION.to_string(),
                markup_value(&text, MARKUP_MARKDOWN),
            );
        }

        for (name, definition) in &new.fields {
            if skipped(name, definition) || row.fields.contains_key(name) {
                continue;
            }
            if let Some(value) = definition.convert_to_model(name, None)? {
                row.fields.insert(name.clone(), value);
            }
        }

        info!(
            wi_id = %row.id,
            from = %old.name,
            to = %new.name,
            missing = missing.len(),
            "changed work item type"
        );
        row.type_id = new.id;
        Ok(())
    }
}

/// Fields a type change leaves alone
fn skipped(name: &str, definition: &FieldDefinition) -> bool {
    name == system::METASTATE || definition.read_only || system::backing_column(name).is_some()
}

fn render(conn: &Connection, field_type: &FieldType, stored: &Value) -> Result<String> {
    match (field_type, stored) {
        (FieldType::List { component, .. }, Value::Array(items)) => {
            let rendered = items
                .iter()
                .map(|item| render_single(conn, *component, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(rendered.join(", "))
        }
        (FieldType::List { .. }, other) => Err(Error::Conversion(format!(
            "stored value {} is not a list",
            other
        ))),
        _ => render_single(conn, field_type.base_kind(), stored),
    }
}

fn render_single(conn: &Connection, kind: Kind, value: &Value) -> Result<String> {
    if kind.is_relational() {
        render_relational(conn, kind, value)
    } else {
        Ok(kind.render(value))
    }
}
