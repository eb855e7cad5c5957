//! Field definitions and work item types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::kind::{ConversionError, FieldType};
use crate::error::{Error, Result};

/// A named field of a work item type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Human readable label, used when rendering type-change diffs
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Read-only fields are maintained by the store, never by callers
    #[serde(default)]
    pub read_only: bool,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldDefinition {
    pub fn new(label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            label: label.into(),
            description: None,
            required: false,
            read_only: false,
            field_type,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Convert a caller supplied value for the field `name`
    ///
    /// An absent value picks up the type's default. An explicit empty list
    /// clears the field. A required field that ends up without a value is
    /// an error.
    pub fn convert_to_model(
        &self,
        name: &str,
        value: Option<&Value>,
    ) -> std::result::Result<Option<Value>, ConversionError> {
        let supplied = value.filter(|v| !v.is_null());
        let converted = match supplied {
            Some(v) => self.field_type.convert_to_model(v)?,
            None => self.field_type.default_value(),
        };
        match converted {
            None if self.required => Err(ConversionError::Required(name.to_string())),
            other => Ok(other),
        }
    }
}

/// A work item type: a named set of field definitions within a space template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemType {
    pub id: Uuid,
    pub space_template_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether new work items may be created with this type
    #[serde(default = "default_can_construct")]
    pub can_construct: bool,
    /// Parent type whose fields are inherited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_type_id: Option<Uuid>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDefinition>,
}

fn default_can_construct() -> bool {
    true
}

impl WorkItemType {
    pub fn new(space_template_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            space_template_id,
            name: name.into(),
            description: None,
            can_construct: true,
            extended_type_id: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.insert(name.into(), definition);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    /// Check every field type of this work item type
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::bad_parameter("name", "work item type name is empty"));
        }
        for (name, definition) in &self.fields {
            definition
                .field_type
                .validate()
                .map_err(|e| Error::bad_parameter(format!("fields.{}", name), e.to_string()))?;
        }
        Ok(())
    }

    /// Merge the fields of a parent type into this one
    ///
    /// Fields the child already declares must keep the parent's type, unless
    /// both are enums over the same base kind and the parent marks its values
    /// as rewritable.
    pub fn inherit_from(&mut self, parent: &WorkItemType) -> Result<()> {
        for (name, inherited) in &parent.fields {
            match self.fields.get(name) {
                None => {
                    self.fields.insert(name.clone(), inherited.clone());
                }
                Some(own) if own.field_type == inherited.field_type => {}
                Some(own) if rewrites_enum_values(&inherited.field_type, &own.field_type) => {}
                Some(_) => {
                    return Err(Error::bad_parameter(
                        format!("fields.{}", name),
                        format!(
                            "type '{}' redefines the field inherited from '{}'",
                            self.name, parent.name
                        ),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn rewrites_enum_values(parent: &FieldType, child: &FieldType) -> bool {
    match (parent, child) {
        (
            FieldType::Enum {
                base: parent_base,
                rewritable_values: true,
                ..
            },
            FieldType::Enum {
                base: child_base, ..
            },
        ) => parent_base == child_base,
        _ => false,
    }
}
