//! Field-type registry
//!
//! Declares the kinds a work item field can hold, how caller supplied values
//! are converted into the stored representation, and how work item types
//! group field definitions.
//!
//! ## Architecture
//!
//! - `kind`: simple kinds, the `FieldType` shapes and value conversion
//! - `definition`: `FieldDefinition` and `WorkItemType` with inheritance
//! - `system`: names of the system-defined fields

mod definition;
mod kind;
pub mod system;

pub use definition::{FieldDefinition, WorkItemType};
pub use kind::{
    markup_content, markup_value, ConversionError, FieldType, Kind, MARKUP_MARKDOWN,
    MARKUP_PLAIN_TEXT,
};
