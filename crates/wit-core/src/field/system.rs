//! Names of the system-defined work item fields

pub const TITLE: &str = "system.title";
pub const DESCRIPTION: &str = "system.description";
pub const STATE: &str = "system.state";
pub const METASTATE: &str = "system.metastate";
pub const ASSIGNEES: &str = "system.assignees";
pub const CREATOR: &str = "system.creator";
pub const ITERATION: &str = "system.iteration";
pub const AREA: &str = "system.area";
pub const LABELS: &str = "system.labels";
pub const BOARDCOLUMNS: &str = "system.boardcolumns";
pub const CODEBASE: &str = "system.codebase";

// Backed by fixed columns of the work item table, never stored in `fields`
pub const CREATED_AT: &str = "system.created_at";
pub const UPDATED_AT: &str = "system.updated_at";
pub const ORDER: &str = "system.order";
pub const NUMBER: &str = "system.number";

/// Returns the work item column that backs a system field, if any
pub fn backing_column(name: &str) -> Option<&'static str> {
    match name {
        CREATED_AT => Some("created_at"),
        UPDATED_AT => Some("updated_at"),
        ORDER => Some("execution_order"),
        NUMBER => Some("number"),
        _ => None,
    }
}
