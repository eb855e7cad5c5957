//! Table joins
//!
//! A `TableJoin` describes a related table the compiler may join when a
//! filter references one of its columns through a field-name prefix, e.g.
//! `iteration.name`. The set of joins is an explicit `TableJoinRegistry`
//! value handed to the compiler and the store.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;

use super::CompileError;
use crate::error::{Error, Result};
use crate::storage::sql::{column, json_extract, json_path, WORK_ITEMS};
use crate::storage::PARENT_CHILD_LINK_TYPE_ID;

/// A named, reusable join descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableJoin {
    pub table_name: String,
    pub table_alias: String,
    /// Join condition, referencing `table_alias` and the work item table
    pub on: String,
    /// Field-name prefixes that activate this join (e.g. `iteration.`)
    pub prefix_activators: Vec<String>,
    /// Columns this join may resolve; empty allows any column
    pub allowed_columns: Vec<String>,
    /// Joins that must be applied whenever this one is
    pub activate_other_joins: Vec<String>,
    /// Prefixes whose resolution is handed to another join
    pub delegate_to: BTreeMap<String, String>,
}

impl TableJoin {
    pub fn new(
        table_name: impl Into<String>,
        table_alias: impl Into<String>,
        on: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            table_alias: table_alias.into(),
            on: on.into(),
            prefix_activators: Vec::new(),
            allowed_columns: Vec::new(),
            activate_other_joins: Vec::new(),
            delegate_to: BTreeMap::new(),
        }
    }

    pub fn activated_by(mut self, prefixes: &[&str]) -> Self {
        self.prefix_activators = prefixes.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn allowing(mut self, columns: &[&str]) -> Self {
        self.allowed_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn activating(mut self, joins: &[&str]) -> Self {
        self.activate_other_joins = joins.iter().map(|j| j.to_string()).collect();
        self
    }

    pub fn delegating(mut self, prefix: &str, join: &str) -> Self {
        self.delegate_to.insert(prefix.to_string(), join.to_string());
        self
    }

    /// Longest activation prefix of `field`, if any
    pub fn matching_prefix(&self, field: &str) -> Option<&str> {
        self.prefix_activators
            .iter()
            .filter(|p| field.starts_with(p.as_str()))
            .max_by_key(|p| p.len())
            .map(String::as_str)
    }

    pub fn is_allowed(&self, column: &str) -> bool {
        self.allowed_columns.is_empty() || self.allowed_columns.iter().any(|c| c == column)
    }

    /// The `LEFT JOIN` clause for this join
    pub fn join_clause(&self) -> String {
        format!(
            "LEFT JOIN \"{}\" \"{}\" ON {}",
            self.table_name, self.table_alias, self.on
        )
    }

    /// Check that every column in `columns` exists on the joined table
    pub fn validate(&self, conn: &Connection, columns: &[String]) -> Result<()> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let existing: BTreeSet<String> = stmt
            .query_map([&self.table_name], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        if existing.is_empty() {
            return Err(Error::bad_parameter(
                "join",
                format!("table '{}' does not exist", self.table_name),
            ));
        }

        for name in columns {
            if !existing.contains(name) {
                return Err(Error::bad_parameter(
                    "join",
                    format!("table '{}' has no column '{}'", self.table_name, name),
                ));
            }
        }
        Ok(())
    }
}

/// A join the compiled query needs, with the columns it resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredJoin {
    pub name: String,
    pub join: TableJoin,
    /// Columns resolved through this join, in first-use order
    pub handled_columns: Vec<String>,
}

impl RequiredJoin {
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        self.join.validate(conn, &self.handled_columns)
    }
}

/// Named table joins available to the compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableJoinRegistry {
    joins: BTreeMap<String, TableJoin>,
}

impl TableJoinRegistry {
    /// A registry without any joins
    pub fn empty() -> Self {
        Self {
            joins: BTreeMap::new(),
        }
    }

    pub fn with_join(mut self, name: impl Into<String>, join: TableJoin) -> Self {
        self.joins.insert(name.into(), join);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TableJoin> {
        self.joins.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.joins.keys().map(String::as_str)
    }

    /// Find the join activated by `field`
    ///
    /// The longest matching prefix wins. Equal-length matches on different
    /// joins are ambiguous.
    pub fn resolve_prefix(
        &self,
        field: &str,
    ) -> std::result::Result<Option<(&str, &str)>, CompileError> {
        let mut best: Option<(&str, &str)> = None;
        let mut tied: Vec<String> = Vec::new();

        for (name, join) in &self.joins {
            let Some(prefix) = join.matching_prefix(field) else {
                continue;
            };
            match best {
                Some((_, current)) if current.len() > prefix.len() => {}
                Some((_, current)) if current.len() == prefix.len() => {
                    tied.push(name.clone());
                }
                _ => {
                    best = Some((name.as_str(), prefix));
                    tied = vec![name.clone()];
                }
            }
        }

        if tied.len() > 1 {
            return Err(CompileError::AmbiguousPrefix {
                field: field.to_string(),
                joins: tied,
            });
        }
        Ok(best)
    }
}

fn json_members(key: &str) -> String {
    format!(
        "(SELECT value FROM json_each({}, {}))",
        column(WORK_ITEMS, "fields"),
        json_path(key)
    )
}

impl Default for TableJoinRegistry {
    /// The joins for the related tables of the work item schema
    fn default() -> Self {
        use crate::field::system;

        Self::empty()
            .with_join(
                "iteration",
                TableJoin::new(
                    "iterations",
                    "iter",
                    format!("{} = {}", column("iter", "id"), json_extract(WORK_ITEMS, system::ITERATION)),
                )
                .activated_by(&["iteration."])
                .allowing(&[
                    "id", "space_id", "name", "path", "state", "start_at", "end_at",
                    "created_at", "updated_at",
                ]),
            )
            .with_join(
                "area",
                TableJoin::new(
                    "areas",
                    "ar",
                    format!("{} = {}", column("ar", "id"), json_extract(WORK_ITEMS, system::AREA)),
                )
                .activated_by(&["area."])
                .allowing(&["id", "space_id", "name", "path", "created_at", "updated_at"]),
            )
            .with_join(
                "codebase",
                TableJoin::new(
                    "codebases",
                    "cb",
                    format!("{} = {}", column("cb", "id"), json_extract(WORK_ITEMS, system::CODEBASE)),
                )
                .activated_by(&["codebase."])
                .allowing(&["id", "space_id", "url", "type", "created_at", "updated_at"]),
            )
            .with_join(
                "work_item_type",
                TableJoin::new(
                    "work_item_types",
                    "wit",
                    format!("{} = {}", column("wit", "id"), column(WORK_ITEMS, "type")),
                )
                .activated_by(&["wit.", "workitemtype.", "work_item_type.", "type."])
                .allowing(&[
                    "id", "space_template_id", "name", "description", "can_construct",
                    "extended_type_id", "created_at", "updated_at",
                ]),
            )
            .with_join(
                "space",
                TableJoin::new(
                    "spaces",
                    "space",
                    format!("{} = {}", column("space", "id"), column(WORK_ITEMS, "space_id")),
                )
                .activated_by(&["space."])
                .allowing(&[
                    "id", "name", "description", "space_template_id", "owner_id",
                    "created_at", "updated_at",
                ]),
            )
            .with_join(
                "creator",
                TableJoin::new(
                    "identities",
                    "creator",
                    format!("{} = {}", column("creator", "id"), json_extract(WORK_ITEMS, system::CREATOR)),
                )
                .activated_by(&["creator.", "author."])
                .allowing(&["id", "username", "full_name", "email", "created_at", "updated_at"]),
            )
            .with_join(
                "label",
                TableJoin::new(
                    "labels",
                    "lbl",
                    format!("{} IN {}", column("lbl", "id"), json_members(system::LABELS)),
                )
                .activated_by(&["label."])
                .allowing(&[
                    "id", "space_id", "name", "text_color", "background_color",
                    "created_at", "updated_at",
                ]),
            )
            .with_join(
                "boardcolumns",
                TableJoin::new(
                    "board_columns",
                    "boardcolumns",
                    format!(
                        "{} IN {}",
                        column("boardcolumns", "id"),
                        json_members(system::BOARDCOLUMNS)
                    ),
                )
                .activated_by(&["board.", "boardcolumn."])
                .allowing(&["id", "space_template_id", "name", "column_order"]),
            )
            .with_join(
                "parent_link",
                TableJoin::new(
                    "work_item_links",
                    "parent_link",
                    format!(
                        "{} = {} AND {} = '{}' AND {} IS NULL",
                        column("parent_link", "target_id"),
                        column(WORK_ITEMS, "id"),
                        column("parent_link", "link_type_id"),
                        PARENT_CHILD_LINK_TYPE_ID,
                        column("parent_link", "deleted_at"),
                    ),
                )
                .activated_by(&["parent."])
                .delegating("parent.", "parent"),
            )
            .with_join(
                "parent",
                TableJoin::new(
                    "work_items",
                    "parent",
                    format!(
                        "{} = {} AND {} IS NULL",
                        column("parent", "id"),
                        column("parent_link", "source_id"),
                        column("parent", "deleted_at"),
                    ),
                )
                .allowing(&[
                    "id", "space_id", "type", "number", "version", "execution_order",
                    "created_at", "updated_at",
                ]),
            )
    }
}

/// Order required joins so that each follows the joins it depends on
///
/// A join depends on the joins it activates and on any join delegating to
/// it. Joins without pending dependencies are emitted in name order.
pub fn ordered_for_sql(joins: &[RequiredJoin]) -> Vec<&RequiredJoin> {
    let mut pending: Vec<&RequiredJoin> = joins.iter().collect();
    pending.sort_by(|a, b| a.name.cmp(&b.name));
    let mut emitted: BTreeSet<&str> = BTreeSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|j| {
                dependencies(j, joins)
                    .iter()
                    .all(|d| emitted.contains(d))
            })
            // a dependency cycle falls back to name order
            .unwrap_or(0);
        let next = pending.remove(ready);
        emitted.insert(next.name.as_str());
        ordered.push(next);
    }
    ordered
}

fn dependencies<'a>(join: &'a RequiredJoin, joins: &'a [RequiredJoin]) -> BTreeSet<&'a str> {
    let present = |name: &str| joins.iter().any(|j| j.name == name);
    let mut deps: BTreeSet<&'a str> = join
        .join
        .activate_other_joins
        .iter()
        .map(String::as_str)
        .filter(|n| present(n))
        .collect();
    for other in joins {
        if other.join.delegate_to.values().any(|d| d == &join.name) {
            deps.insert(other.name.as_str());
        }
    }
    deps.remove(join.name.as_str());
    deps
}

/// The `LEFT JOIN ...` clauses for `joins`, in dependency order
pub fn join_clauses(joins: &[RequiredJoin]) -> String {
    ordered_for_sql(joins)
        .into_iter()
        .map(|j| j.join.join_clause())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_schema;

    fn required(name: &str, join: TableJoin) -> RequiredJoin {
        RequiredJoin {
            name: name.to_string(),
            join,
            handled_columns: Vec::new(),
        }
    }

    #[test]
    fn test_matching_prefix_prefers_longest() {
        let join = TableJoin::new("t", "t", "1 = 1").activated_by(&["a.", "a.b."]);
        assert_eq!(join.matching_prefix("a.b.c"), Some("a.b."));
        assert_eq!(join.matching_prefix("a.c"), Some("a."));
        assert_eq!(join.matching_prefix("b.c"), None);
    }

    #[test]
    fn test_resolve_prefix_ambiguous() {
        let registry = TableJoinRegistry::empty()
            .with_join("one", TableJoin::new("t1", "t1", "1 = 1").activated_by(&["x."]))
            .with_join("two", TableJoin::new("t2", "t2", "1 = 1").activated_by(&["x."]));
        let err = registry.resolve_prefix("x.name").unwrap_err();
        assert!(matches!(err, CompileError::AmbiguousPrefix { .. }));
    }

    #[test]
    fn test_resolve_prefix_longest_across_joins() {
        let registry = TableJoinRegistry::empty()
            .with_join("short", TableJoin::new("t1", "t1", "1 = 1").activated_by(&["x."]))
            .with_join("long", TableJoin::new("t2", "t2", "1 = 1").activated_by(&["x.y."]));
        assert_eq!(
            registry.resolve_prefix("x.y.name").unwrap(),
            Some(("long", "x.y."))
        );
        assert_eq!(registry.resolve_prefix("x.name").unwrap(), Some(("short", "x.")));
        assert_eq!(registry.resolve_prefix("name").unwrap(), None);
    }

    #[test]
    fn test_default_registry_joins() {
        let registry = TableJoinRegistry::default();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "area",
                "boardcolumns",
                "codebase",
                "creator",
                "iteration",
                "label",
                "parent",
                "parent_link",
                "space",
                "work_item_type",
            ]
        );
        assert_eq!(
            registry.resolve_prefix("author.username").unwrap(),
            Some(("creator", "author."))
        );
    }

    #[test]
    fn test_default_joins_validate_against_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let registry = TableJoinRegistry::default();
        for name in registry.names() {
            let join = registry.get(name).unwrap();
            join.validate(&conn, &join.allowed_columns).unwrap();
        }
    }

    #[test]
    fn test_validate_rejects_unknown_column_and_table() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let join = TableJoin::new("iterations", "iter", "1 = 1");
        assert!(join.validate(&conn, &["name".to_string()]).is_ok());
        assert!(join.validate(&conn, &["nope".to_string()]).is_err());

        let missing = TableJoin::new("no_such_table", "x", "1 = 1");
        assert!(missing.validate(&conn, &[]).is_err());
    }

    #[test]
    fn test_ordered_for_sql_puts_delegates_after_delegators() {
        let registry = TableJoinRegistry::default();
        let joins = vec![
            required("parent", registry.get("parent").unwrap().clone()),
            required("parent_link", registry.get("parent_link").unwrap().clone()),
        ];
        let ordered: Vec<&str> = ordered_for_sql(&joins).iter().map(|j| j.name.as_str()).collect();
        assert_eq!(ordered, vec!["parent_link", "parent"]);
    }

    #[test]
    fn test_ordered_for_sql_puts_activated_joins_first() {
        let joins = vec![
            required("a", TableJoin::new("t", "a", "1 = 1").activating(&["b"])),
            required("b", TableJoin::new("t", "b", "1 = 1")),
        ];
        let ordered: Vec<&str> = ordered_for_sql(&joins).iter().map(|j| j.name.as_str()).collect();
        assert_eq!(ordered, vec!["b", "a"]);
    }
}
