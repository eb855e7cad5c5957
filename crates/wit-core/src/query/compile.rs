//! Expression to SQL compilation
//!
//! Each `Field(name)` is resolved in order:
//!
//! 1. a fixed column of the work item table (`id`, `type`, `number`, ...)
//! 2. a column of a registered table join whose prefix matches the name
//! 3. a key inside the JSON `fields` column
//!
//! Equality against a JSON key compiles to a containment test that matches
//! both scalar values and members of list values. Compilation never stops
//! at the first problem: every error found in the tree is reported.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::join::{RequiredJoin, TableJoinRegistry};
use super::CompileError;
use crate::criteria::Expression;
use crate::field::system;
use crate::storage::sql::{column, escape_like, json_extract, json_path, FOLD_CASE, WORK_ITEMS};

/// Limit on delegation hops between joins
const MAX_DELEGATION_DEPTH: usize = 8;

/// Output of a successful compilation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub where_clause: String,
    /// Positional parameters, in the order their `?` appear in the clause
    pub parameters: Vec<SqlValue>,
    /// Joins the clause needs, sorted by name
    pub joins: Vec<RequiredJoin>,
}

/// Compile `expression` against the joins in `registry`
pub fn compile(
    expression: &Expression,
    registry: &TableJoinRegistry,
) -> Result<CompiledQuery, Vec<CompileError>> {
    let mut compiler = Compiler::new(registry);
    let where_clause = compiler.expression(expression);

    if !compiler.errors.is_empty() {
        return Err(compiler.errors);
    }

    Ok(CompiledQuery {
        where_clause,
        parameters: compiler.parameters,
        joins: compiler.active.into_values().collect(),
    })
}

/// Where a field name resolves to
enum Target {
    /// A column reference, already quoted
    Column(String),
    /// A key of the JSON `fields` column
    Json(String),
}

struct Compiler<'r> {
    registry: &'r TableJoinRegistry,
    parameters: Vec<SqlValue>,
    active: BTreeMap<String, RequiredJoin>,
    errors: Vec<CompileError>,
}

impl<'r> Compiler<'r> {
    fn new(registry: &'r TableJoinRegistry) -> Self {
        Self {
            registry,
            parameters: Vec::new(),
            active: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    fn expression(&mut self, expression: &Expression) -> String {
        match expression {
            Expression::Literal { value } => self.literal(value),
            Expression::Field { name } => match self.resolve(name) {
                Some(Target::Column(sql)) => sql,
                Some(Target::Json(key)) => json_extract(WORK_ITEMS, &key),
                None => String::new(),
            },
            Expression::Equals { left, right } => self.comparison(left, right, false),
            Expression::Not { left, right } => self.comparison(left, right, true),
            Expression::And { left, right } => {
                let l = self.expression(left);
                let r = self.expression(right);
                format!("({} AND {})", l, r)
            }
            Expression::Or { left, right } => {
                let l = self.expression(left);
                let r = self.expression(right);
                format!("({} OR {})", l, r)
            }
            Expression::IsNull { field } => match self.resolve(field) {
                Some(Target::Column(sql)) => format!("({} IS NULL)", sql),
                Some(Target::Json(key)) => format!("({} IS NULL)", json_extract(WORK_ITEMS, &key)),
                None => String::new(),
            },
            Expression::Substring { field, value } => self.substring(field, value),
        }
    }

    fn literal(&mut self, value: &Value) -> String {
        match scalar_parameter(value) {
            Some(parameter) => {
                self.parameters.push(parameter);
                "?".to_string()
            }
            None => {
                self.errors
                    .push(CompileError::UnsupportedLiteral(value.to_string()));
                String::new()
            }
        }
    }

    fn comparison(&mut self, left: &Expression, right: &Expression, negate: bool) -> String {
        if let Some((key, value)) = self.containment_operands(left, right) {
            return self.containment(key, value, negate);
        }

        let l = self.expression(left);
        let r = self.expression(right);
        let op = if negate { "!=" } else { "=" };
        format!("({} {} {})", l, op, r)
    }

    /// A JSON field compared with a literal, in either operand order
    fn containment_operands<'e>(
        &self,
        left: &'e Expression,
        right: &'e Expression,
    ) -> Option<(&'e str, &'e Value)> {
        let (name, value) = match (left, right) {
            (Expression::Field { name }, Expression::Literal { value })
            | (Expression::Literal { value }, Expression::Field { name }) => (name, value),
            _ => return None,
        };
        if has_quotes(name) || fixed_column(name).is_some() {
            return None;
        }
        match self.registry.resolve_prefix(name) {
            Ok(None) => Some((name.as_str(), value)),
            _ => None,
        }
    }

    fn containment(&mut self, key: &str, value: &Value, negate: bool) -> String {
        let members: Vec<&Value> = match value {
            Value::Array(items) if items.is_empty() => {
                self.unsupported(key, "cannot compare against an empty list");
                return String::new();
            }
            Value::Array(items) => items.iter().collect(),
            Value::Null => {
                self.unsupported(key, "cannot compare against null, use IsNull");
                return String::new();
            }
            other => vec![other],
        };

        let mut tests = Vec::with_capacity(members.len());
        for member in members {
            let Some(parameter) = scalar_parameter(member) else {
                self.unsupported(key, "list and object values cannot be matched");
                return String::new();
            };
            self.parameters.push(parameter);
            tests.push(format!(
                "EXISTS (SELECT 1 FROM json_each({}, {}) WHERE json_each.value = ?)",
                column(WORK_ITEMS, "fields"),
                json_path(key)
            ));
        }

        let clause = format!("({})", tests.join(" AND "));
        if negate {
            format!("NOT {}", clause)
        } else {
            clause
        }
    }

    fn substring(&mut self, field: &Expression, value: &Expression) -> String {
        let Expression::Field { name } = field else {
            self.errors.push(CompileError::Unsupported {
                field: format!("{:?}", field),
                reason: "substring requires a field on the left".to_string(),
            });
            return String::new();
        };
        let target = match self.resolve(name) {
            Some(Target::Column(sql)) => sql,
            Some(Target::Json(key)) => json_extract(WORK_ITEMS, &key),
            None => return String::new(),
        };
        let Expression::Literal {
            value: Value::String(text),
        } = value
        else {
            self.unsupported(name, "substring requires a string literal");
            return String::new();
        };

        // both sides folded so non-ASCII text matches case-insensitively
        self.parameters.push(SqlValue::Text(format!(
            "%{}%",
            escape_like(&text.to_lowercase())
        )));
        format!("({}({}) LIKE ? ESCAPE '\\')", FOLD_CASE, target)
    }

    fn unsupported(&mut self, field: &str, reason: &str) {
        self.errors.push(CompileError::Unsupported {
            field: field.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Resolve a field name, recording errors and activated joins
    fn resolve(&mut self, name: &str) -> Option<Target> {
        if name.contains('"') {
            self.errors.push(CompileError::DoubleQuote(name.to_string()));
            return None;
        }
        if name.contains('\'') {
            self.errors.push(CompileError::SingleQuote(name.to_string()));
            return None;
        }

        if let Some(col) = fixed_column(name) {
            return Some(Target::Column(column(WORK_ITEMS, col)));
        }

        match self.registry.resolve_prefix(name) {
            Ok(Some((join_name, prefix))) => {
                let join_name = join_name.to_string();
                let prefix = prefix.to_string();
                self.resolve_join(name, &join_name, &prefix)
                    .map(Target::Column)
            }
            Ok(None) => Some(Target::Json(name.to_string())),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    fn resolve_join(&mut self, name: &str, join_name: &str, prefix: &str) -> Option<String> {
        let mut current = join_name.to_string();
        for _ in 0..MAX_DELEGATION_DEPTH {
            self.activate(&current);
            let delegate = self
                .registry
                .get(&current)
                .and_then(|j| j.delegate_to.get(prefix))
                .filter(|d| **d != current)
                .cloned();
            match delegate {
                Some(next) => {
                    if self.registry.get(&next).is_none() {
                        self.errors.push(CompileError::UnknownJoin {
                            join: current,
                            target: next,
                        });
                        return None;
                    }
                    current = next;
                }
                None => break,
            }
        }

        let col = &name[prefix.len()..];
        let join = self.registry.get(&current)?;
        let valid_identifier =
            !col.is_empty() && col.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_identifier || !join.is_allowed(col) {
            self.errors.push(CompileError::ColumnNotAllowed {
                join: current,
                column: col.to_string(),
            });
            return None;
        }

        let sql = column(&join.table_alias, col);
        if let Some(required) = self.active.get_mut(&current) {
            if !required.handled_columns.iter().any(|c| c == col) {
                required.handled_columns.push(col.to_string());
            }
        }
        Some(sql)
    }

    /// Mark a join, and the joins it activates, as required
    fn activate(&mut self, name: &str) {
        if self.active.contains_key(name) {
            return;
        }
        let Some(join) = self.registry.get(name) else {
            self.errors.push(CompileError::UnknownJoin {
                join: name.to_string(),
                target: name.to_string(),
            });
            return;
        };
        self.active.insert(
            name.to_string(),
            RequiredJoin {
                name: name.to_string(),
                join: join.clone(),
                handled_columns: Vec::new(),
            },
        );
        for other in join.activate_other_joins.clone() {
            self.activate(&other);
        }
    }
}

fn has_quotes(name: &str) -> bool {
    name.contains('"') || name.contains('\'')
}

/// The work item column a field name refers to, if any
fn fixed_column(name: &str) -> Option<&'static str> {
    if let Some(col) = system::backing_column(name) {
        return Some(col);
    }
    match name.to_ascii_lowercase().as_str() {
        "id" => Some("id"),
        "type" => Some("type"),
        "version" => Some("version"),
        "number" => Some("number"),
        "space_id" | "spaceid" => Some("space_id"),
        "execution_order" => Some("execution_order"),
        "created_at" => Some("created_at"),
        "updated_at" => Some("updated_at"),
        _ => None,
    }
}

fn scalar_parameter(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => Some(SqlValue::Null),
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TableJoin;
    use serde_json::json;

    fn compile_default(expression: &Expression) -> Result<CompiledQuery, Vec<CompileError>> {
        compile(expression, &TableJoinRegistry::default())
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn test_fixed_column_equality() {
        let q = compile_default(&Expression::field_equals("Type", "abc")).unwrap();
        assert_eq!(q.where_clause, r#"("work_items"."type" = ?)"#);
        assert_eq!(q.parameters, vec![text("abc")]);
        assert!(q.joins.is_empty());
    }

    #[test]
    fn test_not_on_column_uses_negated_operator() {
        let q = compile_default(&Expression::not(
            Expression::field("system.number"),
            Expression::literal(3),
        ))
        .unwrap();
        assert_eq!(q.where_clause, r#"("work_items"."number" != ?)"#);
        assert_eq!(q.parameters, vec![SqlValue::Integer(3)]);
    }

    #[test]
    fn test_json_equality_is_containment() {
        let q = compile_default(&Expression::field_equals("system.title", "foo")).unwrap();
        assert_eq!(
            q.where_clause,
            r#"(EXISTS (SELECT 1 FROM json_each("work_items"."fields", '$."system.title"') WHERE json_each.value = ?))"#
        );
        assert_eq!(q.parameters, vec![text("foo")]);
    }

    #[test]
    fn test_literal_on_left_is_swapped() {
        let left = compile_default(&Expression::equals(
            Expression::literal("foo"),
            Expression::field("system.title"),
        ))
        .unwrap();
        let right = compile_default(&Expression::field_equals("system.title", "foo")).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn test_json_not_wraps_containment() {
        let q = compile_default(&Expression::not(
            Expression::field("system.state"),
            Expression::literal("closed"),
        ))
        .unwrap();
        assert!(q.where_clause.starts_with("NOT (EXISTS"));
    }

    #[test]
    fn test_array_literal_is_conjunction() {
        let q = compile_default(&Expression::field_equals("system.assignees", json!(["a", "b"])))
            .unwrap();
        assert_eq!(q.where_clause.matches("EXISTS").count(), 2);
        assert!(q.where_clause.contains(") AND EXISTS"));
        assert_eq!(q.parameters, vec![text("a"), text("b")]);
    }

    #[test]
    fn test_bad_array_literals_are_errors() {
        for value in [json!([]), json!([["nested"]]), json!([{"a": 1}]), Value::Null] {
            let errors =
                compile_default(&Expression::field_equals("system.assignees", value)).unwrap_err();
            assert!(matches!(errors[0], CompileError::Unsupported { .. }));
        }
    }

    #[test]
    fn test_is_null() {
        let q = compile_default(&Expression::is_null("system.assignees")).unwrap();
        assert_eq!(
            q.where_clause,
            r#"(json_extract("work_items"."fields", '$."system.assignees"') IS NULL)"#
        );
        assert!(q.parameters.is_empty());

        let q = compile_default(&Expression::is_null("iteration.name")).unwrap();
        assert_eq!(q.where_clause, r#"("iter"."name" IS NULL)"#);
    }

    #[test]
    fn test_and_or_parenthesize_in_order() {
        let q = compile_default(&Expression::or(
            Expression::literal(true),
            Expression::literal(false),
        ))
        .unwrap();
        assert_eq!(q.where_clause, "(? OR ?)");
        assert_eq!(q.parameters, vec![SqlValue::Integer(1), SqlValue::Integer(0)]);

        let q = compile_default(&Expression::and(
            Expression::field_equals("version", 1),
            Expression::field_equals("number", 2),
        ))
        .unwrap();
        assert_eq!(
            q.where_clause,
            r#"(("work_items"."version" = ?) AND ("work_items"."number" = ?))"#
        );
        assert_eq!(q.parameters, vec![SqlValue::Integer(1), SqlValue::Integer(2)]);
    }

    #[test]
    fn test_substring_escapes_pattern() {
        let q = compile_default(&Expression::substring("system.title", "50%_off")).unwrap();
        assert_eq!(
            q.where_clause,
            r#"(fold_case(json_extract("work_items"."fields", '$."system.title"')) LIKE ? ESCAPE '\')"#
        );
        assert_eq!(q.parameters, vec![text("%50\\%\\_off%")]);

        let q = compile_default(&Expression::substring("system.title", "ÄRGER")).unwrap();
        assert_eq!(q.parameters, vec![text("%ärger%")]);
    }

    #[test]
    fn test_substring_requires_string_literal() {
        let errors = compile_default(&Expression::Substring {
            field: Box::new(Expression::field("system.title")),
            value: Box::new(Expression::literal(5)),
        })
        .unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_join_resolution() {
        let q = compile_default(&Expression::field_equals("iteration.name", "sprint 1")).unwrap();
        assert_eq!(q.where_clause, r#"("iter"."name" = ?)"#);
        assert_eq!(q.joins.len(), 1);
        assert_eq!(q.joins[0].name, "iteration");
        assert_eq!(q.joins[0].handled_columns, vec!["name"]);
    }

    #[test]
    fn test_parent_delegation_activates_both_joins() {
        let q = compile_default(&Expression::field_equals("parent.number", 7)).unwrap();
        assert_eq!(q.where_clause, r#"("parent"."number" = ?)"#);
        let names: Vec<&str> = q.joins.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["parent", "parent_link"]);
        assert_eq!(q.joins[0].handled_columns, vec!["number"]);
        assert!(q.joins[1].handled_columns.is_empty());
    }

    #[test]
    fn test_activate_other_joins() {
        let registry = TableJoinRegistry::empty()
            .with_join(
                "custom1",
                TableJoin::new("iterations", "cust1", "1 = 1").activated_by(&["custom1."]),
            )
            .with_join(
                "custom2",
                TableJoin::new("areas", "cust2", "1 = 1")
                    .activated_by(&["custom2."])
                    .activating(&["custom1"]),
            );

        let q = compile(&Expression::field_equals("custom2.name", "x"), &registry).unwrap();
        let names: Vec<&str> = q.joins.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["custom1", "custom2"]);
        assert_eq!(q.joins[1].join.activate_other_joins, vec!["custom1"]);
    }

    #[test]
    fn test_disallowed_join_column() {
        let errors = compile_default(&Expression::field_equals("iteration.secret", "x")).unwrap_err();
        assert!(matches!(errors[0], CompileError::ColumnNotAllowed { .. }));
    }

    #[test]
    fn test_quoted_field_names_are_rejected() {
        for name in ["system.ti\"tle", "system.ti'tle", "iteration.na'me", "'"] {
            let errors = compile_default(&Expression::field_equals(name, "x")).unwrap_err();
            assert!(!errors.is_empty(), "accepted {}", name);
        }
        let errors = compile_default(&Expression::is_null("a\"b")).unwrap_err();
        assert_eq!(
            errors[0].to_string(),
            "field name must not contain double quotes: a\"b"
        );
    }

    #[test]
    fn test_errors_are_collected() {
        let errors = compile_default(&Expression::and(
            Expression::field_equals("a'b", 1),
            Expression::and(
                Expression::is_null("c\"d"),
                Expression::field_equals("iteration.bogus", 1),
            ),
        ))
        .unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let expression = Expression::and(
            Expression::or(
                Expression::field_equals("label.name", "bug"),
                Expression::field_equals("area.name", "core"),
            ),
            Expression::and(
                Expression::substring("system.title", "crash"),
                Expression::field_equals("parent.number", 3),
            ),
        );
        let first = compile_default(&expression).unwrap();
        for _ in 0..10 {
            assert_eq!(compile_default(&expression).unwrap(), first);
        }
        let names: Vec<&str> = first.joins.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["area", "label", "parent", "parent_link"]);
    }
}
