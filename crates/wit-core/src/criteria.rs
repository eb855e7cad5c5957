//! Filter criteria
//!
//! A small expression tree used to filter work items. Expressions are
//! compiled into SQL by [`crate::query::compile`].
//!
//! Expressions serialize as tagged JSON objects, e.g.
//!
//! ```text
//! {"op": "equals",
//!  "left": {"op": "field", "name": "system.state"},
//!  "right": {"op": "literal", "value": "open"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expression {
    /// A constant value
    Literal { value: Value },
    /// A reference to a work item field, column or joined column
    Field { name: String },
    Equals {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Inequality
    Not {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Or {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    IsNull { field: String },
    /// Case-insensitive substring match of a field against a string literal
    Substring {
        field: Box<Expression>,
        value: Box<Expression>,
    },
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal {
            value: value.into(),
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expression::Field { name: name.into() }
    }

    pub fn equals(left: Expression, right: Expression) -> Self {
        Expression::Equals {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(left: Expression, right: Expression) -> Self {
        Expression::Not {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Expression::IsNull {
            field: field.into(),
        }
    }

    pub fn substring(field: impl Into<String>, value: impl Into<String>) -> Self {
        Expression::Substring {
            field: Box::new(Expression::field(field)),
            value: Box::new(Expression::literal(value.into())),
        }
    }

    /// Shorthand for `field == value`
    pub fn field_equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Expression::equals(Expression::field(name), Expression::literal(value))
    }

    /// Join expressions with AND, `None` when the iterator is empty
    pub fn all(expressions: impl IntoIterator<Item = Expression>) -> Option<Self> {
        expressions.into_iter().reduce(Expression::and)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_from_json() {
        let parsed: Expression = serde_json::from_value(json!({
            "op": "and",
            "left": {"op": "equals",
                     "left": {"op": "field", "name": "system.state"},
                     "right": {"op": "literal", "value": "open"}},
            "right": {"op": "is_null", "field": "system.iteration"}
        }))
        .unwrap();

        assert_eq!(
            parsed,
            Expression::and(
                Expression::field_equals("system.state", "open"),
                Expression::is_null("system.iteration"),
            )
        );
    }

    #[test]
    fn test_all() {
        assert_eq!(Expression::all(Vec::new()), None);
        let combined = Expression::all(vec![
            Expression::field_equals("a", 1),
            Expression::field_equals("b", 2),
        ])
        .unwrap();
        assert!(matches!(combined, Expression::And { .. }));
    }
}
