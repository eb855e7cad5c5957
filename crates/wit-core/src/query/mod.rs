//! SQL compiler for filter criteria
//!
//! Turns an [`Expression`](crate::criteria::Expression) into a WHERE clause,
//! its positional parameters and the table joins it needs.
//!
//! ## Architecture
//!
//! - `join`: `TableJoin` descriptors and the `TableJoinRegistry`
//! - `compile`: the compiler itself
//!
//! Compilation is pure: the same expression and registry always produce
//! byte-identical output.

mod compile;
mod join;

use thiserror::Error;

pub use compile::{compile, CompiledQuery};
pub use join::{join_clauses, ordered_for_sql, RequiredJoin, TableJoin, TableJoinRegistry};

/// A problem found while compiling an expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("field name must not contain double quotes: {0}")]
    DoubleQuote(String),

    #[error("field name must not contain single quotes: {0}")]
    SingleQuote(String),

    #[error("field '{field}' matches the prefixes of several table joins: {joins:?}")]
    AmbiguousPrefix { field: String, joins: Vec<String> },

    #[error("table join '{join}' cannot resolve column '{column}'")]
    ColumnNotAllowed { join: String, column: String },

    #[error("table join '{join}' refers to unknown join '{target}'")]
    UnknownJoin { join: String, target: String },

    #[error("field '{field}': {reason}")]
    Unsupported { field: String, reason: String },

    #[error("unsupported literal: {0}")]
    UnsupportedLiteral(String),
}
