//! Work item tracking core
//!
//! This crate stores work items: typed, versioned records whose
//! attributes are declared by a work item type and kept in one JSON column.
//!
//! # Architecture
//!
//! - **SQLite**: the single store, through `rusqlite`
//! - **Criteria**: filters are expression trees compiled to parameterized SQL
//! - **Optimistic concurrency**: every write carries the version it read
//!
//! # Quick Start
//!
//! ```text
//! let mut db = Database::open(&Config::load()?)?;
//! let repo = WorkItemRepository::new(TableJoinRegistry::default());
//! let ctx = CancelToken::new();
//!
//! let item = db.write(|tx| repo.create(&ctx, tx, space_id, type_id, fields, user_id))?;
//! let filter = Expression::field_equals("system.title", "foo");
//! let open = db.read(|tx| repo.count(&ctx, tx, space_id, Some(&filter)))?;
//! ```
//!
//! # Modules
//!
//! - `store`: work item operations (main entry point)
//! - `field`: field kinds, definitions and work item types
//! - `criteria`: filter expressions
//! - `query`: expression to SQL compiler and table joins
//! - `catalog`: spaces, identities, iterations and the other related records
//! - `storage`: SQLite connection and schema
//! - `config`: application configuration

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod criteria;
pub mod error;
pub mod field;
pub mod model;
pub mod query;
pub mod storage;
pub mod store;

pub use cancel::CancelToken;
pub use config::Config;
pub use criteria::Expression;
pub use error::{Error, Result};
pub use field::{FieldDefinition, FieldType, Kind, WorkItemType};
pub use model::{Fields, WorkItem, WorkItemStorage};
pub use query::{compile, CompileError, CompiledQuery, TableJoinRegistry};
pub use storage::Database;
pub use store::{
    IterationCounts, ListOptions, ReorderDirection, SortOrder, WorkItemRepository,
    WorkItemTypeRepository,
};
