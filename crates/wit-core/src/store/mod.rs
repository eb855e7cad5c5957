//! Work item store
//!
//! The typed operations over work items: create, load, save, delete,
//! reorder, list, count and iteration rollups.
//!
//! ## Architecture
//!
//! - **WorkItemRepository**: the entry point. Holds the join registry used
//!   to compile filters, the configured closed states and any mutation hooks
//! - **WorkItemTypeRepository**: stores types and resolves inheritance
//! - **RevisionRepository**: append-only history, one row per mutation
//!
//! Every write is a compare-and-swap on `version`. Callers run each
//! operation inside one transaction (see `Database::write`) and roll back
//! on any error.

mod counts;
mod hooks;
mod reorder;
mod repository;
mod revision;
mod row;
mod type_change;
mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use counts::IterationCounts;
pub use hooks::{Mutation, MutationHook};
pub use reorder::ReorderDirection;
pub use repository::{ListOptions, SortOrder, WorkItemRepository, ORDER_STEP};
pub use revision::{Revision, RevisionRepository, RevisionType};
pub use types::WorkItemTypeRepository;
