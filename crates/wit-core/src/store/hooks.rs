//! Pre- and post-mutation hooks
//!
//! Hooks are registered on the `WorkItemRepository` and invoked inline for
//! every create, update, reorder and delete. A `before_write` error aborts
//! the mutation before anything is written.

use std::fmt;

use crate::error::Result;
use crate::model::WorkItemStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Reorder,
    Delete,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mutation::Create => "create",
            Mutation::Update => "update",
            Mutation::Reorder => "reorder",
            Mutation::Delete => "delete",
        };
        f.write_str(name)
    }
}

pub trait MutationHook: Send + Sync {
    /// Called with the row about to be written
    fn before_write(&self, _mutation: Mutation, _item: &WorkItemStorage) -> Result<()> {
        Ok(())
    }

    /// Called with the row after it and its revision were written
    fn after_write(&self, _mutation: Mutation, _item: &WorkItemStorage) -> Result<()> {
        Ok(())
    }
}
