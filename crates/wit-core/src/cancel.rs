//! Cancellation for in-flight operations
//!
//! A `CancelToken` is handed to every store operation. Cancelling it sets a
//! flag that the store checks before each statement, and interrupts any
//! statement already running on a connection attached to the token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, InterruptHandle};

use crate::error::{Error, Result};

/// Cloneable cancellation signal shared between a caller and the store
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    interrupts: Arc<Mutex<Vec<InterruptHandle>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection so that `cancel` also aborts its running statement
    pub fn attach(&self, conn: &Connection) {
        if let Ok(mut handles) = self.interrupts.lock() {
            handles.push(conn.get_interrupt_handle());
        }
    }

    /// Cancel every operation observing this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Ok(handles) = self.interrupts.lock() {
            for handle in handles.iter() {
                handle.interrupt();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Error::Cancelled` once the token has been cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
