//! Shared document store contract.
//!
//! Workers never talk to each other. Everything they agree on goes through
//! one document that supports two operations: an atomic read-modify-or-abort
//! transaction driven by a pure update function, and an unconditional write
//! of the `running` flag.

pub mod memory;

use crate::error::Result;
use crate::model::SchedulerState;
use async_trait::async_trait;

pub use memory::MemoryStore;

/// What an update function wants done with the document it was shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Replace the document with this state.
    Commit(SchedulerState),
    /// Leave the document untouched. Discards every local mutation.
    Abort,
}

/// Result of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// The new document as written.
    Committed(SchedulerState),
    /// Nothing was written. Carries the document the update function last saw.
    Aborted(Option<SchedulerState>),
}

impl TxOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }
}

/// The transition function handed to [`DocumentStore::transact`].
///
/// Must be pure: the store may evaluate it more than once when a concurrent
/// writer wins the race, and only the last evaluation takes effect.
pub type UpdateFn<'a> = &'a (dyn Fn(Option<SchedulerState>) -> Update + Send + Sync);

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Atomically evaluate `update` against the current document and apply
    /// its verdict. Concurrent transactions are serialized: each sees the
    /// effect of the previously committed one.
    async fn transact(&self, update: UpdateFn<'_>) -> Result<TxOutcome>;

    /// Unconditionally set the `running` flag, outside any transaction.
    async fn set_running(&self, running: bool) -> Result<()>;

    /// Read the current document.
    async fn load(&self) -> Result<Option<SchedulerState>>;
}
