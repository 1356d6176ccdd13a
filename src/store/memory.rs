//! In-process document store.
//!
//! Holds the document behind a mutex, so every transaction is trivially
//! serialized. Used by tests and by single-host setups that do not need a
//! database. Fault switches let tests simulate an unreachable store.

use super::{DocumentStore, TxOutcome, Update, UpdateFn};
use crate::error::{Error, Result};
use crate::model::SchedulerState;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<SchedulerState>>,
    transactions_down: AtomicBool,
    writes_down: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document.
    pub fn with_state(state: SchedulerState) -> Self {
        Self {
            document: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Current document, read synchronously.
    pub fn snapshot(&self) -> Option<SchedulerState> {
        self.document().clone()
    }

    /// Number of committed transactions so far.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make transactions fail as if the store were unreachable.
    pub fn fail_transactions(&self, down: bool) {
        self.transactions_down.store(down, Ordering::SeqCst);
    }

    /// Make unconditional writes fail.
    pub fn fail_writes(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    fn document(&self) -> MutexGuard<'_, Option<SchedulerState>> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn transact(&self, update: UpdateFn<'_>) -> Result<TxOutcome> {
        if self.transactions_down.load(Ordering::SeqCst) {
            return Err(Error::Other("memory store: transactions unavailable".to_string()));
        }

        let mut document = self.document();
        let current = document.clone();
        match update(current.clone()) {
            Update::Commit(next) => {
                *document = Some(next.clone());
                self.commits.fetch_add(1, Ordering::SeqCst);
                Ok(TxOutcome::Committed(next))
            }
            Update::Abort => Ok(TxOutcome::Aborted(current)),
        }
    }

    async fn set_running(&self, running: bool) -> Result<()> {
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(Error::Other("memory store: writes unavailable".to_string()));
        }

        let mut document = self.document();
        document.get_or_insert_with(SchedulerState::default).running = running;
        Ok(())
    }

    async fn load(&self) -> Result<Option<SchedulerState>> {
        Ok(self.snapshot())
    }
}
