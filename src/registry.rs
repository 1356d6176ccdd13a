//! Server registry: the ordered, de-duplicated rotation inside the scheduler
//! document.
//!
//! A worker that never made it into the registry can never be granted a
//! turn, so callers should treat a registration error as fatal.

use crate::error::Result;
use crate::model::{SchedulerState, ServerId};
use crate::store::{DocumentStore, TxOutcome, Update};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::info;

/// Update function for registration.
///
/// Creates the document with `id` as its only member when absent, appends
/// `id` at the tail when missing, and aborts when `id` is already present
/// so existing order is never touched.
pub fn registration(current: Option<SchedulerState>, id: &ServerId) -> Update {
    match current {
        None => Update::Commit(SchedulerState::new(id.clone())),
        Some(state) if state.contains(id) => Update::Abort,
        Some(mut state) => {
            state.servers.push(id.clone());
            Update::Commit(state)
        }
    }
}

#[derive(Clone)]
pub struct ServerRegistry {
    store: Arc<dyn DocumentStore>,
}

impl ServerRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Add `id` to the rotation. Returns whether it was newly added.
    pub async fn register(&self, id: &ServerId) -> Result<bool> {
        let outcome = self
            .store
            .transact(&|current| registration(current, id))
            .await?;

        let added = outcome.is_committed();
        if let TxOutcome::Committed(ref state) = outcome {
            info!(
                server_id = %id,
                position = state.servers.len() - 1,
                "server registered in the rotation"
            );
        } else {
            info!(server_id = %id, "server was already registered");
        }
        metrics::registrations().add(
            1,
            &[KeyValue::new(
                "result",
                if added { "added" } else { "present" },
            )],
        );
        Ok(added)
    }

    /// Current rotation, empty when the document does not exist yet.
    pub async fn servers(&self) -> Result<Vec<ServerId>> {
        Ok(self
            .store
            .load()
            .await?
            .map(|state| state.servers)
            .unwrap_or_default())
    }
}
