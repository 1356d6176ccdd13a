//! Scheduler document on Postgres.
//!
//! The document is one JSONB row in `documents`, keyed by path. A
//! transaction locks the row with `FOR UPDATE`, so concurrent workers queue
//! up behind each other and each one evaluates its update function against
//! the state the previous one committed. The only unlocked window is the
//! very first write, when there is no row to lock yet: the insert uses
//! `ON CONFLICT DO NOTHING` and the loser re-runs its update function
//! against the winner's document.

use super::Db;
use crate::error::{Error, Result};
use crate::model::SchedulerState;
use crate::store::{DocumentStore, TxOutcome, Update, UpdateFn};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::debug;

/// Transaction attempts before giving up with [`Error::Conflict`].
pub const MAX_TX_ATTEMPTS: u32 = 25;

/// A [`DocumentStore`] backed by a row of the `documents` table.
#[derive(Clone)]
pub struct PgDocumentStore {
    db: Arc<Db>,
    path: String,
}

impl PgDocumentStore {
    pub fn new(db: Arc<Db>, path: impl Into<String>) -> Self {
        Self {
            db,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn count(operation: &'static str) {
    metrics::store_operations().add(1, &[KeyValue::new("operation", operation)]);
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn transact(&self, update: UpdateFn<'_>) -> Result<TxOutcome> {
        for attempt in 1..=MAX_TX_ATTEMPTS {
            let mut tx = self.db.pool().begin().await?;

            let row: Option<(serde_json::Value,)> =
                sqlx::query_as("SELECT body FROM documents WHERE path = $1 FOR UPDATE")
                    .bind(&self.path)
                    .fetch_optional(&mut *tx)
                    .await?;
            let current = row
                .map(|(body,)| serde_json::from_value::<SchedulerState>(body))
                .transpose()?;
            let existed = current.is_some();

            let next = match update(current.clone()) {
                Update::Abort => {
                    tx.rollback().await?;
                    count("abort");
                    return Ok(TxOutcome::Aborted(current));
                }
                Update::Commit(next) => next,
            };
            let body = serde_json::to_value(&next)?;

            if existed {
                sqlx::query("UPDATE documents SET body = $2, updated_at = now() WHERE path = $1")
                    .bind(&self.path)
                    .bind(&body)
                    .execute(&mut *tx)
                    .await?;
            } else {
                let inserted = sqlx::query(
                    "INSERT INTO documents (path, body, updated_at) VALUES ($1, $2, now())
                     ON CONFLICT (path) DO NOTHING",
                )
                .bind(&self.path)
                .bind(&body)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if inserted == 0 {
                    // Another worker created the document first; re-evaluate against theirs.
                    tx.rollback().await?;
                    count("retry");
                    debug!(path = %self.path, attempt, "document created concurrently, retrying");
                    continue;
                }
            }

            tx.commit().await?;
            count("commit");
            return Ok(TxOutcome::Committed(next));
        }

        Err(Error::Conflict {
            path: self.path.clone(),
            attempts: MAX_TX_ATTEMPTS,
        })
    }

    async fn set_running(&self, running: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (path, body, updated_at)
             VALUES ($1, jsonb_build_object('is_running', $2::boolean), now())
             ON CONFLICT (path) DO UPDATE
             SET body = jsonb_set(documents.body, '{is_running}', to_jsonb($2::boolean)),
                 updated_at = now()",
        )
        .bind(&self.path)
        .bind(running)
        .execute(self.db.pool())
        .await?;
        count("set_running");
        Ok(())
    }

    async fn load(&self) -> Result<Option<SchedulerState>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM documents WHERE path = $1")
                .bind(&self.path)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row
            .map(|(body,)| serde_json::from_value(body))
            .transpose()?)
    }
}
