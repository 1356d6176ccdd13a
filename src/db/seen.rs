//! Seen set on Postgres: one row per item id in `seen_items`.

use super::Db;
use crate::dedup::SeenStore;
use crate::error::Result;
use crate::model::item::ItemId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct PgSeenStore {
    db: Arc<Db>,
}

impl PgSeenStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

fn raw_ids(ids: &[ItemId]) -> Vec<String> {
    ids.iter().map(|id| id.0.clone()).collect()
}

#[async_trait]
impl SeenStore for PgSeenStore {
    async fn contains(&self, id: &ItemId) -> Result<bool> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT seen FROM seen_items WHERE item_id = $1")
                .bind(id.as_str())
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row.is_some_and(|(seen,)| seen))
    }

    async fn contains_many(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT item_id FROM seen_items WHERE item_id = ANY($1) AND seen")
                .bind(raw_ids(ids))
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows.into_iter().map(|(id,)| ItemId(id)).collect())
    }

    async fn insert_many(&self, ids: &[ItemId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO seen_items (item_id, seen, marked_at)
             SELECT item_id, true, now() FROM unnest($1::text[]) AS t(item_id)
             ON CONFLICT (item_id) DO UPDATE SET seen = true, marked_at = now()",
        )
        .bind(raw_ids(ids))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
