//! Durable log of mutations that still have to reach the backend.
//!
//! The queue only records intent. Replay lives in [`crate::sync`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::{debug, info};

use crate::db::LocalStore;
use crate::error::codes::STORE_CORRUPT_ROW;
use crate::id::{generate_local_id, EntityKind};
use crate::store::RowMap;
use crate::time::now_ms;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Insert,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Insert => "insert",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<SyncAction> {
        match raw {
            "insert" => Some(SyncAction::Insert),
            "update" => Some(SyncAction::Update),
            "delete" => Some(SyncAction::Delete),
            _ => None,
        }
    }
}

/// What a queued item asks the backend to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Insert {
        row: RowMap,
    },
    Update {
        id: String,
        patch: RowMap,
    },
    /// Bulk update of every row whose `field` equals `value`.
    UpdateWhere {
        field: String,
        value: String,
        patch: RowMap,
    },
    Delete {
        id: String,
    },
}

impl Mutation {
    pub fn action(&self) -> SyncAction {
        match self {
            Mutation::Insert { .. } => SyncAction::Insert,
            Mutation::Update { .. } | Mutation::UpdateWhere { .. } => SyncAction::Update,
            Mutation::Delete { .. } => SyncAction::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub entity: EntityKind,
    pub action: SyncAction,
    pub payload: Value,
    pub family_id: String,
    pub created_at: i64,
}

impl SyncQueueItem {
    pub fn mutation(&self) -> AppResult<Mutation> {
        serde_json::from_value(self.payload.clone()).map_err(|err| {
            AppError::new(STORE_CORRUPT_ROW, "Queued payload is not a mutation")
                .with_context("queue_id", self.id.clone())
                .with_cause(err)
        })
    }
}

fn corrupt(id: &str, column: &str, raw: &str) -> AppError {
    AppError::new(STORE_CORRUPT_ROW, "Queue row has an unknown value")
        .with_context("queue_id", id)
        .with_context("column", column)
        .with_context("value", raw)
}

fn decode_item(row: &SqliteRow) -> AppResult<SyncQueueItem> {
    let id: String = row.try_get("id")?;
    let entity_raw: String = row.try_get("entity_type")?;
    let action_raw: String = row.try_get("action")?;
    let payload_raw: String = row.try_get("payload")?;
    let entity = EntityKind::parse(&entity_raw)
        .ok_or_else(|| corrupt(&id, "entity_type", &entity_raw))?;
    let action =
        SyncAction::parse(&action_raw).ok_or_else(|| corrupt(&id, "action", &action_raw))?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|err| corrupt(&id, "payload", &payload_raw).with_cause(err))?;
    Ok(SyncQueueItem {
        entity,
        action,
        payload,
        family_id: row.try_get("family_id")?,
        created_at: row.try_get("created_at")?,
        id,
    })
}

const SELECT_ITEMS: &str =
    "SELECT id, entity_type, action, payload, family_id, created_at FROM sync_queue";

#[derive(Clone, Debug)]
pub struct SyncQueue {
    store: LocalStore,
}

impl SyncQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn enqueue(
        &self,
        entity: EntityKind,
        mutation: &Mutation,
        family_id: &str,
    ) -> AppResult<SyncQueueItem> {
        let item = SyncQueueItem {
            id: generate_local_id(EntityKind::SyncQueueItem),
            entity,
            action: mutation.action(),
            payload: serde_json::to_value(mutation)?,
            family_id: family_id.to_string(),
            created_at: now_ms(),
        };
        sqlx::query(
            "INSERT INTO sync_queue (id, entity_type, action, payload, family_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(item.entity.as_str())
        .bind(item.action.as_str())
        .bind(serde_json::to_string(&item.payload)?)
        .bind(&item.family_id)
        .bind(item.created_at)
        .execute(self.store.pool())
        .await?;

        info!(
            target: "nestbudget",
            event = "sync_enqueued",
            queue_id = %item.id,
            entity = %item.entity,
            action = item.action.as_str(),
            family_id = %item.family_id
        );
        Ok(item)
    }

    /// Every pending item, oldest first.
    pub async fn all(&self) -> AppResult<Vec<SyncQueueItem>> {
        let rows = sqlx::query(&format!("{SELECT_ITEMS} ORDER BY seq"))
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(decode_item).collect()
    }

    pub async fn by_family(&self, family_id: &str) -> AppResult<Vec<SyncQueueItem>> {
        let rows = sqlx::query(&format!("{SELECT_ITEMS} WHERE family_id = ? ORDER BY seq"))
            .bind(family_id)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(decode_item).collect()
    }

    /// Families with at least one pending item, in order of their oldest item.
    pub async fn pending_families(&self) -> AppResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT family_id FROM sync_queue GROUP BY family_id ORDER BY MIN(seq)",
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(|(family,)| family).collect())
    }

    pub async fn remove(&self, id: &str) -> AppResult<bool> {
        let res = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await?;
        debug!(target: "nestbudget", event = "sync_dequeued", queue_id = %id);
        Ok(res.rows_affected() > 0)
    }

    pub async fn clear(&self) -> AppResult<u64> {
        let res = sqlx::query("DELETE FROM sync_queue")
            .execute(self.store.pool())
            .await?;
        info!(target: "nestbudget", event = "sync_queue_cleared", removed = res.rows_affected());
        Ok(res.rows_affected())
    }

    pub async fn len(&self) -> AppResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(self.store.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub async fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Replaces the payload of a pending item, keeping its position.
    pub async fn update_payload(&self, id: &str, mutation: &Mutation) -> AppResult<bool> {
        let res = sqlx::query("UPDATE sync_queue SET payload = ? WHERE id = ?")
            .bind(serde_json::to_string(mutation)?)
            .bind(id)
            .execute(self.store.pool())
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Moves pending items of a family onto its new id.
    pub async fn reassign_family(&self, old_id: &str, new_id: &str) -> AppResult<u64> {
        let res = sqlx::query("UPDATE sync_queue SET family_id = ? WHERE family_id = ?")
            .bind(new_id)
            .bind(old_id)
            .execute(self.store.pool())
            .await?;
        Ok(res.rows_affected())
    }
}
