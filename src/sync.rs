//! Replays queued mutations against the backend and reconciles ids the
//! backend re-issued.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::adapter::StorageAdapter;
use crate::db::LocalStore;
use crate::id::{EntityId, EntityKind};
use crate::remote::{Connectivity, RemoteBackend, RemoteError};
use crate::store::{RowMap, StoreName, REFERENCE_COLUMNS};
use crate::sync_queue::{Mutation, SyncQueue, SyncQueueItem};
use crate::time::now_ms;
use crate::AppResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub family_id: String,
    pub replayed: usize,
    pub remapped: usize,
    pub remaining: usize,
    /// Set when the drain stopped on a backend failure.
    pub stopped_on: Option<String>,
}

fn string_at<'a>(row: &'a RowMap, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

fn replace_in_row(row: &mut RowMap, keys: &[&str], map: &HashMap<String, String>) -> bool {
    let mut changed = false;
    for key in keys {
        if let Some(Value::String(current)) = row.get_mut(*key) {
            if let Some(next) = map.get(current.as_str()) {
                *current = next.clone();
                changed = true;
            }
        }
    }
    changed
}

fn replace_id(id: &mut String, map: &HashMap<String, String>) -> bool {
    match map.get(id.as_str()) {
        Some(next) => {
            *id = next.clone();
            true
        }
        None => false,
    }
}

/// Every id a mutation mentions, including its target.
fn referenced_ids(mutation: &Mutation) -> Vec<String> {
    let from_row = |row: &RowMap| -> Vec<String> {
        std::iter::once("id")
            .chain(REFERENCE_COLUMNS.iter().copied())
            .filter_map(|key| string_at(row, key).map(str::to_string))
            .collect()
    };
    match mutation {
        Mutation::Insert { row } => from_row(row),
        Mutation::Update { id, patch } => {
            let mut ids = from_row(patch);
            ids.push(id.clone());
            ids
        }
        Mutation::UpdateWhere { value, patch, .. } => {
            let mut ids = from_row(patch);
            ids.push(value.clone());
            ids
        }
        Mutation::Delete { id } => vec![id.clone()],
    }
}

fn replace_ids(mutation: &mut Mutation, map: &HashMap<String, String>) -> bool {
    if map.is_empty() {
        return false;
    }
    match mutation {
        Mutation::Insert { row } => {
            let mut keys = vec!["id"];
            keys.extend(REFERENCE_COLUMNS);
            replace_in_row(row, &keys, map)
        }
        Mutation::Update { id, patch } => {
            let target = replace_id(id, map);
            replace_in_row(patch, REFERENCE_COLUMNS, map) || target
        }
        Mutation::UpdateWhere {
            field,
            value,
            patch,
        } => {
            let filter = REFERENCE_COLUMNS.contains(&field.as_str()) && replace_id(value, map);
            replace_in_row(patch, REFERENCE_COLUMNS, map) || filter
        }
        Mutation::Delete { id } => replace_id(id, map),
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    store: LocalStore,
    queue: SyncQueue,
    remote: Arc<dyn RemoteBackend>,
    connectivity: Arc<dyn Connectivity>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteBackend>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            queue: SyncQueue::new(store.clone()),
            store,
            remote,
            connectivity,
        }
    }

    pub async fn remote_id_for(&self, local_id: &str) -> AppResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT remote_id FROM id_mappings WHERE local_id = ?")
                .bind(local_id)
                .fetch_optional(self.store.pool())
                .await?;
        Ok(row.map(|(remote,)| remote))
    }

    async fn record_mapping(
        &self,
        kind: EntityKind,
        local_id: &str,
        remote_id: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO id_mappings (local_id, remote_id, entity_type, mapped_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(local_id) DO UPDATE SET remote_id = excluded.remote_id, mapped_at = excluded.mapped_at",
        )
        .bind(local_id)
        .bind(remote_id)
        .bind(kind.as_str())
        .bind(now_ms())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Rewrites every id in `mutation` that the backend has re-issued.
    async fn translate(&self, mutation: &mut Mutation) -> AppResult<()> {
        let mut map = HashMap::new();
        for id in referenced_ids(mutation) {
            if map.contains_key(&id) {
                continue;
            }
            if let Some(remote) = self.remote_id_for(&id).await? {
                map.insert(id, remote);
            }
        }
        replace_ids(mutation, &map);
        Ok(())
    }

    /// Replays the pending items of one family in order. Stops at the first
    /// backend failure, leaving that item and everything after it queued.
    pub async fn drain_family(&self, family: &EntityId) -> AppResult<DrainReport> {
        let mut report = DrainReport {
            family_id: family.to_string(),
            ..Default::default()
        };
        if family.is_local() || !self.connectivity.is_online() {
            report.remaining = self.queue.by_family(family.as_str()).await?.len();
            info!(
                target: "nestbudget",
                event = "sync_drain_skipped",
                family_id = %family,
                offline_family = family.is_local(),
                remaining = report.remaining
            );
            return Ok(report);
        }

        let items = self.queue.by_family(family.as_str()).await?;
        info!(
            target: "nestbudget",
            event = "sync_drain_start",
            family_id = %family,
            pending = items.len()
        );

        for (position, item) in items.iter().enumerate() {
            match self.replay(item).await? {
                Ok(remapped) => {
                    self.queue.remove(&item.id).await?;
                    report.replayed += 1;
                    report.remapped += usize::from(remapped);
                }
                Err(err) => {
                    warn!(
                        target: "nestbudget",
                        event = "sync_drain_stopped",
                        family_id = %family,
                        queue_id = %item.id,
                        code = err.code(),
                        error = %err
                    );
                    report.remaining = items.len() - position;
                    report.stopped_on = Some(err.to_string());
                    return Ok(report);
                }
            }
        }
        info!(
            target: "nestbudget",
            event = "sync_drain_done",
            family_id = %family,
            replayed = report.replayed,
            remapped = report.remapped
        );
        Ok(report)
    }

    /// Drains every family with pending items.
    pub async fn drain_all(&self) -> AppResult<Vec<DrainReport>> {
        let mut reports = Vec::new();
        for family in self.queue.pending_families().await? {
            reports.push(self.drain_family(&EntityId::classify(family)).await?);
        }
        Ok(reports)
    }

    /// Sends one item. The outer result carries local failures, the inner
    /// one the backend's answer; `Ok(true)` means an id was re-issued.
    async fn replay(&self, item: &SyncQueueItem) -> AppResult<Result<bool, RemoteError>> {
        let mut mutation = item.mutation()?;
        self.translate(&mut mutation).await?;
        let kind = item.entity;
        let store = StoreName::for_kind(kind);

        let outcome = match &mutation {
            Mutation::Insert { row } => match self.remote.insert(kind, row).await {
                Ok(stored) => {
                    let local_id = string_at(row, "id").map(str::to_string);
                    let remote_id = string_at(&stored, "id").map(str::to_string);
                    match (local_id, remote_id) {
                        (Some(local), Some(remote)) if local != remote => {
                            self.reconcile(kind, &local, &remote, stored).await?;
                            Ok(true)
                        }
                        _ => {
                            if let Some(store) = store {
                                self.store.put(store, &stored).await?;
                            }
                            Ok(false)
                        }
                    }
                }
                Err(err) => Err(err),
            },
            Mutation::Update { id, patch } => match self.remote.update(kind, id, patch).await {
                Ok(stored) => {
                    if let Some(store) = store {
                        self.store.put(store, &stored).await?;
                    }
                    Ok(false)
                }
                Err(err) => Err(err),
            },
            Mutation::UpdateWhere {
                field,
                value,
                patch,
            } => self
                .remote
                .update_where(kind, field, value, patch)
                .await
                .map(|_| false),
            Mutation::Delete { id } => match self.remote.delete(kind, id).await {
                Ok(()) => {
                    if let Some(store) = store {
                        self.store.delete(store, id).await?;
                    }
                    Ok(false)
                }
                Err(err) => Err(err),
            },
        };

        if outcome.is_ok() {
            info!(
                target: "nestbudget",
                event = "sync_item_replayed",
                queue_id = %item.id,
                entity = %kind,
                action = item.action.as_str()
            );
        }
        Ok(outcome)
    }

    /// Moves a locally minted row onto the id the backend issued and points
    /// every reference at it.
    async fn reconcile(
        &self,
        kind: EntityKind,
        local_id: &str,
        remote_id: &str,
        stored: RowMap,
    ) -> AppResult<()> {
        self.record_mapping(kind, local_id, remote_id).await?;

        // Rows deleted locally since they were queued stay deleted.
        if let Some(store) = StoreName::for_kind(kind) {
            if let Some(mut row) = self.store.get(store, local_id).await? {
                row.extend(stored);
                row.insert("id".into(), Value::String(remote_id.to_string()));
                self.store.rekey(store, local_id, row).await?;
            }
        }

        let map = HashMap::from([(local_id.to_string(), remote_id.to_string())]);
        let mut rewritten_rows = 0;
        for store in StoreName::ALL {
            let changed: Vec<RowMap> = self
                .store
                .get_all(store)
                .await?
                .into_iter()
                .filter_map(|mut row| {
                    replace_in_row(&mut row, REFERENCE_COLUMNS, &map).then_some(row)
                })
                .collect();
            rewritten_rows += changed.len();
            self.store.put_many(store, changed).await?;
        }

        let mut rewritten_items = 0;
        for item in self.queue.all().await? {
            let mut mutation = item.mutation()?;
            if replace_ids(&mut mutation, &map) {
                self.queue.update_payload(&item.id, &mutation).await?;
                rewritten_items += 1;
            }
        }
        if kind == EntityKind::Family {
            self.queue.reassign_family(local_id, remote_id).await?;
        }

        info!(
            target: "nestbudget",
            event = "sync_id_remapped",
            entity = %kind,
            local_id,
            remote_id,
            rows = rewritten_rows,
            queue_items = rewritten_items
        );
        Ok(())
    }
}

impl From<&StorageAdapter> for SyncEngine {
    fn from(adapter: &StorageAdapter) -> Self {
        adapter.sync_engine()
    }
}

impl StorageAdapter {
    /// A replay engine sharing this adapter's store, backend and connectivity.
    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.store().clone(),
            self.remote_backend(),
            self.connectivity(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RowMap {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn replace_ids_touches_targets_and_references() {
        let map = HashMap::from([("month-f-2025-03".to_string(), "uuid-m".to_string())]);

        let mut insert = Mutation::Insert {
            row: row(json!({"id": "expense-1-a", "month_id": "month-f-2025-03", "title": "x"})),
        };
        assert!(replace_ids(&mut insert, &map));
        assert_eq!(
            insert,
            Mutation::Insert {
                row: row(json!({"id": "expense-1-a", "month_id": "uuid-m", "title": "x"})),
            }
        );

        let mut delete = Mutation::Delete {
            id: "month-f-2025-03".into(),
        };
        assert!(replace_ids(&mut delete, &map));
        assert_eq!(delete, Mutation::Delete { id: "uuid-m".into() });

        let mut untouched = Mutation::UpdateWhere {
            field: "title".into(),
            value: "month-f-2025-03".into(),
            patch: RowMap::new(),
        };
        assert!(!replace_ids(&mut untouched, &map));
    }

    #[test]
    fn referenced_ids_include_update_target() {
        let ids = referenced_ids(&Mutation::Update {
            id: "goal-1-a".into(),
            patch: row(json!({"goal_id": "goal-2-b", "name": "x"})),
        });
        assert!(ids.contains(&"goal-1-a".to_string()));
        assert!(ids.contains(&"goal-2-b".to_string()));
        assert_eq!(ids.len(), 2);
    }
}
