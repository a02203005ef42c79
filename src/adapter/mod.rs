//! Dual-path storage adapter.
//!
//! Every operation is scoped to a family. Offline families and offline
//! devices are served from the local store; everything else goes to the
//! backend first and is mirrored locally. When the backend fails, the local
//! store stands in and the mutation is queued for replay.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::db::LocalStore;
use crate::error::codes::{VALIDATION_FAMILY_MISMATCH, VALIDATION_NOT_FOUND};
use crate::id::{is_local_origin, EntityId};
use crate::remote::{Connectivity, ConnectivityFlag, NoBackend, RemoteBackend, RemoteError};
use crate::store::{RowMap, StoreName, REFERENCE_COLUMNS};
use crate::sync_queue::{Mutation, SyncQueue};
use crate::time::now_ms;
use crate::{AppError, AppResult};

mod expenses;
mod families;
mod months;
mod peripheral;
mod recurring;

pub use recurring::ApplyOutcome;

/// Where an operation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Local store only. `queue` is set when the write stands in for a
    /// backend mutation.
    Local { queue: bool },
    Remote,
}

/// How an adapter operation was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpPath {
    Local,
    Remote,
    /// The backend failed and the local store stood in for it.
    Fallback,
}

impl OpPath {
    pub fn as_str(self) -> &'static str {
        match self {
            OpPath::Local => "local",
            OpPath::Remote => "remote",
            OpPath::Fallback => "fallback",
        }
    }
}

/// Result of an adapter operation together with how it was routed.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub value: T,
    pub path: OpPath,
    pub queued: bool,
}

impl<T> Routed<T> {
    pub fn local(value: T, queued: bool) -> Self {
        Self {
            value,
            path: OpPath::Local,
            queued,
        }
    }

    pub fn remote(value: T) -> Self {
        Self {
            value,
            path: OpPath::Remote,
            queued: false,
        }
    }

    pub fn fallback(value: T, queued: bool) -> Self {
        Self {
            value,
            path: OpPath::Fallback,
            queued,
        }
    }

    pub fn try_map<U, F>(self, f: F) -> AppResult<Routed<U>>
    where
        F: FnOnce(T) -> AppResult<U>,
    {
        Ok(Routed {
            value: f(self.value)?,
            path: self.path,
            queued: self.queued,
        })
    }
}

#[derive(Clone)]
pub struct StorageAdapter {
    store: LocalStore,
    queue: SyncQueue,
    remote: Arc<dyn RemoteBackend>,
    connectivity: Arc<dyn Connectivity>,
}

impl StorageAdapter {
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

    /// An adapter with no backend that always considers itself offline.
    pub fn offline(store: LocalStore) -> Self {
        Self::new(
            store,
            Arc::new(NoBackend),
            Arc::new(ConnectivityFlag::new(false)),
        )
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn remote_backend(&self) -> Arc<dyn RemoteBackend> {
        Arc::clone(&self.remote)
    }

    pub fn connectivity(&self) -> Arc<dyn Connectivity> {
        Arc::clone(&self.connectivity)
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Connectivity is read once here; callers keep the answer for the
    /// whole operation.
    pub fn route(&self, family: &EntityId) -> Route {
        if family.is_local() {
            Route::Local { queue: false }
        } else if !self.connectivity.is_online() {
            Route::Local { queue: true }
        } else {
            Route::Remote
        }
    }

    fn note_remote_failure(&self, store: StoreName, call: &'static str, err: &RemoteError) {
        warn!(
            target: "nestbudget",
            event = "remote_fallback",
            store = store.table(),
            call,
            code = err.code(),
            error = %err
        );
    }

    async fn enqueue(
        &self,
        family: &EntityId,
        store: StoreName,
        mutation: Mutation,
    ) -> AppResult<()> {
        self.queue
            .enqueue(store.kind(), &mutation, family.as_str())
            .await?;
        Ok(())
    }

    async fn local_rows(
        &self,
        store: StoreName,
        index: &str,
        value: &str,
    ) -> AppResult<Vec<RowMap>> {
        self.store.get_all_by_index(store, index, value).await
    }

    /// Route for a write that targets `target` or carries the references in
    /// `row`. A write that depends on a row the backend has not received yet
    /// is queued behind that row instead of racing it.
    fn write_route(
        &self,
        family: &EntityId,
        target: Option<&EntityId>,
        row: Option<&RowMap>,
    ) -> Route {
        let route = self.route(family);
        if route != Route::Remote {
            return route;
        }
        let unsynced_target = target.is_some_and(EntityId::is_local);
        let unsynced_reference = row.is_some_and(references_unsynced);
        if unsynced_target || unsynced_reference {
            debug!(
                target: "nestbudget",
                event = "write_deferred",
                family_id = %family,
                target_id = target.map(EntityId::as_str)
            );
            return Route::Local { queue: true };
        }
        Route::Remote
    }

    /// Rows of `store` whose `index` column equals `value`.
    async fn read_rows(
        &self,
        family: &EntityId,
        store: StoreName,
        index: &str,
        value: &str,
    ) -> AppResult<Routed<Vec<RowMap>>> {
        let column = store.index(index)?.column;
        match self.route(family) {
            Route::Local { .. } => {
                let rows = self.local_rows(store, index, value).await?;
                Ok(Routed::local(rows, false))
            }
            Route::Remote => match self.remote.select(store.kind(), column, value).await {
                Ok(rows) => {
                    let rows = self.merge_pending(family, store, index, value, rows).await?;
                    Ok(Routed::remote(rows))
                }
                Err(err) => {
                    self.note_remote_failure(store, "select", &err);
                    Ok(Routed::fallback(self.local_rows(store, index, value).await?, false))
                }
            },
        }
    }

    /// Combines the backend's rows with local changes still waiting in the
    /// queue. Rows pending deletion are dropped, rows with pending edits keep
    /// their local version, and rows minted on this device are appended.
    /// Only untouched backend rows are mirrored.
    async fn merge_pending(
        &self,
        family: &EntityId,
        store: StoreName,
        index: &str,
        value: &str,
        remote: Vec<RowMap>,
    ) -> AppResult<Vec<RowMap>> {
        let mut deleted = HashSet::new();
        let mut edited = HashSet::new();
        let mut bulk_edits = Vec::new();
        for item in self.queue.by_family(family.as_str()).await? {
            if item.entity != store.kind() {
                continue;
            }
            match item.mutation()? {
                Mutation::Delete { id } => {
                    deleted.insert(id);
                }
                Mutation::Update { id, .. } => {
                    edited.insert(id);
                }
                Mutation::UpdateWhere { field, value, .. } => bulk_edits.push((field, value)),
                Mutation::Insert { .. } => {}
            }
        }

        let local = self.local_rows(store, index, value).await?;
        let local_row = |id: &str| local.iter().find(|row| row_id(row) == Some(id)).cloned();
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(remote.len());
        let mut mirror = Vec::new();
        for row in remote {
            let Some(id) = row_id(&row).map(str::to_string) else {
                mirror.push(row);
                continue;
            };
            if deleted.contains(&id) {
                continue;
            }
            let pending_edit = edited.contains(&id)
                || bulk_edits.iter().any(|(field, value)| {
                    row.get(field).and_then(Value::as_str) == Some(value.as_str())
                });
            let pending = if pending_edit { local_row(&id) } else { None };
            match pending {
                Some(edited_row) => merged.push(edited_row),
                None => {
                    mirror.push(row.clone());
                    merged.push(row);
                }
            }
            seen.insert(id);
        }
        self.store.put_many(store, mirror).await?;

        let unsynced = local
            .iter()
            .filter(|row| row_id(row).is_some_and(|id| is_local_origin(id) && !seen.contains(id)))
            .cloned();
        merged.extend(unsynced);
        Ok(merged)
    }

    /// A single row, read locally. Remote families are looked up through
    /// their mirror.
    async fn local_row(&self, store: StoreName, id: &EntityId) -> AppResult<RowMap> {
        self.store
            .get(store, id.as_str())
            .await?
            .ok_or_else(|| not_found(store, id))
    }

    async fn write_local_insert(
        &self,
        family: &EntityId,
        store: StoreName,
        id: EntityId,
        mut row: RowMap,
        queue: bool,
    ) -> AppResult<RowMap> {
        row.insert("id".into(), Value::String(id.into_string()));
        self.store.put(store, &row).await?;
        if queue {
            self.enqueue(family, store, Mutation::Insert { row: row.clone() })
                .await?;
        }
        Ok(row)
    }

    /// Inserts `row`. The backend assigns the id on the remote path;
    /// `local_id` is used everywhere else.
    async fn create_row(
        &self,
        family: &EntityId,
        store: StoreName,
        local_id: EntityId,
        mut row: RowMap,
    ) -> AppResult<Routed<RowMap>> {
        row.entry("created_at")
            .or_insert_with(|| Value::from(now_ms()));
        match self.write_route(family, None, Some(&row)) {
            Route::Local { queue } => {
                let row = self
                    .write_local_insert(family, store, local_id, row, queue)
                    .await?;
                Ok(Routed::local(row, queue))
            }
            Route::Remote => match self.remote.insert(store.kind(), &row).await {
                Ok(stored) => {
                    self.store.put(store, &stored).await?;
                    Ok(Routed::remote(stored))
                }
                Err(err) => {
                    self.note_remote_failure(store, "insert", &err);
                    let row = self
                        .write_local_insert(family, store, local_id, row, true)
                        .await?;
                    Ok(Routed::fallback(row, true))
                }
            },
        }
    }

    async fn write_local_update(
        &self,
        family: &EntityId,
        store: StoreName,
        id: &EntityId,
        patch: RowMap,
        queue: bool,
    ) -> AppResult<RowMap> {
        let mut row = self.local_row(store, id).await?;
        row.extend(patch.clone());
        row.insert("id".into(), Value::String(id.to_string()));
        self.store.put(store, &row).await?;
        if queue {
            self.enqueue(
                family,
                store,
                Mutation::Update {
                    id: id.to_string(),
                    patch,
                },
            )
            .await?;
        }
        Ok(row)
    }

    async fn update_row(
        &self,
        family: &EntityId,
        store: StoreName,
        id: &EntityId,
        patch: RowMap,
    ) -> AppResult<Routed<RowMap>> {
        self.ensure_owner(family, store, id).await?;
        match self.write_route(family, Some(id), Some(&patch)) {
            Route::Local { queue } => {
                let row = self
                    .write_local_update(family, store, id, patch, queue)
                    .await?;
                Ok(Routed::local(row, queue))
            }
            Route::Remote => match self.remote.update(store.kind(), id.as_str(), &patch).await {
                Ok(stored) => {
                    self.store.put(store, &stored).await?;
                    Ok(Routed::remote(stored))
                }
                Err(err) => {
                    self.note_remote_failure(store, "update", &err);
                    let row = self
                        .write_local_update(family, store, id, patch, true)
                        .await?;
                    Ok(Routed::fallback(row, true))
                }
            },
        }
    }

    /// Family that owns `row`. Expenses and income sources belong to their
    /// month's family, goal entries to their goal's.
    async fn owner_of(&self, store: StoreName, row: &RowMap) -> AppResult<Option<String>> {
        if let Some(owner) = row.get("family_id").and_then(Value::as_str) {
            return Ok(Some(owner.to_string()));
        }
        let (parent_store, link) = match store {
            StoreName::Expenses | StoreName::IncomeSources => (StoreName::Months, "month_id"),
            StoreName::GoalEntries => (StoreName::Goals, "goal_id"),
            _ => return Ok(None),
        };
        let Some(parent_id) = row.get(link).and_then(Value::as_str) else {
            return Ok(None);
        };
        let parent = self.store.get(parent_store, parent_id).await?;
        Ok(parent
            .as_ref()
            .and_then(|p| p.get("family_id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Refuses writes to a known row that belongs to another family.
    async fn ensure_owner(
        &self,
        family: &EntityId,
        store: StoreName,
        id: &EntityId,
    ) -> AppResult<()> {
        let Some(row) = self.store.get(store, id.as_str()).await? else {
            return Ok(());
        };
        match self.owner_of(store, &row).await? {
            Some(owner) if owner != family.as_str() => Err(AppError::new(
                VALIDATION_FAMILY_MISMATCH,
                "Record belongs to another family",
            )
            .with_context("store", store.table())
            .with_context("id", id.to_string())
            .with_context("family_id", family.to_string())),
            _ => Ok(()),
        }
    }

    /// Removes `id` and every row in `children` indexed by it.
    async fn purge_local(
        &self,
        store: StoreName,
        id: &EntityId,
        children: &[(StoreName, &str)],
    ) -> AppResult<()> {
        for (child, index) in children {
            self.store.delete_by_index(*child, index, id.as_str()).await?;
        }
        self.store.delete(store, id.as_str()).await?;
        Ok(())
    }

    async fn delete_row(
        &self,
        family: &EntityId,
        store: StoreName,
        id: &EntityId,
        children: &[(StoreName, &str)],
    ) -> AppResult<Routed<()>> {
        self.ensure_owner(family, store, id).await?;
        let delete = || Mutation::Delete { id: id.to_string() };
        match self.write_route(family, Some(id), None) {
            Route::Local { queue } => {
                self.purge_local(store, id, children).await?;
                if queue {
                    self.enqueue(family, store, delete()).await?;
                }
                Ok(Routed::local((), queue))
            }
            Route::Remote => match self.remote.delete(store.kind(), id.as_str()).await {
                Ok(()) => {
                    self.purge_local(store, id, children).await?;
                    Ok(Routed::remote(()))
                }
                Err(err) => {
                    self.note_remote_failure(store, "delete", &err);
                    self.purge_local(store, id, children).await?;
                    self.enqueue(family, store, delete()).await?;
                    Ok(Routed::fallback((), true))
                }
            },
        }
    }
}

fn not_found(store: StoreName, id: &EntityId) -> AppError {
    AppError::new(VALIDATION_NOT_FOUND, "Record not found")
        .with_context("store", store.table())
        .with_context("id", id.to_string())
}

fn row_id(row: &RowMap) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// True when `row` points at a row minted on this device.
fn references_unsynced(row: &RowMap) -> bool {
    REFERENCE_COLUMNS
        .iter()
        .filter_map(|column| row.get(*column).and_then(Value::as_str))
        .any(is_local_origin)
}
