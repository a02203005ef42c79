use serde_json::{json, Value};
use tracing::warn;

use super::{Route, Routed, StorageAdapter};
use crate::id::{EntityId, EntityKind};
use crate::logging::OpScope;
use crate::mapper::{map_families, map_family};
use crate::model::{validate_name, Family};
use crate::store::{RowMap, StoreName};
use crate::sync_queue::Mutation;
use crate::time::now_ms;
use crate::AppResult;

fn family_row(name: &str, offline: bool) -> RowMap {
    let mut row = RowMap::new();
    row.insert("name".into(), Value::String(name.trim().to_string()));
    row.insert("is_offline".into(), Value::Bool(offline));
    row.insert("created_at".into(), json!(now_ms()));
    row
}

impl StorageAdapter {
    /// Creates a family. Offline families live on this device only.
    ///
    /// A cloud family that cannot reach the backend is created as an offline
    /// family: its id would otherwise be local-origin and never routed remotely.
    pub async fn create_family(&self, name: &str, offline: bool) -> AppResult<Family> {
        let scope = OpScope::new("create_family", None);
        let result = self.create_family_routed(name, offline).await;
        scope.complete(result)
    }

    async fn create_family_routed(&self, name: &str, offline: bool) -> AppResult<Routed<Family>> {
        validate_name(name)?;
        if !offline && self.is_online() {
            let row = family_row(name, false);
            match self.remote.insert(EntityKind::Family, &row).await {
                Ok(stored) => {
                    self.store.put(StoreName::Families, &stored).await?;
                    return Routed::remote(stored).try_map(|row| map_family(&row));
                }
                Err(err) => self.note_remote_failure(StoreName::Families, "insert", &err),
            }
        }
        if !offline {
            warn!(
                target: "nestbudget",
                event = "family_created_offline",
                reason = "backend unreachable"
            );
        }

        let mut row = family_row(name, true);
        row.insert(
            "id".into(),
            Value::String(EntityId::local(EntityKind::Family).into_string()),
        );
        self.store.put(StoreName::Families, &row).await?;
        let family = map_family(&row)?;
        Ok(if offline {
            Routed::local(family, false)
        } else {
            Routed::fallback(family, false)
        })
    }

    /// Every family known to this device, refreshed from the backend when online.
    pub async fn get_families(&self) -> AppResult<Vec<Family>> {
        let scope = OpScope::new("get_families", None);
        let result = self.get_families_routed().await;
        scope.complete(result)
    }

    async fn get_families_routed(&self) -> AppResult<Routed<Vec<Family>>> {
        let mut routed = Routed::local((), false);
        if self.is_online() {
            match self.remote.select_all(EntityKind::Family).await {
                Ok(rows) => {
                    self.store.put_many(StoreName::Families, rows).await?;
                    routed = Routed::remote(());
                }
                Err(err) => {
                    self.note_remote_failure(StoreName::Families, "select", &err);
                    routed = Routed::fallback((), false);
                }
            }
        }
        let rows = self.store.get_all(StoreName::Families).await?;
        routed.try_map(|()| map_families(&rows))
    }

    /// Deletes a family and everything it owns from this device.
    pub async fn delete_family(&self, family: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_family", Some(family.as_str()));
        let result = self.delete_family_routed(family).await;
        scope.complete(result)
    }

    async fn delete_family_routed(&self, family: &EntityId) -> AppResult<Routed<()>> {
        let mutation = || Mutation::Delete {
            id: family.to_string(),
        };
        match self.route(family) {
            Route::Local { queue } => {
                self.purge_family(family).await?;
                if queue {
                    self.enqueue(family, StoreName::Families, mutation()).await?;
                }
                Ok(Routed::local((), queue))
            }
            Route::Remote => match self.remote.delete(EntityKind::Family, family.as_str()).await {
                Ok(()) => {
                    self.purge_family(family).await?;
                    Ok(Routed::remote(()))
                }
                Err(err) => {
                    self.note_remote_failure(StoreName::Families, "delete", &err);
                    self.purge_family(family).await?;
                    self.enqueue(family, StoreName::Families, mutation()).await?;
                    Ok(Routed::fallback((), true))
                }
            },
        }
    }

    async fn purge_family(&self, family: &EntityId) -> AppResult<()> {
        let id = family.as_str();
        for month in self.local_rows(StoreName::Months, "by_family", id).await? {
            if let Some(month_id) = month.get("id").and_then(Value::as_str) {
                self.store
                    .delete_by_index(StoreName::Expenses, "by_month", month_id)
                    .await?;
                self.store
                    .delete_by_index(StoreName::IncomeSources, "by_month", month_id)
                    .await?;
            }
        }
        for goal in self.local_rows(StoreName::Goals, "by_family", id).await? {
            if let Some(goal_id) = goal.get("id").and_then(Value::as_str) {
                self.store
                    .delete_by_index(StoreName::GoalEntries, "by_goal", goal_id)
                    .await?;
            }
        }
        for store in [
            StoreName::Months,
            StoreName::RecurringExpenses,
            StoreName::Subcategories,
            StoreName::Goals,
        ] {
            self.store.delete_by_index(store, "by_family", id).await?;
        }
        self.store.delete(StoreName::Families, id).await?;
        Ok(())
    }
}
