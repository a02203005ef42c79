//! Keyed collections with named secondary indexes.
//!
//! Each store persists rows (snake_case JSON objects) keyed by their `id`.
//! Index columns are lifted out of the row on every `put`.

use futures::FutureExt;
use serde_json::{Map, Value};
use sqlx::{Executor, Row, Sqlite};

use crate::db::{run_in_tx, LocalStore};
use crate::error::codes::{STORE_CORRUPT_ROW, VALIDATION_MISSING_ID, VALIDATION_UNKNOWN_INDEX};
use crate::id::EntityKind;
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub type RowMap = Map<String, Value>;

/// Row fields that hold the id of another entity.
pub(crate) const REFERENCE_COLUMNS: &[&str] = &[
    "family_id",
    "month_id",
    "recurring_expense_id",
    "subcategory_id",
    "goal_id",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub column: &'static str,
}

const BY_FAMILY: IndexDef = IndexDef {
    name: "by_family",
    column: "family_id",
};
const BY_MONTH: IndexDef = IndexDef {
    name: "by_month",
    column: "month_id",
};
const BY_RECURRING: IndexDef = IndexDef {
    name: "by_recurring",
    column: "recurring_expense_id",
};
const BY_GOAL: IndexDef = IndexDef {
    name: "by_goal",
    column: "goal_id",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
    Families,
    Months,
    Expenses,
    RecurringExpenses,
    Subcategories,
    IncomeSources,
    Goals,
    GoalEntries,
}

impl StoreName {
    pub const ALL: [StoreName; 8] = [
        StoreName::Families,
        StoreName::Months,
        StoreName::Expenses,
        StoreName::RecurringExpenses,
        StoreName::Subcategories,
        StoreName::IncomeSources,
        StoreName::Goals,
        StoreName::GoalEntries,
    ];

    pub fn table(self) -> &'static str {
        match self {
            StoreName::Families => "families",
            StoreName::Months => "months",
            StoreName::Expenses => "expenses",
            StoreName::RecurringExpenses => "recurring_expenses",
            StoreName::Subcategories => "subcategories",
            StoreName::IncomeSources => "income_sources",
            StoreName::Goals => "goals",
            StoreName::GoalEntries => "goal_entries",
        }
    }

    pub fn indexes(self) -> &'static [IndexDef] {
        match self {
            StoreName::Families => &[],
            StoreName::Months => &[BY_FAMILY],
            StoreName::Expenses => &[BY_MONTH, BY_RECURRING],
            StoreName::RecurringExpenses => &[BY_FAMILY],
            StoreName::Subcategories => &[BY_FAMILY],
            StoreName::IncomeSources => &[BY_MONTH],
            StoreName::Goals => &[BY_FAMILY],
            StoreName::GoalEntries => &[BY_GOAL],
        }
    }

    pub fn kind(self) -> EntityKind {
        match self {
            StoreName::Families => EntityKind::Family,
            StoreName::Months => EntityKind::Month,
            StoreName::Expenses => EntityKind::Expense,
            StoreName::RecurringExpenses => EntityKind::RecurringExpense,
            StoreName::Subcategories => EntityKind::Subcategory,
            StoreName::IncomeSources => EntityKind::IncomeSource,
            StoreName::Goals => EntityKind::Goal,
            StoreName::GoalEntries => EntityKind::GoalEntry,
        }
    }

    pub fn for_kind(kind: EntityKind) -> Option<StoreName> {
        StoreName::ALL.into_iter().find(|store| store.kind() == kind)
    }

    pub(crate) fn index(self, name: &str) -> AppResult<&'static IndexDef> {
        self.indexes()
            .iter()
            .find(|idx| idx.name == name)
            .ok_or_else(|| {
                AppError::new(VALIDATION_UNKNOWN_INDEX, "Unknown index for store")
                    .with_context("store", self.table())
                    .with_context("index", name.to_string())
            })
    }
}

fn decode_row(store: StoreName, raw: &str) -> AppResult<RowMap> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::new(STORE_CORRUPT_ROW, "Stored row is not an object")
            .with_context("store", store.table())),
        Err(err) => Err(AppError::new(STORE_CORRUPT_ROW, "Stored row is not valid JSON")
            .with_context("store", store.table())
            .with_cause(err)),
    }
}

fn row_id(store: StoreName, row: &RowMap) -> AppResult<String> {
    row.get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::new(VALIDATION_MISSING_ID, "Row requires a string id")
                .with_context("store", store.table())
        })
}

fn index_value(row: &RowMap, column: &str) -> Option<String> {
    match row.get(column) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

async fn put_with<'c, E>(executor: E, store: StoreName, row: &RowMap) -> AppResult<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    let id = row_id(store, row)?;
    let indexes = store.indexes();

    let mut columns = vec!["id"];
    columns.extend(indexes.iter().map(|idx| idx.column));
    columns.extend(["data", "updated_at"]);
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns[1..]
        .iter()
        .map(|col| format!("{col} = excluded.{col}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {table} ({cols}) VALUES ({placeholders}) \
         ON CONFLICT(id) DO UPDATE SET {updates}",
        table = store.table(),
        cols = columns.join(", "),
    );

    let data = serde_json::to_string(row)?;
    let mut query = sqlx::query(&sql).bind(id);
    for idx in indexes {
        query = query.bind(index_value(row, idx.column));
    }
    query.bind(data).bind(now_ms()).execute(executor).await?;
    Ok(())
}

async fn delete_with<'c, E>(executor: E, store: StoreName, id: &str) -> AppResult<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("DELETE FROM {} WHERE id = ?", store.table());
    let res = sqlx::query(&sql).bind(id).execute(executor).await?;
    Ok(res.rows_affected() > 0)
}

impl LocalStore {
    pub async fn get(&self, store: StoreName, id: &str) -> AppResult<Option<RowMap>> {
        let sql = format!("SELECT data FROM {} WHERE id = ?", store.table());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| decode_row(store, &r.try_get::<String, _>("data")?))
            .transpose()
    }

    /// Every row in the store, in insertion order.
    pub async fn get_all(&self, store: StoreName) -> AppResult<Vec<RowMap>> {
        let sql = format!("SELECT data FROM {} ORDER BY rowid", store.table());
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        rows.iter()
            .map(|r| decode_row(store, &r.try_get::<String, _>("data")?))
            .collect()
    }

    pub async fn get_all_by_index(
        &self,
        store: StoreName,
        index: &str,
        value: &str,
    ) -> AppResult<Vec<RowMap>> {
        let idx = store.index(index)?;
        let sql = format!(
            "SELECT data FROM {} WHERE {} = ? ORDER BY rowid",
            store.table(),
            idx.column
        );
        let rows = sqlx::query(&sql).bind(value).fetch_all(self.pool()).await?;
        rows.iter()
            .map(|r| decode_row(store, &r.try_get::<String, _>("data")?))
            .collect()
    }

    /// Inserts or replaces the row keyed by its `id` field.
    pub async fn put(&self, store: StoreName, row: &RowMap) -> AppResult<()> {
        put_with(self.pool(), store, row).await
    }

    /// Upserts all rows in one transaction.
    pub async fn put_many(&self, store: StoreName, rows: Vec<RowMap>) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        run_in_tx(self.pool(), move |conn| {
            async move {
                for row in &rows {
                    put_with(&mut *conn, store, row).await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, store: StoreName, id: &str) -> AppResult<bool> {
        delete_with(self.pool(), store, id).await
    }

    pub async fn delete_by_index(
        &self,
        store: StoreName,
        index: &str,
        value: &str,
    ) -> AppResult<u64> {
        let idx = store.index(index)?;
        let sql = format!("DELETE FROM {} WHERE {} = ?", store.table(), idx.column);
        let res = sqlx::query(&sql).bind(value).execute(self.pool()).await?;
        Ok(res.rows_affected())
    }

    /// Replaces the row stored under `old_id` with `row` atomically.
    pub async fn rekey(&self, store: StoreName, old_id: &str, row: RowMap) -> AppResult<()> {
        let old_id = old_id.to_string();
        run_in_tx(self.pool(), move |conn| {
            async move {
                delete_with(&mut *conn, store, &old_id).await?;
                put_with(&mut *conn, store, &row).await
            }
            .boxed()
        })
        .await
    }

    pub async fn clear(&self, store: StoreName) -> AppResult<()> {
        let sql = format!("DELETE FROM {}", store.table());
        sqlx::query(&sql).execute(self.pool()).await?;
        Ok(())
    }
}
