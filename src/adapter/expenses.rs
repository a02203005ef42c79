use serde_json::Value;

use super::{Routed, StorageAdapter};
use crate::id::{EntityId, EntityKind};
use crate::logging::OpScope;
use crate::mapper::{map_expense, map_expenses};
use crate::model::{to_row, Expense, ExpensePatch, NewExpense};
use crate::store::StoreName;
use crate::AppResult;

impl StorageAdapter {
    pub async fn get_expenses(
        &self,
        family: &EntityId,
        month_id: &EntityId,
    ) -> AppResult<Vec<Expense>> {
        let scope = OpScope::new("get_expenses", Some(family.as_str()));
        let result = self.expenses_of(family, month_id).await;
        scope.complete(result)
    }

    pub(super) async fn expenses_of(
        &self,
        family: &EntityId,
        month_id: &EntityId,
    ) -> AppResult<Routed<Vec<Expense>>> {
        self.read_rows(family, StoreName::Expenses, "by_month", month_id.as_str())
            .await?
            .try_map(|rows| map_expenses(&rows))
    }

    pub async fn insert_expense(
        &self,
        family: &EntityId,
        month_id: &EntityId,
        input: &NewExpense,
    ) -> AppResult<Expense> {
        let scope = OpScope::new("insert_expense", Some(family.as_str()));
        let result = self.insert_expense_routed(family, month_id, input).await;
        scope.complete(result)
    }

    pub(super) async fn insert_expense_routed(
        &self,
        family: &EntityId,
        month_id: &EntityId,
        input: &NewExpense,
    ) -> AppResult<Routed<Expense>> {
        input.validate()?;
        let mut row = input.to_row()?;
        row.insert("month_id".into(), Value::String(month_id.to_string()));
        self.create_row(
            family,
            StoreName::Expenses,
            EntityId::local(EntityKind::Expense),
            row,
        )
        .await?
        .try_map(|row| map_expense(&row))
    }

    pub async fn update_expense(
        &self,
        family: &EntityId,
        id: &EntityId,
        patch: &ExpensePatch,
    ) -> AppResult<Expense> {
        let scope = OpScope::new("update_expense", Some(family.as_str()));
        let result = async {
            patch.validate()?;
            self.update_row(family, StoreName::Expenses, id, to_row(patch)?)
                .await?
                .try_map(|row| map_expense(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn delete_expense(&self, family: &EntityId, id: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_expense", Some(family.as_str()));
        let result = self.delete_row(family, StoreName::Expenses, id, &[]).await;
        scope.complete(result)
    }
}
