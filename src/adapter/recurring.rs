use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{Route, Routed, StorageAdapter};
use crate::id::{EntityId, EntityKind};
use crate::logging::OpScope;
use crate::mapper::{map_month, map_months, map_recurring, map_recurring_expenses};
use crate::model::{
    to_row, Expense, Month, NewRecurringExpense, RecurringExpense, RecurringExpensePatch,
};
use crate::recurrence::{materialize, should_include};
use crate::store::{RowMap, StoreName};
use crate::sync_queue::Mutation;
use crate::AppResult;

const TEMPLATE_LINK: &str = "recurring_expense_id";

/// What applying a template to a month did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "expense", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied(Expense),
    /// The month already holds this template's instance.
    AlreadyApplied(Expense),
    /// The month lies outside the template's installment plan.
    NotApplicable,
}

impl StorageAdapter {
    pub async fn get_recurring(&self, family: &EntityId) -> AppResult<Vec<RecurringExpense>> {
        let scope = OpScope::new("get_recurring", Some(family.as_str()));
        let result = self.templates_routed(family).await;
        scope.complete(result)
    }

    async fn templates_routed(
        &self,
        family: &EntityId,
    ) -> AppResult<Routed<Vec<RecurringExpense>>> {
        self.read_rows(family, StoreName::RecurringExpenses, "by_family", family.as_str())
            .await?
            .try_map(|rows| map_recurring_expenses(&rows))
    }

    pub(super) async fn templates_for(
        &self,
        family: &EntityId,
    ) -> AppResult<Vec<RecurringExpense>> {
        Ok(self.templates_routed(family).await?.value)
    }

    pub async fn insert_recurring(
        &self,
        family: &EntityId,
        input: &NewRecurringExpense,
    ) -> AppResult<RecurringExpense> {
        let scope = OpScope::new("insert_recurring", Some(family.as_str()));
        let result = async {
            input.validate()?;
            let mut row = to_row(input)?;
            row.insert("family_id".into(), Value::String(family.to_string()));
            self.create_row(
                family,
                StoreName::RecurringExpenses,
                EntityId::local(EntityKind::RecurringExpense),
                row,
            )
            .await?
            .try_map(|row| map_recurring(&row))
        }
        .await;
        scope.complete(result)
    }

    /// Edits a template. With `update_past_expenses` the shared fields are
    /// also written to every expense already materialized from it.
    pub async fn update_recurring(
        &self,
        family: &EntityId,
        id: &EntityId,
        patch: &RecurringExpensePatch,
        update_past_expenses: bool,
    ) -> AppResult<RecurringExpense> {
        let scope = OpScope::new("update_recurring", Some(family.as_str()));
        let result = async {
            patch.validate()?;
            let updated = self
                .update_row(family, StoreName::RecurringExpenses, id, to_row(patch)?)
                .await?
                .try_map(|row| map_recurring(&row))?;
            if !update_past_expenses {
                return Ok(updated);
            }
            let instance_patch = to_row(&patch.expense_patch())?;
            if instance_patch.is_empty() {
                return Ok(updated);
            }
            let queued = self.cascade_to_instances(family, id, instance_patch).await?;
            Ok(Routed {
                queued: updated.queued || queued,
                ..updated
            })
        }
        .await;
        scope.complete(result)
    }

    /// Returns whether the cascade was queued for replay.
    async fn cascade_to_instances(
        &self,
        family: &EntityId,
        template_id: &EntityId,
        patch: RowMap,
    ) -> AppResult<bool> {
        let queue = match self.write_route(family, Some(template_id), Some(&patch)) {
            Route::Local { queue } => queue,
            Route::Remote => {
                match self
                    .remote
                    .update_where(EntityKind::Expense, TEMPLATE_LINK, template_id.as_str(), &patch)
                    .await
                {
                    Ok(_) => false,
                    Err(err) => {
                        self.note_remote_failure(StoreName::Expenses, "update_where", &err);
                        true
                    }
                }
            }
        };
        let touched = self.patch_local_instances(template_id, &patch).await?;
        info!(
            target: "nestbudget",
            event = "recurring_cascade",
            template_id = %template_id,
            expenses = touched
        );
        if queue {
            self.enqueue(
                family,
                StoreName::Expenses,
                Mutation::UpdateWhere {
                    field: TEMPLATE_LINK.to_string(),
                    value: template_id.to_string(),
                    patch,
                },
            )
            .await?;
        }
        Ok(queue)
    }

    async fn patch_local_instances(
        &self,
        template_id: &EntityId,
        patch: &RowMap,
    ) -> AppResult<usize> {
        let rows = self
            .local_rows(StoreName::Expenses, "by_recurring", template_id.as_str())
            .await?;
        let touched = rows.len();
        let patched = rows
            .into_iter()
            .map(|mut row| {
                row.extend(patch.clone());
                row
            })
            .collect();
        self.store.put_many(StoreName::Expenses, patched).await?;
        Ok(touched)
    }

    /// Deletes a template. Expenses materialized from it are kept.
    pub async fn delete_recurring(&self, family: &EntityId, id: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_recurring", Some(family.as_str()));
        let result = self
            .delete_row(family, StoreName::RecurringExpenses, id, &[])
            .await;
        scope.complete(result)
    }

    /// Materializes `template` into a month unless the month already holds
    /// its instance. Safe to call repeatedly.
    pub async fn apply_recurring_to_month(
        &self,
        family: &EntityId,
        template: &RecurringExpense,
        month_id: &EntityId,
    ) -> AppResult<ApplyOutcome> {
        let scope = OpScope::new("apply_recurring_to_month", Some(family.as_str()));
        let result = async {
            let month = self.month_record(family, month_id).await?;
            if !should_include(template, month.year, month.month).include {
                return Ok(Routed::local(ApplyOutcome::NotApplicable, false));
            }
            let existing = self.expenses_of(family, month_id).await?;
            if let Some(instance) = existing
                .value
                .into_iter()
                .find(|e| e.recurring_expense_id.as_ref() == Some(&template.id))
            {
                return Ok(Routed {
                    value: ApplyOutcome::AlreadyApplied(instance),
                    path: existing.path,
                    queued: false,
                });
            }
            match self.materialize_into(family, template, &month).await? {
                Some(created) => created.try_map(|e| Ok(ApplyOutcome::Applied(e))),
                None => Ok(Routed::local(ApplyOutcome::NotApplicable, false)),
            }
        }
        .await;
        scope.complete(result)
    }

    /// Inserts the instance `template` contributes to `month`, if any.
    pub(super) async fn materialize_into(
        &self,
        family: &EntityId,
        template: &RecurringExpense,
        month: &Month,
    ) -> AppResult<Option<Routed<Expense>>> {
        let Some(instance) = materialize(template, month) else {
            return Ok(None);
        };
        let created = self
            .insert_expense_routed(family, &month.id, &instance)
            .await?;
        Ok(Some(created))
    }

    async fn month_record(&self, family: &EntityId, month_id: &EntityId) -> AppResult<Month> {
        if let Some(row) = self.store.get(StoreName::Months, month_id.as_str()).await? {
            return map_month(&row);
        }
        let months = self
            .read_rows(family, StoreName::Months, "by_family", family.as_str())
            .await?;
        map_months(&months.value)?
            .into_iter()
            .find(|m| &m.id == month_id)
            .ok_or_else(|| super::not_found(StoreName::Months, month_id))
    }
}
