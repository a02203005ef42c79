use serde_json::{json, Value};
use tracing::warn;

use super::{Routed, StorageAdapter};
use crate::error::codes::{VALIDATION_MONTH_EXISTS, VALIDATION_RANGE};
use crate::id::EntityId;
use crate::logging::OpScope;
use crate::mapper::{map_month, map_months};
use crate::model::{validate_income, validate_month, Month};
use crate::store::{RowMap, StoreName};
use crate::{AppError, AppResult};

const MONTH_CHILDREN: &[(StoreName, &str)] = &[
    (StoreName::Expenses, "by_month"),
    (StoreName::IncomeSources, "by_month"),
];

fn validate_year(year: i32) -> AppResult<()> {
    if !(1..=9999).contains(&year) {
        return Err(
            AppError::validation(VALIDATION_RANGE, "Year must have four digits", "year")
                .with_context("value", year.to_string()),
        );
    }
    Ok(())
}

impl StorageAdapter {
    pub async fn get_months(&self, family: &EntityId) -> AppResult<Vec<Month>> {
        let scope = OpScope::new("get_months", Some(family.as_str()));
        let result = async {
            self.read_rows(family, StoreName::Months, "by_family", family.as_str())
                .await?
                .try_map(|rows| {
                    let mut months = map_months(&rows)?;
                    months.sort_by_key(|m| (m.year, m.month));
                    Ok(months)
                })
        }
        .await;
        scope.complete(result)
    }

    /// Creates a month and materializes every recurring template of the
    /// family that applies to it.
    pub async fn insert_month(&self, family: &EntityId, year: i32, month: u32) -> AppResult<Month> {
        let scope = OpScope::new("insert_month", Some(family.as_str()));
        let result = self.insert_month_routed(family, year, month).await;
        scope.complete(result)
    }

    async fn insert_month_routed(
        &self,
        family: &EntityId,
        year: i32,
        month: u32,
    ) -> AppResult<Routed<Month>> {
        validate_year(year)?;
        validate_month(month)?;

        let known = self
            .local_rows(StoreName::Months, "by_family", family.as_str())
            .await?;
        if map_months(&known)?
            .iter()
            .any(|m| m.year == year && m.month == month)
        {
            return Err(AppError::new(VALIDATION_MONTH_EXISTS, "Month already exists")
                .with_context("family_id", family.to_string())
                .with_context("year", year.to_string())
                .with_context("month", month.to_string()));
        }

        let mut row = RowMap::new();
        row.insert("family_id".into(), Value::String(family.to_string()));
        row.insert("year".into(), json!(year));
        row.insert("month".into(), json!(month));
        row.insert("income".into(), json!(0.0));

        let created = self
            .create_row(
                family,
                StoreName::Months,
                EntityId::local_month(family, year, month),
                row,
            )
            .await?
            .try_map(|row| map_month(&row))?;

        let templates = self.templates_for(family).await?;
        let mut queued = created.queued;
        for template in &templates {
            match self.materialize_into(family, template, &created.value).await {
                Ok(Some(instance)) => queued |= instance.queued,
                Ok(None) => {}
                // Malformed templates are skipped; the month stays.
                Err(err) if err.is_validation() => warn!(
                    target: "nestbudget",
                    event = "template_skipped",
                    family_id = %family,
                    template_id = %template.id,
                    code = err.code(),
                    error = %err
                ),
                Err(err) => return Err(err),
            }
        }
        Ok(Routed { queued, ..created })
    }

    pub async fn update_month_income(
        &self,
        family: &EntityId,
        month_id: &EntityId,
        income: f64,
    ) -> AppResult<Month> {
        let scope = OpScope::new("update_month_income", Some(family.as_str()));
        let result = async {
            validate_income(income)?;
            let mut patch = RowMap::new();
            patch.insert("income".into(), json!(income));
            self.update_row(family, StoreName::Months, month_id, patch)
                .await?
                .try_map(|row| map_month(&row))
        }
        .await;
        scope.complete(result)
    }

    /// Deletes a month together with its expenses and income sources.
    pub async fn delete_month(&self, family: &EntityId, month_id: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_month", Some(family.as_str()));
        let result = self
            .delete_row(family, StoreName::Months, month_id, MONTH_CHILDREN)
            .await;
        scope.complete(result)
    }
}
