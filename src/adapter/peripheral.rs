//! Subcategories, income sources, goals and goal entries. They follow the
//! same dual path as everything else and carry no special rules.

use serde_json::Value;

use super::StorageAdapter;
use crate::id::{EntityId, EntityKind};
use crate::logging::OpScope;
use crate::mapper::{
    map_goal, map_goal_entries, map_goal_entry, map_goals, map_income_source,
    map_income_sources, map_subcategories, map_subcategory,
};
use crate::model::{
    to_row, Goal, GoalEntry, GoalEntryPatch, GoalPatch, IncomeSource, IncomeSourcePatch, NewGoal,
    NewGoalEntry, NewIncomeSource, NewSubcategory, Subcategory, SubcategoryPatch,
};
use crate::store::{RowMap, StoreName};
use crate::AppResult;

fn with_parent(mut row: RowMap, column: &str, parent: &EntityId) -> RowMap {
    row.insert(column.into(), Value::String(parent.to_string()));
    row
}

impl StorageAdapter {
    pub async fn get_subcategories(&self, family: &EntityId) -> AppResult<Vec<Subcategory>> {
        let scope = OpScope::new("get_subcategories", Some(family.as_str()));
        let result = async {
            self.read_rows(family, StoreName::Subcategories, "by_family", family.as_str())
                .await?
                .try_map(|rows| map_subcategories(&rows))
        }
        .await;
        scope.complete(result)
    }

    pub async fn add_subcategory(
        &self,
        family: &EntityId,
        input: &NewSubcategory,
    ) -> AppResult<Subcategory> {
        let scope = OpScope::new("add_subcategory", Some(family.as_str()));
        let result = async {
            input.validate()?;
            let row = with_parent(to_row(input)?, "family_id", family);
            self.create_row(
                family,
                StoreName::Subcategories,
                EntityId::local(EntityKind::Subcategory),
                row,
            )
            .await?
            .try_map(|row| map_subcategory(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn update_subcategory(
        &self,
        family: &EntityId,
        id: &EntityId,
        patch: &SubcategoryPatch,
    ) -> AppResult<Subcategory> {
        let scope = OpScope::new("update_subcategory", Some(family.as_str()));
        let result = async {
            patch.validate()?;
            self.update_row(family, StoreName::Subcategories, id, to_row(patch)?)
                .await?
                .try_map(|row| map_subcategory(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn delete_subcategory(&self, family: &EntityId, id: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_subcategory", Some(family.as_str()));
        let result = self
            .delete_row(family, StoreName::Subcategories, id, &[])
            .await;
        scope.complete(result)
    }

    pub async fn get_income_sources(
        &self,
        family: &EntityId,
        month_id: &EntityId,
    ) -> AppResult<Vec<IncomeSource>> {
        let scope = OpScope::new("get_income_sources", Some(family.as_str()));
        let result = async {
            self.read_rows(family, StoreName::IncomeSources, "by_month", month_id.as_str())
                .await?
                .try_map(|rows| map_income_sources(&rows))
        }
        .await;
        scope.complete(result)
    }

    pub async fn add_income_source(
        &self,
        family: &EntityId,
        month_id: &EntityId,
        input: &NewIncomeSource,
    ) -> AppResult<IncomeSource> {
        let scope = OpScope::new("add_income_source", Some(family.as_str()));
        let result = async {
            input.validate()?;
            let row = with_parent(to_row(input)?, "month_id", month_id);
            self.create_row(
                family,
                StoreName::IncomeSources,
                EntityId::local(EntityKind::IncomeSource),
                row,
            )
            .await?
            .try_map(|row| map_income_source(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn update_income_source(
        &self,
        family: &EntityId,
        id: &EntityId,
        patch: &IncomeSourcePatch,
    ) -> AppResult<IncomeSource> {
        let scope = OpScope::new("update_income_source", Some(family.as_str()));
        let result = async {
            patch.validate()?;
            self.update_row(family, StoreName::IncomeSources, id, to_row(patch)?)
                .await?
                .try_map(|row| map_income_source(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn delete_income_source(&self, family: &EntityId, id: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_income_source", Some(family.as_str()));
        let result = self
            .delete_row(family, StoreName::IncomeSources, id, &[])
            .await;
        scope.complete(result)
    }

    pub async fn get_goals(&self, family: &EntityId) -> AppResult<Vec<Goal>> {
        let scope = OpScope::new("get_goals", Some(family.as_str()));
        let result = async {
            self.read_rows(family, StoreName::Goals, "by_family", family.as_str())
                .await?
                .try_map(|rows| map_goals(&rows))
        }
        .await;
        scope.complete(result)
    }

    pub async fn add_goal(&self, family: &EntityId, input: &NewGoal) -> AppResult<Goal> {
        let scope = OpScope::new("add_goal", Some(family.as_str()));
        let result = async {
            input.validate()?;
            let row = with_parent(to_row(input)?, "family_id", family);
            self.create_row(family, StoreName::Goals, EntityId::local(EntityKind::Goal), row)
                .await?
                .try_map(|row| map_goal(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn update_goal(
        &self,
        family: &EntityId,
        id: &EntityId,
        patch: &GoalPatch,
    ) -> AppResult<Goal> {
        let scope = OpScope::new("update_goal", Some(family.as_str()));
        let result = async {
            patch.validate()?;
            self.update_row(family, StoreName::Goals, id, to_row(patch)?)
                .await?
                .try_map(|row| map_goal(&row))
        }
        .await;
        scope.complete(result)
    }

    /// Deletes a goal and its entries.
    pub async fn delete_goal(&self, family: &EntityId, id: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_goal", Some(family.as_str()));
        let result = self
            .delete_row(
                family,
                StoreName::Goals,
                id,
                &[(StoreName::GoalEntries, "by_goal")],
            )
            .await;
        scope.complete(result)
    }

    pub async fn get_goal_entries(
        &self,
        family: &EntityId,
        goal_id: &EntityId,
    ) -> AppResult<Vec<GoalEntry>> {
        let scope = OpScope::new("get_goal_entries", Some(family.as_str()));
        let result = async {
            self.read_rows(family, StoreName::GoalEntries, "by_goal", goal_id.as_str())
                .await?
                .try_map(|rows| map_goal_entries(&rows))
        }
        .await;
        scope.complete(result)
    }

    pub async fn add_goal_entry(
        &self,
        family: &EntityId,
        goal_id: &EntityId,
        input: &NewGoalEntry,
    ) -> AppResult<GoalEntry> {
        let scope = OpScope::new("add_goal_entry", Some(family.as_str()));
        let result = async {
            input.validate()?;
            let row = with_parent(to_row(input)?, "goal_id", goal_id);
            self.create_row(
                family,
                StoreName::GoalEntries,
                EntityId::local(EntityKind::GoalEntry),
                row,
            )
            .await?
            .try_map(|row| map_goal_entry(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn update_goal_entry(
        &self,
        family: &EntityId,
        id: &EntityId,
        patch: &GoalEntryPatch,
    ) -> AppResult<GoalEntry> {
        let scope = OpScope::new("update_goal_entry", Some(family.as_str()));
        let result = async {
            patch.validate()?;
            self.update_row(family, StoreName::GoalEntries, id, to_row(patch)?)
                .await?
                .try_map(|row| map_goal_entry(&row))
        }
        .await;
        scope.complete(result)
    }

    pub async fn delete_goal_entry(&self, family: &EntityId, id: &EntityId) -> AppResult<()> {
        let scope = OpScope::new("delete_goal_entry", Some(family.as_str()));
        let result = self
            .delete_row(family, StoreName::GoalEntries, id, &[])
            .await;
        scope.complete(result)
    }
}
