use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::codes::{VALIDATION_INSTALLMENT_PLAN, VALIDATION_RANGE, VALIDATION_REQUIRED};
use crate::id::EntityId;
use crate::store::RowMap;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub id: EntityId,
    pub name: String,
    /// Offline families never reach the backend.
    pub is_offline: bool,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Month {
    pub id: EntityId,
    pub family_id: EntityId,
    pub year: i32,
    pub month: u32,
    pub income: f64,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentInfo {
    pub current: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: EntityId,
    pub month_id: EntityId,
    pub title: String,
    pub category: String,
    pub subcategory_id: Option<EntityId>,
    pub value: f64,
    pub is_recurring: bool,
    pub is_pending: bool,
    pub due_day: Option<u32>,
    pub recurring_expense_id: Option<EntityId>,
    pub installment_info: Option<InstallmentInfo>,
    /// Calendar month the expense belongs to, when derivable.
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringExpense {
    pub id: EntityId,
    pub family_id: EntityId,
    pub title: String,
    pub category: String,
    pub subcategory_id: Option<EntityId>,
    pub value: f64,
    pub due_day: Option<u32>,
    pub has_installments: bool,
    pub total_installments: Option<u32>,
    pub start_year: Option<i32>,
    pub start_month: Option<u32>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub id: EntityId,
    pub family_id: EntityId,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSource {
    pub id: EntityId,
    pub month_id: EntityId,
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: EntityId,
    pub family_id: EntityId,
    pub name: String,
    pub target_value: f64,
    pub target_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalEntry {
    pub id: EntityId,
    pub goal_id: EntityId,
    pub value: f64,
    pub note: Option<String>,
    pub entry_date: Option<String>,
}

// Inputs. These serialize to the snake_case row shape shared by the backend
// and the local store.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewExpense {
    pub title: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<EntityId>,
    pub value: f64,
    pub is_recurring: bool,
    pub is_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_expense_id: Option<EntityId>,
    #[serde(skip_serializing)]
    pub installment_info: Option<InstallmentInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpensePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_day: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecurringExpense {
    pub title: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<EntityId>,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_day: Option<u32>,
    pub has_installments: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_installments: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_month: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurringExpensePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_installments: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_installments: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_month: Option<u32>,
}

impl RecurringExpensePatch {
    /// The part of a template edit that also applies to its materialized
    /// expenses. Installment bookkeeping stays per instance.
    pub fn expense_patch(&self) -> ExpensePatch {
        ExpensePatch {
            title: self.title.clone(),
            category: self.category.clone(),
            subcategory_id: self.subcategory_id.clone(),
            value: self.value,
            is_pending: None,
            due_day: self.due_day,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSubcategory {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewIncomeSource {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeSourcePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewGoal {
    pub name: String,
    pub target_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewGoalEntry {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalEntryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_date: Option<String>,
}

/// Serializes an input into its row shape.
pub fn to_row<T: Serialize>(value: &T) -> AppResult<RowMap> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::new(
            crate::error::codes::MAPPER_NOT_OBJECT,
            "Input did not serialize to an object",
        )),
    }
}

impl NewExpense {
    pub fn to_row(&self) -> AppResult<RowMap> {
        let mut row = to_row(self)?;
        if let Some(info) = self.installment_info {
            row.insert("installment_current".into(), Value::from(info.current));
            row.insert("installment_total".into(), Value::from(info.total));
        }
        Ok(row)
    }
}

fn require_text(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            VALIDATION_REQUIRED,
            format!("{field} is required"),
            field,
        ));
    }
    Ok(())
}

fn require_finite(value: f64, field: &str) -> AppResult<()> {
    if !value.is_finite() {
        return Err(AppError::validation(
            VALIDATION_RANGE,
            format!("{field} must be a finite number"),
            field,
        )
        .with_context("value", value.to_string()));
    }
    Ok(())
}

fn require_non_negative(value: f64, field: &str) -> AppResult<()> {
    require_finite(value, field)?;
    if value < 0.0 {
        return Err(AppError::validation(
            VALIDATION_RANGE,
            format!("{field} cannot be negative"),
            field,
        )
        .with_context("value", value.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_month(month: u32) -> AppResult<()> {
    if !(1..=12).contains(&month) {
        return Err(
            AppError::validation(VALIDATION_RANGE, "Month must be between 1 and 12", "month")
                .with_context("value", month.to_string()),
        );
    }
    Ok(())
}

fn validate_due_day(due_day: Option<u32>) -> AppResult<()> {
    match due_day {
        Some(day) if !(1..=31).contains(&day) => Err(AppError::validation(
            VALIDATION_RANGE,
            "Due day must be between 1 and 31",
            "due_day",
        )
        .with_context("value", day.to_string())),
        _ => Ok(()),
    }
}

pub(crate) fn validate_name(name: &str) -> AppResult<()> {
    require_text(name, "name")
}

pub(crate) fn validate_income(income: f64) -> AppResult<()> {
    require_non_negative(income, "income")
}

impl NewExpense {
    pub fn validate(&self) -> AppResult<()> {
        require_text(&self.title, "title")?;
        require_text(&self.category, "category")?;
        require_finite(self.value, "value")?;
        validate_due_day(self.due_day)?;
        if let Some(info) = self.installment_info {
            if info.total == 0 || info.current == 0 || info.current > info.total {
                return Err(AppError::validation(
                    VALIDATION_INSTALLMENT_PLAN,
                    "Installment position must lie within the plan",
                    "installment_info",
                )
                .with_context("current", info.current.to_string())
                .with_context("total", info.total.to_string()));
            }
        }
        Ok(())
    }
}

impl ExpensePatch {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(title) = &self.title {
            require_text(title, "title")?;
        }
        if let Some(category) = &self.category {
            require_text(category, "category")?;
        }
        if let Some(value) = self.value {
            require_finite(value, "value")?;
        }
        validate_due_day(self.due_day)
    }
}

fn validate_plan(
    has_installments: bool,
    total: Option<u32>,
    start_year: Option<i32>,
    start_month: Option<u32>,
) -> AppResult<()> {
    if !has_installments {
        return Ok(());
    }
    let plan_error = |field: &str| {
        AppError::validation(
            VALIDATION_INSTALLMENT_PLAN,
            "Installment plans need a positive total and a start month",
            field,
        )
    };
    match total {
        Some(n) if n > 0 => {}
        _ => return Err(plan_error("total_installments")),
    }
    if start_year.is_none() {
        return Err(plan_error("start_year"));
    }
    match start_month {
        Some(m) => validate_month(m),
        None => Err(plan_error("start_month")),
    }
}

impl NewRecurringExpense {
    pub fn validate(&self) -> AppResult<()> {
        require_text(&self.title, "title")?;
        require_text(&self.category, "category")?;
        require_finite(self.value, "value")?;
        validate_due_day(self.due_day)?;
        validate_plan(
            self.has_installments,
            self.total_installments,
            self.start_year,
            self.start_month,
        )
    }
}

impl RecurringExpensePatch {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(title) = &self.title {
            require_text(title, "title")?;
        }
        if let Some(category) = &self.category {
            require_text(category, "category")?;
        }
        if let Some(value) = self.value {
            require_finite(value, "value")?;
        }
        if let Some(month) = self.start_month {
            validate_month(month)?;
        }
        if self.total_installments == Some(0) {
            return Err(AppError::validation(
                VALIDATION_INSTALLMENT_PLAN,
                "Installment plans need a positive total",
                "total_installments",
            ));
        }
        validate_due_day(self.due_day)
    }
}

impl NewSubcategory {
    pub fn validate(&self) -> AppResult<()> {
        require_text(&self.name, "name")?;
        require_text(&self.category, "category")
    }
}

impl NewIncomeSource {
    pub fn validate(&self) -> AppResult<()> {
        require_text(&self.name, "name")?;
        require_non_negative(self.value, "value")
    }
}

impl NewGoal {
    pub fn validate(&self) -> AppResult<()> {
        require_text(&self.name, "name")?;
        require_non_negative(self.target_value, "target_value")
    }
}

impl NewGoalEntry {
    pub fn validate(&self) -> AppResult<()> {
        require_finite(self.value, "value")
    }
}

impl SubcategoryPatch {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            require_text(name, "name")?;
        }
        if let Some(category) = &self.category {
            require_text(category, "category")?;
        }
        Ok(())
    }
}

impl IncomeSourcePatch {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            require_text(name, "name")?;
        }
        match self.value {
            Some(value) => require_non_negative(value, "value"),
            None => Ok(()),
        }
    }
}

impl GoalPatch {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            require_text(name, "name")?;
        }
        match self.target_value {
            Some(value) => require_non_negative(value, "target_value"),
            None => Ok(()),
        }
    }
}

impl GoalEntryPatch {
    pub fn validate(&self) -> AppResult<()> {
        match self.value {
            Some(value) => require_finite(value, "value"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_expense_row_splits_installment_columns() {
        let input = NewExpense {
            title: "Laptop".into(),
            category: "tech".into(),
            value: 150.0,
            is_recurring: true,
            is_pending: true,
            installment_info: Some(InstallmentInfo { current: 3, total: 10 }),
            ..Default::default()
        };
        let row = input.to_row().expect("row");
        assert_eq!(row.get("installment_current"), Some(&Value::from(3)));
        assert_eq!(row.get("installment_total"), Some(&Value::from(10)));
        assert!(!row.contains_key("installment_info"));
        assert!(!row.contains_key("due_day"));
    }

    #[test]
    fn patches_only_carry_set_fields() {
        let patch = ExpensePatch {
            value: Some(10.0),
            ..Default::default()
        };
        let row = to_row(&patch).expect("row");
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("value"), Some(&Value::from(10.0)));
    }

    #[test]
    fn expense_validation_rejects_blank_title_and_bad_due_day() {
        let mut input = NewExpense {
            title: "  ".into(),
            category: "food".into(),
            ..Default::default()
        };
        let err = input.validate().expect_err("blank title");
        assert_eq!(err.code(), VALIDATION_REQUIRED);
        assert_eq!(err.context().get("field").map(String::as_str), Some("title"));

        input.title = "Groceries".into();
        input.due_day = Some(32);
        assert_eq!(input.validate().expect_err("due day").code(), VALIDATION_RANGE);
    }

    #[test]
    fn installment_plans_need_all_fields() {
        let mut template = NewRecurringExpense {
            title: "Car".into(),
            category: "transport".into(),
            value: 300.0,
            has_installments: true,
            total_installments: Some(24),
            start_year: Some(2024),
            start_month: None,
            ..Default::default()
        };
        let err = template.validate().expect_err("missing start month");
        assert_eq!(err.code(), VALIDATION_INSTALLMENT_PLAN);

        template.start_month = Some(10);
        template.validate().expect("complete plan");

        template.has_installments = false;
        template.total_installments = None;
        template.validate().expect("no plan needed");
    }

    #[test]
    fn template_patch_projects_onto_expenses() {
        let patch = RecurringExpensePatch {
            value: Some(99.0),
            total_installments: Some(12),
            ..Default::default()
        };
        let projected = to_row(&patch.expense_patch()).expect("row");
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("value"), Some(&Value::from(99.0)));
    }
}
