//! Converts snake_case rows (backend or local store) into domain values.
//!
//! Rows are lenient: numeric fields accept numbers or numeric strings and
//! booleans accept `true/false`, `0/1` and their string forms. Only a missing
//! or unusable required field is an error.

use serde_json::Value;

use crate::error::codes::{MAPPER_INVALID_FIELD, MAPPER_MISSING_FIELD};
use crate::id::{parse_month_id, EntityId};
use crate::model::{
    Expense, Family, Goal, GoalEntry, IncomeSource, InstallmentInfo, Month, RecurringExpense,
    Subcategory,
};
use crate::store::RowMap;
use crate::time::{year_month_of_ms, year_month_of_rfc3339};
use crate::{AppError, AppResult};

fn missing(entity: &str, field: &str) -> AppError {
    AppError::new(MAPPER_MISSING_FIELD, format!("{entity} row is missing `{field}`"))
        .with_context("entity", entity)
        .with_context("field", field)
}

fn invalid(entity: &str, field: &str, value: &Value) -> AppError {
    AppError::new(MAPPER_INVALID_FIELD, format!("{entity} row has an unusable `{field}`"))
        .with_context("entity", entity)
        .with_context("field", field)
        .with_context("value", value.to_string())
}

/// Absent and `null` are the same thing for every row field.
fn field<'a>(row: &'a RowMap, name: &str) -> Option<&'a Value> {
    row.get(name).filter(|v| !v.is_null())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn req_text(row: &RowMap, entity: &str, name: &str) -> AppResult<String> {
    let value = field(row, name).ok_or_else(|| missing(entity, name))?;
    as_text(value).ok_or_else(|| invalid(entity, name, value))
}

fn opt_text(row: &RowMap, name: &str) -> Option<String> {
    field(row, name).and_then(as_text)
}

fn req_id(row: &RowMap, entity: &str, name: &str) -> AppResult<EntityId> {
    let raw = req_text(row, entity, name)?;
    if raw.trim().is_empty() {
        return Err(missing(entity, name));
    }
    Ok(EntityId::classify(raw))
}

fn opt_id(row: &RowMap, name: &str) -> Option<EntityId> {
    opt_text(row, name)
        .filter(|raw| !raw.trim().is_empty())
        .map(EntityId::classify)
}

fn req_number(row: &RowMap, entity: &str, name: &str) -> AppResult<f64> {
    let value = field(row, name).ok_or_else(|| missing(entity, name))?;
    as_number(value).ok_or_else(|| invalid(entity, name, value))
}

fn number_or(row: &RowMap, name: &str, default: f64) -> f64 {
    field(row, name).and_then(as_number).unwrap_or(default)
}

fn opt_u32(row: &RowMap, name: &str) -> Option<u32> {
    field(row, name)
        .and_then(as_number)
        .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32)
}

fn opt_i32(row: &RowMap, name: &str) -> Option<i32> {
    field(row, name)
        .and_then(as_number)
        .filter(|n| n.fract() == 0.0 && n.abs() <= i32::MAX as f64)
        .map(|n| n as i32)
}

fn bool_or(row: &RowMap, name: &str, default: bool) -> bool {
    field(row, name).and_then(as_bool).unwrap_or(default)
}

/// Creation time in epoch milliseconds; RFC 3339 strings are converted.
fn created_at_ms(row: &RowMap) -> Option<i64> {
    match field(row, "created_at")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(ms) => Some(ms),
            Err(_) => chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis()),
        },
        _ => None,
    }
}

fn year_month_of_created_at(row: &RowMap) -> Option<(i32, u32)> {
    match field(row, "created_at")? {
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(ms) => year_month_of_ms(ms),
            Err(_) => year_month_of_rfc3339(s.trim()),
        },
        other => as_number(other).and_then(|ms| year_month_of_ms(ms as i64)),
    }
}

fn joined_month(row: &RowMap) -> Option<(i32, u32)> {
    ["months", "month"].iter().find_map(|key| {
        let joined = field(row, key)?.as_object()?;
        let year = opt_i32(joined, "year")?;
        let month = opt_u32(joined, "month").filter(|m| (1..=12).contains(m))?;
        Some((year, month))
    })
}

/// Calendar month of an expense row: the joined month, then the offline
/// month-id grammar, then the creation timestamp.
pub fn derive_year_month(row: &RowMap) -> Option<(i32, u32)> {
    joined_month(row)
        .or_else(|| opt_text(row, "month_id").and_then(|id| parse_month_id(&id)))
        .or_else(|| year_month_of_created_at(row))
}

pub fn map_family(row: &RowMap) -> AppResult<Family> {
    const E: &str = "family";
    let id = req_id(row, E, "id")?;
    let is_offline = field(row, "is_offline")
        .and_then(as_bool)
        .unwrap_or_else(|| id.is_local());
    Ok(Family {
        name: req_text(row, E, "name")?,
        is_offline,
        created_at: created_at_ms(row),
        id,
    })
}

pub fn map_month(row: &RowMap) -> AppResult<Month> {
    const E: &str = "month";
    let id = req_id(row, E, "id")?;
    let from_id = parse_month_id(id.as_str());
    let year = match opt_i32(row, "year").or(from_id.map(|(y, _)| y)) {
        Some(year) => year,
        None => return Err(missing(E, "year")),
    };
    let month = match field(row, "month") {
        Some(value) => as_number(value)
            .filter(|m| m.fract() == 0.0 && (1.0..=12.0).contains(m))
            .map(|m| m as u32)
            .ok_or_else(|| invalid(E, "month", value))?,
        None => from_id.map(|(_, m)| m).ok_or_else(|| missing(E, "month"))?,
    };
    Ok(Month {
        family_id: req_id(row, E, "family_id")?,
        year,
        month,
        income: number_or(row, "income", 0.0),
        created_at: created_at_ms(row),
        id,
    })
}

pub fn map_expense(row: &RowMap) -> AppResult<Expense> {
    const E: &str = "expense";
    let installment_info = match (
        opt_u32(row, "installment_current"),
        opt_u32(row, "installment_total"),
    ) {
        (Some(current), Some(total)) => Some(InstallmentInfo { current, total }),
        _ => None,
    };
    let period = derive_year_month(row);
    Ok(Expense {
        id: req_id(row, E, "id")?,
        month_id: req_id(row, E, "month_id")?,
        title: req_text(row, E, "title")?,
        category: opt_text(row, "category").unwrap_or_default(),
        subcategory_id: opt_id(row, "subcategory_id"),
        value: req_number(row, E, "value")?,
        is_recurring: bool_or(row, "is_recurring", false),
        is_pending: bool_or(row, "is_pending", false),
        due_day: opt_u32(row, "due_day"),
        recurring_expense_id: opt_id(row, "recurring_expense_id"),
        installment_info,
        year: period.map(|(y, _)| y),
        month: period.map(|(_, m)| m),
        created_at: created_at_ms(row),
    })
}

pub fn map_recurring(row: &RowMap) -> AppResult<RecurringExpense> {
    const E: &str = "recurring_expense";
    Ok(RecurringExpense {
        id: req_id(row, E, "id")?,
        family_id: req_id(row, E, "family_id")?,
        title: req_text(row, E, "title")?,
        category: opt_text(row, "category").unwrap_or_default(),
        subcategory_id: opt_id(row, "subcategory_id"),
        value: req_number(row, E, "value")?,
        due_day: opt_u32(row, "due_day"),
        has_installments: bool_or(row, "has_installments", false),
        total_installments: opt_u32(row, "total_installments"),
        start_year: opt_i32(row, "start_year"),
        start_month: opt_u32(row, "start_month"),
        created_at: created_at_ms(row),
    })
}

pub fn map_subcategory(row: &RowMap) -> AppResult<Subcategory> {
    const E: &str = "subcategory";
    Ok(Subcategory {
        id: req_id(row, E, "id")?,
        family_id: req_id(row, E, "family_id")?,
        name: req_text(row, E, "name")?,
        category: opt_text(row, "category").unwrap_or_default(),
    })
}

pub fn map_income_source(row: &RowMap) -> AppResult<IncomeSource> {
    const E: &str = "income_source";
    Ok(IncomeSource {
        id: req_id(row, E, "id")?,
        month_id: req_id(row, E, "month_id")?,
        name: req_text(row, E, "name")?,
        value: number_or(row, "value", 0.0),
    })
}

pub fn map_goal(row: &RowMap) -> AppResult<Goal> {
    const E: &str = "goal";
    Ok(Goal {
        id: req_id(row, E, "id")?,
        family_id: req_id(row, E, "family_id")?,
        name: req_text(row, E, "name")?,
        target_value: number_or(row, "target_value", 0.0),
        target_date: opt_text(row, "target_date"),
    })
}

pub fn map_goal_entry(row: &RowMap) -> AppResult<GoalEntry> {
    const E: &str = "goal_entry";
    Ok(GoalEntry {
        id: req_id(row, E, "id")?,
        goal_id: req_id(row, E, "goal_id")?,
        value: req_number(row, E, "value")?,
        note: opt_text(row, "note"),
        entry_date: opt_text(row, "entry_date"),
    })
}

/// Maps every row, failing on the first unusable one.
pub fn map_rows<T>(rows: &[RowMap], map: fn(&RowMap) -> AppResult<T>) -> AppResult<Vec<T>> {
    rows.iter().map(map).collect()
}

pub fn map_families(rows: &[RowMap]) -> AppResult<Vec<Family>> {
    map_rows(rows, map_family)
}

pub fn map_months(rows: &[RowMap]) -> AppResult<Vec<Month>> {
    map_rows(rows, map_month)
}

pub fn map_expenses(rows: &[RowMap]) -> AppResult<Vec<Expense>> {
    map_rows(rows, map_expense)
}

pub fn map_recurring_expenses(rows: &[RowMap]) -> AppResult<Vec<RecurringExpense>> {
    map_rows(rows, map_recurring)
}

pub fn map_subcategories(rows: &[RowMap]) -> AppResult<Vec<Subcategory>> {
    map_rows(rows, map_subcategory)
}

pub fn map_income_sources(rows: &[RowMap]) -> AppResult<Vec<IncomeSource>> {
    map_rows(rows, map_income_source)
}

pub fn map_goals(rows: &[RowMap]) -> AppResult<Vec<Goal>> {
    map_rows(rows, map_goal)
}

pub fn map_goal_entries(rows: &[RowMap]) -> AppResult<Vec<GoalEntry>> {
    map_rows(rows, map_goal_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Origin;
    use serde_json::json;

    fn row(value: Value) -> RowMap {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn expense_period_prefers_joined_month() {
        let mapped = map_expense(&row(json!({
            "id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "month_id": "month-family-1-2025-03",
            "title": "Rent",
            "value": "1200.50",
            "months": {"year": 2024, "month": 11},
            "created_at": 1_742_040_000_000_i64,
        })))
        .expect("map");
        assert_eq!((mapped.year, mapped.month), (Some(2024), Some(11)));
        assert_eq!(mapped.value, 1200.5);
        assert_eq!(mapped.id.origin(), Origin::Remote);
    }

    #[test]
    fn expense_period_falls_back_to_month_id_then_timestamp() {
        let by_grammar = map_expense(&row(json!({
            "id": "expense-1-abc",
            "month_id": "month-family-1-2025-03",
            "title": "Rent",
            "value": 10,
        })))
        .expect("map");
        assert_eq!((by_grammar.year, by_grammar.month), (Some(2025), Some(3)));

        let by_timestamp = map_expense(&row(json!({
            "id": "e1",
            "month_id": "6a1c-remote",
            "title": "Rent",
            "value": 10,
            "created_at": "2024-12-31T23:30:00-02:00",
        })))
        .expect("map");
        assert_eq!((by_timestamp.year, by_timestamp.month), (Some(2025), Some(1)));

        let unknown = map_expense(&row(json!({
            "id": "e1", "month_id": "6a1c-remote", "title": "Rent", "value": 10
        })))
        .expect("map");
        assert_eq!((unknown.year, unknown.month), (None, None));
    }

    #[test]
    fn installment_info_needs_both_columns() {
        let partial = map_expense(&row(json!({
            "id": "e1", "month_id": "m1", "title": "Car", "value": 1,
            "installment_current": 3, "installment_total": null,
        })))
        .expect("map");
        assert!(partial.installment_info.is_none());

        let full = map_expense(&row(json!({
            "id": "e1", "month_id": "m1", "title": "Car", "value": 1,
            "installment_current": "3", "installment_total": 10,
        })))
        .expect("map");
        assert_eq!(full.installment_info, Some(InstallmentInfo { current: 3, total: 10 }));
    }

    #[test]
    fn booleans_accept_numeric_and_string_forms() {
        let mapped = map_expense(&row(json!({
            "id": "e1", "month_id": "m1", "title": "Gym", "value": 1,
            "is_recurring": 1, "is_pending": "false",
        })))
        .expect("map");
        assert!(mapped.is_recurring);
        assert!(!mapped.is_pending);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = map_expense(&row(json!({"id": "e1", "month_id": "m1", "value": 1})))
            .expect_err("no title");
        assert_eq!(err.code(), MAPPER_MISSING_FIELD);
        assert_eq!(err.context().get("field").map(String::as_str), Some("title"));

        let err = map_expense(&row(json!({
            "id": "e1", "month_id": "m1", "title": "x", "value": "abc"
        })))
        .expect_err("bad value");
        assert_eq!(err.code(), MAPPER_INVALID_FIELD);
    }

    #[test]
    fn month_period_recovers_from_offline_id() {
        let month = map_month(&row(json!({
            "id": "month-family-1-2025-03",
            "family_id": "family-1-abc",
        })))
        .expect("map");
        assert_eq!((month.year, month.month), (2025, 3));
        assert_eq!(month.income, 0.0);
        assert!(month.family_id.is_local());
    }

    #[test]
    fn family_offline_flag_defaults_to_origin() {
        let local = map_family(&row(json!({"id": "family-1-abc", "name": "Home"})))
            .expect("map");
        assert!(local.is_offline);
        let cloud = map_family(&row(json!({"id": "0b9c", "name": "Home", "is_offline": 0})))
            .expect("map");
        assert!(!cloud.is_offline);
    }

    #[test]
    fn batch_mapping_fails_on_first_bad_row() {
        let rows = vec![
            row(json!({"id": "g1", "family_id": "f", "name": "Trip", "target_value": "500"})),
            row(json!({"id": "g2", "family_id": "f"})),
        ];
        assert!(map_goals(&rows).is_err());
        let ok = map_goals(&rows[..1]).expect("first row");
        assert_eq!(ok[0].target_value, 500.0);
    }
}
