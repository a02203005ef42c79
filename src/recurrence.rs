//! Expansion of recurring templates into monthly expense instances.

use crate::model::{InstallmentInfo, Month, NewExpense, RecurringExpense};

/// Whether a template contributes an instance to a month, and which
/// installment that instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inclusion {
    pub include: bool,
    pub installment_number: Option<u32>,
}

impl Inclusion {
    const UNCONDITIONAL: Inclusion = Inclusion {
        include: true,
        installment_number: None,
    };
    const EXCLUDED: Inclusion = Inclusion {
        include: false,
        installment_number: None,
    };
}

/// 1-based position of (target_year, target_month) in a plan anchored at
/// (start_year, start_month). Zero or negative before the anchor.
pub fn installment_number(
    target_year: i32,
    target_month: u32,
    start_year: i32,
    start_month: u32,
) -> i64 {
    (i64::from(target_year) - i64::from(start_year)) * 12
        + (i64::from(target_month) - i64::from(start_month))
        + 1
}

pub fn should_include(template: &RecurringExpense, year: i32, month: u32) -> Inclusion {
    if !template.has_installments {
        return Inclusion::UNCONDITIONAL;
    }
    // An incomplete plan behaves like a plain recurring expense.
    let (Some(total), Some(start_year), Some(start_month)) = (
        template.total_installments,
        template.start_year,
        template.start_month,
    ) else {
        return Inclusion::UNCONDITIONAL;
    };

    let k = installment_number(year, month, start_year, start_month);
    if k >= 1 && k <= i64::from(total) {
        Inclusion {
            include: true,
            installment_number: u32::try_from(k).ok(),
        }
    } else {
        Inclusion::EXCLUDED
    }
}

/// The pending expense `template` contributes to `month`, if any.
pub fn materialize(template: &RecurringExpense, month: &Month) -> Option<NewExpense> {
    let inclusion = should_include(template, month.year, month.month);
    if !inclusion.include {
        return None;
    }
    let installment_info = match (inclusion.installment_number, template.total_installments) {
        (Some(current), Some(total)) => Some(InstallmentInfo { current, total }),
        _ => None,
    };
    Some(NewExpense {
        title: template.title.clone(),
        category: template.category.clone(),
        subcategory_id: template.subcategory_id.clone(),
        value: template.value,
        is_recurring: true,
        is_pending: true,
        due_day: template.due_day,
        recurring_expense_id: Some(template.id.clone()),
        installment_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityId;

    fn template(plan: Option<(u32, i32, u32)>) -> RecurringExpense {
        RecurringExpense {
            id: EntityId::remote("tpl-1"),
            family_id: EntityId::remote("fam-1"),
            title: "Car loan".into(),
            category: "transport".into(),
            subcategory_id: None,
            value: 320.0,
            due_day: Some(10),
            has_installments: plan.is_some(),
            total_installments: plan.map(|(n, _, _)| n),
            start_year: plan.map(|(_, y, _)| y),
            start_month: plan.map(|(_, _, m)| m),
            created_at: None,
        }
    }

    #[test]
    fn plan_of_24_from_october_2024() {
        let t = template(Some((24, 2024, 10)));
        let at = |y, m| should_include(&t, y, m);
        let nth = |k| Inclusion {
            include: true,
            installment_number: Some(k),
        };

        assert_eq!(at(2024, 10), nth(1));
        assert_eq!(at(2025, 1), nth(4));
        assert_eq!(at(2026, 9), nth(24));
        assert!(!at(2026, 10).include);
        assert!(!at(2024, 9).include);
    }

    #[test]
    fn templates_without_plan_always_apply() {
        let t = template(None);
        for (y, m) in [(1999, 1), (2025, 6), (2100, 12)] {
            assert_eq!(should_include(&t, y, m), Inclusion::UNCONDITIONAL);
        }

        let mut incomplete = template(Some((12, 2025, 1)));
        incomplete.start_month = None;
        assert_eq!(should_include(&incomplete, 2030, 5), Inclusion::UNCONDITIONAL);
    }

    #[test]
    fn installment_number_crosses_year_boundary() {
        assert_eq!(installment_number(2024, 12, 2024, 10), 3);
        assert_eq!(installment_number(2025, 1, 2024, 10), 4);
        assert_eq!(installment_number(2024, 9, 2024, 10), 0);
    }

    #[test]
    fn materialized_instance_is_pending_and_linked() {
        let t = template(Some((24, 2024, 10)));
        let month = Month {
            id: EntityId::remote("m-1"),
            family_id: t.family_id.clone(),
            year: 2025,
            month: 1,
            income: 0.0,
            created_at: None,
        };
        let expense = materialize(&t, &month).expect("in range");
        assert!(expense.is_pending);
        assert!(expense.is_recurring);
        assert_eq!(expense.due_day, Some(10));
        assert_eq!(expense.recurring_expense_id.as_ref(), Some(&t.id));
        assert_eq!(
            expense.installment_info,
            Some(InstallmentInfo {
                current: 4,
                total: 24
            })
        );

        let late = Month { year: 2027, ..month };
        assert!(materialize(&t, &late).is_none());
    }
}
