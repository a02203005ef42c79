use anyhow::Result;
use nestbudget_lib::model::{ExpensePatch, NewExpense, NewRecurringExpense, RecurringExpensePatch};
use nestbudget_lib::{ApplyOutcome, EntityKind, RemoteError, Route, StoreName, SyncAction};
use serde_json::json;
#[path = "util.rs"]
mod util;

fn rent() -> NewExpense {
    NewExpense {
        title: "Rent".into(),
        category: "housing".into(),
        value: 900.0,
        ..Default::default()
    }
}

#[tokio::test]
async fn successful_writes_are_mirrored_locally() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    assert!(!family.is_offline);
    assert!(!family.id.is_local());
    assert_eq!(h.adapter.route(&family.id), Route::Remote);

    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;
    assert!(!month.id.is_local());
    let expense = h.adapter.insert_expense(&family.id, &month.id, &rent()).await?;
    assert!(!expense.id.is_local());

    let mirrored = h
        .adapter
        .store()
        .get(StoreName::Expenses, expense.id.as_str())
        .await?
        .expect("mirror row");
    assert_eq!(mirrored.get("title"), Some(&json!("Rent")));
    assert_eq!(h.remote.rows(EntityKind::Expense).len(), 1);
    assert!(h.adapter.queue().is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn rejected_insert_writes_once_and_queues_once() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;

    h.remote.fail_with(RemoteError::Rejected {
        code: "42501".into(),
        message: "permission denied".into(),
    });
    let expense = h.adapter.insert_expense(&family.id, &month.id, &rent()).await?;
    assert!(expense.id.is_local());
    assert_eq!(expense.title, "Rent");

    let local = h
        .adapter
        .store()
        .get_all_by_index(StoreName::Expenses, "by_month", month.id.as_str())
        .await?;
    assert_eq!(local.len(), 1);

    let queued = h.adapter.queue().all().await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].entity, EntityKind::Expense);
    assert_eq!(queued[0].action, SyncAction::Insert);
    assert_eq!(queued[0].family_id, family.id.as_str());
    assert!(h.remote.rows(EntityKind::Expense).is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_reads_fall_back_without_queueing() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;
    h.adapter.insert_expense(&family.id, &month.id, &rent()).await?;

    h.remote.fail_with(util::unavailable());
    let expenses = h.adapter.get_expenses(&family.id, &month.id).await?;
    assert_eq!(expenses.len(), 1);
    let months = h.adapter.get_months(&family.id).await?;
    assert_eq!(months.len(), 1);
    assert!(h.adapter.queue().is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn offline_device_never_calls_backend_for_cloud_family() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    let calls = h.remote.calls();

    h.online.set_online(false);
    assert_eq!(h.adapter.route(&family.id), Route::Local { queue: true });
    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;
    assert_eq!(month.id.as_str(), format!("month-{}-2025-03", family.id));
    h.adapter.insert_expense(&family.id, &month.id, &rent()).await?;
    h.adapter.get_expenses(&family.id, &month.id).await?;

    assert_eq!(h.remote.calls(), calls);
    let actions: Vec<_> = h
        .adapter
        .queue()
        .by_family(family.id.as_str())
        .await?
        .into_iter()
        .map(|item| (item.entity, item.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            (EntityKind::Month, SyncAction::Insert),
            (EntityKind::Expense, SyncAction::Insert),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_creates_offline_family() -> Result<()> {
    let h = util::harness(true).await;
    h.remote.fail_with(util::unavailable());
    let family = h.adapter.create_family("Home", false).await?;
    assert!(family.is_offline);
    assert!(family.id.is_local());
    assert!(h.adapter.queue().is_empty().await?);

    h.remote.recover();
    let families = h.adapter.get_families().await?;
    assert_eq!(families.len(), 1);
    Ok(())
}

#[tokio::test]
async fn remote_families_are_listed_alongside_local_ones() -> Result<()> {
    let h = util::harness(true).await;
    h.remote.seed(
        EntityKind::Family,
        util::row(json!({
            "id": "5f0c2a1e-1111-4c3a-9d7e-2b8f4a6c0e11",
            "name": "Shared",
            "is_offline": false,
        })),
    );
    h.adapter.create_family("Private", true).await?;

    let mut names: Vec<String> = h
        .adapter
        .get_families()
        .await?
        .into_iter()
        .map(|f| f.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Private", "Shared"]);
    Ok(())
}

#[tokio::test]
async fn template_cascade_falls_back_as_one_bulk_item() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    let template = h
        .adapter
        .insert_recurring(
            &family.id,
            &NewRecurringExpense {
                title: "Gym".into(),
                category: "health".into(),
                value: 40.0,
                ..Default::default()
            },
        )
        .await?;
    let month = h.adapter.insert_month(&family.id, 2025, 1).await?;
    assert_eq!(h.remote.rows(EntityKind::Expense).len(), 1);

    h.remote.fail_with(util::unavailable());
    let updated = h
        .adapter
        .update_recurring(
            &family.id,
            &template.id,
            &RecurringExpensePatch {
                value: Some(55.0),
                ..Default::default()
            },
            true,
        )
        .await?;
    assert_eq!(updated.value, 55.0);

    let expenses = h.adapter.get_expenses(&family.id, &month.id).await?;
    assert_eq!(expenses[0].value, 55.0);

    let queued = h.adapter.queue().all().await?;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].entity, EntityKind::RecurringExpense);
    assert_eq!(queued[1].entity, EntityKind::Expense);
    assert_eq!(queued[1].payload["op"], json!("update_where"));
    Ok(())
}

#[tokio::test]
async fn template_cascade_reaches_backend_when_online() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    let template = h
        .adapter
        .insert_recurring(
            &family.id,
            &NewRecurringExpense {
                title: "Gym".into(),
                category: "health".into(),
                value: 40.0,
                ..Default::default()
            },
        )
        .await?;
    h.adapter.insert_month(&family.id, 2025, 1).await?;
    h.adapter.insert_month(&family.id, 2025, 2).await?;

    h.adapter
        .update_recurring(
            &family.id,
            &template.id,
            &RecurringExpensePatch {
                title: Some("Gym+".into()),
                ..Default::default()
            },
            true,
        )
        .await?;
    let remote_titles: Vec<_> = h
        .remote
        .rows(EntityKind::Expense)
        .into_iter()
        .map(|row| row.get("title").cloned())
        .collect();
    assert_eq!(remote_titles, vec![Some(json!("Gym+")), Some(json!("Gym+"))]);
    assert!(h.adapter.queue().is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn apply_after_recovery_sees_queued_instance() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;
    let template = h
        .adapter
        .insert_recurring(
            &family.id,
            &NewRecurringExpense {
                title: "Gym".into(),
                category: "health".into(),
                value: 40.0,
                ..Default::default()
            },
        )
        .await?;

    h.remote.fail_with(util::unavailable());
    let first = h
        .adapter
        .apply_recurring_to_month(&family.id, &template, &month.id)
        .await?;
    assert!(matches!(first, ApplyOutcome::Applied(_)));

    h.remote.recover();
    let second = h
        .adapter
        .apply_recurring_to_month(&family.id, &template, &month.id)
        .await?;
    assert!(matches!(second, ApplyOutcome::AlreadyApplied(_)));

    let expenses = h.adapter.get_expenses(&family.id, &month.id).await?;
    assert_eq!(expenses.len(), 1);
    assert_eq!(h.adapter.queue().len().await?, 1);
    Ok(())
}

#[tokio::test]
async fn queued_template_is_materialized_into_new_month() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;

    h.remote.fail_with(util::unavailable());
    let template = h
        .adapter
        .insert_recurring(
            &family.id,
            &NewRecurringExpense {
                title: "Gym".into(),
                category: "health".into(),
                value: 40.0,
                ..Default::default()
            },
        )
        .await?;
    assert!(template.id.is_local());

    h.remote.recover();
    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;
    assert!(!month.id.is_local());

    let templates = h.adapter.get_recurring(&family.id).await?;
    assert_eq!(templates.len(), 1);
    let expenses = h.adapter.get_expenses(&family.id, &month.id).await?;
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].recurring_expense_id.as_ref(), Some(&template.id));

    // The instance waits behind its template instead of reaching the
    // backend with an id the backend has never seen.
    assert!(h.remote.rows(EntityKind::Expense).is_empty());
    let queued: Vec<_> = h
        .adapter
        .queue()
        .all()
        .await?
        .into_iter()
        .map(|item| (item.entity, item.action))
        .collect();
    assert_eq!(
        queued,
        vec![
            (EntityKind::RecurringExpense, SyncAction::Insert),
            (EntityKind::Expense, SyncAction::Insert),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn pending_local_edits_survive_remote_reads() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;
    let kept = h.adapter.insert_expense(&family.id, &month.id, &rent()).await?;
    let dropped = h
        .adapter
        .insert_expense(
            &family.id,
            &month.id,
            &NewExpense {
                title: "Cinema".into(),
                ..rent()
            },
        )
        .await?;

    h.remote.fail_with(util::unavailable());
    h.adapter
        .update_expense(
            &family.id,
            &kept.id,
            &ExpensePatch {
                value: Some(950.0),
                ..Default::default()
            },
        )
        .await?;
    h.adapter.delete_expense(&family.id, &dropped.id).await?;

    h.remote.recover();
    let expenses = h.adapter.get_expenses(&family.id, &month.id).await?;
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].id, kept.id);
    assert_eq!(expenses[0].value, 950.0);
    assert_eq!(h.remote.rows(EntityKind::Expense).len(), 2);
    Ok(())
}

#[tokio::test]
async fn malformed_backend_template_is_skipped() -> Result<()> {
    let h = util::harness(true).await;
    let family = h.adapter.create_family("Home", false).await?;
    h.remote.seed(
        EntityKind::RecurringExpense,
        util::row(json!({
            "id": "9b2e4c1a-7d3f-4e8a-b6c5-0f1e2d3c4b5a",
            "family_id": family.id.as_str(),
            "title": "Mystery",
            "category": null,
            "value": 10.0,
        })),
    );
    h.adapter
        .insert_recurring(
            &family.id,
            &NewRecurringExpense {
                title: "Gym".into(),
                category: "health".into(),
                value: 40.0,
                ..Default::default()
            },
        )
        .await?;

    let month = h.adapter.insert_month(&family.id, 2025, 3).await?;
    let expenses = h.adapter.get_expenses(&family.id, &month.id).await?;
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].title, "Gym");
    assert_eq!(h.adapter.get_months(&family.id).await?.len(), 1);
    Ok(())
}
