//! PgPlanStore against a real Postgres, driven through the same service and
//! coordinator as the in-memory scenarios.

mod common;

use std::sync::Arc;

use chrono::Duration;

use common::{HOUSEHOLD, ctx, deadline, dinner_at, option_for, ranking, t0};
use potluck_core::PlanError;
use potluck_core::PlanService;
use potluck_core::context::RequestContext;
use potluck_core::derivation::DerivationEngine;
use potluck_core::ports::{Clock, ManualClock, StaticHouseholds, StaticUnits};
use potluck_core::publisher::{CollectingSink, EventType, Publisher};
use potluck_core::store::{
    ArchiveTarget, GroceryItemUpdate, NewEvent, NewOption, NewPlan, PgPlanStore, PlanStore,
    PlanUpdate,
};
use potluck_core::voting::VotingCoordinator;
use potluck_db::models::{GroceryItemStatus, MealName, PlanStatus, TaskStatus, TieBreakPolicy};
use potluck_test_utils::TestDb;

fn new_plan(owner: &str, events: &[&[&str]]) -> NewPlan {
    NewPlan {
        owner_household_id: HOUSEHOLD.into(),
        created_by_user: owner.into(),
        notes: "week of march 1".into(),
        voting_deadline: deadline(),
        tie_break_policy: TieBreakPolicy::OwnerPicks,
        events: events
            .iter()
            .enumerate()
            .map(|(day, meals)| NewEvent {
                meal_name: MealName::Dinner,
                scheduled_at: dinner_at(day as i64 + 2),
                notes: String::new(),
                options: meals.iter().map(|m| NewOption::meal(*m)).collect(),
            })
            .collect(),
    }
}

fn service(
    store: Arc<dyn PlanStore>,
    members: &[&str],
) -> (PlanService, CollectingSink, Publisher) {
    let sink = CollectingSink::new();
    let (publisher, _handle) = Publisher::spawn(vec![Arc::new(sink.clone())]);
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(t0()));
    let coordinator = VotingCoordinator::new(
        store,
        Arc::new(StaticHouseholds::new().with_household(HOUSEHOLD, members.to_vec())),
        DerivationEngine::new(Arc::new(common::catalog()), Arc::new(StaticUnits::new())),
        publisher.clone(),
        clock,
    );
    (PlanService::new(coordinator), sink, publisher)
}

#[tokio::test]
async fn create_and_read_back_plan() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());

    let created = store
        .create_plan(&new_plan("u1", &[&["meal-x", "meal-y"], &["meal-z"]]), t0())
        .await
        .unwrap();
    let kinds: Vec<EventType> = created.changes.iter().map(|c| c.event_type).collect();
    assert_eq!(kinds[0], EventType::MealPlanCreated);
    assert_eq!(created.changes.len(), 1 + 3 + 2);

    let plan_id = created.value.plan.id.clone();
    let loaded = store.get_plan(&plan_id).await.unwrap();
    assert_eq!(loaded, created.value);
    assert_eq!(loaded.plan.status, PlanStatus::AwaitingVotes);
    assert_eq!(loaded.plan.change_sequence, 6);
    assert_eq!(loaded.events.len(), 2);
    assert_eq!(loaded.events[0].options.len(), 2);

    let listed = store.list_plans(HOUSEHOLD).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, plan_id);

    db.cleanup().await;
}

#[tokio::test]
async fn update_plan_rejects_past_deadline() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());
    let plan = store
        .create_plan(&new_plan("u1", &[&["meal-x"]]), t0())
        .await
        .unwrap()
        .value;

    let update = PlanUpdate {
        notes: Some("moved".into()),
        voting_deadline: Some(deadline() + Duration::hours(6)),
    };
    let updated = store.update_plan(&plan.plan.id, &update, t0()).await.unwrap();
    assert_eq!(updated.value.notes, "moved");
    assert_eq!(updated.value.voting_deadline, deadline() + Duration::hours(6));

    let late = PlanUpdate {
        notes: None,
        voting_deadline: Some(t0() - Duration::hours(1)),
    };
    let err = store.update_plan(&plan.plan.id, &late, t0()).await.unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)), "got: {err}");

    db.cleanup().await;
}

#[tokio::test]
async fn ballot_rules_hold_in_postgres() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());
    let plan = store
        .create_plan(&new_plan("u1", &[&["meal-x", "meal-y"]]), t0())
        .await
        .unwrap()
        .value;
    let event = &plan.events[0];
    let event_id = event.event.id.as_str();
    let ballot = ranking(event, &["meal-x", "meal-y"]);

    let cast = store.cast_ballot(event_id, "u1", &ballot, t0()).await.unwrap();
    assert_eq!(cast.value.len(), 2);
    assert_eq!(cast.changes.len(), 1);

    let err = store
        .cast_ballot(event_id, "u1", &ballot, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::AlreadyVoted { .. }), "got: {err}");

    let err = store
        .add_option(event_id, &NewOption::meal("meal-z"), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::FrozenEvent(_)), "got: {err}");

    let err = store
        .cast_ballot(event_id, "u2", &ballot, deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::InvalidState(_)), "got: {err}");

    assert_eq!(store.list_votes(event_id).await.unwrap().len(), 2);

    db.cleanup().await;
}

#[tokio::test]
async fn vote_to_grocery_list_end_to_end() {
    let db = TestDb::create().await;
    let store: Arc<dyn PlanStore> = Arc::new(PgPlanStore::new(db.pool.clone()));
    let (service, sink, publisher) = service(Arc::clone(&store), &["u1"]);

    let plan = service
        .create_plan(&ctx("u1"), &new_plan("u1", &[&["meal-x"], &["meal-y"]]))
        .await
        .unwrap();
    for event in &plan.events {
        let meal = event.options[0].meal_id.clone();
        service
            .cast_ballot(&ctx("u1"), &event.event.id, "u1", &ranking(event, &[meal.as_str()]))
            .await
            .unwrap();
    }

    let system = RequestContext::system();
    let finished = service.get_plan(&system, &plan.plan.id).await.unwrap();
    assert_eq!(finished.plan.status, PlanStatus::Finalized);
    assert!(finished.plan.derived_at.is_some());

    let grocery = service
        .list_grocery_items(&system, &plan.plan.id)
        .await
        .unwrap();
    assert_eq!(grocery.len(), 1);
    assert_eq!(grocery[0].min_qty, 200.0);

    let tasks = service.list_tasks(&system, &plan.plan.id).await.unwrap();
    assert_eq!(tasks.len(), 2);

    let task = service
        .change_task_status(&ctx("u1"), &tasks[0].id, TaskStatus::Finished, "done early")
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Finished);
    assert!(task.completed_at.is_some());

    let item = service
        .update_grocery_item(
            &ctx("u1"),
            &grocery[0].id,
            &GroceryItemUpdate {
                status: GroceryItemStatus::Acquired,
                explanation: String::new(),
                purchased_upc: Some("0123456789012".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(item.status, GroceryItemStatus::Acquired);

    publisher.flush().await;
    let sequences: Vec<i64> = sink.messages().iter().map(|m| m.sequence).collect();
    let expected: Vec<i64> = (1..=sequences.len() as i64).collect();
    assert_eq!(sequences, expected);

    db.cleanup().await;
}

#[tokio::test]
async fn concurrent_final_ballots_decide_once() {
    let db = TestDb::create().await;
    let store: Arc<dyn PlanStore> = Arc::new(PgPlanStore::new(db.pool.clone()));
    let (service, sink, publisher) = service(Arc::clone(&store), &["u1", "u2"]);

    let plan = service
        .create_plan(&ctx("u1"), &new_plan("u1", &[&["meal-x", "meal-y"]]))
        .await
        .unwrap();
    let event = plan.events[0].clone();

    let first = {
        let service = service.clone();
        let event = event.clone();
        tokio::spawn(async move {
            let ballot = ranking(&event, &["meal-x", "meal-y"]);
            service
                .cast_ballot(&ctx("u1"), &event.event.id, "u1", &ballot)
                .await
        })
    };
    let second = {
        let service = service.clone();
        let event = event.clone();
        tokio::spawn(async move {
            let ballot = ranking(&event, &["meal-x", "meal-y"]);
            service
                .cast_ballot(&ctx("u2"), &event.event.id, "u2", &ballot)
                .await
        })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let decided = service
        .get_event(&RequestContext::system(), &event.event.id)
        .await
        .unwrap();
    assert_eq!(
        decided.event.chosen_option_id,
        Some(option_for(&event, "meal-x"))
    );

    publisher.flush().await;
    let messages = sink.messages();
    let decisions = messages
        .iter()
        .filter(|m| m.event_type == EventType::MealPlanEventDecided)
        .count();
    assert_eq!(decisions, 1);
    let sequences: Vec<i64> = messages.iter().map(|m| m.sequence).collect();
    let expected: Vec<i64> = (1..=sequences.len() as i64).collect();
    assert_eq!(sequences, expected);

    db.cleanup().await;
}

#[tokio::test]
async fn archived_rows_read_as_not_found() {
    let db = TestDb::create().await;
    let store = PgPlanStore::new(db.pool.clone());
    let plan = store
        .create_plan(&new_plan("u1", &[&["meal-x", "meal-y"]]), t0())
        .await
        .unwrap()
        .value;
    let event = &plan.events[0];
    let y = option_for(event, "meal-y");

    store
        .archive(&ArchiveTarget::Option(y.clone()), t0())
        .await
        .unwrap();
    let err = store.get_option(&y).await.unwrap_err();
    assert!(matches!(err, PlanError::NotFound { .. }), "got: {err}");

    let last = option_for(event, "meal-x");
    let err = store
        .archive(&ArchiveTarget::Option(last), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)), "got: {err}");

    let archived = store
        .archive(&ArchiveTarget::Plan(plan.plan.id.clone()), t0())
        .await
        .unwrap();
    assert_eq!(archived.value, plan.plan.id);
    let err = store.get_plan(&plan.plan.id).await.unwrap_err();
    assert!(matches!(err, PlanError::NotFound { .. }), "got: {err}");
    assert!(store.list_plans(HOUSEHOLD).await.unwrap().is_empty());

    db.cleanup().await;
}
