//! Plan definition files loaded the way `potluck plan create` loads them,
//! stored in a temporary Postgres database and voted on to completion.

use std::io::Write;
use std::sync::Arc;

use potluck_core::PlanService;
use potluck_core::context::RequestContext;
use potluck_core::definition::load_plan_definition;
use potluck_core::derivation::DerivationEngine;
use potluck_core::ports::{StaticHouseholds, StaticRecipes, StaticUnits, SystemClock};
use potluck_core::publisher::{CollectingSink, EventType, Publisher};
use potluck_core::store::{Ballot, PgPlanStore};
use potluck_core::voting::VotingCoordinator;
use potluck_db::models::{EventStatus, PlanStatus};
use potluck_test_utils::TestDb;

const DEFINITION: &str = r#"
[plan]
household = "house-1"
created_by = "ana"
voting_deadline = "2099-03-01T18:00:00Z"
notes = "spring week"

[[events]]
meal = "dinner"
scheduled_at = "2099-03-02T19:00:00Z"

[[events.options]]
meal_id = "lasagna"

[[events.options]]
meal_id = "tacos"
notes = "if avocados are cheap"

[[events]]
meal = "lunch"
scheduled_at = "2099-03-03T12:00:00Z"

[[events.options]]
meal_id = "soup"
"#;

fn write_definition(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write definition");
    file
}

fn service(db: &TestDb) -> (PlanService, CollectingSink, Publisher) {
    let sink = CollectingSink::new();
    let (publisher, _handle) = Publisher::spawn(vec![Arc::new(sink.clone())]);
    let coordinator = VotingCoordinator::new(
        Arc::new(PgPlanStore::new(db.pool.clone())),
        Arc::new(StaticHouseholds::new().with_household("house-1", ["ana", "ben"])),
        DerivationEngine::new(Arc::new(StaticRecipes::new()), Arc::new(StaticUnits::new())),
        publisher.clone(),
        Arc::new(SystemClock),
    );
    (PlanService::new(coordinator), sink, publisher)
}

#[tokio::test]
async fn definition_file_creates_plan_awaiting_votes() {
    let db = TestDb::create().await;
    let (service, sink, publisher) = service(&db);

    let file = write_definition(DEFINITION);
    let definition = load_plan_definition(file.path()).unwrap();
    let ctx = RequestContext::for_user("ana", "house-1");
    let created = service.create_plan(&ctx, &definition).await.unwrap();

    assert_eq!(created.plan.status, PlanStatus::AwaitingVotes);
    assert_eq!(created.plan.notes, "spring week");
    assert_eq!(created.events.len(), 2);
    assert_eq!(created.events[0].options.len(), 2);
    assert_eq!(created.events[0].options[1].notes, "if avocados are cheap");

    let listed = service.list_plans(&ctx, "house-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.plan.id);

    publisher.flush().await;
    let messages = sink.messages();
    assert_eq!(messages[0].event_type, EventType::MealPlanCreated);
    assert_eq!(messages.len(), 1 + 2 + 3);

    db.cleanup().await;
}

#[tokio::test]
async fn single_option_events_finalize_after_every_member_votes() {
    let db = TestDb::create().await;
    let (service, _sink, _publisher) = service(&db);

    let file = write_definition(DEFINITION);
    let definition = load_plan_definition(file.path()).unwrap();
    let created = service
        .create_plan(&RequestContext::for_user("ana", "house-1"), &definition)
        .await
        .unwrap();

    for event in &created.events {
        let ranks = event.options.iter().map(|o| o.id.clone()).zip(1..);
        let ballot = Ballot::ranked(ranks);
        for voter in ["ana", "ben"] {
            let ctx = RequestContext::for_user(voter, "house-1");
            service
                .cast_ballot(&ctx, &event.event.id, voter, &ballot)
                .await
                .unwrap();
        }
    }

    let plan = service
        .get_plan(&RequestContext::system(), &created.plan.id)
        .await
        .unwrap();
    assert_eq!(plan.plan.status, PlanStatus::Finalized);
    assert!(plan.events.iter().all(|e| e.event.status == EventStatus::Decided));
    let lunch = &plan.events[1];
    assert_eq!(
        lunch.event.chosen_option_id.as_deref(),
        Some(lunch.options[0].id.as_str())
    );

    db.cleanup().await;
}

#[test]
fn definition_with_event_before_deadline_is_rejected() {
    let content = DEFINITION.replace("2099-03-02T19:00:00Z", "2099-02-27T19:00:00Z");
    let file = write_definition(&content);
    let err = load_plan_definition(file.path()).unwrap_err();
    assert!(err.to_string().contains("before voting closes"), "{err}");
}
