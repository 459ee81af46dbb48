//! The periodic expiry sweep.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{Harness, ctx, ranking};
use potluck_core::context::RequestContext;
use potluck_core::ports::StaticRecipes;
use potluck_core::publisher::EventType;
use potluck_core::sweep::{ExpirySweep, SweepConfig};
use potluck_db::models::{EventStatus, PlanStatus, TieBreakPolicy};

fn fast() -> SweepConfig {
    SweepConfig {
        interval: Duration::from_millis(20),
        pass_timeout: Some(Duration::from_secs(5)),
    }
}

#[tokio::test]
async fn run_once_ignores_open_voting() {
    let h = Harness::new(&["u1", "u2"]);
    h.open("u1", TieBreakPolicy::OwnerPicks, &[&["meal-x", "meal-y"]])
        .await;

    let sweep = ExpirySweep::new(h.service.coordinator().clone(), fast());
    let report = sweep.run_once().await;
    assert!(report.decided.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn spawned_sweep_closes_expired_events_until_cancelled() {
    let h = Harness::new(&["u1", "u2"]);
    let plan = h
        .open("u1", TieBreakPolicy::OwnerPicks, &[&["meal-x", "meal-y"]])
        .await;
    let event = plan.events[0].clone();
    h.service
        .cast_ballot(
            &ctx("u2"),
            &event.event.id,
            "u2",
            &ranking(&event, &["meal-y", "meal-x"]),
        )
        .await
        .unwrap();
    h.clock.set(common::deadline());

    let cancel = CancellationToken::new();
    let handle = ExpirySweep::new(h.service.coordinator().clone(), fast()).spawn(cancel.clone());

    let system = RequestContext::system();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = h.service.get_plan(&system, &plan.plan.id).await.unwrap();
            if current.plan.status == PlanStatus::Finalized {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sweep should finalize the plan");

    cancel.cancel();
    let decided = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sweep should stop")
        .unwrap();
    assert_eq!(decided, 1);
    assert_eq!(h.event(&event.event.id).await.event.status, EventStatus::Decided);
}

#[tokio::test]
async fn run_once_retries_derivation_that_failed_during_ballot() {
    let h = Harness::new(&["u1"]);
    let plan = h.open("u1", TieBreakPolicy::OwnerPicks, &[&["meal-x"]]).await;
    let event = plan.events[0].clone();
    let system = RequestContext::system();

    h.faults.fail_derivations.store(1, Ordering::SeqCst);
    let outcome = h
        .service
        .cast_ballot(&ctx("u1"), &event.event.id, "u1", &ranking(&event, &["meal-x"]))
        .await
        .unwrap();
    assert_eq!(outcome.plan_status, PlanStatus::Finalized);
    assert!(!outcome.derived);
    assert!(h.service.list_tasks(&system, &plan.plan.id).await.unwrap().is_empty());

    let sweep = ExpirySweep::new(h.service.coordinator().clone(), fast());
    let report = sweep.run_once().await;
    assert!(report.decided.is_empty());
    assert_eq!(report.rederived, vec![plan.plan.id.clone()]);
    assert!(report.failed.is_empty());

    let current = h.service.get_plan(&system, &plan.plan.id).await.unwrap();
    assert!(current.plan.derived_at.is_some());
    assert_eq!(h.service.list_tasks(&system, &plan.plan.id).await.unwrap().len(), 1);
    assert_eq!(h.count(EventType::MealPlanTaskCreated).await, 1);

    let again = sweep.run_once().await;
    assert!(again.is_empty());
}

#[tokio::test]
async fn run_once_reports_derivation_that_still_fails() {
    let h = Harness::with_catalog(&["u1"], StaticRecipes::new());
    let plan = h.open("u1", TieBreakPolicy::OwnerPicks, &[&["meal-x"]]).await;
    let event = plan.events[0].clone();
    h.service
        .cast_ballot(&ctx("u1"), &event.event.id, "u1", &ranking(&event, &["meal-x"]))
        .await
        .unwrap();

    let sweep = ExpirySweep::new(h.service.coordinator().clone(), fast());
    let report = sweep.run_once().await;
    assert!(report.rederived.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].plan_id, plan.plan.id);
    assert!(report.failed[0].event_id.is_none());
}
