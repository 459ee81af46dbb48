//! Shared fixtures: an in-memory plan service with a fixed catalog, a manual
//! clock, a collecting change sink and a store wrapper that injects faults.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::task::JoinHandle;

use potluck_core::PlanService;
use potluck_core::context::RequestContext;
use potluck_core::derivation::{Derivation, DerivationEngine};
use potluck_core::error::PlanError;
use potluck_core::ports::{
    Clock, ManualClock, Meal, PrepWindow, Recipe, RecipeStep, StaticHouseholds, StaticRecipes,
    StaticUnits, StepIngredient,
};
use potluck_core::publisher::{ChangeMessage, CollectingSink, EventType, Publisher};
use potluck_core::store::{
    ArchiveTarget, Ballot, EventAggregate, FinalizeResult, GroceryItemUpdate, MemoryPlanStore,
    NewEvent, NewOption, NewPlan, Outcome, PlanAggregate, PlanStore, PlanUpdate,
};
use potluck_core::voting::VotingCoordinator;
use potluck_db::models::{
    MealName, MealPlan, MealPlanEvent, MealPlanGroceryListItem, MealPlanOption,
    MealPlanOptionVote, MealPlanTask, TaskStatus, TieBreakPolicy,
};

pub const HOUSEHOLD: &str = "house-1";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 3, 1, 9, 0, 0).unwrap()
}

pub fn deadline() -> DateTime<Utc> {
    t0() + Duration::days(1)
}

pub fn dinner_at(day: i64) -> DateTime<Utc> {
    t0() + Duration::days(day) + Duration::hours(9)
}

fn flour(grams: f64) -> StepIngredient {
    StepIngredient {
        ingredient_id: "flour".into(),
        unit_id: "g".into(),
        min_qty: grams,
        max_qty: None,
    }
}

fn recipe(id: &str, ingredients: Vec<StepIngredient>) -> Recipe {
    Recipe {
        id: id.into(),
        name: id.into(),
        steps: vec![
            RecipeStep {
                id: format!("{id}-prep"),
                name: "make dough".into(),
                prep_window: Some(PrepWindow {
                    min_buffer_secs: 3_600,
                    max_buffer_secs: 86_400,
                }),
                depends_on: Vec::new(),
                ingredients,
            },
            RecipeStep {
                id: format!("{id}-cook"),
                name: "bake".into(),
                prep_window: None,
                depends_on: vec![format!("{id}-prep")],
                ingredients: Vec::new(),
            },
        ],
    }
}

/// Meals `meal-x`, `meal-y` and `meal-z`, each one recipe needing 100 g of
/// flour in a step that can be prepped up to a day ahead.
pub fn catalog() -> StaticRecipes {
    let mut recipes = StaticRecipes::new();
    for name in ["x", "y", "z"] {
        recipes = recipes
            .with_meal(Meal {
                id: format!("meal-{name}"),
                name: name.to_uppercase(),
                recipe_ids: vec![format!("recipe-{name}")],
            })
            .with_recipe(recipe(&format!("recipe-{name}"), vec![flour(100.0)]));
    }
    recipes
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Faults armed on a [`FaultyStore`]. Counters are consumed one per call.
#[derive(Debug, Default)]
pub struct StoreFaults {
    /// `mark_event_decided` calls to fail with `Transient`.
    pub fail_decisions: AtomicUsize,
    /// `persist_derivations` calls to fail with `Transient`.
    pub fail_derivations: AtomicUsize,
    /// Delay before each `cast_ballot` reaches the inner store.
    pub ballot_delay_ms: AtomicU64,
}

impl StoreFaults {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A [`MemoryPlanStore`] that fails or stalls on demand.
pub struct FaultyStore {
    inner: MemoryPlanStore,
    faults: Arc<StoreFaults>,
}

#[async_trait]
impl PlanStore for FaultyStore {
    async fn create_plan(
        &self,
        plan: &NewPlan,
        now: DateTime<Utc>,
    ) -> Result<Outcome<PlanAggregate>, PlanError> {
        self.inner.create_plan(plan, now).await
    }

    async fn get_plan(&self, plan_id: &str) -> Result<PlanAggregate, PlanError> {
        self.inner.get_plan(plan_id).await
    }

    async fn list_plans(&self, household_id: &str) -> Result<Vec<MealPlan>, PlanError> {
        self.inner.list_plans(household_id).await
    }

    async fn update_plan(
        &self,
        plan_id: &str,
        update: &PlanUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlan>, PlanError> {
        self.inner.update_plan(plan_id, update, now).await
    }

    async fn add_event(
        &self,
        plan_id: &str,
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome<EventAggregate>, PlanError> {
        self.inner.add_event(plan_id, event, now).await
    }

    async fn get_event(&self, event_id: &str) -> Result<EventAggregate, PlanError> {
        self.inner.get_event(event_id).await
    }

    async fn add_option(
        &self,
        event_id: &str,
        option: &NewOption,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanOption>, PlanError> {
        self.inner.add_option(event_id, option, now).await
    }

    async fn get_option(&self, option_id: &str) -> Result<MealPlanOption, PlanError> {
        self.inner.get_option(option_id).await
    }

    async fn cast_ballot(
        &self,
        event_id: &str,
        voter_id: &str,
        ballot: &Ballot,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Vec<MealPlanOptionVote>>, PlanError> {
        let delay = self.faults.ballot_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        self.inner.cast_ballot(event_id, voter_id, ballot, now).await
    }

    async fn list_votes(&self, event_id: &str) -> Result<Vec<MealPlanOptionVote>, PlanError> {
        self.inner.list_votes(event_id).await
    }

    async fn mark_event_decided(
        &self,
        event_id: &str,
        option_id: &str,
        tie_broken: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanEvent>, PlanError> {
        if StoreFaults::take(&self.faults.fail_decisions) {
            return Err(PlanError::Transient("injected decision failure".into()));
        }
        self.inner
            .mark_event_decided(event_id, option_id, tie_broken, now)
            .await
    }

    async fn attempt_finalize(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<FinalizeResult>, PlanError> {
        self.inner.attempt_finalize(plan_id, now).await
    }

    async fn persist_derivations(
        &self,
        plan_id: &str,
        derivation: &Derivation,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Derivation>, PlanError> {
        if StoreFaults::take(&self.faults.fail_derivations) {
            return Err(PlanError::Transient("injected derivation failure".into()));
        }
        self.inner.persist_derivations(plan_id, derivation, now).await
    }

    async fn archive(
        &self,
        target: &ArchiveTarget,
        now: DateTime<Utc>,
    ) -> Result<Outcome<String>, PlanError> {
        self.inner.archive(target, now).await
    }

    async fn list_expired_events(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MealPlanEvent>, PlanError> {
        self.inner.list_expired_events(now).await
    }

    async fn list_underived_plans(&self) -> Result<Vec<String>, PlanError> {
        self.inner.list_underived_plans().await
    }

    async fn list_tasks(&self, plan_id: &str) -> Result<Vec<MealPlanTask>, PlanError> {
        self.inner.list_tasks(plan_id).await
    }

    async fn get_task(&self, task_id: &str) -> Result<MealPlanTask, PlanError> {
        self.inner.get_task(task_id).await
    }

    async fn change_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        explanation: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanTask>, PlanError> {
        self.inner
            .change_task_status(task_id, status, explanation, now)
            .await
    }

    async fn list_grocery_items(
        &self,
        plan_id: &str,
    ) -> Result<Vec<MealPlanGroceryListItem>, PlanError> {
        self.inner.list_grocery_items(plan_id).await
    }

    async fn get_grocery_item(&self, item_id: &str) -> Result<MealPlanGroceryListItem, PlanError> {
        self.inner.get_grocery_item(item_id).await
    }

    async fn update_grocery_item(
        &self,
        item_id: &str,
        update: &GroceryItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanGroceryListItem>, PlanError> {
        self.inner.update_grocery_item(item_id, update, now).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub service: PlanService,
    pub store: Arc<dyn PlanStore>,
    pub faults: Arc<StoreFaults>,
    pub clock: Arc<ManualClock>,
    pub sink: CollectingSink,
    pub publisher: Publisher,
    _dispatcher: JoinHandle<()>,
}

impl Harness {
    pub fn new(members: &[&str]) -> Self {
        Self::with_catalog(members, catalog())
    }

    pub fn with_catalog(members: &[&str], recipes: StaticRecipes) -> Self {
        let faults = Arc::new(StoreFaults::default());
        let store: Arc<dyn PlanStore> = Arc::new(FaultyStore {
            inner: MemoryPlanStore::default(),
            faults: Arc::clone(&faults),
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let sink = CollectingSink::new();
        let (publisher, dispatcher) = Publisher::spawn(vec![Arc::new(sink.clone())]);
        let households = StaticHouseholds::new().with_household(HOUSEHOLD, members.to_vec());
        let engine = DerivationEngine::new(
            Arc::new(recipes),
            Arc::new(StaticUnits::new().with_factor("kg", "g", 1000.0)),
        );
        let clock_port: Arc<dyn Clock> = clock.clone();
        let coordinator = VotingCoordinator::new(
            Arc::clone(&store),
            Arc::new(households),
            engine,
            publisher.clone(),
            clock_port,
        );
        Self {
            service: PlanService::new(coordinator),
            store,
            faults,
            clock,
            sink,
            publisher,
            _dispatcher: dispatcher,
        }
    }

    /// Open a plan owned by `owner` with one dinner event per meal list.
    pub async fn open(
        &self,
        owner: &str,
        policy: TieBreakPolicy,
        events: &[&[&str]],
    ) -> PlanAggregate {
        let plan = NewPlan {
            owner_household_id: HOUSEHOLD.into(),
            created_by_user: owner.into(),
            notes: String::new(),
            voting_deadline: deadline(),
            tie_break_policy: policy,
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
        };
        self.service
            .create_plan(&ctx(owner), &plan)
            .await
            .expect("plan should open")
    }

    pub async fn event(&self, event_id: &str) -> EventAggregate {
        self.service
            .get_event(&RequestContext::system(), event_id)
            .await
            .expect("event should exist")
    }

    /// Every message delivered so far.
    pub async fn messages(&self) -> Vec<ChangeMessage> {
        self.publisher.flush().await;
        self.sink.messages()
    }

    pub async fn count(&self, event_type: EventType) -> usize {
        self.messages()
            .await
            .iter()
            .filter(|m| m.event_type == event_type)
            .count()
    }
}

pub fn ctx(user: &str) -> RequestContext {
    RequestContext::for_user(user, HOUSEHOLD)
}

/// Option id of `meal_id` within an event.
pub fn option_for(event: &EventAggregate, meal_id: &str) -> String {
    event
        .options
        .iter()
        .find(|o| o.meal_id == meal_id)
        .map(|o| o.id.clone())
        .unwrap_or_else(|| panic!("no option for {meal_id}"))
}

/// A ballot ranking the event's options by meal id, best first.
pub fn ranking(event: &EventAggregate, meals_best_first: &[&str]) -> Ballot {
    Ballot::ranked(
        meals_best_first
            .iter()
            .enumerate()
            .map(|(i, meal)| (option_for(event, meal), i as u32 + 1)),
    )
}
