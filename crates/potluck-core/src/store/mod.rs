//! Plan Store: the transactional source of truth for plans, events,
//! options, votes and derived artifacts.
//!
//! Two implementations share the validation in [`rules`]:
//! [`PgPlanStore`] (Postgres, per-plan advisory locks) and
//! [`MemoryPlanStore`] (a single mutex; used by tests and dry runs).
//!
//! Every mutating operation returns an [`Outcome`]: the post-state plus the
//! numbered [`Change`]s its transaction committed. Callers publish those.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use potluck_db::models::{
    GroceryItemStatus, MealName, MealPlan, MealPlanEvent, MealPlanGroceryListItem, MealPlanOption,
    MealPlanOptionVote, MealPlanTask, TaskStatus, TieBreakPolicy,
};

use crate::derivation::Derivation;
use crate::error::PlanError;
use crate::publisher::Change;

pub mod memory;
pub mod postgres;
pub mod rules;

pub use memory::MemoryPlanStore;
pub use postgres::PgPlanStore;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub owner_household_id: String,
    pub created_by_user: String,
    #[serde(default)]
    pub notes: String,
    pub voting_deadline: DateTime<Utc>,
    pub tie_break_policy: TieBreakPolicy,
    pub events: Vec<NewEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub meal_name: MealName,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOption {
    pub meal_id: String,
    #[serde(default)]
    pub notes: String,
}

impl NewOption {
    pub fn meal(meal_id: impl Into<String>) -> Self {
        Self {
            meal_id: meal_id.into(),
            notes: String::new(),
        }
    }
}

/// One voter's complete ballot for one event.
///
/// Either ranks every live option of the event with distinct ranks
/// `1..=n`, or abstains with no ranks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(default)]
    pub ranks: Vec<RankedChoice>,
    #[serde(default)]
    pub abstain: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedChoice {
    pub option_id: String,
    pub rank: u32,
}

impl Ballot {
    pub fn ranked<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            ranks: choices
                .into_iter()
                .map(|(option_id, rank)| RankedChoice {
                    option_id: option_id.into(),
                    rank,
                })
                .collect(),
            abstain: false,
            notes: String::new(),
        }
    }

    pub fn abstain() -> Self {
        Self {
            ranks: Vec::new(),
            abstain: true,
            notes: String::new(),
        }
    }
}

/// Fields of a plan that may change while it awaits votes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdate {
    pub notes: Option<String>,
    pub voting_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroceryItemUpdate {
    pub status: GroceryItemStatus,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub purchased_upc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ArchiveTarget {
    Plan(String),
    Event(String),
    Option(String),
    /// Every vote one voter cast on one event.
    Ballot { event_id: String, voter_id: String },
    Task(String),
    GroceryItem(String),
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// A plan with its live events, their live options and live votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAggregate {
    pub plan: MealPlan,
    pub events: Vec<EventAggregate>,
}

impl PlanAggregate {
    pub fn event(&self, event_id: &str) -> Option<&EventAggregate> {
        self.events.iter().find(|e| e.event.id == event_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAggregate {
    pub event: MealPlanEvent,
    pub options: Vec<MealPlanOption>,
    pub votes: Vec<MealPlanOptionVote>,
}

impl EventAggregate {
    /// Everyone with a live ballot, abstainers included.
    pub fn voters(&self) -> BTreeSet<&str> {
        self.votes.iter().map(|v| v.voter_id.as_str()).collect()
    }

    pub fn chosen_option(&self) -> Option<&MealPlanOption> {
        let chosen = self.event.chosen_option_id.as_deref()?;
        self.options.iter().find(|o| o.id == chosen)
    }
}

/// Post-state of a mutation and the changes it committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub changes: Vec<Change>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, changes: Vec<Change>) -> Self {
        Self { value, changes }
    }

    /// A no-op: nothing committed, nothing to publish.
    pub fn unchanged(value: T) -> Self {
        Self {
            value,
            changes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeResult {
    pub finalized: bool,
    pub reason: FinalizeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    /// This call moved the plan to `finalized`.
    Finalized,
    AlreadyFinalized,
    EventsUndecided { remaining: usize },
    /// Every event has been archived.
    NoEvents,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Transactional persistence for meal plans.
///
/// Reads hide archived rows and report them as [`PlanError::NotFound`].
/// Every mutation is atomic and serialized per plan.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Create a plan, its events and their initial options.
    async fn create_plan(
        &self,
        plan: &NewPlan,
        now: DateTime<Utc>,
    ) -> Result<Outcome<PlanAggregate>, PlanError>;

    async fn get_plan(&self, plan_id: &str) -> Result<PlanAggregate, PlanError>;

    /// A household's live plans, newest first.
    async fn list_plans(&self, household_id: &str) -> Result<Vec<MealPlan>, PlanError>;

    async fn update_plan(
        &self,
        plan_id: &str,
        update: &PlanUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlan>, PlanError>;

    async fn add_event(
        &self,
        plan_id: &str,
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome<EventAggregate>, PlanError>;

    async fn get_event(&self, event_id: &str) -> Result<EventAggregate, PlanError>;

    /// Fails with `FrozenEvent` once the event has any vote.
    async fn add_option(
        &self,
        event_id: &str,
        option: &NewOption,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanOption>, PlanError>;

    async fn get_option(&self, option_id: &str) -> Result<MealPlanOption, PlanError>;

    /// Record a ballot. Eligibility requires `now < voting_deadline`.
    async fn cast_ballot(
        &self,
        event_id: &str,
        voter_id: &str,
        ballot: &Ballot,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Vec<MealPlanOptionVote>>, PlanError>;

    async fn list_votes(&self, event_id: &str) -> Result<Vec<MealPlanOptionVote>, PlanError>;

    /// Idempotent for the same option; `AlreadyDecided` for a different one.
    async fn mark_event_decided(
        &self,
        event_id: &str,
        option_id: &str,
        tie_broken: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanEvent>, PlanError>;

    async fn attempt_finalize(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<FinalizeResult>, PlanError>;

    /// Store all derivations of a finalized plan and stamp `derived_at`.
    async fn persist_derivations(
        &self,
        plan_id: &str,
        derivation: &Derivation,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Derivation>, PlanError>;

    /// Set the archive instant on the target. Returns the owning plan id.
    async fn archive(
        &self,
        target: &ArchiveTarget,
        now: DateTime<Utc>,
    ) -> Result<Outcome<String>, PlanError>;

    /// Undecided events of live, awaiting plans whose deadline is `<= now`.
    async fn list_expired_events(&self, now: DateTime<Utc>)
    -> Result<Vec<MealPlanEvent>, PlanError>;

    /// Ids of live finalized plans with no stored derivations yet.
    async fn list_underived_plans(&self) -> Result<Vec<String>, PlanError>;

    async fn list_tasks(&self, plan_id: &str) -> Result<Vec<MealPlanTask>, PlanError>;

    async fn get_task(&self, task_id: &str) -> Result<MealPlanTask, PlanError>;

    async fn change_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        explanation: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanTask>, PlanError>;

    async fn list_grocery_items(
        &self,
        plan_id: &str,
    ) -> Result<Vec<MealPlanGroceryListItem>, PlanError>;

    async fn get_grocery_item(&self, item_id: &str) -> Result<MealPlanGroceryListItem, PlanError>;

    async fn update_grocery_item(
        &self,
        item_id: &str,
        update: &GroceryItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanGroceryListItem>, PlanError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore) {}
};
