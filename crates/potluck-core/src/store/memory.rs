//! In-process [`PlanStore`] guarded by one mutex.
//!
//! Every operation validates against a consistent snapshot and applies all
//! of its writes under the same lock, which gives the same atomicity and
//! per-plan ordering as the Postgres store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use potluck_db::models::{
    EventStatus, MealPlan, MealPlanEvent, MealPlanGroceryListItem, MealPlanOption,
    MealPlanOptionVote, MealPlanTask, PlanStatus, TaskStatus,
};

use super::rules::{self, DecisionCheck};
use super::{
    ArchiveTarget, Ballot, EventAggregate, FinalizeReason, FinalizeResult, GroceryItemUpdate,
    NewEvent, NewOption, NewPlan, Outcome, PlanAggregate, PlanStore, PlanUpdate,
};
use crate::derivation::Derivation;
use crate::error::PlanError;
use crate::ports::{IdGenerator, UuidIdGenerator};
use crate::publisher::{Change, ChangeSet, ContextKey, EventType};

type Context = Vec<(ContextKey, Value)>;

#[derive(Debug, Default)]
struct State {
    plans: HashMap<String, MealPlan>,
    events: HashMap<String, MealPlanEvent>,
    options: HashMap<String, MealPlanOption>,
    votes: HashMap<String, MealPlanOptionVote>,
    tasks: HashMap<String, MealPlanTask>,
    grocery: HashMap<String, MealPlanGroceryListItem>,
}

impl State {
    fn plan(&self, id: &str) -> Result<&MealPlan, PlanError> {
        self.plans
            .get(id)
            .filter(|p| p.archived_at.is_none())
            .ok_or_else(|| PlanError::not_found("meal plan", id))
    }

    fn event(&self, id: &str) -> Result<&MealPlanEvent, PlanError> {
        self.events
            .get(id)
            .filter(|e| e.archived_at.is_none())
            .ok_or_else(|| PlanError::not_found("meal plan event", id))
    }

    /// A live event together with its live plan.
    fn event_and_plan(&self, event_id: &str) -> Result<(&MealPlanEvent, &MealPlan), PlanError> {
        let event = self.event(event_id)?;
        let plan = self.plan(&event.plan_id)?;
        Ok((event, plan))
    }

    fn live_events(&self, plan_id: &str) -> Vec<&MealPlanEvent> {
        let mut events: Vec<&MealPlanEvent> = self
            .events
            .values()
            .filter(|e| e.plan_id == plan_id && e.archived_at.is_none())
            .collect();
        events.sort_by(|a, b| (a.scheduled_at, &a.id).cmp(&(b.scheduled_at, &b.id)));
        events
    }

    fn live_options(&self, event_id: &str) -> Vec<MealPlanOption> {
        let mut options: Vec<MealPlanOption> = self
            .options
            .values()
            .filter(|o| o.event_id == event_id && o.archived_at.is_none())
            .cloned()
            .collect();
        options.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        options
    }

    fn live_votes(&self, event_id: &str) -> Vec<MealPlanOptionVote> {
        let mut votes: Vec<MealPlanOptionVote> = self
            .votes
            .values()
            .filter(|v| v.event_id == event_id && v.archived_at.is_none())
            .cloned()
            .collect();
        // Abstentions (no rank) sort first within a voter.
        votes.sort_by(|a, b| (&a.voter_id, a.rank, &a.id).cmp(&(&b.voter_id, b.rank, &b.id)));
        votes
    }

    fn event_aggregate(&self, event: &MealPlanEvent) -> EventAggregate {
        EventAggregate {
            event: event.clone(),
            options: self.live_options(&event.id),
            votes: self.live_votes(&event.id),
        }
    }

    fn plan_aggregate(&self, plan_id: &str) -> Result<PlanAggregate, PlanError> {
        let plan = self.plan(plan_id)?.clone();
        let events = self
            .live_events(plan_id)
            .into_iter()
            .map(|e| self.event_aggregate(e))
            .collect();
        Ok(PlanAggregate { plan, events })
    }

    /// Number the changes from the plan's counter.
    fn seal(&mut self, changes: ChangeSet) -> Vec<Change> {
        if changes.is_empty() {
            return Vec::new();
        }
        let count = changes.len() as i64;
        let first = match self.plans.get_mut(changes.plan_id()) {
            Some(plan) => {
                plan.change_sequence += count;
                plan.change_sequence - count + 1
            }
            None => 1,
        };
        changes.seal(first)
    }
}

/// A [`PlanStore`] kept entirely in memory.
pub struct MemoryPlanStore {
    state: Mutex<State>,
    ids: Arc<dyn IdGenerator>,
}

impl MemoryPlanStore {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ids,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryPlanStore {
    fn default() -> Self {
        Self::new(Arc::new(UuidIdGenerator))
    }
}

impl std::fmt::Debug for MemoryPlanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryPlanStore")
            .field("plans", &state.plans.len())
            .field("events", &state.events.len())
            .field("votes", &state.votes.len())
            .finish()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn create_plan(
        &self,
        new: &NewPlan,
        now: DateTime<Utc>,
    ) -> Result<Outcome<PlanAggregate>, PlanError> {
        rules::validate_new_plan(new, now)?;
        let ids = self.ids.as_ref();
        let plan = rules::plan_row(new, ids.new_id(), now);

        let mut changes = ChangeSet::new(&plan.id);
        changes.push(EventType::MealPlanCreated, []);

        let mut state = self.state();
        if state.plans.contains_key(&plan.id) {
            return Err(PlanError::Conflict(format!("meal plan {} exists", plan.id)));
        }
        state.plans.insert(plan.id.clone(), plan.clone());
        for new_event in &new.events {
            let (event, options) = rules::event_rows(&plan.id, new_event, ids, now);
            rules::record_event_created(&mut changes, &event, &options);
            state.events.insert(event.id.clone(), event);
            for option in options {
                state.options.insert(option.id.clone(), option);
            }
        }

        let changes = state.seal(changes);
        let aggregate = state.plan_aggregate(&plan.id)?;
        Ok(Outcome::new(aggregate, changes))
    }

    async fn get_plan(&self, plan_id: &str) -> Result<PlanAggregate, PlanError> {
        self.state().plan_aggregate(plan_id)
    }

    async fn list_plans(&self, household_id: &str) -> Result<Vec<MealPlan>, PlanError> {
        let state = self.state();
        let mut plans: Vec<MealPlan> = state
            .plans
            .values()
            .filter(|p| p.owner_household_id == household_id && p.archived_at.is_none())
            .cloned()
            .collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(plans)
    }

    async fn update_plan(
        &self,
        plan_id: &str,
        update: &PlanUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlan>, PlanError> {
        let mut state = self.state();
        rules::validate_plan_update(state.plan(plan_id)?, update, now)?;

        let plan = state
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| PlanError::not_found("meal plan", plan_id))?;
        if let Some(notes) = &update.notes {
            plan.notes = notes.clone();
        }
        if let Some(deadline) = update.voting_deadline {
            plan.voting_deadline = deadline;
        }
        plan.last_updated_at = Some(now);

        let mut changes = ChangeSet::new(plan_id);
        changes.push(EventType::MealPlanUpdated, []);
        let changes = state.seal(changes);
        Ok(Outcome::new(state.plan(plan_id)?.clone(), changes))
    }

    async fn add_event(
        &self,
        plan_id: &str,
        new: &NewEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome<EventAggregate>, PlanError> {
        rules::validate_new_event(new)?;
        let mut state = self.state();
        rules::ensure_awaiting(state.plan(plan_id)?)?;

        let (event, options) = rules::event_rows(plan_id, new, self.ids.as_ref(), now);
        let mut changes = ChangeSet::new(plan_id);
        rules::record_event_created(&mut changes, &event, &options);

        state.events.insert(event.id.clone(), event.clone());
        for option in options {
            state.options.insert(option.id.clone(), option);
        }
        let changes = state.seal(changes);
        Ok(Outcome::new(state.event_aggregate(&event), changes))
    }

    async fn get_event(&self, event_id: &str) -> Result<EventAggregate, PlanError> {
        let state = self.state();
        let (event, _) = state.event_and_plan(event_id)?;
        Ok(state.event_aggregate(event))
    }

    async fn add_option(
        &self,
        event_id: &str,
        new: &NewOption,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanOption>, PlanError> {
        rules::validate_new_option(new)?;
        let mut state = self.state();
        let (event, plan) = state.event_and_plan(event_id)?;
        rules::check_option_addition(
            plan,
            event,
            state.live_options(event_id).len(),
            state.live_votes(event_id).len(),
        )?;

        let plan_id = plan.id.clone();
        let option = rules::option_row(event_id, new, self.ids.as_ref(), now);
        let mut changes = ChangeSet::new(&plan_id);
        rules::record_option_created(&mut changes, &option);
        state.options.insert(option.id.clone(), option.clone());
        let changes = state.seal(changes);
        Ok(Outcome::new(option, changes))
    }

    async fn get_option(&self, option_id: &str) -> Result<MealPlanOption, PlanError> {
        let state = self.state();
        let option = state
            .options
            .get(option_id)
            .filter(|o| o.archived_at.is_none())
            .ok_or_else(|| PlanError::not_found("meal plan option", option_id))?;
        state.event_and_plan(&option.event_id)?;
        Ok(option.clone())
    }

    async fn cast_ballot(
        &self,
        event_id: &str,
        voter_id: &str,
        ballot: &Ballot,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Vec<MealPlanOptionVote>>, PlanError> {
        let mut state = self.state();
        let (event, plan) = state.event_and_plan(event_id)?;
        let options = state.live_options(event_id);
        let has_ballot = state.live_votes(event_id).iter().any(|v| v.voter_id == voter_id);
        rules::check_ballot(plan, event, &options, has_ballot, voter_id, ballot, now)?;

        let plan_id = plan.id.clone();
        let votes = rules::ballot_rows(event, &options, voter_id, ballot, self.ids.as_ref(), now);
        let mut changes = ChangeSet::new(&plan_id);
        rules::record_ballot_cast(&mut changes, event_id, voter_id, &votes);
        for vote in &votes {
            state.votes.insert(vote.id.clone(), vote.clone());
        }
        let changes = state.seal(changes);
        Ok(Outcome::new(votes, changes))
    }

    async fn list_votes(&self, event_id: &str) -> Result<Vec<MealPlanOptionVote>, PlanError> {
        let state = self.state();
        state.event_and_plan(event_id)?;
        Ok(state.live_votes(event_id))
    }

    async fn mark_event_decided(
        &self,
        event_id: &str,
        option_id: &str,
        tie_broken: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanEvent>, PlanError> {
        let mut state = self.state();
        let event = state.event(event_id)?;
        let plan = state
            .plans
            .get(&event.plan_id)
            .ok_or_else(|| PlanError::not_found("meal plan", &event.plan_id))?;
        let options = state.live_options(event_id);
        if rules::check_decision(plan, event, &options, option_id)? == DecisionCheck::AlreadyApplied
        {
            return Ok(Outcome::unchanged(event.clone()));
        }

        let plan_id = plan.id.clone();
        if let Some(option) = state.options.get_mut(option_id) {
            option.chosen = true;
            option.tie_broken = tie_broken;
        }
        let event = match state.events.get_mut(event_id) {
            Some(event) => {
                event.status = EventStatus::Decided;
                event.chosen_option_id = Some(option_id.to_owned());
                event.decided_at = Some(now);
                event.clone()
            }
            None => return Err(PlanError::not_found("meal plan event", event_id)),
        };

        let mut changes = ChangeSet::new(&plan_id);
        rules::record_event_decided(&mut changes, event_id, option_id, tie_broken);
        let changes = state.seal(changes);
        Ok(Outcome::new(event, changes))
    }

    async fn attempt_finalize(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<FinalizeResult>, PlanError> {
        let mut state = self.state();
        let plan = state.plan(plan_id)?;
        if plan.status == PlanStatus::Finalized {
            return Ok(Outcome::unchanged(FinalizeResult {
                finalized: true,
                reason: FinalizeReason::AlreadyFinalized,
            }));
        }

        let events = state.live_events(plan_id);
        if events.is_empty() {
            return Ok(Outcome::unchanged(FinalizeResult {
                finalized: false,
                reason: FinalizeReason::NoEvents,
            }));
        }
        let remaining = events
            .iter()
            .filter(|e| e.status != EventStatus::Decided)
            .count();
        if remaining > 0 {
            return Ok(Outcome::unchanged(FinalizeResult {
                finalized: false,
                reason: FinalizeReason::EventsUndecided { remaining },
            }));
        }

        if let Some(plan) = state.plans.get_mut(plan_id) {
            plan.status = PlanStatus::Finalized;
            plan.finalized_at = Some(now);
            plan.last_updated_at = Some(now);
        }
        let mut changes = ChangeSet::new(plan_id);
        changes.push(EventType::MealPlanFinalized, []);
        let changes = state.seal(changes);
        Ok(Outcome::new(
            FinalizeResult {
                finalized: true,
                reason: FinalizeReason::Finalized,
            },
            changes,
        ))
    }

    async fn persist_derivations(
        &self,
        plan_id: &str,
        derivation: &Derivation,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Derivation>, PlanError> {
        let mut state = self.state();
        rules::check_derivation(state.plan(plan_id)?, derivation)?;
        let duplicate = derivation
            .tasks
            .iter()
            .any(|t| state.tasks.contains_key(&t.id))
            || derivation
                .grocery_items
                .iter()
                .any(|g| state.grocery.contains_key(&g.id));
        if duplicate {
            return Err(PlanError::Conflict(format!(
                "derivation ids for meal plan {plan_id} already exist"
            )));
        }

        for task in &derivation.tasks {
            state.tasks.insert(task.id.clone(), task.clone());
        }
        for item in &derivation.grocery_items {
            state.grocery.insert(item.id.clone(), item.clone());
        }
        if let Some(plan) = state.plans.get_mut(plan_id) {
            plan.derived_at = Some(now);
            plan.last_updated_at = Some(now);
        }

        let mut changes = ChangeSet::new(plan_id);
        rules::record_derivation(&mut changes, derivation);
        let changes = state.seal(changes);
        Ok(Outcome::new(derivation.clone(), changes))
    }

    async fn archive(
        &self,
        target: &ArchiveTarget,
        now: DateTime<Utc>,
    ) -> Result<Outcome<String>, PlanError> {
        let mut state = self.state();
        let (plan_id, event_type, context): (String, EventType, Context) = match target {
            ArchiveTarget::Plan(id) => {
                state.plan(id)?;
                if let Some(plan) = state.plans.get_mut(id) {
                    plan.archived_at = Some(now);
                }
                (id.clone(), EventType::MealPlanArchived, Vec::new())
            }
            ArchiveTarget::Event(id) => {
                let (_, plan) = state.event_and_plan(id)?;
                let plan_id = plan.id.clone();
                if let Some(event) = state.events.get_mut(id) {
                    event.archived_at = Some(now);
                }
                (
                    plan_id,
                    EventType::MealPlanEventArchived,
                    vec![(ContextKey::MealPlanEventId, id.as_str().into())],
                )
            }
            ArchiveTarget::Option(id) => {
                let event_id = state
                    .options
                    .get(id)
                    .filter(|o| o.archived_at.is_none())
                    .map(|o| o.event_id.clone())
                    .ok_or_else(|| PlanError::not_found("meal plan option", id))?;
                let (event, plan) = state.event_and_plan(&event_id)?;
                rules::check_option_archival(
                    plan,
                    event,
                    state.live_options(&event_id).len(),
                    state.live_votes(&event_id).len(),
                )?;
                let plan_id = plan.id.clone();
                if let Some(option) = state.options.get_mut(id) {
                    option.archived_at = Some(now);
                }
                (
                    plan_id,
                    EventType::MealPlanOptionArchived,
                    vec![
                        (ContextKey::MealPlanEventId, event_id.as_str().into()),
                        (ContextKey::MealPlanOptionId, id.as_str().into()),
                    ],
                )
            }
            ArchiveTarget::Ballot { event_id, voter_id } => {
                let (event, plan) = state.event_and_plan(event_id)?;
                rules::ensure_awaiting(plan)?;
                rules::ensure_undecided(event)?;
                let plan_id = plan.id.clone();
                let vote_ids: Vec<String> = state
                    .live_votes(event_id)
                    .into_iter()
                    .filter(|v| v.voter_id == *voter_id)
                    .map(|v| v.id)
                    .collect();
                if vote_ids.is_empty() {
                    return Err(PlanError::not_found(
                        "ballot",
                        format!("{event_id}/{voter_id}"),
                    ));
                }
                for id in &vote_ids {
                    if let Some(vote) = state.votes.get_mut(id) {
                        vote.archived_at = Some(now);
                    }
                }
                let mut changes = ChangeSet::new(&plan_id);
                rules::record_ballot_archived(&mut changes, event_id, voter_id, &vote_ids);
                let changes = state.seal(changes);
                return Ok(Outcome::new(plan_id, changes));
            }
            ArchiveTarget::Task(id) => {
                let plan_id = state
                    .tasks
                    .get(id)
                    .filter(|t| t.archived_at.is_none())
                    .map(|t| t.plan_id.clone())
                    .ok_or_else(|| PlanError::not_found("task", id))?;
                state.plan(&plan_id)?;
                if let Some(task) = state.tasks.get_mut(id) {
                    task.archived_at = Some(now);
                }
                (
                    plan_id,
                    EventType::MealPlanTaskArchived,
                    vec![(ContextKey::MealPlanTaskId, id.as_str().into())],
                )
            }
            ArchiveTarget::GroceryItem(id) => {
                let plan_id = state
                    .grocery
                    .get(id)
                    .filter(|g| g.archived_at.is_none())
                    .map(|g| g.plan_id.clone())
                    .ok_or_else(|| PlanError::not_found("grocery list item", id))?;
                state.plan(&plan_id)?;
                if let Some(item) = state.grocery.get_mut(id) {
                    item.archived_at = Some(now);
                }
                (
                    plan_id,
                    EventType::MealPlanGroceryListItemArchived,
                    vec![(ContextKey::MealPlanGroceryListItemId, id.as_str().into())],
                )
            }
        };

        let mut changes = ChangeSet::new(&plan_id);
        changes.push(event_type, context);
        let changes = state.seal(changes);
        Ok(Outcome::new(plan_id, changes))
    }

    async fn list_expired_events(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MealPlanEvent>, PlanError> {
        let state = self.state();
        let mut expired: Vec<MealPlanEvent> = state
            .events
            .values()
            .filter(|e| e.status == EventStatus::AwaitingVotes && e.archived_at.is_none())
            .filter(|e| {
                state.plans.get(&e.plan_id).is_some_and(|p| {
                    p.status == PlanStatus::AwaitingVotes
                        && p.archived_at.is_none()
                        && p.voting_deadline <= now
                })
            })
            .cloned()
            .collect();
        expired.sort_by(|a, b| {
            (&a.plan_id, a.scheduled_at, &a.id).cmp(&(&b.plan_id, b.scheduled_at, &b.id))
        });
        Ok(expired)
    }

    async fn list_underived_plans(&self) -> Result<Vec<String>, PlanError> {
        let state = self.state();
        let mut pending: Vec<&MealPlan> = state
            .plans
            .values()
            .filter(|p| {
                p.status == PlanStatus::Finalized
                    && p.derived_at.is_none()
                    && p.archived_at.is_none()
            })
            .collect();
        pending.sort_by(|a, b| (a.finalized_at, &a.id).cmp(&(b.finalized_at, &b.id)));
        Ok(pending.into_iter().map(|p| p.id.clone()).collect())
    }

    async fn list_tasks(&self, plan_id: &str) -> Result<Vec<MealPlanTask>, PlanError> {
        let state = self.state();
        state.plan(plan_id)?;
        let mut tasks: Vec<MealPlanTask> = state
            .tasks
            .values()
            .filter(|t| t.plan_id == plan_id && t.archived_at.is_none())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            (a.cannot_complete_before, &a.id).cmp(&(b.cannot_complete_before, &b.id))
        });
        Ok(tasks)
    }

    async fn get_task(&self, task_id: &str) -> Result<MealPlanTask, PlanError> {
        let state = self.state();
        let task = state
            .tasks
            .get(task_id)
            .filter(|t| t.archived_at.is_none())
            .ok_or_else(|| PlanError::not_found("task", task_id))?;
        state.plan(&task.plan_id)?;
        Ok(task.clone())
    }

    async fn change_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        explanation: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanTask>, PlanError> {
        let mut state = self.state();
        let plan_id = state
            .tasks
            .get(task_id)
            .filter(|t| t.archived_at.is_none())
            .map(|t| t.plan_id.clone())
            .ok_or_else(|| PlanError::not_found("task", task_id))?;
        state.plan(&plan_id)?;

        let task = match state.tasks.get_mut(task_id) {
            Some(task) => {
                task.status = status;
                task.status_explanation = explanation.to_owned();
                task.completed_at = status.is_terminal().then_some(now);
                task.last_updated_at = Some(now);
                task.clone()
            }
            None => return Err(PlanError::not_found("task", task_id)),
        };

        let mut changes = ChangeSet::new(&plan_id);
        changes.push(
            EventType::MealPlanTaskStatusChanged,
            [
                (ContextKey::MealPlanTaskId, task_id.into()),
                (ContextKey::Status, status.to_string().into()),
            ],
        );
        let changes = state.seal(changes);
        Ok(Outcome::new(task, changes))
    }

    async fn list_grocery_items(
        &self,
        plan_id: &str,
    ) -> Result<Vec<MealPlanGroceryListItem>, PlanError> {
        let state = self.state();
        state.plan(plan_id)?;
        let mut items: Vec<MealPlanGroceryListItem> = state
            .grocery
            .values()
            .filter(|g| g.plan_id == plan_id && g.archived_at.is_none())
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            (&a.ingredient_id, &a.measurement_unit_id, &a.id).cmp(&(
                &b.ingredient_id,
                &b.measurement_unit_id,
                &b.id,
            ))
        });
        Ok(items)
    }

    async fn get_grocery_item(&self, item_id: &str) -> Result<MealPlanGroceryListItem, PlanError> {
        let state = self.state();
        let item = state
            .grocery
            .get(item_id)
            .filter(|g| g.archived_at.is_none())
            .ok_or_else(|| PlanError::not_found("grocery list item", item_id))?;
        state.plan(&item.plan_id)?;
        Ok(item.clone())
    }

    async fn update_grocery_item(
        &self,
        item_id: &str,
        update: &GroceryItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanGroceryListItem>, PlanError> {
        let mut state = self.state();
        let plan_id = state
            .grocery
            .get(item_id)
            .filter(|g| g.archived_at.is_none())
            .map(|g| g.plan_id.clone())
            .ok_or_else(|| PlanError::not_found("grocery list item", item_id))?;
        state.plan(&plan_id)?;

        let item = match state.grocery.get_mut(item_id) {
            Some(item) => {
                item.status = update.status;
                item.status_explanation = update.explanation.clone();
                item.purchased_upc = update.purchased_upc.clone();
                item.last_updated_at = Some(now);
                item.clone()
            }
            None => return Err(PlanError::not_found("grocery list item", item_id)),
        };

        let mut changes = ChangeSet::new(&plan_id);
        changes.push(
            EventType::MealPlanGroceryListItemUpdated,
            [
                (ContextKey::MealPlanGroceryListItemId, item_id.into()),
                (ContextKey::Status, update.status.to_string().into()),
            ],
        );
        let changes = state.seal(changes);
        Ok(Outcome::new(item, changes))
    }
}
