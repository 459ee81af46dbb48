//! Postgres-backed [`PlanStore`].
//!
//! Each mutation runs in one transaction that first takes the plan's
//! advisory lock, re-reads the rows it depends on, applies the shared
//! [`rules`], writes, reserves a block of change sequence numbers and
//! commits. Transient failures (serialization, deadlock, dropped
//! connections) are retried a bounded number of times.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, warn};

use potluck_db::models::{
    MealPlan, MealPlanEvent, MealPlanGroceryListItem, MealPlanOption, MealPlanOptionVote,
    MealPlanTask, PlanStatus, TaskStatus,
};
use potluck_db::queries::{events, grocery, options, plans, tasks, votes};

use super::rules::{self, DecisionCheck};
use super::{
    ArchiveTarget, Ballot, EventAggregate, FinalizeReason, FinalizeResult, GroceryItemUpdate,
    NewEvent, NewOption, NewPlan, Outcome, PlanAggregate, PlanStore, PlanUpdate,
};
use crate::derivation::Derivation;
use crate::error::PlanError;
use crate::ports::{IdGenerator, UuidIdGenerator};
use crate::publisher::{Change, ChangeSet, ContextKey, EventType};

/// A [`PlanStore`] over a Postgres pool.
#[derive(Clone)]
pub struct PgPlanStore {
    pool: PgPool,
    ids: Arc<dyn IdGenerator>,
    max_attempts: u32,
}

impl PgPlanStore {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ids: Arc::new(UuidIdGenerator),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Total attempts per operation, first try included.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn retrying<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, PlanError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlanError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && tries < self.max_attempts => {
                    warn!(op, attempt = tries, error = %err, "transient store failure, retrying");
                    tries += 1;
                }
                result => return result,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Single attempts
    // -----------------------------------------------------------------------

    async fn create_plan_once(
        &self,
        new: &NewPlan,
        now: DateTime<Utc>,
    ) -> Result<Outcome<PlanAggregate>, PlanError> {
        let ids = self.ids.as_ref();
        let plan = rules::plan_row(new, ids.new_id(), now);
        let mut changes = ChangeSet::new(&plan.id);
        changes.push(EventType::MealPlanCreated, []);

        let mut tx = self.pool.begin().await?;
        plans::insert_plan(&mut *tx, &plan).await?;
        plans::lock_plan(&mut *tx, &plan.id).await?;
        for new_event in &new.events {
            let (event, option_rows) = rules::event_rows(&plan.id, new_event, ids, now);
            events::insert_event(&mut *tx, &event).await?;
            for option in &option_rows {
                options::insert_option(&mut *tx, option).await?;
            }
            rules::record_event_created(&mut changes, &event, &option_rows);
        }
        let changes = seal(&mut tx, changes).await?;
        let aggregate = load_aggregate(&mut tx, &plan.id).await?;
        tx.commit().await?;

        debug!(plan_id = %plan.id, events = aggregate.events.len(), "meal plan created");
        Ok(Outcome::new(aggregate, changes))
    }

    async fn update_plan_once(
        &self,
        plan_id: &str,
        update: &PlanUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlan>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan = lock_live_plan(&mut tx, plan_id).await?;
        rules::validate_plan_update(&plan, update, now)?;

        let notes = update.notes.as_deref().unwrap_or(&plan.notes);
        let deadline = update.voting_deadline.unwrap_or(plan.voting_deadline);
        plans::update_plan_details(&mut *tx, plan_id, notes, deadline, now).await?;

        let mut changes = ChangeSet::new(plan_id);
        changes.push(EventType::MealPlanUpdated, []);
        let changes = seal(&mut tx, changes).await?;
        let updated = resolve(plans::get_plan(&mut *tx, plan_id).await?, "meal plan", plan_id)?;
        tx.commit().await?;
        Ok(Outcome::new(updated, changes))
    }

    async fn add_event_once(
        &self,
        plan_id: &str,
        new: &NewEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome<EventAggregate>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan = lock_live_plan(&mut tx, plan_id).await?;
        rules::ensure_awaiting(&plan)?;

        let (event, option_rows) = rules::event_rows(plan_id, new, self.ids.as_ref(), now);
        events::insert_event(&mut *tx, &event).await?;
        for option in &option_rows {
            options::insert_option(&mut *tx, option).await?;
        }
        let mut changes = ChangeSet::new(plan_id);
        rules::record_event_created(&mut changes, &event, &option_rows);
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;

        Ok(Outcome::new(
            EventAggregate {
                event,
                options: option_rows,
                votes: Vec::new(),
            },
            changes,
        ))
    }

    async fn add_option_once(
        &self,
        event_id: &str,
        new: &NewOption,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanOption>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan_id = plan_of_event(&mut tx, event_id).await?;
        let plan = lock_live_plan(&mut tx, &plan_id).await?;
        let event = rules::live_event(events::get_event(&mut *tx, event_id).await?, event_id)?;
        let live_options = options::list_live_options_for_event(&mut *tx, event_id).await?;
        let live_votes = votes::count_live_votes_for_event(&mut *tx, event_id).await?;
        rules::check_option_addition(&plan, &event, live_options.len(), live_votes as usize)?;

        let option = rules::option_row(event_id, new, self.ids.as_ref(), now);
        options::insert_option(&mut *tx, &option).await?;
        let mut changes = ChangeSet::new(&plan_id);
        rules::record_option_created(&mut changes, &option);
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(Outcome::new(option, changes))
    }

    async fn cast_ballot_once(
        &self,
        event_id: &str,
        voter_id: &str,
        ballot: &Ballot,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Vec<MealPlanOptionVote>>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan_id = plan_of_event(&mut tx, event_id).await?;
        let plan = lock_live_plan(&mut tx, &plan_id).await?;
        let event = rules::live_event(events::get_event(&mut *tx, event_id).await?, event_id)?;
        let live_options = options::list_live_options_for_event(&mut *tx, event_id).await?;
        let has_ballot = votes::voter_has_ballot(&mut *tx, event_id, voter_id).await?;
        rules::check_ballot(&plan, &event, &live_options, has_ballot, voter_id, ballot, now)?;

        let ids = self.ids.as_ref();
        let rows = rules::ballot_rows(&event, &live_options, voter_id, ballot, ids, now);
        let mut stored = Vec::with_capacity(rows.len());
        for row in &rows {
            stored.push(votes::insert_vote(&mut *tx, row).await?);
        }
        let mut changes = ChangeSet::new(&plan_id);
        rules::record_ballot_cast(&mut changes, event_id, voter_id, &stored);
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;

        debug!(%plan_id, %event_id, %voter_id, abstain = ballot.abstain, "ballot recorded");
        Ok(Outcome::new(stored, changes))
    }

    async fn mark_event_decided_once(
        &self,
        event_id: &str,
        option_id: &str,
        tie_broken: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanEvent>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan_id = plan_of_event(&mut tx, event_id).await?;
        plans::lock_plan(&mut *tx, &plan_id).await?;
        // Archived plans are reported as a state error rather than missing.
        let plan = resolve(plans::get_plan(&mut *tx, &plan_id).await?, "meal plan", &plan_id)?;
        let event = rules::live_event(events::get_event(&mut *tx, event_id).await?, event_id)?;
        let live_options = options::list_live_options_for_event(&mut *tx, event_id).await?;
        if rules::check_decision(&plan, &event, &live_options, option_id)?
            == DecisionCheck::AlreadyApplied
        {
            return Ok(Outcome::unchanged(event));
        }

        options::mark_option_chosen(&mut *tx, option_id, tie_broken).await?;
        let decided = events::mark_event_decided(&mut *tx, event_id, option_id, now)
            .await?
            .ok_or_else(|| {
                PlanError::invalid_state(format!("meal plan event {event_id} is already decided"))
            })?;
        let mut changes = ChangeSet::new(&plan_id);
        rules::record_event_decided(&mut changes, event_id, option_id, tie_broken);
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;

        debug!(%plan_id, %event_id, %option_id, tie_broken, "event decided");
        Ok(Outcome::new(decided, changes))
    }

    async fn attempt_finalize_once(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<FinalizeResult>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan = lock_live_plan(&mut tx, plan_id).await?;
        if plan.status == PlanStatus::Finalized {
            return Ok(Outcome::unchanged(FinalizeResult {
                finalized: true,
                reason: FinalizeReason::AlreadyFinalized,
            }));
        }

        let live_events = events::list_live_events_for_plan(&mut *tx, plan_id).await?;
        if live_events.is_empty() {
            return Ok(Outcome::unchanged(FinalizeResult {
                finalized: false,
                reason: FinalizeReason::NoEvents,
            }));
        }
        let remaining = events::count_live_undecided_events(&mut *tx, plan_id).await?;
        if remaining > 0 {
            return Ok(Outcome::unchanged(FinalizeResult {
                finalized: false,
                reason: FinalizeReason::EventsUndecided {
                    remaining: remaining as usize,
                },
            }));
        }

        if !plans::finalize_plan(&mut *tx, plan_id, now).await? {
            return Err(PlanError::invalid_state(format!(
                "meal plan {plan_id} could not be finalized"
            )));
        }
        let mut changes = ChangeSet::new(plan_id);
        changes.push(EventType::MealPlanFinalized, []);
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;

        debug!(%plan_id, "meal plan finalized");
        Ok(Outcome::new(
            FinalizeResult {
                finalized: true,
                reason: FinalizeReason::Finalized,
            },
            changes,
        ))
    }

    async fn persist_derivations_once(
        &self,
        plan_id: &str,
        derivation: &Derivation,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Derivation>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan = lock_live_plan(&mut tx, plan_id).await?;
        rules::check_derivation(&plan, derivation)?;

        for task in &derivation.tasks {
            tasks::insert_task(&mut *tx, task).await?;
        }
        for item in &derivation.grocery_items {
            grocery::insert_item(&mut *tx, item).await?;
        }
        if !plans::mark_plan_derived(&mut *tx, plan_id, now).await? {
            return Err(PlanError::AlreadyDerived(plan_id.to_owned()));
        }
        let mut changes = ChangeSet::new(plan_id);
        rules::record_derivation(&mut changes, derivation);
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;

        debug!(
            %plan_id,
            tasks = derivation.tasks.len(),
            grocery_items = derivation.grocery_items.len(),
            "derivations stored"
        );
        Ok(Outcome::new(derivation.clone(), changes))
    }

    async fn archive_once(
        &self,
        target: &ArchiveTarget,
        now: DateTime<Utc>,
    ) -> Result<Outcome<String>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let mut changes;
        match target {
            ArchiveTarget::Plan(id) => {
                lock_live_plan(&mut tx, id).await?;
                plans::archive_plan(&mut *tx, id, now).await?;
                changes = ChangeSet::new(id);
                changes.push(EventType::MealPlanArchived, []);
            }
            ArchiveTarget::Event(id) => {
                let plan_id = plan_of_event(&mut tx, id).await?;
                lock_live_plan(&mut tx, &plan_id).await?;
                rules::live_event(events::get_event(&mut *tx, id).await?, id)?;
                events::archive_event(&mut *tx, id, now).await?;
                changes = ChangeSet::new(&plan_id);
                changes.push(
                    EventType::MealPlanEventArchived,
                    [(ContextKey::MealPlanEventId, Value::from(id.as_str()))],
                );
            }
            ArchiveTarget::Option(id) => {
                let plan_id = plan_of_option(&mut tx, id).await?;
                let plan = lock_live_plan(&mut tx, &plan_id).await?;
                let option = rules::live_option(options::get_option(&mut *tx, id).await?, id)?;
                let event = rules::live_event(
                    events::get_event(&mut *tx, &option.event_id).await?,
                    &option.event_id,
                )?;
                let live_options =
                    options::list_live_options_for_event(&mut *tx, &event.id).await?;
                let live_votes = votes::count_live_votes_for_event(&mut *tx, &event.id).await?;
                rules::check_option_archival(
                    &plan,
                    &event,
                    live_options.len(),
                    live_votes as usize,
                )?;
                options::archive_option(&mut *tx, id, now).await?;
                changes = ChangeSet::new(&plan_id);
                changes.push(
                    EventType::MealPlanOptionArchived,
                    [
                        (ContextKey::MealPlanEventId, Value::from(event.id.as_str())),
                        (ContextKey::MealPlanOptionId, Value::from(id.as_str())),
                    ],
                );
            }
            ArchiveTarget::Ballot { event_id, voter_id } => {
                let plan_id = plan_of_event(&mut tx, event_id).await?;
                let plan = lock_live_plan(&mut tx, &plan_id).await?;
                let event =
                    rules::live_event(events::get_event(&mut *tx, event_id).await?, event_id)?;
                rules::ensure_awaiting(&plan)?;
                rules::ensure_undecided(&event)?;
                let vote_ids = votes::archive_ballot(&mut *tx, event_id, voter_id, now).await?;
                if vote_ids.is_empty() {
                    return Err(PlanError::not_found("ballot", format!("{event_id}/{voter_id}")));
                }
                changes = ChangeSet::new(&plan_id);
                rules::record_ballot_archived(&mut changes, event_id, voter_id, &vote_ids);
            }
            ArchiveTarget::Task(id) => {
                let plan_id = plan_of_task(&mut tx, id).await?;
                lock_live_plan(&mut tx, &plan_id).await?;
                let task = tasks::get_task(&mut *tx, id).await?;
                if task.is_none_or(|t| t.archived_at.is_some()) {
                    return Err(PlanError::not_found("task", id));
                }
                tasks::archive_task(&mut *tx, id, now).await?;
                changes = ChangeSet::new(&plan_id);
                changes.push(
                    EventType::MealPlanTaskArchived,
                    [(ContextKey::MealPlanTaskId, Value::from(id.as_str()))],
                );
            }
            ArchiveTarget::GroceryItem(id) => {
                let plan_id = plan_of_item(&mut tx, id).await?;
                lock_live_plan(&mut tx, &plan_id).await?;
                let item = grocery::get_item(&mut *tx, id).await?;
                if item.is_none_or(|g| g.archived_at.is_some()) {
                    return Err(PlanError::not_found("grocery list item", id));
                }
                grocery::archive_item(&mut *tx, id, now).await?;
                changes = ChangeSet::new(&plan_id);
                changes.push(
                    EventType::MealPlanGroceryListItemArchived,
                    [(ContextKey::MealPlanGroceryListItemId, Value::from(id.as_str()))],
                );
            }
        }

        let plan_id = changes.plan_id().to_owned();
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(Outcome::new(plan_id, changes))
    }

    async fn change_task_status_once(
        &self,
        task_id: &str,
        status: TaskStatus,
        explanation: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanTask>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan_id = plan_of_task(&mut tx, task_id).await?;
        lock_live_plan(&mut tx, &plan_id).await?;
        let current = tasks::get_task(&mut *tx, task_id).await?;
        if current.is_none_or(|t| t.archived_at.is_some()) {
            return Err(PlanError::not_found("task", task_id));
        }

        let task = tasks::update_task_status(&mut *tx, task_id, status, explanation, now).await?;
        let mut changes = ChangeSet::new(&plan_id);
        changes.push(
            EventType::MealPlanTaskStatusChanged,
            [
                (ContextKey::MealPlanTaskId, Value::from(task_id)),
                (ContextKey::Status, Value::from(status.to_string())),
            ],
        );
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(Outcome::new(task, changes))
    }

    async fn update_grocery_item_once(
        &self,
        item_id: &str,
        update: &GroceryItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanGroceryListItem>, PlanError> {
        let mut tx = self.pool.begin().await?;
        let plan_id = plan_of_item(&mut tx, item_id).await?;
        lock_live_plan(&mut tx, &plan_id).await?;
        let current = grocery::get_item(&mut *tx, item_id).await?;
        if current.is_none_or(|g| g.archived_at.is_some()) {
            return Err(PlanError::not_found("grocery list item", item_id));
        }

        let item = grocery::update_item(
            &mut *tx,
            item_id,
            update.status,
            &update.explanation,
            update.purchased_upc.as_deref(),
            now,
        )
        .await?;
        let mut changes = ChangeSet::new(&plan_id);
        changes.push(
            EventType::MealPlanGroceryListItemUpdated,
            [
                (ContextKey::MealPlanGroceryListItemId, Value::from(item_id)),
                (ContextKey::Status, Value::from(update.status.to_string())),
            ],
        );
        let changes = seal(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(Outcome::new(item, changes))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    async fn get_plan_once(&self, plan_id: &str) -> Result<PlanAggregate, PlanError> {
        let mut conn = self.pool.acquire().await?;
        load_aggregate(&mut conn, plan_id).await
    }

    async fn list_plans_once(&self, household_id: &str) -> Result<Vec<MealPlan>, PlanError> {
        Ok(plans::list_live_plans_for_household(&self.pool, household_id).await?)
    }

    async fn list_expired_events_once(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MealPlanEvent>, PlanError> {
        Ok(events::list_expired_events(&self.pool, now).await?)
    }

    async fn list_underived_plans_once(&self) -> Result<Vec<String>, PlanError> {
        Ok(plans::list_underived_plan_ids(&self.pool).await?)
    }

    async fn get_event_once(&self, event_id: &str) -> Result<EventAggregate, PlanError> {
        let mut conn = self.pool.acquire().await?;
        let event = rules::live_event(events::get_event(&mut *conn, event_id).await?, event_id)?;
        rules::live_plan(plans::get_plan(&mut *conn, &event.plan_id).await?, &event.plan_id)?;
        load_event(&mut conn, event).await
    }

    async fn get_option_once(&self, option_id: &str) -> Result<MealPlanOption, PlanError> {
        let mut conn = self.pool.acquire().await?;
        let option = options::get_option(&mut *conn, option_id).await?;
        let option = rules::live_option(option, option_id)?;
        let event = rules::live_event(
            events::get_event(&mut *conn, &option.event_id).await?,
            &option.event_id,
        )?;
        rules::live_plan(plans::get_plan(&mut *conn, &event.plan_id).await?, &event.plan_id)?;
        Ok(option)
    }

    async fn list_votes_once(&self, event_id: &str) -> Result<Vec<MealPlanOptionVote>, PlanError> {
        let mut conn = self.pool.acquire().await?;
        let event = rules::live_event(events::get_event(&mut *conn, event_id).await?, event_id)?;
        rules::live_plan(plans::get_plan(&mut *conn, &event.plan_id).await?, &event.plan_id)?;
        Ok(votes::list_live_votes_for_event(&mut *conn, event_id).await?)
    }

    async fn list_tasks_once(&self, plan_id: &str) -> Result<Vec<MealPlanTask>, PlanError> {
        let mut conn = self.pool.acquire().await?;
        rules::live_plan(plans::get_plan(&mut *conn, plan_id).await?, plan_id)?;
        Ok(tasks::list_live_tasks_for_plan(&mut *conn, plan_id).await?)
    }

    async fn get_task_once(&self, task_id: &str) -> Result<MealPlanTask, PlanError> {
        let mut conn = self.pool.acquire().await?;
        let task = tasks::get_task(&mut *conn, task_id)
            .await?
            .filter(|t| t.archived_at.is_none())
            .ok_or_else(|| PlanError::not_found("task", task_id))?;
        rules::live_plan(plans::get_plan(&mut *conn, &task.plan_id).await?, &task.plan_id)?;
        Ok(task)
    }

    async fn get_grocery_item_once(
        &self,
        item_id: &str,
    ) -> Result<MealPlanGroceryListItem, PlanError> {
        let mut conn = self.pool.acquire().await?;
        let item = grocery::get_item(&mut *conn, item_id)
            .await?
            .filter(|g| g.archived_at.is_none())
            .ok_or_else(|| PlanError::not_found("grocery list item", item_id))?;
        rules::live_plan(plans::get_plan(&mut *conn, &item.plan_id).await?, &item.plan_id)?;
        Ok(item)
    }

    async fn list_grocery_items_once(
        &self,
        plan_id: &str,
    ) -> Result<Vec<MealPlanGroceryListItem>, PlanError> {
        let mut conn = self.pool.acquire().await?;
        rules::live_plan(plans::get_plan(&mut *conn, plan_id).await?, plan_id)?;
        Ok(grocery::list_live_items_for_plan(&mut *conn, plan_id).await?)
    }
}

impl std::fmt::Debug for PgPlanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPlanStore")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

fn resolve<T>(found: Option<T>, entity: &'static str, id: &str) -> Result<T, PlanError> {
    found.ok_or_else(|| PlanError::not_found(entity, id))
}

async fn plan_of_event(conn: &mut PgConnection, event_id: &str) -> Result<String, PlanError> {
    let plan_id = events::plan_id_for_event(&mut *conn, event_id).await?;
    resolve(plan_id, "meal plan event", event_id)
}

async fn plan_of_option(conn: &mut PgConnection, option_id: &str) -> Result<String, PlanError> {
    let plan_id = options::plan_id_for_option(&mut *conn, option_id).await?;
    resolve(plan_id, "meal plan option", option_id)
}

async fn plan_of_task(conn: &mut PgConnection, task_id: &str) -> Result<String, PlanError> {
    let plan_id = tasks::plan_id_for_task(&mut *conn, task_id).await?;
    resolve(plan_id, "task", task_id)
}

async fn plan_of_item(conn: &mut PgConnection, item_id: &str) -> Result<String, PlanError> {
    let plan_id = grocery::plan_id_for_item(&mut *conn, item_id).await?;
    resolve(plan_id, "grocery list item", item_id)
}

/// Take the plan's advisory lock, then read it. Archived plans are missing.
async fn lock_live_plan(conn: &mut PgConnection, plan_id: &str) -> Result<MealPlan, PlanError> {
    plans::lock_plan(&mut *conn, plan_id).await?;
    rules::live_plan(plans::get_plan(&mut *conn, plan_id).await?, plan_id)
}

/// Reserve sequence numbers for the set and number it.
async fn seal(conn: &mut PgConnection, changes: ChangeSet) -> Result<Vec<Change>, PlanError> {
    if changes.is_empty() {
        return Ok(Vec::new());
    }
    let first =
        plans::reserve_change_sequence(&mut *conn, changes.plan_id(), changes.len() as i64).await?;
    Ok(changes.seal(first))
}

async fn load_event(
    conn: &mut PgConnection,
    event: MealPlanEvent,
) -> Result<EventAggregate, PlanError> {
    let live_options = options::list_live_options_for_event(&mut *conn, &event.id).await?;
    let live_votes = votes::list_live_votes_for_event(&mut *conn, &event.id).await?;
    Ok(EventAggregate {
        event,
        options: live_options,
        votes: live_votes,
    })
}

async fn load_aggregate(
    conn: &mut PgConnection,
    plan_id: &str,
) -> Result<PlanAggregate, PlanError> {
    let plan = rules::live_plan(plans::get_plan(&mut *conn, plan_id).await?, plan_id)?;
    let mut aggregates = Vec::new();
    for event in events::list_live_events_for_plan(&mut *conn, plan_id).await? {
        aggregates.push(load_event(conn, event).await?);
    }
    Ok(PlanAggregate {
        plan,
        events: aggregates,
    })
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn create_plan(
        &self,
        new: &NewPlan,
        now: DateTime<Utc>,
    ) -> Result<Outcome<PlanAggregate>, PlanError> {
        rules::validate_new_plan(new, now)?;
        self.retrying("create_plan", || self.create_plan_once(new, now))
            .await
    }

    async fn get_plan(&self, plan_id: &str) -> Result<PlanAggregate, PlanError> {
        self.retrying("get_plan", || self.get_plan_once(plan_id))
            .await
    }

    async fn list_plans(&self, household_id: &str) -> Result<Vec<MealPlan>, PlanError> {
        self.retrying("list_plans", || self.list_plans_once(household_id))
            .await
    }

    async fn update_plan(
        &self,
        plan_id: &str,
        update: &PlanUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlan>, PlanError> {
        self.retrying("update_plan", || self.update_plan_once(plan_id, update, now))
            .await
    }

    async fn add_event(
        &self,
        plan_id: &str,
        new: &NewEvent,
        now: DateTime<Utc>,
    ) -> Result<Outcome<EventAggregate>, PlanError> {
        rules::validate_new_event(new)?;
        self.retrying("add_event", || self.add_event_once(plan_id, new, now))
            .await
    }

    async fn get_event(&self, event_id: &str) -> Result<EventAggregate, PlanError> {
        self.retrying("get_event", || self.get_event_once(event_id))
            .await
    }

    async fn add_option(
        &self,
        event_id: &str,
        new: &NewOption,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanOption>, PlanError> {
        rules::validate_new_option(new)?;
        self.retrying("add_option", || self.add_option_once(event_id, new, now))
            .await
    }

    async fn get_option(&self, option_id: &str) -> Result<MealPlanOption, PlanError> {
        self.retrying("get_option", || self.get_option_once(option_id))
            .await
    }

    async fn cast_ballot(
        &self,
        event_id: &str,
        voter_id: &str,
        ballot: &Ballot,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Vec<MealPlanOptionVote>>, PlanError> {
        self.retrying("cast_ballot", || {
            self.cast_ballot_once(event_id, voter_id, ballot, now)
        })
        .await
    }

    async fn list_votes(&self, event_id: &str) -> Result<Vec<MealPlanOptionVote>, PlanError> {
        self.retrying("list_votes", || self.list_votes_once(event_id))
            .await
    }

    async fn mark_event_decided(
        &self,
        event_id: &str,
        option_id: &str,
        tie_broken: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanEvent>, PlanError> {
        self.retrying("mark_event_decided", || {
            self.mark_event_decided_once(event_id, option_id, tie_broken, now)
        })
        .await
    }

    async fn attempt_finalize(
        &self,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<FinalizeResult>, PlanError> {
        self.retrying("attempt_finalize", || self.attempt_finalize_once(plan_id, now))
            .await
    }

    async fn persist_derivations(
        &self,
        plan_id: &str,
        derivation: &Derivation,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Derivation>, PlanError> {
        self.retrying("persist_derivations", || {
            self.persist_derivations_once(plan_id, derivation, now)
        })
        .await
    }

    async fn archive(
        &self,
        target: &ArchiveTarget,
        now: DateTime<Utc>,
    ) -> Result<Outcome<String>, PlanError> {
        self.retrying("archive", || self.archive_once(target, now))
            .await
    }

    async fn list_expired_events(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MealPlanEvent>, PlanError> {
        self.retrying("list_expired_events", || self.list_expired_events_once(now))
            .await
    }

    async fn list_underived_plans(&self) -> Result<Vec<String>, PlanError> {
        self.retrying("list_underived_plans", || self.list_underived_plans_once())
            .await
    }

    async fn list_tasks(&self, plan_id: &str) -> Result<Vec<MealPlanTask>, PlanError> {
        self.retrying("list_tasks", || self.list_tasks_once(plan_id))
            .await
    }

    async fn get_task(&self, task_id: &str) -> Result<MealPlanTask, PlanError> {
        self.retrying("get_task", || self.get_task_once(task_id))
            .await
    }

    async fn change_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        explanation: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanTask>, PlanError> {
        self.retrying("change_task_status", || {
            self.change_task_status_once(task_id, status, explanation, now)
        })
        .await
    }

    async fn list_grocery_items(
        &self,
        plan_id: &str,
    ) -> Result<Vec<MealPlanGroceryListItem>, PlanError> {
        self.retrying("list_grocery_items", || self.list_grocery_items_once(plan_id))
            .await
    }

    async fn get_grocery_item(&self, item_id: &str) -> Result<MealPlanGroceryListItem, PlanError> {
        self.retrying("get_grocery_item", || self.get_grocery_item_once(item_id))
            .await
    }

    async fn update_grocery_item(
        &self,
        item_id: &str,
        update: &GroceryItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<Outcome<MealPlanGroceryListItem>, PlanError> {
        self.retrying("update_grocery_item", || {
            self.update_grocery_item_once(item_id, update, now)
        })
        .await
    }
}
