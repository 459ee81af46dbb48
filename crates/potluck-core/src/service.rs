//! PlanService: the public surface over the coordinator and store.
//!
//! Reads go straight to the store under the request deadline. Mutations go
//! through the [`VotingCoordinator`] so they hold the plan's ordering guard
//! and publish their changes.

use potluck_db::models::{
    MealPlan, MealPlanGroceryListItem, MealPlanOption, MealPlanOptionVote, MealPlanTask, TaskStatus,
};

use crate::context::RequestContext;
use crate::error::PlanError;
use crate::store::{
    ArchiveTarget, Ballot, EventAggregate, GroceryItemUpdate, NewEvent, NewOption, NewPlan,
    PlanAggregate, PlanUpdate,
};
use crate::voting::{MissingVote, SweepReport, VotingCoordinator, VotingOutcome};

#[derive(Debug, Clone)]
pub struct PlanService {
    coordinator: VotingCoordinator,
}

impl PlanService {
    pub fn new(coordinator: VotingCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &VotingCoordinator {
        &self.coordinator
    }

    // -- Plans --------------------------------------------------------------

    pub async fn create_plan(
        &self,
        ctx: &RequestContext,
        plan: &NewPlan,
    ) -> Result<PlanAggregate, PlanError> {
        self.coordinator.open_voting(ctx, plan).await
    }

    pub async fn get_plan(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<PlanAggregate, PlanError> {
        ctx.run(self.coordinator.store().get_plan(plan_id)).await
    }

    pub async fn list_plans(
        &self,
        ctx: &RequestContext,
        household_id: &str,
    ) -> Result<Vec<MealPlan>, PlanError> {
        ctx.run(self.coordinator.store().list_plans(household_id))
            .await
    }

    pub async fn update_plan(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
        update: &PlanUpdate,
    ) -> Result<MealPlan, PlanError> {
        self.coordinator
            .mutate(ctx, plan_id, |store, now| async move {
                store.update_plan(plan_id, update, now).await
            })
            .await
    }

    pub async fn archive_plan(&self, ctx: &RequestContext, plan_id: &str) -> Result<(), PlanError> {
        self.archive(ctx, ArchiveTarget::Plan(plan_id.to_owned()))
            .await
    }

    // -- Events -------------------------------------------------------------

    pub async fn add_event(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
        event: &NewEvent,
    ) -> Result<EventAggregate, PlanError> {
        self.coordinator
            .mutate(ctx, plan_id, |store, now| async move {
                store.add_event(plan_id, event, now).await
            })
            .await
    }

    pub async fn get_event(
        &self,
        ctx: &RequestContext,
        event_id: &str,
    ) -> Result<EventAggregate, PlanError> {
        ctx.run(self.coordinator.store().get_event(event_id)).await
    }

    pub async fn archive_event(
        &self,
        ctx: &RequestContext,
        event_id: &str,
    ) -> Result<(), PlanError> {
        self.archive(ctx, ArchiveTarget::Event(event_id.to_owned()))
            .await
    }

    // -- Options ------------------------------------------------------------

    pub async fn add_option(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        option: &NewOption,
    ) -> Result<MealPlanOption, PlanError> {
        self.coordinator.add_option(ctx, event_id, option).await
    }

    pub async fn get_option(
        &self,
        ctx: &RequestContext,
        option_id: &str,
    ) -> Result<MealPlanOption, PlanError> {
        ctx.run(self.coordinator.store().get_option(option_id)).await
    }

    pub async fn archive_option(
        &self,
        ctx: &RequestContext,
        option_id: &str,
    ) -> Result<(), PlanError> {
        self.archive(ctx, ArchiveTarget::Option(option_id.to_owned()))
            .await
    }

    // -- Ballots ------------------------------------------------------------

    pub async fn cast_ballot(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        voter_id: &str,
        ballot: &Ballot,
    ) -> Result<VotingOutcome, PlanError> {
        self.coordinator
            .cast_ballot(ctx, event_id, voter_id, ballot)
            .await
    }

    pub async fn list_votes(
        &self,
        ctx: &RequestContext,
        event_id: &str,
    ) -> Result<Vec<MealPlanOptionVote>, PlanError> {
        ctx.run(self.coordinator.store().list_votes(event_id)).await
    }

    pub async fn archive_ballot(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        voter_id: &str,
    ) -> Result<(), PlanError> {
        let target = ArchiveTarget::Ballot {
            event_id: event_id.to_owned(),
            voter_id: voter_id.to_owned(),
        };
        self.archive(ctx, target).await
    }

    // -- Decisions ----------------------------------------------------------

    pub async fn finalize(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<VotingOutcome, PlanError> {
        self.coordinator.finalize(ctx, plan_id).await
    }

    /// Decide an event on behalf of the acting user, who must own the plan.
    pub async fn force_decide(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        option_id: &str,
    ) -> Result<VotingOutcome, PlanError> {
        let acting_user = ctx
            .user_id
            .as_deref()
            .ok_or_else(|| PlanError::validation("forcing a decision needs an acting user"))?;
        self.coordinator
            .force_decide(ctx, event_id, option_id, acting_user)
            .await
    }

    pub async fn close_expired_events(
        &self,
        ctx: &RequestContext,
    ) -> Result<SweepReport, PlanError> {
        let now = self.coordinator.now();
        self.coordinator.close_expired_events(ctx, now).await
    }

    /// Who still owes a ballot on which undecided event.
    pub async fn missing_votes(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<Vec<MissingVote>, PlanError> {
        self.coordinator.missing_votes(ctx, plan_id).await
    }

    // -- Tasks --------------------------------------------------------------

    pub async fn list_tasks(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<Vec<MealPlanTask>, PlanError> {
        ctx.run(self.coordinator.store().list_tasks(plan_id)).await
    }

    pub async fn get_task(
        &self,
        ctx: &RequestContext,
        task_id: &str,
    ) -> Result<MealPlanTask, PlanError> {
        ctx.run(self.coordinator.store().get_task(task_id)).await
    }

    pub async fn change_task_status(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        status: TaskStatus,
        explanation: &str,
    ) -> Result<MealPlanTask, PlanError> {
        let plan_id = self.get_task(ctx, task_id).await?.plan_id;
        self.coordinator
            .mutate(ctx, &plan_id, |store, now| async move {
                store
                    .change_task_status(task_id, status, explanation, now)
                    .await
            })
            .await
    }

    pub async fn archive_task(&self, ctx: &RequestContext, task_id: &str) -> Result<(), PlanError> {
        self.archive(ctx, ArchiveTarget::Task(task_id.to_owned()))
            .await
    }

    // -- Grocery list -------------------------------------------------------

    pub async fn list_grocery_items(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<Vec<MealPlanGroceryListItem>, PlanError> {
        ctx.run(self.coordinator.store().list_grocery_items(plan_id))
            .await
    }

    pub async fn update_grocery_item(
        &self,
        ctx: &RequestContext,
        item_id: &str,
        update: &GroceryItemUpdate,
    ) -> Result<MealPlanGroceryListItem, PlanError> {
        let plan_id = ctx
            .run(self.coordinator.store().get_grocery_item(item_id))
            .await?
            .plan_id;
        self.coordinator
            .mutate(ctx, &plan_id, |store, now| async move {
                store.update_grocery_item(item_id, update, now).await
            })
            .await
    }

    pub async fn archive_grocery_item(
        &self,
        ctx: &RequestContext,
        item_id: &str,
    ) -> Result<(), PlanError> {
        self.archive(ctx, ArchiveTarget::GroceryItem(item_id.to_owned()))
            .await
    }

    async fn archive(&self, ctx: &RequestContext, target: ArchiveTarget) -> Result<(), PlanError> {
        self.coordinator.archive(ctx, &target).await.map(|_| ())
    }
}
