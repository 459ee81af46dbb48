use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use potluck_db::models::{EventStatus, MealPlan, MealPlanEvent, MealPlanOption, PlanStatus};

use super::tally::tally;
use crate::context::RequestContext;
use crate::derivation::DerivationEngine;
use crate::error::PlanError;
use crate::ports::{Clock, HouseholdMembership};
use crate::publisher::Publisher;
use crate::store::{
    ArchiveTarget, Ballot, EventAggregate, FinalizeReason, NewOption, NewPlan, Outcome,
    PlanAggregate, PlanStore,
};

/// Post-state of a coordinator operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VotingOutcome {
    pub plan_id: String,
    /// The event the operation acted on, as it is after the operation.
    pub event: Option<MealPlanEvent>,
    pub plan_status: PlanStatus,
    /// Whether this call derived tasks and grocery items.
    pub derived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub plan_id: String,
    /// Unset when the plan-level derivation retry failed.
    pub event_id: Option<String>,
    pub error: String,
}

/// What one expiry sweep did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// Event ids decided by this sweep.
    pub decided: Vec<String>,
    /// Finalized plans whose derivation this sweep completed.
    pub rederived: Vec<String>,
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.decided.is_empty() && self.rederived.is_empty() && self.failed.is_empty()
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.decided.extend(other.decided);
        self.rederived.extend(other.rederived);
        self.failed.extend(other.failed);
    }
}

/// A household member who has not voted on an undecided event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingVote {
    pub event_id: String,
    pub voter_id: String,
}

struct FinalizeStep {
    status: PlanStatus,
    derived: bool,
    derivation_error: Option<PlanError>,
}

/// Drives events from ballots to decisions and plans from decisions to
/// finalization and derivation.
///
/// Every mutation of a plan holds that plan's ordering guard from the store
/// call until its changes are queued on the publisher, so messages for one
/// plan are queued in commit order.
#[derive(Clone)]
pub struct VotingCoordinator {
    store: Arc<dyn PlanStore>,
    households: Arc<dyn HouseholdMembership>,
    engine: DerivationEngine,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for VotingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VotingCoordinator")
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

impl VotingCoordinator {
    pub fn new(
        store: Arc<dyn PlanStore>,
        households: Arc<dyn HouseholdMembership>,
        engine: DerivationEngine,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            households,
            engine,
            publisher,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run one store mutation of `plan_id` under its ordering guard and
    /// publish what it committed.
    pub async fn mutate<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
        op: F,
    ) -> Result<T, PlanError>
    where
        F: FnOnce(Arc<dyn PlanStore>, DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<Outcome<T>, PlanError>>,
    {
        let _guard = ctx.wait(self.publisher.order_guard(plan_id)).await?;
        self.commit(ctx, op(Arc::clone(&self.store), self.clock.now()))
            .await
    }

    /// Await a store call under the request deadline and queue its changes.
    async fn commit<T>(
        &self,
        ctx: &RequestContext,
        fut: impl Future<Output = Result<Outcome<T>, PlanError>>,
    ) -> Result<T, PlanError> {
        let outcome = ctx.run(fut).await?;
        self.publisher.publish(ctx, outcome.changes);
        Ok(outcome.value)
    }

    async fn members(&self, household_id: &str) -> Result<Vec<String>, PlanError> {
        self.households
            .members_of(household_id)
            .await
            .map_err(|e| PlanError::Transient(format!("household lookup failed: {e:#}")))
    }

    /// Create a plan and open its events for voting. The creator must belong
    /// to the owning household.
    pub async fn open_voting(
        &self,
        ctx: &RequestContext,
        plan: &NewPlan,
    ) -> Result<PlanAggregate, PlanError> {
        let members = self.members(&plan.owner_household_id).await?;
        if !members.contains(&plan.created_by_user) {
            return Err(PlanError::validation(format!(
                "user {} is not a member of household {}",
                plan.created_by_user, plan.owner_household_id
            )));
        }

        let aggregate = self
            .commit(ctx, self.store.create_plan(plan, self.clock.now()))
            .await?;
        info!(
            plan_id = %aggregate.plan.id,
            household_id = %aggregate.plan.owner_household_id,
            events = aggregate.events.len(),
            voting_deadline = %aggregate.plan.voting_deadline,
            "voting opened"
        );
        Ok(aggregate)
    }

    /// Add an option to an event that has no votes yet.
    pub async fn add_option(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        option: &NewOption,
    ) -> Result<MealPlanOption, PlanError> {
        let plan_id = self.plan_of_event(ctx, event_id).await?;
        self.mutate(ctx, &plan_id, |store, now| async move {
            store.add_option(event_id, option, now).await
        })
        .await
    }

    /// Record a voter's ballot. When every household member has voted or
    /// abstained the event is decided and the plan finalization attempted.
    pub async fn cast_ballot(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        voter_id: &str,
        ballot: &Ballot,
    ) -> Result<VotingOutcome, PlanError> {
        let plan_id = self.plan_of_event(ctx, event_id).await?;
        let _guard = ctx.wait(self.publisher.order_guard(&plan_id)).await?;

        let plan = ctx.run(self.store.get_plan(&plan_id)).await?.plan;
        let members = self.members(&plan.owner_household_id).await?;
        if !members.iter().any(|m| m == voter_id) {
            return Err(PlanError::validation(format!(
                "voter {voter_id} is not a member of household {}",
                plan.owner_household_id
            )));
        }

        let cast = self
            .commit(
                ctx,
                self.store
                    .cast_ballot(event_id, voter_id, ballot, self.clock.now()),
            )
            .await;
        match cast {
            Ok(votes) => {
                info!(
                    %plan_id,
                    %event_id,
                    %voter_id,
                    abstain = ballot.abstain,
                    votes = votes.len(),
                    "ballot accepted"
                );
                self.decide_on_quorum(ctx, &plan, &members, event_id).await
            }
            Err(err @ PlanError::AlreadyVoted { .. }) => {
                // The earlier attempt may have committed its ballot and then
                // failed before deciding; settle quorum before answering.
                if let Err(settle_err) =
                    self.decide_on_quorum(ctx, &plan, &members, event_id).await
                {
                    warn!(
                        %plan_id,
                        %event_id,
                        error = %settle_err,
                        "quorum check on repeated ballot failed"
                    );
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Decide `event_id` if every household member has a live ballot on it.
    async fn decide_on_quorum(
        &self,
        ctx: &RequestContext,
        plan: &MealPlan,
        members: &[String],
        event_id: &str,
    ) -> Result<VotingOutcome, PlanError> {
        let event = ctx.run(self.store.get_event(event_id)).await?;
        let voters = event.voters();
        let quorum = members.iter().all(|m| voters.contains(m.as_str()));
        if !quorum || event.event.status == EventStatus::Decided {
            return Ok(VotingOutcome {
                plan_id: plan.id.clone(),
                event: Some(event.event),
                plan_status: plan.status,
                derived: false,
            });
        }

        let result = tally(plan, &event)?;
        self.decide(ctx, plan, &event, &result.winner, result.tie_broken)
            .await
    }

    /// Household members without a ballot on each live undecided event of
    /// the plan, by event schedule then voter id.
    pub async fn missing_votes(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<Vec<MissingVote>, PlanError> {
        let aggregate = ctx.run(self.store.get_plan(plan_id)).await?;
        let mut members = self.members(&aggregate.plan.owner_household_id).await?;
        members.sort_unstable();
        members.dedup();

        let mut events: Vec<&EventAggregate> = aggregate
            .events
            .iter()
            .filter(|e| e.event.status == EventStatus::AwaitingVotes)
            .collect();
        events.sort_by(|a, b| {
            (a.event.scheduled_at, &a.event.id).cmp(&(b.event.scheduled_at, &b.event.id))
        });

        let mut missing = Vec::new();
        for event in events {
            let voters = event.voters();
            missing.extend(
                members
                    .iter()
                    .filter(|m| !voters.contains(m.as_str()))
                    .map(|m| MissingVote {
                        event_id: event.event.id.clone(),
                        voter_id: m.clone(),
                    }),
            );
        }
        Ok(missing)
    }

    /// Decide an event for `option_id` on the owner's say-so. The decision
    /// is recorded as tie-broken.
    pub async fn force_decide(
        &self,
        ctx: &RequestContext,
        event_id: &str,
        option_id: &str,
        acting_user_id: &str,
    ) -> Result<VotingOutcome, PlanError> {
        let plan_id = self.plan_of_event(ctx, event_id).await?;
        let _guard = ctx.wait(self.publisher.order_guard(&plan_id)).await?;

        let aggregate = ctx.run(self.store.get_plan(&plan_id)).await?;
        if aggregate.plan.created_by_user != acting_user_id {
            return Err(PlanError::validation(format!(
                "only the plan owner {} may force a decision",
                aggregate.plan.created_by_user
            )));
        }
        let event = aggregate
            .event(event_id)
            .ok_or_else(|| PlanError::not_found("meal plan event", event_id))?;
        self.decide(ctx, &aggregate.plan, event, option_id, true)
            .await
    }

    /// Finalize the plan if every live event is decided, deriving tasks and
    /// grocery items on the way. Re-finalizing only retries a derivation
    /// that failed earlier.
    pub async fn finalize(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<VotingOutcome, PlanError> {
        let _guard = ctx.wait(self.publisher.order_guard(plan_id)).await?;
        let step = self.finalize_step(ctx, plan_id).await?;
        if let Some(err) = step.derivation_error {
            return Err(err);
        }
        Ok(VotingOutcome {
            plan_id: plan_id.to_owned(),
            event: None,
            plan_status: step.status,
            derived: step.derived,
        })
    }

    /// Decide every undecided event of live plans whose voting deadline is
    /// at or before `now`. Failures are reported per event; the sweep goes
    /// on with the rest.
    pub async fn close_expired_events(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, PlanError> {
        let expired = ctx.run(self.store.list_expired_events(now)).await?;
        let mut report = SweepReport::default();

        for event in expired {
            match self.close_event(ctx, &event).await {
                Ok(true) => report.decided.push(event.id),
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        plan_id = %event.plan_id,
                        event_id = %event.id,
                        error = %err,
                        "failed to close expired event"
                    );
                    report.failed.push(SweepFailure {
                        plan_id: event.plan_id,
                        event_id: Some(event.id),
                        error: err.to_string(),
                    });
                }
            }
        }

        if !report.is_empty() {
            info!(
                decided = report.decided.len(),
                failed = report.failed.len(),
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Retry derivation for finalized plans that have none stored, such as
    /// plans whose derivation failed inside a ballot or sweep.
    pub async fn retry_derivations(&self, ctx: &RequestContext) -> Result<SweepReport, PlanError> {
        let pending = ctx.run(self.store.list_underived_plans()).await?;
        let mut report = SweepReport::default();

        for plan_id in pending {
            let result = async {
                let _guard = ctx.wait(self.publisher.order_guard(&plan_id)).await?;
                self.derive(ctx, &plan_id).await
            }
            .await;
            match result {
                Ok(true) => {
                    info!(%plan_id, "derivation retried");
                    report.rederived.push(plan_id);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(%plan_id, error = %err, "derivation retry failed");
                    report.failed.push(SweepFailure {
                        plan_id,
                        event_id: None,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Archive a plan or one of its parts. Archiving an event may leave
    /// every remaining event decided, so finalization is attempted after it.
    pub async fn archive(
        &self,
        ctx: &RequestContext,
        target: &ArchiveTarget,
    ) -> Result<String, PlanError> {
        let plan_id = self.plan_of_target(ctx, target).await?;
        let _guard = ctx.wait(self.publisher.order_guard(&plan_id)).await?;

        let plan_id = self
            .commit(ctx, self.store.archive(target, self.clock.now()))
            .await?;
        info!(%plan_id, ?target, "archived");

        if let ArchiveTarget::Event(_) = target {
            let step = self.finalize_step(ctx, &plan_id).await?;
            if let Some(err) = step.derivation_error {
                warn!(%plan_id, error = %err, "derivation after event archival failed");
            }
        }
        Ok(plan_id)
    }

    // -----------------------------------------------------------------------
    // Internals; callers hold the plan's ordering guard.
    // -----------------------------------------------------------------------

    async fn close_event(
        &self,
        ctx: &RequestContext,
        event: &MealPlanEvent,
    ) -> Result<bool, PlanError> {
        let _guard = ctx.wait(self.publisher.order_guard(&event.plan_id)).await?;

        let aggregate = ctx.run(self.store.get_plan(&event.plan_id)).await?;
        let Some(current) = aggregate.event(&event.id) else {
            return Ok(false);
        };
        if current.event.status == EventStatus::Decided {
            return Ok(false);
        }
        let result = tally(&aggregate.plan, current)?;
        self.decide(ctx, &aggregate.plan, current, &result.winner, result.tie_broken)
            .await?;
        Ok(true)
    }

    async fn decide(
        &self,
        ctx: &RequestContext,
        plan: &MealPlan,
        event: &EventAggregate,
        option_id: &str,
        tie_broken: bool,
    ) -> Result<VotingOutcome, PlanError> {
        let event_id = event.event.id.as_str();
        let decided = self
            .commit(
                ctx,
                self.store
                    .mark_event_decided(event_id, option_id, tie_broken, self.clock.now()),
            )
            .await?;
        info!(
            plan_id = %plan.id,
            %event_id,
            %option_id,
            tie_broken,
            "event decided"
        );

        let step = self.finalize_step(ctx, &plan.id).await?;
        if let Some(err) = step.derivation_error {
            warn!(
                plan_id = %plan.id,
                error = %err,
                "plan finalized but derivation failed; the next sweep or finalize retries it"
            );
        }
        Ok(VotingOutcome {
            plan_id: plan.id.clone(),
            event: Some(decided),
            plan_status: step.status,
            derived: step.derived,
        })
    }

    /// Attempt finalization, then derive if the plan is finalized and not
    /// yet derived. `meal_plan_finalized` is queued before any derivation
    /// message.
    async fn finalize_step(
        &self,
        ctx: &RequestContext,
        plan_id: &str,
    ) -> Result<FinalizeStep, PlanError> {
        let attempt = self
            .commit(ctx, self.store.attempt_finalize(plan_id, self.clock.now()))
            .await?;
        if !attempt.finalized {
            return Ok(FinalizeStep {
                status: PlanStatus::AwaitingVotes,
                derived: false,
                derivation_error: None,
            });
        }
        if attempt.reason == FinalizeReason::Finalized {
            info!(%plan_id, "meal plan finalized");
        }

        let derived = match self.derive(ctx, plan_id).await {
            Ok(derived) => derived,
            Err(err) => {
                return Ok(FinalizeStep {
                    status: PlanStatus::Finalized,
                    derived: false,
                    derivation_error: Some(err),
                });
            }
        };
        Ok(FinalizeStep {
            status: PlanStatus::Finalized,
            derived,
            derivation_error: None,
        })
    }

    async fn derive(&self, ctx: &RequestContext, plan_id: &str) -> Result<bool, PlanError> {
        let aggregate = ctx.run(self.store.get_plan(plan_id)).await?;
        if aggregate.plan.derived_at.is_some() {
            return Ok(false);
        }
        let now = self.clock.now();
        let derivation = ctx.run(self.engine.derive(&aggregate, now)).await?;
        match self
            .commit(ctx, self.store.persist_derivations(plan_id, &derivation, now))
            .await
        {
            Ok(stored) => {
                info!(
                    %plan_id,
                    tasks = stored.tasks.len(),
                    grocery_items = stored.grocery_items.len(),
                    "derivations stored"
                );
                Ok(true)
            }
            Err(PlanError::AlreadyDerived(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn plan_of_event(
        &self,
        ctx: &RequestContext,
        event_id: &str,
    ) -> Result<String, PlanError> {
        Ok(ctx.run(self.store.get_event(event_id)).await?.event.plan_id)
    }

    async fn plan_of_target(
        &self,
        ctx: &RequestContext,
        target: &ArchiveTarget,
    ) -> Result<String, PlanError> {
        match target {
            ArchiveTarget::Plan(id) => Ok(ctx.run(self.store.get_plan(id)).await?.plan.id),
            ArchiveTarget::Event(id) => self.plan_of_event(ctx, id).await,
            ArchiveTarget::Option(id) => {
                let option = ctx.run(self.store.get_option(id)).await?;
                self.plan_of_event(ctx, &option.event_id).await
            }
            ArchiveTarget::Ballot { event_id, .. } => self.plan_of_event(ctx, event_id).await,
            ArchiveTarget::Task(id) => Ok(ctx.run(self.store.get_task(id)).await?.plan_id),
            ArchiveTarget::GroceryItem(id) => {
                Ok(ctx.run(self.store.get_grocery_item(id)).await?.plan_id)
            }
        }
    }
}
