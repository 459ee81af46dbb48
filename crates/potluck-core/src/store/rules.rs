//! Validation and row construction shared by every [`PlanStore`]
//! implementation, so both enforce identical invariants.
//!
//! [`PlanStore`]: super::PlanStore

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use potluck_db::models::{
    EventStatus, MealPlan, MealPlanEvent, MealPlanOption, MealPlanOptionVote, PlanStatus,
};

use super::{Ballot, NewEvent, NewOption, NewPlan, PlanUpdate};
use crate::derivation::Derivation;
use crate::error::PlanError;
use crate::ports::IdGenerator;
use crate::publisher::{ChangeSet, ContextKey, EventType};

/// Ranks are scored exactly over lcm(1..=n); this bound keeps that in range.
pub const MAX_OPTIONS_PER_EVENT: usize = 32;

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

pub fn validate_new_plan(plan: &NewPlan, now: DateTime<Utc>) -> Result<(), PlanError> {
    if plan.owner_household_id.trim().is_empty() {
        return Err(PlanError::validation("plan needs an owner household"));
    }
    if plan.created_by_user.trim().is_empty() {
        return Err(PlanError::validation("plan needs a creating user"));
    }
    if plan.events.is_empty() {
        return Err(PlanError::validation("plan needs at least one event"));
    }
    if plan.voting_deadline <= now {
        return Err(PlanError::validation(format!(
            "voting deadline {} is not in the future",
            plan.voting_deadline
        )));
    }
    for (i, event) in plan.events.iter().enumerate() {
        validate_new_event(event).map_err(|e| match e {
            PlanError::Validation(msg) => PlanError::Validation(format!("event {i}: {msg}")),
            other => other,
        })?;
    }
    Ok(())
}

pub fn validate_new_event(event: &NewEvent) -> Result<(), PlanError> {
    if event.options.is_empty() {
        return Err(PlanError::validation("event needs at least one option"));
    }
    if event.options.len() > MAX_OPTIONS_PER_EVENT {
        return Err(PlanError::validation(format!(
            "event has {} options; at most {MAX_OPTIONS_PER_EVENT} are allowed",
            event.options.len()
        )));
    }
    event.options.iter().try_for_each(validate_new_option)
}

pub fn validate_new_option(option: &NewOption) -> Result<(), PlanError> {
    if option.meal_id.trim().is_empty() {
        return Err(PlanError::validation("option needs a meal id"));
    }
    Ok(())
}

pub fn validate_plan_update(
    plan: &MealPlan,
    update: &PlanUpdate,
    now: DateTime<Utc>,
) -> Result<(), PlanError> {
    ensure_awaiting(plan)?;
    match update.voting_deadline {
        Some(deadline) if deadline <= now => Err(PlanError::validation(format!(
            "voting deadline {deadline} is not in the future"
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Liveness and status
// ---------------------------------------------------------------------------

pub fn live_plan(plan: Option<MealPlan>, id: &str) -> Result<MealPlan, PlanError> {
    plan.filter(|p| p.archived_at.is_none())
        .ok_or_else(|| PlanError::not_found("meal plan", id))
}

pub fn live_event(event: Option<MealPlanEvent>, id: &str) -> Result<MealPlanEvent, PlanError> {
    event
        .filter(|e| e.archived_at.is_none())
        .ok_or_else(|| PlanError::not_found("meal plan event", id))
}

pub fn live_option(option: Option<MealPlanOption>, id: &str) -> Result<MealPlanOption, PlanError> {
    option
        .filter(|o| o.archived_at.is_none())
        .ok_or_else(|| PlanError::not_found("meal plan option", id))
}

pub fn ensure_awaiting(plan: &MealPlan) -> Result<(), PlanError> {
    match plan.status {
        PlanStatus::AwaitingVotes => Ok(()),
        PlanStatus::Finalized => Err(PlanError::invalid_state(format!(
            "meal plan {} is finalized",
            plan.id
        ))),
    }
}

pub fn ensure_undecided(event: &MealPlanEvent) -> Result<(), PlanError> {
    match event.status {
        EventStatus::AwaitingVotes => Ok(()),
        EventStatus::Decided => Err(PlanError::invalid_state(format!(
            "meal plan event {} is already decided",
            event.id
        ))),
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

pub fn check_option_addition(
    plan: &MealPlan,
    event: &MealPlanEvent,
    live_options: usize,
    live_votes: usize,
) -> Result<(), PlanError> {
    ensure_awaiting(plan)?;
    ensure_undecided(event)?;
    if live_votes > 0 {
        return Err(PlanError::FrozenEvent(event.id.clone()));
    }
    if live_options >= MAX_OPTIONS_PER_EVENT {
        return Err(PlanError::validation(format!(
            "event {} already has {MAX_OPTIONS_PER_EVENT} options",
            event.id
        )));
    }
    Ok(())
}

pub fn check_option_archival(
    plan: &MealPlan,
    event: &MealPlanEvent,
    live_options: usize,
    live_votes: usize,
) -> Result<(), PlanError> {
    ensure_awaiting(plan)?;
    ensure_undecided(event)?;
    if live_votes > 0 {
        return Err(PlanError::FrozenEvent(event.id.clone()));
    }
    if live_options <= 1 {
        return Err(PlanError::validation(format!(
            "cannot archive the last option of event {}",
            event.id
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Ballots
// ---------------------------------------------------------------------------

/// Authoritative ballot check. `options` are the event's live options.
///
/// A voter who already holds a ballot always gets `AlreadyVoted`, even once
/// the event is decided or voting has closed, so a retried ballot reads the
/// same as the first attempt's success.
#[allow(clippy::too_many_arguments)]
pub fn check_ballot(
    plan: &MealPlan,
    event: &MealPlanEvent,
    options: &[MealPlanOption],
    voter_has_ballot: bool,
    voter_id: &str,
    ballot: &Ballot,
    now: DateTime<Utc>,
) -> Result<(), PlanError> {
    if voter_id.trim().is_empty() {
        return Err(PlanError::validation("ballot needs a voter"));
    }
    if voter_has_ballot {
        return Err(PlanError::AlreadyVoted {
            event_id: event.id.clone(),
            voter_id: voter_id.to_owned(),
        });
    }
    ensure_awaiting(plan)?;
    ensure_undecided(event)?;
    if now >= plan.voting_deadline {
        return Err(PlanError::invalid_state(format!(
            "voting on meal plan {} closed at {}",
            plan.id, plan.voting_deadline
        )));
    }
    check_ballot_shape(event, options, ballot)
}

fn check_ballot_shape(
    event: &MealPlanEvent,
    options: &[MealPlanOption],
    ballot: &Ballot,
) -> Result<(), PlanError> {
    if ballot.abstain {
        if !ballot.ranks.is_empty() {
            return Err(PlanError::IncompleteBallot(
                "an abstention cannot rank options".to_owned(),
            ));
        }
        return Ok(());
    }

    let option_ids: HashSet<&str> = options.iter().map(|o| o.id.as_str()).collect();
    let n = options.len();
    let mut ranked_options = HashSet::new();
    let mut used_ranks = HashSet::new();

    for choice in &ballot.ranks {
        if !option_ids.contains(choice.option_id.as_str()) {
            return Err(PlanError::UnknownOption {
                event_id: event.id.clone(),
                option_id: choice.option_id.clone(),
            });
        }
        if !ranked_options.insert(choice.option_id.as_str()) {
            return Err(PlanError::validation(format!(
                "option {} is ranked twice",
                choice.option_id
            )));
        }
        if choice.rank == 0 || choice.rank as usize > n {
            return Err(PlanError::validation(format!(
                "rank {} is outside 1..={n}",
                choice.rank
            )));
        }
        if !used_ranks.insert(choice.rank) {
            return Err(PlanError::validation(format!(
                "rank {} is used twice",
                choice.rank
            )));
        }
    }

    if ranked_options.len() < n {
        let mut missing: Vec<&str> = options
            .iter()
            .map(|o| o.id.as_str())
            .filter(|id| !ranked_options.contains(id))
            .collect();
        missing.sort_unstable();
        return Err(PlanError::IncompleteBallot(format!(
            "options not ranked: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Vote rows for a checked ballot. An abstention becomes a single unranked
/// row on the event's first option.
pub fn ballot_rows(
    event: &MealPlanEvent,
    options: &[MealPlanOption],
    voter_id: &str,
    ballot: &Ballot,
    ids: &dyn IdGenerator,
    now: DateTime<Utc>,
) -> Vec<MealPlanOptionVote> {
    let row = |option_id: &str, rank: Option<i32>| MealPlanOptionVote {
        id: ids.new_id(),
        option_id: option_id.to_owned(),
        event_id: event.id.clone(),
        voter_id: voter_id.to_owned(),
        rank,
        abstain: rank.is_none(),
        notes: ballot.notes.clone(),
        created_at: now,
        archived_at: None,
    };

    if ballot.abstain {
        return first_option(options)
            .map(|o| vec![row(&o.id, None)])
            .unwrap_or_default();
    }

    let mut ranks = ballot.ranks.clone();
    ranks.sort_by_key(|c| c.rank);
    ranks
        .iter()
        .map(|c| row(&c.option_id, Some(c.rank as i32)))
        .collect()
}

fn first_option(options: &[MealPlanOption]) -> Option<&MealPlanOption> {
    options
        .iter()
        .min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
}

// ---------------------------------------------------------------------------
// Decisions and finalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionCheck {
    Apply,
    AlreadyApplied,
}

pub fn check_decision(
    plan: &MealPlan,
    event: &MealPlanEvent,
    options: &[MealPlanOption],
    option_id: &str,
) -> Result<DecisionCheck, PlanError> {
    if plan.archived_at.is_some() {
        return Err(PlanError::invalid_state(format!(
            "meal plan {} is archived",
            plan.id
        )));
    }
    if !options.iter().any(|o| o.id == option_id) {
        return Err(PlanError::UnknownOption {
            event_id: event.id.clone(),
            option_id: option_id.to_owned(),
        });
    }
    match (&event.status, event.chosen_option_id.as_deref()) {
        (EventStatus::Decided, Some(chosen)) if chosen == option_id => {
            Ok(DecisionCheck::AlreadyApplied)
        }
        (EventStatus::Decided, chosen) => Err(PlanError::AlreadyDecided {
            event_id: event.id.clone(),
            chosen_option_id: chosen.unwrap_or_default().to_owned(),
        }),
        (EventStatus::AwaitingVotes, _) => {
            ensure_awaiting(plan)?;
            Ok(DecisionCheck::Apply)
        }
    }
}

pub fn check_derivation(plan: &MealPlan, derivation: &Derivation) -> Result<(), PlanError> {
    if plan.status != PlanStatus::Finalized {
        return Err(PlanError::invalid_state(format!(
            "meal plan {} is not finalized",
            plan.id
        )));
    }
    if plan.derived_at.is_some() {
        return Err(PlanError::AlreadyDerived(plan.id.clone()));
    }
    let foreign = derivation
        .tasks
        .iter()
        .map(|t| &t.plan_id)
        .chain(derivation.grocery_items.iter().map(|g| &g.plan_id))
        .any(|id| *id != plan.id);
    if foreign {
        return Err(PlanError::validation(format!(
            "derivation contains rows for a plan other than {}",
            plan.id
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row construction
// ---------------------------------------------------------------------------

pub fn plan_row(plan: &NewPlan, id: String, now: DateTime<Utc>) -> MealPlan {
    MealPlan {
        id,
        owner_household_id: plan.owner_household_id.clone(),
        created_by_user: plan.created_by_user.clone(),
        notes: plan.notes.clone(),
        status: PlanStatus::AwaitingVotes,
        voting_deadline: plan.voting_deadline,
        tie_break_policy: plan.tie_break_policy,
        change_sequence: 0,
        created_at: now,
        last_updated_at: None,
        finalized_at: None,
        derived_at: None,
        archived_at: None,
    }
}

/// Rows for a new event and its options. Options get strictly increasing
/// creation instants so their listing order matches input order.
pub fn event_rows(
    plan_id: &str,
    event: &NewEvent,
    ids: &dyn IdGenerator,
    now: DateTime<Utc>,
) -> (MealPlanEvent, Vec<MealPlanOption>) {
    let row = MealPlanEvent {
        id: ids.new_id(),
        plan_id: plan_id.to_owned(),
        meal_name: event.meal_name,
        scheduled_at: event.scheduled_at,
        notes: event.notes.clone(),
        status: EventStatus::AwaitingVotes,
        chosen_option_id: None,
        created_at: now,
        decided_at: None,
        archived_at: None,
    };
    let options = event
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| option_row(&row.id, o, ids, now + chrono::Duration::microseconds(i as i64)))
        .collect();
    (row, options)
}

pub fn option_row(
    event_id: &str,
    option: &NewOption,
    ids: &dyn IdGenerator,
    now: DateTime<Utc>,
) -> MealPlanOption {
    MealPlanOption {
        id: ids.new_id(),
        event_id: event_id.to_owned(),
        meal_id: option.meal_id.clone(),
        notes: option.notes.clone(),
        chosen: false,
        tie_broken: false,
        created_at: now,
        archived_at: None,
    }
}

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

fn id(value: &str) -> Value {
    Value::from(value)
}

pub fn record_event_created(
    changes: &mut ChangeSet,
    event: &MealPlanEvent,
    options: &[MealPlanOption],
) {
    changes.push(
        EventType::MealPlanEventCreated,
        [(ContextKey::MealPlanEventId, id(&event.id))],
    );
    for option in options {
        record_option_created(changes, option);
    }
}

pub fn record_option_created(changes: &mut ChangeSet, option: &MealPlanOption) {
    changes.push(
        EventType::MealPlanOptionCreated,
        [
            (ContextKey::MealPlanEventId, id(&option.event_id)),
            (ContextKey::MealPlanOptionId, id(&option.id)),
        ],
    );
}

/// One message per ballot, listing every vote row.
pub fn record_ballot_cast(
    changes: &mut ChangeSet,
    event_id: &str,
    voter_id: &str,
    votes: &[MealPlanOptionVote],
) {
    let abstained = votes.iter().any(|v| v.abstain);
    changes.push(
        EventType::MealPlanOptionVoteCreated,
        [
            (ContextKey::MealPlanEventId, id(event_id)),
            (ContextKey::VoterId, id(voter_id)),
            (
                ContextKey::MealPlanOptionVoteIds,
                Value::from(votes.iter().map(|v| v.id.clone()).collect::<Vec<_>>()),
            ),
            (ContextKey::Abstained, Value::from(abstained)),
        ],
    );
}

pub fn record_ballot_archived(
    changes: &mut ChangeSet,
    event_id: &str,
    voter_id: &str,
    vote_ids: &[String],
) {
    changes.push(
        EventType::MealPlanOptionVoteArchived,
        [
            (ContextKey::MealPlanEventId, id(event_id)),
            (ContextKey::VoterId, id(voter_id)),
            (ContextKey::MealPlanOptionVoteIds, Value::from(vote_ids.to_vec())),
        ],
    );
}

pub fn record_event_decided(
    changes: &mut ChangeSet,
    event_id: &str,
    option_id: &str,
    tie_broken: bool,
) {
    changes.push(
        EventType::MealPlanEventDecided,
        [
            (ContextKey::MealPlanEventId, id(event_id)),
            (ContextKey::MealPlanOptionId, id(option_id)),
            (ContextKey::TieBroken, Value::from(tie_broken)),
        ],
    );
}

/// Task messages first, then grocery items, each in derivation order.
pub fn record_derivation(changes: &mut ChangeSet, derivation: &Derivation) {
    for task in &derivation.tasks {
        changes.push(
            EventType::MealPlanTaskCreated,
            [
                (ContextKey::MealPlanEventId, id(&task.event_id)),
                (ContextKey::MealPlanTaskId, id(&task.id)),
            ],
        );
    }
    for item in &derivation.grocery_items {
        changes.push(
            EventType::MealPlanGroceryListItemCreated,
            [(ContextKey::MealPlanGroceryListItemId, id(&item.id))],
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use potluck_db::models::{MealName, TieBreakPolicy};

    use super::*;
    use crate::ports::SeededIdGenerator;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 1, 9, 0, 0).unwrap()
    }

    fn new_plan() -> NewPlan {
        NewPlan {
            owner_household_id: "h1".into(),
            created_by_user: "u1".into(),
            notes: String::new(),
            voting_deadline: now() + Duration::hours(12),
            tie_break_policy: TieBreakPolicy::OwnerPicks,
            events: vec![NewEvent {
                meal_name: MealName::Dinner,
                scheduled_at: now() + Duration::days(2),
                notes: String::new(),
                options: vec![NewOption::meal("m-x"), NewOption::meal("m-y")],
            }],
        }
    }

    fn rows() -> (MealPlan, MealPlanEvent, Vec<MealPlanOption>) {
        let ids = SeededIdGenerator::new("rules");
        let new = new_plan();
        let plan = plan_row(&new, ids.new_id(), now());
        let (event, options) = event_rows(&plan.id, &new.events[0], &ids, now());
        (plan, event, options)
    }

    #[test]
    fn plan_needs_events_and_future_deadline() {
        assert!(validate_new_plan(&new_plan(), now()).is_ok());

        let mut no_events = new_plan();
        no_events.events.clear();
        assert!(matches!(
            validate_new_plan(&no_events, now()),
            Err(PlanError::Validation(_))
        ));

        let mut past = new_plan();
        past.voting_deadline = now();
        assert!(matches!(
            validate_new_plan(&past, now()),
            Err(PlanError::Validation(_))
        ));
    }

    #[test]
    fn event_needs_an_option_with_a_meal() {
        let mut plan = new_plan();
        plan.events[0].options.clear();
        let err = validate_new_plan(&plan, now()).unwrap_err();
        assert!(err.to_string().contains("event 0"));

        let mut blank = new_plan();
        blank.events[0].options[0].meal_id = " ".into();
        assert!(validate_new_plan(&blank, now()).is_err());
    }

    #[test]
    fn options_keep_input_order() {
        let (_, _, options) = rows();
        assert!(options[0].created_at < options[1].created_at);
        assert_eq!(options[0].meal_id, "m-x");
    }

    #[test]
    fn complete_ballot_accepted() {
        let (plan, event, options) = rows();
        let ballot = Ballot::ranked([(options[0].id.clone(), 1), (options[1].id.clone(), 2)]);
        assert!(check_ballot(&plan, &event, &options, false, "u1", &ballot, now()).is_ok());
    }

    #[test]
    fn ballot_at_deadline_rejected() {
        let (plan, event, options) = rows();
        let ballot = Ballot::abstain();
        let err = check_ballot(
            &plan,
            &event,
            &options,
            false,
            "u1",
            &ballot,
            plan.voting_deadline,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidState(_)));
    }

    #[test]
    fn repeat_ballot_is_already_voted_before_shape() {
        let (plan, event, options) = rows();
        let bogus = Ballot::ranked([("nope", 1)]);
        let err = check_ballot(&plan, &event, &options, true, "u1", &bogus, now()).unwrap_err();
        assert!(matches!(err, PlanError::AlreadyVoted { .. }));
    }

    #[test]
    fn repeat_ballot_is_already_voted_after_close() {
        let (mut plan, mut event, options) = rows();
        let ballot = Ballot::abstain();
        let after = plan.voting_deadline + Duration::minutes(1);
        let err = check_ballot(&plan, &event, &options, true, "u1", &ballot, after).unwrap_err();
        assert!(matches!(err, PlanError::AlreadyVoted { .. }));

        plan.status = PlanStatus::Finalized;
        event.status = EventStatus::Decided;
        let err = check_ballot(&plan, &event, &options, true, "u1", &ballot, now()).unwrap_err();
        assert!(matches!(err, PlanError::AlreadyVoted { .. }));

        let err = check_ballot(&plan, &event, &options, false, "u2", &ballot, now()).unwrap_err();
        assert!(matches!(err, PlanError::InvalidState(_)));
    }

    #[test]
    fn ballot_shape_errors() {
        let (plan, event, options) = rows();
        let x = options[0].id.clone();
        let y = options[1].id.clone();
        let check = |b: Ballot| check_ballot(&plan, &event, &options, false, "u1", &b, now());

        assert!(matches!(
            check(Ballot::ranked([("zzz", 1)])),
            Err(PlanError::UnknownOption { .. })
        ));
        assert!(matches!(
            check(Ballot::ranked([(x.clone(), 1)])),
            Err(PlanError::IncompleteBallot(_))
        ));
        assert!(matches!(
            check(Ballot::ranked([(x.clone(), 1), (y.clone(), 1)])),
            Err(PlanError::Validation(_))
        ));
        assert!(matches!(
            check(Ballot::ranked([(x.clone(), 1), (y.clone(), 3)])),
            Err(PlanError::Validation(_))
        ));
        assert!(matches!(
            check(Ballot::ranked([(x.clone(), 1), (x.clone(), 2)])),
            Err(PlanError::Validation(_))
        ));

        let mut abstain_with_ranks = Ballot::ranked([(x, 1), (y, 2)]);
        abstain_with_ranks.abstain = true;
        assert!(matches!(
            check(abstain_with_ranks),
            Err(PlanError::IncompleteBallot(_))
        ));
    }

    #[test]
    fn abstention_is_one_unranked_row_on_first_option() {
        let (_, event, options) = rows();
        let ids = SeededIdGenerator::new("votes");
        let votes = ballot_rows(&event, &options, "u2", &Ballot::abstain(), &ids, now());
        assert_eq!(votes.len(), 1);
        assert!(votes[0].abstain);
        assert_eq!(votes[0].rank, None);
        assert_eq!(votes[0].option_id, options[0].id);
    }

    #[test]
    fn ranked_rows_sorted_by_rank() {
        let (_, event, options) = rows();
        let ids = SeededIdGenerator::new("votes");
        let ballot = Ballot::ranked([(options[1].id.clone(), 2), (options[0].id.clone(), 1)]);
        let votes = ballot_rows(&event, &options, "u1", &ballot, &ids, now());
        let ranks: Vec<Option<i32>> = votes.iter().map(|v| v.rank).collect();
        assert_eq!(ranks, [Some(1), Some(2)]);
        assert!(votes.iter().all(|v| !v.abstain));
    }

    #[test]
    fn option_changes_frozen_once_voted() {
        let (plan, event, _) = rows();
        assert!(check_option_addition(&plan, &event, 2, 0).is_ok());
        assert!(matches!(
            check_option_addition(&plan, &event, 2, 1),
            Err(PlanError::FrozenEvent(_))
        ));
        assert!(matches!(
            check_option_archival(&plan, &event, 2, 3),
            Err(PlanError::FrozenEvent(_))
        ));
        assert!(matches!(
            check_option_archival(&plan, &event, 1, 0),
            Err(PlanError::Validation(_))
        ));
    }

    #[test]
    fn decisions_are_idempotent_per_option() {
        let (plan, mut event, options) = rows();
        let x = options[0].id.clone();
        let y = options[1].id.clone();
        assert_eq!(
            check_decision(&plan, &event, &options, &x).unwrap(),
            DecisionCheck::Apply
        );

        event.status = EventStatus::Decided;
        event.chosen_option_id = Some(x.clone());
        assert_eq!(
            check_decision(&plan, &event, &options, &x).unwrap(),
            DecisionCheck::AlreadyApplied
        );
        assert!(matches!(
            check_decision(&plan, &event, &options, &y),
            Err(PlanError::AlreadyDecided { .. })
        ));
        assert!(matches!(
            check_decision(&plan, &event, &options, "other"),
            Err(PlanError::UnknownOption { .. })
        ));
    }

    #[test]
    fn derivation_requires_finalized_underived_plan() {
        let (mut plan, _, _) = rows();
        let empty = Derivation::default();
        assert!(matches!(
            check_derivation(&plan, &empty),
            Err(PlanError::InvalidState(_))
        ));

        plan.status = PlanStatus::Finalized;
        assert!(check_derivation(&plan, &empty).is_ok());

        plan.derived_at = Some(now());
        assert!(matches!(
            check_derivation(&plan, &empty),
            Err(PlanError::AlreadyDerived(_))
        ));
    }
}
