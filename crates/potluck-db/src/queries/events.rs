//! Database query functions for the `meal_plan_events` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::MealPlanEvent;

/// Insert an event row exactly as given.
pub async fn insert_event<'e, E>(executor: E, event: &MealPlanEvent) -> Result<MealPlanEvent>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, MealPlanEvent>(
        "INSERT INTO meal_plan_events \
         (id, plan_id, meal_name, scheduled_at, notes, status, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&event.id)
    .bind(&event.plan_id)
    .bind(event.meal_name)
    .bind(event.scheduled_at)
    .bind(&event.notes)
    .bind(event.status)
    .bind(event.created_at)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert meal plan event {}", event.id))?;

    Ok(row)
}

/// Fetch an event by ID, archived or not.
pub async fn get_event<'e, E>(executor: E, id: &str) -> Result<Option<MealPlanEvent>>
where
    E: PgExecutor<'e>,
{
    let event = sqlx::query_as::<_, MealPlanEvent>("SELECT * FROM meal_plan_events WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch meal plan event")?;

    Ok(event)
}

/// Resolve the plan that owns an event.
pub async fn plan_id_for_event<'e, E>(executor: E, id: &str) -> Result<Option<String>>
where
    E: PgExecutor<'e>,
{
    let plan_id: Option<String> =
        sqlx::query_scalar("SELECT plan_id FROM meal_plan_events WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .context("failed to resolve plan for event")?;

    Ok(plan_id)
}

/// List a plan's non-archived events in schedule order.
pub async fn list_live_events_for_plan<'e, E>(
    executor: E,
    plan_id: &str,
) -> Result<Vec<MealPlanEvent>>
where
    E: PgExecutor<'e>,
{
    let events = sqlx::query_as::<_, MealPlanEvent>(
        "SELECT * FROM meal_plan_events \
         WHERE plan_id = $1 AND archived_at IS NULL \
         ORDER BY scheduled_at, id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal plan events")?;

    Ok(events)
}

/// Record the decision on an event that is still awaiting votes.
///
/// Returns the updated row, or `None` when the event was already decided.
pub async fn mark_event_decided<'e, E>(
    executor: E,
    id: &str,
    chosen_option_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<MealPlanEvent>>
where
    E: PgExecutor<'e>,
{
    let event = sqlx::query_as::<_, MealPlanEvent>(
        "UPDATE meal_plan_events \
         SET status = 'decided', chosen_option_id = $2, decided_at = $3 \
         WHERE id = $1 AND status = 'awaiting_votes' \
         RETURNING *",
    )
    .bind(id)
    .bind(chosen_option_id)
    .bind(now)
    .fetch_optional(executor)
    .await
    .context("failed to mark meal plan event decided")?;

    Ok(event)
}

/// Set an event's archive instant. Already-archived events keep theirs.
pub async fn archive_event<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE meal_plan_events SET archived_at = COALESCE(archived_at, $2) WHERE id = $1",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await
    .context("failed to archive meal plan event")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("meal plan event {id} not found");
    }

    Ok(())
}

/// Count a plan's non-archived events that are still awaiting votes.
pub async fn count_live_undecided_events<'e, E>(executor: E, plan_id: &str) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM meal_plan_events \
         WHERE plan_id = $1 AND archived_at IS NULL AND status = 'awaiting_votes'",
    )
    .bind(plan_id)
    .fetch_one(executor)
    .await
    .context("failed to count undecided events")?;

    Ok(count)
}

/// Undecided events of live, awaiting plans whose voting deadline is at or
/// before `now`, ordered by plan then schedule.
pub async fn list_expired_events<'e, E>(
    executor: E,
    now: DateTime<Utc>,
) -> Result<Vec<MealPlanEvent>>
where
    E: PgExecutor<'e>,
{
    let events = sqlx::query_as::<_, MealPlanEvent>(
        "SELECT e.* FROM meal_plan_events e \
         JOIN meal_plans p ON p.id = e.plan_id \
         WHERE e.status = 'awaiting_votes' \
           AND e.archived_at IS NULL \
           AND p.status = 'awaiting_votes' \
           AND p.archived_at IS NULL \
           AND p.voting_deadline <= $1 \
         ORDER BY e.plan_id, e.scheduled_at, e.id",
    )
    .bind(now)
    .fetch_all(executor)
    .await
    .context("failed to list expired meal plan events")?;

    Ok(events)
}
