//! Database query functions for the `meal_plans` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::MealPlan;

/// Take the per-plan transaction-scoped advisory lock.
///
/// Released automatically on commit or rollback. All writers of a plan take
/// this lock first, so their transactions are serialized.
pub async fn lock_plan<'e, E>(executor: E, plan_id: &str) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(plan_id)
        .execute(executor)
        .await
        .with_context(|| format!("failed to lock plan {plan_id}"))?;

    Ok(())
}

/// Insert a plan row exactly as given.
pub async fn insert_plan<'e, E>(executor: E, plan: &MealPlan) -> Result<MealPlan>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, MealPlan>(
        "INSERT INTO meal_plans \
         (id, owner_household_id, created_by_user, notes, status, voting_deadline, \
          tie_break_policy, change_sequence, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(&plan.id)
    .bind(&plan.owner_household_id)
    .bind(&plan.created_by_user)
    .bind(&plan.notes)
    .bind(plan.status)
    .bind(plan.voting_deadline)
    .bind(plan.tie_break_policy)
    .bind(plan.change_sequence)
    .bind(plan.created_at)
    .fetch_one(executor)
    .await
    .context("failed to insert meal plan")?;

    Ok(row)
}

/// Fetch a plan by its ID, archived or not.
pub async fn get_plan<'e, E>(executor: E, id: &str) -> Result<Option<MealPlan>>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, MealPlan>("SELECT * FROM meal_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch meal plan")?;

    Ok(plan)
}

/// List a household's non-archived plans, newest first.
pub async fn list_live_plans_for_household<'e, E>(
    executor: E,
    household_id: &str,
) -> Result<Vec<MealPlan>>
where
    E: PgExecutor<'e>,
{
    let plans = sqlx::query_as::<_, MealPlan>(
        "SELECT * FROM meal_plans \
         WHERE owner_household_id = $1 AND archived_at IS NULL \
         ORDER BY created_at DESC, id",
    )
    .bind(household_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal plans")?;

    Ok(plans)
}

/// Ids of live finalized plans whose tasks and grocery list were never
/// stored, oldest finalization first.
pub async fn list_underived_plan_ids<'e, E>(executor: E) -> Result<Vec<String>>
where
    E: PgExecutor<'e>,
{
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT id FROM meal_plans \
         WHERE status = 'finalized' AND derived_at IS NULL AND archived_at IS NULL \
         ORDER BY finalized_at, id",
    )
    .fetch_all(executor)
    .await
    .context("failed to list underived meal plans")?;

    Ok(ids)
}

/// Replace a plan's notes and voting deadline.
pub async fn update_plan_details<'e, E>(
    executor: E,
    id: &str,
    notes: &str,
    voting_deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<MealPlan>
where
    E: PgExecutor<'e>,
{
    let plan = sqlx::query_as::<_, MealPlan>(
        "UPDATE meal_plans \
         SET notes = $2, voting_deadline = $3, last_updated_at = $4 \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(notes)
    .bind(voting_deadline)
    .bind(now)
    .fetch_optional(executor)
    .await
    .context("failed to update meal plan")?;

    plan.with_context(|| format!("meal plan {id} not found"))
}

/// Move a plan from `awaiting_votes` to `finalized`.
///
/// Returns `false` when the plan was not awaiting votes.
pub async fn finalize_plan<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE meal_plans \
         SET status = 'finalized', finalized_at = $2, last_updated_at = $2 \
         WHERE id = $1 AND status = 'awaiting_votes'",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await
    .context("failed to finalize meal plan")?;

    Ok(result.rows_affected() == 1)
}

/// Stamp `derived_at` on a finalized plan that has not been derived yet.
///
/// Returns `false` when the plan was already derived (or is not finalized).
pub async fn mark_plan_derived<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE meal_plans \
         SET derived_at = $2, last_updated_at = $2 \
         WHERE id = $1 AND status = 'finalized' AND derived_at IS NULL",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await
    .context("failed to mark meal plan derived")?;

    Ok(result.rows_affected() == 1)
}

/// Set a plan's archive instant. Already-archived plans keep theirs.
pub async fn archive_plan<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE meal_plans SET archived_at = COALESCE(archived_at, $2) WHERE id = $1",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await
    .context("failed to archive meal plan")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("meal plan {id} not found");
    }

    Ok(())
}

/// Reserve `count` change sequence numbers for a plan.
///
/// Returns the first reserved number; the reservation covers
/// `first..first + count`.
pub async fn reserve_change_sequence<'e, E>(executor: E, id: &str, count: i64) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let last: i64 = sqlx::query_scalar(
        "UPDATE meal_plans SET change_sequence = change_sequence + $2 \
         WHERE id = $1 \
         RETURNING change_sequence",
    )
    .bind(id)
    .bind(count)
    .fetch_optional(executor)
    .await
    .context("failed to reserve change sequence")?
    .with_context(|| format!("meal plan {id} not found"))?;

    Ok(last - count + 1)
}
