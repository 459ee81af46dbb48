//! Database query functions for the `meal_plan_options` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::MealPlanOption;

/// Insert an option row exactly as given.
pub async fn insert_option<'e, E>(executor: E, option: &MealPlanOption) -> Result<MealPlanOption>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, MealPlanOption>(
        "INSERT INTO meal_plan_options (id, event_id, meal_id, notes, created_at) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(&option.id)
    .bind(&option.event_id)
    .bind(&option.meal_id)
    .bind(&option.notes)
    .bind(option.created_at)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert meal plan option {}", option.id))?;

    Ok(row)
}

/// Fetch an option by ID, archived or not.
pub async fn get_option<'e, E>(executor: E, id: &str) -> Result<Option<MealPlanOption>>
where
    E: PgExecutor<'e>,
{
    let option =
        sqlx::query_as::<_, MealPlanOption>("SELECT * FROM meal_plan_options WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .context("failed to fetch meal plan option")?;

    Ok(option)
}

/// Resolve the plan that owns an option.
pub async fn plan_id_for_option<'e, E>(executor: E, id: &str) -> Result<Option<String>>
where
    E: PgExecutor<'e>,
{
    let plan_id: Option<String> = sqlx::query_scalar(
        "SELECT e.plan_id FROM meal_plan_options o \
         JOIN meal_plan_events e ON e.id = o.event_id \
         WHERE o.id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to resolve plan for option")?;

    Ok(plan_id)
}

/// List an event's non-archived options in creation order.
pub async fn list_live_options_for_event<'e, E>(
    executor: E,
    event_id: &str,
) -> Result<Vec<MealPlanOption>>
where
    E: PgExecutor<'e>,
{
    let options = sqlx::query_as::<_, MealPlanOption>(
        "SELECT * FROM meal_plan_options \
         WHERE event_id = $1 AND archived_at IS NULL \
         ORDER BY created_at, id",
    )
    .bind(event_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal plan options")?;

    Ok(options)
}

/// Flag an option as its event's chosen option.
pub async fn mark_option_chosen<'e, E>(
    executor: E,
    id: &str,
    tie_broken: bool,
) -> Result<MealPlanOption>
where
    E: PgExecutor<'e>,
{
    let option = sqlx::query_as::<_, MealPlanOption>(
        "UPDATE meal_plan_options SET chosen = TRUE, tie_broken = $2 \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(tie_broken)
    .fetch_optional(executor)
    .await
    .context("failed to mark meal plan option chosen")?;

    option.with_context(|| format!("meal plan option {id} not found"))
}

/// Set an option's archive instant. Already-archived options keep theirs.
pub async fn archive_option<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE meal_plan_options SET archived_at = COALESCE(archived_at, $2) WHERE id = $1",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await
    .context("failed to archive meal plan option")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("meal plan option {id} not found");
    }

    Ok(())
}
