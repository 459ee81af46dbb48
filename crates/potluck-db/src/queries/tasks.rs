//! Database query functions for the `meal_plan_tasks` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::{MealPlanTask, TaskStatus};

/// Insert a derived task row exactly as given.
pub async fn insert_task<'e, E>(executor: E, task: &MealPlanTask) -> Result<MealPlanTask>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, MealPlanTask>(
        "INSERT INTO meal_plan_tasks \
         (id, plan_id, event_id, option_id, recipe_id, recipe_step_id, depends_on_steps, \
          status, status_explanation, cannot_complete_before, cannot_complete_after, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING *",
    )
    .bind(&task.id)
    .bind(&task.plan_id)
    .bind(&task.event_id)
    .bind(&task.option_id)
    .bind(&task.recipe_id)
    .bind(&task.recipe_step_id)
    .bind(&task.depends_on_steps)
    .bind(task.status)
    .bind(&task.status_explanation)
    .bind(task.cannot_complete_before)
    .bind(task.cannot_complete_after)
    .bind(task.created_at)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert task {}", task.id))?;

    Ok(row)
}

/// Fetch a single task by ID, archived or not.
pub async fn get_task<'e, E>(executor: E, id: &str) -> Result<Option<MealPlanTask>>
where
    E: PgExecutor<'e>,
{
    let task = sqlx::query_as::<_, MealPlanTask>("SELECT * FROM meal_plan_tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Resolve the plan that owns a task.
pub async fn plan_id_for_task<'e, E>(executor: E, id: &str) -> Result<Option<String>>
where
    E: PgExecutor<'e>,
{
    let plan_id: Option<String> =
        sqlx::query_scalar("SELECT plan_id FROM meal_plan_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .context("failed to resolve plan for task")?;

    Ok(plan_id)
}

/// List a plan's non-archived tasks by window start.
pub async fn list_live_tasks_for_plan<'e, E>(
    executor: E,
    plan_id: &str,
) -> Result<Vec<MealPlanTask>>
where
    E: PgExecutor<'e>,
{
    let tasks = sqlx::query_as::<_, MealPlanTask>(
        "SELECT * FROM meal_plan_tasks \
         WHERE plan_id = $1 AND archived_at IS NULL \
         ORDER BY cannot_complete_before, id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list tasks for plan")?;

    Ok(tasks)
}

/// Set a task's status and explanation.
///
/// `completed_at` is stamped when entering a terminal status and cleared
/// otherwise.
pub async fn update_task_status<'e, E>(
    executor: E,
    id: &str,
    status: TaskStatus,
    explanation: &str,
    now: DateTime<Utc>,
) -> Result<MealPlanTask>
where
    E: PgExecutor<'e>,
{
    let completed_at = status.is_terminal().then_some(now);
    let task = sqlx::query_as::<_, MealPlanTask>(
        "UPDATE meal_plan_tasks \
         SET status = $2, status_explanation = $3, completed_at = $4, last_updated_at = $5 \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(status)
    .bind(explanation)
    .bind(completed_at)
    .bind(now)
    .fetch_optional(executor)
    .await
    .context("failed to update task status")?;

    task.with_context(|| format!("task {id} not found"))
}

/// Set a task's archive instant. Already-archived tasks keep theirs.
pub async fn archive_task<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE meal_plan_tasks SET archived_at = COALESCE(archived_at, $2) WHERE id = $1",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await
    .context("failed to archive task")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}
