//! Database query functions for the `meal_plan_grocery_list_items` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::{GroceryItemStatus, MealPlanGroceryListItem};

/// Insert a derived grocery list item exactly as given.
pub async fn insert_item<'e, E>(
    executor: E,
    item: &MealPlanGroceryListItem,
) -> Result<MealPlanGroceryListItem>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, MealPlanGroceryListItem>(
        "INSERT INTO meal_plan_grocery_list_items \
         (id, plan_id, ingredient_id, measurement_unit_id, min_qty, max_qty, \
          status, status_explanation, purchased_upc, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(&item.id)
    .bind(&item.plan_id)
    .bind(&item.ingredient_id)
    .bind(&item.measurement_unit_id)
    .bind(item.min_qty)
    .bind(item.max_qty)
    .bind(item.status)
    .bind(&item.status_explanation)
    .bind(&item.purchased_upc)
    .bind(item.created_at)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert grocery list item {}", item.id))?;

    Ok(row)
}

/// Fetch a grocery list item by ID, archived or not.
pub async fn get_item<'e, E>(executor: E, id: &str) -> Result<Option<MealPlanGroceryListItem>>
where
    E: PgExecutor<'e>,
{
    let item = sqlx::query_as::<_, MealPlanGroceryListItem>(
        "SELECT * FROM meal_plan_grocery_list_items WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch grocery list item")?;

    Ok(item)
}

/// Resolve the plan that owns a grocery list item.
pub async fn plan_id_for_item<'e, E>(executor: E, id: &str) -> Result<Option<String>>
where
    E: PgExecutor<'e>,
{
    let plan_id: Option<String> =
        sqlx::query_scalar("SELECT plan_id FROM meal_plan_grocery_list_items WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .context("failed to resolve plan for grocery list item")?;

    Ok(plan_id)
}

/// List a plan's non-archived grocery list, sorted by ingredient then unit.
pub async fn list_live_items_for_plan<'e, E>(
    executor: E,
    plan_id: &str,
) -> Result<Vec<MealPlanGroceryListItem>>
where
    E: PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, MealPlanGroceryListItem>(
        "SELECT * FROM meal_plan_grocery_list_items \
         WHERE plan_id = $1 AND archived_at IS NULL \
         ORDER BY ingredient_id, measurement_unit_id, id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list grocery list items")?;

    Ok(items)
}

/// Update the shopper-facing fields of a grocery list item.
pub async fn update_item<'e, E>(
    executor: E,
    id: &str,
    status: GroceryItemStatus,
    explanation: &str,
    purchased_upc: Option<&str>,
    now: DateTime<Utc>,
) -> Result<MealPlanGroceryListItem>
where
    E: PgExecutor<'e>,
{
    let item = sqlx::query_as::<_, MealPlanGroceryListItem>(
        "UPDATE meal_plan_grocery_list_items \
         SET status = $2, status_explanation = $3, purchased_upc = $4, last_updated_at = $5 \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(status)
    .bind(explanation)
    .bind(purchased_upc)
    .bind(now)
    .fetch_optional(executor)
    .await
    .context("failed to update grocery list item")?;

    item.with_context(|| format!("grocery list item {id} not found"))
}

/// Set an item's archive instant. Already-archived items keep theirs.
pub async fn archive_item<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE meal_plan_grocery_list_items SET archived_at = COALESCE(archived_at, $2) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(now)
    .execute(executor)
    .await
    .context("failed to archive grocery list item")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("grocery list item {id} not found");
    }

    Ok(())
}
