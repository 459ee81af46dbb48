//! `potluck tasks`, `task-status`, `grocery` and `grocery-status`.

use anyhow::{Context, Result};

use potluck_core::store::GroceryItemUpdate;
use potluck_db::models::{GroceryItemStatus, TaskStatus};

use crate::app::App;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

pub async fn cmd_tasks(app: &App, user: Option<&str>, plan_id: &str) -> Result<()> {
    let tasks = app.service.list_tasks(&app.ctx(user), plan_id).await?;
    if tasks.is_empty() {
        println!("No prep tasks. Tasks appear once the plan is finalized.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<11}  {:<16}  {:<16}  STEP",
        "ID", "STATUS", "NOT BEFORE", "NOT AFTER"
    );
    for task in &tasks {
        println!(
            "{:<36}  {:<11}  {:<16}  {:<16}  {}/{}",
            task.id,
            task.status.to_string(),
            task.cannot_complete_before.format(TIME_FORMAT).to_string(),
            task.cannot_complete_after.format(TIME_FORMAT).to_string(),
            task.recipe_id,
            task.recipe_step_id,
        );
        if !task.status_explanation.is_empty() {
            println!("    {}", task.status_explanation);
        }
    }
    Ok(())
}

pub async fn cmd_task_status(
    app: &App,
    user: Option<&str>,
    task_id: &str,
    status: &str,
    explanation: &str,
) -> Result<()> {
    let status: TaskStatus = status.parse()?;
    let task = app
        .service
        .change_task_status(&app.ctx(user), task_id, status, explanation)
        .await
        .with_context(|| format!("failed to update task {task_id}"))?;
    println!("Task {} is now {}.", task.id, task.status);
    Ok(())
}

pub async fn cmd_grocery(app: &App, user: Option<&str>, plan_id: &str) -> Result<()> {
    let items = app
        .service
        .list_grocery_items(&app.ctx(user), plan_id)
        .await?;
    if items.is_empty() {
        println!("No grocery items. The list appears once the plan is finalized.");
        return Ok(());
    }

    println!("{:<36}  {:<12}  {:>14}  INGREDIENT", "ID", "STATUS", "QUANTITY");
    for item in &items {
        println!(
            "{:<36}  {:<12}  {:>14}  {}",
            item.id,
            item.status.to_string(),
            quantity(item.min_qty, item.max_qty, &item.measurement_unit_id),
            item.ingredient_id,
        );
    }
    Ok(())
}

fn quantity(min: f64, max: Option<f64>, unit: &str) -> String {
    match max {
        Some(max) if max != min => format!("{min}-{max} {unit}"),
        _ => format!("{min} {unit}"),
    }
}

pub async fn cmd_grocery_status(
    app: &App,
    user: Option<&str>,
    item_id: &str,
    status: &str,
    upc: Option<String>,
    explanation: String,
) -> Result<()> {
    let status: GroceryItemStatus = status.parse()?;
    let update = GroceryItemUpdate {
        status,
        explanation,
        purchased_upc: upc,
    };
    let item = app
        .service
        .update_grocery_item(&app.ctx(user), item_id, &update)
        .await
        .with_context(|| format!("failed to update grocery item {item_id}"))?;
    println!("Grocery item {} is now {}.", item.id, item.status);
    Ok(())
}
