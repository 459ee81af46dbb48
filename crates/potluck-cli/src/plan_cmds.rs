//! Operator-mode CLI handlers for `potluck plan` subcommands.
//!
//! Implements:
//! - `potluck plan create <file>`        -- create a plan from a TOML file and open voting
//! - `potluck plan show <plan-id>`       -- show events, options and ballots
//! - `potluck plan list --household <h>` -- list a household's plans
//! - `potluck plan update <plan-id>`     -- change notes or the voting deadline
//! - `potluck plan missing-votes <plan-id>` -- who still owes a ballot
//! - `potluck plan add-option <event-id> <meal-id>`
//! - `potluck plan archive <id> [--event|--option]`

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use potluck_core::definition::load_plan_definition;
use potluck_core::store::{NewOption, PlanAggregate, PlanUpdate};

use crate::PlanCommands;
use crate::app::App;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(command: PlanCommands, app: &App, user: Option<&str>) -> Result<()> {
    match command {
        PlanCommands::Create { file } => cmd_create(app, &file).await,
        PlanCommands::Show { plan_id } => cmd_show(app, user, &plan_id).await,
        PlanCommands::List { household } => cmd_list(app, user, &household).await,
        PlanCommands::Update {
            plan_id,
            notes,
            deadline,
        } => cmd_update(app, user, &plan_id, notes, deadline.as_deref()).await,
        PlanCommands::MissingVotes { plan_id } => cmd_missing_votes(app, user, &plan_id).await,
        PlanCommands::AddOption {
            event_id,
            meal_id,
            notes,
        } => cmd_add_option(app, user, &event_id, meal_id, notes).await,
        PlanCommands::Archive { id, event, option } => {
            cmd_archive(app, user, &id, event, option).await
        }
    }
}

// -----------------------------------------------------------------------
// potluck plan create <file>
// -----------------------------------------------------------------------

/// Read a plan definition, open voting on it and print a summary. The
/// definition's `created_by` is the acting user.
async fn cmd_create(app: &App, file: &Path) -> Result<()> {
    let plan = load_plan_definition(file)
        .with_context(|| format!("failed to load plan file: {}", file.display()))?;

    let ctx = app.ctx(Some(&plan.created_by_user));
    let created = app.service.create_plan(&ctx, &plan).await?;

    println!("Plan created; voting is open.");
    println!();
    print_summary(&created);
    Ok(())
}

// -----------------------------------------------------------------------
// potluck plan show <plan-id>
// -----------------------------------------------------------------------

async fn cmd_show(app: &App, user: Option<&str>, plan_id: &str) -> Result<()> {
    let aggregate = app.service.get_plan(&app.ctx(user), plan_id).await?;
    print_summary(&aggregate);

    for event in &aggregate.events {
        println!();
        println!(
            "  [{}] {} at {}",
            event.event.status,
            event.event.meal_name,
            event.event.scheduled_at.format(TIME_FORMAT)
        );
        println!("    Event ID:   {}", event.event.id);
        for option in &event.options {
            let marker = if option.chosen { "*" } else { " " };
            let tie = if option.tie_broken { " (tie broken)" } else { "" };
            println!("    {marker} {}  {}{tie}", option.id, option.meal_id);
        }
        let voters = event.voters();
        if !voters.is_empty() {
            let voters: Vec<&str> = voters.into_iter().collect();
            println!("    Ballots:    {}", voters.join(", "));
        }
    }
    Ok(())
}

fn print_summary(aggregate: &PlanAggregate) {
    let plan = &aggregate.plan;
    println!("  Plan ID:      {}", plan.id);
    println!("  Household:    {}", plan.owner_household_id);
    println!("  Owner:        {}", plan.created_by_user);
    println!("  Status:       {}", plan.status);
    println!("  Tie-break:    {}", plan.tie_break_policy);
    println!("  Deadline:     {}", plan.voting_deadline.format(TIME_FORMAT));
    if let Some(finalized) = plan.finalized_at {
        println!("  Finalized:    {}", finalized.format(TIME_FORMAT));
    }
    if !plan.notes.is_empty() {
        println!("  Notes:        {}", plan.notes);
    }
    println!("  Events:       {}", aggregate.events.len());
}

// -----------------------------------------------------------------------
// potluck plan missing-votes <plan-id>
// -----------------------------------------------------------------------

async fn cmd_missing_votes(app: &App, user: Option<&str>, plan_id: &str) -> Result<()> {
    let missing = app.service.missing_votes(&app.ctx(user), plan_id).await?;
    if missing.is_empty() {
        println!("Every member has voted on every undecided event.");
        return Ok(());
    }

    let event_w = missing.iter().map(|m| m.event_id.len()).max().unwrap_or(5).max(5);
    println!("{:<event_w$}  VOTER", "EVENT");
    for vote in &missing {
        println!("{:<event_w$}  {}", vote.event_id, vote.voter_id);
    }
    Ok(())
}

// -----------------------------------------------------------------------
// potluck plan list --household <id>
// -----------------------------------------------------------------------

async fn cmd_list(app: &App, user: Option<&str>, household: &str) -> Result<()> {
    let plans = app.service.list_plans(&app.ctx(user), household).await?;

    if plans.is_empty() {
        println!("No plans found. Use `potluck plan create <file>` to create one.");
        return Ok(());
    }

    let id_w = plans.iter().map(|p| p.id.len()).max().unwrap_or(2).max(2);
    let status_w = 14;
    println!("{:<id_w$}  {:<status_w$}  {:<20}  OWNER", "ID", "STATUS", "DEADLINE");
    for plan in &plans {
        println!(
            "{:<id_w$}  {:<status_w$}  {:<20}  {}",
            plan.id,
            plan.status.to_string(),
            plan.voting_deadline.format(TIME_FORMAT).to_string(),
            plan.created_by_user,
        );
    }
    Ok(())
}

// -----------------------------------------------------------------------
// potluck plan update / add-option / archive
// -----------------------------------------------------------------------

async fn cmd_update(
    app: &App,
    user: Option<&str>,
    plan_id: &str,
    notes: Option<String>,
    deadline: Option<&str>,
) -> Result<()> {
    let voting_deadline = deadline.map(parse_deadline).transpose()?;
    if notes.is_none() && voting_deadline.is_none() {
        anyhow::bail!("nothing to update: pass --notes and/or --deadline");
    }
    let update = PlanUpdate {
        notes,
        voting_deadline,
    };
    let plan = app
        .service
        .update_plan(&app.ctx(user), plan_id, &update)
        .await?;
    println!("Plan {} updated.", plan.id);
    println!("  Deadline:     {}", plan.voting_deadline.format(TIME_FORMAT));
    Ok(())
}

fn parse_deadline(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid deadline {value:?}; expected RFC 3339"))
}

async fn cmd_add_option(
    app: &App,
    user: Option<&str>,
    event_id: &str,
    meal_id: String,
    notes: String,
) -> Result<()> {
    let option = app
        .service
        .add_option(&app.ctx(user), event_id, &NewOption { meal_id, notes })
        .await?;
    println!("Option {} ({}) added to event {event_id}.", option.id, option.meal_id);
    Ok(())
}

async fn cmd_archive(
    app: &App,
    user: Option<&str>,
    id: &str,
    event: bool,
    option: bool,
) -> Result<()> {
    let ctx = app.ctx(user);
    let kind = if event {
        app.service.archive_event(&ctx, id).await?;
        "Event"
    } else if option {
        app.service.archive_option(&ctx, id).await?;
        "Option"
    } else {
        app.service.archive_plan(&ctx, id).await?;
        "Plan"
    };
    println!("{kind} {id} archived.");
    Ok(())
}
