//! Database query functions for the `meal_plan_option_votes` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::MealPlanOptionVote;

/// Insert a vote row exactly as given.
pub async fn insert_vote<'e, E>(
    executor: E,
    vote: &MealPlanOptionVote,
) -> Result<MealPlanOptionVote>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, MealPlanOptionVote>(
        "INSERT INTO meal_plan_option_votes \
         (id, option_id, event_id, voter_id, rank, abstain, notes, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(&vote.id)
    .bind(&vote.option_id)
    .bind(&vote.event_id)
    .bind(&vote.voter_id)
    .bind(vote.rank)
    .bind(vote.abstain)
    .bind(&vote.notes)
    .bind(vote.created_at)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert vote {}", vote.id))?;

    Ok(row)
}

/// List an event's non-archived votes, grouped by voter and ordered by rank.
pub async fn list_live_votes_for_event<'e, E>(
    executor: E,
    event_id: &str,
) -> Result<Vec<MealPlanOptionVote>>
where
    E: PgExecutor<'e>,
{
    let votes = sqlx::query_as::<_, MealPlanOptionVote>(
        "SELECT * FROM meal_plan_option_votes \
         WHERE event_id = $1 AND archived_at IS NULL \
         ORDER BY voter_id, rank NULLS FIRST, id",
    )
    .bind(event_id)
    .fetch_all(executor)
    .await
    .context("failed to list votes")?;

    Ok(votes)
}

/// Whether a voter has a live ballot (ranks or abstention) on an event.
pub async fn voter_has_ballot<'e, E>(executor: E, event_id: &str, voter_id: &str) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS( \
             SELECT 1 FROM meal_plan_option_votes \
             WHERE event_id = $1 AND voter_id = $2 AND archived_at IS NULL \
         )",
    )
    .bind(event_id)
    .bind(voter_id)
    .fetch_one(executor)
    .await
    .context("failed to check for existing ballot")?;

    Ok(exists)
}

/// Count an event's live votes, abstentions included.
pub async fn count_live_votes_for_event<'e, E>(executor: E, event_id: &str) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM meal_plan_option_votes \
         WHERE event_id = $1 AND archived_at IS NULL",
    )
    .bind(event_id)
    .fetch_one(executor)
    .await
    .context("failed to count votes")?;

    Ok(count)
}

/// Archive every live vote a voter cast on an event. Returns the archived
/// vote ids.
pub async fn archive_ballot<'e, E>(
    executor: E,
    event_id: &str,
    voter_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<String>>
where
    E: PgExecutor<'e>,
{
    let ids: Vec<String> = sqlx::query_scalar(
        "UPDATE meal_plan_option_votes SET archived_at = $3 \
         WHERE event_id = $1 AND voter_id = $2 AND archived_at IS NULL \
         RETURNING id",
    )
    .bind(event_id)
    .bind(voter_id)
    .bind(now)
    .fetch_all(executor)
    .await
    .context("failed to archive ballot")?;

    Ok(ids)
}
