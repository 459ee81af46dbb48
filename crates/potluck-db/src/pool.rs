use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, FromRow, PgPool};
use tracing::{debug, info};

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/potluck-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool sized from the config.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))?;
    Ok(pool)
}

/// Run all pending embedded migrations against the pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!("migrations applied successfully");
    Ok(())
}

/// Whether `ensure_database_exists` had to issue `CREATE DATABASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStatus {
    Existing,
    Created,
}

/// Create the configured database through [`DbConfig::maintenance_url`] when
/// it is missing.
///
/// The name is checked before any connection is made: `CREATE DATABASE`
/// takes no bind parameters, so only plain identifiers are accepted.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<DatabaseStatus> {
    let db_name = plain_identifier(config)?;
    let maintenance_url = config.maintenance_url();
    debug!(db = db_name, %maintenance_url, "checking for database");

    let maintenance = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&maintenance_url)
        .await
        .with_context(|| {
            format!("failed to connect to maintenance database at {maintenance_url}")
        })?;

    let status = create_if_missing(&maintenance, db_name).await;
    maintenance.close().await;
    let status = status?;

    match status {
        DatabaseStatus::Existing => info!(db = db_name, "database already exists"),
        DatabaseStatus::Created => info!(db = db_name, "database created"),
    }
    Ok(status)
}

async fn create_if_missing(maintenance: &PgPool, db_name: &str) -> Result<DatabaseStatus> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(maintenance)
            .await
            .context("failed to query pg_database")?;
    if exists {
        return Ok(DatabaseStatus::Existing);
    }

    maintenance
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .with_context(|| format!("failed to create database {db_name}"))?;
    Ok(DatabaseStatus::Created)
}

fn plain_identifier(config: &DbConfig) -> Result<&str> {
    let name = config
        .database_name()
        .context("could not determine database name from URL")?;
    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("database name {name:?} is not a plain identifier");
    }
    Ok(name)
}

/// Row counts for the meal-plan tables, as printed by `potluck db-init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct PlanTableCounts {
    pub plans: i64,
    pub events: i64,
    pub options: i64,
    pub votes: i64,
    pub tasks: i64,
    pub grocery_items: i64,
}

impl PlanTableCounts {
    /// `(table, rows)` pairs in schema order.
    pub fn rows(&self) -> [(&'static str, i64); 6] {
        [
            ("meal_plans", self.plans),
            ("meal_plan_events", self.events),
            ("meal_plan_options", self.options),
            ("meal_plan_option_votes", self.votes),
            ("meal_plan_tasks", self.tasks),
            ("meal_plan_grocery_list_items", self.grocery_items),
        ]
    }
}

/// Count rows in each meal-plan table, archived rows included.
pub async fn table_counts(pool: &PgPool) -> Result<PlanTableCounts> {
    sqlx::query_as(
        "SELECT \
            (SELECT COUNT(*) FROM meal_plans) AS plans, \
            (SELECT COUNT(*) FROM meal_plan_events) AS events, \
            (SELECT COUNT(*) FROM meal_plan_options) AS options, \
            (SELECT COUNT(*) FROM meal_plan_option_votes) AS votes, \
            (SELECT COUNT(*) FROM meal_plan_tasks) AS tasks, \
            (SELECT COUNT(*) FROM meal_plan_grocery_list_items) AS grocery_items",
    )
    .fetch_one(pool)
    .await
    .context("failed to count meal-plan rows")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_identifiers_pass() {
        let cfg = DbConfig::new("postgresql://localhost:5432/potluck_test_1");
        assert_eq!(plain_identifier(&cfg).unwrap(), "potluck_test_1");
    }

    #[test]
    fn quoted_or_odd_names_are_rejected() {
        for url in [
            "postgresql://localhost:5432/pot-luck",
            "postgresql://localhost:5432/1potluck",
            "postgresql://localhost:5432/x;DROP",
            "postgresql://localhost:5432/",
        ] {
            assert!(plain_identifier(&DbConfig::new(url)).is_err(), "{url}");
        }
    }

    #[test]
    fn rows_follow_schema_order() {
        let counts = PlanTableCounts {
            plans: 1,
            events: 2,
            votes: 4,
            ..Default::default()
        };
        let rows = counts.rows();
        assert_eq!(rows[0], ("meal_plans", 1));
        assert_eq!(rows[1], ("meal_plan_events", 2));
        assert_eq!(rows[3], ("meal_plan_option_votes", 4));
        assert_eq!(rows[5], ("meal_plan_grocery_list_items", 0));
    }
}
