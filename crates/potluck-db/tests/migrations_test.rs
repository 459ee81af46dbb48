//! Integration tests for the embedded migrations and pool helpers.

use sqlx::Row;
use uuid::Uuid;

use potluck_db::config::DbConfig;
use potluck_db::pool;
use potluck_test_utils::{create_test_db, drop_test_db, pg_url};

const EXPECTED_TABLES: &[&str] = &[
    "meal_plan_events",
    "meal_plan_grocery_list_items",
    "meal_plan_option_votes",
    "meal_plan_options",
    "meal_plan_tasks",
    "meal_plans",
];

#[tokio::test]
async fn migrations_create_all_tables() {
    let (pool, db_name) = create_test_db().await;

    let rows = sqlx::query(
        "SELECT tablename::text AS name FROM pg_tables \
         WHERE schemaname = 'public' AND tablename LIKE 'meal_plan%' \
         ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .expect("listing tables should succeed");

    let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
    assert_eq!(names, EXPECTED_TABLES);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    pool::run_migrations(&pool)
        .await
        .expect("second migration run should be a no-op");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn table_counts_cover_every_plan_table() {
    let (pool, db_name) = create_test_db().await;

    let counts = pool::table_counts(&pool).await.expect("counts");
    assert_eq!(counts, pool::PlanTableCounts::default());
    let mut tables: Vec<&str> = counts.rows().iter().map(|(table, _)| *table).collect();
    tables.sort_unstable();
    assert_eq!(tables, EXPECTED_TABLES);

    sqlx::query(
        "INSERT INTO meal_plans (id, owner_household_id, created_by_user, voting_deadline) \
         VALUES ('plan-1', 'house-1', 'u1', now())",
    )
    .execute(&pool)
    .await
    .expect("insert plan");

    let counts = pool::table_counts(&pool).await.expect("counts");
    assert_eq!(counts.plans, 1);
    assert_eq!(counts.events, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ensure_database_exists_creates_then_reports_existing() {
    let base = pg_url().await;
    let db_name = format!("potluck_ensure_{}", Uuid::new_v4().simple());
    let config = DbConfig::new(format!("{base}/{db_name}"));

    let first = pool::ensure_database_exists(&config)
        .await
        .expect("first call creates the database");
    assert_eq!(first, pool::DatabaseStatus::Created);
    let second = pool::ensure_database_exists(&config)
        .await
        .expect("second call is a no-op");
    assert_eq!(second, pool::DatabaseStatus::Existing);

    let pool = pool::create_pool(&config).await.expect("connect");
    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ensure_database_exists_rejects_names_before_connecting() {
    // Nothing listens on port 1; the name check fails first.
    let config = DbConfig::new("postgresql://localhost:1/bad-name");
    let err = pool::ensure_database_exists(&config)
        .await
        .expect_err("hyphenated name is refused");
    assert!(err.to_string().contains("plain identifier"), "{err:#}");
}
