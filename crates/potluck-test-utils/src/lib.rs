//! Shared Postgres for potluck integration tests.
//!
//! Every test gets its own freshly migrated database inside one server:
//! - with **`POTLUCK_TEST_PG_URL`** set, that server is used as-is;
//! - otherwise a container is started through testcontainers on first use
//!   and shared by the whole test binary.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use potluck_db::config::DbConfig;
use potluck_db::pool;

const DB_PREFIX: &str = "potluck_test_";

struct SharedPg {
    base_url: String,
    /// Keeps the container alive. `None` with an external server.
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var("POTLUCK_TEST_PG_URL") {
        return SharedPg {
            base_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server root URL (no database name) of the shared Postgres.
pub async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.base_url
}

async fn maintenance_pool() -> PgPool {
    let maint_url = format!("{}/postgres", pg_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated, uniquely named database. Remove it with [`TestDb::cleanup`].
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
    pub config: DbConfig,
}

impl TestDb {
    /// Create the database and apply every migration.
    pub async fn create() -> Self {
        let name = format!("{DB_PREFIX}{}", Uuid::new_v4().simple());

        let maint_pool = maintenance_pool().await;
        maint_pool
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create temp database {name}: {e}"));
        maint_pool.close().await;

        let config = DbConfig::new(format!("{}/{name}", pg_url().await)).with_max_connections(5);
        let pool = pool::create_pool(&config)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to temp database {name}: {e}"));
        pool::run_migrations(&pool)
            .await
            .expect("migrations should succeed");

        Self { pool, name, config }
    }

    /// Close the pool, then drop the database.
    pub async fn cleanup(self) {
        self.pool.close().await;
        drop_test_db(&self.name).await;
    }
}

/// Create a temporary migrated database. Returns `(pool, db_name)`; pass
/// `db_name` to [`drop_test_db`] when done.
pub async fn create_test_db() -> (PgPool, String) {
    let db = TestDb::create().await;
    (db.pool, db.name)
}

/// Drop a temporary database, terminating its connections first. Safe to
/// call twice.
pub async fn drop_test_db(db_name: &str) {
    let maint_pool = maintenance_pool().await;

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;

    let _ = maint_pool
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    maint_pool.close().await;
}
