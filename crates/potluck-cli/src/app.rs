//! Wiring: a Postgres-backed PlanService with catalog collaborators and a
//! logging change sink.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::warn;

use potluck_core::PlanService;
use potluck_core::context::RequestContext;
use potluck_core::derivation::DerivationEngine;
use potluck_core::ports::SystemClock;
use potluck_core::publisher::{LogSink, Publisher};
use potluck_core::store::PgPlanStore;
use potluck_core::sweep::SweepConfig;
use potluck_core::voting::VotingCoordinator;
use potluck_db::pool;

use crate::catalog::FileCatalog;
use crate::config::PotluckConfig;

pub struct App {
    pub service: PlanService,
    pub config: PotluckConfig,
    publisher: Publisher,
    pool: PgPool,
}

impl App {
    pub async fn connect(config: PotluckConfig) -> Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => FileCatalog::load(path)
                .with_context(|| format!("failed to load catalog {}", path.display()))?,
            None => {
                warn!("no catalog configured; households and recipes are empty");
                FileCatalog::default()
            }
        };
        let ports = catalog.into_collaborators();

        let pool = pool::create_pool(&config.db_config).await?;
        let store = PgPlanStore::new(pool.clone()).with_max_attempts(config.max_store_attempts);
        let (publisher, _dispatcher) = Publisher::spawn(vec![Arc::new(LogSink)]);
        let coordinator = VotingCoordinator::new(
            Arc::new(store),
            Arc::new(ports.households),
            DerivationEngine::new(Arc::new(ports.recipes), Arc::new(ports.units)),
            publisher.clone(),
            Arc::new(SystemClock),
        );

        Ok(Self {
            service: PlanService::new(coordinator),
            config,
            publisher,
            pool,
        })
    }

    /// Request context for `user` bounded by the configured timeout.
    pub fn ctx(&self, user: Option<&str>) -> RequestContext {
        RequestContext {
            user_id: user.map(str::to_owned),
            ..RequestContext::system()
        }
        .with_timeout(self.config.request_timeout)
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: self.config.sweep_interval,
            pass_timeout: Some(self.config.request_timeout),
        }
    }

    /// Deliver queued change messages, then close the pool.
    pub async fn shutdown(self) {
        self.publisher.flush().await;
        self.pool.close().await;
    }
}
