//! Postgres persistence for meal plans: configuration, pooling, embedded
//! migrations, row models and per-table queries.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
