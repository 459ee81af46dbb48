//! Per-table query functions.
//!
//! Every function is generic over [`sqlx::PgExecutor`] so it can run either
//! directly against the pool or inside a caller-owned transaction
//! (`&mut *tx`). Functions return rows including archived ones; filtering on
//! `archived_at` is the caller's decision unless the name says `live`.

pub mod events;
pub mod grocery;
pub mod options;
pub mod plans;
pub mod tasks;
pub mod votes;
