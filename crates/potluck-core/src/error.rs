//! The error taxonomy surfaced by every store, coordinator and service
//! operation.

use thiserror::Error;

/// Errors returned by meal-plan operations.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("event {0} already has votes; its options are frozen")]
    FrozenEvent(String),

    #[error("voter {voter_id} already voted on event {event_id}")]
    AlreadyVoted { event_id: String, voter_id: String },

    #[error("option {option_id} is not an option of event {event_id}")]
    UnknownOption { event_id: String, option_id: String },

    #[error("incomplete ballot: {0}")]
    IncompleteBallot(String),

    #[error("event {event_id} was already decided for option {chosen_option_id}")]
    AlreadyDecided {
        event_id: String,
        chosen_option_id: String,
    },

    #[error("plan {0} already has derived tasks and grocery items")]
    AlreadyDerived(String),

    #[error("inconsistent plan: {0}")]
    InconsistentPlan(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("operation canceled: deadline exceeded")]
    Canceled,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl PlanError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Whether the store should retry the operation internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a driver error by SQLSTATE or failure class.
    pub fn from_sqlx(err: &sqlx::Error, context: &str) -> Self {
        match err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => Self::Conflict(format!("{context}: {}", db.message())),
                Some("23502" | "23503" | "23514" | "22P02") => {
                    Self::Validation(format!("{context}: {}", db.message()))
                }
                Some("40001" | "40P01") => Self::Transient(format!("{context}: {}", db.message())),
                _ => Self::Internal(anyhow::anyhow!("{context}: {err}")),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Transient(format!("{context}: {err}")),
            _ => Self::Internal(anyhow::anyhow!("{context}: {err}")),
        }
    }
}

impl From<sqlx::Error> for PlanError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(&err, "database error")
    }
}

impl From<anyhow::Error> for PlanError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx_err) => Self::from_sqlx(sqlx_err, &err.to_string()),
            None => Self::Internal(err),
        }
    }
}
