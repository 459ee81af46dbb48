//! Request-scoped identity and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::PlanError;

/// Who is acting and how long they are willing to wait.
///
/// Threaded through every service and coordinator call. The acting user and
/// household are copied onto every change message produced by the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub household_id: Option<String>,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// A context with no identity and no deadline (sweeps, operators).
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>, household_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            household_id: Some(household_id.into()),
            deadline: None,
        }
    }

    /// Set the deadline to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Drive `fut` to completion unless the deadline passes first.
    ///
    /// On expiry the future is dropped, which rolls back any transaction it
    /// holds, and [`PlanError::Canceled`] is returned. A deadline that has
    /// already passed cancels before `fut` is polled.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, PlanError>
    where
        F: Future<Output = Result<T, PlanError>>,
    {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(PlanError::Canceled),
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .unwrap_or(Err(PlanError::Canceled)),
            None => fut.await,
        }
    }

    /// Like [`run`](Self::run) for futures that cannot fail.
    pub async fn wait<T, F>(&self, fut: F) -> Result<T, PlanError>
    where
        F: Future<Output = T>,
    {
        self.run(async { Ok(fut.await) }).await
    }
}
