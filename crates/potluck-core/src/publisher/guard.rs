use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per plan id, created on demand.
///
/// Entries nobody holds or waits on are pruned whenever a new guard is
/// requested, so the table only grows with the number of busy plans.
#[derive(Debug, Default)]
pub struct PlanGuards {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PlanGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, plan_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(plan_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of plans currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_plan_is_exclusive() {
        let guards = Arc::new(PlanGuards::new());
        let held = guards.lock("p1").await;

        let g = Arc::clone(&guards);
        let waiter = tokio::spawn(async move {
            let _second = g.lock("p1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn different_plans_do_not_block() {
        let guards = PlanGuards::new();
        let _a = guards.lock("p1").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), guards.lock("p2"))
            .await
            .expect("other plan should not wait");
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let guards = PlanGuards::new();
        drop(guards.lock("p1").await);
        drop(guards.lock("p2").await);
        // p1 was pruned when p2 was requested.
        assert_eq!(guards.len(), 1);
    }
}
