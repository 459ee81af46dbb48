use std::sync::Arc;

use tokio::sync::{OwnedMutexGuard, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::guard::PlanGuards;
use super::message::{Change, ChangeMessage};
use super::sinks::ChangeSink;
use crate::context::RequestContext;

enum Command {
    Deliver(ChangeMessage),
    Flush(oneshot::Sender<()>),
}

/// Handle for publishing change messages. Cheap to clone.
///
/// The dispatcher task stops once every handle has been dropped and the
/// queue has drained.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Command>,
    guards: Arc<PlanGuards>,
}

impl Publisher {
    /// Start a dispatcher delivering to `sinks`, in order, for every message.
    pub fn spawn(sinks: Vec<Arc<dyn ChangeSink>>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch(rx, sinks));
        let publisher = Self {
            tx,
            guards: Arc::new(PlanGuards::new()),
        };
        (publisher, handle)
    }

    /// Serialize mutations of one plan within this process. Hold the guard
    /// from the store call until its changes are published.
    pub async fn order_guard(&self, plan_id: &str) -> OwnedMutexGuard<()> {
        self.guards.lock(plan_id).await
    }

    /// Queue committed changes for delivery. Never fails and never blocks.
    pub fn publish(&self, ctx: &RequestContext, changes: Vec<Change>) {
        for change in changes {
            let message = ChangeMessage {
                event_type: change.event_type,
                plan_id: change.plan_id,
                context: change.context,
                user_id: ctx.user_id.clone(),
                household_id: ctx.household_id.clone(),
                sequence: change.sequence,
            };
            if self.tx.send(Command::Deliver(message)).is_err() {
                warn!("change dispatcher has stopped; dropping message");
                return;
            }
        }
    }

    /// Wait until everything queued before this call has been delivered.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Command>, sinks: Vec<Arc<dyn ChangeSink>>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver(message) => {
                for sink in &sinks {
                    if let Err(e) = sink.deliver(&message).await {
                        warn!(
                            sink = sink.name(),
                            event_type = %message.event_type,
                            plan_id = %message.plan_id,
                            sequence = message.sequence,
                            error = %e,
                            "change sink failed"
                        );
                    }
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("change dispatcher stopped");
}
