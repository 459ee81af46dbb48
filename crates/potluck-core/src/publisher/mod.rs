//! Change publication.
//!
//! Committed store transactions hand their [`Change`]s to a [`Publisher`].
//! The publisher stamps them with the acting identity and queues them for a
//! single dispatcher task that delivers to every [`ChangeSink`] in queue
//! order. Callers hold the per-plan [`Publisher::order_guard`] from the store
//! call through `publish`, so per-plan queue order equals commit order.
//! Delivery is fire-and-forget: sink failures are logged and dropped.

pub mod dispatcher;
pub mod guard;
pub mod message;
pub mod sinks;

pub use dispatcher::Publisher;
pub use guard::PlanGuards;
pub use message::{Change, ChangeMessage, ChangeSet, ContextKey, EventType};
pub use sinks::{BroadcastSink, ChangeSink, CollectingSink, LogSink};
