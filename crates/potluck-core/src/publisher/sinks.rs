//! Destinations for change messages.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use super::message::ChangeMessage;

/// A consumer of published change messages.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, message: &ChangeMessage) -> Result<()>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ChangeSink) {}
};

/// Fans messages out to live subscribers over a tokio broadcast channel.
///
/// Slow subscribers that fall more than `capacity` messages behind observe a
/// lag error on their stream; publishing never blocks.
pub struct BroadcastSink {
    tx: broadcast::Sender<ChangeMessage>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeMessage> {
        self.tx.subscribe()
    }

    /// Subscribe as a [`futures::Stream`].
    pub fn stream(&self) -> BroadcastStream<ChangeMessage> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ChangeSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn deliver(&self, message: &ChangeMessage) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.tx.send(message.clone());
        Ok(())
    }
}

/// Writes one structured log line per message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ChangeSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, message: &ChangeMessage) -> Result<()> {
        info!(
            event_type = %message.event_type,
            plan_id = %message.plan_id,
            sequence = message.sequence,
            user_id = message.user_id.as_deref().unwrap_or("-"),
            "change published"
        );
        Ok(())
    }
}

/// Keeps every delivered message in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    messages: Arc<Mutex<Vec<ChangeMessage>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ChangeMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl ChangeSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn deliver(&self, message: &ChangeMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures::StreamExt;

    use super::*;
    use crate::publisher::message::EventType;

    fn message(sequence: i64) -> ChangeMessage {
        ChangeMessage {
            event_type: EventType::MealPlanCreated,
            plan_id: "p1".to_owned(),
            context: BTreeMap::new(),
            user_id: None,
            household_id: None,
            sequence,
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_stream() {
        let sink = BroadcastSink::new(8);
        let mut stream = sink.stream();

        sink.deliver(&message(1)).await.unwrap();
        let got = stream.next().await.expect("item").expect("no lag");
        assert_eq!(got.sequence, 1);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let sink = BroadcastSink::new(1);
        sink.deliver(&message(1)).await.unwrap();
    }

    #[tokio::test]
    async fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        for n in 1..=3 {
            sink.deliver(&message(n)).await.unwrap();
        }
        let seqs: Vec<i64> = sink.messages().iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, [1, 2, 3]);

        sink.clear();
        assert!(sink.messages().is_empty());
    }
}
