//! Durable queue abstraction.
//!
//! Queue messages carry encoded references (content addresses, record
//! keys), never payloads. Delivery is at-least-once; consumers rely on the
//! idempotency of the stages behind them, not on exactly-once delivery.

use crate::error::PipelineResult;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

/// At-least-once message queue.
#[async_trait]
pub trait DurableQueue: Send + Sync + 'static {
    /// Send a message, optionally tagged with an ordering group.
    async fn send(&self, body: Bytes, group: Option<&str>) -> PipelineResult<()>;
}

/// In-memory queue keyed by group. Used for wiring and tests; messages are
/// never lost but offer no durability across processes.
#[derive(Default)]
pub struct MemoryQueue {
    messages: DashMap<String, Vec<Bytes>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total messages across all groups.
    pub fn len(&self) -> usize {
        self.messages.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all messages for a group, in send order.
    pub fn drain(&self, group: &str) -> Vec<Bytes> {
        self.messages
            .remove(group)
            .map(|(_, messages)| messages)
            .unwrap_or_default()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn send(&self, body: Bytes, group: Option<&str>) -> PipelineResult<()> {
        let group = group.unwrap_or_default().to_string();
        self.messages.entry(group).or_default().push(body);
        Ok(())
    }
}
