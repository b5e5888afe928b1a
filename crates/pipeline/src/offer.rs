//! Aggregate offer workflow: hand a ready aggregate to the broker.

use crate::buffer_store::BufferStore;
use crate::error::PipelineResult;
use crate::messages::{AggregateRef, DealOffer};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

/// External broker boundary. Transport framing and signing live in the
/// caller; implementations map their failures to
/// `PipelineError::OperationFailed`.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Submit a deal offer; returns the broker's acknowledgment count.
    async fn send_offer(&self, offer: &DealOffer) -> PipelineResult<u32>;
}

/// Builds and submits deal offers for ready aggregates.
pub struct OfferWorkflow {
    buffers: BufferStore,
    broker: Arc<dyn Broker>,
}

impl OfferWorkflow {
    pub fn new(buffers: BufferStore, broker: Arc<dyn Broker>) -> Self {
        Self { buffers, broker }
    }

    /// Read the aggregate's buffer, build the offer, and invoke the broker.
    ///
    /// A failed buffer read aborts before the broker is touched. A broker
    /// failure surfaces as-is; no local state was mutated, so a retry is
    /// equivalent to a fresh attempt.
    #[instrument(skip(self), fields(aggregate = %record.aggregate, group = %record.group))]
    pub async fn offer(&self, record: &AggregateRef) -> PipelineResult<u32> {
        let buffer = self.buffers.fetch(&record.buffer).await?;

        let offer = DealOffer {
            aggregate: record.aggregate,
            buffer: record.buffer,
            group: buffer.group.clone(),
            pieces: buffer.pieces.iter().map(|p| p.link).collect(),
        };

        let acks = self.broker.send_offer(&offer).await?;
        info!(
            aggregate = %record.aggregate,
            pieces = offer.pieces.len(),
            acks,
            "offer accepted by broker"
        );
        Ok(acks)
    }
}
