//! Queue message and broker offer types.
//!
//! Messages reference content by address; payloads live in the content
//! store. Trigger adapters decode raw queue events into these types.

use crate::error::{PipelineError, PipelineResult};
use barge_core::{AggregateId, ContentHash, PieceLink};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Reference to a stored buffer, carried on the buffer and aggregate
/// queues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRecord {
    /// Content address of the stored buffer.
    pub buffer: ContentHash,
    /// Tenant group the buffer belongs to.
    pub group: String,
}

impl BufferRecord {
    pub fn encode(&self) -> PipelineResult<Bytes> {
        let body = serde_json::to_vec(self)
            .map_err(|e| PipelineError::OperationFailed(e.to_string()))?;
        Ok(Bytes::from(body))
    }

    pub fn decode(bytes: &[u8]) -> PipelineResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::Validation(format!("malformed buffer record: {e}")))
    }
}

/// Reference to a ready aggregate and its backing buffer, input to the
/// offer workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRef {
    /// The aggregate being offered.
    pub aggregate: AggregateId,
    /// Content address of the aggregate's buffer.
    pub buffer: ContentHash,
    /// Tenant group.
    pub group: String,
}

/// Deal offer handed to the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealOffer {
    /// The aggregate the offer covers.
    pub aggregate: AggregateId,
    /// Content address of the backing buffer.
    pub buffer: ContentHash,
    /// Tenant group.
    pub group: String,
    /// Links of every piece in the aggregate.
    pub pieces: Vec<PieceLink>,
}
