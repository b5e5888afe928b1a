//! Buffer reduction: merge queued buffers and route the result.

use crate::buffer_store::BufferStore;
use crate::error::{PipelineError, PipelineResult};
use crate::messages::BufferRecord;
use crate::queue::DurableQueue;
use barge_core::{Buffer, ContentHash};
use std::sync::Arc;
use tracing::{info, instrument};

/// Where a reduced buffer was routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceDestination {
    /// Reached the aggregate minimum size; enqueued on the aggregate queue.
    Aggregate,
    /// Still below the minimum; re-enqueued for further reduction.
    Buffer,
}

/// Outcome of a reduction.
#[derive(Clone, Debug)]
pub struct ReduceOutcome {
    /// Content address of the merged buffer.
    pub buffer: ContentHash,
    /// Total size of the merged buffer in bytes.
    pub total_size: u64,
    /// Which queue received the reference.
    pub destination: ReduceDestination,
}

/// Merges batches of stored buffers and publishes the merged reference.
pub struct Reducer {
    buffers: BufferStore,
    buffer_queue: Arc<dyn DurableQueue>,
    aggregate_queue: Arc<dyn DurableQueue>,
    min_size: u64,
}

impl Reducer {
    pub fn new(
        buffers: BufferStore,
        buffer_queue: Arc<dyn DurableQueue>,
        aggregate_queue: Arc<dyn DurableQueue>,
        min_size: u64,
    ) -> Self {
        Self {
            buffers,
            buffer_queue,
            aggregate_queue,
            min_size,
        }
    }

    /// Fetch every referenced buffer, merge them into one, store the merged
    /// buffer under its content address, and enqueue the reference: on the
    /// aggregate queue if the merge reached the aggregate minimum size,
    /// back on the buffer queue otherwise.
    ///
    /// A missing input buffer fails the whole reduction before anything is
    /// stored. An enqueue failure after the store is reported as a queue
    /// failure; the merged buffer stays stored, so a redelivered reduction
    /// skips re-storing and only repeats the enqueue.
    #[instrument(skip(self, records), fields(inputs = records.len()))]
    pub async fn reduce(&self, records: &[BufferRecord]) -> PipelineResult<ReduceOutcome> {
        if records.is_empty() {
            return Err(PipelineError::Validation(
                "empty buffer record batch".to_string(),
            ));
        }

        let mut fetched = Vec::with_capacity(records.len());
        for record in records {
            fetched.push(self.buffers.fetch(&record.buffer).await?);
        }

        let merged =
            Buffer::merge(fetched).map_err(|e| PipelineError::Validation(e.to_string()))?;
        let total_size = merged.total_size();
        let hash = self.buffers.store(&merged).await?;

        let reference = BufferRecord {
            buffer: hash,
            group: merged.group.clone(),
        };
        let body = reference.encode()?;

        let destination = if total_size >= self.min_size {
            self.aggregate_queue
                .send(body, Some(&reference.group))
                .await?;
            ReduceDestination::Aggregate
        } else {
            self.buffer_queue.send(body, Some(&reference.group)).await?;
            ReduceDestination::Buffer
        };

        info!(
            buffer = %hash,
            group = %reference.group,
            total_size,
            ?destination,
            "reduced {} buffers",
            records.len()
        );

        Ok(ReduceOutcome {
            buffer: hash,
            total_size,
            destination,
        })
    }
}
