//! Aggregate repository: the deal-lifecycle state machine over durable rows.

use crate::error::RecordsResult;
use async_trait::async_trait;
use barge_core::{Aggregate, AggregateId, AggregateState, CommitmentProof, PieceInfo};

/// Repository for aggregate lifecycle operations.
///
/// Every transition is a conditional update checked against durable state.
/// Implementations must guarantee that a killed worker leaves the aggregate
/// in either the pre- or post-transition state, never a torn one.
#[async_trait]
pub trait AggregateRepo: Send + Sync {
    /// Append a batch of pieces to an aggregate, creating it (state
    /// Ingesting) if absent. One transaction; partial application is never
    /// observable.
    ///
    /// Rejects with `BatchTooLarge` if the batch alone exceeds `max_size`,
    /// and with `MaxSizeExceeded` if the existing aggregate cannot take the
    /// whole batch; in both cases nothing is mutated. Pieces already
    /// assigned to this aggregate are skipped without affecting the running
    /// size, so redelivered batches are effectively idempotent.
    async fn add(
        &self,
        aggregate_id: AggregateId,
        group: &str,
        pieces: &[PieceInfo],
        max_size: u64,
    ) -> RecordsResult<()>;

    /// Get an aggregate by id.
    async fn get_aggregate(&self, aggregate_id: AggregateId) -> RecordsResult<Option<Aggregate>>;

    /// List aggregates in a given state, oldest first.
    async fn list_by_state(
        &self,
        state: AggregateState,
        limit: u32,
    ) -> RecordsResult<Vec<Aggregate>>;

    /// Transition Ingesting -> Ready, requiring `size >= min_size`.
    ///
    /// Finding the aggregate already Ready is success (idempotent retry);
    /// finding it in any other state fails with a typed error and no
    /// mutation. Concurrent identical calls are safe: at most one flips the
    /// state.
    async fn set_as_ready(&self, aggregate_id: AggregateId, min_size: u64) -> RecordsResult<()>;

    /// Transition Ready -> DealPending. Idempotent on the target state.
    async fn set_as_deal_pending(&self, aggregate_id: AggregateId) -> RecordsResult<()>;

    /// Transition DealPending -> DealProcessed, recording the commitment
    /// proof. Idempotent on the target state; the proof never changes once
    /// set.
    async fn close_aggregate(
        &self,
        aggregate_id: AggregateId,
        proof: &CommitmentProof,
    ) -> RecordsResult<()>;
}
