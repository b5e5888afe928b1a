//! Piece queue repository: deduplicating ingestion point for pieces.

use crate::error::RecordsResult;
use async_trait::async_trait;
use barge_core::{Inclusion, Piece};

/// Repository for the piece ingestion queue.
#[async_trait]
pub trait PieceQueueRepo: Send + Sync {
    /// Insert pieces and their unassigned inclusion rows as one atomic
    /// transaction.
    ///
    /// Re-inserting a piece whose link already exists is a no-op, as is
    /// re-inserting a piece that already has a pending (unassigned)
    /// inclusion. A foreign-key violation (an inclusion referencing a piece
    /// row that was never written) is reported as `ForeignKey`, distinct
    /// from generic storage faults, because it indicates a logic bug rather
    /// than a transient failure.
    async fn put_pieces(&self, pieces: &[Piece]) -> RecordsResult<()>;

    /// Read up to `limit` unassigned inclusions ordered by priority (higher
    /// first) then insertion order. Non-destructive: items leave the queue
    /// only when an inclusion is later assigned to an aggregate.
    async fn peek_pending(&self, limit: u32) -> RecordsResult<Vec<Inclusion>>;

    /// Count unassigned inclusions (queue length).
    async fn pending_count(&self) -> RecordsResult<u64>;
}
