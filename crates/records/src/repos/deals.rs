//! Deal repository: confirmed deals queryable by piece.

use crate::error::RecordsResult;
use async_trait::async_trait;
use barge_core::{DealKey, DealRecord, PieceLink};

/// Repository for deal tracking.
#[async_trait]
pub trait DealRepo: Send + Sync {
    /// Insert a deal record. A duplicate `(piece, deal_id)` key is reported
    /// as `AlreadyExists`, a normal reportable condition rather than a
    /// crash.
    async fn put_deal(&self, record: &DealRecord) -> RecordsResult<()>;

    /// Get a deal record by key, or None if absent. Storage faults surface
    /// as `Database`, distinct from "nothing there".
    async fn get_deal(&self, key: &DealKey) -> RecordsResult<Option<DealRecord>>;

    /// All deal records for a piece; may be empty.
    async fn query_deals_by_piece(&self, piece: &PieceLink) -> RecordsResult<Vec<DealRecord>>;
}
