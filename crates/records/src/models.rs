//! Database models mapping to the record table schema.
//!
//! Rows use plain portable column types (TEXT ids, BIGINT sizes) so the
//! same structs back both persistence adapters.

use crate::error::{RecordsError, RecordsResult};
use barge_core::{
    Aggregate, AggregateId, AggregateState, CommitmentProof, DealRecord, Inclusion, PieceLink,
};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Inclusion record; `aggregate` is NULL while the piece awaits assignment.
#[derive(Debug, Clone, FromRow)]
pub struct InclusionRow {
    pub piece: String,
    pub aggregate: Option<String>,
    pub priority: i32,
    pub inserted_at: OffsetDateTime,
}

impl InclusionRow {
    /// Convert into the domain inclusion.
    pub fn to_inclusion(&self) -> RecordsResult<Inclusion> {
        let piece = PieceLink::parse(&self.piece)
            .map_err(|e| RecordsError::Internal(format!("corrupt piece link in row: {e}")))?;
        let aggregate = match self.aggregate.as_deref() {
            Some(id) => Some(
                AggregateId::parse(id)
                    .map_err(|e| RecordsError::Internal(format!("corrupt aggregate id: {e}")))?,
            ),
            None => None,
        };
        Ok(Inclusion {
            piece,
            aggregate,
            priority: self.priority,
            inserted_at: self.inserted_at,
        })
    }
}

/// Aggregate record.
#[derive(Debug, Clone, FromRow)]
pub struct AggregateRow {
    pub aggregate_id: String,
    pub group_key: String,
    pub size_bytes: i64,
    pub piece_count: i64,
    pub state: String,
    pub commitment_proof: Option<String>,
    pub inserted_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl AggregateRow {
    /// Convert into the domain aggregate, validating the stored state.
    pub fn to_aggregate(&self) -> RecordsResult<Aggregate> {
        let aggregate_id = AggregateId::parse(&self.aggregate_id)
            .map_err(|e| RecordsError::Internal(format!("corrupt aggregate id: {e}")))?;
        let state = AggregateState::parse(&self.state).map_err(|e| {
            RecordsError::Internal(format!(
                "corrupt state for aggregate {}: {e}",
                self.aggregate_id
            ))
        })?;
        Ok(Aggregate {
            aggregate_id,
            group: self.group_key.clone(),
            size: self.size_bytes as u64,
            piece_count: self.piece_count as u64,
            state,
            commitment_proof: self.commitment_proof.clone().map(CommitmentProof::new),
            inserted_at: self.inserted_at,
            updated_at: self.updated_at,
        })
    }
}

/// Deal record row; `(piece, deal_id)` is the primary key.
#[derive(Debug, Clone, FromRow)]
pub struct DealRow {
    pub piece: String,
    pub deal_id: i64,
    pub group_key: String,
    pub provider: Option<String>,
    pub inserted_at: OffsetDateTime,
}

impl DealRow {
    /// Convert into the domain deal record.
    pub fn to_deal(&self) -> RecordsResult<DealRecord> {
        let piece = PieceLink::parse(&self.piece)
            .map_err(|e| RecordsError::Internal(format!("corrupt piece link in row: {e}")))?;
        Ok(DealRecord {
            piece,
            deal_id: self.deal_id as u64,
            group: self.group_key.clone(),
            provider: self.provider.clone(),
            inserted_at: self.inserted_at,
        })
    }
}
