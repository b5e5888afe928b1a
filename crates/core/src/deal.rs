//! Deal records: confirmation that a piece landed in an executed deal.

use crate::hash::PieceLink;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A confirmed deal for a piece.
///
/// Immutable; distinct deal ids for the same piece are separate records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DealRecord {
    /// The piece covered by the deal.
    pub piece: PieceLink,
    /// Broker-assigned deal identifier.
    pub deal_id: u64,
    /// Tenant grouping tag (storefront/group).
    pub group: String,
    /// Storage provider identity, if reported.
    pub provider: Option<String>,
    /// When the confirmation was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
}

impl DealRecord {
    /// Create a new deal record timestamped now.
    pub fn new(piece: PieceLink, deal_id: u64, group: impl Into<String>) -> Self {
        Self {
            piece,
            deal_id,
            group: group.into(),
            provider: None,
            inserted_at: OffsetDateTime::now_utc(),
        }
    }

    /// The record's primary key.
    pub fn key(&self) -> DealKey {
        DealKey {
            piece: self.piece,
            deal_id: self.deal_id,
        }
    }
}

/// Primary key of a deal record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DealKey {
    /// The piece covered by the deal.
    pub piece: PieceLink,
    /// Broker-assigned deal identifier.
    pub deal_id: u64,
}
