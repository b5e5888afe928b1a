//! Piece types: the unit of content entering the pipeline.

use crate::hash::PieceLink;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A content-addressed piece awaiting aggregation.
///
/// Immutable once inserted; uniquely identified by its link. Pieces are
/// logically consumed when an inclusion assigns them to an aggregate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Piece {
    /// Content-addressed identifier.
    pub link: PieceLink,
    /// Piece size in bytes.
    pub size: u64,
    /// Tenant grouping tag (storefront/group), if any.
    pub group: Option<String>,
    /// Assignment priority; higher values are assigned first.
    pub priority: i32,
    /// When the piece was inserted.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
}

impl Piece {
    /// Create a new piece with default priority, timestamped now.
    pub fn new(link: PieceLink, size: u64) -> Self {
        Self {
            link,
            size,
            group: None,
            priority: 0,
            inserted_at: OffsetDateTime::now_utc(),
        }
    }

    /// Set the tenant group tag.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the assignment priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// The minimal piece description carried in aggregate batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    /// Content-addressed identifier.
    pub link: PieceLink,
    /// Piece size in bytes.
    pub size: u64,
}

impl PieceInfo {
    /// Create a new piece info.
    pub fn new(link: PieceLink, size: u64) -> Self {
        Self { link, size }
    }
}

impl From<&Piece> for PieceInfo {
    fn from(piece: &Piece) -> Self {
        Self {
            link: piece.link,
            size: piece.size,
        }
    }
}

/// Sum of sizes across a batch of pieces.
pub fn batch_size(pieces: &[PieceInfo]) -> u64 {
    pieces.iter().map(|p| p.size).sum()
}

/// An inclusion: the join record linking a piece to an aggregate.
///
/// `aggregate` is None while the piece awaits assignment. A piece has at
/// most one pending (unassigned) inclusion at any time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Inclusion {
    /// The included piece.
    pub piece: PieceLink,
    /// The aggregate this piece was assigned to, if any.
    pub aggregate: Option<crate::aggregate::AggregateId>,
    /// Assignment priority; higher values are assigned first.
    pub priority: i32,
    /// When the inclusion was inserted.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
}
