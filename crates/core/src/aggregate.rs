//! Aggregate types and deal lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an aggregate.
///
/// Generated at creation time; content is not known while the aggregate is
/// still filling, so the id is not derived from it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Generate a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidAggregateId(e.to_string()))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AggregateId({})", self.0)
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate lifecycle state.
///
/// States advance forward only: Ingesting -> Ready -> DealPending ->
/// DealProcessed. Every transition is guarded by a conditional update
/// against durable state, never by in-memory bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    /// Accepting new piece batches.
    Ingesting,
    /// Reached minimum size; closed for writes, awaiting a deal offer.
    Ready,
    /// Offered to the broker; deal outcome pending.
    DealPending,
    /// Deal confirmed; commitment proof recorded.
    DealProcessed,
}

impl AggregateState {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingesting => "ingesting",
            Self::Ready => "ready",
            Self::DealPending => "deal_pending",
            Self::DealProcessed => "deal_processed",
        }
    }

    /// Parse the stable storage representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "ingesting" => Ok(Self::Ingesting),
            "ready" => Ok(Self::Ready),
            "deal_pending" => Ok(Self::DealPending),
            "deal_processed" => Ok(Self::DealProcessed),
            other => Err(crate::Error::InvalidState(other.to_string())),
        }
    }

    /// The state a transition into `self` requires the aggregate to be in.
    pub fn required_prior(&self) -> Option<Self> {
        match self {
            Self::Ingesting => None,
            Self::Ready => Some(Self::Ingesting),
            Self::DealPending => Some(Self::Ready),
            Self::DealProcessed => Some(Self::DealPending),
        }
    }

    /// Whether piece batches may still be added.
    pub fn accepts_pieces(&self) -> bool {
        matches!(self, Self::Ingesting)
    }

    /// Whether the aggregate reached the end of its lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DealProcessed)
    }
}

impl fmt::Display for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commitment proof (commP) recorded when a deal is confirmed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitmentProof(String);

impl CommitmentProof {
    /// Wrap a broker-provided commitment proof.
    pub fn new(proof: impl Into<String>) -> Self {
        Self(proof.into())
    }

    /// Get the proof string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CommitmentProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitmentProof({})", self.0)
    }
}

impl fmt::Display for CommitmentProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An aggregate: a size-bounded batch of pieces progressing through the
/// deal lifecycle. Retained after completion as an audit trail.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Aggregate {
    /// Stable identifier.
    pub aggregate_id: AggregateId,
    /// Tenant grouping tag (storefront/group).
    pub group: String,
    /// Running sum of included piece sizes in bytes.
    pub size: u64,
    /// Number of included pieces.
    pub piece_count: u64,
    /// Lifecycle state.
    pub state: AggregateState,
    /// Commitment proof, set only once the deal is processed.
    pub commitment_proof: Option<CommitmentProof>,
    /// When the aggregate was created.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
    /// When the aggregate was last mutated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
