//! Core domain types and shared logic for the barge aggregation pipeline.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and piece links
//! - Pieces and inclusions
//! - Aggregates and the deal lifecycle state machine
//! - Buffers (intermediate piece batches)
//! - Deal records
//! - Configuration

pub mod aggregate;
pub mod buffer;
pub mod config;
pub mod deal;
pub mod error;
pub mod hash;
pub mod piece;

pub use aggregate::{Aggregate, AggregateId, AggregateState, CommitmentProof};
pub use buffer::{Buffer, BufferedPiece, PiecePolicy};
pub use config::{AggregatorConfig, RecordsConfig, StorageConfig};
pub use deal::{DealKey, DealRecord};
pub use error::{Error, Result};
pub use hash::{ContentHash, PieceLink};
pub use piece::{Inclusion, Piece, PieceInfo, batch_size};
