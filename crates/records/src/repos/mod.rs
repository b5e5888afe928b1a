//! Repository traits for record table operations.

pub mod aggregates;
pub mod deals;
pub mod pieces;

pub use aggregates::AggregateRepo;
pub use deals::DealRepo;
pub use pieces::PieceQueueRepo;
