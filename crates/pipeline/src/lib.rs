//! Pipeline stages for the barge aggregation system.
//!
//! Four stages connect the record tables, the content store, and the
//! broker boundary:
//! - piece routing into the current ingesting aggregate ([`Accumulator`])
//! - buffer reduction with threshold routing ([`Reducer`])
//! - aggregate offers to the broker ([`OfferWorkflow`])
//! - deal tracking (via `barge-records`' deal repo)
//!
//! Collaborator seams ([`DurableQueue`], [`PointerStore`], [`Broker`]) are
//! traits with in-memory implementations for wiring and tests; production
//! adapters live outside this crate.

pub mod accumulator;
pub mod buffer_store;
pub mod error;
pub mod messages;
pub mod offer;
pub mod pointer;
pub mod queue;
pub mod reducer;

pub use accumulator::Accumulator;
pub use buffer_store::BufferStore;
pub use error::{PipelineError, PipelineResult};
pub use messages::{AggregateRef, BufferRecord, DealOffer};
pub use offer::{Broker, OfferWorkflow};
pub use pointer::{MemoryPointerStore, PointerStore};
pub use queue::{DurableQueue, MemoryQueue};
pub use reducer::{ReduceDestination, ReduceOutcome, Reducer};
