//! Piece routing into the current ingesting aggregate.

use crate::error::{PipelineError, PipelineResult};
use crate::pointer::PointerStore;
use barge_core::{AggregateId, AggregatorConfig, PieceInfo};
use barge_records::{RecordStore, RecordsError};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Routes piece batches to the per-tenant current ingesting aggregate.
///
/// The pointer steers producers toward the open aggregate; the conditional
/// `add` in the record store is what actually enforces capacity. A producer
/// that finds the pointed-at aggregate full mints a fresh id and installs it
/// with compare-and-set; losing that race means another producer already
/// rolled the pointer, and the loser converges onto the winner's aggregate
/// on the next attempt.
pub struct Accumulator {
    records: Arc<dyn RecordStore>,
    pointers: Arc<dyn PointerStore>,
    config: AggregatorConfig,
}

impl Accumulator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        pointers: Arc<dyn PointerStore>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            records,
            pointers,
            config,
        }
    }

    /// Add a piece batch to the tenant's current aggregate, rolling over to
    /// a fresh aggregate when capacity runs out. Returns the aggregate the
    /// batch landed in.
    #[instrument(skip(self, pieces), fields(batch = pieces.len()))]
    pub async fn route(&self, group: &str, pieces: &[PieceInfo]) -> PipelineResult<AggregateId> {
        for attempt in 0..self.config.max_route_attempts {
            let current = match self.pointers.get(group).await? {
                Some(id) => id,
                None => {
                    let fresh = AggregateId::new();
                    if self.pointers.create_if_absent(group, fresh).await? {
                        fresh
                    } else {
                        // Another producer installed a pointer first; re-read.
                        match self.pointers.get(group).await? {
                            Some(id) => id,
                            None => continue,
                        }
                    }
                }
            };

            match self
                .records
                .add(current, group, pieces, self.config.max_size)
                .await
            {
                Ok(()) => return Ok(current),
                Err(
                    RecordsError::MaxSizeExceeded { .. } | RecordsError::NotIngesting { .. },
                ) => {
                    // The pointed-at aggregate can't take this batch. Roll
                    // the pointer to a fresh aggregate; a failed swap means
                    // someone else already did.
                    let fresh = AggregateId::new();
                    let installed = self
                        .pointers
                        .compare_and_set(group, current, fresh)
                        .await?;
                    debug!(
                        group,
                        attempt,
                        rolled = installed,
                        "aggregate out of capacity, rolling pointer"
                    );
                }
                Err(RecordsError::Conflict(_)) => {
                    // Concurrent mutation of the same aggregate; re-read and retry.
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(PipelineError::OperationFailed(format!(
            "piece routing for group {group} exhausted {} attempts",
            self.config.max_route_attempts
        )))
    }

    /// The configured aggregate size bounds.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }
}
