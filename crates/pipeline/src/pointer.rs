//! Per-tenant "current ingesting aggregate" pointer.
//!
//! The pointer is a fast shared location that steers producers toward the
//! aggregate currently accepting pieces. It is an optimization, not a
//! correctness mechanism: a stale pointer can only cause a rejected `add`
//! and a retry, never an oversize aggregate.

use crate::error::PipelineResult;
use async_trait::async_trait;
use barge_core::AggregateId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Atomic reference store for the per-tenant aggregate pointer.
#[async_trait]
pub trait PointerStore: Send + Sync + 'static {
    /// Read the current pointer for a tenant, if any.
    async fn get(&self, tenant: &str) -> PipelineResult<Option<AggregateId>>;

    /// Install a pointer only if none exists. Returns whether this call
    /// installed it.
    async fn create_if_absent(&self, tenant: &str, id: AggregateId) -> PipelineResult<bool>;

    /// Swap the pointer only if it currently equals `expected`. Returns
    /// whether the swap happened.
    async fn compare_and_set(
        &self,
        tenant: &str,
        expected: AggregateId,
        new: AggregateId,
    ) -> PipelineResult<bool>;
}

/// In-memory pointer store over a concurrent map.
#[derive(Default)]
pub struct MemoryPointerStore {
    pointers: DashMap<String, AggregateId>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PointerStore for MemoryPointerStore {
    async fn get(&self, tenant: &str) -> PipelineResult<Option<AggregateId>> {
        Ok(self.pointers.get(tenant).map(|entry| *entry.value()))
    }

    async fn create_if_absent(&self, tenant: &str, id: AggregateId) -> PipelineResult<bool> {
        match self.pointers.entry(tenant.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(id);
                Ok(true)
            }
        }
    }

    async fn compare_and_set(
        &self,
        tenant: &str,
        expected: AggregateId,
        new: AggregateId,
    ) -> PipelineResult<bool> {
        match self.pointers.entry(tenant.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() == expected {
                    occupied.insert(new);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }
}
