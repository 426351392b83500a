//! Allocation ledger.
//!
//! An append-only log of every allocation ever made, plus indices from resource and request to
//! the allocation that is currently active for them. Records are closed, never deleted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::error::{AllocationError, Result};
use crate::types::{AllocationId, RequestId, ResourceId, ResourceType};

/// The binding of one request to one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub id: AllocationId,
    pub request_id: RequestId,
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub allocated_at: DateTime<Utc>,
    /// `None` while the allocation is active
    pub released_at: Option<DateTime<Utc>>,
}

impl Allocation {
    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    /// Allocation `n` lives at index `n - 1`
    log: Vec<Allocation>,
    active_by_resource: HashMap<ResourceId, AllocationId>,
    active_by_request: HashMap<RequestId, AllocationId>,
}

impl LedgerInner {
    fn slot(&mut self, id: AllocationId) -> Option<&mut Allocation> {
        let index = usize::try_from(id.get()).ok()?.checked_sub(1)?;
        self.log.get_mut(index)
    }
}

#[derive(Debug, Default)]
pub struct AllocationLedger {
    inner: RwLock<LedgerInner>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an active allocation. Ids and allocation timestamps never decrease.
    ///
    /// `on_record` runs under the ledger's write lock with the allocation about to be appended;
    /// the entry only becomes visible if it succeeds. Callers use it to move the request into its
    /// allocated state, so no reader or releaser can observe one without the other.
    ///
    /// # Errors
    /// - `InvariantViolation` if the resource or the request already has an active allocation.
    ///   The reserve/claim discipline makes this unreachable; seeing it means a bug.
    /// - Whatever `on_record` returns; the ledger is left unchanged
    pub fn record_allocation<T, F>(
        &self,
        request_id: RequestId,
        resource_id: ResourceId,
        resource_type: ResourceType,
        at: DateTime<Utc>,
        on_record: F,
    ) -> Result<(Allocation, T)>
    where
        F: FnOnce(&Allocation) -> Result<T>,
    {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.active_by_resource.get(&resource_id) {
            return Err(AllocationError::InvariantViolation(format!(
                "resource {resource_id} already held by allocation {existing}"
            )));
        }
        if let Some(existing) = inner.active_by_request.get(&request_id) {
            return Err(AllocationError::InvariantViolation(format!(
                "request {request_id} already holds allocation {existing}"
            )));
        }

        let allocated_at = inner.log.last().map_or(at, |last| at.max(last.allocated_at));
        let allocation = Allocation {
            id: AllocationId(inner.log.len() as u64 + 1),
            request_id,
            resource_id,
            resource_type,
            allocated_at,
            released_at: None,
        };
        let recorded = on_record(&allocation)?;

        inner.active_by_resource.insert(resource_id, allocation.id);
        inner.active_by_request.insert(request_id, allocation.id);
        inner.log.push(allocation.clone());
        Ok((allocation, recorded))
    }

    /// Mark an allocation released. `released_at` is clamped to never precede `allocated_at`.
    ///
    /// `on_close` runs under the write lock with the closed record before it is stored, the same
    /// way `on_record` does for [`record_allocation`](Self::record_allocation).
    ///
    /// # Errors
    /// - `NotFound` if no such allocation exists
    /// - `AlreadyClosed` if it was already released
    /// - Whatever `on_close` returns
    ///
    /// Nothing changes on any error.
    pub fn close_allocation<T, F>(
        &self,
        id: AllocationId,
        released_at: DateTime<Utc>,
        on_close: F,
    ) -> Result<(Allocation, T)>
    where
        F: FnOnce(&Allocation) -> Result<T>,
    {
        let mut inner = self.inner.write();

        let allocation = inner.slot(id).ok_or_else(|| AllocationError::not_found("Allocation", id))?;
        if !allocation.is_active() {
            return Err(AllocationError::AlreadyClosed(id));
        }
        let mut closed = allocation.clone();
        closed.released_at = Some(released_at.max(closed.allocated_at));
        let recorded = on_close(&closed)?;

        *allocation = closed.clone();
        inner.active_by_resource.remove(&closed.resource_id);
        inner.active_by_request.remove(&closed.request_id);
        Ok((closed, recorded))
    }

    pub fn get(&self, id: AllocationId) -> Option<Allocation> {
        let index = usize::try_from(id.get()).ok()?.checked_sub(1)?;
        self.inner.read().log.get(index).cloned()
    }

    pub fn active_for_resource(&self, resource_id: ResourceId) -> Option<AllocationId> {
        self.inner.read().active_by_resource.get(&resource_id).copied()
    }

    pub fn active_for_request(&self, request_id: RequestId) -> Option<AllocationId> {
        self.inner.read().active_by_request.get(&request_id).copied()
    }

    /// Active allocations in id order.
    pub fn active(&self) -> Vec<Allocation> {
        self.inner
            .read()
            .log
            .iter()
            .filter(|a| a.is_active())
            .cloned()
            .collect()
    }

    /// Every allocation, active or closed, in id order.
    pub fn history(&self) -> Vec<Allocation> {
        self.inner.read().log.clone()
    }

    pub fn active_count(&self) -> usize {
        self.inner.read().active_by_resource.len()
    }
}
