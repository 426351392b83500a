//! Allocation matcher.
//!
//! Matching is driven from both sides: a new request looks for supply ([`Matcher::match_request`]),
//! a freed resource looks for demand ([`Matcher::match_resource`]). Each pass commits at most one
//! pairing. A pairing is committed only by the pass that holds both the request's queue claim and
//! the resource's reservation, so concurrent passes cannot double-allocate either side.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument};

use super::error::{AllocationError, Result};
use super::ledger::{Allocation, AllocationLedger};
use super::pool::{ResourcePool, ResourceStatus};
use super::queue::{PriorityQueue, QueueEntry};
use super::store::RequestStore;
use crate::types::ResourceId;

/// Borrowed view over the engine components a matching pass touches.
pub struct Matcher<'a> {
    pub(super) pool: &'a ResourcePool,
    pub(super) queue: &'a PriorityQueue,
    pub(super) ledger: &'a AllocationLedger,
    pub(super) requests: &'a RequestStore,
}

impl Matcher<'_> {
    /// Try to serve a newly queued request from currently available supply.
    ///
    /// Resources of the request's type are tried lowest id first; a lost reservation race moves
    /// on to the next one. If nothing can be reserved the request stays queued. Returns `None`
    /// when no allocation was made, including when another pass already owns the request.
    #[instrument(skip_all, fields(request_id = %entry.request_id, resource_type = %entry.resource_type))]
    pub fn match_request(&self, entry: &Arc<QueueEntry>) -> Result<Option<Allocation>> {
        // Bounded: every retry needs a resource of this type to have become available meanwhile
        let max_rounds = self.pool.list_by_type(&entry.resource_type).len() + 1;

        for _ in 0..max_rounds {
            if !entry.try_claim() {
                debug!("Request already claimed by another matcher pass");
                return Ok(None);
            }

            for resource_id in self.pool.available_of_type(&entry.resource_type) {
                if self.pool.try_reserve(resource_id) {
                    return self.commit(entry, resource_id).map(Some);
                }
                record_race(&entry.resource_type);
                debug!(resource_id = %resource_id, "Reservation race lost, trying next resource");
            }

            entry.unclaim();

            // A release that ran while we held the claim skipped this request; its resource is
            // still available and we pick it up on the next round.
            if self.pool.available_of_type(&entry.resource_type).is_empty() {
                break;
            }
        }

        debug!("No resource available, request stays queued");
        Ok(None)
    }

    /// Try to hand a just-freed (or newly registered) resource to the first waiting request of
    /// its type. If another pass reserves the resource first, the candidate is released untouched
    /// and the resource is left to that pass.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub fn match_resource(&self, resource_id: ResourceId) -> Result<Option<Allocation>> {
        let Some(resource) = self.pool.get(resource_id) else {
            return Ok(None);
        };
        if resource.status != ResourceStatus::Available {
            return Ok(None);
        }

        for candidate in self.queue.peek_candidates(&resource.resource_type) {
            if !candidate.try_claim() {
                continue;
            }

            if self.pool.try_reserve(resource_id) {
                return self.commit(&candidate, resource_id).map(Some);
            }

            candidate.unclaim();
            record_race(&resource.resource_type);
            debug!("Resource taken by a concurrent pass");
            return Ok(None);
        }

        Ok(None)
    }

    /// Finish a pairing. The caller holds the request's claim and the resource's reservation.
    ///
    /// The request moves to allocated inside the ledger's critical section, so a release can
    /// never find an active allocation whose request is still queued. On failure the reservation
    /// is given back, and so is the claim if the request is still waiting.
    fn commit(&self, entry: &Arc<QueueEntry>, resource_id: ResourceId) -> Result<Allocation> {
        let Some(queued) = self.requests.get(entry.request_id).ok().and_then(|r| r.into_queued()) else {
            let e = AllocationError::InvariantViolation(format!("request {} matched but not queued", entry.request_id));
            error!(error = %e, "Matched request is not in queued state");
            // Stale entry: the request has already left the queue
            self.queue.remove(entry.request_id);
            self.abandon(resource_id);
            return Err(e);
        };

        let recorded = self.ledger.record_allocation(
            entry.request_id,
            resource_id,
            entry.resource_type.clone(),
            Utc::now(),
            |allocation| queued.allocate(allocation, self.requests),
        );
        let (allocation, allocated) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                error!(error = %e, "Allocation ledger rejected a committed pairing");
                self.abandon(resource_id);
                entry.unclaim();
                return Err(e);
            }
        };
        self.queue.remove(entry.request_id);

        metrics::counter!("alloctl_allocations_total", "resource_type" => entry.resource_type.to_string()).increment(1);
        info!(
            allocation_id = %allocation.id,
            request_id = %allocated.data.id,
            resource_id = %resource_id,
            priority = %allocated.data.priority,
            "Allocated resource"
        );

        Ok(allocation)
    }

    /// Hand back a reservation that will not be committed.
    fn abandon(&self, resource_id: ResourceId) {
        if let Err(e) = self.pool.release(resource_id) {
            error!(resource_id = %resource_id, error = %e, "Failed to return reserved resource");
        }
    }
}

fn record_race(resource_type: &crate::types::ResourceType) {
    metrics::counter!("alloctl_match_races_total", "resource_type" => resource_type.to_string()).increment(1);
}
