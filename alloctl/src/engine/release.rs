//! Release coordinator.
//!
//! Closing an allocation touches three components. The ledger entry and the request are closed
//! together under the ledger's lock (the ledger is the only place that can say `AlreadyClosed`),
//! then the resource is freed. Only after the resource is free again does the matcher get one
//! supply-driven pass for it.

use chrono::Utc;
use tracing::{error, info, instrument};

use super::error::{AllocationError, Result};
use super::ledger::Allocation;
use super::matcher::Matcher;
use super::pool::ResourceStatus;
use crate::types::AllocationId;

/// What a release did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// The allocation that was closed
    pub released: Allocation,
    /// The allocation the freed resource was immediately handed to, if any
    pub reallocated: Option<Allocation>,
}

pub struct ReleaseCoordinator<'a> {
    pub(super) matcher: Matcher<'a>,
}

impl ReleaseCoordinator<'_> {
    /// Release an active allocation and offer the resource to the queue exactly once.
    ///
    /// # Errors
    /// - `NotFound` if the allocation does not exist
    /// - `AlreadyClosed` if it was already released; nothing is changed
    #[instrument(skip(self), fields(allocation_id = %allocation_id))]
    pub fn release(&self, allocation_id: AllocationId) -> Result<ReleaseOutcome> {
        let Matcher {
            pool, ledger, requests, ..
        } = &self.matcher;

        // The ledger serialises concurrent releases of the same allocation: one closes it, the
        // rest see AlreadyClosed before touching anything else.
        let (released, _) = ledger.close_allocation(allocation_id, Utc::now(), |closed| {
            let allocated = requests.get(closed.request_id)?.into_allocated().ok_or_else(|| {
                let e = AllocationError::InvariantViolation(format!(
                    "allocation {allocation_id} was active but request {} is not allocated",
                    closed.request_id
                ));
                error!(error = %e, "Request state disagrees with the ledger");
                e
            })?;
            allocated.release(closed.released_at.unwrap_or(closed.allocated_at), requests)
        })?;

        let resource_status = pool
            .release(released.resource_id)
            .inspect_err(|e| error!(error = %e, "Resource state disagrees with the ledger"))?;

        metrics::counter!("alloctl_releases_total", "resource_type" => released.resource_type.to_string()).increment(1);
        info!(
            request_id = %released.request_id,
            resource_id = %released.resource_id,
            resource_status = %resource_status,
            "Released allocation"
        );

        let reallocated = if resource_status == ResourceStatus::Available {
            self.matcher.match_resource(released.resource_id)?
        } else {
            None
        };

        Ok(ReleaseOutcome { released, reallocated })
    }
}
