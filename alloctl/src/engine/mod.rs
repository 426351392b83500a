//! Allocation engine.
//!
//! [`AllocationEngine`] owns the process-wide allocation state and is shared between the HTTP
//! handlers and the background scheduler behind an `Arc`. All operations are synchronous and
//! lock-light: resource status and queue claims are atomics, the remaining locks guard short
//! critical sections. The one nesting is the ledger lock around a request store update, so that
//! an allocation and its request change state together.
//!
//! Components, leaf first:
//! - [`pool::ResourcePool`]: registered resources and their status
//! - [`queue::PriorityQueue`]: waiting requests, per-type lanes ordered by priority then arrival
//! - [`ledger::AllocationLedger`]: append-only allocation records
//! - [`store::RequestStore`]: every request in its current lifecycle state
//! - [`matcher::Matcher`]: pairs requests with resources
//! - [`release::ReleaseCoordinator`]: closes allocations and offers the freed resource back

pub mod error;
pub mod ledger;
pub mod matcher;
pub mod pool;
pub mod queue;
pub mod release;
pub mod request;
pub mod store;


use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::types::{AllocationId, IdSequence, Priority, RequestId, ResourceId, ResourceType};
use error::{AllocationError, Result};
use ledger::{Allocation, AllocationLedger};
use matcher::Matcher;
use pool::{Resource, ResourcePool, ResourceSnapshot, ResourceStatus};
use queue::PriorityQueue;
use release::{ReleaseCoordinator, ReleaseOutcome};
use request::{AnyRequest, Queued, Request, RequestData, RequestStatus};
use store::RequestStore;

/// Display name used when a request arrives without one.
pub const DEFAULT_REQUEST_NAME: &str = "Anonymous";
/// Estimated holding time used when a request arrives without one.
pub const DEFAULT_EST_MINUTES: u32 = 60;

/// Engine settings derived from the service configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Type assigned to requests that do not name one
    pub default_resource_type: ResourceType,
    /// Waiting time per one-step priority promotion; `None` disables aging
    pub aging_interval: Option<chrono::Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_resource_type: ResourceType::from("ICU_BED"),
            aging_interval: Some(chrono::Duration::seconds(60)),
        }
    }
}

/// Unvalidated intake payload. Missing fields take the service defaults.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub name: Option<String>,
    pub priority: Option<i64>,
    pub est_minutes: Option<i64>,
    pub resource_type: Option<String>,
}

/// Result of accepting a request.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub request_id: RequestId,
    /// `allocated` when served immediately, `queued` otherwise
    pub status: RequestStatus,
    pub allocation: Option<Allocation>,
}

/// An allocation joined with the request it serves.
#[derive(Debug, Clone)]
pub struct AllocationDetail {
    pub allocation: Allocation,
    pub name: String,
    pub priority: Priority,
}

/// What one scheduler sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Queue entries whose effective priority improved
    pub promoted: usize,
    /// Allocations made by supply-driven matching
    pub allocated: usize,
}

/// Point-in-time sizes, for gauges.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub queue_depth: HashMap<ResourceType, usize>,
    pub resources: BTreeMap<(ResourceType, ResourceStatus), usize>,
    pub active_allocations: usize,
}

#[derive(Debug, Default)]
pub struct AllocationEngine {
    config: EngineConfig,
    pub(crate) pool: ResourcePool,
    queue: PriorityQueue,
    ledger: AllocationLedger,
    requests: RequestStore,
    request_ids: IdSequence,
    resource_ids: IdSequence,
}

impl AllocationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn matcher(&self) -> Matcher<'_> {
        Matcher {
            pool: &self.pool,
            queue: &self.queue,
            ledger: &self.ledger,
            requests: &self.requests,
        }
    }

    // ------------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------------

    /// Add a resource to the pool and offer it to the queue.
    ///
    /// Without a label the resource is named `{type}-{n}`, `n` counting resources of that type.
    #[instrument(skip(self, label), fields(resource_type = %resource_type))]
    pub fn register_resource(&self, resource_type: ResourceType, label: Option<String>) -> Result<ResourceSnapshot> {
        if resource_type.as_str().trim().is_empty() {
            return Err(AllocationError::Validation("resource_type must not be empty".to_string()));
        }

        let id: ResourceId = self.resource_ids.next();
        let label = match label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) {
            Some(label) => label,
            None => format!("{resource_type}-{}", self.pool.list_by_type(&resource_type).len() + 1),
        };

        let registered = self.pool.register(Resource {
            id,
            label,
            resource_type,
        })?;
        info!(resource_id = %id, label = %registered.label, "Registered resource");

        self.matcher().match_resource(id)?;
        self.pool.get(id).ok_or_else(|| AllocationError::not_found("Resource", id))
    }

    /// Take a resource out of matching. An allocated resource finishes its allocation first.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub fn set_resource_offline(&self, resource_id: ResourceId) -> Result<ResourceSnapshot> {
        let snapshot = self.pool.set_offline(resource_id)?;
        if self.pool.is_retiring(resource_id) {
            info!("Resource will go offline when its allocation is released");
        } else {
            info!("Resource offline");
        }
        Ok(snapshot)
    }

    /// Return a resource to matching and offer it to the queue.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub fn set_resource_online(&self, resource_id: ResourceId) -> Result<ResourceSnapshot> {
        let snapshot = self.pool.set_online(resource_id)?;
        info!(status = %snapshot.status, "Resource online");
        if snapshot.status == ResourceStatus::Available {
            self.matcher().match_resource(resource_id)?;
        }
        self.pool
            .get(resource_id)
            .ok_or_else(|| AllocationError::not_found("Resource", resource_id))
    }

    pub fn get_resource(&self, resource_id: ResourceId) -> Result<ResourceSnapshot> {
        self.pool
            .get(resource_id)
            .ok_or_else(|| AllocationError::not_found("Resource", resource_id))
    }

    /// All resources, by id.
    pub fn list_resources(&self) -> Vec<ResourceSnapshot> {
        self.pool.list()
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        let types: BTreeSet<ResourceType> = self.pool.list().into_iter().map(|r| r.resource_type).collect();
        types.into_iter().collect()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    fn validate(&self, new: NewRequest) -> Result<RequestData> {
        let name = new
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_REQUEST_NAME.to_string());

        let priority = match new.priority {
            None => Priority::DEFAULT,
            Some(raw) => u8::try_from(raw).ok().and_then(Priority::new).ok_or_else(|| {
                AllocationError::Validation(format!(
                    "priority must be between {} and {}, got {raw}",
                    Priority::HIGHEST.get(),
                    Priority::LOWEST.get()
                ))
            })?,
        };

        let est_minutes = match new.est_minutes {
            None => DEFAULT_EST_MINUTES,
            Some(raw) => u32::try_from(raw)
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| AllocationError::Validation(format!("est_minutes must be a positive integer, got {raw}")))?,
        };

        let resource_type = new
            .resource_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(ResourceType::from)
            .unwrap_or_else(|| self.config.default_resource_type.clone());
        if !self.pool.contains_type(&resource_type) {
            return Err(AllocationError::UnknownResourceType(resource_type));
        }

        Ok(RequestData {
            id: self.request_ids.next(),
            name,
            priority,
            est_minutes,
            resource_type,
            requested_at: Utc::now(),
        })
    }

    /// Accept a request and try to serve it immediately.
    ///
    /// # Errors
    /// - `Validation` / `UnknownResourceType` for bad input; nothing is created
    #[instrument(skip_all, fields(request_id, resource_type))]
    pub fn submit(&self, new: NewRequest) -> Result<SubmitOutcome> {
        let data = self.validate(new).inspect_err(|e| debug!(error = %e, "Rejected request"))?;
        let span = tracing::Span::current();
        span.record("request_id", data.id.get());
        span.record("resource_type", data.resource_type.as_str());

        let request = Request {
            state: Queued {},
            data,
        };
        self.requests.insert(request.clone())?;
        let entry = self.queue.enqueue(&request)?;

        metrics::counter!("alloctl_requests_submitted_total", "resource_type" => request.data.resource_type.to_string())
            .increment(1);
        info!(priority = %request.data.priority, name = %request.data.name, "Accepted request");

        let allocation = self.matcher().match_request(&entry)?;
        let status = if allocation.is_some() {
            RequestStatus::Allocated
        } else {
            // Another pass may have served it between enqueue and our own attempt
            self.requests.get(request.data.id)?.status()
        };

        Ok(SubmitOutcome {
            request_id: request.data.id,
            status,
            allocation,
        })
    }

    /// Withdraw a queued request.
    ///
    /// # Errors
    /// - `NotFound` for an unknown id
    /// - `InvalidState` if the request is not queued or a matcher pass is serving it right now
    #[instrument(skip(self), fields(request_id = %request_id))]
    pub fn cancel(&self, request_id: RequestId) -> Result<AnyRequest> {
        let current = self.requests.get(request_id)?;
        let Some(entry) = self.queue.get(request_id) else {
            return Err(AllocationError::invalid_state("Request", request_id, "queued", current.status()));
        };

        if !entry.try_claim() {
            return Err(AllocationError::invalid_state(
                "Request",
                request_id,
                "queued",
                "being allocated",
            ));
        }

        let Some(queued) = self.requests.get(request_id)?.into_queued() else {
            entry.unclaim();
            let status = self.requests.get(request_id)?.status();
            return Err(AllocationError::invalid_state("Request", request_id, "queued", status));
        };

        self.queue.remove(request_id);
        let cancelled = queued.cancel(&self.requests)?;
        info!("Cancelled request");
        Ok(cancelled.into())
    }

    pub fn get_request(&self, request_id: RequestId) -> Result<AnyRequest> {
        self.requests.get(request_id)
    }

    /// All requests ordered by arrival.
    pub fn list_requests(&self) -> Vec<AnyRequest> {
        self.requests.list()
    }

    // ------------------------------------------------------------------------
    // Allocations
    // ------------------------------------------------------------------------

    /// Release an allocation; the freed resource is offered to the queue once.
    pub fn release(&self, allocation_id: AllocationId) -> Result<ReleaseOutcome> {
        let coordinator = ReleaseCoordinator {
            matcher: self.matcher(),
        };
        coordinator
            .release(allocation_id)
            .inspect_err(|e| match e {
                AllocationError::InvariantViolation(_) => error!(error = %e, "Release failed"),
                _ => debug!(error = %e, "Release rejected"),
            })
    }

    pub fn get_allocation(&self, allocation_id: AllocationId) -> Result<Allocation> {
        self.ledger
            .get(allocation_id)
            .ok_or_else(|| AllocationError::not_found("Allocation", allocation_id))
    }

    fn detail(&self, allocation: Allocation) -> AllocationDetail {
        let (name, priority) = match self.requests.get(allocation.request_id) {
            Ok(request) => (request.data().name.clone(), request.data().priority),
            Err(e) => {
                warn!(allocation_id = %allocation.id, error = %e, "Allocation refers to a missing request");
                (String::new(), Priority::DEFAULT)
            }
        };
        AllocationDetail {
            allocation,
            name,
            priority,
        }
    }

    /// Active allocations by id, with the requesting name and priority.
    pub fn list_active_allocations(&self) -> Vec<AllocationDetail> {
        self.ledger.active().into_iter().map(|a| self.detail(a)).collect()
    }

    /// Every allocation ever made, by id.
    pub fn allocation_history(&self) -> Vec<AllocationDetail> {
        self.ledger.history().into_iter().map(|a| self.detail(a)).collect()
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Apply aging, then give every available resource a supply-driven matching pass.
    ///
    /// A failing pass is logged and the sweep moves on to the next resource.
    #[instrument(skip(self))]
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let promoted = self
            .config
            .aging_interval
            .map(|interval| self.queue.age(now, interval))
            .unwrap_or(0);

        let mut allocated = 0;
        if !self.queue.is_empty() {
            let matcher = self.matcher();
            for resource_id in self.pool.available() {
                match matcher.match_resource(resource_id) {
                    Ok(Some(_)) => allocated += 1,
                    Ok(None) => {}
                    Err(e) => error!(resource_id = %resource_id, error = %e, "Matching pass failed during sweep"),
                }
            }
        }

        if promoted > 0 || allocated > 0 {
            info!(promoted, allocated, "Sweep changed allocation state");
        }
        SweepReport { promoted, allocated }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            queue_depth: self.queue.depth_by_type(),
            resources: self.pool.status_counts(),
            active_allocations: self.ledger.active_count(),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}
