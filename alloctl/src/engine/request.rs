//! Request lifecycle.
//!
//! Requests use the typestate pattern: a `Request<Queued>` can be allocated or cancelled, a
//! `Request<Allocated>` can only be released. Each transition persists the new state to the
//! [`RequestStore`] before returning it, so the store never holds a state that was not reached
//! through a legal transition.
//!
//! ```text
//! queued -> allocated -> released
//! queued -> cancelled
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::Result;
use super::ledger::Allocation;
use super::store::RequestStore;
use crate::types::{AllocationId, Priority, RequestId, ResourceId, ResourceType};

/// Marker trait for valid request states.
pub trait RequestState: Send + Sync {}

/// A request for one resource of a given type, in state `T`.
#[derive(Debug, Clone)]
pub struct Request<T: RequestState> {
    /// The current state of the request.
    pub state: T,
    /// The caller-supplied data, fixed at intake.
    pub data: RequestData,
}

/// Data captured when a request is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestData {
    pub id: RequestId,
    /// Display name (the patient, job or owner the resource is for)
    pub name: String,
    pub priority: Priority,
    /// Estimated holding time in minutes, always positive
    pub est_minutes: u32,
    pub resource_type: ResourceType,
    pub requested_at: DateTime<Utc>,
}

// ============================================================================
// Request States
// ============================================================================

/// Waiting in the priority queue.
#[derive(Debug, Clone)]
pub struct Queued {}

impl RequestState for Queued {}

/// Holding a resource through an active allocation.
#[derive(Debug, Clone)]
pub struct Allocated {
    pub allocation_id: AllocationId,
    pub resource_id: ResourceId,
    pub allocated_at: DateTime<Utc>,
}

impl RequestState for Allocated {}

/// Served; the allocation has been closed.
#[derive(Debug, Clone)]
pub struct Released {
    pub allocation_id: AllocationId,
    pub resource_id: ResourceId,
    pub allocated_at: DateTime<Utc>,
    pub released_at: DateTime<Utc>,
}

impl RequestState for Released {}

/// Withdrawn before it was served.
#[derive(Debug, Clone)]
pub struct Cancelled {
    pub cancelled_at: DateTime<Utc>,
}

impl RequestState for Cancelled {}

// ============================================================================
// Transitions
// ============================================================================

impl Request<Queued> {
    pub fn allocate(self, allocation: &Allocation, store: &RequestStore) -> Result<Request<Allocated>> {
        let request = Request {
            data: self.data,
            state: Allocated {
                allocation_id: allocation.id,
                resource_id: allocation.resource_id,
                allocated_at: allocation.allocated_at,
            },
        };
        store.persist(&request)?;
        Ok(request)
    }

    pub fn cancel(self, store: &RequestStore) -> Result<Request<Cancelled>> {
        let request = Request {
            data: self.data,
            state: Cancelled {
                cancelled_at: Utc::now(),
            },
        };
        store.persist(&request)?;
        Ok(request)
    }
}

impl Request<Allocated> {
    pub fn release(self, released_at: DateTime<Utc>, store: &RequestStore) -> Result<Request<Released>> {
        let request = Request {
            data: self.data,
            state: Released {
                allocation_id: self.state.allocation_id,
                resource_id: self.state.resource_id,
                allocated_at: self.state.allocated_at,
                released_at,
            },
        };
        store.persist(&request)?;
        Ok(request)
    }
}

// ============================================================================
// Unified Request Representation
// ============================================================================

/// Externally visible request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Allocated,
    Released,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Allocated => "allocated",
            RequestStatus::Released => "released",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request in any state, as held by the store.
#[derive(Debug, Clone)]
pub enum AnyRequest {
    Queued(Request<Queued>),
    Allocated(Request<Allocated>),
    Released(Request<Released>),
    Cancelled(Request<Cancelled>),
}

impl AnyRequest {
    pub fn id(&self) -> RequestId {
        self.data().id
    }

    pub fn data(&self) -> &RequestData {
        match self {
            AnyRequest::Queued(r) => &r.data,
            AnyRequest::Allocated(r) => &r.data,
            AnyRequest::Released(r) => &r.data,
            AnyRequest::Cancelled(r) => &r.data,
        }
    }

    pub fn status(&self) -> RequestStatus {
        match self {
            AnyRequest::Queued(_) => RequestStatus::Queued,
            AnyRequest::Allocated(_) => RequestStatus::Allocated,
            AnyRequest::Released(_) => RequestStatus::Released,
            AnyRequest::Cancelled(_) => RequestStatus::Cancelled,
        }
    }

    /// Released and cancelled requests never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnyRequest::Released(_) | AnyRequest::Cancelled(_))
    }

    pub fn allocation_id(&self) -> Option<AllocationId> {
        match self {
            AnyRequest::Allocated(r) => Some(r.state.allocation_id),
            AnyRequest::Released(r) => Some(r.state.allocation_id),
            _ => None,
        }
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        match self {
            AnyRequest::Allocated(r) => Some(r.state.resource_id),
            AnyRequest::Released(r) => Some(r.state.resource_id),
            _ => None,
        }
    }

    pub fn allocated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyRequest::Allocated(r) => Some(r.state.allocated_at),
            AnyRequest::Released(r) => Some(r.state.allocated_at),
            _ => None,
        }
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyRequest::Released(r) => Some(r.state.released_at),
            _ => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyRequest::Cancelled(r) => Some(r.state.cancelled_at),
            _ => None,
        }
    }

    pub fn into_queued(self) -> Option<Request<Queued>> {
        match self {
            AnyRequest::Queued(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_allocated(self) -> Option<Request<Allocated>> {
        match self {
            AnyRequest::Allocated(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Request<Queued>> for AnyRequest {
    fn from(r: Request<Queued>) -> Self {
        AnyRequest::Queued(r)
    }
}

impl From<Request<Allocated>> for AnyRequest {
    fn from(r: Request<Allocated>) -> Self {
        AnyRequest::Allocated(r)
    }
}

impl From<Request<Released>> for AnyRequest {
    fn from(r: Request<Released>) -> Self {
        AnyRequest::Released(r)
    }
}

impl From<Request<Cancelled>> for AnyRequest {
    fn from(r: Request<Cancelled>) -> Self {
        AnyRequest::Cancelled(r)
    }
}
