//! API request/response models for allocation requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use utoipa::ToSchema;

use crate::engine::request::{AnyRequest, RequestStatus};
use crate::engine::{NewRequest, SubmitOutcome};
use crate::types::{AllocationId, RequestId, ResourceId};

/// Body of `POST /api/request`. Every field is optional.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RequestCreate {
    /// Who or what the resource is for (default `Anonymous`)
    #[schema(example = "Jane Doe")]
    pub name: Option<String>,
    /// 1 (most urgent) to 5 (least urgent), default 3
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[schema(value_type = Option<i64>, minimum = 1, maximum = 5, example = 2)]
    pub priority: Option<i64>,
    /// Estimated holding time in minutes, default 60
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[schema(value_type = Option<i64>, minimum = 1, example = 90)]
    pub est_minutes: Option<i64>,
    /// Resource type to request; defaults to the configured default type
    #[schema(example = "ICU_BED")]
    pub resource_type: Option<String>,
}

impl From<RequestCreate> for NewRequest {
    fn from(create: RequestCreate) -> Self {
        NewRequest {
            name: create.name,
            priority: create.priority,
            est_minutes: create.est_minutes,
            resource_type: create.resource_type,
        }
    }
}

/// Response of `POST /api/request`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestCreated {
    #[schema(value_type = u64)]
    pub request_id: RequestId,
    /// `allocated` if a resource was free, otherwise `queued`
    pub status: RequestStatus,
    /// Present when the request was served immediately
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<u64>)]
    pub allocation_id: Option<AllocationId>,
}

impl From<SubmitOutcome> for RequestCreated {
    fn from(outcome: SubmitOutcome) -> Self {
        Self {
            request_id: outcome.request_id,
            status: outcome.status,
            allocation_id: outcome.allocation.map(|a| a.id),
        }
    }
}

/// A request and its current lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestResponse {
    #[schema(value_type = u64)]
    pub id: RequestId,
    pub name: String,
    #[schema(minimum = 1, maximum = 5)]
    pub priority: u8,
    pub est_minutes: u32,
    #[schema(value_type = String)]
    pub resource_type: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    #[schema(value_type = Option<u64>)]
    pub allocation_id: Option<AllocationId>,
    #[schema(value_type = Option<u64>)]
    pub resource_id: Option<ResourceId>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<AnyRequest> for RequestResponse {
    fn from(request: AnyRequest) -> Self {
        let data = request.data();
        Self {
            id: data.id,
            name: data.name.clone(),
            priority: data.priority.get(),
            est_minutes: data.est_minutes,
            resource_type: data.resource_type.to_string(),
            status: request.status(),
            requested_at: data.requested_at,
            allocation_id: request.allocation_id(),
            resource_id: request.resource_id(),
            allocated_at: request.allocated_at(),
            released_at: request.released_at(),
            cancelled_at: request.cancelled_at(),
        }
    }
}
