//! API request/response models for allocations and releases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use utoipa::ToSchema;

use crate::engine::AllocationDetail;
use crate::engine::release::ReleaseOutcome;
use crate::types::{AllocationId, RequestId, ResourceId};

/// An allocation joined with the request it serves.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AllocationResponse {
    #[schema(value_type = u64)]
    pub id: AllocationId,
    #[schema(value_type = u64)]
    pub request_id: RequestId,
    /// Name given on the request
    pub name: String,
    /// Priority the request was submitted with
    pub priority: u8,
    pub resource_type: String,
    #[schema(value_type = u64)]
    pub resource_id: ResourceId,
    pub allocated_at: DateTime<Utc>,
    /// `null` while the allocation is active
    pub released_at: Option<DateTime<Utc>>,
}

impl From<AllocationDetail> for AllocationResponse {
    fn from(detail: AllocationDetail) -> Self {
        let AllocationDetail {
            allocation,
            name,
            priority,
        } = detail;
        Self {
            id: allocation.id,
            request_id: allocation.request_id,
            name,
            priority: priority.get(),
            resource_type: allocation.resource_type.to_string(),
            resource_id: allocation.resource_id,
            allocated_at: allocation.allocated_at,
            released_at: allocation.released_at,
        }
    }
}

/// Body of `POST /api/release`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReleaseRequest {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[schema(value_type = u64, example = 12)]
    pub allocation_id: u64,
}

/// Response of `POST /api/release`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReleaseResponse {
    /// Always `released`
    #[schema(example = "released")]
    pub status: String,
    #[schema(value_type = u64)]
    pub allocation_id: AllocationId,
    /// Allocation the freed resource was immediately handed to, if anyone was waiting
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<u64>)]
    pub reallocated_allocation_id: Option<AllocationId>,
}

impl From<ReleaseOutcome> for ReleaseResponse {
    fn from(outcome: ReleaseOutcome) -> Self {
        Self {
            status: "released".to_string(),
            allocation_id: outcome.released.id,
            reallocated_allocation_id: outcome.reallocated.map(|a| a.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_release_request_accepts_number_or_string() {
        let from_number: ReleaseRequest = serde_json::from_value(json!({ "allocation_id": 7 })).unwrap();
        let from_string: ReleaseRequest = serde_json::from_value(json!({ "allocation_id": "7" })).unwrap();
        assert_eq!(from_number.allocation_id, 7);
        assert_eq!(from_string.allocation_id, 7);

        assert!(serde_json::from_value::<ReleaseRequest>(json!({})).is_err());
    }
}
