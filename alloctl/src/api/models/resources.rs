//! API request/response models for resources.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::pool::{ResourceSnapshot, ResourceStatus};
use crate::types::ResourceId;

/// A resource and its current status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceResponse {
    #[schema(value_type = u64)]
    pub id: ResourceId,
    #[schema(example = "ICU_BED-1")]
    pub label: String,
    #[schema(example = "ICU_BED")]
    pub resource_type: String,
    pub status: ResourceStatus,
}

impl From<ResourceSnapshot> for ResourceResponse {
    fn from(snapshot: ResourceSnapshot) -> Self {
        Self {
            id: snapshot.id,
            label: snapshot.label,
            resource_type: snapshot.resource_type.to_string(),
            status: snapshot.status,
        }
    }
}

/// Body of `POST /api/resources`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResourceCreate {
    #[schema(example = "VENTILATOR")]
    pub resource_type: String,
    /// Defaults to `{resource_type}-{n}`
    #[schema(example = "VENTILATOR-3")]
    pub label: Option<String>,
}
