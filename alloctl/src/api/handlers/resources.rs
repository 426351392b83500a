use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::resources::{ResourceCreate, ResourceResponse},
    errors::Result,
    types::{ResourceId, ResourceType},
};

#[utoipa::path(
    get,
    path = "/api/resources",
    tag = "resources",
    summary = "List resources",
    responses(
        (status = 200, description = "All resources by id", body = Vec<ResourceResponse>),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_resources(State(state): State<AppState>) -> Result<Json<Vec<ResourceResponse>>> {
    let resources = state.engine.list_resources().into_iter().map(ResourceResponse::from).collect();
    Ok(Json(resources))
}

/// Register a resource. The new resource is offered to the queue immediately, so the response
/// may already show it allocated.
#[utoipa::path(
    post,
    path = "/api/resources",
    tag = "resources",
    summary = "Register resource",
    request_body = ResourceCreate,
    responses(
        (status = 201, description = "Resource registered", body = ResourceResponse),
        (status = 400, description = "Invalid resource type"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_resource(
    State(state): State<AppState>,
    Json(create): Json<ResourceCreate>,
) -> Result<(StatusCode, Json<ResourceResponse>)> {
    let resource = state
        .engine
        .register_resource(ResourceType::from(create.resource_type), create.label)?;
    Ok((StatusCode::CREATED, Json(ResourceResponse::from(resource))))
}

/// Take a resource out of service. An allocated resource stays with its holder and retires on
/// release.
#[utoipa::path(
    post,
    path = "/api/resources/{resource_id}/offline",
    tag = "resources",
    summary = "Take resource offline",
    responses(
        (status = 200, description = "Resource updated", body = ResourceResponse),
        (status = 404, description = "Resource not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("resource_id" = u64, Path, description = "Resource ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn set_resource_offline(
    State(state): State<AppState>,
    Path(resource_id): Path<ResourceId>,
) -> Result<Json<ResourceResponse>> {
    let resource = state.engine.set_resource_offline(resource_id)?;
    Ok(Json(ResourceResponse::from(resource)))
}

#[utoipa::path(
    post,
    path = "/api/resources/{resource_id}/online",
    tag = "resources",
    summary = "Bring resource online",
    responses(
        (status = 200, description = "Resource updated", body = ResourceResponse),
        (status = 404, description = "Resource not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("resource_id" = u64, Path, description = "Resource ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn set_resource_online(
    State(state): State<AppState>,
    Path(resource_id): Path<ResourceId>,
) -> Result<Json<ResourceResponse>> {
    let resource = state.engine.set_resource_online(resource_id)?;
    Ok(Json(ResourceResponse::from(resource)))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::{requests::RequestCreated, resources::ResourceResponse},
        engine::{pool::ResourceStatus, request::RequestStatus},
        test_utils::*,
        types::ResourceId,
    };
    use axum::http::StatusCode;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_list_seeded_resources() {
        let (app, _bg_services) = create_test_app().await;

        let response = app.get("/api/resources").await;
        response.assert_status_ok();
        let resources: Vec<ResourceResponse> = response.json();

        let labels: Vec<_> = resources.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["ICU_BED-1", "ICU_BED-2", "VENTILATOR-1"]);
        assert!(resources.iter().all(|r| r.status == ResourceStatus::Available));
        assert_eq!(resources[0].id, ResourceId(1));
    }

    #[test_log::test(tokio::test)]
    async fn test_new_resource_serves_waiting_request() {
        let (app, _bg_services) = create_test_app().await;

        app.post("/api/request").json(&json!({ "resource_type": "VENTILATOR" })).await;
        let waiting: RequestCreated = app
            .post("/api/request")
            .json(&json!({ "resource_type": "VENTILATOR" }))
            .await
            .json();
        assert_eq!(waiting.status, RequestStatus::Queued);

        let response = app
            .post("/api/resources")
            .json(&json!({ "resource_type": "VENTILATOR", "label": "vent-east" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let resource: ResourceResponse = response.json();
        assert_eq!(resource.label, "vent-east");
        assert_eq!(resource.status, ResourceStatus::Allocated);
    }

    #[test_log::test(tokio::test)]
    async fn test_create_resource_rejects_blank_type() {
        let (app, _bg_services) = create_test_app().await;
        app.post("/api/resources")
            .json(&json!({ "resource_type": "  " }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn test_offline_and_online() {
        let (app, _bg_services) = create_test_app().await;

        let response = app.post("/api/resources/3/offline").await;
        response.assert_status_ok();
        let resource: ResourceResponse = response.json();
        assert_eq!(resource.status, ResourceStatus::Offline);

        // Nothing to match against while the only ventilator is offline
        let queued: RequestCreated = app
            .post("/api/request")
            .json(&json!({ "resource_type": "VENTILATOR" }))
            .await
            .json();
        assert_eq!(queued.status, RequestStatus::Queued);

        let resource: ResourceResponse = app.post("/api/resources/3/online").await.json();
        assert_eq!(resource.status, ResourceStatus::Allocated);

        app.post("/api/resources/77/offline").await.assert_status_not_found();
    }
}
