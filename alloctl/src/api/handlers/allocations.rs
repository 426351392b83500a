use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::allocations::{AllocationResponse, ReleaseRequest, ReleaseResponse},
    errors::Result,
    types::AllocationId,
};

#[utoipa::path(
    get,
    path = "/api/allocations",
    tag = "allocations",
    summary = "List active allocations",
    responses(
        (status = 200, description = "Active allocations by id", body = Vec<AllocationResponse>),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_allocations(State(state): State<AppState>) -> Result<Json<Vec<AllocationResponse>>> {
    let allocations = state
        .engine
        .list_active_allocations()
        .into_iter()
        .map(AllocationResponse::from)
        .collect();
    Ok(Json(allocations))
}

#[utoipa::path(
    get,
    path = "/api/allocations/history",
    tag = "allocations",
    summary = "Allocation history",
    responses(
        (status = 200, description = "Every allocation, including released ones", body = Vec<AllocationResponse>),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn allocation_history(State(state): State<AppState>) -> Result<Json<Vec<AllocationResponse>>> {
    let allocations = state
        .engine
        .allocation_history()
        .into_iter()
        .map(AllocationResponse::from)
        .collect();
    Ok(Json(allocations))
}

/// Release an allocation. The freed resource goes to the most urgent waiter of its type, if any.
#[utoipa::path(
    post,
    path = "/api/release",
    tag = "allocations",
    summary = "Release allocation",
    request_body = ReleaseRequest,
    responses(
        (status = 200, description = "Allocation released", body = ReleaseResponse),
        (status = 404, description = "Allocation not found"),
        (status = 409, description = "Allocation already released"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn release_allocation(
    State(state): State<AppState>,
    Json(release): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>> {
    let outcome = state.engine.release(AllocationId::from(release.allocation_id))?;
    Ok(Json(ReleaseResponse::from(outcome)))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::{
            allocations::{AllocationResponse, ReleaseResponse},
            requests::{RequestCreated, RequestResponse},
            resources::ResourceResponse,
        },
        engine::{pool::ResourceStatus, request::RequestStatus},
        test_utils::*,
        types::AllocationId,
    };
    use axum::http::StatusCode;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_release_hands_bed_to_most_urgent_waiter() {
        let (app, _bg_services) = create_test_app().await;

        let first: RequestCreated = app.post("/api/request").json(&json!({ "name": "first" })).await.json();
        app.post("/api/request").json(&json!({ "name": "second" })).await;
        let routine: RequestCreated = app
            .post("/api/request")
            .json(&json!({ "name": "routine", "priority": 4 }))
            .await
            .json();
        let urgent: RequestCreated = app
            .post("/api/request")
            .json(&json!({ "name": "urgent", "priority": "1" }))
            .await
            .json();
        assert_eq!(routine.status, RequestStatus::Queued);
        assert_eq!(urgent.status, RequestStatus::Queued);

        let allocation_id = first.allocation_id.unwrap();
        let response = app
            .post("/api/release")
            .json(&json!({ "allocation_id": allocation_id.to_string() }))
            .await;
        response.assert_status_ok();
        let released: ReleaseResponse = response.json();
        assert_eq!(released.status, "released");
        assert_eq!(released.allocation_id, allocation_id);
        assert!(released.reallocated_allocation_id.is_some());

        let urgent: RequestResponse = app.get(&format!("/api/requests/{}", urgent.request_id)).await.json();
        assert_eq!(urgent.status, RequestStatus::Allocated);
        let routine: RequestResponse = app.get(&format!("/api/requests/{}", routine.request_id)).await.json();
        assert_eq!(routine.status, RequestStatus::Queued);

        let active: Vec<AllocationResponse> = app.get("/api/allocations").await.json();
        let names: Vec<_> = active.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["second", "urgent"]);
        assert!(active.iter().all(|a| a.released_at.is_none()));
    }

    #[test_log::test(tokio::test)]
    async fn test_release_without_waiters_frees_resource() {
        let (app, _bg_services) = create_test_app().await;

        let created: RequestCreated = app
            .post("/api/request")
            .json(&json!({ "resource_type": "VENTILATOR" }))
            .await
            .json();
        let allocation_id = created.allocation_id.unwrap();

        let released: ReleaseResponse = app
            .post("/api/release")
            .json(&json!({ "allocation_id": allocation_id.get() }))
            .await
            .json();
        assert!(released.reallocated_allocation_id.is_none());

        let resources: Vec<ResourceResponse> = app.get("/api/resources").await.json();
        assert!(resources.iter().all(|r| r.status == ResourceStatus::Available));

        let active: Vec<AllocationResponse> = app.get("/api/allocations").await.json();
        assert!(active.is_empty());

        let history: Vec<AllocationResponse> = app.get("/api/allocations/history").await.json();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, allocation_id);
        assert!(history[0].released_at.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn test_release_errors() {
        let (app, _bg_services) = create_test_app().await;

        let created: RequestCreated = app.post("/api/request").json(&json!({})).await.json();
        let allocation_id = created.allocation_id.unwrap();
        app.post("/api/release")
            .json(&json!({ "allocation_id": allocation_id.get() }))
            .await
            .assert_status_ok();

        let response = app
            .post("/api/release")
            .json(&json!({ "allocation_id": allocation_id.get() }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: serde_json::Value = response.json();
        assert!(body["message"].as_str().unwrap().contains("already closed"));

        app.post("/api/release")
            .json(&json!({ "allocation_id": 404 }))
            .await
            .assert_status_not_found();

        let history: Vec<AllocationResponse> = app.get("/api/allocations/history").await.json();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, AllocationId(1));
    }
}
