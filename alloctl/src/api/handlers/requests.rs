use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::requests::{RequestCreate, RequestCreated, RequestResponse},
    errors::Result,
    types::RequestId,
};

/// Submit a request for a resource.
///
/// The request is matched straight away when a resource of its type is free; otherwise it waits
/// in the queue until a release, a new resource or the scheduler serves it.
#[utoipa::path(
    post,
    path = "/api/request",
    tag = "requests",
    summary = "Submit request",
    request_body = RequestCreate,
    responses(
        (status = 201, description = "Request accepted", body = RequestCreated),
        (status = 400, description = "Invalid priority, duration or resource type"),
        (status = 422, description = "Malformed body"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_request(
    State(state): State<AppState>,
    Json(create): Json<RequestCreate>,
) -> Result<(StatusCode, Json<RequestCreated>)> {
    let outcome = state.engine.submit(create.into())?;
    Ok((StatusCode::CREATED, Json(RequestCreated::from(outcome))))
}

#[utoipa::path(
    get,
    path = "/api/requests",
    tag = "requests",
    summary = "List requests",
    responses(
        (status = 200, description = "All requests in arrival order", body = Vec<RequestResponse>),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_requests(State(state): State<AppState>) -> Result<Json<Vec<RequestResponse>>> {
    let requests = state.engine.list_requests().into_iter().map(RequestResponse::from).collect();
    Ok(Json(requests))
}

#[utoipa::path(
    get,
    path = "/api/requests/{request_id}",
    tag = "requests",
    summary = "Get request",
    responses(
        (status = 200, description = "Request details", body = RequestResponse),
        (status = 404, description = "Request not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("request_id" = u64, Path, description = "Request ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_request(State(state): State<AppState>, Path(request_id): Path<RequestId>) -> Result<Json<RequestResponse>> {
    let request = state.engine.get_request(request_id)?;
    Ok(Json(RequestResponse::from(request)))
}

/// Withdraw a request that is still waiting.
#[utoipa::path(
    post,
    path = "/api/requests/{request_id}/cancel",
    tag = "requests",
    summary = "Cancel request",
    responses(
        (status = 200, description = "Request cancelled", body = RequestResponse),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request is no longer queued"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("request_id" = u64, Path, description = "Request ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn cancel_request(
    State(state): State<AppState>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<RequestResponse>> {
    let cancelled = state.engine.cancel(request_id)?;
    Ok(Json(RequestResponse::from(cancelled)))
}
