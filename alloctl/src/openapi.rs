//! OpenAPI documentation for the `/api` endpoints, served through Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::engine::{pool::ResourceStatus, request::RequestStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::requests::create_request,
        api::handlers::requests::list_requests,
        api::handlers::requests::get_request,
        api::handlers::requests::cancel_request,
        api::handlers::resources::list_resources,
        api::handlers::resources::create_resource,
        api::handlers::resources::set_resource_offline,
        api::handlers::resources::set_resource_online,
        api::handlers::allocations::list_allocations,
        api::handlers::allocations::allocation_history,
        api::handlers::allocations::release_allocation,
    ),
    components(
        schemas(
            api::models::requests::RequestCreate,
            api::models::requests::RequestCreated,
            api::models::requests::RequestResponse,
            api::models::resources::ResourceCreate,
            api::models::resources::ResourceResponse,
            api::models::allocations::AllocationResponse,
            api::models::allocations::ReleaseRequest,
            api::models::allocations::ReleaseResponse,
            RequestStatus,
            ResourceStatus,
        )
    ),
    tags(
        (name = "requests", description = "Submit requests for resources and follow them through the queue."),
        (name = "resources", description = "The resource pool. Operators can register resources and take them in or out of service."),
        (name = "allocations", description = "Active allocations, allocation history and release."),
    ),
    info(
        title = "alloctl API",
        version = "1.0.0",
        description = "Matches prioritized requests against a typed pool of scarce resources.

Requests are served in priority order (1 is most urgent), oldest first within a priority. Waiting
requests gain one priority step per configured aging interval. Releasing an allocation hands the
freed resource to the most urgent waiter of the same type.",
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().map(String::as_str).collect();

        for expected in [
            "/api/request",
            "/api/requests",
            "/api/requests/{request_id}",
            "/api/requests/{request_id}/cancel",
            "/api/resources",
            "/api/resources/{resource_id}/offline",
            "/api/resources/{resource_id}/online",
            "/api/allocations",
            "/api/allocations/history",
            "/api/release",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
