//! HTTP API.
//!
//! - **[`handlers`]**: axum route handlers
//! - **[`models`]**: request/response bodies
//!
//! The browser client's contract lives under `/api`: `POST /api/request`, `GET /api/resources`,
//! `GET /api/allocations`, `GET /api/requests` and `POST /api/release`. The remaining `/api` routes
//! are operator endpoints. OpenAPI documentation is served at `/docs`.

pub mod handlers;
pub mod models;
