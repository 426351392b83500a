//! HTTP request handlers for the `/api` endpoints.
//!
//! - [`requests`]: intake, listing and cancellation of allocation requests
//! - [`resources`]: the resource pool and operator controls
//! - [`allocations`]: active allocations, history and release
//!
//! Handlers call straight into the [`crate::engine::AllocationEngine`]; engine calls take short
//! in-memory locks and never block on I/O. Errors convert through [`crate::errors::Error`].

pub mod allocations;
pub mod requests;
pub mod resources;
