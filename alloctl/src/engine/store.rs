//! In-memory request store.
//!
//! Keeps every request ever accepted, in whatever state it is currently in. Requests are never
//! removed; the store is the append-only history of demand. Writes go through
//! [`RequestStore::persist`], which rejects anything that is not a legal lifecycle step.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::error::{AllocationError, Result};
use super::request::{AnyRequest, Queued, Request, RequestState, RequestStatus};
use crate::types::RequestId;

/// Registry of requests keyed by id.
#[derive(Debug, Default)]
pub struct RequestStore {
    requests: RwLock<BTreeMap<RequestId, AnyRequest>>,
}

fn is_legal_transition(from: RequestStatus, to: RequestStatus) -> bool {
    matches!(
        (from, to),
        (RequestStatus::Queued, RequestStatus::Allocated)
            | (RequestStatus::Queued, RequestStatus::Cancelled)
            | (RequestStatus::Allocated, RequestStatus::Released)
    )
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a newly accepted request.
    ///
    /// # Errors
    /// - `DuplicateId` if a request with the same id exists
    pub fn insert(&self, request: Request<Queued>) -> Result<()> {
        let id = request.data.id;
        let mut requests = self.requests.write();
        if requests.contains_key(&id) {
            return Err(AllocationError::DuplicateId {
                kind: "Request",
                id: id.to_string(),
            });
        }
        requests.insert(id, request.into());
        Ok(())
    }

    /// Record a request's new state.
    ///
    /// # Errors
    /// - `NotFound` if the request was never inserted
    /// - `InvalidState` if the stored state cannot move to the new one (e.g. a terminal request)
    pub fn persist<T: RequestState + Clone>(&self, request: &Request<T>) -> Result<()>
    where
        AnyRequest: From<Request<T>>,
    {
        let id = request.data.id;
        let next = AnyRequest::from(request.clone());

        let mut requests = self.requests.write();
        let existing = requests.get_mut(&id).ok_or_else(|| AllocationError::not_found("Request", id))?;

        if !is_legal_transition(existing.status(), next.status()) {
            return Err(AllocationError::invalid_state(
                "Request",
                id,
                "a state that can transition",
                format!("{} (attempted {})", existing.status(), next.status()),
            ));
        }

        *existing = next;
        Ok(())
    }

    pub fn get(&self, id: RequestId) -> Result<AnyRequest> {
        self.requests
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| AllocationError::not_found("Request", id))
    }

    /// All requests ordered by arrival (requested-at, then id).
    pub fn list(&self) -> Vec<AnyRequest> {
        let mut all: Vec<AnyRequest> = self.requests.read().values().cloned().collect();
        all.sort_by_key(|r| (r.data().requested_at, r.id()));
        all
    }

    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }

    /// Number of requests currently in `status`.
    pub fn count_with_status(&self, status: RequestStatus) -> usize {
        self.requests.read().values().filter(|r| r.status() == status).count()
    }
}
