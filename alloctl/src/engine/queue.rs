//! Priority queue of waiting requests.
//!
//! Requests wait in one lane per resource type, ordered by [`QueueKey`]: effective priority, then
//! arrival time, then id. Every entry carries a claim flag. A matcher pass (or a cancellation) has
//! to win the claim before it may act on the entry, so a request is never part of two commits at
//! once even though candidate scans run concurrently and without removing anything.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::error::{AllocationError, Result};
use super::request::{Queued, Request};
use crate::types::{Priority, RequestId, ResourceType};

/// Position of an entry inside its lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    pub priority: Priority,
    pub requested_at: DateTime<Utc>,
    pub id: RequestId,
}

/// A waiting request.
#[derive(Debug)]
pub struct QueueEntry {
    pub request_id: RequestId,
    pub resource_type: ResourceType,
    /// Priority the request was submitted with.
    pub base_priority: Priority,
    pub requested_at: DateTime<Utc>,
    /// Priority after aging; only written while the lane lock is held.
    effective_priority: AtomicU8,
    claimed: AtomicBool,
}

impl QueueEntry {
    fn new(request: &Request<Queued>) -> Self {
        Self {
            request_id: request.data.id,
            resource_type: request.data.resource_type.clone(),
            base_priority: request.data.priority,
            requested_at: request.data.requested_at,
            effective_priority: AtomicU8::new(request.data.priority.get()),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn effective_priority(&self) -> Priority {
        Priority::new(self.effective_priority.load(Ordering::Acquire)).unwrap_or(self.base_priority)
    }

    pub fn key(&self) -> QueueKey {
        QueueKey {
            priority: self.effective_priority(),
            requested_at: self.requested_at,
            id: self.request_id,
        }
    }

    /// Take exclusive ownership of this entry. Returns `false` if someone else holds it.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the entry back after an unsuccessful match attempt.
    pub fn unclaim(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

type Lane = Mutex<BTreeMap<QueueKey, Arc<QueueEntry>>>;

/// Per-type ordered lanes plus an id index.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    lanes: DashMap<ResourceType, Arc<Lane>>,
    index: DashMap<RequestId, Arc<QueueEntry>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, resource_type: &ResourceType) -> Option<Arc<Lane>> {
        self.lanes.get(resource_type).map(|lane| lane.value().clone())
    }

    /// Insert a queued request at its sorted position.
    ///
    /// # Errors
    /// - `DuplicateId` if the request is already queued
    pub fn enqueue(&self, request: &Request<Queued>) -> Result<Arc<QueueEntry>> {
        let entry = Arc::new(QueueEntry::new(request));

        let lane = self
            .lanes
            .entry(entry.resource_type.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new())))
            .value()
            .clone();

        // Index and lane are updated under the lane lock so `remove` never sees half an entry
        let mut lane = lane.lock();
        match self.index.entry(entry.request_id) {
            Entry::Occupied(_) => {
                return Err(AllocationError::DuplicateId {
                    kind: "Queued request",
                    id: entry.request_id.to_string(),
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }
        lane.insert(entry.key(), entry.clone());

        Ok(entry)
    }

    pub fn get(&self, request_id: RequestId) -> Option<Arc<QueueEntry>> {
        self.index.get(&request_id).map(|entry| entry.value().clone())
    }

    /// Extract a specific request. Returns `None` if it is not queued.
    pub fn remove(&self, request_id: RequestId) -> Option<Arc<QueueEntry>> {
        let (_, entry) = self.index.remove(&request_id)?;
        if let Some(lane) = self.lane(&entry.resource_type) {
            let mut lane = lane.lock();
            lane.remove(&entry.key());
        }
        Some(entry)
    }

    /// Queued requests for `resource_type` in queue order, fetched lazily and without removal.
    pub fn peek_candidates(&self, resource_type: &ResourceType) -> Candidates {
        Candidates {
            lane: self.lane(resource_type),
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn len_of_type(&self, resource_type: &ResourceType) -> usize {
        self.lane(resource_type).map(|lane| lane.lock().len()).unwrap_or(0)
    }

    /// Queue depth per resource type.
    pub fn depth_by_type(&self) -> HashMap<ResourceType, usize> {
        self.lanes
            .iter()
            .map(|lane| (lane.key().clone(), lane.value().lock().len()))
            .collect()
    }

    /// Promote waiting entries by one priority step per `interval` waited, counted from
    /// `requested_at`. Returns the number of entries whose position changed.
    ///
    /// Because every entry gains steps at the same rate, an entry can only overtake entries that
    /// arrived after it.
    pub fn age(&self, now: DateTime<Utc>, interval: Duration) -> usize {
        if interval <= Duration::zero() {
            return 0;
        }

        let step_ms = interval.num_milliseconds().max(1);
        let lanes: Vec<Arc<Lane>> = self.lanes.iter().map(|lane| lane.value().clone()).collect();
        let mut promoted = 0;

        for lane in lanes {
            let mut lane = lane.lock();
            let stale: Vec<(QueueKey, Arc<QueueEntry>)> = lane
                .iter()
                .filter_map(|(key, entry)| {
                    let waited = (now - entry.requested_at).num_milliseconds().max(0);
                    let steps = (waited / step_ms) as u64;
                    let target = entry.base_priority.promoted(steps);
                    (target < key.priority).then(|| (*key, entry.clone()))
                })
                .collect();

            for (old_key, entry) in stale {
                lane.remove(&old_key);
                let waited = (now - entry.requested_at).num_milliseconds().max(0);
                let steps = (waited / step_ms) as u64;
                entry
                    .effective_priority
                    .store(entry.base_priority.promoted(steps).get(), Ordering::Release);
                lane.insert(entry.key(), entry);
                promoted += 1;
            }
        }

        promoted
    }
}

/// Lazy, restartable scan over one lane.
///
/// Each step locks the lane only long enough to find the next entry after the cursor, so
/// concurrent enqueues and removals are visible to a scan in progress.
#[derive(Debug)]
pub struct Candidates {
    lane: Option<Arc<Lane>>,
    cursor: Option<QueueKey>,
}

impl Candidates {
    /// Start again from the head of the lane.
    pub fn restart(&mut self) {
        self.cursor = None;
    }
}

impl Iterator for Candidates {
    type Item = Arc<QueueEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let lane = self.lane.as_ref()?;
        let lane = lane.lock();
        let next = match self.cursor {
            None => lane.iter().next(),
            Some(cursor) => lane.range((Bound::Excluded(cursor), Bound::Unbounded)).next(),
        };
        let (key, entry) = next?;
        self.cursor = Some(*key);
        Some(entry.clone())
    }
}
