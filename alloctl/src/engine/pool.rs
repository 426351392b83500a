//! Resource pool.
//!
//! Holds every registered resource together with its status. The status of each resource is a
//! single atomic word that only changes through compare-and-set, so two matcher passes racing for
//! the same resource can both attempt a reservation but only one of them succeeds. No lock is held
//! while reserving or releasing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{AllocationError, Result};
use crate::types::{ResourceId, ResourceType};

/// Current status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Free and eligible for matching
    Available,
    /// Held by exactly one active allocation
    Allocated,
    /// Administratively removed from matching
    Offline,
}

impl ResourceStatus {
    const fn as_u8(self) -> u8 {
        match self {
            ResourceStatus::Available => 0,
            ResourceStatus::Allocated => 1,
            ResourceStatus::Offline => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ResourceStatus::Available,
            1 => ResourceStatus::Allocated,
            _ => ResourceStatus::Offline,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Available => "available",
            ResourceStatus::Allocated => "allocated",
            ResourceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub label: String,
    pub resource_type: ResourceType,
}

/// Point-in-time view of a resource and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub label: String,
    pub resource_type: ResourceType,
    pub status: ResourceStatus,
}

#[derive(Debug)]
struct Slot {
    resource: Resource,
    status: AtomicU8,
    /// Set when the resource is taken offline while allocated; honoured on release.
    retire_on_release: AtomicBool,
}

impl Slot {
    fn status(&self) -> ResourceStatus {
        ResourceStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(&self, from: ResourceStatus, to: ResourceStatus) -> bool {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            id: self.resource.id,
            label: self.resource.label.clone(),
            resource_type: self.resource.resource_type.clone(),
            status: self.status(),
        }
    }
}

/// Registry of resources, indexed by id and by type.
#[derive(Debug, Default)]
pub struct ResourcePool {
    slots: DashMap<ResourceId, Arc<Slot>>,
    by_type: DashMap<ResourceType, BTreeMap<ResourceId, Arc<Slot>>>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource in `available` status.
    ///
    /// # Errors
    /// - `DuplicateId` if a resource with the same id is already registered
    pub fn register(&self, resource: Resource) -> Result<ResourceSnapshot> {
        match self.slots.entry(resource.id) {
            Entry::Occupied(_) => Err(AllocationError::DuplicateId {
                kind: "Resource",
                id: resource.id.to_string(),
            }),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Slot {
                    status: AtomicU8::new(ResourceStatus::Available.as_u8()),
                    retire_on_release: AtomicBool::new(false),
                    resource,
                });
                vacant.insert(slot.clone());
                self.by_type
                    .entry(slot.resource.resource_type.clone())
                    .or_default()
                    .insert(slot.resource.id, slot.clone());
                Ok(slot.snapshot())
            }
        }
    }

    fn slot(&self, id: ResourceId) -> Result<Arc<Slot>> {
        self.slots
            .get(&id)
            .map(|slot| slot.value().clone())
            .ok_or_else(|| AllocationError::not_found("Resource", id))
    }

    pub fn get(&self, id: ResourceId) -> Option<ResourceSnapshot> {
        self.slots.get(&id).map(|slot| slot.snapshot())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All resources in ascending id order.
    pub fn list(&self) -> Vec<ResourceSnapshot> {
        let mut resources: Vec<_> = self.slots.iter().map(|slot| slot.snapshot()).collect();
        resources.sort_by_key(|r| r.id);
        resources
    }

    /// Resources of one type in ascending id order.
    pub fn list_by_type(&self, resource_type: &ResourceType) -> Vec<ResourceSnapshot> {
        self.by_type
            .get(resource_type)
            .map(|slots| slots.values().map(|slot| slot.snapshot()).collect())
            .unwrap_or_default()
    }

    /// Ids of the currently available resources of one type, lowest id first.
    pub fn available_of_type(&self, resource_type: &ResourceType) -> Vec<ResourceId> {
        self.by_type
            .get(resource_type)
            .map(|slots| {
                slots
                    .values()
                    .filter(|slot| slot.status() == ResourceStatus::Available)
                    .map(|slot| slot.resource.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of every available resource, lowest id first.
    pub fn available(&self) -> Vec<ResourceId> {
        self.list()
            .into_iter()
            .filter(|r| r.status == ResourceStatus::Available)
            .map(|r| r.id)
            .collect()
    }

    pub fn contains_type(&self, resource_type: &ResourceType) -> bool {
        self.by_type.contains_key(resource_type)
    }

    /// Atomically move a resource from `available` to `allocated`.
    ///
    /// Returns `false` when the resource is unknown or not available, including when a
    /// concurrent reservation got there first.
    pub fn try_reserve(&self, id: ResourceId) -> bool {
        self.slots
            .get(&id)
            .is_some_and(|slot| slot.transition(ResourceStatus::Available, ResourceStatus::Allocated))
    }

    /// Move an allocated resource back to `available`, or to `offline` if it was retired while
    /// allocated. Returns the status the resource ended up in.
    ///
    /// # Errors
    /// - `NotFound` for an unknown id
    /// - `InvalidState` if the resource is not currently allocated
    pub fn release(&self, id: ResourceId) -> Result<ResourceStatus> {
        let slot = self.slot(id)?;
        let retire = slot.retire_on_release.swap(false, Ordering::AcqRel);
        let target = if retire {
            ResourceStatus::Offline
        } else {
            ResourceStatus::Available
        };

        if slot.transition(ResourceStatus::Allocated, target) {
            Ok(target)
        } else {
            if retire {
                slot.retire_on_release.store(true, Ordering::Release);
            }
            Err(AllocationError::invalid_state("Resource", id, "allocated", slot.status()))
        }
    }

    /// Take a resource out of matching.
    ///
    /// An available resource goes offline immediately. An allocated one keeps its allocation and
    /// goes offline when that allocation is released.
    pub fn set_offline(&self, id: ResourceId) -> Result<ResourceSnapshot> {
        let slot = self.slot(id)?;
        loop {
            match slot.status() {
                ResourceStatus::Offline => {
                    slot.retire_on_release.store(false, Ordering::Release);
                    return Ok(slot.snapshot());
                }
                ResourceStatus::Available => {
                    if slot.transition(ResourceStatus::Available, ResourceStatus::Offline) {
                        slot.retire_on_release.store(false, Ordering::Release);
                        return Ok(slot.snapshot());
                    }
                }
                ResourceStatus::Allocated => {
                    slot.retire_on_release.store(true, Ordering::Release);
                    // A concurrent release may have already read the flag
                    if slot.status() == ResourceStatus::Allocated {
                        return Ok(slot.snapshot());
                    }
                }
            }
        }
    }

    /// Return an offline resource to `available`. Also cancels a pending retirement.
    pub fn set_online(&self, id: ResourceId) -> Result<ResourceSnapshot> {
        let slot = self.slot(id)?;
        slot.retire_on_release.store(false, Ordering::Release);
        slot.transition(ResourceStatus::Offline, ResourceStatus::Available);
        Ok(slot.snapshot())
    }

    /// Whether an allocated resource will go offline on release.
    pub fn is_retiring(&self, id: ResourceId) -> bool {
        self.slots
            .get(&id)
            .is_some_and(|slot| slot.retire_on_release.load(Ordering::Acquire))
    }

    /// Resource counts per (type, status), for gauges.
    pub fn status_counts(&self) -> BTreeMap<(ResourceType, ResourceStatus), usize> {
        let mut counts = BTreeMap::new();
        for slots in self.by_type.iter() {
            for status in [ResourceStatus::Available, ResourceStatus::Allocated, ResourceStatus::Offline] {
                counts.insert((slots.key().clone(), status), 0);
            }
            for slot in slots.values() {
                *counts.entry((slots.key().clone(), slot.status())).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::sync::Barrier;

    fn resource(id: u64, ty: &str) -> Resource {
        Resource {
            id: ResourceId(id),
            label: format!("{ty}-{id}"),
            resource_type: ResourceType::from(ty),
        }
    }

    #[fixture]
    fn pool() -> ResourcePool {
        let pool = ResourcePool::new();
        pool.register(resource(2, "bed")).unwrap();
        pool.register(resource(1, "bed")).unwrap();
        pool.register(resource(3, "ventilator")).unwrap();
        pool
    }

    #[rstest]
    fn test_register_rejects_duplicate_id(pool: ResourcePool) {
        let err = pool.register(resource(1, "ventilator")).unwrap_err();
        assert!(matches!(err, AllocationError::DuplicateId { .. }));
        // The original registration is untouched
        assert_eq!(pool.get(ResourceId(1)).unwrap().resource_type.as_str(), "bed");
        assert_eq!(pool.len(), 3);
    }

    #[rstest]
    fn test_list_by_type_is_id_ordered(pool: ResourcePool) {
        let beds = pool.list_by_type(&ResourceType::from("bed"));
        let ids: Vec<_> = beds.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ResourceId(1), ResourceId(2)]);
        assert!(beds.iter().all(|r| r.status == ResourceStatus::Available));

        assert!(pool.list_by_type(&ResourceType::from("unknown")).is_empty());
        assert!(pool.contains_type(&ResourceType::from("ventilator")));
        assert!(!pool.contains_type(&ResourceType::from("unknown")));
    }

    #[rstest]
    fn test_try_reserve_is_compare_and_set(pool: ResourcePool) {
        assert!(pool.try_reserve(ResourceId(1)));
        // Second reservation of the same resource fails silently
        assert!(!pool.try_reserve(ResourceId(1)));
        // Unknown resources are never reserved
        assert!(!pool.try_reserve(ResourceId(99)));

        assert_eq!(pool.get(ResourceId(1)).unwrap().status, ResourceStatus::Allocated);
        assert_eq!(pool.available_of_type(&ResourceType::from("bed")), vec![ResourceId(2)]);
    }

    #[rstest]
    fn test_release_requires_allocated(pool: ResourcePool) {
        let err = pool.release(ResourceId(1)).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidState { .. }));

        let err = pool.release(ResourceId(42)).unwrap_err();
        assert!(matches!(err, AllocationError::NotFound { .. }));

        assert!(pool.try_reserve(ResourceId(1)));
        assert_eq!(pool.release(ResourceId(1)).unwrap(), ResourceStatus::Available);
        assert_eq!(pool.get(ResourceId(1)).unwrap().status, ResourceStatus::Available);
    }

    #[rstest]
    fn test_offline_resources_are_not_reservable(pool: ResourcePool) {
        let snapshot = pool.set_offline(ResourceId(1)).unwrap();
        assert_eq!(snapshot.status, ResourceStatus::Offline);
        assert!(!pool.try_reserve(ResourceId(1)));
        assert_eq!(pool.available_of_type(&ResourceType::from("bed")), vec![ResourceId(2)]);

        let snapshot = pool.set_online(ResourceId(1)).unwrap();
        assert_eq!(snapshot.status, ResourceStatus::Available);
        assert!(pool.try_reserve(ResourceId(1)));
    }

    #[rstest]
    fn test_offline_while_allocated_retires_on_release(pool: ResourcePool) {
        assert!(pool.try_reserve(ResourceId(2)));

        let snapshot = pool.set_offline(ResourceId(2)).unwrap();
        assert_eq!(snapshot.status, ResourceStatus::Allocated);
        assert!(pool.is_retiring(ResourceId(2)));

        assert_eq!(pool.release(ResourceId(2)).unwrap(), ResourceStatus::Offline);
        assert!(!pool.is_retiring(ResourceId(2)));
        assert_eq!(pool.get(ResourceId(2)).unwrap().status, ResourceStatus::Offline);
    }

    #[rstest]
    fn test_online_cancels_pending_retirement(pool: ResourcePool) {
        assert!(pool.try_reserve(ResourceId(2)));
        pool.set_offline(ResourceId(2)).unwrap();
        pool.set_online(ResourceId(2)).unwrap();

        assert_eq!(pool.release(ResourceId(2)).unwrap(), ResourceStatus::Available);
    }

    #[rstest]
    fn test_status_counts(pool: ResourcePool) {
        assert!(pool.try_reserve(ResourceId(1)));
        pool.set_offline(ResourceId(3)).unwrap();

        let counts = pool.status_counts();
        let bed = ResourceType::from("bed");
        let vent = ResourceType::from("ventilator");
        assert_eq!(counts[&(bed.clone(), ResourceStatus::Available)], 1);
        assert_eq!(counts[&(bed, ResourceStatus::Allocated)], 1);
        assert_eq!(counts[&(vent.clone(), ResourceStatus::Offline)], 1);
        assert_eq!(counts[&(vent, ResourceStatus::Available)], 0);
    }

    #[test]
    fn test_concurrent_reservations_have_one_winner() {
        let pool = ResourcePool::new();
        pool.register(resource(1, "bed")).unwrap();

        let threads = 16;
        let barrier = Barrier::new(threads);
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        pool.try_reserve(ResourceId(1))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });

        assert_eq!(winners, 1);
    }
}
