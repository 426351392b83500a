//! Common type definitions shared by the engine and the API layer.
//!
//! # ID Types
//!
//! Entity IDs are small integers wrapped in newtypes so a request id can never be passed where an
//! allocation id is expected:
//!
//! - [`RequestId`]: a unit of demand
//! - [`ResourceId`]: a unit of typed supply
//! - [`AllocationId`]: the binding of one request to one resource
//!
//! All three are assigned from an [`IdSequence`], so they increase monotonically in creation order.
//!
//! # Matching Keys
//!
//! - [`ResourceType`]: the category requests and resources are matched on
//! - [`Priority`]: request urgency, `1` is the most urgent

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a request, assigned at intake.
    RequestId
);
id_type!(
    /// Identifier of a resource in the pool.
    ResourceId
);
id_type!(
    /// Identifier of an allocation record in the ledger.
    AllocationId
);

/// Monotonic id generator. The first id handed out is `1`.
#[derive(Debug, Default)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next<T: From<u64>>(&self) -> T {
        T::from(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Category used to match requests against resources (e.g. `ICU_BED`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ResourceType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request urgency. Lower numbers are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const LOWEST: Priority = Priority(5);
    pub const DEFAULT: Priority = Priority(3);

    /// Returns `None` when `value` is outside `HIGHEST..=LOWEST`.
    pub fn new(value: u8) -> Option<Self> {
        (Self::HIGHEST.0..=Self::LOWEST.0).contains(&value).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Priority after `steps` promotions, saturating at [`Priority::HIGHEST`].
    pub fn promoted(self, steps: u64) -> Self {
        let steps = u8::try_from(steps).unwrap_or(u8::MAX);
        Self(self.0.saturating_sub(steps).max(Self::HIGHEST.0))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_sequence_is_monotonic() {
        let seq = IdSequence::new();
        let a: RequestId = seq.next();
        let b: RequestId = seq.next();
        assert_eq!(a, RequestId(1));
        assert_eq!(b, RequestId(2));

        // Sequences are independent per id kind
        let other = IdSequence::new();
        let c: AllocationId = other.next();
        assert_eq!(c, AllocationId(1));
    }

    #[test]
    fn test_priority_bounds() {
        assert!(Priority::new(0).is_none());
        assert!(Priority::new(6).is_none());
        assert_eq!(Priority::new(1), Some(Priority::HIGHEST));
        assert_eq!(Priority::new(5), Some(Priority::LOWEST));
        assert!(Priority::HIGHEST < Priority::LOWEST);
    }

    #[test]
    fn test_priority_promotion_saturates() {
        let p = Priority::new(4).unwrap();
        assert_eq!(p.promoted(0), p);
        assert_eq!(p.promoted(1).get(), 3);
        assert_eq!(p.promoted(3), Priority::HIGHEST);
        assert_eq!(p.promoted(1_000), Priority::HIGHEST);
    }

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&AllocationId(7)).unwrap();
        assert_eq!(json, "7");
        let ty: ResourceType = serde_json::from_str("\"ICU_BED\"").unwrap();
        assert_eq!(ty.as_str(), "ICU_BED");
    }
}
