//! Correlation identifiers for outgoing requests.
//!
//! [`RequestId`] is a newtype around `u64` so that correlation ids cannot be
//! confused with other integers. [`RequestIdGenerator`] hands them out from
//! a monotonic counter shared by every clone of a client.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Correlation id embedded in a request and echoed in its response.
///
/// Serialized as a bare JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<RequestId> for u64 {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

/// Monotonic source of [`RequestId`]s, starting at 1.
///
/// Ids are never reused for the lifetime of the generator, so they stay
/// unique across reconnects of the same client.
#[derive(Debug, Clone)]
pub struct RequestIdGenerator {
    next: Arc<AtomicU64>,
}

impl RequestIdGenerator {
    /// Creates a generator whose first id is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns a fresh id.
    pub fn next_id(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
