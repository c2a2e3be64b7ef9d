//! Type-safe session identifier.
//!
//! [`SessionId`] is a newtype around a `u64` drawn from a process-wide
//! monotonic counter. Display names are not unique, so every identity
//! comparison in the relay (self-exclusion, unicast targeting, registry
//! keys) goes through this type.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connected session.
///
/// Issued once when the connection is accepted and never reused for the
/// lifetime of the process. Ids compare in admission order, which is
/// what [`super::SessionRegistry::snapshot`] sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Issues the next unused id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw value. Only meant for tests and log correlation; ids
    /// built this way are not guaranteed unique.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
