use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for entities, components and contexts.
///
/// `Id::NIL` (zero) is never handed out by [`Id::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    pub const NIL: Id = Id(0);

    /// Allocates a fresh id.
    pub fn new() -> Self {
        Id(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw value, e.g. one read back from storage.
    pub const fn from_raw(raw: u64) -> Self {
        Id(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
