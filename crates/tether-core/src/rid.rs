//! Resource identifiers for native resources that are not objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 64-bit identifier of a native resource (shape, body, space, ...)
///
/// A `Rid` is a plain value: it carries no ownership and compares by value.
/// The resource behind it lives until an explicit native "free" call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rid(u64);

impl Rid {
    /// The invalid resource id
    pub const INVALID: Rid = Rid(0);

    /// Create a rid from its raw value
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Check if this rid can refer to a resource at all
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid:{}", self.0)
    }
}
