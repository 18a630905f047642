//! Freed-resource bookkeeping
//!
//! A `Rid` is plain data and the native side may hand out the same value
//! again after it is freed. The registry remembers which ids managed code has
//! freed so that passing one back into a call, or freeing it twice, is caught
//! at the call site instead of corrupting server state.
//!
//! Only the most recent `BridgeConfig::freed_rid_capacity` frees are
//! remembered; older tombstones are dropped first. A tombstone is cleared only
//! through [`revive`], which wrappers call for ids fresh out of a `*_create`
//! method. Ids returned by any other call stay freed.
//!
//! Tracking can be switched off with `BridgeConfig::track_freed_rids`.

use crate::error::{fatal, Result, Violation};
use crate::interface::config;
use indexmap::IndexSet;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use tether_core::Rid;

/// Recently freed ids, oldest first
#[derive(Debug, Default)]
pub(crate) struct Tombstones {
    ids: IndexSet<Rid>,
}

impl Tombstones {
    pub(crate) fn contains(&self, rid: Rid) -> bool {
        self.ids.contains(&rid)
    }

    /// Record `rid`, forgetting the oldest entries beyond `capacity`
    pub(crate) fn insert(&mut self, rid: Rid, capacity: usize) {
        self.ids.insert(rid);
        while self.ids.len() > capacity {
            if let Some(evicted) = self.ids.shift_remove_index(0) {
                tracing::trace!(target: "tether::object", rid = %evicted, "tombstone evicted");
            }
        }
    }

    pub(crate) fn remove(&mut self, rid: Rid) -> bool {
        self.ids.shift_remove(&rid)
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

static FREED: LazyLock<Mutex<Tombstones>> = LazyLock::new(|| Mutex::new(Tombstones::default()));

fn tracking() -> bool {
    config().track_freed_rids
}

fn freed() -> MutexGuard<'static, Tombstones> {
    FREED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Number of freed ids currently remembered
pub fn tombstone_count() -> usize {
    freed().len()
}

/// Check whether managed code has freed this id
pub fn is_freed(rid: Rid) -> bool {
    tracking() && freed().contains(rid)
}

/// Fail unless `rid` may be passed into a native call
pub fn check_live(rid: Rid) -> Result<()> {
    if is_freed(rid) {
        return Err(Violation::FreedRid(rid).into());
    }
    Ok(())
}

/// Fail fast if `rid` was freed
#[track_caller]
pub fn assert_live(rid: Rid) {
    if let Err(err) = check_live(rid) {
        fatal(err);
    }
}

/// Free `rid` through `free`, recording it afterwards
///
/// `free` runs without the registry lock held, so it may make bridge calls
/// that pass `rid` as an argument.
pub fn try_free(rid: Rid, free: impl FnOnce(Rid)) -> Result<()> {
    if is_freed(rid) {
        return Err(Violation::DoubleFree(rid).into());
    }
    free(rid);
    if tracking() {
        freed().insert(rid, config().freed_rid_capacity);
    }
    tracing::trace!(target: "tether::object", %rid, "rid freed");
    Ok(())
}

/// Like [`try_free`], panicking on double free
#[track_caller]
pub fn free(rid: Rid, free: impl FnOnce(Rid)) {
    if let Err(err) = try_free(rid, free) {
        fatal(err);
    }
}

/// Forget a tombstone because a create method handed the id out again
pub fn revive(rid: Rid) {
    if tracking() && rid.is_valid() && freed().remove(rid) {
        tracing::trace!(target: "tether::object", %rid, "rid reissued by native side");
    }
}
