//! Global state of the sandbox runtime
//!
//! One `Engine` behind a mutex plays the native side. The lock is only held
//! for bookkeeping. Anything that can re-enter managed code (virtual calls,
//! callables, instance teardown) runs after the guard is dropped.

use crate::classdb::{ClassDb, ExtensionInfo};
use crate::physics::PhysicsState;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{LazyLock, Mutex, PoisonError};
use tether_bridge::interface::ObjectPtr;
use tether_core::{Callable, Identifier, InstanceId, NativeHandle};

/// Managed half attached to an object of an extension class
#[derive(Clone, Copy)]
pub struct AttachedInstance {
    pub class: Identifier,
    pub info: ExtensionInfo,
    pub data: *mut c_void,
}

// SAFETY: the data pointer is the bridge's `Arc` storage, which is thread-safe.
unsafe impl Send for AttachedInstance {}

pub struct ObjectRecord {
    pub class: Identifier,
    pub instance_id: u64,
    pub refcount: i64,
    pub name: String,
    pub path: String,
    pub instance: Option<AttachedInstance>,
    pub connections: IndexMap<Identifier, Vec<Callable>>,
}

impl ObjectRecord {
    /// Class as reported to the bridge: the extension class once attached
    pub fn visible_class(&self) -> Identifier {
        self.instance.map_or(self.class, |attached| attached.class)
    }
}

/// Counters exposed for tests
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub constructed: usize,
    pub destroyed: HashMap<u64, u32>,
    pub invalid_destroys: usize,
    pub bind_lookups: HashMap<(Identifier, Identifier, i64), usize>,
    pub virtual_checks: usize,
    pub virtual_calls: usize,
}

pub struct Engine {
    pub classes: ClassDb,
    pub objects: HashMap<usize, ObjectRecord>,
    pub physics: PhysicsState,
    pub stats: Stats,
    next_instance_id: u64,
}

static ENGINE: LazyLock<Mutex<Engine>> = LazyLock::new(|| Mutex::new(Engine::new()));

/// Run `f` with the engine locked
///
/// `f` must not call back into managed code.
pub fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    let mut engine = ENGINE.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut engine)
}

impl Engine {
    fn new() -> Self {
        let mut classes = ClassDb::default();
        classes.add_class("Object", None);
        let ref_counted = classes.add_class("RefCounted", Some("Object"));
        ref_counted.ref_counted = true;
        ref_counted.instantiable = false;
        crate::scene::register(&mut classes);
        crate::physics::register(&mut classes);
        Self {
            classes,
            objects: HashMap::new(),
            physics: PhysicsState::default(),
            stats: Stats::default(),
            next_instance_id: 1,
        }
    }

    /// Allocate a new object of `class`; null if it cannot be instantiated
    pub fn construct(&mut self, class: Identifier) -> ObjectPtr {
        let Some(record) = self.classes.get(class) else {
            return std::ptr::null_mut();
        };
        if !record.instantiable {
            return std::ptr::null_mut();
        }
        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;
        // The allocation only provides a unique, stable address.
        let ptr = Box::into_raw(Box::new(instance_id)) as ObjectPtr;
        self.objects.insert(
            ptr as usize,
            ObjectRecord {
                class,
                instance_id,
                refcount: 0,
                name: String::new(),
                path: String::new(),
                instance: None,
                connections: IndexMap::new(),
            },
        );
        self.stats.constructed += 1;
        tracing::trace!(target: "tether::sandbox", %class, instance_id, "object constructed");
        ptr
    }

    /// Forget an object and free its address
    ///
    /// Returns the record so the caller can drop it, and run the managed
    /// teardown, without the engine lock held.
    pub fn remove(&mut self, ptr: ObjectPtr) -> Option<ObjectRecord> {
        let Some(record) = self.objects.remove(&(ptr as usize)) else {
            self.stats.invalid_destroys += 1;
            tracing::error!(target: "tether::sandbox", ?ptr, "destroy of unknown object");
            return None;
        };
        *self.stats.destroyed.entry(record.instance_id).or_default() += 1;
        // SAFETY: `ptr` was produced by `Box::into_raw` in `construct` and its
        // record was still present, so it has not been freed yet.
        drop(unsafe { Box::from_raw(ptr as *mut u64) });
        Some(record)
    }

    pub fn object(&self, ptr: ObjectPtr) -> Option<&ObjectRecord> {
        self.objects.get(&(ptr as usize))
    }

    pub fn object_mut(&mut self, ptr: ObjectPtr) -> Option<&mut ObjectRecord> {
        self.objects.get_mut(&(ptr as usize))
    }

    pub fn find_instance(&self, id: u64) -> ObjectPtr {
        self.objects
            .iter()
            .find(|(_, record)| record.instance_id == id)
            .map_or(std::ptr::null_mut(), |(addr, _)| *addr as ObjectPtr)
    }
}

/// Number of times the object with this id has been destroyed
pub fn destroy_count(id: InstanceId) -> u32 {
    with_engine(|e| e.stats.destroyed.get(&id.raw()).copied().unwrap_or(0))
}

/// Destroys of pointers the runtime did not know about
pub fn invalid_destroy_count() -> usize {
    with_engine(|e| e.stats.invalid_destroys)
}

/// How often the bridge asked for this `(class, method, hash)` triple
pub fn bind_lookup_count(class: &str, method: &str, hash: i64) -> usize {
    let key = (Identifier::new(class), Identifier::new(method), hash);
    with_engine(|e| e.stats.bind_lookups.get(&key).copied().unwrap_or(0))
}

/// Native reference count of a live object
pub fn reference_count(handle: NativeHandle) -> Option<i64> {
    with_engine(|e| e.object(handle.as_ptr()).map(|record| record.refcount))
}

/// Check whether a handle still refers to a live object
pub fn is_alive(handle: NativeHandle) -> bool {
    with_engine(|e| e.object(handle.as_ptr()).is_some())
}

/// Snapshot of all counters
pub fn stats() -> Stats {
    with_engine(|e| e.stats.clone())
}
