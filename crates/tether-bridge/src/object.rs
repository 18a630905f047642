//! Managed proxies for native objects
//!
//! A `Proxy` stands in for one native object and carries an explicit
//! ownership tag. The tag decides what happens when the proxy is released:
//!
//! | ownership          | duplicate              | release                      |
//! |--------------------|------------------------|------------------------------|
//! | `BorrowedExternal` | plain copy             | nothing                      |
//! | `OwnedByManaged`   | refused                | destroy the native object    |
//! | `RefCounted`       | increments the count   | decrement, destroy at zero   |
//!
//! A proxy moves `Unbound -> Bound -> Released` and never back. Every
//! operation on a released proxy is a contract violation.

use crate::error::{escalate, fatal, BridgeError, Result, Violation};
use crate::interface::{config, interface};
use std::collections::HashSet;
use std::fmt;
use std::sync::{LazyLock, Mutex, PoisonError};
use tether_core::{Identifier, InstanceId, NativeHandle, ObjectRef, RawName};

/// Who is responsible for the native object's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Native code owns it; the proxy only observes
    BorrowedExternal,
    /// This proxy owns it and destroys it on release
    OwnedByManaged,
    /// Shared through the native reference count
    RefCounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Unbound,
    Bound(Ownership),
    Released,
}

// Handles that currently have an owning proxy.
static OWNED: LazyLock<Mutex<HashSet<NativeHandle>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn claim(handle: NativeHandle) -> Result<()> {
    let mut owned = OWNED.lock().unwrap_or_else(PoisonError::into_inner);
    if !owned.insert(handle) {
        return Err(Violation::DuplicateOwner(handle).into());
    }
    Ok(())
}

fn unclaim(handle: NativeHandle) {
    OWNED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&handle);
}

/// Check whether some proxy currently owns `handle`
pub fn has_owner(handle: NativeHandle) -> bool {
    OWNED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(&handle)
}

/// Ask the native side which class an object belongs to
fn class_of(handle: NativeHandle) -> Result<Identifier> {
    let mut raw = RawName {
        ptr: std::ptr::null(),
        len: 0,
        hash: 0,
    };
    // SAFETY: `raw` outlives the call; a nonzero return means it was filled in.
    let found = unsafe { (interface().object_get_class_name)(handle.as_ptr(), &mut raw) };
    if found == 0 {
        return Err(Violation::NullHandle.into());
    }
    // SAFETY: the native side keeps class names alive for the whole process.
    unsafe { Identifier::from_raw(&raw) }.map_err(|_| Violation::NullHandle.into())
}

/// Add one native reference, failing if the object is gone
fn take_reference(handle: NativeHandle) -> Result<()> {
    // SAFETY: non-null handle; the native side reports 0 for unknown objects.
    if unsafe { (interface().ref_reference)(handle.as_ptr()) } == 0 {
        return Err(Violation::StaleHandle(handle).into());
    }
    Ok(())
}

fn is_ref_counted_class(class: Identifier) -> bool {
    let raw = class.raw();
    // SAFETY: interned name storage outlives the call.
    unsafe { (interface().classdb_is_ref_counted)(&raw) != 0 }
}

/// Managed stand-in for a native object
pub struct Proxy {
    handle: NativeHandle,
    class: Identifier,
    instance_id: InstanceId,
    state: ProxyState,
}

impl Proxy {
    /// A proxy that does not refer to anything yet
    pub fn unbound(class: impl Into<Identifier>) -> Self {
        Self {
            handle: NativeHandle::null(),
            class: class.into(),
            instance_id: InstanceId::default(),
            state: ProxyState::Unbound,
        }
    }

    /// Attach an unbound proxy to a native object under the given ownership
    fn bind(&mut self, handle: NativeHandle, ownership: Ownership) -> Result<()> {
        match self.state {
            ProxyState::Unbound => {}
            ProxyState::Released => return Err(Violation::ReleasedProxy(self.class).into()),
            ProxyState::Bound(_) => return Err(Violation::AlreadyBound(self.class).into()),
        }
        if handle.is_null() {
            return Err(Violation::NullHandle.into());
        }

        // Counted and owned lifetimes never mix on one object.
        if ownership != Ownership::BorrowedExternal
            && is_ref_counted_class(self.class) != (ownership == Ownership::RefCounted)
        {
            return Err(Violation::OwnershipMismatch {
                class: self.class,
                ownership,
            }
            .into());
        }

        match ownership {
            Ownership::OwnedByManaged => claim(handle)?,
            Ownership::RefCounted => {
                if has_owner(handle) {
                    return Err(Violation::DuplicateOwner(handle).into());
                }
                take_reference(handle)?;
            }
            Ownership::BorrowedExternal => {}
        }

        // SAFETY: non-null handle to a live object.
        let id = unsafe { (interface().object_get_instance_id)(handle.as_ptr()) };
        self.handle = handle;
        self.instance_id = InstanceId::new(id);
        self.state = ProxyState::Bound(ownership);
        tracing::trace!(
            target: "tether::object",
            class = %self.class,
            instance = id,
            ?ownership,
            "proxy bound"
        );
        Ok(())
    }

    /// Instantiate a native class
    ///
    /// Plain objects come back owned by this proxy; ref-counted ones come
    /// back holding the first reference.
    pub fn construct(class: impl Into<Identifier>) -> Result<Self> {
        let class = class.into();
        let raw = class.raw();
        // SAFETY: interned name storage outlives the call.
        let ptr = unsafe { (interface().classdb_construct_object)(&raw) };
        if ptr.is_null() {
            return Err(BridgeError::UnknownClass(class));
        }
        let ownership = if is_ref_counted_class(class) {
            Ownership::RefCounted
        } else {
            Ownership::OwnedByManaged
        };
        let mut proxy = Proxy::unbound(class);
        proxy.bind(NativeHandle::from_ptr(ptr), ownership)?;
        tracing::debug!(target: "tether::object", %class, instance = %proxy.instance_id, "constructed");
        Ok(proxy)
    }

    fn wrap(handle: NativeHandle, ownership: Ownership) -> Result<Self> {
        if handle.is_null() {
            return Err(Violation::NullHandle.into());
        }
        let mut proxy = Proxy::unbound(class_of(handle)?);
        proxy.bind(handle, ownership)?;
        Ok(proxy)
    }

    /// Observe an object native code owns
    pub fn wrap_borrowed(handle: NativeHandle) -> Result<Self> {
        Self::wrap(handle, Ownership::BorrowedExternal)
    }

    /// Take an extra reference to a ref-counted object
    ///
    /// Objects of plain classes, and objects an owning proxy holds, are
    /// refused.
    pub fn wrap_ref_counted(handle: NativeHandle) -> Result<Self> {
        Self::wrap(handle, Ownership::RefCounted)
    }

    /// Take sole ownership of an object native code handed over
    ///
    /// Ref-counted objects are refused; their lifetime follows the count.
    pub fn wrap_owned(handle: NativeHandle) -> Result<Self> {
        Self::wrap(handle, Ownership::OwnedByManaged)
    }

    /// Wrap an object returned from a native call
    ///
    /// Ref-counted objects gain a reference; everything else is borrowed.
    pub fn from_returned(handle: NativeHandle) -> Result<Option<Self>> {
        if handle.is_null() {
            return Ok(None);
        }
        let class = class_of(handle)?;
        let ownership = if is_ref_counted_class(class) {
            Ownership::RefCounted
        } else {
            Ownership::BorrowedExternal
        };
        let mut proxy = Proxy::unbound(class);
        proxy.bind(handle, ownership)?;
        Ok(Some(proxy))
    }

    /// Look up a live object by instance id, as a borrowed proxy
    pub fn from_instance_id(id: InstanceId) -> Option<Self> {
        // SAFETY: plain lookup, no pointer arguments.
        let ptr = unsafe { (interface().object_get_instance_from_id)(id.raw()) };
        Self::from_returned(NativeHandle::from_ptr(ptr)).ok().flatten()
    }

    /// The native handle, checked against the proxy's state
    pub fn try_handle(&self) -> Result<NativeHandle> {
        match self.state {
            ProxyState::Bound(_) => {}
            ProxyState::Released => return Err(Violation::ReleasedProxy(self.class).into()),
            ProxyState::Unbound => return Err(Violation::UnboundProxy(self.class).into()),
        }
        if config().check_instance_liveness && !self.is_instance_valid() {
            return Err(Violation::DeadInstance(self.instance_id).into());
        }
        Ok(self.handle)
    }

    /// The native handle; panics if the proxy cannot be used
    #[track_caller]
    pub fn handle(&self) -> NativeHandle {
        match self.try_handle() {
            Ok(handle) => handle,
            Err(err) => fatal(err),
        }
    }

    pub fn class(&self) -> Identifier {
        self.class
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    pub fn ownership(&self) -> Option<Ownership> {
        match self.state {
            ProxyState::Bound(ownership) => Some(ownership),
            _ => None,
        }
    }

    pub fn is_released(&self) -> bool {
        self.state == ProxyState::Released
    }

    /// Check whether the native object is still alive
    pub fn is_instance_valid(&self) -> bool {
        if !matches!(self.state, ProxyState::Bound(_)) || !self.instance_id.is_valid() {
            return false;
        }
        // SAFETY: plain lookup, no pointer arguments.
        let ptr = unsafe { (interface().object_get_instance_from_id)(self.instance_id.raw()) };
        ptr == self.handle.as_ptr()
    }

    /// Non-owning reference for storing in a `Variant`
    pub fn to_object_ref(&self) -> ObjectRef {
        match self.state {
            ProxyState::Bound(_) => ObjectRef::new(self.handle, self.instance_id),
            _ => ObjectRef::null(),
        }
    }

    /// A non-owning view of the same object
    #[track_caller]
    pub fn borrowed(&self) -> Proxy {
        let handle = self.handle();
        Proxy {
            handle,
            class: self.class,
            instance_id: self.instance_id,
            state: ProxyState::Bound(Ownership::BorrowedExternal),
        }
    }

    /// Duplicate the proxy according to its ownership
    pub fn try_clone(&self) -> Result<Proxy> {
        let handle = self.try_handle()?;
        match self.state {
            ProxyState::Bound(Ownership::OwnedByManaged) => Err(Violation::CloneOwned.into()),
            ProxyState::Bound(Ownership::RefCounted) => {
                take_reference(handle)?;
                Ok(Proxy {
                    handle,
                    class: self.class,
                    instance_id: self.instance_id,
                    state: self.state,
                })
            }
            _ => Ok(self.borrowed()),
        }
    }

    /// Current native reference count, for ref-counted objects
    pub fn reference_count(&self) -> Option<i64> {
        match self.state {
            ProxyState::Bound(Ownership::RefCounted) => {
                // SAFETY: bound ref-counted proxies hold a live object.
                Some(unsafe { (interface().ref_get_count)(self.handle.as_ptr()) })
            }
            _ => None,
        }
    }

    /// Release now instead of at drop
    pub fn try_release(&mut self) -> Result<()> {
        if self.state == ProxyState::Released {
            return Err(Violation::ReleasedProxy(self.class).into());
        }
        self.release_inner();
        Ok(())
    }

    /// Release now; panics if already released
    #[track_caller]
    pub fn release(&mut self) {
        if let Err(err) = escalate(self.try_release()) {
            fatal(err);
        }
    }

    fn release_inner(&mut self) {
        let handle = self.handle;
        match self.state {
            ProxyState::Bound(Ownership::OwnedByManaged) => {
                unclaim(handle);
                tracing::debug!(target: "tether::object", class = %self.class, instance = %self.instance_id, "destroying owned object");
                // SAFETY: this proxy is the unique owner of a live object.
                unsafe { (interface().object_destroy)(handle.as_ptr()) };
            }
            ProxyState::Bound(Ownership::RefCounted) => {
                // SAFETY: this proxy holds one reference to a live object.
                let last = unsafe { (interface().ref_unreference)(handle.as_ptr()) } != 0;
                if last {
                    tracing::debug!(target: "tether::object", class = %self.class, instance = %self.instance_id, "last reference dropped");
                    // SAFETY: the count reached zero; nobody else refers to it.
                    unsafe { (interface().object_destroy)(handle.as_ptr()) };
                }
            }
            ProxyState::Bound(Ownership::BorrowedExternal) | ProxyState::Unbound => {}
            ProxyState::Released => return,
        }
        self.handle = NativeHandle::null();
        self.state = ProxyState::Released;
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.instance_id == other.instance_id && self.handle == other.handle
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("class", &self.class)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state)
            .finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            ProxyState::Bound(_) => write!(f, "{}#{}", self.class, self.instance_id.raw()),
            ProxyState::Unbound => write!(f, "{}<unbound>", self.class),
            ProxyState::Released => write!(f, "{}<released>", self.class),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::intern;

    #[test]
    fn test_unbound_proxy_state() {
        let proxy = Proxy::unbound("Node");
        assert_eq!(proxy.state(), ProxyState::Unbound);
        assert_eq!(proxy.ownership(), None);
        assert!(proxy.to_object_ref().is_null());
        assert_eq!(proxy.to_string(), "Node<unbound>");
    }

    #[test]
    fn test_unbound_handle_is_violation() {
        let proxy = Proxy::unbound("Node");
        let err = proxy.try_handle().unwrap_err();
        assert_eq!(err.violation(), Some(Violation::UnboundProxy(intern("Node"))));
    }

    #[test]
    fn test_bind_twice_is_violation() {
        let mut proxy = Proxy::unbound("Node");
        proxy.state = ProxyState::Bound(Ownership::BorrowedExternal);
        let err = proxy
            .bind(NativeHandle::null(), Ownership::BorrowedExternal)
            .unwrap_err();
        assert_eq!(err.violation(), Some(Violation::AlreadyBound(intern("Node"))));
        proxy.state = ProxyState::Released;
    }

    #[test]
    fn test_release_unbound_then_reuse() {
        let mut proxy = Proxy::unbound("Node");
        proxy.try_release().unwrap();
        assert!(proxy.is_released());
        let err = proxy.try_release().unwrap_err();
        assert_eq!(err.violation(), Some(Violation::ReleasedProxy(intern("Node"))));
        let err = proxy.try_handle().unwrap_err();
        assert_eq!(err.violation(), Some(Violation::ReleasedProxy(intern("Node"))));
    }

    #[test]
    #[should_panic(expected = "used after release")]
    fn test_handle_after_release_panics() {
        let mut proxy = Proxy::unbound("Resource");
        proxy.release();
        let _ = proxy.handle();
    }

    #[test]
    fn test_owner_registry_refuses_second_owner() {
        let mut slot = 0u8;
        let handle = NativeHandle::from_ptr(&mut slot as *mut u8 as *mut std::ffi::c_void);
        claim(handle).unwrap();
        assert!(has_owner(handle));
        let err = claim(handle).unwrap_err();
        assert_eq!(err.violation(), Some(Violation::DuplicateOwner(handle)));
        unclaim(handle);
        assert!(!has_owner(handle));
    }
}
