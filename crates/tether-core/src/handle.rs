//! Opaque handles to native objects

use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;

/// Address of an object living on the native side
///
/// The bridge never dereferences it; it is only ever handed back to native
/// functions, which is why it is `Send + Sync` even though it wraps a raw
/// pointer.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(*mut c_void);

// SAFETY: the pointer is an opaque token on this side of the boundary.
unsafe impl Send for NativeHandle {}
// SAFETY: see above.
unsafe impl Sync for NativeHandle {}

impl NativeHandle {
    /// The null handle, used as `self` for static and singleton calls
    pub const fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    /// Wrap a pointer received from native code
    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// The raw pointer, for passing back into native calls
    pub const fn as_ptr(self) -> *mut c_void {
        self.0
    }

    /// Check if this is the null handle
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Numeric address, for diagnostics and ownership bookkeeping
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

impl Default for NativeHandle {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:#x})", self.addr())
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{:#x}", self.addr())
    }
}

/// Identity the native side assigns to each object
///
/// Unlike a `NativeHandle`, an instance id is never recycled, so it can be
/// used to check whether a handle still refers to a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Create a new instance id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Zero is never assigned to a live object
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance:{}", self.0)
    }
}

/// Non-owning reference to a native object, as carried inside a `Variant`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectRef {
    pub handle: NativeHandle,
    pub instance_id: InstanceId,
}

impl ObjectRef {
    pub fn new(handle: NativeHandle, instance_id: InstanceId) -> Self {
        Self {
            handle,
            instance_id,
        }
    }

    /// A reference to no object
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null>")
        } else {
            write!(f, "<object {} @ {}>", self.instance_id, self.handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        let handle = NativeHandle::null();
        assert!(handle.is_null());
        assert_eq!(handle, NativeHandle::default());
        assert_eq!(format!("{:?}", handle), "NativeHandle(0x0)");
    }

    #[test]
    fn test_handle_roundtrip() {
        let mut slot = 7u32;
        let ptr = &mut slot as *mut u32 as *mut c_void;
        let handle = NativeHandle::from_ptr(ptr);
        assert!(!handle.is_null());
        assert_eq!(handle.as_ptr(), ptr);
        assert_eq!(handle.addr(), ptr as usize);
    }

    #[test]
    fn test_object_ref() {
        assert!(ObjectRef::null().is_null());
        assert!(!InstanceId::default().is_valid());
        assert_eq!(format!("{}", InstanceId::new(9)), "instance:9");
    }
}
