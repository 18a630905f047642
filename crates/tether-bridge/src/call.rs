//! Calling resolved native methods
//!
//! Two paths, matching what the native side offers:
//!
//! - **ptrcall**: arguments and return value in native layout, passed as an
//!   array of pointers. Each argument lends a pointer to itself (or to a
//!   widened stack copy) for the duration of the call only; `PtrArg::with_ptr`
//!   scopes that borrow to a closure so the address cannot outlive it.
//! - **varcall**: arguments as `Variant`s, for methods that take a variable
//!   number of arguments. Errors come back through a `CallError` slot.

use crate::bind::MethodBind;
use crate::error::{escalate, BridgeError, Result};
use crate::interface::{interface, ConstTypePtr, ConstVariantPtr};
use crate::object::Proxy;
use crate::rid;
use std::ffi::c_void;
use tether_core::{
    CallError, Callable, Color, Identifier, NativeHandle, ObjectRef, Rect2, Rid, Transform2D, Variant, Vector2,
    Vector2i, Vector3,
};

/// A value that can be lent to a ptrcall
pub trait PtrArg {
    /// Run `f` with a pointer to this value in native layout
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R;
}

/// A value that can be read back from a ptrcall return slot
pub trait PtrReturn: Sized {
    /// Let `call` fill a return slot, then read the value out of it
    ///
    /// # Safety
    ///
    /// `call` must write a value of the slot's native layout, or nothing.
    unsafe fn from_ret(call: impl FnOnce(*mut c_void)) -> Self;
}

/// Types whose Rust layout is their native layout
macro_rules! impl_ptr_by_address {
    ($($ty:ty),* $(,)?) => {$(
        impl PtrArg for $ty {
            fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
                f(self as *const $ty as ConstTypePtr)
            }
        }

        impl PtrReturn for $ty {
            unsafe fn from_ret(call: impl FnOnce(*mut c_void)) -> Self {
                let mut slot = <$ty>::default();
                call(&mut slot as *mut $ty as *mut c_void);
                slot
            }
        }
    )*};
}

impl_ptr_by_address!(bool, i64, f64, Vector2, Vector2i, Vector3, Rect2, Transform2D, Color, String, Variant);

/// Narrow numerics travel widened to the native 64-bit slot
macro_rules! impl_ptr_widened {
    ($wide:ty => $($ty:ty),*) => {$(
        impl PtrArg for $ty {
            fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
                let slot = *self as $wide;
                f(&slot as *const $wide as ConstTypePtr)
            }
        }

        impl PtrReturn for $ty {
            unsafe fn from_ret(call: impl FnOnce(*mut c_void)) -> Self {
                let mut slot: $wide = Default::default();
                call(&mut slot as *mut $wide as *mut c_void);
                slot as $ty
            }
        }
    )*};
}

impl_ptr_widened!(i64 => i8, i16, i32, u8, u16, u32, u64);
impl_ptr_widened!(f64 => f32);

impl PtrReturn for () {
    unsafe fn from_ret(call: impl FnOnce(*mut c_void)) -> Self {
        call(std::ptr::null_mut());
    }
}

impl PtrArg for str {
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        let owned = self.to_string();
        f(&owned as *const String as ConstTypePtr)
    }
}

impl PtrArg for Identifier {
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        let raw = self.raw();
        f(&raw as *const _ as ConstTypePtr)
    }
}

impl PtrArg for Callable {
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        f(self as *const Callable as ConstTypePtr)
    }
}

impl PtrArg for Rid {
    #[track_caller]
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        rid::assert_live(*self);
        let raw = self.raw();
        f(&raw as *const u64 as ConstTypePtr)
    }
}

impl PtrReturn for Rid {
    unsafe fn from_ret(call: impl FnOnce(*mut c_void)) -> Self {
        let mut raw = 0u64;
        call(&mut raw as *mut u64 as *mut c_void);
        Rid::new(raw)
    }
}

// Objects travel as a pointer to the object pointer.
impl PtrArg for Proxy {
    #[track_caller]
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        let ptr = self.handle().as_ptr();
        f(&ptr as *const *mut c_void as ConstTypePtr)
    }
}

impl PtrArg for ObjectRef {
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        let ptr = self.handle.as_ptr();
        f(&ptr as *const *mut c_void as ConstTypePtr)
    }
}

impl PtrReturn for Option<Proxy> {
    #[track_caller]
    unsafe fn from_ret(call: impl FnOnce(*mut c_void)) -> Self {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        call(&mut ptr as *mut *mut c_void as *mut c_void);
        match escalate(Proxy::from_returned(NativeHandle::from_ptr(ptr))) {
            Ok(proxy) => proxy,
            Err(err) => {
                tracing::error!(target: "tether::call", "cannot wrap returned object: {}", err);
                None
            }
        }
    }
}

impl<T: PtrArg + ?Sized> PtrArg for &T {
    fn with_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> R {
        (**self).with_ptr(f)
    }
}

/// Issue a ptrcall with already-lent argument pointers
///
/// # Safety
///
/// Each pointer in `args` must point to a value of the native layout the
/// method expects for that position, and `R` must match its return layout.
#[track_caller]
pub unsafe fn raw_ptrcall<R: PtrReturn>(bind: &MethodBind, this: NativeHandle, args: &[ConstTypePtr]) -> R {
    let method = bind.get();
    let iface = interface();
    tracing::trace!(target: "tether::call", class = bind.class().as_str(), method = bind.method().as_str(), argc = args.len(), "ptrcall");
    // SAFETY: forwarded to the caller.
    unsafe {
        R::from_ret(|ret| (iface.object_method_bind_ptrcall)(method.as_ptr(), this.as_ptr(), args.as_ptr(), ret))
    }
}

// Typed entry points for each arity. Argument pointers are scoped by the
// nested `with_ptr` closures; layouts are the caller's obligation.

/// Call a method that takes no arguments
///
/// # Safety
///
/// `R` must match the native method's return layout (`()` only for methods
/// that return nothing), and `this` must be an object of the bind's class,
/// or null for singletons the native side addresses that way.
#[track_caller]
pub unsafe fn ptrcall0<R: PtrReturn>(bind: &MethodBind, this: NativeHandle) -> R {
    // SAFETY: forwarded to the caller.
    unsafe { raw_ptrcall(bind, this, &[]) }
}

/// Call a method that takes 1 argument
///
/// # Safety
///
/// As for [`ptrcall0`], and each `A` must match the native layout of the
/// parameter in its position.
#[track_caller]
pub unsafe fn ptrcall1<R, A1>(bind: &MethodBind, this: NativeHandle, a1: &A1) -> R
where
    R: PtrReturn,
    A1: PtrArg + ?Sized,
{
    // SAFETY: pointers live until the closures return; layouts are the caller's.
    a1.with_ptr(|p1| unsafe { raw_ptrcall(bind, this, &[p1]) })
}

/// Call a method that takes 2 arguments
///
/// # Safety
///
/// As for [`ptrcall0`], and each `A` must match the native layout of the
/// parameter in its position.
#[track_caller]
pub unsafe fn ptrcall2<R, A1, A2>(bind: &MethodBind, this: NativeHandle, a1: &A1, a2: &A2) -> R
where
    R: PtrReturn,
    A1: PtrArg + ?Sized,
    A2: PtrArg + ?Sized,
{
    a1.with_ptr(|p1| {
        // SAFETY: pointers live until the closures return; layouts are the caller's.
        a2.with_ptr(|p2| unsafe { raw_ptrcall(bind, this, &[p1, p2]) })
    })
}

/// Call a method that takes 3 arguments
///
/// # Safety
///
/// As for [`ptrcall0`], and each `A` must match the native layout of the
/// parameter in its position.
#[track_caller]
pub unsafe fn ptrcall3<R, A1, A2, A3>(bind: &MethodBind, this: NativeHandle, a1: &A1, a2: &A2, a3: &A3) -> R
where
    R: PtrReturn,
    A1: PtrArg + ?Sized,
    A2: PtrArg + ?Sized,
    A3: PtrArg + ?Sized,
{
    a1.with_ptr(|p1| {
        a2.with_ptr(|p2| {
            // SAFETY: pointers live until the closures return; layouts are the caller's.
            a3.with_ptr(|p3| unsafe { raw_ptrcall(bind, this, &[p1, p2, p3]) })
        })
    })
}

/// Call a method that takes 4 arguments
///
/// # Safety
///
/// As for [`ptrcall0`], and each `A` must match the native layout of the
/// parameter in its position.
#[track_caller]
pub unsafe fn ptrcall4<R, A1, A2, A3, A4>(
    bind: &MethodBind,
    this: NativeHandle,
    a1: &A1,
    a2: &A2,
    a3: &A3,
    a4: &A4,
) -> R
where
    R: PtrReturn,
    A1: PtrArg + ?Sized,
    A2: PtrArg + ?Sized,
    A3: PtrArg + ?Sized,
    A4: PtrArg + ?Sized,
{
    a1.with_ptr(|p1| {
        a2.with_ptr(|p2| {
            a3.with_ptr(|p3| {
                // SAFETY: pointers live until the closures return; layouts are the caller's.
                a4.with_ptr(|p4| unsafe { raw_ptrcall(bind, this, &[p1, p2, p3, p4]) })
            })
        })
    })
}

/// Call a method that takes 5 arguments
///
/// # Safety
///
/// As for [`ptrcall0`], and each `A` must match the native layout of the
/// parameter in its position.
#[track_caller]
pub unsafe fn ptrcall5<R, A1, A2, A3, A4, A5>(
    bind: &MethodBind,
    this: NativeHandle,
    a1: &A1,
    a2: &A2,
    a3: &A3,
    a4: &A4,
    a5: &A5,
) -> R
where
    R: PtrReturn,
    A1: PtrArg + ?Sized,
    A2: PtrArg + ?Sized,
    A3: PtrArg + ?Sized,
    A4: PtrArg + ?Sized,
    A5: PtrArg + ?Sized,
{
    a1.with_ptr(|p1| {
        a2.with_ptr(|p2| {
            a3.with_ptr(|p3| {
                a4.with_ptr(|p4| {
                    // SAFETY: pointers live until the closures return; layouts are the caller's.
                    a5.with_ptr(|p5| unsafe { raw_ptrcall(bind, this, &[p1, p2, p3, p4, p5]) })
                })
            })
        })
    })
}

fn variant_ptrs(args: &[Variant]) -> Vec<ConstVariantPtr> {
    args.iter()
        .map(|arg| arg as *const Variant as ConstVariantPtr)
        .collect()
}

/// Call a vararg method with `Variant` arguments
///
/// Arity mismatches come back as contract violations; use [`varcall`] to
/// have those panic instead.
pub fn try_varcall(bind: &MethodBind, this: NativeHandle, args: &[Variant]) -> Result<Variant> {
    let method = bind.resolve()?;
    let ptrs = variant_ptrs(args);
    let mut ret = Variant::Nil;
    let mut error = CallError::ok();
    tracing::trace!(target: "tether::call", class = bind.class().as_str(), method = bind.method().as_str(), argc = args.len(), "varcall");
    // SAFETY: `ptrs` points into `args`, and `ret` and `error` outlive the call.
    unsafe {
        (interface().object_method_bind_call)(
            method.as_ptr(),
            this.as_ptr(),
            ptrs.as_ptr(),
            ptrs.len() as i64,
            &mut ret as *mut Variant as *mut c_void,
            &mut error,
        );
    }
    error
        .into_result()
        .map(|()| ret)
        .map_err(|err| BridgeError::from_call(err, bind.method()))
}

/// Like [`try_varcall`], failing fast on contract violations
#[track_caller]
pub fn varcall(bind: &MethodBind, this: NativeHandle, args: &[Variant]) -> Result<Variant> {
    escalate(try_varcall(bind, this, args))
}

/// Call a method on an object by name, without a resolved bind
pub fn try_call_method(this: NativeHandle, method: Identifier, args: &[Variant]) -> Result<Variant> {
    let ptrs = variant_ptrs(args);
    let name = method.raw();
    let mut ret = Variant::Nil;
    let mut error = CallError::ok();
    // SAFETY: `ptrs` points into `args`, and `name`, `ret` and `error` outlive the call.
    unsafe {
        (interface().object_call)(
            this.as_ptr(),
            &name,
            ptrs.as_ptr(),
            ptrs.len() as i64,
            &mut ret as *mut Variant as *mut c_void,
            &mut error,
        );
    }
    error
        .into_result()
        .map(|()| ret)
        .map_err(|err| BridgeError::from_call(err, method))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_i64(ptr: ConstTypePtr) -> i64 {
        unsafe { *(ptr as *const i64) }
    }

    #[test]
    fn test_narrow_ints_are_widened() {
        assert_eq!(7i32.with_ptr(read_i64), 7);
        assert_eq!((-3i8).with_ptr(read_i64), -3);
        assert_eq!(u32::MAX.with_ptr(read_i64), u32::MAX as i64);
    }

    #[test]
    fn test_aggregates_lend_their_own_address() {
        let v = Vector2::new(1.0, 2.0);
        let addr = v.with_ptr(|p| p as usize);
        assert_eq!(addr, &v as *const Vector2 as usize);
    }

    #[test]
    fn test_str_lends_a_string() {
        let len = "hello".with_ptr(|p| unsafe { (&(*(p as *const String))).len() });
        assert_eq!(len, 5);
    }

    #[test]
    fn test_returned_rid_stays_freed() {
        let rid = Rid::new(0xbeef_1001);
        rid::free(rid, |_| {});
        let returned = unsafe { Rid::from_ret(|ret| *(ret as *mut u64) = 0xbeef_1001) };
        assert_eq!(returned, rid);
        assert!(rid::is_freed(returned));
    }

    #[test]
    fn test_return_slots() {
        let n: i32 = unsafe { i32::from_ret(|ret| *(ret as *mut i64) = 0x1_0000_0009) };
        assert_eq!(n, 9);

        let f: f32 = unsafe { f32::from_ret(|ret| *(ret as *mut f64) = 0.5) };
        assert_eq!(f, 0.5);

        let s: String = unsafe { String::from_ret(|ret| *(ret as *mut String) = "abc".into()) };
        assert_eq!(s, "abc");

        let untouched: Vector2 = unsafe { Vector2::from_ret(|_| {}) };
        assert_eq!(untouched, Vector2::ZERO);

        unsafe { <()>::from_ret(|ret| assert!(ret.is_null())) };
    }

    #[test]
    fn test_rid_slot_is_raw_u64() {
        let rid = Rid::new(0xbeef_0001);
        assert_eq!(rid.with_ptr(|p| unsafe { *(p as *const u64) }), 0xbeef_0001);
        let back: Rid = unsafe { Rid::from_ret(|ret| *(ret as *mut u64) = 0xbeef_0002) };
        assert_eq!(back, Rid::new(0xbeef_0002));
    }
}
