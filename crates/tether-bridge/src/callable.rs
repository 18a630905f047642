//! Managed functions as native callables
//!
//! A Rust closure becomes a `Callable` by being boxed behind a single C
//! trampoline. The closure's parameter tuple fixes its arity: the trampoline
//! checks the argument count first, then converts each `Variant`, and reports
//! any failure through the `CallError` slot. Panics never cross the boundary.

use crate::call::try_call_method;
use crate::error::{escalate, BridgeError, Result};
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tether_core::{intern, CallError, Callable, CustomCallable, FromVariant, ToVariant, Variant};

/// A fixed-size parameter list decoded from variants
pub trait ParamList: Sized {
    const ARITY: usize;

    /// Check the count, then convert each argument in order
    fn from_args(args: &[&Variant]) -> std::result::Result<Self, CallError>;
}

macro_rules! impl_param_list {
    ($arity:literal; $($ty:ident : $idx:tt),*) => {
        impl<$($ty: FromVariant),*> ParamList for ($($ty,)*) {
            const ARITY: usize = $arity;

            fn from_args(args: &[&Variant]) -> std::result::Result<Self, CallError> {
                if args.len() != $arity {
                    return Err(CallError::argument_count($arity, args.len()));
                }
                Ok(($(
                    $ty::from_variant(args[$idx])
                        .map_err(|e| CallError::invalid_argument($idx, e.expected))?,
                )*))
            }
        }
    };
}

impl_param_list!(0;);
impl_param_list!(1; A:0);
impl_param_list!(2; A:0, B:1);
impl_param_list!(3; A:0, B:1, C:2);
impl_param_list!(4; A:0, B:1, C:2, D:3);
impl_param_list!(5; A:0, B:1, C:2, D:3, E:4);
impl_param_list!(6; A:0, B:1, C:2, D:3, E:4, F:5);

pub(crate) type ErasedFn = Box<dyn Fn(&[&Variant]) -> std::result::Result<Variant, CallError> + Send + Sync>;

/// Erase a typed closure into one that takes borrowed variants
pub(crate) fn erase<A, R, F>(f: F) -> ErasedFn
where
    A: ParamList,
    R: ToVariant,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    Box::new(move |args| A::from_args(args).map(|params| f(params).to_variant()))
}

/// Collect a raw `(args, argc)` pair into borrowed variants
///
/// # Safety
///
/// `args` must point to `argc` valid `Variant` pointers (or be anything when
/// `argc` is zero).
pub(crate) unsafe fn borrow_args<'a>(args: *const *const c_void, argc: i64) -> Vec<&'a Variant> {
    if argc <= 0 || args.is_null() {
        return Vec::new();
    }
    // SAFETY: guaranteed by the caller.
    unsafe {
        std::slice::from_raw_parts(args, argc as usize)
            .iter()
            .map(|ptr| &*(*ptr as *const Variant))
            .collect()
    }
}

unsafe extern "C" fn trampoline(
    userdata: *mut c_void,
    args: *const *const c_void,
    argc: i64,
    ret: *mut c_void,
    error: *mut CallError,
) {
    // SAFETY: userdata is the boxed closure installed by `callable_from_fn`.
    let func = unsafe { &*(userdata as *const ErasedFn) };
    // SAFETY: the native side passes `argc` variant pointers.
    let args = unsafe { borrow_args(args, argc) };
    let outcome = catch_unwind(AssertUnwindSafe(|| func(&args)));
    // SAFETY: `ret` and `error` are valid slots for the duration of the call.
    unsafe {
        match outcome {
            Ok(Ok(value)) => *(ret as *mut Variant) = value,
            Ok(Err(err)) => *error = err,
            Err(_) => {
                tracing::error!(target: "tether::call", "managed callable panicked");
                *error = CallError::panicked();
            }
        }
    }
}

unsafe extern "C" fn free_closure(userdata: *mut c_void) {
    // SAFETY: userdata came from `Box::into_raw` in `callable_from_fn`.
    drop(unsafe { Box::from_raw(userdata as *mut ErasedFn) });
}

/// Expose a closure to native code as a fixed-arity `Callable`
///
/// ```ignore
/// let on_hit = callable_from_fn("on_hit", |(damage, source): (i64, String)| {
///     println!("{source} dealt {damage}");
/// });
/// ```
pub fn callable_from_fn<A, R, F>(name: &str, f: F) -> Callable
where
    A: ParamList,
    R: ToVariant,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    let userdata = Box::into_raw(Box::new(erase(f))) as *mut c_void;
    // SAFETY: the trampoline and free function both expect a boxed `ErasedFn`,
    // which is `Send + Sync`.
    let custom = unsafe { CustomCallable::new(intern(name), A::ARITY, userdata, trampoline, Some(free_closure)) };
    Callable::from_custom(custom)
}

/// Invoking any callable from managed code
pub trait CallableExt {
    /// Invoke with `Variant` arguments, reporting every failure
    fn try_callv(&self, args: &[Variant]) -> Result<Variant>;

    /// Invoke, failing fast on arity mismatches and other contract violations
    #[track_caller]
    fn callv(&self, args: &[Variant]) -> Result<Variant> {
        escalate(self.try_callv(args))
    }
}

impl CallableExt for Callable {
    fn try_callv(&self, args: &[Variant]) -> Result<Variant> {
        match self {
            Callable::Null => Err(BridgeError::Call(CallError::invalid_method())),
            Callable::Custom(custom) => {
                let refs: Vec<&Variant> = args.iter().collect();
                custom
                    .call(&refs)
                    .map_err(|err| BridgeError::from_call(err, custom.name()))
            }
            Callable::Method { object, method } => {
                if object.is_null() {
                    return Err(BridgeError::Call(CallError::instance_is_null()));
                }
                try_call_method(object.handle, *method, args)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Violation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tether_core::{CallErrorKind, VariantType};

    fn five_ints() -> Vec<Variant> {
        (1..=5).map(Variant::Int).collect()
    }

    #[test]
    fn test_param_list_arity() {
        assert_eq!(<() as ParamList>::ARITY, 0);
        assert_eq!(<(i64, String, f64) as ParamList>::ARITY, 3);
        assert_eq!(<(i64, i64, i64, i64, i64, i64) as ParamList>::ARITY, 6);
    }

    #[test]
    fn test_param_list_converts_in_order() {
        let a = Variant::Int(3);
        let b = Variant::from("x");
        let (n, s) = <(i32, String)>::from_args(&[&a, &b]).unwrap();
        assert_eq!((n, s.as_str()), (3, "x"));
    }

    #[test]
    fn test_param_list_reports_bad_argument() {
        let a = Variant::Int(3);
        let b = Variant::Int(4);
        let err = <(i64, String)>::from_args(&[&a, &b]).unwrap_err();
        assert_eq!(err.kind, CallErrorKind::InvalidArgument);
        assert_eq!(err.argument, 1);
        assert_eq!(err.expected, VariantType::String as u32 as i32);
    }

    #[test]
    fn test_five_args_arrive_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callable = callable_from_fn("collect5", move |(a, b, c, d, e): (i64, i64, i64, i64, i64)| {
            sink.lock().unwrap().extend([a, b, c, d, e]);
            a + b + c + d + e
        });
        assert_eq!(callable.arity(), Some(5));
        assert_eq!(callable.try_callv(&five_ints()).unwrap(), Variant::Int(15));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_four_args_is_arity_violation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callable = callable_from_fn("sum5", move |(a, b, c, d, e): (i64, i64, i64, i64, i64)| {
            counter.fetch_add(1, Ordering::SeqCst);
            a + b + c + d + e
        });
        let mut args = five_ints();
        args.pop();
        let err = callable.try_callv(&args).unwrap_err();
        assert_eq!(
            err.violation(),
            Some(Violation::ArityMismatch {
                name: intern("sum5"),
                expected: 5,
                got: 4,
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "expects 5 arguments, got 6")]
    fn test_callv_panics_on_arity_mismatch() {
        let callable = callable_from_fn("strict5", |(_, _, _, _, _): (i64, i64, i64, i64, i64)| ());
        let mut args = five_ints();
        args.push(Variant::Nil);
        let _ = callable.callv(&args);
    }

    #[test]
    fn test_panic_is_caught_at_trampoline() {
        let callable = callable_from_fn("boom", |(): ()| -> i64 { panic!("boom") });
        let err = callable.try_callv(&[]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Call(CallError {
                kind: CallErrorKind::Panicked,
                ..
            })
        ));
    }

    #[test]
    fn test_closure_is_freed_with_last_clone() {
        let token = Arc::new(());
        let held = token.clone();
        let callable = callable_from_fn("hold", move |(): ()| Arc::strong_count(&held) as i64);
        let copy = callable.clone();
        assert_eq!(Arc::strong_count(&token), 2);
        drop(callable);
        assert_eq!(Arc::strong_count(&token), 2);
        drop(copy);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_null_callable_is_invalid_method() {
        let err = Callable::Null.try_callv(&[]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Call(CallError {
                kind: CallErrorKind::InvalidMethod,
                ..
            })
        ));
    }
}
