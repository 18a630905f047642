//! Callables: something the native side can invoke with a list of variants

use crate::handle::ObjectRef;
use crate::intern::Identifier;
use crate::variant::{Variant, VariantType};
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Trampoline the native side calls to enter a managed function
///
/// `args` points to `argc` pointers to `Variant`; the result is written into
/// the `Variant` at `ret` and failures into `error`.
pub type CallableCallFn = unsafe extern "C" fn(
    userdata: *mut c_void,
    args: *const *const c_void,
    argc: i64,
    ret: *mut c_void,
    error: *mut CallError,
);

/// Releases the userdata of a custom callable
pub type CallableFreeFn = unsafe extern "C" fn(userdata: *mut c_void);

/// Outcome category of a call that went through a trampoline
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallErrorKind {
    #[default]
    Ok = 0,
    InvalidMethod,
    InvalidArgument,
    TooManyArguments,
    TooFewArguments,
    InstanceIsNull,
    /// The managed function panicked; the panic was caught at the boundary
    Panicked,
    /// The managed instance is already borrowed by an outer call
    InstanceBusy,
}

/// Error slot filled in by a trampoline
#[repr(C)]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("{}", describe(.kind, .argument, .expected))]
pub struct CallError {
    pub kind: CallErrorKind,
    /// Offending argument index, or the received count for arity errors
    pub argument: i32,
    /// Expected variant type (as `u32` tag) or expected argument count
    pub expected: i32,
}

impl CallError {
    /// A successful call
    pub fn ok() -> Self {
        Self::default()
    }

    /// Wrong number of arguments
    pub fn argument_count(expected: usize, got: usize) -> Self {
        let kind = if got > expected {
            CallErrorKind::TooManyArguments
        } else {
            CallErrorKind::TooFewArguments
        };
        Self {
            kind,
            argument: got as i32,
            expected: expected as i32,
        }
    }

    /// Argument at `index` had the wrong shape
    pub fn invalid_argument(index: usize, expected: VariantType) -> Self {
        Self {
            kind: CallErrorKind::InvalidArgument,
            argument: index as i32,
            expected: expected as u32 as i32,
        }
    }

    pub fn invalid_method() -> Self {
        Self {
            kind: CallErrorKind::InvalidMethod,
            ..Self::default()
        }
    }

    pub fn instance_is_null() -> Self {
        Self {
            kind: CallErrorKind::InstanceIsNull,
            ..Self::default()
        }
    }

    pub fn panicked() -> Self {
        Self {
            kind: CallErrorKind::Panicked,
            ..Self::default()
        }
    }

    pub fn instance_busy() -> Self {
        Self {
            kind: CallErrorKind::InstanceBusy,
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == CallErrorKind::Ok
    }

    /// Too many or too few arguments
    pub fn is_arity_mismatch(&self) -> bool {
        matches!(
            self.kind,
            CallErrorKind::TooManyArguments | CallErrorKind::TooFewArguments
        )
    }

    /// Turn the slot into a `Result`
    pub fn into_result(self) -> Result<(), CallError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn describe(kind: &CallErrorKind, argument: &i32, expected: &i32) -> String {
    match kind {
        CallErrorKind::Ok => "call succeeded".to_string(),
        CallErrorKind::InvalidMethod => "method does not exist".to_string(),
        CallErrorKind::InvalidArgument => format!("invalid argument at index {argument}"),
        CallErrorKind::TooManyArguments | CallErrorKind::TooFewArguments => {
            format!("expected {expected} arguments, got {argument}")
        }
        CallErrorKind::InstanceIsNull => "instance is null".to_string(),
        CallErrorKind::Panicked => "managed function panicked".to_string(),
        CallErrorKind::InstanceBusy => "instance is already borrowed".to_string(),
    }
}

/// A managed function exposed to native code through a fixed-arity trampoline
pub struct CustomCallable {
    name: Identifier,
    arity: usize,
    userdata: *mut c_void,
    call: CallableCallFn,
    free: Option<CallableFreeFn>,
}

// SAFETY: `new` requires the userdata to be shareable across threads.
unsafe impl Send for CustomCallable {}
// SAFETY: see above.
unsafe impl Sync for CustomCallable {}

impl CustomCallable {
    /// Bundle a trampoline with its userdata
    ///
    /// # Safety
    ///
    /// `call` must accept `userdata` for as long as this value lives, the
    /// userdata must be `Send + Sync`, and `free` (if any) must release it.
    pub unsafe fn new(
        name: Identifier,
        arity: usize,
        userdata: *mut c_void,
        call: CallableCallFn,
        free: Option<CallableFreeFn>,
    ) -> Self {
        Self {
            name,
            arity,
            userdata,
            call,
            free,
        }
    }

    pub fn name(&self) -> Identifier {
        self.name
    }

    /// Number of arguments the trampoline expects
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Enter the trampoline with raw argument pointers
    ///
    /// # Safety
    ///
    /// `args` must point to `argc` valid `Variant` pointers and `ret` to an
    /// initialised `Variant`.
    pub unsafe fn call_raw(
        &self,
        args: *const *const c_void,
        argc: i64,
        ret: *mut c_void,
        error: *mut CallError,
    ) {
        // SAFETY: forwarded from the caller; userdata is valid by construction.
        unsafe { (self.call)(self.userdata, args, argc, ret, error) }
    }

    /// Invoke with borrowed arguments
    pub fn call(&self, args: &[&Variant]) -> Result<Variant, CallError> {
        let ptrs: Vec<*const c_void> = args
            .iter()
            .map(|arg| *arg as *const Variant as *const c_void)
            .collect();
        let mut ret = Variant::Nil;
        let mut error = CallError::ok();
        // SAFETY: `ptrs` and `ret` outlive the call.
        unsafe {
            self.call_raw(
                ptrs.as_ptr(),
                ptrs.len() as i64,
                &mut ret as *mut Variant as *mut c_void,
                &mut error,
            );
        }
        error.into_result().map(|()| ret)
    }
}

impl Drop for CustomCallable {
    fn drop(&mut self) {
        if let Some(free) = self.free {
            // SAFETY: userdata is released exactly once, here.
            unsafe { free(self.userdata) }
        }
    }
}

impl fmt::Debug for CustomCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCallable")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Something that can be invoked by name from either side
#[derive(Debug, Clone, Default)]
pub enum Callable {
    /// Invalid callable; invoking it is an error
    #[default]
    Null,
    /// Invoke `method` on `object`
    Method { object: ObjectRef, method: Identifier },
    /// Invoke a managed function through its trampoline
    Custom(Arc<CustomCallable>),
}

impl Callable {
    /// A callable bound to a method on an object
    pub fn from_object_method(object: ObjectRef, method: impl Into<Identifier>) -> Self {
        Callable::Method {
            object,
            method: method.into(),
        }
    }

    /// Wrap a custom callable
    pub fn from_custom(custom: CustomCallable) -> Self {
        Callable::Custom(Arc::new(custom))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Callable::Null)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Callable::Custom(_))
    }

    /// Method name, or the custom callable's name
    pub fn method_name(&self) -> Option<Identifier> {
        match self {
            Callable::Null => None,
            Callable::Method { method, .. } => Some(*method),
            Callable::Custom(custom) => Some(custom.name()),
        }
    }

    /// Target object for method callables
    pub fn object(&self) -> Option<ObjectRef> {
        match self {
            Callable::Method { object, .. } => Some(*object),
            _ => None,
        }
    }

    /// Fixed arity, known only for custom callables
    pub fn arity(&self) -> Option<usize> {
        match self {
            Callable::Custom(custom) => Some(custom.arity()),
            _ => None,
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callable::Null, Callable::Null) => true,
            (
                Callable::Method { object: a, method: m },
                Callable::Method { object: b, method: n },
            ) => a == b && m == n,
            (Callable::Custom(a), Callable::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Null => write!(f, "Callable()"),
            Callable::Method { object, method } => write!(f, "{}::{}", object, method),
            Callable::Custom(custom) => write!(f, "<{}/{}>", custom.name(), custom.arity()),
        }
    }
}
