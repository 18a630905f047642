//! The function table the native runtime hands to the bridge at startup
//!
//! Every native entry point the bridge uses goes through this table. It is
//! installed exactly once, before any other bridge operation; the first
//! installation wins and later attempts are refused.
//!
//! Calling conventions used throughout:
//! - names cross as `*const RawName` pointing to interned storage
//! - objects cross as opaque `ObjectPtr`s
//! - ptrcall arguments are an array of pointers to values in native layout,
//!   and the callee writes its result into the slot at `ret`
//! - varcall arguments are an array of pointers to `Variant`, the result is
//!   written into the `Variant` at `ret` and failures into a `CallError`

use crate::config::BridgeConfig;
use crate::error::{fatal, Violation};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::{LazyLock, OnceLock};
use tether_core::{CallError, RawName};

pub type ObjectPtr = *mut c_void;
pub type MethodBindPtr = *const c_void;
pub type ConstTypePtr = *const c_void;
pub type TypePtr = *mut c_void;
pub type ConstVariantPtr = *const c_void;
pub type VariantPtr = *mut c_void;

/// How the native side matched a `(class, method, hash)` query
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindStatus {
    /// The hash matched the method's current signature
    #[default]
    Exact = 0,
    /// The hash matched a compatibility shim kept for an older signature
    Compatibility,
    /// The method exists but under a different hash
    HashMismatch,
    MissingMethod,
    MissingClass,
}

impl fmt::Display for BindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BindStatus::Exact => "exact match",
            BindStatus::Compatibility => "compatibility shim",
            BindStatus::HashMismatch => "signature hash mismatch",
            BindStatus::MissingMethod => "no such method",
            BindStatus::MissingClass => "no such class",
        };
        f.write_str(text)
    }
}

/// Out-parameter of `get_method_bind`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindLookup {
    pub status: BindStatus,
    /// The method's current hash, filled in on `HashMismatch`
    pub current_hash: i64,
}

/// Callbacks the native side uses to reach a managed extension class
///
/// The native side copies this struct at registration time.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExtensionClassInfo {
    /// Passed back to `has_virtual` and `free_instance`
    pub class_userdata: *mut c_void,
    /// Returns 1 if the class overrides the named virtual
    pub has_virtual: unsafe extern "C" fn(class_userdata: *mut c_void, name: *const RawName) -> u8,
    /// Runs an override on an instance; returns 1 if one was found
    pub call_virtual: unsafe extern "C" fn(
        instance_data: *mut c_void,
        name: *const RawName,
        args: *const ConstVariantPtr,
        argc: i64,
        ret: VariantPtr,
        r_error: *mut CallError,
    ) -> u8,
    /// Releases the managed half when the native object is destroyed
    pub free_instance: unsafe extern "C" fn(class_userdata: *mut c_void, instance_data: *mut c_void),
}

/// Entry points exported by the native runtime
#[repr(C)]
pub struct NativeInterface {
    /// Look up a method by class, name and signature hash; null on failure
    pub get_method_bind: unsafe extern "C" fn(
        class: *const RawName,
        method: *const RawName,
        hash: i64,
        r_lookup: *mut BindLookup,
    ) -> MethodBindPtr,
    pub object_method_bind_ptrcall: unsafe extern "C" fn(
        method: MethodBindPtr,
        instance: ObjectPtr,
        args: *const ConstTypePtr,
        ret: TypePtr,
    ),
    pub object_method_bind_call: unsafe extern "C" fn(
        method: MethodBindPtr,
        instance: ObjectPtr,
        args: *const ConstVariantPtr,
        argc: i64,
        ret: VariantPtr,
        r_error: *mut CallError,
    ),
    /// Dynamic call by method name, used for method callables
    pub object_call: unsafe extern "C" fn(
        instance: ObjectPtr,
        method: *const RawName,
        args: *const ConstVariantPtr,
        argc: i64,
        ret: VariantPtr,
        r_error: *mut CallError,
    ),
    /// Instantiate a class; null if the class is unknown
    pub classdb_construct_object: unsafe extern "C" fn(class: *const RawName) -> ObjectPtr,
    pub classdb_is_ref_counted: unsafe extern "C" fn(class: *const RawName) -> u8,
    /// Returns 0 if the parent class is unknown
    pub classdb_register_extension_class: unsafe extern "C" fn(
        class: *const RawName,
        parent: *const RawName,
        info: *const ExtensionClassInfo,
    ) -> u8,
    pub object_destroy: unsafe extern "C" fn(instance: ObjectPtr),
    /// Writes the object's class name; returns 0 for dead objects
    pub object_get_class_name: unsafe extern "C" fn(instance: ObjectPtr, r_name: *mut RawName) -> u8,
    pub object_get_instance_id: unsafe extern "C" fn(instance: ObjectPtr) -> u64,
    /// Null if no live object has that id
    pub object_get_instance_from_id: unsafe extern "C" fn(id: u64) -> ObjectPtr,
    /// Attach managed instance data to an object of an extension class
    pub object_set_instance:
        unsafe extern "C" fn(instance: ObjectPtr, class: *const RawName, instance_data: *mut c_void),
    /// Returns 1 on success
    pub ref_reference: unsafe extern "C" fn(instance: ObjectPtr) -> u8,
    /// Returns 1 when the count reached zero and the caller must destroy
    pub ref_unreference: unsafe extern "C" fn(instance: ObjectPtr) -> u8,
    pub ref_get_count: unsafe extern "C" fn(instance: ObjectPtr) -> i64,
}

/// A resolved native method, valid until the native library unloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodPtr(NonNull<c_void>);

// SAFETY: opaque token owned by the native side, never dereferenced here.
unsafe impl Send for MethodPtr {}
// SAFETY: see above.
unsafe impl Sync for MethodPtr {}

impl MethodPtr {
    /// `None` for null
    pub fn new(ptr: MethodBindPtr) -> Option<Self> {
        NonNull::new(ptr as *mut c_void).map(Self)
    }

    pub fn as_ptr(self) -> MethodBindPtr {
        self.0.as_ptr()
    }
}

struct Installed {
    table: &'static NativeInterface,
    config: BridgeConfig,
}

static INSTALLED: OnceLock<Installed> = OnceLock::new();
static DEFAULT_CONFIG: LazyLock<BridgeConfig> = LazyLock::new(BridgeConfig::default);

/// Install the native function table with the default configuration
///
/// Returns `false` if a table was already installed; the existing one stays.
///
/// # Safety
///
/// Every function in `table` must honour the contract documented on
/// [`NativeInterface`] for the rest of the process.
pub unsafe fn initialize(table: &'static NativeInterface) -> bool {
    // SAFETY: forwarded to the caller.
    unsafe { initialize_with_config(table, BridgeConfig::default()) }
}

/// Install the native function table
///
/// # Safety
///
/// See [`initialize`].
pub unsafe fn initialize_with_config(table: &'static NativeInterface, config: BridgeConfig) -> bool {
    let installed = INSTALLED.set(Installed { table, config }).is_ok();
    if installed {
        tracing::info!(target: "tether", config = ?self::config(), "native interface installed");
    } else {
        tracing::warn!(target: "tether", "native interface already installed, keeping the first one");
    }
    installed
}

/// Check whether a native table has been installed
pub fn is_initialized() -> bool {
    INSTALLED.get().is_some()
}

/// The installed table
///
/// # Panics
///
/// Panics with a contract violation if [`initialize`] has not run.
#[track_caller]
pub fn interface() -> &'static NativeInterface {
    match INSTALLED.get() {
        Some(installed) => installed.table,
        None => fatal(Violation::NotInitialized.into()),
    }
}

/// The active configuration, or the default one before installation
pub fn config() -> &'static BridgeConfig {
    match INSTALLED.get() {
        Some(installed) => &installed.config,
        None => &DEFAULT_CONFIG,
    }
}
