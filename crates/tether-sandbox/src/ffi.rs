//! C entry points the sandbox exports to the bridge

use crate::classdb::MethodInfo;
use crate::engine::with_engine;
use std::ffi::c_void;
use tether_bridge::interface::{
    ConstTypePtr, ConstVariantPtr, ExtensionClassInfo, MethodBindPtr, ObjectPtr, TypePtr, VariantPtr,
};
use tether_bridge::{BindLookup, NativeInterface};
use tether_core::{CallError, Identifier, RawName, Variant};

pub(crate) static INTERFACE: NativeInterface = NativeInterface {
    get_method_bind,
    object_method_bind_ptrcall,
    object_method_bind_call,
    object_call,
    classdb_construct_object,
    classdb_is_ref_counted,
    classdb_register_extension_class,
    object_destroy,
    object_get_class_name,
    object_get_instance_id,
    object_get_instance_from_id,
    object_set_instance,
    ref_reference,
    ref_unreference,
    ref_get_count,
};

/// Read a name passed by the bridge
///
/// # Safety
///
/// `raw` must point to a valid `RawName`.
unsafe fn name(raw: *const RawName) -> Option<Identifier> {
    // SAFETY: guaranteed by the caller.
    unsafe { Identifier::from_raw(&*raw) }.ok()
}

/// Borrow `argc` variants from a pointer array
///
/// # Safety
///
/// `args` must hold `argc` valid `Variant` pointers.
pub(crate) unsafe fn variants<'a>(args: *const ConstVariantPtr, argc: i64) -> Vec<&'a Variant> {
    if argc <= 0 || args.is_null() {
        return Vec::new();
    }
    // SAFETY: guaranteed by the caller.
    unsafe {
        std::slice::from_raw_parts(args, argc as usize)
            .iter()
            .map(|p| &*(*p as *const Variant))
            .collect()
    }
}

/// Write a varcall outcome into the bridge's slots
///
/// # Safety
///
/// `ret` must point to a `Variant` and `r_error` to a `CallError`.
unsafe fn write_outcome(outcome: Result<Variant, CallError>, ret: VariantPtr, r_error: *mut CallError) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        match outcome {
            Ok(value) => *(ret as *mut Variant) = value,
            Err(err) => *r_error = err,
        }
    }
}

unsafe extern "C" fn get_method_bind(
    class: *const RawName,
    method: *const RawName,
    hash: i64,
    r_lookup: *mut BindLookup,
) -> MethodBindPtr {
    // SAFETY: the bridge passes interned names.
    let (Some(class), Some(method)) = (unsafe { name(class) }, unsafe { name(method) }) else {
        return std::ptr::null();
    };
    let (info, lookup) = with_engine(|e| {
        *e.stats.bind_lookups.entry((class, method, hash)).or_default() += 1;
        e.classes.find_method(class, method, hash)
    });
    tracing::trace!(target: "tether::sandbox", %class, %method, hash, status = %lookup.status, "bind lookup");
    // SAFETY: `r_lookup` is the bridge's out-parameter.
    unsafe { *r_lookup = lookup };
    info.map_or(std::ptr::null(), MethodInfo::as_bind_ptr)
}

unsafe extern "C" fn object_method_bind_ptrcall(
    method: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    // SAFETY: bind pointers are leaked `MethodInfo`s from `get_method_bind`.
    let info = unsafe { &*(method as *const MethodInfo) };
    let Some(call) = info.ptrcall else {
        tracing::error!(target: "tether::sandbox", method = %info.name, "method has no ptrcall form");
        return;
    };
    let args = if info.arg_count == 0 || args.is_null() {
        &[][..]
    } else {
        // SAFETY: the bridge passes one pointer per declared parameter.
        unsafe { std::slice::from_raw_parts(args, info.arg_count) }
    };
    call(instance, args, ret);
}

unsafe extern "C" fn object_method_bind_call(
    method: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: VariantPtr,
    r_error: *mut CallError,
) {
    // SAFETY: bind pointers are leaked `MethodInfo`s from `get_method_bind`.
    let info = unsafe { &*(method as *const MethodInfo) };
    let outcome = match info.varcall {
        // SAFETY: the bridge passes `argc` variant pointers.
        Some(call) => call(instance, &unsafe { variants(args, argc) }),
        None => Err(CallError::invalid_method()),
    };
    // SAFETY: slots provided by the bridge.
    unsafe { write_outcome(outcome, ret, r_error) };
}

unsafe extern "C" fn object_call(
    instance: ObjectPtr,
    method: *const RawName,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: VariantPtr,
    r_error: *mut CallError,
) {
    // SAFETY: the bridge passes an interned name.
    let outcome = match unsafe { name(method) } {
        // SAFETY: the bridge passes `argc` variant pointers.
        Some(method) => crate::scene::call_by_name(instance, method, &unsafe { variants(args, argc) }),
        None => Err(CallError::invalid_method()),
    };
    // SAFETY: slots provided by the bridge.
    unsafe { write_outcome(outcome, ret, r_error) };
}

unsafe extern "C" fn classdb_construct_object(class: *const RawName) -> ObjectPtr {
    // SAFETY: the bridge passes an interned name.
    match unsafe { name(class) } {
        Some(class) => with_engine(|e| e.construct(class)),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn classdb_is_ref_counted(class: *const RawName) -> u8 {
    // SAFETY: the bridge passes an interned name.
    let Some(class) = (unsafe { name(class) }) else {
        return 0;
    };
    u8::from(with_engine(|e| e.classes.is_ref_counted(class)))
}

unsafe extern "C" fn classdb_register_extension_class(
    class: *const RawName,
    parent: *const RawName,
    info: *const ExtensionClassInfo,
) -> u8 {
    // SAFETY: the bridge passes interned names.
    let (Some(class), Some(parent)) = (unsafe { name(class) }, unsafe { name(parent) }) else {
        return 0;
    };
    // SAFETY: the bridge passes a valid info struct; it is copied here.
    let info = unsafe { *info };
    let ok = with_engine(|e| e.classes.register_extension(class, parent, info));
    tracing::debug!(target: "tether::sandbox", %class, %parent, ok, "extension class registered");
    u8::from(ok)
}

unsafe extern "C" fn object_destroy(instance: ObjectPtr) {
    let Some(record) = with_engine(|e| e.remove(instance)) else {
        return;
    };
    if let Some(attached) = record.instance {
        let info = attached.info.0;
        // SAFETY: the bridge expects exactly one `free_instance` per attachment.
        unsafe { (info.free_instance)(info.class_userdata, attached.data) };
    }
    // Connected callables may hold proxies; drop them with the lock released.
    drop(record);
}

unsafe extern "C" fn object_get_class_name(instance: ObjectPtr, r_name: *mut RawName) -> u8 {
    match with_engine(|e| e.object(instance).map(|record| record.visible_class())) {
        Some(class) => {
            // SAFETY: `r_name` is the bridge's out-parameter; interned names
            // live for the whole process.
            unsafe { *r_name = class.raw() };
            1
        }
        None => 0,
    }
}

unsafe extern "C" fn object_get_instance_id(instance: ObjectPtr) -> u64 {
    with_engine(|e| e.object(instance).map_or(0, |record| record.instance_id))
}

unsafe extern "C" fn object_get_instance_from_id(id: u64) -> ObjectPtr {
    with_engine(|e| e.find_instance(id))
}

unsafe extern "C" fn object_set_instance(instance: ObjectPtr, class: *const RawName, instance_data: *mut c_void) {
    // SAFETY: the bridge passes an interned name.
    let Some(class) = (unsafe { name(class) }) else {
        return;
    };
    with_engine(|e| {
        let Some(info) = e.classes.extension(class) else {
            tracing::error!(target: "tether::sandbox", %class, "set_instance for a class that is not an extension");
            return;
        };
        if let Some(record) = e.object_mut(instance) {
            record.instance = Some(crate::engine::AttachedInstance {
                class,
                info,
                data: instance_data,
            });
        }
    });
}

unsafe extern "C" fn ref_reference(instance: ObjectPtr) -> u8 {
    with_engine(|e| match e.object_mut(instance) {
        Some(record) => {
            record.refcount += 1;
            1
        }
        None => 0,
    })
}

unsafe extern "C" fn ref_unreference(instance: ObjectPtr) -> u8 {
    with_engine(|e| match e.object_mut(instance) {
        Some(record) => {
            record.refcount -= 1;
            u8::from(record.refcount <= 0)
        }
        None => 0,
    })
}

unsafe extern "C" fn ref_get_count(instance: ObjectPtr) -> i64 {
    with_engine(|e| e.object(instance).map_or(0, |record| record.refcount))
}
