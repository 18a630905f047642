//! Scene classes: plain `Node`s with signals and virtuals, ref-counted `Resource`s

use crate::classdb::ClassDb;
use crate::engine::with_engine;
use crate::marshal::{arg_ref, write_ret};
use tether_bridge::interface::{ConstTypePtr, ObjectPtr, TypePtr, VariantPtr};
use tether_core::{CallError, Callable, Identifier, RawName, Variant, VariantType};

pub const NODE: &str = "Node";
pub const RESOURCE: &str = "Resource";

pub const HASH_GET_NAME: i64 = 0x7774_a5d2;
/// Signature `get_name` had before it was changed to return `String`
pub const HASH_GET_NAME_LEGACY: i64 = 0x7774_a5d1;
pub const HASH_SET_NAME: i64 = 0x0836_1a6c;
pub const HASH_CONNECT: i64 = 0x45be_2c1f;
pub const HASH_GET_CONNECTION_COUNT: i64 = 0x2b90_77d3;
pub const HASH_EMIT_SIGNAL: i64 = 0x4651_e0a4;
pub const HASH_GET_PATH: i64 = 0x201b_c0e7;
pub const HASH_SET_PATH: i64 = 0x5d9a_4f18;
pub const HASH_DUPLICATE: i64 = 0x3a0d_96b5;

pub(crate) fn register(classes: &mut ClassDb) {
    classes
        .add_class(NODE, Some("Object"))
        .ptr_method("get_name", HASH_GET_NAME, 0, node_get_name)
        .compat_method("get_name", HASH_GET_NAME_LEGACY, 0, node_get_name)
        .ptr_method("set_name", HASH_SET_NAME, 1, node_set_name)
        .ptr_method("connect", HASH_CONNECT, 2, node_connect)
        .ptr_method("get_connection_count", HASH_GET_CONNECTION_COUNT, 1, node_get_connection_count)
        .var_method("emit_signal", HASH_EMIT_SIGNAL, node_emit_signal);

    classes
        .add_class(RESOURCE, Some("RefCounted"))
        .ptr_method("get_path", HASH_GET_PATH, 0, resource_get_path)
        .ptr_method("set_path", HASH_SET_PATH, 1, resource_set_path)
        .ptr_method("duplicate", HASH_DUPLICATE, 0, resource_duplicate);
}

fn node_get_name(this: ObjectPtr, _: &[ConstTypePtr], ret: TypePtr) {
    let name = with_engine(|e| e.object(this).map(|r| r.name.clone())).unwrap_or_default();
    // SAFETY: String return slot.
    unsafe { write_ret(ret, name) };
}

fn node_set_name(this: ObjectPtr, args: &[ConstTypePtr], _: TypePtr) {
    // SAFETY: (String) as registered.
    let name = unsafe { arg_ref::<String>(args, 0) }.clone();
    with_engine(|e| {
        if let Some(record) = e.object_mut(this) {
            record.name = name;
        }
    });
}

/// Read a name argument, which travels as a `RawName`
///
/// # Safety
///
/// `args[index]` must point to a `RawName`.
unsafe fn name_arg(args: &[ConstTypePtr], index: usize) -> Option<Identifier> {
    // SAFETY: guaranteed by the caller.
    unsafe { Identifier::from_raw(arg_ref::<RawName>(args, index)) }.ok()
}

fn node_connect(this: ObjectPtr, args: &[ConstTypePtr], _: TypePtr) {
    // SAFETY: (StringName, Callable) as registered.
    let (signal, callable) = unsafe { (name_arg(args, 0), arg_ref::<Callable>(args, 1).clone()) };
    let Some(signal) = signal else {
        return;
    };
    with_engine(|e| {
        if let Some(record) = e.object_mut(this) {
            record.connections.entry(signal).or_default().push(callable);
        }
    });
}

fn node_get_connection_count(this: ObjectPtr, args: &[ConstTypePtr], ret: TypePtr) {
    // SAFETY: (StringName) as registered.
    let signal = unsafe { name_arg(args, 0) };
    let count = signal
        .and_then(|signal| {
            with_engine(|e| {
                e.object(this)
                    .and_then(|r| r.connections.get(&signal).map(Vec::len))
            })
        })
        .unwrap_or(0);
    // SAFETY: int return slot.
    unsafe { write_ret(ret, count as i64) };
}

fn node_emit_signal(this: ObjectPtr, args: &[&Variant]) -> Result<Variant, CallError> {
    let Some((signal, rest)) = args.split_first() else {
        return Err(CallError::argument_count(1, 0));
    };
    let signal = signal
        .as_string_name()
        .ok_or_else(|| CallError::invalid_argument(0, VariantType::StringName))?;
    let targets = with_engine(|e| {
        e.object(this)
            .map(|r| r.connections.get(&signal).cloned().unwrap_or_default())
    })
    .ok_or_else(CallError::instance_is_null)?;

    tracing::trace!(target: "tether::sandbox", %signal, receivers = targets.len(), "emit");
    for target in &targets {
        invoke_callable(target, rest)?;
    }
    Ok(Variant::Nil)
}

fn resource_get_path(this: ObjectPtr, _: &[ConstTypePtr], ret: TypePtr) {
    let path = with_engine(|e| e.object(this).map(|r| r.path.clone())).unwrap_or_default();
    // SAFETY: String return slot.
    unsafe { write_ret(ret, path) };
}

fn resource_set_path(this: ObjectPtr, args: &[ConstTypePtr], _: TypePtr) {
    // SAFETY: (String) as registered.
    let path = unsafe { arg_ref::<String>(args, 0) }.clone();
    with_engine(|e| {
        if let Some(record) = e.object_mut(this) {
            record.path = path;
        }
    });
}

fn resource_duplicate(this: ObjectPtr, _: &[ConstTypePtr], ret: TypePtr) {
    let copy = with_engine(|e| {
        let record = e.object(this)?;
        let (class, path) = (record.class, record.path.clone());
        let copy = e.construct(class);
        if let Some(new_record) = e.object_mut(copy) {
            new_record.path = path;
        }
        Some(copy)
    })
    .unwrap_or(std::ptr::null_mut());
    // SAFETY: object return slots hold an object pointer.
    unsafe { write_ret(ret, copy) };
}

/// Invoke a callable from the native side
pub fn invoke_callable(callable: &Callable, args: &[&Variant]) -> Result<Variant, CallError> {
    match callable {
        Callable::Null => Err(CallError::invalid_method()),
        Callable::Custom(custom) => custom.call(args),
        Callable::Method { object, method } => call_by_name(object.handle.as_ptr(), *method, args),
    }
}

/// Dynamic call: a vararg method of the class, else a managed override
pub fn call_by_name(this: ObjectPtr, method: Identifier, args: &[&Variant]) -> Result<Variant, CallError> {
    let class = with_engine(|e| e.object(this).map(|r| r.class)).ok_or_else(CallError::instance_is_null)?;
    let native = with_engine(|e| e.classes.find_by_name(class, method)).and_then(|info| info.varcall);
    if let Some(call) = native {
        return call(this, args);
    }
    invoke_virtual(this, method, args).unwrap_or_else(|| Err(CallError::invalid_method()))
}

/// Run a managed override if the object's class has one
///
/// `None` when there is no managed instance or it does not override `method`.
pub fn invoke_virtual(this: ObjectPtr, method: Identifier, args: &[&Variant]) -> Option<Result<Variant, CallError>> {
    let attached = with_engine(|e| {
        e.stats.virtual_checks += 1;
        e.object(this).and_then(|r| r.instance)
    })?;
    let info = attached.info.0;
    let name = method.raw();
    // SAFETY: the userdata and name are valid for the call.
    if unsafe { (info.has_virtual)(info.class_userdata, &name) } == 0 {
        return None;
    }
    with_engine(|e| e.stats.virtual_calls += 1);

    let ptrs: Vec<*const std::ffi::c_void> = args
        .iter()
        .map(|v| *v as *const Variant as *const std::ffi::c_void)
        .collect();
    let mut ret = Variant::Nil;
    let mut error = CallError::ok();
    // SAFETY: the instance data stays attached while the object is alive, and
    // every slot outlives the call.
    let handled = unsafe {
        (info.call_virtual)(
            attached.data,
            &name,
            ptrs.as_ptr(),
            ptrs.len() as i64,
            &mut ret as *mut Variant as VariantPtr,
            &mut error,
        )
    };
    (handled != 0).then(|| error.into_result().map(|()| ret))
}

/// Deliver `_ready` to one object
pub fn notify_ready(this: ObjectPtr) -> Option<Result<Variant, CallError>> {
    invoke_virtual(this, Identifier::new("_ready"), &[])
}

/// Deliver `_process(delta)` to one object
pub fn notify_process(this: ObjectPtr, delta: f64) -> Option<Result<Variant, CallError>> {
    invoke_virtual(this, Identifier::new("_process"), &[&Variant::Float(delta)])
}
