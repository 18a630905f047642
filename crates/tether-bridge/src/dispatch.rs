//! Extension classes and virtual method dispatch
//!
//! A managed type extends a native class by implementing [`ExtensionClass`].
//! Its overrides are collected into a [`VirtualTable`] once per type and kept
//! for the rest of the process. The native side asks `has_virtual` before
//! every virtual call, so a class that does not override a method costs one
//! hash lookup and nothing else.

use crate::callable::{borrow_args, ParamList};
use crate::error::{BridgeError, Result};
use crate::interface::{interface, ConstVariantPtr, ExtensionClassInfo, VariantPtr};
use crate::object::Proxy;
use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use tether_core::{intern, CallError, Identifier, RawName, ToVariant, Variant};

/// A managed type that extends a native class
pub trait ExtensionClass: Send + 'static {
    /// Name the class is registered under
    const CLASS: &'static str;
    /// Native class being extended
    const BASE: &'static str;

    /// Add this type's overrides to its table
    fn register_virtuals(table: &mut VirtualTable<Self>)
    where
        Self: Sized;
}

type VirtualFn<T> = Box<dyn Fn(&mut T, &[&Variant]) -> std::result::Result<Variant, CallError> + Send + Sync>;

/// Overrides of one extension class, keyed by method name
pub struct VirtualTable<T> {
    class: Identifier,
    entries: IndexMap<Identifier, VirtualFn<T>>,
}

impl<T: 'static> VirtualTable<T> {
    pub fn new(class: impl Into<Identifier>) -> Self {
        Self {
            class: class.into(),
            entries: IndexMap::new(),
        }
    }

    /// Register an override; its parameter tuple fixes the arity
    pub fn add<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: ParamList,
        R: ToVariant,
        F: Fn(&mut T, A) -> R + Send + Sync + 'static,
    {
        let erased: VirtualFn<T> = Box::new(move |this, args| A::from_args(args).map(|params| f(this, params).to_variant()));
        if self.entries.insert(intern(name), erased).is_some() {
            tracing::warn!(target: "tether::dispatch", class = %self.class, method = name, "override registered twice, keeping the last");
        }
        self
    }

    pub fn class(&self) -> Identifier {
        self.class
    }

    /// Fast pre-check the native side runs before each virtual call
    pub fn has_override(&self, name: &Identifier) -> bool {
        self.entries.contains_key(name)
    }

    /// Run an override; `None` if the class does not define it
    pub fn call(&self, this: &mut T, name: &Identifier, args: &[&Variant]) -> Option<std::result::Result<Variant, CallError>> {
        self.entries.get(name).map(|f| f(this, args))
    }

    /// Overridden names, in registration order
    pub fn names(&self) -> impl Iterator<Item = Identifier> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static TABLES: LazyLock<RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// The table for `T`, built on first request
pub fn virtual_table<T: ExtensionClass>() -> &'static VirtualTable<T> {
    let key = TypeId::of::<T>();
    let cached = TABLES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .copied();
    let erased = match cached {
        Some(table) => table,
        None => {
            let mut tables = TABLES.write().unwrap_or_else(PoisonError::into_inner);
            *tables.entry(key).or_insert_with(|| {
                let mut table = VirtualTable::<T>::new(T::CLASS);
                T::register_virtuals(&mut table);
                tracing::debug!(target: "tether::dispatch", class = T::CLASS, overrides = table.len(), "virtual table built");
                let leaked: &'static VirtualTable<T> = Box::leak(Box::new(table));
                leaked as &'static (dyn Any + Send + Sync)
            })
        }
    };
    match erased.downcast_ref::<VirtualTable<T>>() {
        Some(table) => table,
        None => unreachable!("virtual table registry is keyed by TypeId"),
    }
}

/// Managed half of an extension object, shared with the native side
pub struct InstanceStorage<T> {
    value: Mutex<T>,
}

static REGISTERED: LazyLock<Mutex<HashSet<TypeId>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Register `T` with the native class database; later calls do nothing
pub fn register_class<T: ExtensionClass>() -> Result<()> {
    let mut registered = REGISTERED.lock().unwrap_or_else(PoisonError::into_inner);
    if registered.contains(&TypeId::of::<T>()) {
        return Ok(());
    }
    let table = virtual_table::<T>();
    let info = ExtensionClassInfo {
        class_userdata: table as *const VirtualTable<T> as *mut c_void,
        has_virtual: has_virtual::<T>,
        call_virtual: call_virtual::<T>,
        free_instance: free_instance::<T>,
    };
    let class = intern(T::CLASS).raw();
    let base = intern(T::BASE).raw();
    // SAFETY: names are interned and `info` is copied by the native side.
    let ok = unsafe { (interface().classdb_register_extension_class)(&class, &base, &info) } != 0;
    if !ok {
        return Err(BridgeError::UnknownClass(intern(T::BASE)));
    }
    registered.insert(TypeId::of::<T>());
    tracing::info!(target: "tether::dispatch", class = T::CLASS, base = T::BASE, "extension class registered");
    Ok(())
}

unsafe extern "C" fn has_virtual<T: ExtensionClass>(class_userdata: *mut c_void, name: *const RawName) -> u8 {
    // SAFETY: class_userdata is the leaked table passed at registration.
    let table = unsafe { &*(class_userdata as *const VirtualTable<T>) };
    // SAFETY: the native side passes a valid name.
    match unsafe { Identifier::from_raw(&*name) } {
        Ok(name) => u8::from(table.has_override(&name)),
        Err(_) => 0,
    }
}

unsafe extern "C" fn call_virtual<T: ExtensionClass>(
    instance_data: *mut c_void,
    name: *const RawName,
    args: *const ConstVariantPtr,
    argc: i64,
    ret: VariantPtr,
    r_error: *mut CallError,
) -> u8 {
    // SAFETY: instance_data is the storage attached in `Instance::new_alloc`.
    let storage = unsafe { &*(instance_data as *const InstanceStorage<T>) };
    // SAFETY: the native side passes a valid name.
    let Ok(name) = (unsafe { Identifier::from_raw(&*name) }) else {
        return 0;
    };
    let table = virtual_table::<T>();
    if !table.has_override(&name) {
        return 0;
    }
    // SAFETY: the native side passes `argc` variant pointers.
    let args = unsafe { borrow_args(args, argc) };
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut value = match storage.value.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(CallError::instance_busy()),
        };
        table
            .call(&mut value, &name, &args)
            .unwrap_or_else(|| Err(CallError::invalid_method()))
    }));
    // SAFETY: `ret` and `r_error` are valid slots for the duration of the call.
    unsafe {
        match outcome {
            Ok(Ok(value)) => *(ret as *mut Variant) = value,
            Ok(Err(err)) => {
                tracing::warn!(target: "tether::dispatch", class = T::CLASS, method = %name, %err, "virtual call failed");
                *r_error = err;
            }
            Err(_) => {
                tracing::error!(target: "tether::dispatch", class = T::CLASS, method = %name, "virtual override panicked");
                *r_error = CallError::panicked();
            }
        }
    }
    1
}

unsafe extern "C" fn free_instance<T: ExtensionClass>(_class_userdata: *mut c_void, instance_data: *mut c_void) {
    // SAFETY: instance_data came from `Arc::into_raw` in `Instance::new_alloc`.
    drop(unsafe { Arc::from_raw(instance_data as *const InstanceStorage<T>) });
    tracing::trace!(target: "tether::dispatch", class = T::CLASS, "instance storage released");
}

/// A native object whose behaviour is extended by a managed `T`
pub struct Instance<T: ExtensionClass> {
    proxy: Proxy,
    storage: Arc<InstanceStorage<T>>,
}

impl<T: ExtensionClass> Instance<T> {
    /// Construct the base object and attach `value` as its managed half
    pub fn new_alloc(value: T) -> Result<Self> {
        register_class::<T>()?;
        let proxy = Proxy::construct(T::BASE)?;
        let storage = Arc::new(InstanceStorage {
            value: Mutex::new(value),
        });
        let data = Arc::into_raw(storage.clone()) as *mut c_void;
        let class = intern(T::CLASS).raw();
        // SAFETY: the native side keeps `data` until it calls `free_instance`.
        unsafe { (interface().object_set_instance)(proxy.try_handle()?.as_ptr(), &class, data) };
        Ok(Self { proxy, storage })
    }

    /// Exclusive access to the managed half
    pub fn bind(&self) -> MutexGuard<'_, T> {
        self.storage.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn proxy_mut(&mut self) -> &mut Proxy {
        &mut self.proxy
    }
}
