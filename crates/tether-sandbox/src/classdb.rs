//! Class database of the sandbox runtime
//!
//! Classes form a single-inheritance tree. Each class owns its methods, keyed
//! by name with one current hash, plus any compatibility shims kept for older
//! hashes. Method records are leaked so their addresses can serve as the
//! opaque method-bind pointers handed to the bridge.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::ffi::c_void;
use tether_bridge::interface::{ConstTypePtr, ExtensionClassInfo, ObjectPtr, TypePtr};
use tether_bridge::{BindLookup, BindStatus};
use tether_core::{CallError, Identifier, Variant};

/// Native implementation reached through ptrcall
pub type PtrcallImpl = fn(this: ObjectPtr, args: &[ConstTypePtr], ret: TypePtr);

/// Native implementation reached through varcall or by-name calls
pub type VarcallImpl = fn(this: ObjectPtr, args: &[&Variant]) -> Result<Variant, CallError>;

/// One bindable method
pub struct MethodInfo {
    pub class: Identifier,
    pub name: Identifier,
    pub hash: i64,
    pub arg_count: usize,
    pub ptrcall: Option<PtrcallImpl>,
    pub varcall: Option<VarcallImpl>,
}

impl MethodInfo {
    /// The record's address, used as the bind pointer
    pub fn as_bind_ptr(&'static self) -> *const c_void {
        self as *const MethodInfo as *const c_void
    }
}

/// Callbacks of a managed extension class
#[derive(Clone, Copy)]
pub struct ExtensionInfo(pub ExtensionClassInfo);

// SAFETY: the userdata is the bridge's leaked, thread-safe virtual table.
unsafe impl Send for ExtensionInfo {}

pub struct ClassRecord {
    pub name: Identifier,
    pub parent: Option<Identifier>,
    pub ref_counted: bool,
    pub instantiable: bool,
    pub extension: Option<ExtensionInfo>,
    methods: IndexMap<Identifier, &'static MethodInfo>,
    compat: HashMap<(Identifier, i64), &'static MethodInfo>,
}

impl ClassRecord {
    fn blank_method(&self, name: &str, hash: i64, arg_count: usize) -> MethodInfo {
        MethodInfo {
            class: self.name,
            name: Identifier::new(name),
            hash,
            arg_count,
            ptrcall: None,
            varcall: None,
        }
    }

    /// Add a fixed-signature method
    pub fn ptr_method(&mut self, name: &str, hash: i64, arg_count: usize, f: PtrcallImpl) -> &mut Self {
        let info = MethodInfo {
            ptrcall: Some(f),
            ..self.blank_method(name, hash, arg_count)
        };
        self.methods.insert(info.name, Box::leak(Box::new(info)));
        self
    }

    /// Add a vararg method
    pub fn var_method(&mut self, name: &str, hash: i64, f: VarcallImpl) -> &mut Self {
        let info = MethodInfo {
            varcall: Some(f),
            ..self.blank_method(name, hash, 0)
        };
        self.methods.insert(info.name, Box::leak(Box::new(info)));
        self
    }

    /// Keep an older signature of `name` reachable under `legacy_hash`
    pub fn compat_method(&mut self, name: &str, legacy_hash: i64, arg_count: usize, f: PtrcallImpl) -> &mut Self {
        let info = MethodInfo {
            ptrcall: Some(f),
            ..self.blank_method(name, legacy_hash, arg_count)
        };
        self.compat
            .insert((info.name, legacy_hash), Box::leak(Box::new(info)));
        self
    }

    pub fn method(&self, name: Identifier) -> Option<&'static MethodInfo> {
        self.methods.get(&name).copied()
    }
}

#[derive(Default)]
pub struct ClassDb {
    classes: IndexMap<Identifier, ClassRecord>,
}

impl ClassDb {
    pub fn add_class(&mut self, name: &str, parent: Option<&str>) -> &mut ClassRecord {
        let name = Identifier::new(name);
        let parent = parent.map(Identifier::new);
        let ref_counted = parent
            .and_then(|p| self.classes.get(&p))
            .is_some_and(|p| p.ref_counted);
        self.classes.entry(name).or_insert(ClassRecord {
            name,
            parent,
            ref_counted,
            instantiable: true,
            extension: None,
            methods: IndexMap::new(),
            compat: HashMap::new(),
        })
    }

    pub fn get(&self, name: Identifier) -> Option<&ClassRecord> {
        self.classes.get(&name)
    }

    pub fn contains(&self, name: Identifier) -> bool {
        self.classes.contains_key(&name)
    }

    /// Iterate a class and its ancestors, nearest first
    fn ancestry(&self, class: Identifier) -> impl Iterator<Item = &ClassRecord> + '_ {
        std::iter::successors(self.classes.get(&class), move |record| {
            record.parent.and_then(|p| self.classes.get(&p))
        })
    }

    /// Resolve a bind query the way the native side answers `get_method_bind`
    pub fn find_method(&self, class: Identifier, method: Identifier, hash: i64) -> (Option<&'static MethodInfo>, BindLookup) {
        if !self.contains(class) {
            return (None, lookup(BindStatus::MissingClass, 0));
        }
        for record in self.ancestry(class) {
            let Some(current) = record.method(method) else {
                continue;
            };
            if current.hash == hash {
                return (Some(current), lookup(BindStatus::Exact, hash));
            }
            if let Some(shim) = record.compat.get(&(method, hash)) {
                return (Some(*shim), lookup(BindStatus::Compatibility, current.hash));
            }
            return (None, lookup(BindStatus::HashMismatch, current.hash));
        }
        (None, lookup(BindStatus::MissingMethod, 0))
    }

    /// Find a method by name alone, for dynamic calls
    pub fn find_by_name(&self, class: Identifier, method: Identifier) -> Option<&'static MethodInfo> {
        self.ancestry(class).find_map(|record| record.method(method))
    }

    /// Extension callbacks of `class` or its nearest extended ancestor
    pub fn extension(&self, class: Identifier) -> Option<ExtensionInfo> {
        self.ancestry(class).find_map(|record| record.extension)
    }

    pub fn is_ref_counted(&self, class: Identifier) -> bool {
        self.get(class).is_some_and(|record| record.ref_counted)
    }

    /// Add a managed extension class under an existing parent
    pub fn register_extension(&mut self, class: Identifier, parent: Identifier, info: ExtensionClassInfo) -> bool {
        if !self.contains(parent) {
            return false;
        }
        let record = self.add_class(class.as_str(), Some(parent.as_str()));
        record.extension = Some(ExtensionInfo(info));
        // Extension classes are created through their base, then attached.
        record.instantiable = false;
        true
    }
}

fn lookup(status: BindStatus, current_hash: i64) -> BindLookup {
    BindLookup {
        status,
        current_hash,
    }
}
