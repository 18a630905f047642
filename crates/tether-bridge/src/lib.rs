//! Tether Bridge - calling into a native engine from managed Rust code
//!
//! This crate provides:
//! - The native function table and its one-time installation
//! - Method bind resolution with a process-wide cache
//! - Typed ptrcall trampolines and `Variant` varcalls
//! - Object proxies with explicit ownership
//! - Freed-`Rid` tracking
//! - Extension classes with virtual dispatch tables
//! - Rust closures exposed to native code as `Callable`s
//!
//! Logging goes through `tracing` under the `tether::*` targets.

pub mod bind;
pub mod call;
pub mod callable;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod interface;
pub mod object;
pub mod rid;

pub use bind::{BindCache, BindKey, MethodBind};
pub use call::{
    ptrcall0, ptrcall1, ptrcall2, ptrcall3, ptrcall4, ptrcall5, try_call_method, try_varcall, varcall, PtrArg,
    PtrReturn,
};
pub use callable::{callable_from_fn, CallableExt, ParamList};
pub use config::{BridgeConfig, CompatPolicy, DEFAULT_FREED_RID_CAPACITY};
pub use dispatch::{register_class, virtual_table, ExtensionClass, Instance, VirtualTable};
pub use error::{BridgeError, Result, Violation};
pub use interface::{
    config, initialize, initialize_with_config, interface, is_initialized, BindLookup, BindStatus,
    ExtensionClassInfo, MethodPtr, NativeInterface,
};
pub use object::{Ownership, Proxy, ProxyState};

// Re-export core so wrappers need a single dependency
pub use tether_core;
