//! # Tether Sandbox
//!
//! An in-process native runtime for `tether-bridge`. It implements the
//! whole `NativeInterface` on top of a small class database, a scene of
//! `Node`s and `Resource`s, and a Rid-addressed physics server, then wraps
//! those classes the way generated bindings would.
//!
//! ```ignore
//! tether_sandbox::install();
//! let node = tether_sandbox::api::Node::new_alloc()?;
//! node.set_name("Player");
//! ```

mod classdb;
mod engine;
mod ffi;
mod marshal;

pub mod api;
pub mod physics;
pub mod scene;

pub use engine::{bind_lookup_count, destroy_count, invalid_destroy_count, is_alive, reference_count, stats, Stats};

use std::sync::Once;

/// Install the sandbox as the bridge's native side
///
/// Safe to call any number of times; only the first call installs.
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // SAFETY: the sandbox table is a `static` whose functions are valid
        // for the whole process.
        if !unsafe { tether_bridge::initialize(&ffi::INTERFACE) } {
            tracing::warn!(target: "tether::sandbox", "another native interface was installed first");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Node;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tether_bridge::{callable_from_fn, BridgeError, CallableExt, ExtensionClass, Instance, Proxy, VirtualTable, Violation};
    use tether_core::{CallErrorKind, Callable, Identifier, Variant};

    struct Player {
        ready: bool,
        frames: i64,
        health: i64,
        dropped: Arc<AtomicBool>,
    }

    impl Player {
        fn new(dropped: Arc<AtomicBool>) -> Self {
            Self {
                ready: false,
                frames: 0,
                health: 10,
                dropped,
            }
        }
    }

    impl Drop for Player {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl ExtensionClass for Player {
        const CLASS: &'static str = "Player";
        const BASE: &'static str = "Node";

        fn register_virtuals(table: &mut VirtualTable<Self>) {
            table
                .add("_ready", |this: &mut Player, (): ()| this.ready = true)
                .add("_process", |this: &mut Player, (_delta,): (f64,)| {
                    this.frames += 1;
                    this.frames
                })
                .add("take_hit", |this: &mut Player, (damage,): (i64,)| {
                    this.health -= damage;
                    this.health
                });
        }
    }

    fn player() -> (Instance<Player>, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let instance = Instance::new_alloc(Player::new(dropped.clone())).unwrap();
        (instance, dropped)
    }

    #[test]
    fn test_install_is_idempotent() {
        install();
        install();
        assert!(tether_bridge::is_initialized());
    }

    #[test]
    fn test_lifecycle_virtuals_reach_overrides() {
        install();
        let (instance, _) = player();
        let this = instance.proxy().handle().as_ptr();

        assert_eq!(scene::notify_ready(this), Some(Ok(Variant::Nil)));
        assert_eq!(scene::notify_process(this, 0.016), Some(Ok(Variant::Int(1))));
        assert_eq!(scene::notify_process(this, 0.016), Some(Ok(Variant::Int(2))));

        let player = instance.bind();
        assert!(player.ready);
        assert_eq!(player.frames, 2);
    }

    #[test]
    fn test_missing_override_is_not_dispatched() {
        install();
        let (instance, _) = player();
        let this = instance.proxy().handle().as_ptr();
        assert!(scene::invoke_virtual(this, Identifier::new("_input"), &[]).is_none());

        // Plain nodes have no managed half at all.
        let node = Node::new_alloc().unwrap();
        assert!(scene::notify_ready(node.proxy().handle().as_ptr()).is_none());
    }

    #[test]
    fn test_extension_keeps_native_methods() {
        install();
        let (instance, _) = player();
        let node = Node::from_proxy(instance.proxy().borrowed());
        node.set_name("Hero");
        assert_eq!(node.get_name(), "Hero");
        assert_eq!(instance.proxy().class(), Identifier::new("Node"));
        // Looked up again, the object reports its extension class.
        let seen = Proxy::wrap_borrowed(instance.proxy().handle()).unwrap();
        assert_eq!(seen.class(), Identifier::new("Player"));
    }

    #[test]
    fn test_method_callable_reaches_override() {
        install();
        let (instance, _) = player();
        let callable = Callable::from_object_method(instance.proxy().to_object_ref(), "take_hit");
        assert_eq!(callable.callv(&[Variant::Int(3)]).unwrap(), Variant::Int(7));
        assert_eq!(instance.bind().health, 7);

        let err = callable.try_callv(&[]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ContractViolation(Violation::ArityMismatch { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_reentrant_override_reports_busy() {
        install();
        let (instance, _) = player();
        let this = instance.proxy().handle().as_ptr();
        let guard = instance.bind();
        let outcome = scene::notify_process(this, 0.1).unwrap();
        assert_eq!(outcome.unwrap_err().kind, CallErrorKind::InstanceBusy);
        assert_eq!(guard.frames, 0);
    }

    #[test]
    fn test_destroying_object_frees_managed_half() {
        install();
        let (instance, dropped) = player();
        let id = instance.proxy().instance_id();
        let handle = instance.proxy().handle();
        drop(instance);
        assert!(!is_alive(handle));
        assert_eq!(destroy_count(id), 1);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_released_instance_storage_outlives_native_side() {
        install();
        let (mut instance, dropped) = player();
        instance.proxy_mut().release();
        // The wrapper still holds its share of the storage.
        assert!(!dropped.load(Ordering::SeqCst));
        assert_eq!(instance.bind().health, 10);
        drop(instance);
        assert!(dropped.load(Ordering::SeqCst));
    }

    fn recorder() -> (Callable, Arc<Mutex<Vec<Vec<i64>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callable = callable_from_fn("on_hit", move |(a, b, c, d, e): (i64, i64, i64, i64, i64)| {
            sink.lock().unwrap().push(vec![a, b, c, d, e]);
        });
        (callable, seen)
    }

    fn ints(values: &[i64]) -> Vec<Variant> {
        values.iter().copied().map(Variant::Int).collect()
    }

    #[test]
    fn test_signal_delivers_arguments_in_order() {
        install();
        let node = Node::new_alloc().unwrap();
        let (callable, seen) = recorder();
        node.connect("hit", &callable);
        node.connect("hit", &callable);
        assert_eq!(node.get_connection_count("hit"), 2);
        assert_eq!(node.get_connection_count("heal"), 0);

        node.emit_signal("hit", &ints(&[1, 2, 3, 4, 5])).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3, 4, 5], vec![1, 2, 3, 4, 5]]);
    }

    #[test]
    fn test_signal_with_too_few_arguments_is_violation() {
        install();
        let node = Node::new_alloc().unwrap();
        let (callable, seen) = recorder();
        node.connect("hit", &callable);

        let err = node.try_emit_signal("hit", &ints(&[1, 2, 3, 4])).unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(Violation::ArityMismatch { expected: 5, got: 4, .. })
        ));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "expects 5 arguments, got 4")]
    fn test_signal_arity_mismatch_fails_fast() {
        install();
        let node = Node::new_alloc().unwrap();
        let (callable, _) = recorder();
        node.connect("hit", &callable);
        let _ = node.emit_signal("hit", &ints(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_signal_without_receivers_is_noop() {
        install();
        let node = Node::new_alloc().unwrap();
        node.emit_signal("nobody_listens", &ints(&[1])).unwrap();
    }

    #[test]
    fn test_connected_callable_freed_with_node() {
        install();
        let node = Node::new_alloc().unwrap();
        let (callable, seen) = recorder();
        node.connect("hit", &callable);
        drop(callable);
        node.free();
        // The recorder's closure was the last holder of the sink.
        assert_eq!(Arc::strong_count(&seen), 1);
    }

    #[test]
    fn test_dead_object_is_detected_through_borrowed_view() {
        install();
        let node = Node::new_alloc().unwrap();
        let view = Proxy::wrap_borrowed(node.proxy().handle()).unwrap();
        let id = view.instance_id();
        assert!(view.is_instance_valid());
        node.free();

        assert!(!view.is_instance_valid());
        assert_eq!(view.try_handle().unwrap_err().violation(), Some(Violation::DeadInstance(id)));
        assert!(Proxy::from_instance_id(id).is_none());
    }

    #[test]
    fn test_proxy_from_instance_id_is_borrowed() {
        install();
        let node = Node::new_alloc().unwrap();
        let found = Proxy::from_instance_id(node.proxy().instance_id()).unwrap();
        assert_eq!(found.handle(), node.proxy().handle());
        drop(found);
        assert!(is_alive(node.proxy().handle()));
    }
}
