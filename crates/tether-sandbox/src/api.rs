//! Managed wrappers over the sandbox classes
//!
//! Written the way a binding generator would emit them: one static
//! `MethodBind` per method and a one-line bridge call per wrapper.

use crate::physics::{self, CLASS as PHYSICS};
use crate::scene::{self, NODE, RESOURCE};
use tether_bridge::{
    ptrcall0, ptrcall1, ptrcall2, ptrcall3, rid, try_varcall, varcall, MethodBind, Proxy, Result,
};
use tether_core::{Callable, Identifier, NativeHandle, Rid, Transform2D, Variant};

/// Per-body parameters of the physics server
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyParam {
    Mass = 0,
    Friction = 1,
    Bounce = 2,
    GravityScale = 3,
}

/// The physics server singleton
pub struct PhysicsServer;

impl PhysicsServer {
    fn singleton() -> NativeHandle {
        NativeHandle::null()
    }

    pub fn shape_create() -> Rid {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "shape_create", physics::HASH_SHAPE_CREATE);
        // SAFETY: shape_create() -> RID
        let shape: Rid = unsafe { ptrcall0(&BIND, Self::singleton()) };
        rid::revive(shape);
        shape
    }

    pub fn shape_set_data(shape: Rid, data: f64) {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "shape_set_data", physics::HASH_SHAPE_SET_DATA);
        // SAFETY: shape_set_data(RID, float)
        unsafe { ptrcall2(&BIND, Self::singleton(), &shape, &data) }
    }

    pub fn shape_get_data(shape: Rid) -> f64 {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "shape_get_data", physics::HASH_SHAPE_GET_DATA);
        // SAFETY: shape_get_data(RID) -> float
        unsafe { ptrcall1(&BIND, Self::singleton(), &shape) }
    }

    pub fn body_create() -> Rid {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "body_create", physics::HASH_BODY_CREATE);
        // SAFETY: body_create() -> RID
        let body: Rid = unsafe { ptrcall0(&BIND, Self::singleton()) };
        rid::revive(body);
        body
    }

    pub fn body_set_param(body: Rid, param: BodyParam, value: f64) {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "body_set_param", physics::HASH_BODY_SET_PARAM);
        // SAFETY: body_set_param(RID, int, float)
        unsafe { ptrcall3(&BIND, Self::singleton(), &body, &(param as i64), &value) }
    }

    pub fn body_get_param(body: Rid, param: BodyParam) -> f64 {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "body_get_param", physics::HASH_BODY_GET_PARAM);
        // SAFETY: body_get_param(RID, int) -> float
        unsafe { ptrcall2(&BIND, Self::singleton(), &body, &(param as i64)) }
    }

    pub fn body_get_mass(body: Rid) -> f64 {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "body_get_mass", physics::HASH_BODY_GET_MASS);
        // SAFETY: body_get_mass(RID) -> float
        unsafe { ptrcall1(&BIND, Self::singleton(), &body) }
    }

    pub fn body_add_shape(body: Rid, shape: Rid, transform: Transform2D) {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "body_add_shape", physics::HASH_BODY_ADD_SHAPE);
        // SAFETY: body_add_shape(RID, RID, Transform2D)
        unsafe { ptrcall3(&BIND, Self::singleton(), &body, &shape, &transform) }
    }

    pub fn body_get_shape_count(body: Rid) -> i32 {
        static BIND: MethodBind =
            MethodBind::new(PHYSICS, "body_get_shape_count", physics::HASH_BODY_GET_SHAPE_COUNT);
        // SAFETY: body_get_shape_count(RID) -> int
        unsafe { ptrcall1(&BIND, Self::singleton(), &body) }
    }

    /// Free a shape or body; freeing twice is a contract violation
    #[track_caller]
    pub fn free_rid(rid: Rid) {
        rid::free(rid, Self::free_raw)
    }

    pub fn try_free_rid(rid: Rid) -> Result<()> {
        rid::try_free(rid, Self::free_raw)
    }

    fn free_raw(rid: Rid) {
        static BIND: MethodBind = MethodBind::new(PHYSICS, "free_rid", physics::HASH_FREE_RID);
        // SAFETY: free_rid(RID)
        unsafe { ptrcall1(&BIND, Self::singleton(), &rid) }
    }
}

static NODE_GET_NAME: MethodBind = MethodBind::new(NODE, "get_name", scene::HASH_GET_NAME);

/// A plain scene node, owned by whoever created it
#[derive(Debug)]
pub struct Node {
    proxy: Proxy,
}

impl Node {
    /// Create a node owned by the returned wrapper
    pub fn new_alloc() -> Result<Self> {
        Ok(Self {
            proxy: Proxy::construct(NODE)?,
        })
    }

    pub fn from_proxy(proxy: Proxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn into_proxy(self) -> Proxy {
        self.proxy
    }

    pub fn get_name(&self) -> String {
        // SAFETY: Node.get_name() -> String
        unsafe { ptrcall0(&NODE_GET_NAME, self.proxy.handle()) }
    }

    pub fn set_name(&self, name: &str) {
        static BIND: MethodBind = MethodBind::new(NODE, "set_name", scene::HASH_SET_NAME);
        // SAFETY: Node.set_name(String)
        unsafe { ptrcall1(&BIND, self.proxy.handle(), name) }
    }

    pub fn connect(&self, signal: &str, callable: &Callable) {
        static BIND: MethodBind = MethodBind::new(NODE, "connect", scene::HASH_CONNECT);
        // SAFETY: Node.connect(StringName, Callable)
        unsafe { ptrcall2(&BIND, self.proxy.handle(), &Identifier::new(signal), callable) }
    }

    pub fn get_connection_count(&self, signal: &str) -> i64 {
        static BIND: MethodBind = MethodBind::new(NODE, "get_connection_count", scene::HASH_GET_CONNECTION_COUNT);
        // SAFETY: Node.get_connection_count(StringName) -> int
        unsafe { ptrcall1(&BIND, self.proxy.handle(), &Identifier::new(signal)) }
    }

    /// Emit `signal`, forwarding `args` to every connected callable in order
    #[track_caller]
    pub fn emit_signal(&self, signal: &str, args: &[Variant]) -> Result<()> {
        varcall(&EMIT_SIGNAL, self.proxy.handle(), &signal_args(signal, args)).map(drop)
    }

    /// Like [`Node::emit_signal`], reporting arity mismatches as errors
    pub fn try_emit_signal(&self, signal: &str, args: &[Variant]) -> Result<()> {
        try_varcall(&EMIT_SIGNAL, self.proxy.try_handle()?, &signal_args(signal, args)).map(drop)
    }

    /// Destroy the node now
    #[track_caller]
    pub fn free(mut self) {
        self.proxy.release()
    }
}

static EMIT_SIGNAL: MethodBind = MethodBind::new(NODE, "emit_signal", scene::HASH_EMIT_SIGNAL);

fn signal_args(signal: &str, args: &[Variant]) -> Vec<Variant> {
    std::iter::once(Variant::StringName(Identifier::new(signal)))
        .chain(args.iter().cloned())
        .collect()
}

/// A reference-counted resource
#[derive(Debug)]
pub struct Resource {
    proxy: Proxy,
}

impl Resource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            proxy: Proxy::construct(RESOURCE)?,
        })
    }

    pub fn from_proxy(proxy: Proxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Another handle to the same resource, sharing its reference count
    pub fn share(&self) -> Result<Self> {
        Ok(Self {
            proxy: self.proxy.try_clone()?,
        })
    }

    pub fn get_path(&self) -> String {
        static BIND: MethodBind = MethodBind::new(RESOURCE, "get_path", scene::HASH_GET_PATH);
        // SAFETY: Resource.get_path() -> String
        unsafe { ptrcall0(&BIND, self.proxy.handle()) }
    }

    pub fn set_path(&self, path: &str) {
        static BIND: MethodBind = MethodBind::new(RESOURCE, "set_path", scene::HASH_SET_PATH);
        // SAFETY: Resource.set_path(String)
        unsafe { ptrcall1(&BIND, self.proxy.handle(), path) }
    }

    /// A new resource with the same contents
    pub fn duplicate(&self) -> Option<Resource> {
        static BIND: MethodBind = MethodBind::new(RESOURCE, "duplicate", scene::HASH_DUPLICATE);
        // SAFETY: Resource.duplicate() -> Object
        let copy: Option<Proxy> = unsafe { ptrcall0(&BIND, self.proxy.handle()) };
        copy.map(Resource::from_proxy)
    }

    pub fn reference_count(&self) -> i64 {
        self.proxy.reference_count().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{bind_lookup_count, destroy_count, is_alive};
    use crate::install;
    use tether_bridge::{BindCache, BindKey, BindStatus, BridgeError, CompatPolicy, Ownership, Violation};
    use proptest::prelude::*;
    use tether_core::Vector2;

    const PARAMS: [BodyParam; physics::BODY_PARAM_COUNT] =
        [BodyParam::Mass, BodyParam::Friction, BodyParam::Bounce, BodyParam::GravityScale];

    #[test]
    fn test_rid_set_then_get() {
        install();
        let shape = PhysicsServer::shape_create();
        assert!(shape.is_valid());
        PhysicsServer::shape_set_data(shape, 2.5);
        assert_eq!(PhysicsServer::shape_get_data(shape), 2.5);
        PhysicsServer::free_rid(shape);
        assert!(!physics::is_live(shape.raw()));
    }

    #[test]
    fn test_body_params_and_shapes() {
        install();
        let body = PhysicsServer::body_create();
        assert_eq!(PhysicsServer::body_get_param(body, BodyParam::Mass), 1.0);
        PhysicsServer::body_set_param(body, BodyParam::Bounce, 0.75);
        assert_eq!(PhysicsServer::body_get_param(body, BodyParam::Bounce), 0.75);

        let shape = PhysicsServer::shape_create();
        let offset = Transform2D::from_translation(Vector2::new(4.0, 0.0));
        PhysicsServer::body_add_shape(body, shape, offset);
        assert_eq!(PhysicsServer::body_get_shape_count(body), 1);

        // Freeing a shape detaches it from every body.
        PhysicsServer::free_rid(shape);
        assert_eq!(PhysicsServer::body_get_shape_count(body), 0);
        PhysicsServer::free_rid(body);
    }

    #[test]
    fn test_three_argument_setter_one_argument_getter() {
        install();
        let body = PhysicsServer::body_create();
        PhysicsServer::body_set_param(body, BodyParam::Mass, 3.5);
        assert_eq!(PhysicsServer::body_get_mass(body), 3.5);
        PhysicsServer::free_rid(body);
    }

    #[test]
    fn test_double_free_rid_is_violation() {
        install();
        let shape = PhysicsServer::shape_create();
        PhysicsServer::try_free_rid(shape).unwrap();
        let err = PhysicsServer::try_free_rid(shape).unwrap_err();
        assert_eq!(err.violation(), Some(Violation::DoubleFree(shape)));
    }

    #[test]
    #[should_panic(expected = "used after it was freed")]
    fn test_freed_rid_passed_to_call_panics() {
        install();
        let shape = PhysicsServer::shape_create();
        PhysicsServer::free_rid(shape);
        PhysicsServer::shape_get_data(shape);
    }

    #[test]
    fn test_node_name_roundtrip() {
        install();
        let node = Node::new_alloc().unwrap();
        assert_eq!(node.proxy().ownership(), Some(Ownership::OwnedByManaged));
        node.set_name("Player");
        assert_eq!(node.get_name(), "Player");
        let id = node.proxy().instance_id();
        node.free();
        assert_eq!(destroy_count(id), 1);
    }

    #[test]
    fn test_owned_node_destroyed_on_drop() {
        install();
        let node = Node::new_alloc().unwrap();
        let handle = node.proxy().handle();
        let id = node.proxy().instance_id();
        drop(node);
        assert!(!is_alive(handle));
        assert_eq!(destroy_count(id), 1);
    }

    #[test]
    fn test_resolution_is_cached_per_triple() {
        install();
        let first = MethodBind::new(NODE, "get_connection_count", scene::HASH_GET_CONNECTION_COUNT);
        let second = MethodBind::new(NODE, "get_connection_count", scene::HASH_GET_CONNECTION_COUNT);
        let a = first.resolve().unwrap();
        let b = second.resolve().unwrap();
        assert_eq!(a, b);
        assert!(first.is_resolved() && second.is_resolved());
        assert_eq!(bind_lookup_count(NODE, "get_connection_count", scene::HASH_GET_CONNECTION_COUNT), 1);
        assert!(BindCache::global().contains(&second.key()));
    }

    #[test]
    fn test_compat_hash_resolves_to_shim() {
        install();
        static LEGACY: MethodBind = MethodBind::new(NODE, "get_name", scene::HASH_GET_NAME_LEGACY);
        let node = Node::new_alloc().unwrap();
        node.set_name("Legacy");
        // SAFETY: the legacy signature is get_name() -> String too.
        let name: String = unsafe { ptrcall0(&LEGACY, node.proxy().handle()) };
        assert_eq!(name, "Legacy");
        assert_ne!(LEGACY.get(), NODE_GET_NAME.get());
    }

    #[test]
    fn test_unknown_hash_fails_resolution() {
        install();
        let bind = MethodBind::new(NODE, "set_name", 0x1234);
        match bind.resolve() {
            Err(BridgeError::BindResolution { status, hash, .. }) => {
                assert_eq!(status, BindStatus::HashMismatch);
                assert_eq!(hash, 0x1234);
            }
            other => panic!("expected a resolution failure, got {:?}", other),
        }
        // Failures are cached too.
        assert!(BindCache::global().lookup(BindKey::new(NODE, "set_name", 0x1234)).is_err());
        assert_eq!(bind_lookup_count(NODE, "set_name", 0x1234), 1);
    }

    #[test]
    fn test_lenient_cache_rebinds_changed_signature() {
        install();
        let stale = BindKey::new(NODE, "get_name", 0x5555);

        let lenient = BindCache::with_policy(CompatPolicy::Lenient);
        assert_eq!(lenient.lookup(stale).unwrap(), NODE_GET_NAME.get());
        // The stale hash, then the current one.
        assert_eq!(lenient.native_queries(), 2);

        for policy in [CompatPolicy::Strict, CompatPolicy::Compatible] {
            let cache = BindCache::with_policy(policy);
            assert!(matches!(
                cache.lookup(stale),
                Err(BridgeError::BindResolution {
                    status: BindStatus::HashMismatch,
                    ..
                })
            ));
            assert_eq!(cache.native_queries(), 1);
        }
    }

    #[test]
    fn test_strict_cache_refuses_compat_shim() {
        install();
        let legacy = BindKey::new(NODE, "get_name", scene::HASH_GET_NAME_LEGACY);
        assert!(BindCache::with_policy(CompatPolicy::Compatible).lookup(legacy).is_ok());
        assert!(matches!(
            BindCache::with_policy(CompatPolicy::Strict).lookup(legacy),
            Err(BridgeError::BindResolution {
                status: BindStatus::Compatibility,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_method_and_class() {
        install();
        let missing = MethodBind::new(NODE, "fly_away", 1);
        assert!(matches!(
            missing.resolve(),
            Err(BridgeError::BindResolution {
                status: BindStatus::MissingMethod,
                ..
            })
        ));
        let no_class = MethodBind::new("Spaceship", "launch", 1);
        assert!(matches!(
            no_class.resolve(),
            Err(BridgeError::BindResolution {
                status: BindStatus::MissingClass,
                ..
            })
        ));
    }

    #[test]
    #[should_panic(expected = "cannot resolve Node::teleport")]
    fn test_unresolvable_bind_panics_at_first_use() {
        install();
        static BIND: MethodBind = MethodBind::new(NODE, "teleport", 99);
        let node = Node::new_alloc().unwrap();
        // SAFETY: resolution fails before any slot is written.
        let _: () = unsafe { ptrcall0(&BIND, node.proxy().handle()) };
    }

    #[test]
    fn test_ref_counted_double_wrap_destroys_once() {
        install();
        let resource = Resource::new().unwrap();
        let handle = resource.proxy().handle();
        let id = resource.proxy().instance_id();
        assert_eq!(resource.reference_count(), 1);

        let second = Resource::from_proxy(Proxy::wrap_ref_counted(handle).unwrap());
        assert_eq!(resource.reference_count(), 2);
        let third = resource.share().unwrap();
        assert_eq!(third.reference_count(), 3);

        drop(resource);
        drop(third);
        assert!(is_alive(handle));
        assert_eq!(destroy_count(id), 0);
        drop(second);
        assert!(!is_alive(handle));
        assert_eq!(destroy_count(id), 1);
    }

    #[test]
    fn test_returned_resource_is_ref_counted() {
        install();
        let original = Resource::new().unwrap();
        original.set_path("res://icon.png");
        let copy = original.duplicate().unwrap();
        assert_eq!(copy.proxy().ownership(), Some(Ownership::RefCounted));
        assert_eq!(copy.reference_count(), 1);
        assert_eq!(copy.get_path(), "res://icon.png");
        assert_ne!(copy.proxy().instance_id(), original.proxy().instance_id());
    }

    #[test]
    fn test_second_owner_is_refused() {
        install();
        let node = Node::new_alloc().unwrap();
        let err = Proxy::wrap_owned(node.proxy().handle()).unwrap_err();
        assert_eq!(err.violation(), Some(Violation::DuplicateOwner(node.proxy().handle())));
        assert!(matches!(node.proxy().try_clone(), Err(BridgeError::ContractViolation(Violation::CloneOwned))));
    }

    #[test]
    fn test_owned_node_cannot_be_ref_counted() {
        install();
        let node = Node::new_alloc().unwrap();
        let handle = node.proxy().handle();
        let id = node.proxy().instance_id();

        let err = Proxy::wrap_ref_counted(handle).unwrap_err();
        assert_eq!(
            err.violation(),
            Some(Violation::OwnershipMismatch {
                class: Identifier::new(NODE),
                ownership: Ownership::RefCounted,
            })
        );
        assert!(is_alive(handle));

        drop(node);
        assert!(!is_alive(handle));
        assert_eq!(destroy_count(id), 1);
    }

    #[test]
    fn test_ref_counted_resource_cannot_be_owned() {
        install();
        let resource = Resource::new().unwrap();
        let err = Proxy::wrap_owned(resource.proxy().handle()).unwrap_err();
        assert_eq!(
            err.violation(),
            Some(Violation::OwnershipMismatch {
                class: Identifier::new(RESOURCE),
                ownership: Ownership::OwnedByManaged,
            })
        );
        assert_eq!(resource.reference_count(), 1);
    }

    #[test]
    fn test_borrowed_view_does_not_destroy() {
        install();
        let node = Node::new_alloc().unwrap();
        let view = Node::from_proxy(node.proxy().borrowed());
        view.set_name("Seen");
        let handle = node.proxy().handle();
        drop(view);
        assert!(is_alive(handle));
        assert_eq!(node.get_name(), "Seen");
    }

    #[test]
    #[should_panic(expected = "used after release")]
    fn test_released_proxy_panics() {
        install();
        let mut proxy = Node::new_alloc().unwrap().into_proxy();
        proxy.release();
        Node::from_proxy(proxy).get_name();
    }

    proptest! {
        #[test]
        fn test_body_param_reads_back_exactly(
            value in -1.0e6f64..1.0e6,
            index in 0usize..physics::BODY_PARAM_COUNT,
        ) {
            install();
            let body = PhysicsServer::body_create();
            PhysicsServer::body_set_param(body, PARAMS[index], value);
            prop_assert_eq!(PhysicsServer::body_get_param(body, PARAMS[index]), value);
            PhysicsServer::free_rid(body);
        }
    }
}
