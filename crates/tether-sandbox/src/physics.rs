//! A Rid-based physics server singleton
//!
//! Shapes and bodies are addressed only by `Rid`. Operations on an unknown
//! id are logged and counted, then ignored, which is how a native server
//! reacts to stale handles.

use crate::classdb::ClassDb;
use crate::engine::with_engine;
use crate::marshal::{arg, write_ret};
use std::collections::HashMap;
use tether_bridge::interface::{ConstTypePtr, ObjectPtr, TypePtr};
use tether_core::Transform2D;

pub const CLASS: &str = "PhysicsServer";

pub const HASH_SHAPE_CREATE: i64 = 0x2c1a_55e0;
pub const HASH_SHAPE_SET_DATA: i64 = 0x4f0b_9a13;
pub const HASH_SHAPE_GET_DATA: i64 = 0x18d3_7c2e;
pub const HASH_BODY_CREATE: i64 = 0x2c1a_55e1;
pub const HASH_BODY_SET_PARAM: i64 = 0x6a90_14bd;
pub const HASH_BODY_GET_PARAM: i64 = 0x3e27_c851;
pub const HASH_BODY_GET_MASS: i64 = 0x5b61_d0a7;
pub const HASH_BODY_ADD_SHAPE: i64 = 0x7d42_0f96;
pub const HASH_BODY_GET_SHAPE_COUNT: i64 = 0x1b8e_3304;
pub const HASH_FREE_RID: i64 = 0x0ff1_ce00;

/// Number of per-body parameters
pub const BODY_PARAM_COUNT: usize = 4;

struct Shape {
    data: f64,
}

struct Body {
    params: [f64; BODY_PARAM_COUNT],
    shapes: Vec<(u64, Transform2D)>,
}

pub struct PhysicsState {
    next_id: u64,
    shapes: HashMap<u64, Shape>,
    bodies: HashMap<u64, Body>,
    /// Operations that named an unknown or freed id
    pub stale_accesses: usize,
}

impl Default for PhysicsState {
    fn default() -> Self {
        Self {
            next_id: 1,
            shapes: HashMap::new(),
            bodies: HashMap::new(),
            stale_accesses: 0,
        }
    }
}

impl PhysicsState {
    // Ids are never reissued, so a stale id always stays stale.
    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn stale(&mut self, op: &str, rid: u64) {
        self.stale_accesses += 1;
        tracing::error!(target: "tether::sandbox", op, rid, "physics server: invalid rid");
    }

    pub fn live_count(&self) -> usize {
        self.shapes.len() + self.bodies.len()
    }

    pub fn contains(&self, rid: u64) -> bool {
        self.shapes.contains_key(&rid) || self.bodies.contains_key(&rid)
    }
}

pub(crate) fn register(classes: &mut ClassDb) {
    let server = classes.add_class(CLASS, Some("Object"));
    server.instantiable = false;
    server
        .ptr_method("shape_create", HASH_SHAPE_CREATE, 0, shape_create)
        .ptr_method("shape_set_data", HASH_SHAPE_SET_DATA, 2, shape_set_data)
        .ptr_method("shape_get_data", HASH_SHAPE_GET_DATA, 1, shape_get_data)
        .ptr_method("body_create", HASH_BODY_CREATE, 0, body_create)
        .ptr_method("body_set_param", HASH_BODY_SET_PARAM, 3, body_set_param)
        .ptr_method("body_get_param", HASH_BODY_GET_PARAM, 2, body_get_param)
        .ptr_method("body_get_mass", HASH_BODY_GET_MASS, 1, body_get_mass)
        .ptr_method("body_add_shape", HASH_BODY_ADD_SHAPE, 3, body_add_shape)
        .ptr_method("body_get_shape_count", HASH_BODY_GET_SHAPE_COUNT, 1, body_get_shape_count)
        .ptr_method("free_rid", HASH_FREE_RID, 1, free_rid);
}

fn shape_create(_: ObjectPtr, _: &[ConstTypePtr], ret: TypePtr) {
    let id = with_engine(|e| {
        let id = e.physics.allocate();
        e.physics.shapes.insert(id, Shape { data: 0.0 });
        id
    });
    // SAFETY: Rid return slots are `u64`.
    unsafe { write_ret(ret, id) };
}

fn shape_set_data(_: ObjectPtr, args: &[ConstTypePtr], _: TypePtr) {
    // SAFETY: (Rid, float) as registered.
    let (rid, data) = unsafe { (arg::<u64>(args, 0), arg::<f64>(args, 1)) };
    with_engine(|e| match e.physics.shapes.get_mut(&rid) {
        Some(shape) => shape.data = data,
        None => e.physics.stale("shape_set_data", rid),
    });
}

fn shape_get_data(_: ObjectPtr, args: &[ConstTypePtr], ret: TypePtr) {
    // SAFETY: (Rid) as registered.
    let rid = unsafe { arg::<u64>(args, 0) };
    let data = with_engine(|e| match e.physics.shapes.get(&rid) {
        Some(shape) => shape.data,
        None => {
            e.physics.stale("shape_get_data", rid);
            0.0
        }
    });
    // SAFETY: float return slots are `f64`.
    unsafe { write_ret(ret, data) };
}

fn body_create(_: ObjectPtr, _: &[ConstTypePtr], ret: TypePtr) {
    let id = with_engine(|e| {
        let id = e.physics.allocate();
        e.physics.bodies.insert(
            id,
            Body {
                params: [1.0, 0.0, 0.0, 1.0],
                shapes: Vec::new(),
            },
        );
        id
    });
    // SAFETY: Rid return slots are `u64`.
    unsafe { write_ret(ret, id) };
}

fn body_set_param(_: ObjectPtr, args: &[ConstTypePtr], _: TypePtr) {
    // SAFETY: (Rid, int, float) as registered.
    let (rid, param, value) = unsafe { (arg::<u64>(args, 0), arg::<i64>(args, 1), arg::<f64>(args, 2)) };
    with_engine(|e| {
        let slot = e
            .physics
            .bodies
            .get_mut(&rid)
            .and_then(|body| usize::try_from(param).ok().and_then(|p| body.params.get_mut(p)));
        match slot {
            Some(slot) => *slot = value,
            None => e.physics.stale("body_set_param", rid),
        }
    });
}

fn read_param(op: &str, rid: u64, param: i64) -> f64 {
    with_engine(|e| {
        let value = e
            .physics
            .bodies
            .get(&rid)
            .and_then(|body| usize::try_from(param).ok().and_then(|p| body.params.get(p).copied()));
        value.unwrap_or_else(|| {
            e.physics.stale(op, rid);
            0.0
        })
    })
}

fn body_get_param(_: ObjectPtr, args: &[ConstTypePtr], ret: TypePtr) {
    // SAFETY: (Rid, int) as registered.
    let (rid, param) = unsafe { (arg::<u64>(args, 0), arg::<i64>(args, 1)) };
    let value = read_param("body_get_param", rid, param);
    // SAFETY: float return slots are `f64`.
    unsafe { write_ret(ret, value) };
}

// Mass is parameter 0.
fn body_get_mass(_: ObjectPtr, args: &[ConstTypePtr], ret: TypePtr) {
    // SAFETY: (Rid) as registered.
    let rid = unsafe { arg::<u64>(args, 0) };
    let value = read_param("body_get_mass", rid, 0);
    // SAFETY: float return slots are `f64`.
    unsafe { write_ret(ret, value) };
}

fn body_add_shape(_: ObjectPtr, args: &[ConstTypePtr], _: TypePtr) {
    // SAFETY: (Rid, Rid, Transform2D) as registered.
    let (body, shape, transform) =
        unsafe { (arg::<u64>(args, 0), arg::<u64>(args, 1), arg::<Transform2D>(args, 2)) };
    with_engine(|e| {
        if !e.physics.shapes.contains_key(&shape) {
            e.physics.stale("body_add_shape", shape);
            return;
        }
        match e.physics.bodies.get_mut(&body) {
            Some(b) => b.shapes.push((shape, transform)),
            None => e.physics.stale("body_add_shape", body),
        }
    });
}

fn body_get_shape_count(_: ObjectPtr, args: &[ConstTypePtr], ret: TypePtr) {
    // SAFETY: (Rid) as registered.
    let body = unsafe { arg::<u64>(args, 0) };
    let count = with_engine(|e| match e.physics.bodies.get(&body) {
        Some(b) => b.shapes.len() as i64,
        None => {
            e.physics.stale("body_get_shape_count", body);
            0
        }
    });
    // SAFETY: int return slots are `i64`.
    unsafe { write_ret(ret, count) };
}

fn free_rid(_: ObjectPtr, args: &[ConstTypePtr], _: TypePtr) {
    // SAFETY: (Rid) as registered.
    let rid = unsafe { arg::<u64>(args, 0) };
    with_engine(|e| {
        let physics = &mut e.physics;
        if physics.shapes.remove(&rid).is_some() {
            for body in physics.bodies.values_mut() {
                body.shapes.retain(|(shape, _)| *shape != rid);
            }
        } else if physics.bodies.remove(&rid).is_none() {
            physics.stale("free_rid", rid);
        }
    });
}

/// Total invalid-id accesses seen by the server
pub fn stale_accesses() -> usize {
    with_engine(|e| e.physics.stale_accesses)
}

/// Check whether the server still holds a resource with this raw id
pub fn is_live(rid: u64) -> bool {
    with_engine(|e| e.physics.contains(rid))
}
