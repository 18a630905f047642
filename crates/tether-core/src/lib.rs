//! Tether Core - value types shared across the native boundary
//!
//! This crate provides the types both sides of the bridge agree on:
//! - Interned identifiers (`Identifier`, `RawName`)
//! - The tagged `Variant` union and its `ToVariant`/`FromVariant` conversions
//! - Fixed-layout math aggregates (`Vector2`, `Transform2D`, ...)
//! - Opaque handles (`NativeHandle`, `InstanceId`, `ObjectRef`) and `Rid`
//! - `Callable`, including managed functions behind a C trampoline
//!
//! Nothing in here talks to a native runtime; that is `tether-bridge`'s job.

mod callable;
mod convert;
mod error;
mod handle;
mod intern;
pub mod math;
mod rid;
mod variant;

pub use callable::{CallError, CallErrorKind, Callable, CallableCallFn, CallableFreeFn, CustomCallable};
pub use convert::{FromVariant, ToVariant};
pub use error::{ConversionError, Error, Result};
pub use handle::{InstanceId, NativeHandle, ObjectRef};
pub use intern::{intern, interned_count, Identifier, RawName};
pub use math::{Color, Rect2, Transform2D, Vector2, Vector2i, Vector3};
pub use rid::Rid;
pub use variant::{PackedFloat32Array, PackedInt64Array, Variant, VariantType};
