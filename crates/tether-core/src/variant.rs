//! The tagged "any engine value" union

use crate::callable::Callable;
use crate::handle::ObjectRef;
use crate::intern::Identifier;
use crate::math::{Color, Rect2, Transform2D, Vector2, Vector2i, Vector3};
use crate::rid::Rid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value of any shape the native side can exchange
///
/// Crosses the boundary as an opaque pointer to a `Variant`: arguments are
/// borrowed from the caller, return slots are written in place by the callee.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// Absence of a value
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Interned name
    StringName(Identifier),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Vector3(Vector3),
    Rect2(Rect2),
    Transform2D(Transform2D),
    Color(Color),
    /// Native resource id (never owning)
    Rid(Rid),
    /// Native object reference (never owning)
    Object(ObjectRef),
    Callable(Callable),
    /// Array of values; typed conversions require every element to match
    Array(Vec<Variant>),
    PackedFloat32Array(PackedFloat32Array),
    PackedInt64Array(PackedInt64Array),
}

/// The tag of a `Variant`
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantType {
    Nil = 0,
    Bool,
    Int,
    Float,
    String,
    StringName,
    Vector2,
    Vector2i,
    Vector3,
    Rect2,
    Transform2D,
    Color,
    Rid,
    Object,
    Callable,
    Array,
    PackedFloat32Array,
    PackedInt64Array,
}

impl VariantType {
    /// Name as the native side spells it
    pub fn name(&self) -> &'static str {
        match self {
            VariantType::Nil => "nil",
            VariantType::Bool => "bool",
            VariantType::Int => "int",
            VariantType::Float => "float",
            VariantType::String => "String",
            VariantType::StringName => "StringName",
            VariantType::Vector2 => "Vector2",
            VariantType::Vector2i => "Vector2i",
            VariantType::Vector3 => "Vector3",
            VariantType::Rect2 => "Rect2",
            VariantType::Transform2D => "Transform2D",
            VariantType::Color => "Color",
            VariantType::Rid => "RID",
            VariantType::Object => "Object",
            VariantType::Callable => "Callable",
            VariantType::Array => "Array",
            VariantType::PackedFloat32Array => "PackedFloat32Array",
            VariantType::PackedInt64Array => "PackedInt64Array",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contiguous `f32` storage, marshalled without per-element tags
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedFloat32Array(pub Vec<f32>);

/// Contiguous `i64` storage, marshalled without per-element tags
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedInt64Array(pub Vec<i64>);

impl Variant {
    /// Get the tag of this value
    pub fn get_type(&self) -> VariantType {
        match self {
            Variant::Nil => VariantType::Nil,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int(_) => VariantType::Int,
            Variant::Float(_) => VariantType::Float,
            Variant::String(_) => VariantType::String,
            Variant::StringName(_) => VariantType::StringName,
            Variant::Vector2(_) => VariantType::Vector2,
            Variant::Vector2i(_) => VariantType::Vector2i,
            Variant::Vector3(_) => VariantType::Vector3,
            Variant::Rect2(_) => VariantType::Rect2,
            Variant::Transform2D(_) => VariantType::Transform2D,
            Variant::Color(_) => VariantType::Color,
            Variant::Rid(_) => VariantType::Rid,
            Variant::Object(_) => VariantType::Object,
            Variant::Callable(_) => VariantType::Callable,
            Variant::Array(_) => VariantType::Array,
            Variant::PackedFloat32Array(_) => VariantType::PackedFloat32Array,
            Variant::PackedInt64Array(_) => VariantType::PackedInt64Array,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        self.get_type().name()
    }

    /// Check if this value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    /// Truthiness as the native side defines it: zero, empty and null are false
    pub fn booleanize(&self) -> bool {
        match self {
            Variant::Nil => false,
            Variant::Bool(b) => *b,
            Variant::Int(i) => *i != 0,
            Variant::Float(f) => *f != 0.0,
            Variant::String(s) => !s.is_empty(),
            Variant::StringName(name) => !name.as_str().is_empty(),
            Variant::Vector2(v) => *v != Vector2::ZERO,
            Variant::Vector2i(v) => *v != Vector2i::ZERO,
            Variant::Vector3(v) => *v != Vector3::ZERO,
            Variant::Rect2(r) => *r != Rect2::default(),
            Variant::Transform2D(t) => *t != Transform2D::IDENTITY,
            Variant::Color(c) => *c != Color::rgba(0.0, 0.0, 0.0, 1.0),
            Variant::Rid(rid) => rid.is_valid(),
            Variant::Object(obj) => !obj.is_null(),
            Variant::Callable(c) => !c.is_null(),
            Variant::Array(a) => !a.is_empty(),
            Variant::PackedFloat32Array(a) => !a.0.is_empty(),
            Variant::PackedInt64Array(a) => !a.0.is_empty(),
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a float (no integer coercion)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Variant::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to get this value as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as an interned name
    pub fn as_string_name(&self) -> Option<Identifier> {
        match self {
            Variant::StringName(name) => Some(*name),
            _ => None,
        }
    }

    /// Try to get this value as a resource id
    pub fn as_rid(&self) -> Option<Rid> {
        match self {
            Variant::Rid(rid) => Some(*rid),
            _ => None,
        }
    }

    /// Try to get this value as an object reference
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Variant::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Try to get this value as a callable
    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Variant::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Try to get this value as an array
    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Variant::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Nil => write!(f, "<null>"),
            Variant::Bool(b) => write!(f, "{}", b),
            Variant::Int(i) => write!(f, "{}", i),
            Variant::Float(fl) => write!(f, "{}", fl),
            Variant::String(s) => write!(f, "{}", s),
            Variant::StringName(name) => write!(f, "&\"{}\"", name),
            Variant::Vector2(v) => write!(f, "{}", v),
            Variant::Vector2i(v) => write!(f, "{}", v),
            Variant::Vector3(v) => write!(f, "{}", v),
            Variant::Rect2(r) => write!(f, "[P: {}, S: {}]", r.position, r.size),
            Variant::Transform2D(t) => write!(f, "[X: {}, Y: {}, O: {}]", t.x, t.y, t.origin),
            Variant::Color(c) => write!(f, "({}, {}, {}, {})", c.r, c.g, c.b, c.a),
            Variant::Rid(rid) => write!(f, "RID({})", rid.raw()),
            Variant::Object(obj) => write!(f, "{}", obj),
            Variant::Callable(c) => write!(f, "{}", c),
            Variant::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Variant::PackedFloat32Array(a) => write!(f, "{:?}", a.0),
            Variant::PackedInt64Array(a) => write!(f, "{:?}", a.0),
        }
    }
}

// Convenient From implementations
impl From<bool> for Variant {
    fn from(b: bool) -> Self {
        Variant::Bool(b)
    }
}

impl From<i64> for Variant {
    fn from(i: i64) -> Self {
        Variant::Int(i)
    }
}

impl From<f64> for Variant {
    fn from(f: f64) -> Self {
        Variant::Float(f)
    }
}

impl From<&str> for Variant {
    fn from(s: &str) -> Self {
        Variant::String(s.to_string())
    }
}

impl From<String> for Variant {
    fn from(s: String) -> Self {
        Variant::String(s)
    }
}

impl From<Identifier> for Variant {
    fn from(name: Identifier) -> Self {
        Variant::StringName(name)
    }
}

impl From<Rid> for Variant {
    fn from(rid: Rid) -> Self {
        Variant::Rid(rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    #[test]
    fn test_variant_tags() {
        assert!(Variant::Nil.is_nil());
        assert_eq!(Variant::default().get_type(), VariantType::Nil);
        assert_eq!(Variant::Int(1).get_type(), VariantType::Int);
        assert_eq!(Variant::Rid(Rid::new(3)).type_name(), "RID");
        assert_eq!(Variant::StringName(intern("x")).type_name(), "StringName");
    }

    #[test]
    fn test_accessors_do_not_coerce() {
        assert_eq!(Variant::Int(42).as_int(), Some(42));
        assert_eq!(Variant::Int(42).as_float(), None);
        assert_eq!(Variant::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Variant::from("hi").as_str(), Some("hi"));
        assert_eq!(Variant::from("hi").as_string_name(), None);
    }

    #[test]
    fn test_booleanize() {
        assert!(!Variant::Nil.booleanize());
        assert!(!Variant::Int(0).booleanize());
        assert!(Variant::Int(-1).booleanize());
        assert!(!Variant::from("").booleanize());
        assert!(!Variant::Rid(Rid::INVALID).booleanize());
        assert!(Variant::Rid(Rid::new(1)).booleanize());
        assert!(!Variant::Object(ObjectRef::null()).booleanize());
        assert!(!Variant::Array(vec![]).booleanize());
    }

    #[test]
    fn test_display() {
        let v = Variant::Array(vec![Variant::Int(1), Variant::from("a"), Variant::Nil]);
        assert_eq!(v.to_string(), "[1, a, <null>]");
        assert_eq!(Variant::StringName(intern("ready")).to_string(), "&\"ready\"");
    }
}
