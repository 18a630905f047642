//! Conversions between Rust values and `Variant`
//!
//! `ToVariant` is total. `FromVariant` succeeds only when the variant's tag
//! is the one the target type maps to; there is no cross-tag coercion (an
//! `Int` is not a `float`). Integer narrowing truncates like `as` does, which
//! matches the range the native side actually produces.

use crate::callable::Callable;
use crate::error::ConversionError;
use crate::handle::ObjectRef;
use crate::intern::Identifier;
use crate::math::{Color, Rect2, Transform2D, Vector2, Vector2i, Vector3};
use crate::rid::Rid;
use crate::variant::{PackedFloat32Array, PackedInt64Array, Variant, VariantType};

/// Conversion into a `Variant`
pub trait ToVariant {
    fn to_variant(&self) -> Variant;
}

/// Conversion out of a `Variant`
pub trait FromVariant: Sized {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError>;
}

fn mismatch(expected: VariantType, variant: &Variant) -> ConversionError {
    ConversionError::new(expected, variant.get_type())
}

/// Types stored verbatim in a variant case
macro_rules! impl_copy_variant {
    ($($ty:ty => $case:ident),* $(,)?) => {$(
        impl ToVariant for $ty {
            fn to_variant(&self) -> Variant {
                Variant::$case(*self)
            }
        }

        impl FromVariant for $ty {
            fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
                match variant {
                    Variant::$case(value) => Ok(*value),
                    other => Err(mismatch(VariantType::$case, other)),
                }
            }
        }
    )*};
}

impl_copy_variant! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    Identifier => StringName,
    Vector2 => Vector2,
    Vector2i => Vector2i,
    Vector3 => Vector3,
    Rect2 => Rect2,
    Transform2D => Transform2D,
    Color => Color,
    Rid => Rid,
    ObjectRef => Object,
}

/// Integers that travel as the 64-bit `Int` case
macro_rules! impl_int_variant {
    ($($ty:ty),*) => {$(
        impl ToVariant for $ty {
            fn to_variant(&self) -> Variant {
                Variant::Int(*self as i64)
            }
        }

        impl FromVariant for $ty {
            fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
                match variant {
                    Variant::Int(i) => Ok(*i as $ty),
                    other => Err(mismatch(VariantType::Int, other)),
                }
            }
        }
    )*};
}

impl_int_variant!(i8, i16, i32, u8, u16, u32, u64);

impl ToVariant for f32 {
    fn to_variant(&self) -> Variant {
        Variant::Float(f64::from(*self))
    }
}

impl FromVariant for f32 {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Float(f) => Ok(*f as f32),
            other => Err(mismatch(VariantType::Float, other)),
        }
    }
}

impl ToVariant for String {
    fn to_variant(&self) -> Variant {
        Variant::String(self.clone())
    }
}

impl ToVariant for &str {
    fn to_variant(&self) -> Variant {
        Variant::String((*self).to_string())
    }
}

impl FromVariant for String {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::String(s) => Ok(s.clone()),
            other => Err(mismatch(VariantType::String, other)),
        }
    }
}

impl ToVariant for Callable {
    fn to_variant(&self) -> Variant {
        Variant::Callable(self.clone())
    }
}

impl FromVariant for Callable {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Callable(c) => Ok(c.clone()),
            other => Err(mismatch(VariantType::Callable, other)),
        }
    }
}

impl ToVariant for PackedFloat32Array {
    fn to_variant(&self) -> Variant {
        Variant::PackedFloat32Array(self.clone())
    }
}

impl FromVariant for PackedFloat32Array {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::PackedFloat32Array(a) => Ok(a.clone()),
            other => Err(mismatch(VariantType::PackedFloat32Array, other)),
        }
    }
}

impl ToVariant for PackedInt64Array {
    fn to_variant(&self) -> Variant {
        Variant::PackedInt64Array(self.clone())
    }
}

impl FromVariant for PackedInt64Array {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::PackedInt64Array(a) => Ok(a.clone()),
            other => Err(mismatch(VariantType::PackedInt64Array, other)),
        }
    }
}

impl ToVariant for Variant {
    fn to_variant(&self) -> Variant {
        self.clone()
    }
}

impl FromVariant for Variant {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        Ok(variant.clone())
    }
}

impl ToVariant for () {
    fn to_variant(&self) -> Variant {
        Variant::Nil
    }
}

impl FromVariant for () {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Nil => Ok(()),
            other => Err(mismatch(VariantType::Nil, other)),
        }
    }
}

impl<T: ToVariant> ToVariant for Option<T> {
    fn to_variant(&self) -> Variant {
        match self {
            Some(value) => value.to_variant(),
            None => Variant::Nil,
        }
    }
}

impl<T: FromVariant> FromVariant for Option<T> {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Nil => Ok(None),
            other => T::from_variant(other).map(Some),
        }
    }
}

impl<T: ToVariant> ToVariant for Vec<T> {
    fn to_variant(&self) -> Variant {
        Variant::Array(self.iter().map(ToVariant::to_variant).collect())
    }
}

impl<T: FromVariant> FromVariant for Vec<T> {
    fn from_variant(variant: &Variant) -> Result<Self, ConversionError> {
        match variant {
            Variant::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| T::from_variant(item).map_err(|e| e.at_index(i)))
                .collect(),
            other => Err(mismatch(VariantType::Array, other)),
        }
    }
}
