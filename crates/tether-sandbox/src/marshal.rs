//! Reading ptrcall arguments and writing return slots on the native side

use tether_bridge::interface::{ConstTypePtr, TypePtr};

/// Copy argument `index` out of a ptrcall argument array
///
/// # Safety
///
/// `args[index]` must point to a valid `T`.
pub unsafe fn arg<T: Copy>(args: &[ConstTypePtr], index: usize) -> T {
    // SAFETY: guaranteed by the caller.
    unsafe { *(args[index] as *const T) }
}

/// Borrow argument `index` of a ptrcall argument array
///
/// # Safety
///
/// `args[index]` must point to a valid `T` that outlives `'a`.
pub unsafe fn arg_ref<'a, T>(args: &[ConstTypePtr], index: usize) -> &'a T {
    // SAFETY: guaranteed by the caller.
    unsafe { &*(args[index] as *const T) }
}

/// Store a return value, dropping whatever the slot held
///
/// # Safety
///
/// `ret` must point to an initialised `T`.
pub unsafe fn write_ret<T>(ret: TypePtr, value: T) {
    // SAFETY: guaranteed by the caller.
    unsafe { *(ret as *mut T) = value };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Vector2;

    #[test]
    fn test_read_args_and_write_ret() {
        let a = 5i64;
        let b = Vector2::new(1.0, 2.0);
        let s = String::from("hi");
        let args = [
            &a as *const i64 as ConstTypePtr,
            &b as *const Vector2 as ConstTypePtr,
            &s as *const String as ConstTypePtr,
        ];
        unsafe {
            assert_eq!(arg::<i64>(&args, 0), 5);
            assert_eq!(arg::<Vector2>(&args, 1), b);
            assert_eq!(arg_ref::<String>(&args, 2), "hi");
        }

        let mut out = String::from("old");
        unsafe { write_ret(&mut out as *mut String as TypePtr, String::from("new")) };
        assert_eq!(out, "new");
    }
}
