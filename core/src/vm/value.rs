use core::ffi::c_void;
use core::fmt;

use crate::types::Type;

/// One untyped 64-bit register cell.
///
/// The cell has no tag. Whether it holds an integer, a float or a pointer is
/// decided by the static type the compiler attached to the slot, and each
/// instruction reinterprets the bits accordingly.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const ZERO: Value = Value(0);

    pub const fn from_int(value: i64) -> Self {
        Self(value as u64)
    }

    pub const fn from_uint(value: u64) -> Self {
        Self(value)
    }

    pub fn from_float(value: f64) -> Self {
        Self(value.to_bits())
    }

    pub fn from_bool(value: bool) -> Self {
        Self(value as u64)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    pub const fn as_int(self) -> i64 {
        self.0 as i64
    }

    pub const fn as_uint(self) -> u64 {
        self.0
    }

    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub const fn as_bool(self) -> bool {
        self.0 != 0
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Formats the cell as a value of type `ty`.
    pub fn display(self, ty: Type) -> Typed {
        Typed { value: self, ty }
    }
}

/// A cell paired with the static type that gives it meaning.
pub struct Typed {
    value: Value,
    ty: Type,
}

impl fmt::Display for Typed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Bool => write!(f, "{}", self.value.as_bool()),
            Type::Int(_) => write!(f, "{}", self.value.as_int()),
            Type::Float(_) => write!(f, "{:?}", self.value.as_float()),
            Type::Void => write!(f, "()"),
            _ => write!(f, "{}@{:#x}", self.ty, self.value.as_uint()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(0x{:016X})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reinterpretation() {
        let v = Value::from_int(-1);
        assert_eq!(v.as_uint(), u64::MAX);
        assert_eq!(v.as_int(), -1);

        let v = Value::from_float(1.5);
        assert_eq!(v.as_float(), 1.5);
        assert_eq!(v.to_bits(), 1.5f64.to_bits());

        let x = 7u8;
        let v = Value::from_ptr(&x as *const u8);
        assert_eq!(v.as_ptr() as *const u8, &x as *const u8);
    }

    #[test]
    fn test_display_follows_type() {
        assert_eq!(Value::from_int(-3).display(Type::INT).to_string(), "-3");
        assert_eq!(Value::from_float(2.0).display(Type::FLOAT).to_string(), "2.0");
        assert_eq!(Value::from_bool(true).display(Type::Bool).to_string(), "true");
        assert_eq!(
            Value::from_uint(0x10).display(Type::Pointer).to_string(),
            "ptr@0x10"
        );
    }
}
