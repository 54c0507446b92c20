//! Dynamic script values.
//!
//! [`Value`] is what script code hands to the bridge and gets back from it.
//! Native objects appear as [`Value::Object`] holding a [`NativeHandle`], so
//! every object a script holds carries exactly one native retain.
//!
//! Integers decode to [`Value::Int`] unless they only fit in a `u64`, which
//! gives scripts a single integer kind for all practical values.

use crate::handle::NativeHandle;
use crate::native::ClassId;
use crate::selector::Selector;
use std::fmt;

/// A script value.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// nil / NULL.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Integer above `i64::MAX`.
    UInt(u64),
    /// Single precision float, kept apart so its bits survive unchanged.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// Script string.
    Str(String),
    /// Native object.
    Object(NativeHandle),
    /// Native class.
    Class(ClassId),
    /// Selector.
    Selector(Selector),
    /// Raw address.
    Pointer(usize),
    /// Struct or fixed array, in field order.
    Struct(Vec<Value>),
}

impl Value {
    /// A short name for the value's kind, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::Float(_) | Value::Double(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Class(_) => "class",
            Value::Selector(_) => "selector",
            Value::Pointer(_) => "pointer",
            Value::Struct(_) => "struct",
        }
    }

    /// True for nil.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// False only for nil and `false`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// The native object handle, if any.
    #[must_use]
    pub fn as_handle(&self) -> Option<&NativeHandle> {
        match self {
            Value::Object(handle) => Some(handle),
            _ => None,
        }
    }

    /// Integer view of `Int`, `UInt` and `Bool`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::UInt(value) => i64::try_from(*value).ok(),
            Value::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// Integer view used for range checks when marshalling.
    #[must_use]
    pub(crate) fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(value) => Some(i128::from(*value)),
            Value::UInt(value) => Some(i128::from(*value)),
            Value::Bool(value) => Some(i128::from(*value)),
            _ => None,
        }
    }

    /// Floating point view of any numeric value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(f64::from(*value)),
            Value::Double(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(value) => Some(*value as f64),
            #[allow(clippy::cast_precision_loss)]
            Value::UInt(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// The script string, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::UInt(value) => write!(f, "{value}u"),
            Value::Float(value) => write!(f, "{value}f"),
            Value::Double(value) => write!(f, "{value:?}"),
            Value::Str(text) => write!(f, "{text:?}"),
            Value::Object(handle) => write!(f, "{handle:?}"),
            Value::Class(class) => write!(f, "Class({})", class.0),
            Value::Selector(selector) => write!(f, "@selector({selector})"),
            Value::Pointer(address) => write!(f, "{address:#x}"),
            Value::Struct(fields) => f.debug_list().entries(fields).finish(),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Value::UInt(value), Value::Int)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::from(value as u64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<NativeHandle> for Value {
    fn from(handle: NativeHandle) -> Self {
        Value::Object(handle)
    }
}

impl From<ClassId> for Value {
    fn from(class: ClassId) -> Self {
        Value::Class(class)
    }
}

impl From<Selector> for Value {
    fn from(selector: Selector) -> Self {
        Value::Selector(selector)
    }
}

impl From<Vec<Value>> for Value {
    fn from(fields: Vec<Value>) -> Self {
        Value::Struct(fields)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions() {
        assert_eq!(Value::from(5u64), Value::Int(5));
        assert_eq!(Value::from(u64::MAX), Value::UInt(u64::MAX));
        assert_eq!(Value::from(u64::MAX).as_i64(), None);
        assert_eq!(Value::from(u64::MAX).as_i128(), Some(i128::from(u64::MAX)));
        assert_eq!(Value::from(true).as_i64(), Some(1));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::from(None::<i32>).is_nil());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(Value::from(vec![Value::Int(1)]).type_name(), "struct");
        assert_eq!(Value::from(1.5f32).type_name(), "float");
    }
}
