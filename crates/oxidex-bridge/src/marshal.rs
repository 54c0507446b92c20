//! Conversion between script values and native frame slots.
//!
//! [`encode`] writes one [`Value`] into the bytes of a frame slot laid out
//! for a [`TypeDescriptor`]; [`decode`] reads a slot back into a value.
//! Objects created while encoding (strings and numbers boxed for `@`
//! slots, C strings for `*` slots) are parked in a [`Keepalive`] that the
//! caller holds until the native call returns.

use crate::encoding::{Composite, TypeDescriptor};
use crate::error::{Error, Result};
use crate::handle::{NativeHandle, OwnershipLedger};
use crate::native::frame::{
    class_from_word, read_f32, read_float, read_int, read_word, selector_from_word, selector_word,
    write_f32, write_float, write_int, write_word,
};
use crate::native::{Number, ObjectId};
use crate::selector::{Ownership, Selector};
use crate::value::Value;
use std::ffi::{CStr, CString, c_char};
use std::rc::Rc;

/// Temporaries that must outlive a native call.
#[derive(Debug, Default)]
pub(crate) struct Keepalive {
    objects: Vec<NativeHandle>,
    strings: Vec<CString>,
}

impl Keepalive {
    /// Moves the C strings out, for results that outlive the call.
    pub(crate) fn take_strings(&mut self) -> Vec<CString> {
        std::mem::take(&mut self.strings)
    }
}

/// Writes `value` into `out`, laid out as `ty`.
///
/// `index` is the argument position reported in errors (0 for a return
/// value).
pub(crate) fn encode(
    ledger: &Rc<OwnershipLedger>,
    ty: &TypeDescriptor,
    value: &Value,
    out: &mut [u8],
    keep: &mut Keepalive,
    index: usize,
) -> Result<()> {
    let mismatch = || Error::TypeMismatch {
        index,
        expected: describe(ty),
        got: value.type_name(),
    };

    match ty {
        TypeDescriptor::Void | TypeDescriptor::Bitfield(_) => return Err(mismatch()),
        TypeDescriptor::Bool => {
            let flag = match value {
                Value::Bool(flag) => *flag,
                Value::Nil => false,
                Value::Int(_) | Value::UInt(_) => value.as_i128().is_some_and(|v| v != 0),
                _ => return Err(mismatch()),
            };
            write_int(ty, out, i128::from(flag));
        }
        TypeDescriptor::Integer { width, signed } => {
            let number = value.as_i128().ok_or_else(mismatch)?;
            let (min, max) = integer_range(*width, *signed);
            if number < min || number > max {
                return Err(Error::ValueOutOfRange {
                    index,
                    value: number,
                    expected: describe(ty),
                });
            }
            write_int(ty, out, number);
        }
        TypeDescriptor::Float => match value {
            // Kept as raw bits so NaN payloads survive.
            Value::Float(float) => {
                write_f32(out, *float);
            }
            _ => {
                let number = value.as_f64().ok_or_else(mismatch)?;
                write_float(ty, out, number);
            }
        },
        TypeDescriptor::Double => {
            let number = value.as_f64().ok_or_else(mismatch)?;
            write_float(ty, out, number);
        }
        TypeDescriptor::Object { .. } | TypeDescriptor::Block => {
            let object = match value {
                Value::Nil => ObjectId::NIL,
                Value::Object(handle) => handle.id(),
                Value::Str(text) => {
                    let id = ledger
                        .runtime()
                        .new_string(text)
                        .map_err(|fault| boxing_fault("string", fault))?;
                    park(ledger, id, keep)?
                }
                Value::Bool(_)
                | Value::Int(_)
                | Value::UInt(_)
                | Value::Float(_)
                | Value::Double(_) => {
                    let number = to_number(value).ok_or_else(mismatch)?;
                    let id = ledger
                        .runtime()
                        .new_number(number)
                        .map_err(|fault| boxing_fault("number", fault))?;
                    park(ledger, id, keep)?
                }
                _ => return Err(mismatch()),
            };
            write_word(out, object.0);
        }
        TypeDescriptor::Class => {
            let word = match value {
                Value::Nil => 0,
                Value::Class(class) => u64::from(class.0),
                _ => return Err(mismatch()),
            };
            write_word(out, word);
        }
        TypeDescriptor::Selector => {
            let selector = match value {
                Value::Nil => None,
                Value::Selector(selector) => Some(selector.clone()),
                Value::Str(name) => Some(name.parse::<Selector>()?),
                _ => return Err(mismatch()),
            };
            write_word(out, selector_word(selector.as_ref()));
        }
        TypeDescriptor::CString => {
            let address = match value {
                Value::Nil => 0,
                Value::Pointer(address) => *address,
                Value::Str(text) => {
                    let text = CString::new(text.as_str()).map_err(|_| mismatch())?;
                    let address = text.as_ptr() as usize;
                    keep.strings.push(text);
                    address
                }
                _ => return Err(mismatch()),
            };
            write_word(out, address as u64);
        }
        TypeDescriptor::Pointer(_) | TypeDescriptor::Unknown => {
            let address = match value {
                Value::Nil => 0,
                Value::Pointer(address) => *address,
                _ => return Err(mismatch()),
            };
            write_word(out, address as u64);
        }
        TypeDescriptor::Array { len, element } => {
            let Value::Struct(items) = value else {
                return Err(mismatch());
            };
            if items.len() != *len {
                return Err(mismatch());
            }
            let (size, _) = element.size_align().ok_or_else(mismatch)?;
            for (position, item) in items.iter().enumerate() {
                let start = position * size;
                let slot = out.get_mut(start..start + size).ok_or_else(mismatch)?;
                encode(ledger, element, item, slot, keep, index)?;
            }
        }
        TypeDescriptor::Composite(composite) => {
            let Value::Struct(fields) = value else {
                return Err(mismatch());
            };
            if fields.len() != composite.fields.len() || composite.layout.is_none() {
                return Err(mismatch());
            }
            for ((field, offset), item) in field_slots(composite).zip(offsets(composite)).zip(fields) {
                let (field_ty, size) = field.ok_or_else(mismatch)?;
                let slot = out.get_mut(offset..offset + size).ok_or_else(mismatch)?;
                encode(ledger, field_ty, item, slot, keep, index)?;
            }
        }
    }
    Ok(())
}

/// Reads a value of type `ty` out of `bytes`.
///
/// Objects are wrapped according to `ownership`; objects nested in structs
/// are always borrowed.
pub(crate) fn decode(
    ledger: &Rc<OwnershipLedger>,
    ty: &TypeDescriptor,
    bytes: &[u8],
    ownership: Ownership,
) -> Result<Value> {
    let truncated = || Error::TypeMismatch {
        index: 0,
        expected: describe(ty),
        got: "truncated slot",
    };

    let value = match ty {
        TypeDescriptor::Void => Value::Nil,
        TypeDescriptor::Bool => Value::Bool(read_int(ty, bytes).ok_or_else(truncated)? != 0),
        TypeDescriptor::Integer { signed, .. } => {
            let number = read_int(ty, bytes).ok_or_else(truncated)?;
            match i64::try_from(number) {
                Ok(small) => Value::Int(small),
                Err(_) if !signed => {
                    Value::UInt(u64::try_from(number).map_err(|_| truncated())?)
                }
                Err(_) => return Err(truncated()),
            }
        }
        TypeDescriptor::Float => Value::Float(read_f32(bytes).ok_or_else(truncated)?),
        TypeDescriptor::Double => Value::Double(read_float(ty, bytes).ok_or_else(truncated)?),
        TypeDescriptor::Object { .. } | TypeDescriptor::Block => {
            let object = ObjectId(read_word(bytes));
            if object.is_nil() {
                Value::Nil
            } else {
                Value::Object(NativeHandle::wrap(ledger, object, ownership)?)
            }
        }
        TypeDescriptor::Class => class_from_word(read_word(bytes)).map_or(Value::Nil, Value::Class),
        TypeDescriptor::Selector => {
            selector_from_word(read_word(bytes)).map_or(Value::Nil, Value::Selector)
        }
        TypeDescriptor::CString => {
            let address = read_word(bytes);
            if address == 0 {
                Value::Nil
            } else {
                // SAFETY: `*` slots filled by the native runtime point to
                // NUL-terminated strings valid until its pool drains.
                let text = unsafe { CStr::from_ptr(address as usize as *const c_char) };
                Value::Str(text.to_string_lossy().into_owned())
            }
        }
        TypeDescriptor::Pointer(_) | TypeDescriptor::Unknown => match read_word(bytes) {
            0 => Value::Nil,
            #[allow(clippy::cast_possible_truncation)]
            address => Value::Pointer(address as usize),
        },
        TypeDescriptor::Array { len, element } => {
            let (size, _) = element.size_align().ok_or_else(truncated)?;
            let mut items = Vec::with_capacity(*len);
            for position in 0..*len {
                let start = position * size;
                let slot = bytes.get(start..start + size).ok_or_else(truncated)?;
                items.push(decode(ledger, element, slot, Ownership::Borrowed)?);
            }
            Value::Struct(items)
        }
        TypeDescriptor::Composite(composite) => {
            if composite.layout.is_none() {
                return Err(truncated());
            }
            let mut fields = Vec::with_capacity(composite.fields.len());
            for (field, offset) in field_slots(composite).zip(offsets(composite)) {
                let (field_ty, size) = field.ok_or_else(truncated)?;
                let slot = bytes.get(offset..offset + size).ok_or_else(truncated)?;
                fields.push(decode(ledger, field_ty, slot, Ownership::Borrowed)?);
            }
            Value::Struct(fields)
        }
        TypeDescriptor::Bitfield(_) => return Err(truncated()),
    };
    Ok(value)
}

/// A readable name for a native type in error messages.
pub(crate) fn describe(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Void => "void".to_string(),
        TypeDescriptor::Bool => "bool".to_string(),
        TypeDescriptor::Integer { width, signed } => {
            format!("{}{}", if *signed { "i" } else { "u" }, u32::from(*width) * 8)
        }
        TypeDescriptor::Float => "float".to_string(),
        TypeDescriptor::Double => "double".to_string(),
        TypeDescriptor::Object { class_hint: Some(name) } => format!("{name} object"),
        TypeDescriptor::Object { class_hint: None } => "object".to_string(),
        TypeDescriptor::Block => "block".to_string(),
        TypeDescriptor::Class => "class".to_string(),
        TypeDescriptor::Selector => "selector".to_string(),
        TypeDescriptor::CString => "C string".to_string(),
        other => format!("'{other}'"),
    }
}

fn integer_range(width: u8, signed: bool) -> (i128, i128) {
    let bits = u32::from(width) * 8;
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

fn to_number(value: &Value) -> Option<Number> {
    match value {
        Value::Bool(flag) => Some(Number::Bool(*flag)),
        Value::Int(number) => Some(Number::Int(*number)),
        #[allow(clippy::cast_precision_loss)]
        Value::UInt(number) => Some(Number::Float(*number as f64)),
        Value::Float(number) => Some(Number::Float(f64::from(*number))),
        Value::Double(number) => Some(Number::Float(*number)),
        _ => None,
    }
}

/// Adopts a freshly boxed +1 object into the keepalive.
fn park(ledger: &Rc<OwnershipLedger>, id: ObjectId, keep: &mut Keepalive) -> Result<ObjectId> {
    keep.objects.push(NativeHandle::wrap(ledger, id, Ownership::Owned)?);
    Ok(id)
}

fn boxing_fault(what: &str, fault: crate::native::NativeFault) -> Error {
    Error::NativeCallFault {
        selector: format!("<box {what}>"),
        fault,
    }
}

fn offsets(composite: &Composite) -> impl Iterator<Item = usize> + '_ {
    composite
        .layout
        .iter()
        .flat_map(|layout| layout.offsets.iter().copied())
}

/// Each field with its size, paired with its offset.
fn field_slots(
    composite: &Composite,
) -> impl Iterator<Item = Option<(&TypeDescriptor, usize)>> + '_ {
    composite
        .fields
        .iter()
        .map(|field| field.size_align().map(|(size, _)| (field, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::parse_type;
    use crate::native::{NativeRuntime, SimRuntime};

    fn ledger() -> (Rc<SimRuntime>, Rc<OwnershipLedger>) {
        let runtime = Rc::new(SimRuntime::new());
        let ledger = Rc::new(OwnershipLedger::new(runtime.clone()));
        (runtime, ledger)
    }

    fn round_trip(ledger: &Rc<OwnershipLedger>, encoding: &str, value: &Value) -> Value {
        let ty = parse_type(encoding).unwrap();
        let (size, _) = ty.size_align().unwrap();
        let mut bytes = vec![0u8; size];
        let mut keep = Keepalive::default();
        encode(ledger, &ty, value, &mut bytes, &mut keep, 1).unwrap();
        decode(ledger, &ty, &bytes, Ownership::Borrowed).unwrap()
    }

    #[test]
    fn test_integer_boundaries() {
        let (_runtime, ledger) = ledger();
        let cases: &[(&str, Value)] = &[
            ("c", Value::Int(-128)),
            ("C", Value::Int(255)),
            ("s", Value::Int(-32_768)),
            ("S", Value::Int(0)),
            ("i", Value::Int(-1)),
            ("I", Value::Int(i64::from(u32::MAX))),
            ("q", Value::Int(i64::MIN)),
            ("l", Value::Int(i64::MAX)),
            ("Q", Value::UInt(u64::MAX)),
        ];
        for (encoding, value) in cases {
            assert_eq!(&round_trip(&ledger, encoding, value), value, "{encoding}");
        }
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let (_runtime, ledger) = ledger();
        let ty = parse_type("C").unwrap();
        let mut bytes = [0u8; 1];
        let err = encode(&ledger, &ty, &Value::Int(256), &mut bytes, &mut Keepalive::default(), 2)
            .unwrap_err();
        assert_eq!(
            err,
            Error::ValueOutOfRange {
                index: 2,
                value: 256,
                expected: "u8".to_string()
            }
        );
        let ty = parse_type("I").unwrap();
        let mut bytes = [0u8; 4];
        assert!(encode(&ledger, &ty, &Value::Int(-1), &mut bytes, &mut Keepalive::default(), 1).is_err());
    }

    #[test]
    fn test_nan_bits_survive() {
        let (_runtime, ledger) = ledger();
        let quiet = f64::from_bits(0x7ff8_0000_0000_1234);
        let Value::Double(back) = round_trip(&ledger, "d", &Value::Double(quiet)) else {
            panic!("expected a double");
        };
        assert_eq!(back.to_bits(), quiet.to_bits());

        let single = f32::from_bits(0x7fc0_0042);
        let Value::Float(back) = round_trip(&ledger, "f", &Value::Float(single)) else {
            panic!("expected a float");
        };
        assert_eq!(back.to_bits(), single.to_bits());
    }

    #[test]
    fn test_struct_layout() {
        let (_runtime, ledger) = ledger();
        let value = Value::Struct(vec![
            Value::Int(7),
            Value::Struct(vec![Value::Double(1.5), Value::Double(-2.0)]),
        ]);
        assert_eq!(round_trip(&ledger, "{Pair=c{Size=dd}}", &value), value);
        assert!(matches!(
            round_trip(&ledger, "[3s]", &Value::Struct(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
            Value::Struct(items) if items.len() == 3
        ));
    }

    #[test]
    fn test_strings_box_into_objects() {
        let (runtime, ledger) = ledger();
        let ty = parse_type("@").unwrap();
        let mut bytes = [0u8; 8];
        let mut keep = Keepalive::default();
        encode(&ledger, &ty, &Value::from("boxed"), &mut bytes, &mut keep, 1).unwrap();
        let id = ObjectId(read_word(&bytes));
        assert_eq!(runtime.string_value(id).as_deref(), Some("boxed"));
        drop(keep);
        assert_eq!(runtime.retain_count(id), None);
        assert_eq!(ledger.total_outstanding(), 0);
    }

    #[test]
    fn test_c_strings_are_kept_alive() {
        let (_runtime, ledger) = ledger();
        assert_eq!(
            round_trip(&ledger, "*", &Value::from("text")),
            Value::from("text")
        );
        assert_eq!(round_trip(&ledger, "*", &Value::Nil), Value::Nil);
    }

    #[test]
    fn test_type_mismatch() {
        let (_runtime, ledger) = ledger();
        let ty = parse_type("i").unwrap();
        let mut bytes = [0u8; 4];
        let err = encode(&ledger, &ty, &Value::from("5"), &mut bytes, &mut Keepalive::default(), 1)
            .unwrap_err();
        assert_eq!(
            err,
            Error::TypeMismatch {
                index: 1,
                expected: "i32".to_string(),
                got: "string"
            }
        );
    }
}
