//! Raw argument and return frames.
//!
//! A frame is a byte buffer laid out from a list of [`TypeDescriptor`]s:
//! every slot is aligned to its type's alignment and sized to its type's
//! size. Scalars are stored in native byte order. Object, class, selector
//! and pointer slots hold one 64-bit word:
//!
//! | Slot            | Word                              |
//! |-----------------|-----------------------------------|
//! | `@`, `@?`       | object id, 0 for nil              |
//! | `#`             | class id, 0 for nil               |
//! | `:`             | selector id + 1, 0 for nil        |
//! | `*`, `^T`, `?`  | address, 0 for NULL               |

use super::{ClassId, NativeFault, ObjectId};
use crate::encoding::{TypeDescriptor, object_size};
use crate::selector::Selector;
use std::ffi::{CStr, c_char};

const WORD: usize = 8;

#[derive(Debug, Clone)]
struct Slot {
    ty: TypeDescriptor,
    offset: usize,
    size: usize,
}

/// The argument frame of a native call.
#[derive(Debug, Clone)]
pub struct ArgFrame {
    slots: Vec<Slot>,
    buffer: Vec<u8>,
}

impl ArgFrame {
    /// Lays out a zeroed frame for `types`. Returns `None` when a type has
    /// no fixed layout or the frame would not fit in memory.
    pub fn new<'t>(types: impl IntoIterator<Item = &'t TypeDescriptor>) -> Option<Self> {
        let mut slots = Vec::new();
        let mut size = 0usize;
        for ty in types {
            let (slot_size, align) = ty.size_align()?;
            let offset = size.checked_next_multiple_of(align.max(1))?;
            slots.push(Slot {
                ty: ty.clone(),
                offset,
                size: slot_size,
            });
            size = offset.checked_add(slot_size)?;
        }
        let size = object_size(size.checked_next_multiple_of(WORD)?)?;
        Some(Self {
            slots,
            buffer: vec![0; size],
        })
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if the frame has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total buffer size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// The type of slot `index`.
    #[must_use]
    pub fn ty(&self, index: usize) -> Option<&TypeDescriptor> {
        self.slots.get(index).map(|slot| &slot.ty)
    }

    /// Byte offset of slot `index`.
    #[must_use]
    pub fn offset(&self, index: usize) -> Option<usize> {
        self.slots.get(index).map(|slot| slot.offset)
    }

    /// The bytes of slot `index`.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&[u8]> {
        let slot = self.slots.get(index)?;
        self.buffer.get(slot.offset..slot.offset + slot.size)
    }

    /// The bytes of slot `index`, mutably.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let slot = self.slots.get(index)?;
        self.buffer.get_mut(slot.offset..slot.offset + slot.size)
    }

    fn view(&self, index: usize) -> Result<(&TypeDescriptor, &[u8]), NativeFault> {
        let ty = self.ty(index).ok_or_else(|| missing_slot(index))?;
        let bytes = self.slot(index).ok_or_else(|| missing_slot(index))?;
        Ok((ty, bytes))
    }

    /// Writes a raw word into a word-sized slot (receiver slots in
    /// particular, which may be `@` or `#`).
    ///
    /// # Errors
    ///
    /// Fails when the slot is missing or not word sized.
    pub fn set_word(&mut self, index: usize, word: u64) -> Result<(), NativeFault> {
        let bytes = self.slot_mut(index).ok_or_else(|| missing_slot(index))?;
        if bytes.len() != WORD {
            return Err(slot_mismatch(index, "a word"));
        }
        write_word(bytes, word);
        Ok(())
    }

    /// Writes an object into slot `index`.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is an object slot.
    pub fn set_object(&mut self, index: usize, object: ObjectId) -> Result<(), NativeFault> {
        if !self.ty(index).is_some_and(TypeDescriptor::is_object) {
            return Err(slot_mismatch(index, "an object"));
        }
        self.set_word(index, object.0)
    }

    /// Writes a selector into slot `index`.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is a selector slot.
    pub fn set_selector(&mut self, index: usize, selector: &Selector) -> Result<(), NativeFault> {
        if self.ty(index) != Some(&TypeDescriptor::Selector) {
            return Err(slot_mismatch(index, "a selector"));
        }
        self.set_word(index, selector_word(Some(selector)))
    }

    /// Reads the object in slot `index`.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is an object slot.
    pub fn object(&self, index: usize) -> Result<ObjectId, NativeFault> {
        let (ty, bytes) = self.view(index)?;
        if !ty.is_object() {
            return Err(slot_mismatch(index, "an object"));
        }
        Ok(ObjectId(read_word(bytes)))
    }

    /// Reads the class in slot `index`.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is a class slot.
    pub fn class(&self, index: usize) -> Result<Option<ClassId>, NativeFault> {
        let (ty, bytes) = self.view(index)?;
        if *ty != TypeDescriptor::Class {
            return Err(slot_mismatch(index, "a class"));
        }
        Ok(class_from_word(read_word(bytes)))
    }

    /// Reads an integer or boolean slot.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is an integer or boolean slot.
    pub fn int(&self, index: usize) -> Result<i128, NativeFault> {
        let (ty, bytes) = self.view(index)?;
        read_int(ty, bytes).ok_or_else(|| slot_mismatch(index, "an integer"))
    }

    /// Reads a floating point or integer slot as `f64`.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is numeric.
    pub fn double(&self, index: usize) -> Result<f64, NativeFault> {
        let (ty, bytes) = self.view(index)?;
        read_float(ty, bytes).ok_or_else(|| slot_mismatch(index, "a number"))
    }

    /// Reads a boolean (or integer, non-zero is true) slot.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is an integer or boolean slot.
    pub fn bool(&self, index: usize) -> Result<bool, NativeFault> {
        self.int(index).map(|value| value != 0)
    }

    /// Reads the selector in slot `index`.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is a selector slot holding a known selector.
    pub fn selector(&self, index: usize) -> Result<Selector, NativeFault> {
        let (ty, bytes) = self.view(index)?;
        if *ty != TypeDescriptor::Selector {
            return Err(slot_mismatch(index, "a selector"));
        }
        selector_from_word(read_word(bytes))
            .ok_or_else(|| slot_mismatch(index, "a known selector"))
    }

    /// Reads the bytes of a composite slot.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is a struct or array slot.
    pub fn bytes(&self, index: usize) -> Result<&[u8], NativeFault> {
        let (ty, bytes) = self.view(index)?;
        match ty {
            TypeDescriptor::Composite(_) | TypeDescriptor::Array { .. } => Ok(bytes),
            _ => Err(slot_mismatch(index, "a composite")),
        }
    }

    /// Reads the C string in slot `index`; `None` for NULL.
    ///
    /// # Errors
    ///
    /// Fails unless the slot is a `*` slot.
    ///
    /// # Safety
    ///
    /// The address in the slot must point to a NUL-terminated string that
    /// stays valid for the returned lifetime.
    pub unsafe fn c_str(&self, index: usize) -> Result<Option<&CStr>, NativeFault> {
        let (ty, bytes) = self.view(index)?;
        if *ty != TypeDescriptor::CString {
            return Err(slot_mismatch(index, "a C string"));
        }
        let address = read_word(bytes);
        if address == 0 {
            return Ok(None);
        }
        // SAFETY: guaranteed by the caller.
        Ok(Some(unsafe { CStr::from_ptr(address as usize as *const c_char) }))
    }
}

/// The return slot of a native call.
#[derive(Debug, Clone)]
pub struct ReturnFrame {
    ty: TypeDescriptor,
    buffer: Vec<u8>,
}

impl ReturnFrame {
    /// A zeroed return slot for `ty`. Returns `None` when the type has no
    /// fixed layout.
    #[must_use]
    pub fn new(ty: &TypeDescriptor) -> Option<Self> {
        let (size, _) = ty.size_align()?;
        Some(Self {
            ty: ty.clone(),
            buffer: vec![0; size],
        })
    }

    /// The return type.
    #[must_use]
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    /// The raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// The raw bytes, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Clears the slot back to zero.
    pub fn clear(&mut self) {
        self.buffer.fill(0);
    }

    /// Returns an object. Ignored for void returns.
    ///
    /// # Errors
    ///
    /// Fails unless the return type is an object.
    pub fn set_object(&mut self, object: ObjectId) -> Result<(), NativeFault> {
        match self.ty {
            TypeDescriptor::Void => Ok(()),
            ref ty if ty.is_object() => {
                write_word(&mut self.buffer, object.0);
                Ok(())
            }
            _ => Err(return_mismatch(&self.ty, "an object")),
        }
    }

    /// Returns a class. Ignored for void returns.
    ///
    /// # Errors
    ///
    /// Fails unless the return type is a class.
    pub fn set_class(&mut self, class: ClassId) -> Result<(), NativeFault> {
        match self.ty {
            TypeDescriptor::Void => Ok(()),
            TypeDescriptor::Class => {
                write_word(&mut self.buffer, u64::from(class.0));
                Ok(())
            }
            _ => Err(return_mismatch(&self.ty, "a class")),
        }
    }

    /// Returns an integer, truncated to the return width. Numeric returns
    /// convert. Ignored for void returns.
    ///
    /// # Errors
    ///
    /// Fails unless the return type is numeric.
    pub fn set_int(&mut self, value: i128) -> Result<(), NativeFault> {
        if self.ty.is_void() || write_int(&self.ty, &mut self.buffer, value) {
            Ok(())
        } else {
            Err(return_mismatch(&self.ty, "an integer"))
        }
    }

    /// Returns a boolean.
    ///
    /// # Errors
    ///
    /// Fails unless the return type is numeric.
    pub fn set_bool(&mut self, value: bool) -> Result<(), NativeFault> {
        self.set_int(i128::from(value))
    }

    /// Returns a floating point value. Integer returns truncate. Ignored for
    /// void returns.
    ///
    /// # Errors
    ///
    /// Fails unless the return type is numeric.
    pub fn set_double(&mut self, value: f64) -> Result<(), NativeFault> {
        if self.ty.is_void() || write_float(&self.ty, &mut self.buffer, value) {
            Ok(())
        } else {
            Err(return_mismatch(&self.ty, "a number"))
        }
    }

    /// Returns an address for `*`, `^T` and `?` returns.
    ///
    /// # Errors
    ///
    /// Fails unless the return type is pointer-like.
    pub fn set_pointer(&mut self, address: usize) -> Result<(), NativeFault> {
        match self.ty {
            TypeDescriptor::Void => Ok(()),
            TypeDescriptor::CString | TypeDescriptor::Pointer(_) | TypeDescriptor::Unknown => {
                write_word(&mut self.buffer, address as u64);
                Ok(())
            }
            _ => Err(return_mismatch(&self.ty, "a pointer")),
        }
    }

    /// Returns composite bytes.
    ///
    /// # Errors
    ///
    /// Fails when the size differs from the return type's size.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<(), NativeFault> {
        if self.ty.is_void() {
            return Ok(());
        }
        if bytes.len() != self.buffer.len() {
            return Err(return_mismatch(&self.ty, "bytes of matching size"));
        }
        self.buffer.copy_from_slice(bytes);
        Ok(())
    }

    /// Reads the returned object.
    #[must_use]
    pub fn object(&self) -> Option<ObjectId> {
        self.ty.is_object().then(|| ObjectId(read_word(&self.buffer)))
    }

    /// Reads an integer return.
    #[must_use]
    pub fn int(&self) -> Option<i128> {
        read_int(&self.ty, &self.buffer)
    }

    /// Reads a numeric return as `f64`.
    #[must_use]
    pub fn double(&self) -> Option<f64> {
        read_float(&self.ty, &self.buffer)
    }
}

fn missing_slot(index: usize) -> NativeFault {
    NativeFault::exception(
        "InvalidArgumentException",
        format!("argument frame has no slot {index}"),
    )
}

fn slot_mismatch(index: usize, expected: &str) -> NativeFault {
    NativeFault::exception(
        "InvalidArgumentException",
        format!("argument slot {index} is not {expected}"),
    )
}

fn return_mismatch(ty: &TypeDescriptor, expected: &str) -> NativeFault {
    NativeFault::exception(
        "InvalidReturnException",
        format!("return type {ty} cannot hold {expected}"),
    )
}

// ============================================================================
// Slot encoding helpers
// ============================================================================

pub(crate) fn read_word(bytes: &[u8]) -> u64 {
    let mut word = [0u8; WORD];
    let len = bytes.len().min(WORD);
    word[..len].copy_from_slice(&bytes[..len]);
    u64::from_ne_bytes(word)
}

pub(crate) fn write_word(bytes: &mut [u8], word: u64) {
    let len = bytes.len().min(WORD);
    bytes[..len].copy_from_slice(&word.to_ne_bytes()[..len]);
}

pub(crate) fn selector_word(selector: Option<&Selector>) -> u64 {
    selector.map_or(0, |selector| selector.id() + 1)
}

pub(crate) fn selector_from_word(word: u64) -> Option<Selector> {
    word.checked_sub(1).and_then(Selector::from_id)
}

pub(crate) fn class_from_word(word: u64) -> Option<ClassId> {
    u32::try_from(word).ok().filter(|id| *id != 0).map(ClassId)
}

/// Reads an integer or boolean, sign-extending signed widths.
pub(crate) fn read_int(ty: &TypeDescriptor, bytes: &[u8]) -> Option<i128> {
    match ty {
        TypeDescriptor::Bool => Some(i128::from(*bytes.first()? != 0)),
        TypeDescriptor::Integer { width, signed } => {
            let value = match (width, signed) {
                (1, true) => i128::from(i8::from_ne_bytes(bytes.get(..1)?.try_into().ok()?)),
                (1, false) => i128::from(*bytes.first()?),
                (2, true) => i128::from(i16::from_ne_bytes(bytes.get(..2)?.try_into().ok()?)),
                (2, false) => i128::from(u16::from_ne_bytes(bytes.get(..2)?.try_into().ok()?)),
                (4, true) => i128::from(i32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?)),
                (4, false) => i128::from(u32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?)),
                (_, true) => i128::from(i64::from_ne_bytes(bytes.get(..8)?.try_into().ok()?)),
                (_, false) => i128::from(u64::from_ne_bytes(bytes.get(..8)?.try_into().ok()?)),
            };
            Some(value)
        }
        _ => None,
    }
}

/// Writes an integer, keeping the low bytes for the slot width. Floating
/// point slots receive the converted value.
pub(crate) fn write_int(ty: &TypeDescriptor, bytes: &mut [u8], value: i128) -> bool {
    match ty {
        TypeDescriptor::Bool => match bytes.first_mut() {
            Some(byte) => {
                *byte = u8::from(value != 0);
                true
            }
            None => false,
        },
        TypeDescriptor::Integer { width, .. } => {
            let width = usize::from(*width);
            match bytes.get_mut(..width) {
                Some(slot) => {
                    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                    let raw = (value as u128 as u64).to_ne_bytes();
                    #[cfg(target_endian = "little")]
                    slot.copy_from_slice(&raw[..width]);
                    #[cfg(target_endian = "big")]
                    slot.copy_from_slice(&raw[WORD - width..]);
                    true
                }
                None => false,
            }
        }
        #[allow(clippy::cast_precision_loss)]
        TypeDescriptor::Float | TypeDescriptor::Double => write_float(ty, bytes, value as f64),
        _ => false,
    }
}

/// Reads a floating point slot; integer slots convert.
pub(crate) fn read_float(ty: &TypeDescriptor, bytes: &[u8]) -> Option<f64> {
    match ty {
        TypeDescriptor::Float => Some(f64::from(read_f32(bytes)?)),
        TypeDescriptor::Double => Some(f64::from_ne_bytes(bytes.get(..8)?.try_into().ok()?)),
        #[allow(clippy::cast_precision_loss)]
        _ => read_int(ty, bytes).map(|value| value as f64),
    }
}

/// Writes a floating point value; integer slots truncate toward zero.
pub(crate) fn write_float(ty: &TypeDescriptor, bytes: &mut [u8], value: f64) -> bool {
    match ty {
        #[allow(clippy::cast_possible_truncation)]
        TypeDescriptor::Float => write_f32(bytes, value as f32),
        TypeDescriptor::Double => match bytes.get_mut(..8) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_ne_bytes());
                true
            }
            None => false,
        },
        #[allow(clippy::cast_possible_truncation)]
        _ => write_int(ty, bytes, value as i128),
    }
}

pub(crate) fn read_f32(bytes: &[u8]) -> Option<f32> {
    Some(f32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?))
}

pub(crate) fn write_f32(bytes: &mut [u8], value: f32) -> bool {
    match bytes.get_mut(..4) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_ne_bytes());
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Signature, parse_type};

    #[test]
    fn test_frame_layout() {
        let sig = Signature::parse("v@:c{Size=dd}i").unwrap();
        let frame = ArgFrame::new(sig.arg_types()).unwrap();
        assert_eq!(frame.len(), 5);
        assert_eq!(frame.offset(0), Some(0));
        assert_eq!(frame.offset(1), Some(8));
        assert_eq!(frame.offset(2), Some(16));
        assert_eq!(frame.offset(3), Some(24));
        assert_eq!(frame.offset(4), Some(40));
        assert_eq!(frame.byte_len(), 48);
    }

    #[test]
    fn test_frame_rejects_bitfields() {
        let sig = Signature::parse("v@:b3").unwrap();
        assert!(ArgFrame::new(sig.arg_types()).is_none());
    }

    #[test]
    fn test_frame_rejects_sizes_past_the_address_space() {
        // Each argument alone fits; the frame does not.
        let big = "[1152921504606846975q]";
        assert!(parse_type(big).unwrap().size_align().is_some());
        let sig = Signature::parse(&format!("v@:{big}")).unwrap();
        assert!(ArgFrame::new(sig.arg_types()).is_none());
        let sig = Signature::parse(&format!("v@:{big}{big}")).unwrap();
        assert!(ArgFrame::new(sig.arg_types()).is_none());
    }

    #[test]
    fn test_signed_and_unsigned_ints() {
        let sig = Signature::parse("v@:cCsSiIqQ").unwrap();
        let mut frame = ArgFrame::new(sig.arg_types()).unwrap();
        let values: [i128; 8] = [
            -1,
            255,
            i128::from(i16::MIN),
            i128::from(u16::MAX),
            i128::from(i32::MIN),
            i128::from(u32::MAX),
            i128::from(i64::MIN),
            i128::from(u64::MAX),
        ];
        for (offset, value) in values.iter().enumerate() {
            let index = offset + 2;
            let ty = frame.ty(index).unwrap().clone();
            assert!(write_int(&ty, frame.slot_mut(index).unwrap(), *value));
        }
        for (offset, value) in values.iter().enumerate() {
            assert_eq!(frame.int(offset + 2).unwrap(), *value);
        }
    }

    #[test]
    fn test_object_and_selector_slots() {
        let sig = Signature::parse("v@:@:").unwrap();
        let mut frame = ArgFrame::new(sig.arg_types()).unwrap();
        let sel: Selector = "count".parse().unwrap();
        frame.set_object(2, ObjectId(42)).unwrap();
        frame.set_selector(3, &sel).unwrap();
        assert_eq!(frame.object(2).unwrap(), ObjectId(42));
        assert_eq!(frame.selector(3).unwrap(), sel);
        assert!(frame.int(2).is_err());
        assert!(frame.set_object(3, ObjectId(1)).is_err());
    }

    #[test]
    fn test_return_frame() {
        let mut ret = ReturnFrame::new(&parse_type("d").unwrap()).unwrap();
        ret.set_double(2.5).unwrap();
        assert_eq!(ret.double(), Some(2.5));
        assert!(ret.set_object(ObjectId(1)).is_err());

        let mut void = ReturnFrame::new(&TypeDescriptor::Void).unwrap();
        void.set_object(ObjectId(1)).unwrap();
        assert!(void.bytes().is_empty());

        let mut int = ReturnFrame::new(&parse_type("S").unwrap()).unwrap();
        int.set_int(70_000).unwrap();
        assert_eq!(int.int(), Some(70_000 - 65_536));
    }

    #[test]
    fn test_c_str_slot() {
        let sig = Signature::parse("v@:*").unwrap();
        let mut frame = ArgFrame::new(sig.arg_types()).unwrap();
        let text = std::ffi::CString::new("hello").unwrap();
        frame.set_word(2, text.as_ptr() as usize as u64).unwrap();
        // SAFETY: `text` outlives the read.
        let read = unsafe { frame.c_str(2) }.unwrap().unwrap();
        assert_eq!(read.to_str().unwrap(), "hello");
    }
}
