//! Type encoding parser for Objective-C style method signatures.
//!
//! A signature is a compact string that lists the return type followed by
//! every argument type, including the implicit receiver and selector slots.
//! Each top-level type may be followed by a decimal number: the total frame
//! size after the return type, the byte offset after each argument.
//!
//! # Encoding Format
//!
//! | Code            | Type                                  |
//! |-----------------|---------------------------------------|
//! | `v`             | void                                  |
//! | `B`             | bool                                  |
//! | `c` / `C`       | signed / unsigned char (8 bit)        |
//! | `s` / `S`       | short (16 bit)                        |
//! | `i` / `I`       | int (32 bit)                          |
//! | `l` / `L`       | long (64 bit, LP64)                   |
//! | `q` / `Q`       | long long (64 bit)                    |
//! | `f` / `d`       | float / double                        |
//! | `@`             | object, optionally `@"ClassName"`     |
//! | `@?`            | block                                 |
//! | `#`             | class                                 |
//! | `:`             | selector                              |
//! | `*`             | C string                              |
//! | `^T`            | pointer to `T`                        |
//! | `[NT]`          | array of `N` elements of `T`          |
//! | `{name=T...}`   | struct (`{name}` when opaque)         |
//! | `(name=T...)`   | union                                 |
//! | `bN`            | bitfield of `N` bits                  |
//! | `?`             | unknown (function pointers etc.)      |
//!
//! Type qualifiers (`r n N o O R V`) are accepted and ignored.
//!
//! Example encodings:
//! - `"v@:"` - void return, receiver, selector
//! - `"v16@0:4@8@12"` - `setObject:forKey:` with frame offsets
//! - `"{Size=dd}@:{Size=dd}d"` - struct return and struct argument

// Several type codes share a layout
#![allow(clippy::match_same_arms)]

use std::fmt;
use thiserror::Error;

/// Byte layout of a composite type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Total size including trailing padding.
    pub size: usize,
    /// Alignment of the composite.
    pub align: usize,
    /// Byte offset of each field.
    pub offsets: Vec<usize>,
}

/// Struct or union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    /// `{...}`
    Struct,
    /// `(...)`
    Union,
}

/// A struct or union type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composite {
    /// Struct or union.
    pub kind: CompositeKind,
    /// Tag name, `None` for anonymous (`?`) composites.
    pub name: Option<String>,
    /// Field types in declaration order.
    pub fields: Vec<TypeDescriptor>,
    /// Computed layout; `None` when a field has no fixed layout (bitfields)
    /// or the composite is opaque.
    pub layout: Option<Layout>,
}

/// A parsed type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    /// `v`
    Void,
    /// `B`
    Bool,
    /// `c C s S i I l L q Q`
    Integer {
        /// Width in bytes.
        width: u8,
        /// Signedness.
        signed: bool,
    },
    /// `f`
    Float,
    /// `d`
    Double,
    /// `@`, with the class hint of `@"Name"` when present.
    Object {
        /// Class named in the encoding, if any.
        class_hint: Option<String>,
    },
    /// `@?`
    Block,
    /// `#`
    Class,
    /// `:`
    Selector,
    /// `*`
    CString,
    /// `^T`
    Pointer(Box<TypeDescriptor>),
    /// `[NT]`
    Array {
        /// Element count.
        len: usize,
        /// Element type.
        element: Box<TypeDescriptor>,
    },
    /// `{...}` or `(...)`
    Composite(Composite),
    /// `bN`
    Bitfield(u32),
    /// `?`
    Unknown,
}

impl TypeDescriptor {
    /// Size and alignment in bytes, or `None` for types without a fixed
    /// layout.
    #[must_use]
    pub fn size_align(&self) -> Option<(usize, usize)> {
        match self {
            TypeDescriptor::Void => Some((0, 1)),
            TypeDescriptor::Bool => Some((1, 1)),
            TypeDescriptor::Integer { width, .. } => {
                Some((usize::from(*width), usize::from(*width)))
            }
            TypeDescriptor::Float => Some((4, 4)),
            TypeDescriptor::Double => Some((8, 8)),
            TypeDescriptor::Object { .. }
            | TypeDescriptor::Block
            | TypeDescriptor::Class
            | TypeDescriptor::Selector
            | TypeDescriptor::CString
            | TypeDescriptor::Pointer(_)
            | TypeDescriptor::Unknown => Some((8, 8)),
            TypeDescriptor::Array { len, element } => {
                let (size, align) = element.size_align()?;
                Some((object_size(size.checked_mul(*len)?)?, align))
            }
            TypeDescriptor::Composite(composite) => {
                composite.layout.as_ref().map(|l| (l.size, l.align))
            }
            TypeDescriptor::Bitfield(_) => None,
        }
    }

    /// Returns a reason when values of this type cannot be marshalled.
    #[must_use]
    pub fn unsupported_reason(&self) -> Option<String> {
        match self {
            TypeDescriptor::Bitfield(bits) => {
                Some(format!("bitfield b{bits} has no addressable layout"))
            }
            TypeDescriptor::Composite(composite) => {
                if composite.kind == CompositeKind::Union {
                    return Some(format!("union {self} cannot be marshalled"));
                }
                if composite.fields.is_empty() {
                    return Some(format!("opaque struct {self} has no fields"));
                }
                composite
                    .fields
                    .iter()
                    .find_map(Self::unsupported_reason)
                    .or_else(|| {
                        composite
                            .layout
                            .is_none()
                            .then(|| format!("struct {self} is too large to lay out"))
                    })
            }
            TypeDescriptor::Array { element, .. } => element.unsupported_reason().or_else(|| {
                self.size_align()
                    .is_none()
                    .then(|| format!("array {self} is too large to lay out"))
            }),
            _ => None,
        }
    }

    /// True for `@`, `@?`.
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, TypeDescriptor::Object { .. } | TypeDescriptor::Block)
    }

    /// True for `v`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Void)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Void => f.write_str("v"),
            TypeDescriptor::Bool => f.write_str("B"),
            TypeDescriptor::Integer { width, signed } => {
                let code = match (width, signed) {
                    (1, true) => 'c',
                    (1, false) => 'C',
                    (2, true) => 's',
                    (2, false) => 'S',
                    (4, true) => 'i',
                    (4, false) => 'I',
                    (_, true) => 'q',
                    (_, false) => 'Q',
                };
                write!(f, "{code}")
            }
            TypeDescriptor::Float => f.write_str("f"),
            TypeDescriptor::Double => f.write_str("d"),
            TypeDescriptor::Object { class_hint: None } => f.write_str("@"),
            TypeDescriptor::Object {
                class_hint: Some(name),
            } => write!(f, "@\"{name}\""),
            TypeDescriptor::Block => f.write_str("@?"),
            TypeDescriptor::Class => f.write_str("#"),
            TypeDescriptor::Selector => f.write_str(":"),
            TypeDescriptor::CString => f.write_str("*"),
            TypeDescriptor::Pointer(pointee) => write!(f, "^{pointee}"),
            TypeDescriptor::Array { len, element } => write!(f, "[{len}{element}]"),
            TypeDescriptor::Composite(composite) => {
                let (open, close) = match composite.kind {
                    CompositeKind::Struct => ('{', '}'),
                    CompositeKind::Union => ('(', ')'),
                };
                write!(f, "{open}{}", composite.name.as_deref().unwrap_or("?"))?;
                if !composite.fields.is_empty() {
                    f.write_str("=")?;
                    for field in &composite.fields {
                        write!(f, "{field}")?;
                    }
                }
                write!(f, "{close}")
            }
            TypeDescriptor::Bitfield(bits) => write!(f, "b{bits}"),
            TypeDescriptor::Unknown => f.write_str("?"),
        }
    }
}

/// What went wrong while parsing an encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    /// The string is empty.
    #[error("empty encoding")]
    Empty,
    /// The string ends in the middle of a type.
    #[error("encoding ends in the middle of a type")]
    UnexpectedEnd,
    /// A character that is not a type code.
    #[error("unknown type code '{0}'")]
    UnknownType(char),
    /// A closing bracket that does not match the open one.
    #[error("mismatched nesting: expected {}, found '{found}'", expected.map_or_else(|| "a type".to_string(), |c| format!("'{c}'")))]
    MismatchedNesting {
        /// The closer that was expected, `None` at top level.
        expected: Option<char>,
        /// The character found instead.
        found: char,
    },
    /// Input remains after a complete type.
    #[error("unconsumed input after type")]
    TrailingInput,
    /// A method encoding without receiver and selector slots.
    #[error("method encodings need a receiver and a selector slot")]
    MissingReceiver,
}

/// A type encoding that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid type encoding \"{signature}\" at {position}: {kind}")]
pub struct ParseError {
    /// The complete encoding string.
    pub signature: String,
    /// Byte position of the failure.
    pub position: usize,
    /// The failure.
    pub kind: ParseErrorKind,
}

/// One top-level type of a signature with its declared offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSlot {
    /// The type.
    pub ty: TypeDescriptor,
    /// The number that followed the type in the encoding, if any.
    pub declared_offset: Option<usize>,
}

/// A parsed method signature.
///
/// # Example
///
/// ```
/// use oxidex_bridge::encoding::{Signature, TypeDescriptor};
///
/// let sig = Signature::parse("i@:ii").unwrap();
/// assert_eq!(sig.explicit_arg_count(), 2);
/// assert_eq!(sig.return_type(), &TypeDescriptor::Integer { width: 4, signed: true });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    raw: String,
    ret: SignatureSlot,
    args: Vec<SignatureSlot>,
}

impl Signature {
    /// Parses a method signature.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for malformed encodings, trailing input, or a
    /// signature without receiver (`@` or `#`) and selector (`:`) slots.
    pub fn parse(encoding: &str) -> Result<Self, ParseError> {
        let mut slots = parse_slots(encoding)?;
        let receiver_ok = slots.len() >= 3
            && matches!(
                slots[1].ty,
                TypeDescriptor::Object { .. } | TypeDescriptor::Class
            )
            && slots[2].ty == TypeDescriptor::Selector;
        if !receiver_ok {
            return Err(ParseError {
                signature: encoding.to_string(),
                position: 0,
                kind: ParseErrorKind::MissingReceiver,
            });
        }
        let ret = slots.remove(0);
        Ok(Signature {
            raw: encoding.to_string(),
            ret,
            args: slots,
        })
    }

    /// The encoding string this signature was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The return type.
    #[must_use]
    pub fn return_type(&self) -> &TypeDescriptor {
        &self.ret.ty
    }

    /// The return slot, with the declared frame size.
    #[must_use]
    pub fn return_slot(&self) -> &SignatureSlot {
        &self.ret
    }

    /// All argument slots, including receiver and selector.
    #[must_use]
    pub fn args(&self) -> &[SignatureSlot] {
        &self.args
    }

    /// Argument types, including receiver and selector.
    pub fn arg_types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.args.iter().map(|slot| &slot.ty)
    }

    /// Number of arguments after receiver and selector.
    #[must_use]
    pub fn explicit_arg_count(&self) -> usize {
        self.args.len() - 2
    }

    /// Checks that every slot can be marshalled.
    ///
    /// # Errors
    ///
    /// Returns the reason for the first unsupported slot.
    pub fn check_marshalable(&self) -> Result<(), String> {
        if let Some(reason) = self.ret.ty.unsupported_reason() {
            return Err(format!("return type: {reason}"));
        }
        for (index, slot) in self.args.iter().enumerate() {
            if slot.ty.is_void() {
                return Err(format!("argument {index} is void"));
            }
            if let Some(reason) = slot.ty.unsupported_reason() {
                return Err(format!("argument {index}: {reason}"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses exactly one type (optionally followed by an offset).
///
/// # Errors
///
/// Returns [`ParseError`] when the string is not exactly one type.
///
/// # Example
///
/// ```
/// use oxidex_bridge::encoding::parse_type;
///
/// assert!(parse_type("{Point=dd}").is_ok());
/// assert!(parse_type("ii").is_err());
/// ```
pub fn parse_type(encoding: &str) -> Result<TypeDescriptor, ParseError> {
    let mut parser = Parser::new(encoding);
    if parser.at_end() {
        return Err(parser.error(ParseErrorKind::Empty));
    }
    let ty = parser.parse_type()?;
    parser.parse_number();
    if !parser.at_end() {
        return Err(parser.error(ParseErrorKind::TrailingInput));
    }
    Ok(ty)
}

/// Parses a sequence of top-level types (function signatures).
///
/// # Errors
///
/// Returns [`ParseError`] for malformed or empty encodings.
pub fn parse_type_list(encoding: &str) -> Result<Vec<TypeDescriptor>, ParseError> {
    Ok(parse_slots(encoding)?
        .into_iter()
        .map(|slot| slot.ty)
        .collect())
}

fn parse_slots(encoding: &str) -> Result<Vec<SignatureSlot>, ParseError> {
    let mut parser = Parser::new(encoding);
    if parser.at_end() {
        return Err(parser.error(ParseErrorKind::Empty));
    }
    let mut slots = Vec::new();
    while !parser.at_end() {
        let ty = parser.parse_type()?;
        let declared_offset = parser.parse_number();
        slots.push(SignatureSlot {
            ty,
            declared_offset,
        });
    }
    Ok(slots)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            signature: self.src.to_string(),
            position: self.pos,
            kind,
        }
    }

    fn error_at(&self, position: usize, kind: ParseErrorKind) -> ParseError {
        ParseError {
            signature: self.src.to_string(),
            position,
            kind,
        }
    }

    /// The character starting at `pos`, for error messages on non-ASCII input.
    fn char_at(&self, pos: usize) -> char {
        self.src
            .get(pos..)
            .and_then(|rest| rest.chars().next())
            .unwrap_or('\u{fffd}')
    }

    fn parse_number(&mut self) -> Option<usize> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.src.get(start..self.pos)?.parse().ok()
    }

    fn parse_type(&mut self) -> Result<TypeDescriptor, ParseError> {
        while matches!(
            self.peek(),
            Some(b'r' | b'n' | b'N' | b'o' | b'O' | b'R' | b'V')
        ) {
            self.pos += 1;
        }

        let start = self.pos;
        let Some(code) = self.bump() else {
            return Err(self.error(ParseErrorKind::UnexpectedEnd));
        };

        let int = |width: u8, signed: bool| TypeDescriptor::Integer { width, signed };
        let ty = match code {
            b'v' => TypeDescriptor::Void,
            b'B' => TypeDescriptor::Bool,
            b'c' => int(1, true),
            b'C' => int(1, false),
            b's' => int(2, true),
            b'S' => int(2, false),
            b'i' => int(4, true),
            b'I' => int(4, false),
            b'l' | b'q' => int(8, true),
            b'L' | b'Q' => int(8, false),
            b'f' => TypeDescriptor::Float,
            b'd' => TypeDescriptor::Double,
            b'*' => TypeDescriptor::CString,
            b'#' => TypeDescriptor::Class,
            b':' => TypeDescriptor::Selector,
            b'?' => TypeDescriptor::Unknown,
            b'@' => self.parse_object()?,
            b'^' => TypeDescriptor::Pointer(Box::new(self.parse_type()?)),
            b'[' => self.parse_array()?,
            b'{' => self.parse_composite(CompositeKind::Struct)?,
            b'(' => self.parse_composite(CompositeKind::Union)?,
            b'b' => match self.parse_number() {
                Some(bits) => TypeDescriptor::Bitfield(
                    u32::try_from(bits)
                        .map_err(|_| self.error(ParseErrorKind::UnknownType('b')))?,
                ),
                None if self.at_end() => {
                    return Err(self.error(ParseErrorKind::UnexpectedEnd));
                }
                None => {
                    return Err(self.error(ParseErrorKind::UnknownType(
                        self.char_at(self.pos),
                    )));
                }
            },
            b'}' | b')' | b']' => {
                return Err(self.error_at(
                    start,
                    ParseErrorKind::MismatchedNesting {
                        expected: None,
                        found: char::from(code),
                    },
                ));
            }
            _ => {
                return Err(self.error_at(
                    start,
                    ParseErrorKind::UnknownType(self.char_at(start)),
                ));
            }
        };
        Ok(ty)
    }

    fn parse_object(&mut self) -> Result<TypeDescriptor, ParseError> {
        match self.peek() {
            Some(b'?') => {
                self.pos += 1;
                Ok(TypeDescriptor::Block)
            }
            Some(b'"') => {
                let name = self.parse_quoted()?;
                Ok(TypeDescriptor::Object {
                    class_hint: Some(name),
                })
            }
            _ => Ok(TypeDescriptor::Object { class_hint: None }),
        }
    }

    fn parse_quoted(&mut self) -> Result<String, ParseError> {
        // Opening quote.
        self.pos += 1;
        let start = self.pos;
        while let Some(byte) = self.bump() {
            if byte == b'"' {
                return Ok(self.src[start..self.pos - 1].to_string());
            }
        }
        Err(self.error(ParseErrorKind::UnexpectedEnd))
    }

    fn parse_array(&mut self) -> Result<TypeDescriptor, ParseError> {
        let start = self.pos;
        let Some(len) = self.parse_number() else {
            // No digits, or a count that does not fit in usize.
            self.pos = start;
            return Err(match self.peek() {
                None => self.error(ParseErrorKind::UnexpectedEnd),
                Some(_) => self.error(ParseErrorKind::UnknownType(self.char_at(self.pos))),
            });
        };
        let element = self.parse_type()?;
        self.expect_close(b']')?;
        Ok(TypeDescriptor::Array {
            len,
            element: Box::new(element),
        })
    }

    fn expect_close(&mut self, close: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(byte) if byte == close => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.error(ParseErrorKind::MismatchedNesting {
                expected: Some(char::from(close)),
                found: self.char_at(self.pos),
            })),
            None => Err(self.error(ParseErrorKind::UnexpectedEnd)),
        }
    }

    fn parse_composite(
        &mut self,
        kind: CompositeKind,
    ) -> Result<TypeDescriptor, ParseError> {
        let close = match kind {
            CompositeKind::Struct => b'}',
            CompositeKind::Union => b')',
        };

        let name_start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(b'=') => break,
                Some(byte) if byte == close => break,
                Some(b'{' | b'(' | b'[' | b'}' | b')' | b']') => {
                    return Err(self.error(ParseErrorKind::MismatchedNesting {
                        expected: Some(char::from(close)),
                        found: self.char_at(self.pos),
                    }));
                }
                Some(_) => self.pos += 1,
            }
        }
        let name = match &self.src[name_start..self.pos] {
            "" | "?" => None,
            name => Some(name.to_string()),
        };

        let mut fields = Vec::new();
        if self.peek() == Some(b'=') {
            self.pos += 1;
            loop {
                match self.peek() {
                    None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                    Some(byte) if byte == close => break,
                    Some(b'}' | b')' | b']') => {
                        return Err(self.error(
                            ParseErrorKind::MismatchedNesting {
                                expected: Some(char::from(close)),
                                found: self.char_at(self.pos),
                            },
                        ));
                    }
                    Some(b'"') => {
                        // Field name, as in `{Point="x"d"y"d}`.
                        self.parse_quoted()?;
                        fields.push(self.parse_type()?);
                    }
                    Some(_) => fields.push(self.parse_type()?),
                }
            }
        }
        self.pos += 1;

        let layout = if fields.is_empty() {
            None
        } else {
            compute_layout(kind, &fields)
        };
        Ok(TypeDescriptor::Composite(Composite {
            kind,
            name,
            fields,
            layout,
        }))
    }
}

/// Computes C layout for a composite. Returns `None` when a field has no
/// layout or the size overflows.
fn compute_layout(kind: CompositeKind, fields: &[TypeDescriptor]) -> Option<Layout> {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut size = 0usize;
    let mut align = 1usize;
    for field in fields {
        let (field_size, field_align) = field.size_align()?;
        align = align.max(field_align);
        match kind {
            CompositeKind::Struct => {
                let offset = size.checked_next_multiple_of(field_align)?;
                offsets.push(offset);
                size = offset.checked_add(field_size)?;
            }
            CompositeKind::Union => {
                offsets.push(0);
                size = size.max(field_size);
            }
        }
    }
    Some(Layout {
        size: object_size(size.checked_next_multiple_of(align)?)?,
        align,
        offsets,
    })
}

/// `size` if an object of that many bytes can exist (at most `isize::MAX`).
pub(crate) fn object_size(size: usize) -> Option<usize> {
    isize::try_from(size).ok().map(|_| size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(width: u8, signed: bool) -> TypeDescriptor {
        TypeDescriptor::Integer { width, signed }
    }

    #[test]
    fn test_parse_simple_signatures() {
        let sig = Signature::parse("v@:").unwrap();
        assert!(sig.return_type().is_void());
        assert_eq!(sig.explicit_arg_count(), 0);

        let sig = Signature::parse("i@:if").unwrap();
        assert_eq!(sig.return_type(), &int(4, true));
        let args: Vec<_> = sig.arg_types().cloned().collect();
        assert_eq!(
            args,
            vec![
                TypeDescriptor::Object { class_hint: None },
                TypeDescriptor::Selector,
                int(4, true),
                TypeDescriptor::Float,
            ]
        );

        let sig = Signature::parse("@#:Q").unwrap();
        assert_eq!(sig.args()[0].ty, TypeDescriptor::Class);
    }

    #[test]
    fn test_parse_offsets() {
        let sig = Signature::parse("v16@0:4@8@12").unwrap();
        assert_eq!(sig.return_slot().declared_offset, Some(16));
        let offsets: Vec<_> =
            sig.args().iter().map(|slot| slot.declared_offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(4), Some(8), Some(12)]);
        assert_eq!(sig.explicit_arg_count(), 2);
    }

    #[test]
    fn test_parse_nested_structs() {
        let rect = parse_type("{Rect={Point=dd}{Size=dd}}").unwrap();
        let TypeDescriptor::Composite(composite) = &rect else {
            panic!("expected composite");
        };
        assert_eq!(composite.name.as_deref(), Some("Rect"));
        assert_eq!(composite.fields.len(), 2);
        let layout = composite.layout.as_ref().unwrap();
        assert_eq!(layout.size, 32);
        assert_eq!(layout.align, 8);
        assert_eq!(layout.offsets, vec![0, 16]);
    }

    #[test]
    fn test_struct_padding() {
        let ty = parse_type("{Mixed=cdi}").unwrap();
        let TypeDescriptor::Composite(composite) = &ty else {
            panic!("expected composite");
        };
        let layout = composite.layout.as_ref().unwrap();
        assert_eq!(layout.offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 24);
    }

    #[test]
    fn test_oversized_layouts_are_flagged() {
        // 2^61 - 1 quads fill all but 8 bytes of the address space.
        let ty = parse_type("{A=[2305843009213693951q]c}").unwrap();
        let TypeDescriptor::Composite(composite) = &ty else {
            panic!("expected composite");
        };
        assert!(composite.layout.is_none());
        assert_eq!(ty.size_align(), None);
        assert!(ty.unsupported_reason().is_some());

        let ty = parse_type("[2305843009213693951q]").unwrap();
        assert_eq!(ty.size_align(), None);
        assert!(ty.unsupported_reason().is_some());

        let sig = Signature::parse("v@:{A=[2305843009213693951q]c}").unwrap();
        assert!(sig.check_marshalable().is_err());

        let ty = parse_type("{Nested={A=[1152921504606846975q]}{B=[1152921504606846975q]}}").unwrap();
        assert!(ty.unsupported_reason().is_some());
    }

    #[test]
    fn test_parse_misc_types() {
        assert_eq!(
            parse_type("@\"NSString\"").unwrap(),
            TypeDescriptor::Object {
                class_hint: Some("NSString".to_string())
            }
        );
        assert_eq!(parse_type("@?").unwrap(), TypeDescriptor::Block);
        assert_eq!(
            parse_type("^*").unwrap(),
            TypeDescriptor::Pointer(Box::new(TypeDescriptor::CString))
        );
        assert_eq!(
            parse_type("[4i]").unwrap().size_align(),
            Some((16, 4))
        );
        assert_eq!(parse_type("rn^v").unwrap().size_align(), Some((8, 8)));
        assert_eq!(parse_type("{Point=\"x\"d\"y\"d}").unwrap().size_align(), Some((16, 8)));
        assert_eq!(parse_type("(Value=iq)").unwrap().size_align(), Some((8, 8)));
        assert_eq!(parse_type("^{Opaque}").unwrap().size_align(), Some((8, 8)));
    }

    #[test]
    fn test_unsupported_layouts_parse_but_are_flagged() {
        let sig = Signature::parse("v@:(Value=iq)").unwrap();
        assert!(sig.check_marshalable().is_err());

        let sig = Signature::parse("v@:{Flags=b1b7}").unwrap();
        assert!(sig.check_marshalable().is_err());

        let sig = Signature::parse("v@:v").unwrap();
        assert!(sig.check_marshalable().is_err());

        let sig = Signature::parse("{Size=dd}@:{Size=dd}d").unwrap();
        assert!(sig.check_marshalable().is_ok());
    }

    #[test]
    fn test_parse_errors() {
        let kind = |s: &str| Signature::parse(s).unwrap_err().kind;
        assert_eq!(kind(""), ParseErrorKind::Empty);
        assert_eq!(kind("v@:x"), ParseErrorKind::UnknownType('x'));
        assert_eq!(kind("v@:{Size=dd"), ParseErrorKind::UnexpectedEnd);
        assert_eq!(kind("v@:^"), ParseErrorKind::UnexpectedEnd);
        assert_eq!(
            kind("v@:{Size=dd)"),
            ParseErrorKind::MismatchedNesting {
                expected: Some('}'),
                found: ')'
            }
        );
        assert_eq!(
            kind("v@:i}"),
            ParseErrorKind::MismatchedNesting {
                expected: None,
                found: '}'
            }
        );
        assert_eq!(kind("v"), ParseErrorKind::MissingReceiver);
        assert_eq!(kind("vii"), ParseErrorKind::MissingReceiver);
        assert_eq!(kind("v@:@\"Name"), ParseErrorKind::UnexpectedEnd);
        assert_eq!(kind("v@:[4i"), ParseErrorKind::UnexpectedEnd);
        assert_eq!(kind("v@:[i]"), ParseErrorKind::UnknownType('i'));
        assert_eq!(kind("v@:["), ParseErrorKind::UnexpectedEnd);
        assert_eq!(
            kind("v@:[99999999999999999999999i]"),
            ParseErrorKind::UnknownType('9')
        );
        assert_eq!(kind("v@:é"), ParseErrorKind::UnknownType('é'));
    }

    #[test]
    fn test_error_position() {
        let err = Signature::parse("v@:ix").unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.to_string().contains("\"v@:ix\""));
    }

    #[test]
    fn test_trailing_input() {
        assert_eq!(
            parse_type("ii").unwrap_err().kind,
            ParseErrorKind::TrailingInput
        );
        assert_eq!(parse_type("i8").unwrap(), int(4, true));
    }

    #[test]
    fn test_parse_is_idempotent() {
        for encoding in [
            "v@:",
            "v16@0:4@8@12",
            "{Rect={Point=dd}{Size=dd}}@:{Rect={Point=dd}{Size=dd}}d",
            "@@:@@i",
            "c@:@@i",
            "^v@:^*[8C]",
            "v@:(U=iq){F=b1b3}",
        ] {
            let first = Signature::parse(encoding).unwrap();
            let second = Signature::parse(encoding).unwrap();
            assert_eq!(first, second, "{encoding}");
        }
    }

    #[test]
    fn test_display_round_trips_structure() {
        for encoding in ["{Rect={Point=dd}{Size=dd}}", "^[4{?=iC}]", "@\"Array\""] {
            let ty = parse_type(encoding).unwrap();
            assert_eq!(parse_type(&ty.to_string()).unwrap(), ty);
        }
    }

    #[test]
    fn test_type_list() {
        let types = parse_type_list("{Size=dd}{Size=dd}f").unwrap();
        assert_eq!(types.len(), 3);
        assert!(parse_type_list("").is_err());
    }
}
