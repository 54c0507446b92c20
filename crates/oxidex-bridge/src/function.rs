//! Callable wrappers for native C-style functions.
//!
//! A [`NativeFunction`] pairs a function symbol with its type list (return
//! type first) and marshals arguments the same way message sends do,
//! without a receiver or selector slot.

use crate::bridge::Bridge;
use crate::encoding::{TypeDescriptor, parse_type_list};
use crate::error::{Error, Result};
use crate::marshal::{self, Keepalive};
use crate::native::{ArgFrame, NativeFn, NativeFault, ReturnFrame};
use crate::selector::Ownership;
use crate::value::Value;
use std::fmt;

/// A native function bound to its type encoding.
pub struct NativeFunction {
    bridge: Bridge,
    name: String,
    ret: TypeDescriptor,
    args: Vec<TypeDescriptor>,
    imp: NativeFn,
}

impl NativeFunction {
    /// Looks up `name` and binds it to its types.
    ///
    /// Explicit types take precedence over the encoding the runtime
    /// records for the symbol. With neither, the function cannot be
    /// called safely and is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFunction`] for missing symbols,
    /// [`Error::UnknownSignature`] when no types are known,
    /// [`Error::SignatureParse`] or [`Error::UnsupportedLayout`] for bad
    /// types.
    pub fn wrap(
        bridge: &Bridge,
        name: &str,
        return_type: Option<&str>,
        arg_types: Option<&str>,
    ) -> Result<Self> {
        let info = bridge
            .runtime()
            .function(name)
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
            })?;

        let recorded = info.types.as_deref().map(parse_type_list).transpose()?;
        let (recorded_ret, recorded_args) = match recorded {
            Some(mut types) if !types.is_empty() => {
                let ret = types.remove(0);
                (Some(ret), Some(types))
            }
            _ => (None, None),
        };
        let ret = match return_type {
            Some(encoding) => single_type(encoding)?,
            None => recorded_ret.ok_or_else(|| Error::UnknownSignature {
                selector: name.to_string(),
            })?,
        };
        let args = match arg_types {
            Some("") => Vec::new(),
            Some(encoding) => parse_type_list(encoding)?,
            None => recorded_args.ok_or_else(|| Error::UnknownSignature {
                selector: name.to_string(),
            })?,
        };

        let unsupported = |reason: String| Error::UnsupportedLayout {
            signature: format!("{name}: {}", encoding_of(&ret, &args)),
            reason,
        };
        if let Some(reason) = ret.unsupported_reason() {
            return Err(unsupported(format!("return type: {reason}")));
        }
        for (index, ty) in args.iter().enumerate() {
            if ty.is_void() {
                return Err(unsupported(format!("argument {index} is void")));
            }
            if let Some(reason) = ty.unsupported_reason() {
                return Err(unsupported(format!("argument {index}: {reason}")));
            }
        }

        log::debug!("wrapped native function {name} ({})", encoding_of(&ret, &args));
        Ok(Self {
            bridge: bridge.clone(),
            name: name.to_string(),
            ret,
            args,
            imp: info.imp,
        })
    }

    /// The symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The return type.
    #[must_use]
    pub fn return_type(&self) -> &TypeDescriptor {
        &self.ret
    }

    /// The argument types.
    #[must_use]
    pub fn arg_types(&self) -> &[TypeDescriptor] {
        &self.args
    }

    /// Calls the function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArgumentCountMismatch`] before any native call,
    /// marshalling errors, or [`Error::NativeCallFault`].
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if args.len() != self.args.len() {
            return Err(Error::ArgumentCountMismatch {
                selector: self.name.clone(),
                expected: self.args.len(),
                got: args.len(),
            });
        }
        let layout = || Error::UnsupportedLayout {
            signature: encoding_of(&self.ret, &self.args),
            reason: "no fixed layout".to_string(),
        };
        let mut frame = ArgFrame::new(&self.args).ok_or_else(layout)?;
        let mut ret = ReturnFrame::new(&self.ret).ok_or_else(layout)?;

        let ledger = self.bridge.ledger();
        let mut keep = Keepalive::default();
        for (index, (ty, value)) in self.args.iter().zip(args).enumerate() {
            let bytes = frame.slot_mut(index).ok_or_else(layout)?;
            marshal::encode(ledger, ty, value, bytes, &mut keep, index + 1)?;
        }

        self.bridge.count_outgoing();
        log::trace!("call native function {}", self.name);
        (self.imp)(&frame, &mut ret).map_err(|fault: NativeFault| Error::NativeCallFault {
            selector: self.name.clone(),
            fault,
        })?;

        let result = marshal::decode(ledger, &self.ret, ret.bytes(), Ownership::Borrowed);
        drop(keep);
        result
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("types", &encoding_of(&self.ret, &self.args))
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Shorthand for [`NativeFunction::wrap`] using the recorded types.
    ///
    /// # Errors
    ///
    /// As [`NativeFunction::wrap`].
    pub fn function(&self, name: &str) -> Result<NativeFunction> {
        NativeFunction::wrap(self, name, None, None)
    }
}

fn single_type(encoding: &str) -> Result<TypeDescriptor> {
    let mut types = parse_type_list(encoding)?;
    match types.len() {
        1 => Ok(types.remove(0)),
        count => Err(Error::UnsupportedLayout {
            signature: encoding.to_string(),
            reason: format!("expected one return type, found {count}"),
        }),
    }
}

fn encoding_of(ret: &TypeDescriptor, args: &[TypeDescriptor]) -> String {
    std::iter::once(ret)
        .chain(args)
        .map(ToString::to_string)
        .collect()
}
