//! Error types for the bridge.
//!
//! Errors fall into two groups. Declaration-time errors (signature parsing,
//! unsupported layouts, duplicate bindings, unknown classes) are raised when a
//! class or method is declared so that mistakes surface at startup.
//! Call-time errors (unknown signature, argument count, native faults) are
//! returned to the immediate caller; the bridge never retries a native call.

use crate::encoding::ParseError;
use crate::native::{NativeFault, ObjectId};
use thiserror::Error;

/// Errors produced by the bridge.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A type encoding string could not be parsed.
    #[error(transparent)]
    SignatureParse(#[from] ParseError),

    /// The signature parsed but uses a layout the marshaller cannot handle
    /// (unions, bitfields, opaque structs, void arguments).
    #[error("unsupported layout in \"{signature}\": {reason}")]
    UnsupportedLayout {
        /// The offending signature.
        signature: String,
        /// Why the layout was rejected.
        reason: String,
    },

    /// No signature was supplied and none could be found or derived.
    #[error("unknown signature for selector '{selector}'")]
    UnknownSignature {
        /// The selector that was sent.
        selector: String,
    },

    /// The number of script arguments does not match the signature.
    #[error(
        "argument count mismatch for '{selector}': expected {expected}, got {got}"
    )]
    ArgumentCountMismatch {
        /// The selector that was sent.
        selector: String,
        /// Number of explicit arguments in the signature.
        expected: usize,
        /// Number of arguments supplied.
        got: usize,
    },

    /// The native call failed or raised.
    #[error("native call '{selector}' failed: {fault}")]
    NativeCallFault {
        /// The selector (or function name) that was called.
        selector: String,
        /// What the native side reported.
        fault: NativeFault,
    },

    /// A class name does not exist in the native registry.
    #[error("can't find a native class named '{name}'")]
    UnresolvedClass {
        /// The class name that was looked up.
        name: String,
    },

    /// A handle was released more times than it was retained.
    #[error("over-release of native object {object}")]
    OverRelease {
        /// The object that was over-released.
        object: ObjectId,
    },

    /// A binding for this (class, selector) already exists.
    #[error("{kind} method '{selector}' is already bound on '{class}'")]
    DuplicateBinding {
        /// Class name.
        class: String,
        /// `instance` or `class`.
        kind: &'static str,
        /// The selector.
        selector: String,
    },

    /// A class with this name already exists in the native registry.
    #[error("class '{name}' already exists")]
    ClassAlreadyExists {
        /// The class name.
        name: String,
    },

    /// A script value cannot be marshalled into the requested native type.
    #[error("argument {index}: expected {expected}, got {got}")]
    TypeMismatch {
        /// Argument position, counted from 1; 0 is the return value.
        index: usize,
        /// Human-readable native type.
        expected: String,
        /// Script value kind.
        got: &'static str,
    },

    /// An integer does not fit the native width.
    #[error("argument {index}: value {value} does not fit in {expected}")]
    ValueOutOfRange {
        /// Argument position, counted from 1; 0 is the return value.
        index: usize,
        /// The script value.
        value: i128,
        /// Human-readable native type.
        expected: String,
    },

    /// A native function symbol was not found.
    #[error("unknown native function '{name}'")]
    UnknownFunction {
        /// The function name.
        name: String,
    },

    /// A script-level method name does not resolve on the receiver's class.
    #[error("undefined method '{name}' for {class}{hint}")]
    NoSuchMethod {
        /// Class name.
        class: String,
        /// Script-level method name.
        name: String,
        /// Optional hint (e.g. the alias of a reserved name).
        hint: String,
    },

    /// The receiver is not an object or class.
    #[error("cannot send '{selector}' to {got}")]
    InvalidReceiver {
        /// The selector.
        selector: String,
        /// Script value kind.
        got: &'static str,
    },

    /// An invalid selector name.
    #[error("invalid selector name '{name}'")]
    InvalidSelector {
        /// The rejected name.
        name: String,
    },

    /// The bridge that owned a trampoline has been dropped.
    #[error("bridge is no longer alive")]
    BridgeGone,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true for errors raised by the native side of a call.
    #[must_use]
    pub fn is_native_fault(&self) -> bool {
        matches!(self, Error::NativeCallFault { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ArgumentCountMismatch {
            selector: "add:to:".to_string(),
            expected: 2,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "argument count mismatch for 'add:to:': expected 2, got 3"
        );

        let err = Error::UnresolvedClass {
            name: "NoSuchClass".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "can't find a native class named 'NoSuchClass'"
        );
    }

    #[test]
    fn test_native_fault_is_distinguishable() {
        let err = Error::NativeCallFault {
            selector: "objectAtIndex:".to_string(),
            fault: NativeFault::Exception {
                name: "RangeException".to_string(),
                reason: "index 4 beyond bounds".to_string(),
            },
        };
        assert!(err.is_native_fault());
        assert!(
            !Error::UnknownSignature {
                selector: "foo".to_string()
            }
            .is_native_fault()
        );
    }
}
