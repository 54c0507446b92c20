//! Interface to the native object runtime.
//!
//! The bridge drives the native side only through the [`NativeRuntime`]
//! trait: class and method enumeration, message sends over raw argument
//! frames, reference counting, and class/method registration. Identities
//! crossing the boundary are plain integers ([`ObjectId`], [`ClassId`]).
//!
//! [`SimRuntime`] is an in-process implementation with a small
//! Foundation-like class set, used to embed and test the bridge without a
//! vendor runtime.

pub mod frame;
mod foundation;
mod sim;

pub use frame::{ArgFrame, ReturnFrame};
pub use sim::{ChangeNotification, ChangePhase, SimRuntime};

use crate::error::Error;
use crate::selector::Selector;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Identity of a native object. `ObjectId::NIL` is the nil object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The nil object.
    pub const NIL: ObjectId = ObjectId(0);

    /// Returns true for nil.
    #[must_use]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Identity of a native class. Zero is never a valid class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Instance or class (metaclass) method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// `-method`
    Instance,
    /// `+method`
    Class,
}

impl MethodKind {
    /// `"instance"` or `"class"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Instance => "instance",
            MethodKind::Class => "class",
        }
    }
}

/// The receiver of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Receiver {
    /// An instance; dispatch uses the instance method table.
    Object(ObjectId),
    /// A class; dispatch uses the class method table.
    Class(ClassId),
}

/// Where a message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// The receiver.
    pub receiver: Receiver,
    /// Class to start method lookup at, for `super` sends. `None` starts at
    /// the receiver's own class.
    pub start: Option<ClassId>,
}

impl Target {
    /// A message to an instance.
    #[must_use]
    pub fn instance(object: ObjectId) -> Self {
        Self {
            receiver: Receiver::Object(object),
            start: None,
        }
    }

    /// A message to a class.
    #[must_use]
    pub fn class(class: ClassId) -> Self {
        Self {
            receiver: Receiver::Class(class),
            start: None,
        }
    }

    /// A `super` send: `receiver` with lookup starting at `start`.
    #[must_use]
    pub fn super_of(receiver: Receiver, start: ClassId) -> Self {
        Self {
            receiver,
            start: Some(start),
        }
    }

    /// The method table that handles this target.
    #[must_use]
    pub fn kind(&self) -> MethodKind {
        match self.receiver {
            Receiver::Object(_) => MethodKind::Instance,
            Receiver::Class(_) => MethodKind::Class,
        }
    }
}

/// A message being delivered to a method implementation.
pub struct Message<'a> {
    /// Receiver and lookup start.
    pub target: Target,
    /// The selector that was sent.
    pub selector: &'a Selector,
    /// The argument frame, receiver and selector slots included.
    pub args: &'a ArgFrame,
    /// The return slot.
    pub ret: &'a mut ReturnFrame,
}

impl Message<'_> {
    /// The receiving object.
    ///
    /// # Errors
    ///
    /// Returns a fault when the message was sent to a class.
    pub fn receiver_object(&self) -> Result<ObjectId, NativeFault> {
        match self.target.receiver {
            Receiver::Object(object) => Ok(object),
            Receiver::Class(_) => Err(NativeFault::exception(
                "InvalidReceiverException",
                format!("'{}' needs an instance receiver", self.selector),
            )),
        }
    }
}

/// A method implementation registered with native dispatch.
pub type Imp = Rc<dyn Fn(&mut Message<'_>) -> Result<(), NativeFault>>;

/// A native function: arguments in, return slot out.
pub type NativeFn = Rc<dyn Fn(&ArgFrame, &mut ReturnFrame) -> Result<(), NativeFault>>;

/// Observer called after a native object has been deallocated.
pub type DeallocObserver = Rc<dyn Fn(ObjectId)>;

/// A boxed native number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Boolean.
    Bool(bool),
}

/// A failure reported by the native side of a call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeFault {
    /// The native code raised an exception.
    #[error("{name}: {reason}")]
    Exception {
        /// Exception name.
        name: String,
        /// Exception reason.
        reason: String,
    },

    /// No implementation for the selector.
    #[error("unrecognized selector '{selector}' sent to {class}")]
    UnrecognizedSelector {
        /// Receiver class name.
        class: String,
        /// The selector.
        selector: String,
    },

    /// The receiver was already deallocated.
    #[error("message sent to deallocated object {id}")]
    DeadObject {
        /// The dead object.
        id: ObjectId,
    },

    /// A script method called through a trampoline failed.
    #[error("script method failed: {error}")]
    Script {
        /// The script-side error.
        error: Box<Error>,
    },
}

impl NativeFault {
    /// Shorthand for [`NativeFault::Exception`].
    pub fn exception(name: &str, reason: impl Into<String>) -> Self {
        NativeFault::Exception {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A method as the native runtime lists it.
#[derive(Debug, Clone)]
pub struct NativeMethodInfo {
    /// The selector.
    pub selector: Selector,
    /// The type encoding, as registered.
    pub types: Rc<str>,
}

/// A native function symbol.
#[derive(Clone)]
pub struct NativeFunctionInfo {
    /// The function's type encoding (return type first), when known.
    pub types: Option<Rc<str>>,
    /// The function itself.
    pub imp: NativeFn,
}

/// The operations the bridge needs from a native object runtime.
///
/// All methods take `&self`: implementations use interior mutability and
/// must not hold internal borrows while calling an [`Imp`], a [`NativeFn`]
/// or the dealloc observer, since those may re-enter the runtime.
pub trait NativeRuntime {
    /// Every registered class, in registration order.
    fn classes(&self) -> Vec<ClassId>;

    /// Looks up a class by name.
    fn class_named(&self, name: &str) -> Option<ClassId>;

    /// The class name.
    fn class_name(&self, class: ClassId) -> Option<Rc<str>>;

    /// The superclass, `None` for roots.
    fn superclass(&self, class: ClassId) -> Option<ClassId>;

    /// Methods defined directly on `class` (inherited ones excluded).
    fn methods(&self, class: ClassId, kind: MethodKind) -> Vec<NativeMethodInfo>;

    /// The class of a live object.
    fn class_of(&self, object: ObjectId) -> Option<ClassId>;

    /// True if dispatch would find an implementation.
    fn responds_to(&self, receiver: Receiver, selector: &Selector) -> bool;

    /// Sends a message.
    ///
    /// # Errors
    ///
    /// Returns the fault raised by the implementation or by dispatch.
    fn send(
        &self,
        target: Target,
        selector: &Selector,
        args: &ArgFrame,
        ret: &mut ReturnFrame,
    ) -> Result<(), NativeFault>;

    /// Increments the reference count.
    ///
    /// # Errors
    ///
    /// Fails for dead objects.
    fn retain(&self, object: ObjectId) -> Result<(), NativeFault>;

    /// Decrements the reference count, deallocating at zero.
    ///
    /// # Errors
    ///
    /// Fails for dead objects.
    fn release(&self, object: ObjectId) -> Result<(), NativeFault>;

    /// Schedules a release for the next [`NativeRuntime::drain_pool`].
    ///
    /// # Errors
    ///
    /// Fails for dead objects.
    fn autorelease(&self, object: ObjectId) -> Result<(), NativeFault>;

    /// Performs every pending autorelease.
    fn drain_pool(&self);

    /// Current reference count, `None` for dead objects.
    fn retain_count(&self, object: ObjectId) -> Option<usize>;

    /// Registers a new class under `parent`.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken or the parent is unknown.
    fn allocate_class(&self, name: &str, parent: ClassId) -> Result<ClassId, NativeFault>;

    /// Adds a method directly to `class`. Returns false, leaving the table
    /// unchanged, when `class` already defines the selector itself.
    fn add_method(
        &self,
        class: ClassId,
        kind: MethodKind,
        selector: &Selector,
        types: &str,
        imp: Imp,
    ) -> bool;

    /// Adds or replaces a method on `class`. Returns true if one was replaced.
    fn replace_method(
        &self,
        class: ClassId,
        kind: MethodKind,
        selector: &Selector,
        types: &str,
        imp: Imp,
    ) -> bool;

    /// Creates a string object, returned +1.
    ///
    /// # Errors
    ///
    /// Fails when the value cannot be represented.
    fn new_string(&self, value: &str) -> Result<ObjectId, NativeFault>;

    /// Reads a string object.
    fn string_value(&self, object: ObjectId) -> Option<String>;

    /// Creates a number object, returned +1.
    ///
    /// # Errors
    ///
    /// Fails when the runtime cannot box numbers.
    fn new_number(&self, value: Number) -> Result<ObjectId, NativeFault>;

    /// Reads a number object.
    fn number_value(&self, object: ObjectId) -> Option<Number>;

    /// Looks up a native function symbol.
    fn function(&self, name: &str) -> Option<NativeFunctionInfo>;

    /// Installs the observer called after each deallocation.
    fn set_dealloc_observer(&self, observer: Option<DeallocObserver>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind() {
        assert_eq!(Target::instance(ObjectId(3)).kind(), MethodKind::Instance);
        assert_eq!(Target::class(ClassId(1)).kind(), MethodKind::Class);
        let sup = Target::super_of(Receiver::Object(ObjectId(3)), ClassId(1));
        assert_eq!(sup.start, Some(ClassId(1)));
        assert_eq!(sup.kind(), MethodKind::Instance);
    }

    #[test]
    fn test_object_id_display() {
        assert_eq!(ObjectId(255).to_string(), "0xff");
        assert!(ObjectId::NIL.is_nil());
    }
}
