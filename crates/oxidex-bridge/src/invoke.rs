//! The dynamic invocation engine.
//!
//! A send resolves a signature, checks the arguments against it, lays out
//! an argument frame, marshals every value into its slot, hands the frame
//! to the native runtime and decodes the return slot. Nothing reaches the
//! native runtime until every check has passed.

use crate::bridge::{Bridge, receiver_of};
use crate::encoding::Signature;
use crate::error::{Error, Result};
use crate::marshal::{self, Keepalive};
use crate::native::{ArgFrame, ClassId, NativeFault, Receiver, ReturnFrame, Target};
use crate::selector::Selector;
use crate::value::Value;
use std::rc::Rc;

impl Bridge {
    /// Sends `selector` to `receiver` with a signature taken from the
    /// receiver's class or the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSignature`], [`Error::ArgumentCountMismatch`],
    /// marshalling errors, or [`Error::NativeCallFault`].
    pub fn send(&self, receiver: &Value, selector: &str, args: &[Value]) -> Result<Value> {
        let selector: Selector = selector.parse()?;
        self.send_selector(receiver, &selector, None, args)
    }

    /// Sends `selector` with an explicit signature.
    ///
    /// # Errors
    ///
    /// As [`Bridge::send`], plus [`Error::SignatureParse`] for a malformed
    /// signature.
    pub fn send_with_signature(
        &self,
        receiver: &Value,
        selector: &str,
        signature: &str,
        args: &[Value],
    ) -> Result<Value> {
        let selector: Selector = selector.parse()?;
        self.send_selector(receiver, &selector, Some(signature), args)
    }

    /// Sends `selector` to `receiver`, starting method lookup at the
    /// superclass of `class`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedClass`] for unknown classes and
    /// [`Error::NoSuchMethod`] when `class` is a root class.
    pub fn send_super(
        &self,
        receiver: &Value,
        class: &str,
        selector: &str,
        args: &[Value],
    ) -> Result<Value> {
        let selector: Selector = selector.parse()?;
        let descriptor = self.registry().resolve(class)?;
        let parent = descriptor.parent().ok_or_else(|| Error::NoSuchMethod {
            class: class.to_string(),
            name: selector.to_string(),
            hint: " (root class has no superclass)".to_string(),
        })?;
        let receiver = target_receiver(receiver, &selector)?;
        self.invoke(Target::super_of(receiver, parent.id()), &selector, None, args)
    }

    pub(crate) fn send_selector(
        &self,
        receiver: &Value,
        selector: &Selector,
        signature: Option<&str>,
        args: &[Value],
    ) -> Result<Value> {
        let receiver = target_receiver(receiver, selector)?;
        let target = Target {
            receiver,
            start: None,
        };
        self.invoke(target, selector, signature, args)
    }

    /// Sends a message to an explicit target.
    ///
    /// # Errors
    ///
    /// As [`Bridge::send_with_signature`].
    pub fn invoke(
        &self,
        target: Target,
        selector: &Selector,
        signature: Option<&str>,
        args: &[Value],
    ) -> Result<Value> {
        let signature = self.resolve_signature(target, selector, signature)?;
        signature
            .check_marshalable()
            .map_err(|reason| unsupported(&signature, reason))?;
        let expected = signature.explicit_arg_count();
        if args.len() != expected {
            return Err(Error::ArgumentCountMismatch {
                selector: selector.to_string(),
                expected,
                got: args.len(),
            });
        }

        let mut frame = ArgFrame::new(signature.arg_types())
            .ok_or_else(|| unsupported(&signature, "argument without a fixed layout".into()))?;
        let mut ret = ReturnFrame::new(signature.return_type())
            .ok_or_else(|| unsupported(&signature, "return without a fixed layout".into()))?;
        let fault = |fault: NativeFault| Error::NativeCallFault {
            selector: selector.to_string(),
            fault,
        };
        frame.set_word(0, receiver_word(target.receiver)).map_err(fault)?;
        frame.set_selector(1, selector).map_err(fault)?;

        let ledger = self.ledger();
        let mut keep = Keepalive::default();
        for (position, (slot, value)) in signature.args()[2..].iter().zip(args).enumerate() {
            let index = position + 2;
            let bytes = frame.slot_mut(index).ok_or_else(|| {
                unsupported(&signature, format!("argument {index} has no slot"))
            })?;
            marshal::encode(ledger, &slot.ty, value, bytes, &mut keep, position + 1)?;
        }

        self.count_outgoing();
        if self.config().track_calls {
            self.inner.calls.borrow_mut().record(selector, signature.as_str());
        }
        log::trace!("send {selector} ({signature}) to {:?}", target.receiver);
        self.runtime()
            .send(target, selector, &frame, &mut ret)
            .map_err(fault)?;

        let result = marshal::decode(ledger, signature.return_type(), ret.bytes(), selector.ownership());
        drop(keep);
        result
    }

    /// The signature for a send: explicit, then the receiver's class
    /// chain, then the registry's selector table.
    fn resolve_signature(
        &self,
        target: Target,
        selector: &Selector,
        explicit: Option<&str>,
    ) -> Result<Rc<Signature>> {
        if let Some(encoding) = explicit {
            return self.registry().signature(encoding);
        }
        if let Some(class) = self.lookup_class(target) {
            let descriptor = self.registry().descriptor_for_id(class)?;
            if let Some(method) = self
                .registry()
                .find_method(&descriptor, target.kind(), selector)?
            {
                return Ok(method.signature);
            }
        }
        self.registry()
            .lookup_signature(selector)
            .map(|lookup| lookup.signature)
            .ok_or_else(|| Error::UnknownSignature {
                selector: selector.to_string(),
            })
    }

    fn lookup_class(&self, target: Target) -> Option<ClassId> {
        target.start.or_else(|| match target.receiver {
            Receiver::Object(object) => self.runtime().class_of(object),
            Receiver::Class(class) => Some(class),
        })
    }
}

fn target_receiver(value: &Value, selector: &Selector) -> Result<Receiver> {
    receiver_of(value).ok_or_else(|| Error::InvalidReceiver {
        selector: selector.to_string(),
        got: value.type_name(),
    })
}

fn receiver_word(receiver: Receiver) -> u64 {
    match receiver {
        Receiver::Object(object) => object.0,
        Receiver::Class(class) => u64::from(class.0),
    }
}

fn unsupported(signature: &Signature, reason: String) -> Error {
    Error::UnsupportedLayout {
        signature: signature.as_str().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, SignaturePolicy};
    use crate::native::{NativeRuntime, SimRuntime};

    fn bridge() -> (Rc<SimRuntime>, Bridge) {
        let runtime = Rc::new(SimRuntime::new());
        let bridge = Bridge::new(runtime.clone());
        (runtime, bridge)
    }

    #[test]
    fn test_count_mismatch_makes_no_native_call() {
        let (runtime, bridge) = bridge();
        let dict = bridge.new_object("MutableDictionary").unwrap();
        let before = runtime.send_count();
        let err = bridge
            .send(&dict, "setObject:forKey:", &[Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap_err();
        assert_eq!(
            err,
            Error::ArgumentCountMismatch {
                selector: "setObject:forKey:".to_string(),
                expected: 2,
                got: 3
            }
        );
        assert_eq!(runtime.send_count(), before);
    }

    #[test]
    fn test_unknown_signature() {
        let (runtime, bridge) = bridge();
        let object = bridge.new_object("Object").unwrap();
        let before = runtime.send_count();
        assert_eq!(
            bridge.send(&object, "fooBar:", &[Value::Nil]).unwrap_err(),
            Error::UnknownSignature {
                selector: "fooBar:".to_string()
            }
        );
        assert_eq!(runtime.send_count(), before);
    }

    #[test]
    fn test_heuristic_reaches_native_dispatch() {
        let runtime = Rc::new(SimRuntime::new());
        let config = BridgeConfig::default().signature_policy(SignaturePolicy::Heuristic);
        let bridge = Bridge::with_config(runtime, config);
        let object = bridge.new_object("Object").unwrap();
        // The guessed signature is used; the runtime then reports the
        // missing method.
        let err = bridge.send(&object, "fooBar:", &[Value::Nil]).unwrap_err();
        assert!(err.is_native_fault());
    }

    #[test]
    fn test_native_fault_is_surfaced() {
        let (_runtime, bridge) = bridge();
        let array = bridge.new_object("Array").unwrap();
        let err = bridge.send(&array, "objectAtIndex:", &[Value::Int(5)]).unwrap_err();
        let Error::NativeCallFault { selector, fault } = err else {
            panic!("expected a native fault");
        };
        assert_eq!(selector, "objectAtIndex:");
        assert!(matches!(fault, NativeFault::Exception { ref name, .. } if name == "RangeException"));
    }

    #[test]
    fn test_unsupported_layout_is_rejected() {
        let (runtime, bridge) = bridge();
        let object = bridge.new_object("Object").unwrap();
        let before = runtime.send_count();
        let err = bridge
            .send_with_signature(&object, "frob:", "v@:(U=ic)", &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedLayout { .. }));
        assert_eq!(runtime.send_count(), before);
    }

    #[test]
    fn test_message_to_nil() {
        let (_runtime, bridge) = bridge();
        assert_eq!(bridge.send(&Value::Nil, "count", &[]).unwrap(), Value::Int(0));
        assert_eq!(bridge.send(&Value::Nil, "description", &[]).unwrap(), Value::Nil);
    }

    #[test]
    fn test_struct_by_value() {
        let (_runtime, bridge) = bridge();
        let geometry = bridge.class("Geometry").unwrap();
        let size = Value::Struct(vec![Value::Double(3.0), Value::Double(4.0)]);
        let area = bridge.send(&geometry, "areaOfSize:", &[size]).unwrap();
        assert_eq!(area, Value::Double(12.0));
    }

    #[test]
    fn test_owned_results_are_adopted() {
        let (runtime, bridge) = bridge();
        let array = bridge.new_object("MutableArray").unwrap();
        let copy = bridge.send(&array, "copy", &[]).unwrap();
        let id = copy.as_handle().unwrap().id();
        assert_eq!(runtime.retain_count(id), Some(1));
        drop(copy);
        assert_eq!(runtime.retain_count(id), None);
    }
}
