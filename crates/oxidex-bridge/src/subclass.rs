//! Native subclasses backed by script methods.
//!
//! Script code declares a class under a native parent, then binds script
//! callables to selectors. Every binding is registered twice: in the
//! wrapper's binding table (for calls by script name) and in the native
//! method table as a trampoline (for native dispatch). Both paths hold the
//! same `Rc` callable.
//!
//! A (class, kind, selector) pair is bound at most once.
//! [`Bridge::override_method`] is the only way to replace a binding.
//!
//! # Example
//!
//! ```
//! use oxidex_bridge::{Bridge, ClassDecl, Value};
//! use oxidex_bridge::native::SimRuntime;
//! use std::rc::Rc;
//!
//! let bridge = Bridge::new(Rc::new(SimRuntime::new()));
//! ClassDecl::new("Greeter", "Object")
//!     .method("greet:", Some("@@:@"), |bridge, _receiver, args| {
//!         let name = bridge.to_string_value(&args[0]).unwrap_or_default();
//!         Ok(Value::from(format!("hello, {name}")))
//!     })
//!     .declare(&bridge)
//!     .unwrap();
//!
//! let greeter = bridge.new_object("Greeter").unwrap();
//! let reply = bridge.send(&greeter, "greet:", &["bob".into()]).unwrap();
//! assert_eq!(bridge.to_string_value(&reply).as_deref(), Some("hello, bob"));
//! ```

use crate::bridge::{Bridge, BridgeInner};
use crate::encoding::Signature;
use crate::error::{Error, Result};
use crate::handle::NativeHandle;
use crate::marshal::{self, Keepalive};
use crate::native::{Imp, Message, MethodKind, NativeFault, Receiver};
use crate::registry::{ClassDescriptor, MethodDescriptor, SignatureLookup, SignatureSource};
use crate::selector::{Ownership, Selector};
use crate::value::Value;
use crate::wrapper::{ClassOrigin, WrapperClass};
use fxhash::FxHashSet;
use std::fmt;
use std::rc::{Rc, Weak};

/// A script method: bridge, receiver and arguments in, result out.
pub type ScriptFn = Rc<dyn Fn(&Bridge, &Value, &[Value]) -> Result<Value>>;

/// A script callable bound to a native selector.
pub struct TrampolineBinding {
    class: Rc<ClassDescriptor>,
    kind: MethodKind,
    selector: Selector,
    signature: Rc<Signature>,
    script_name: String,
    callable: ScriptFn,
}

impl TrampolineBinding {
    /// The class the binding is installed on.
    #[must_use]
    pub fn class(&self) -> &Rc<ClassDescriptor> {
        &self.class
    }

    /// Instance or class method.
    #[must_use]
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// The native selector.
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The resolved signature.
    #[must_use]
    pub fn signature(&self) -> &Rc<Signature> {
        &self.signature
    }

    /// The name script code calls the method by (the alias, for reserved
    /// names).
    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// The callable.
    #[must_use]
    pub fn callable(&self) -> &ScriptFn {
        &self.callable
    }

    /// Calls the script method directly.
    ///
    /// # Errors
    ///
    /// Returns whatever the script method returns.
    pub fn call(&self, bridge: &Bridge, receiver: &Value, args: &[Value]) -> Result<Value> {
        (self.callable)(bridge, receiver, args)
    }
}

impl fmt::Debug for TrampolineBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            MethodKind::Instance => '-',
            MethodKind::Class => '+',
        };
        write!(
            f,
            "{prefix}[{} {}] {} as '{}'",
            self.class.name(),
            self.selector,
            self.signature,
            self.script_name
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindMode {
    Define,
    Override,
}

impl Bridge {
    /// Creates a native class `name` under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassAlreadyExists`] when the name is taken and
    /// [`Error::UnresolvedClass`] for an unknown parent.
    pub fn declare_subclass(&self, name: &str, parent: &str) -> Result<Rc<WrapperClass>> {
        if self.runtime().class_named(name).is_some() {
            return Err(Error::ClassAlreadyExists {
                name: name.to_string(),
            });
        }
        let parent = self.import(parent)?;
        let id = self
            .runtime()
            .allocate_class(name, parent.descriptor().id())
            .map_err(|fault| match fault {
                NativeFault::Exception { name: ref kind, .. } if kind == "ClassExistsException" => {
                    Error::ClassAlreadyExists {
                        name: name.to_string(),
                    }
                }
                fault => Error::NativeCallFault {
                    selector: format!("<allocate class {name}>"),
                    fault,
                },
            })?;
        let descriptor = self.registry().descriptor_for_id(id)?;
        let wrapper = self.wrappers().wrap(&descriptor, ClassOrigin::Declared);
        log::debug!("declared class {name} < {}", parent.name());
        Ok(wrapper)
    }

    /// Binds a script method to `selector` on `class`.
    ///
    /// The signature is the explicit one if given, else the signature of
    /// the inherited native method, else the registry's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateBinding`] if the class already defines the
    /// selector, signature errors at declaration time, and
    /// [`Error::ArgumentCountMismatch`] when the selector and signature
    /// disagree on the argument count.
    pub fn define_method<F>(
        &self,
        class: &str,
        kind: MethodKind,
        selector: &str,
        signature: Option<&str>,
        callable: F,
    ) -> Result<Rc<TrampolineBinding>>
    where
        F: Fn(&Bridge, &Value, &[Value]) -> Result<Value> + 'static,
    {
        self.bind(class, kind, selector, signature, Rc::new(callable), BindMode::Define)
    }

    /// Replaces (or adds) the method for `selector` on `class`.
    ///
    /// # Errors
    ///
    /// As [`Bridge::define_method`], except that existing bindings are
    /// replaced.
    pub fn override_method<F>(
        &self,
        class: &str,
        kind: MethodKind,
        selector: &str,
        signature: Option<&str>,
        callable: F,
    ) -> Result<Rc<TrampolineBinding>>
    where
        F: Fn(&Bridge, &Value, &[Value]) -> Result<Value> + 'static,
    {
        self.bind(class, kind, selector, signature, Rc::new(callable), BindMode::Override)
    }

    /// Declares an object-valued property: getter `name` (`@@:`) and setter
    /// `setName:` (`v@:@`). The setter brackets the store with
    /// `willChangeValueForKey:` and `didChangeValueForKey:`.
    ///
    /// # Errors
    ///
    /// As [`Bridge::define_method`].
    pub fn declare_accessor(&self, class: &str, name: &str) -> Result<()> {
        let key = name.to_string();
        self.define_method(class, MethodKind::Instance, name, Some("@@:"), move |bridge, receiver, _args| {
            Ok(bridge.ivar(receiver, &key))
        })?;

        let key = name.to_string();
        self.define_method(
            class,
            MethodKind::Instance,
            &setter_name(name),
            Some("v@:@"),
            move |bridge, receiver, args| {
                let value = args.first().cloned().unwrap_or(Value::Nil);
                let key_value = [bridge.string(&key)?];
                bridge.send_with_signature(receiver, "willChangeValueForKey:", "v@:@", &key_value)?;
                bridge.set_ivar(receiver, &key, value)?;
                bridge.send_with_signature(receiver, "didChangeValueForKey:", "v@:@", &key_value)?;
                Ok(Value::Nil)
            },
        )?;
        Ok(())
    }

    fn bind(
        &self,
        class: &str,
        kind: MethodKind,
        selector: &str,
        signature: Option<&str>,
        callable: ScriptFn,
        mode: BindMode,
    ) -> Result<Rc<TrampolineBinding>> {
        let wrapper = self.import(class)?;
        let selector: Selector = selector.parse()?;
        if mode == BindMode::Define && wrapper.binding(kind, &selector).is_some() {
            return Err(duplicate(&wrapper, kind, &selector));
        }

        let signature = self.checked_signature(wrapper.descriptor(), kind, &selector, signature)?;

        let config = self.config();
        let script_name = selector.script_name();
        let alias = config
            .is_reserved(&script_name)
            .then(|| config.alias_for(&script_name));
        if let Some(alias) = &alias {
            log::debug!("{script_name} is reserved; binding {} as {alias}", selector);
        }
        let binding = Rc::new(TrampolineBinding {
            class: Rc::clone(wrapper.descriptor()),
            kind,
            selector: selector.clone(),
            signature: Rc::clone(&signature),
            script_name: alias.clone().unwrap_or_else(|| script_name.clone()),
            callable,
        });

        let imp = trampoline(self.downgrade(), Rc::clone(&binding));
        let class_id = wrapper.descriptor().id();
        match mode {
            BindMode::Define => {
                wrapper.bind(Rc::clone(&binding), &script_name, alias.as_deref())?;
                if !self
                    .runtime()
                    .add_method(class_id, kind, &selector, signature.as_str(), imp)
                {
                    wrapper.unbind(kind, &selector, &script_name, alias.as_deref());
                    return Err(duplicate(&wrapper, kind, &selector));
                }
            }
            BindMode::Override => {
                self.runtime()
                    .replace_method(class_id, kind, &selector, signature.as_str(), imp);
                wrapper.rebind(Rc::clone(&binding), &script_name, alias.as_deref());
            }
        }
        self.registry().append_method(
            wrapper.descriptor(),
            MethodDescriptor {
                selector,
                kind,
                signature,
            },
        );

        let level = if config.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        };
        log::log!(level, "bound {binding:?}");
        Ok(binding)
    }

    /// Resolves the signature a binding of `selector` on `class` would use
    /// and checks that it can be bridged. Nothing is installed.
    fn checked_signature(
        &self,
        class: &Rc<ClassDescriptor>,
        kind: MethodKind,
        selector: &Selector,
        explicit: Option<&str>,
    ) -> Result<Rc<Signature>> {
        let lookup = self.binding_signature(class, kind, selector, explicit)?;
        log::trace!("{selector}: {:?} signature {}", lookup.source, lookup.signature);
        let signature = lookup.signature;
        signature
            .check_marshalable()
            .map_err(|reason| Error::UnsupportedLayout {
                signature: signature.as_str().to_string(),
                reason,
            })?;
        if selector.arg_count() != signature.explicit_arg_count() {
            return Err(Error::ArgumentCountMismatch {
                selector: selector.to_string(),
                expected: selector.arg_count(),
                got: signature.explicit_arg_count(),
            });
        }
        Ok(signature)
    }

    fn binding_signature(
        &self,
        class: &Rc<ClassDescriptor>,
        kind: MethodKind,
        selector: &Selector,
        explicit: Option<&str>,
    ) -> Result<SignatureLookup> {
        if let Some(encoding) = explicit {
            return Ok(SignatureLookup {
                signature: self.registry().signature(encoding)?,
                source: SignatureSource::Explicit,
            });
        }
        if let Some(inherited) = self.registry().find_method(class, kind, selector)? {
            return Ok(SignatureLookup {
                signature: inherited.signature,
                source: SignatureSource::Runtime,
            });
        }
        self.registry()
            .lookup_signature(selector)
            .ok_or_else(|| Error::UnknownSignature {
                selector: selector.to_string(),
            })
    }
}

fn duplicate(wrapper: &WrapperClass, kind: MethodKind, selector: &Selector) -> Error {
    Error::DuplicateBinding {
        class: wrapper.name().to_string(),
        kind: kind.as_str(),
        selector: selector.to_string(),
    }
}

/// `value` becomes `setValue:`.
fn setter_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("set{}{}:", first.to_ascii_uppercase(), chars.as_str()),
        None => "set:".to_string(),
    }
}

fn script_fault(error: Error) -> NativeFault {
    NativeFault::Script {
        error: Box::new(error),
    }
}

fn trampoline(bridge: Weak<BridgeInner>, binding: Rc<TrampolineBinding>) -> Imp {
    Rc::new(move |message: &mut Message<'_>| -> std::result::Result<(), NativeFault> {
        let inner = bridge.upgrade().ok_or_else(|| script_fault(Error::BridgeGone))?;
        let bridge = Bridge::from_inner(inner);
        deliver(&bridge, &binding, message).map_err(script_fault)
    })
}

/// Runs a bound script method for a native message.
fn deliver(bridge: &Bridge, binding: &TrampolineBinding, message: &mut Message<'_>) -> Result<()> {
    bridge.count_incoming();
    let ledger = bridge.ledger();
    let receiver = match message.target.receiver {
        Receiver::Object(object) => {
            Value::Object(NativeHandle::wrap(ledger, object, Ownership::Borrowed)?)
        }
        Receiver::Class(class) => Value::Class(class),
    };

    let got = message.args.len().saturating_sub(2);
    let expected = binding.signature.explicit_arg_count();
    if got != expected {
        return Err(Error::ArgumentCountMismatch {
            selector: binding.selector.to_string(),
            expected,
            got,
        });
    }
    let mut args = Vec::with_capacity(got);
    for index in 2..message.args.len() {
        let missing = || Error::UnsupportedLayout {
            signature: binding.signature.as_str().to_string(),
            reason: format!("incoming frame has no slot {index}"),
        };
        let ty = message.args.ty(index).ok_or_else(missing)?;
        let bytes = message.args.slot(index).ok_or_else(missing)?;
        args.push(marshal::decode(ledger, ty, bytes, Ownership::Borrowed)?);
    }

    let result = binding.call(bridge, &receiver, &args)?;

    let ty = message.ret.ty().clone();
    if ty.is_void() {
        return Ok(());
    }
    let mut keep = Keepalive::default();
    marshal::encode(ledger, &ty, &result, message.ret.bytes_mut(), &mut keep, 0)?;
    if let Some(object) = message.ret.object().filter(|object| !object.is_nil()) {
        // The result outlives the script values: +1 for owning families,
        // autoreleased otherwise.
        let runtime = bridge.runtime();
        let fault = |fault| Error::NativeCallFault {
            selector: binding.selector.to_string(),
            fault,
        };
        runtime.retain(object).map_err(fault)?;
        if binding.selector.ownership() == Ownership::Borrowed {
            runtime.autorelease(object).map_err(fault)?;
        }
    }
    bridge.inner.c_strings.borrow_mut().extend(keep.take_strings());
    Ok(())
}

// ============================================================================
// Declaration builder
// ============================================================================

struct MethodDecl {
    kind: MethodKind,
    selector: String,
    signature: Option<String>,
    callable: ScriptFn,
}

/// Declares a class and all of its bridged methods in one step.
///
/// Every method is validated against the parent class before the native
/// class is created, so a declaration that fails leaves no class behind.
pub struct ClassDecl {
    name: String,
    parent: String,
    methods: Vec<MethodDecl>,
    accessors: Vec<String>,
}

impl ClassDecl {
    /// Starts a declaration of `name` under `parent`.
    #[must_use]
    pub fn new(name: &str, parent: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.to_string(),
            methods: Vec::new(),
            accessors: Vec::new(),
        }
    }

    /// Adds an instance method.
    #[must_use]
    pub fn method<F>(self, selector: &str, signature: Option<&str>, callable: F) -> Self
    where
        F: Fn(&Bridge, &Value, &[Value]) -> Result<Value> + 'static,
    {
        self.with_method(MethodKind::Instance, selector, signature, Rc::new(callable))
    }

    /// Adds a class method.
    #[must_use]
    pub fn class_method<F>(self, selector: &str, signature: Option<&str>, callable: F) -> Self
    where
        F: Fn(&Bridge, &Value, &[Value]) -> Result<Value> + 'static,
    {
        self.with_method(MethodKind::Class, selector, signature, Rc::new(callable))
    }

    /// Adds an accessor pair.
    #[must_use]
    pub fn accessor(mut self, name: &str) -> Self {
        self.accessors.push(name.to_string());
        self
    }

    fn with_method(mut self, kind: MethodKind, selector: &str, signature: Option<&str>, callable: ScriptFn) -> Self {
        self.methods.push(MethodDecl {
            kind,
            selector: selector.to_string(),
            signature: signature.map(str::to_string),
            callable,
        });
        self
    }

    /// Creates the class and binds every method.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error. Signature, layout, arity and
    /// duplicate-selector errors are reported before the class exists.
    pub fn declare(self, bridge: &Bridge) -> Result<Rc<WrapperClass>> {
        self.validate(bridge)?;
        let wrapper = bridge.declare_subclass(&self.name, &self.parent)?;
        for method in self.methods {
            bridge.bind(
                &self.name,
                method.kind,
                &method.selector,
                method.signature.as_deref(),
                method.callable,
                BindMode::Define,
            )?;
        }
        for accessor in &self.accessors {
            bridge.declare_accessor(&self.name, accessor)?;
        }
        Ok(wrapper)
    }

    fn validate(&self, bridge: &Bridge) -> Result<()> {
        if bridge.runtime().class_named(&self.name).is_some() {
            return Err(Error::ClassAlreadyExists {
                name: self.name.clone(),
            });
        }
        let parent = bridge.import(&self.parent)?;
        let mut seen = FxHashSet::default();
        let mut claim = |kind: MethodKind, selector: Selector| -> Result<()> {
            if seen.insert((kind, selector.clone())) {
                Ok(())
            } else {
                Err(Error::DuplicateBinding {
                    class: self.name.clone(),
                    kind: kind.as_str(),
                    selector: selector.to_string(),
                })
            }
        };
        for method in &self.methods {
            let selector: Selector = method.selector.parse()?;
            bridge.checked_signature(parent.descriptor(), method.kind, &selector, method.signature.as_deref())?;
            claim(method.kind, selector)?;
        }
        for accessor in &self.accessors {
            claim(MethodKind::Instance, accessor.parse()?)?;
            claim(MethodKind::Instance, setter_name(accessor).parse()?)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ClassDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDecl")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("methods", &self.methods.len())
            .field("accessors", &self.accessors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeRuntime, SimRuntime, ChangePhase};
    use crate::wrapper::ClassState;
    use std::cell::RefCell;

    fn bridge() -> (Rc<SimRuntime>, Bridge) {
        let runtime = Rc::new(SimRuntime::new());
        let bridge = Bridge::new(runtime.clone());
        (runtime, bridge)
    }

    #[test]
    fn test_setter_name() {
        assert_eq!(setter_name("value"), "setValue:");
        assert_eq!(setter_name("x"), "setX:");
    }

    #[test]
    fn test_declare_subclass_state_machine() {
        let (_runtime, bridge) = bridge();
        assert_eq!(bridge.class_state("Widget"), ClassState::Unregistered);
        let widget = bridge.declare_subclass("Widget", "Object").unwrap();
        assert_eq!(widget.state(), ClassState::NativeSubclassCreated);
        assert_eq!(widget.parent().unwrap().name(), "Object");

        bridge
            .define_method("Widget", MethodKind::Instance, "size", Some("q@:"), |_, _, _| Ok(Value::Int(3)))
            .unwrap();
        assert_eq!(widget.state(), ClassState::MethodsBound(1));
        assert_eq!(bridge.class_state("Widget"), ClassState::MethodsBound(1));

        assert_eq!(
            bridge.declare_subclass("Widget", "Object").unwrap_err(),
            Error::ClassAlreadyExists {
                name: "Widget".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_binding_and_override() {
        let (_runtime, bridge) = bridge();
        bridge.declare_subclass("Thing", "Object").unwrap();
        bridge
            .define_method("Thing", MethodKind::Instance, "answer", Some("q@:"), |_, _, _| Ok(Value::Int(1)))
            .unwrap();
        let err = bridge
            .define_method("Thing", MethodKind::Instance, "answer", Some("q@:"), |_, _, _| Ok(Value::Int(2)))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateBinding { .. }));

        let thing = bridge.new_object("Thing").unwrap();
        assert_eq!(bridge.send(&thing, "answer", &[]).unwrap(), Value::Int(1));

        bridge
            .override_method("Thing", MethodKind::Instance, "answer", None, |_, _, _| Ok(Value::Int(2)))
            .unwrap();
        assert_eq!(bridge.send(&thing, "answer", &[]).unwrap(), Value::Int(2));
        assert_eq!(bridge.call(&thing, "answer", &[]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_native_methods_need_explicit_override() {
        let (_runtime, bridge) = bridge();
        // `description` is defined directly on Object.
        let err = bridge
            .define_method("Object", MethodKind::Instance, "description", None, |_, _, _| Ok(Value::Nil))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateBinding { .. }));

        // The refused binding is not left in the wrapper table.
        let object = bridge.import("Object").unwrap();
        let selector: Selector = "description".parse().unwrap();
        assert!(object.binding(MethodKind::Instance, &selector).is_none());
        assert!(object.resolve_script_name(MethodKind::Instance, "description").is_none());
        assert_eq!(object.state(), ClassState::DescriptorResolved);

        let instance = bridge.new_object("Object").unwrap();
        let text = bridge.send(&instance, "description", &[]).unwrap();
        assert!(bridge.to_string_value(&text).unwrap().starts_with("<Object: "));
    }

    #[test]
    fn test_bad_signatures_are_declaration_errors() {
        let (_runtime, bridge) = bridge();
        bridge.declare_subclass("Broken", "Object").unwrap();
        let noop = |_: &Bridge, _: &Value, _: &[Value]| Ok(Value::Nil);
        assert!(matches!(
            bridge.define_method("Broken", MethodKind::Instance, "a:", Some("v@:{"), noop),
            Err(Error::SignatureParse(_))
        ));
        assert!(matches!(
            bridge.define_method("Broken", MethodKind::Instance, "a:", Some("v@:(U=ic)"), noop),
            Err(Error::UnsupportedLayout { .. })
        ));
        assert!(matches!(
            bridge.define_method("Broken", MethodKind::Instance, "a:b:", Some("v@:i"), noop),
            Err(Error::ArgumentCountMismatch { .. })
        ));
        assert!(matches!(
            bridge.define_method("Broken", MethodKind::Instance, "mystery:", None, noop),
            Err(Error::UnknownSignature { .. })
        ));
        assert_eq!(bridge.class_state("Broken"), ClassState::NativeSubclassCreated);
    }

    #[test]
    fn test_class_decl_validates_before_creating() {
        let (runtime, bridge) = bridge();
        let err = ClassDecl::new("Half", "Object")
            .method("ok", Some("v@:"), |_, _, _| Ok(Value::Nil))
            .method("bad:", Some("v@:[3"), |_, _, _| Ok(Value::Nil))
            .declare(&bridge)
            .unwrap_err();
        assert!(matches!(err, Error::SignatureParse(_)));
        assert!(runtime.class_named("Half").is_none());
    }

    #[test]
    fn test_reserved_names_are_aliased() {
        let (_runtime, bridge) = bridge();
        let wrapper = ClassDecl::new("Hashy", "Object")
            .method("hash", None, |_, _, _| Ok(Value::Int(99)))
            .declare(&bridge)
            .unwrap();
        assert_eq!(wrapper.alias_for("hash").as_deref(), Some("oc_hash"));
        assert_eq!(wrapper.script_names(MethodKind::Instance), vec!["oc_hash".to_string()]);

        let object = bridge.new_object("Hashy").unwrap();
        assert_eq!(bridge.call(&object, "oc_hash", &[]).unwrap(), Value::Int(99));
        assert!(matches!(bridge.call(&object, "hash", &[]), Err(Error::NoSuchMethod { .. })));
        // Native dispatch sees the script method under the real selector.
        assert_eq!(bridge.send(&object, "hash", &[]).unwrap(), Value::Int(99));
    }

    #[test]
    fn test_accessor_emits_change_notifications() {
        let (runtime, bridge) = bridge();
        ClassDecl::new("Person", "Object")
            .accessor("name")
            .declare(&bridge)
            .unwrap();
        let person = bridge.new_object("Person").unwrap();
        bridge.send(&person, "setName:", &["Ada".into()]).unwrap();
        let name = bridge.send(&person, "name", &[]).unwrap();
        assert_eq!(bridge.to_string_value(&name).as_deref(), Some("Ada"));

        let phases: Vec<_> = runtime
            .notifications()
            .into_iter()
            .map(|n| (n.key, n.phase))
            .collect();
        assert_eq!(
            phases,
            vec![
                ("name".to_string(), ChangePhase::Will),
                ("name".to_string(), ChangePhase::Did)
            ]
        );
    }

    #[test]
    fn test_script_errors_cross_back_as_faults() {
        let (_runtime, bridge) = bridge();
        ClassDecl::new("Grumpy", "Object")
            .method("complain", Some("v@:"), |_, _, _| {
                Err(Error::Config("no".to_string()))
            })
            .declare(&bridge)
            .unwrap();
        let grumpy = bridge.new_object("Grumpy").unwrap();
        let err = bridge.send(&grumpy, "complain", &[]).unwrap_err();
        let Error::NativeCallFault { fault: NativeFault::Script { error }, .. } = err else {
            panic!("expected a script fault");
        };
        assert_eq!(*error, Error::Config("no".to_string()));
    }

    #[test]
    fn test_both_paths_reach_one_callable() {
        let (_runtime, bridge) = bridge();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        ClassDecl::new("Echo", "Object")
            .method("echo:", Some("q@:q"), move |_, _, args| {
                log.borrow_mut().push(args[0].clone());
                Ok(args[0].clone())
            })
            .declare(&bridge)
            .unwrap();
        let echo = bridge.new_object("Echo").unwrap();
        assert_eq!(bridge.send(&echo, "echo:", &[Value::Int(1)]).unwrap(), Value::Int(1));
        assert_eq!(bridge.call(&echo, "echo_", &[Value::Int(2)]).unwrap(), Value::Int(2));
        assert_eq!(*seen.borrow(), vec![Value::Int(1), Value::Int(2)]);
    }
}
